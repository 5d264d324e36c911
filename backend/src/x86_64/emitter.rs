//! x86-64 instruction emitter.
//!
//! Every instruction is assembled from the same pipeline: optional
//! operand-size and SIMD prefixes, an optional REX byte computed from
//! which registers spill past the low 8 encodable slots, one or two
//! opcode bytes, a ModR/M byte, an optional SIB byte, an optional 1- or
//! 4-byte displacement, and an optional trailing immediate. The operand
//! side of an instruction is an [`OpArg`]; forms an instruction cannot
//! encode panic instead of truncating.

use jit_core::cpu::CpuFeatures;

use crate::code_buffer::CodeBuffer;
use crate::x86_64::regs::{
    Reg, Scale, Xmm, CALLEE_SAVED, CALL_ARG_REGS, CTX_REG, MEMBASE_REG,
};

// Opcode flag bits, OR'd into the opcode constant.
pub const P_EXT: u32 = 0x100; // 0F escape
pub const P_EXT38: u32 = 0x200; // 0F 38 escape
pub const P_DATA16: u32 = 0x400; // 66 operand-size override
pub const P_REXW: u32 = 0x1000; // REX.W
pub const P_REXB_RM: u32 = 0x2000; // byte access to the r/m register
pub const P_SIMDF3: u32 = 0x4000; // F3 prefix
pub const P_SIMDF2: u32 = 0x8000; // F2 prefix

/// Arithmetic-group sub-opcodes; also the /r extension of 0x81/0x83.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArithOp {
    Add = 0,
    Or = 1,
    Adc = 2,
    Sbb = 3,
    And = 4,
    Sub = 5,
    Xor = 6,
    Cmp = 7,
}

/// Shift-group sub-opcodes (the /r extension of 0xC1/0xD1/0xD3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShiftOp {
    Rol = 0,
    Ror = 1,
    Shl = 4,
    Shr = 5,
    Sar = 7,
}

/// Condition codes for Jcc/SETcc/CMOVcc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum X86Cond {
    O = 0x0,
    No = 0x1,
    B = 0x2,
    Ae = 0x3,
    E = 0x4,
    Ne = 0x5,
    Be = 0x6,
    A = 0x7,
    S = 0x8,
    Ns = 0x9,
    P = 0xA,
    Np = 0xB,
    L = 0xC,
    Ge = 0xD,
    Le = 0xE,
    G = 0xF,
}

impl X86Cond {
    pub fn invert(self) -> X86Cond {
        // The low bit flips the sense of every pair.
        unsafe { core::mem::transmute(self as u8 ^ 1) }
    }
}

/// One instruction operand: an immediate, a direct register, or a memory
/// reference. The constructor picked decides which instruction forms can
/// consume it; a mismatch is a panic, never a silent truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpArg {
    Reg(Reg),
    Xmm(Xmm),
    Imm8(u8),
    Imm16(u16),
    Imm32(u32),
    Imm64(u64),
    Mem {
        base: Option<Reg>,
        index: Option<(Reg, Scale)>,
        disp: i32,
    },
    /// Position-independent reference to an absolute offset within the
    /// code buffer; the displacement is resolved at emission time.
    RipRel { target: usize },
}

impl OpArg {
    pub fn mem(base: Reg, disp: i32) -> OpArg {
        OpArg::Mem {
            base: Some(base),
            index: None,
            disp,
        }
    }

    pub fn sib(base: Reg, index: Reg, scale: Scale, disp: i32) -> OpArg {
        OpArg::Mem {
            base: Some(base),
            index: Some((index, scale)),
            disp,
        }
    }

    fn is_mem(&self) -> bool {
        matches!(self, OpArg::Mem { .. } | OpArg::RipRel { .. })
    }

    /// Raw register number feeding the REX.B computation (direct
    /// register or memory base).
    fn rm_bits(&self) -> u8 {
        match self {
            OpArg::Reg(r) => *r as u8,
            OpArg::Xmm(x) => *x as u8,
            OpArg::Mem { base, .. } => base.map_or(0, |b| b as u8),
            OpArg::RipRel { .. } => 0,
            imm => panic!("immediate operand {imm:?} where register or memory expected"),
        }
    }

    /// Raw index register number feeding REX.X.
    fn index_bits(&self) -> u8 {
        match self {
            OpArg::Mem {
                index: Some((i, _)),
                ..
            } => *i as u8,
            _ => 0,
        }
    }
}

/// Placeholder branch awaiting `set_jump_target`. `disp_offset` is the
/// buffer offset of the displacement field.
#[derive(Debug)]
#[must_use = "an unresolved fixup leaves a garbage displacement in the stream"]
pub struct FixupJump {
    disp_offset: usize,
    wide: bool,
}

pub struct X64Emitter<'a> {
    buf: &'a mut CodeBuffer,
    features: CpuFeatures,
}

impl<'a> X64Emitter<'a> {
    pub fn new(buf: &'a mut CodeBuffer, features: CpuFeatures) -> X64Emitter<'a> {
        X64Emitter { buf, features }
    }

    pub fn buf(&mut self) -> &mut CodeBuffer {
        self.buf
    }

    pub fn offset(&self) -> usize {
        self.buf.offset()
    }

    /// Legacy prefixes, REX, escape bytes, then the opcode byte. `reg`
    /// is the raw ModR/M reg-field register number.
    fn emit_opcode(&mut self, opc: u32, reg: u8, arg: &OpArg) {
        let rm = arg.rm_bits();
        let index = arg.index_bits();

        let mut rex: u8 = 0;
        if opc & P_REXW != 0 {
            rex |= 0x48;
        }
        if reg >= 8 {
            rex |= 0x44;
        }
        if index >= 8 {
            rex |= 0x42;
        }
        if rm >= 8 {
            rex |= 0x41;
        }
        // SPL/BPL/SIL/DIL need a bare REX to avoid the AH..BH aliases.
        if opc & P_REXB_RM != 0 && !arg.is_mem() && rm >= 4 && rex == 0 {
            rex = 0x40;
        }

        if opc & P_DATA16 != 0 {
            self.buf.emit_u8(0x66);
        }
        if opc & P_SIMDF3 != 0 {
            self.buf.emit_u8(0xF3);
        } else if opc & P_SIMDF2 != 0 {
            self.buf.emit_u8(0xF2);
        }
        if rex != 0 {
            self.buf.emit_u8(rex);
        }
        if opc & (P_EXT | P_EXT38) != 0 {
            self.buf.emit_u8(0x0F);
            if opc & P_EXT38 != 0 {
                self.buf.emit_u8(0x38);
            }
        }
        self.buf.emit_u8(opc as u8);
    }

    /// ModR/M + SIB + displacement for `arg`. `extra_bytes` is the length
    /// of the immediate still to come after the operand, which the
    /// RIP-relative displacement has to skip over.
    fn write_operand(&mut self, reg_field: u8, arg: &OpArg, extra_bytes: usize) {
        let r3 = reg_field & 7;
        match *arg {
            OpArg::Reg(rm) => {
                self.buf.emit_u8(0xC0 | (r3 << 3) | rm.low3());
            }
            OpArg::Xmm(rm) => {
                self.buf.emit_u8(0xC0 | (r3 << 3) | rm.low3());
            }
            OpArg::RipRel { target } => {
                self.buf.emit_u8((r3 << 3) | 0x05);
                let next = self.buf.offset() + 4 + extra_bytes;
                let disp = target as i64 - next as i64;
                assert!(
                    disp >= i32::MIN as i64 && disp <= i32::MAX as i64,
                    "branch out of range: rip-relative displacement {disp}"
                );
                self.buf.emit_u32(disp as u32);
            }
            OpArg::Mem { base, index, disp } => {
                self.write_mem_operand(r3, base, index, disp);
            }
            ref imm => {
                panic!("immediate operand {imm:?} where register or memory expected")
            }
        }
    }

    fn write_mem_operand(
        &mut self,
        r3: u8,
        base: Option<Reg>,
        index: Option<(Reg, Scale)>,
        disp: i32,
    ) {
        let sib = match (base, index) {
            (Some(b), None) if b.low3() != 4 => None,
            // RSP/R12 as base always takes the SIB path: that r/m bit
            // pattern is reserved to mean "SIB follows".
            (Some(b), None) => Some((b.low3(), 4 << 3)),
            (Some(b), Some((i, s))) => {
                assert!(i != Reg::Rsp, "RSP cannot be an index register");
                Some((b.low3(), ((s as u8) << 6) | (i.low3() << 3)))
            }
            (None, Some((i, s))) => {
                // No base: mod=00 with SIB base 101 means disp32 only.
                self.buf.emit_u8((r3 << 3) | 0x04);
                self.buf
                    .emit_u8(((s as u8) << 6) | (i.low3() << 3) | 0x05);
                self.buf.emit_u32(disp as u32);
                return;
            }
            (None, None) => {
                // Absolute disp32, still through SIB so it is not
                // RIP-relative.
                self.buf.emit_u8((r3 << 3) | 0x04);
                self.buf.emit_u8(0x25);
                self.buf.emit_u32(disp as u32);
                return;
            }
        };

        let b3 = base.map_or(0, |b| b.low3());
        // RBP/R13 have no disp-less form; their mod=00 slot means
        // RIP-relative (or SIB base-absent).
        let (modbits, disp_len) = if disp == 0 && b3 != 5 {
            (0x00, 0)
        } else if (-128..=127).contains(&disp) {
            (0x40, 1)
        } else {
            (0x80, 4)
        };

        match sib {
            None => self.buf.emit_u8(modbits | (r3 << 3) | b3),
            Some((sb3, sib_hi)) => {
                self.buf.emit_u8(modbits | (r3 << 3) | 0x04);
                self.buf.emit_u8(sib_hi | sb3);
            }
        }
        match disp_len {
            0 => {}
            1 => self.buf.emit_u8(disp as u8),
            _ => self.buf.emit_u32(disp as u32),
        }
    }

    fn op_rm(&mut self, opc: u32, reg_field: u8, arg: &OpArg, extra_bytes: usize) {
        self.emit_opcode(opc, reg_field, arg);
        self.write_operand(reg_field, arg, extra_bytes);
    }

    // -- Data movement --

    pub fn mov(&mut self, rexw: bool, dst: OpArg, src: OpArg) {
        let w = rexw_flag(rexw);
        match (dst, src) {
            (dst @ (OpArg::Mem { .. } | OpArg::RipRel { .. }), OpArg::Reg(s))
            | (dst @ OpArg::Reg(_), OpArg::Reg(s)) => {
                self.op_rm(0x89 | w, s as u8, &dst, 0);
            }
            (OpArg::Reg(d), src) if src.is_mem() => {
                self.op_rm(0x8B | w, d as u8, &src, 0);
            }
            (OpArg::Reg(d), OpArg::Imm32(v)) => {
                self.mov_ri(rexw, d, v as u64);
            }
            (OpArg::Reg(d), OpArg::Imm64(v)) => {
                self.mov_ri(true, d, v);
            }
            (dst, OpArg::Imm32(v)) if dst.is_mem() => {
                self.op_rm(0xC7 | w, 0, &dst, 4);
                self.buf.emit_u32(v);
            }
            (dst, src) => panic!("unsupported mov operands {dst:?}, {src:?}"),
        }
    }

    /// Load an immediate with the cheapest form: XOR for zero, the plain
    /// 32-bit move when the value fits, the sign-extending C7 form for
    /// negative 64-bit values, and the full 10-byte move only as a last
    /// resort.
    pub fn mov_ri(&mut self, rexw: bool, reg: Reg, val: u64) {
        assert!(
            rexw || val <= u32::MAX as u64,
            "immediate {val:#x} does not fit in a 32-bit move"
        );
        if val == 0 {
            // Writing the 32-bit half zeroes the top anyway.
            self.op_rm(0x31, reg as u8, &OpArg::Reg(reg), 0);
        } else if !rexw || val <= u32::MAX as u64 {
            self.emit_opcode(0xB8 + reg.low3() as u32, 0, &OpArg::Reg(reg));
            self.buf.emit_u32(val as u32);
        } else if val as i64 >= i32::MIN as i64 && val as i64 <= i32::MAX as i64 {
            self.op_rm(0xC7 | P_REXW, 0, &OpArg::Reg(reg), 4);
            self.buf.emit_u32(val as u32);
        } else {
            self.emit_opcode((0xB8 + reg.low3() as u32) | P_REXW, 0, &OpArg::Reg(reg));
            self.buf.emit_u64(val);
        }
    }

    /// Zero-extending load/move from an 8- or 16-bit source.
    pub fn movzx(&mut self, rexw: bool, src_bits: u8, dst: Reg, src: OpArg) {
        let opc = match src_bits {
            8 => 0xB6 | P_EXT | P_REXB_RM,
            16 => 0xB7 | P_EXT,
            bits => panic!("movzx from {bits}-bit source"),
        };
        self.op_rm(opc | rexw_flag(rexw), dst as u8, &src, 0);
    }

    /// Sign-extending load/move from an 8-, 16- or 32-bit source.
    pub fn movsx(&mut self, rexw: bool, src_bits: u8, dst: Reg, src: OpArg) {
        let opc = match src_bits {
            8 => 0xBE | P_EXT | P_REXB_RM,
            16 => 0xBF | P_EXT,
            32 => {
                assert!(rexw, "movsxd only exists with a 64-bit destination");
                0x63
            }
            bits => panic!("movsx from {bits}-bit source"),
        };
        self.op_rm(opc | rexw_flag(rexw), dst as u8, &src, 0);
    }

    pub fn lea(&mut self, rexw: bool, dst: Reg, src: OpArg) {
        assert!(src.is_mem(), "lea needs a memory operand, got {src:?}");
        self.op_rm(0x8D | rexw_flag(rexw), dst as u8, &src, 0);
    }

    // -- Arithmetic --

    pub fn arith(&mut self, op: ArithOp, rexw: bool, dst: OpArg, src: OpArg) {
        let w = rexw_flag(rexw);
        match (dst, src) {
            (dst, OpArg::Imm8(v)) => {
                self.op_rm(0x83 | w, op as u8, &dst, 1);
                self.buf.emit_u8(v);
            }
            (dst, OpArg::Imm32(v)) => {
                // Sign-extended imm8 when it fits.
                if (v as i32) >= -128 && (v as i32) <= 127 {
                    self.op_rm(0x83 | w, op as u8, &dst, 1);
                    self.buf.emit_u8(v as u8);
                } else {
                    self.op_rm(0x81 | w, op as u8, &dst, 4);
                    self.buf.emit_u32(v);
                }
            }
            (OpArg::Reg(d), src) if src.is_mem() || matches!(src, OpArg::Reg(_)) => {
                self.op_rm((0x03 + ((op as u32) << 3)) | w, d as u8, &src, 0);
            }
            (dst, OpArg::Reg(s)) if dst.is_mem() => {
                self.op_rm((0x01 + ((op as u32) << 3)) | w, s as u8, &dst, 0);
            }
            (dst, src) => panic!("unsupported {op:?} operands {dst:?}, {src:?}"),
        }
    }

    pub fn add(&mut self, rexw: bool, dst: OpArg, src: OpArg) {
        self.arith(ArithOp::Add, rexw, dst, src);
    }

    pub fn sub(&mut self, rexw: bool, dst: OpArg, src: OpArg) {
        self.arith(ArithOp::Sub, rexw, dst, src);
    }

    pub fn and_(&mut self, rexw: bool, dst: OpArg, src: OpArg) {
        self.arith(ArithOp::And, rexw, dst, src);
    }

    pub fn or(&mut self, rexw: bool, dst: OpArg, src: OpArg) {
        self.arith(ArithOp::Or, rexw, dst, src);
    }

    pub fn xor(&mut self, rexw: bool, dst: OpArg, src: OpArg) {
        self.arith(ArithOp::Xor, rexw, dst, src);
    }

    pub fn cmp(&mut self, rexw: bool, dst: OpArg, src: OpArg) {
        self.arith(ArithOp::Cmp, rexw, dst, src);
    }

    pub fn test(&mut self, rexw: bool, a: OpArg, b: OpArg) {
        let w = rexw_flag(rexw);
        match (a, b) {
            (a, OpArg::Reg(r)) => self.op_rm(0x85 | w, r as u8, &a, 0),
            (a, OpArg::Imm32(v)) => {
                self.op_rm(0xF7 | w, 0, &a, 4);
                self.buf.emit_u32(v);
            }
            (a, b) => panic!("unsupported test operands {a:?}, {b:?}"),
        }
    }

    /// Shift/rotate group: the amount is an immediate or the CL register.
    pub fn shift(&mut self, op: ShiftOp, rexw: bool, dst: OpArg, amount: OpArg) {
        let w = rexw_flag(rexw);
        match amount {
            OpArg::Imm8(1) => self.op_rm(0xD1 | w, op as u8, &dst, 0),
            OpArg::Imm8(n) => {
                self.op_rm(0xC1 | w, op as u8, &dst, 1);
                self.buf.emit_u8(n);
            }
            OpArg::Reg(Reg::Rcx) => self.op_rm(0xD3 | w, op as u8, &dst, 0),
            amt => panic!("shift amount must be an immediate or CL, got {amt:?}"),
        }
    }

    pub fn neg(&mut self, rexw: bool, dst: OpArg) {
        self.op_rm(0xF7 | rexw_flag(rexw), 3, &dst, 0);
    }

    pub fn not(&mut self, rexw: bool, dst: OpArg) {
        self.op_rm(0xF7 | rexw_flag(rexw), 2, &dst, 0);
    }

    /// Widening unsigned multiply: RDX:RAX = RAX * src.
    pub fn mul(&mut self, rexw: bool, src: OpArg) {
        self.op_rm(0xF7 | rexw_flag(rexw), 4, &src, 0);
    }

    /// Widening signed multiply: RDX:RAX = RAX * src.
    pub fn imul1(&mut self, rexw: bool, src: OpArg) {
        self.op_rm(0xF7 | rexw_flag(rexw), 5, &src, 0);
    }

    pub fn imul(&mut self, rexw: bool, dst: Reg, src: OpArg) {
        self.op_rm(0xAF | P_EXT | rexw_flag(rexw), dst as u8, &src, 0);
    }

    pub fn div(&mut self, rexw: bool, src: OpArg) {
        self.op_rm(0xF7 | rexw_flag(rexw), 6, &src, 0);
    }

    pub fn idiv(&mut self, rexw: bool, src: OpArg) {
        self.op_rm(0xF7 | rexw_flag(rexw), 7, &src, 0);
    }

    pub fn cdq(&mut self) {
        self.buf.emit_u8(0x99);
    }

    // -- Stack, calls, returns --

    pub fn push(&mut self, reg: Reg) {
        self.emit_opcode(0x50 + reg.low3() as u32, 0, &OpArg::Reg(reg));
    }

    pub fn pop(&mut self, reg: Reg) {
        self.emit_opcode(0x58 + reg.low3() as u32, 0, &OpArg::Reg(reg));
    }

    pub fn ret(&mut self) {
        self.buf.emit_u8(0xC3);
    }

    /// Dispatcher entry: save the callee-saved set, then claim the
    /// pinned context and RAM-base registers from the first two ABI
    /// argument registers.
    pub fn emit_dispatcher_entry(&mut self) {
        for &r in CALLEE_SAVED {
            self.push(r);
        }
        self.mov(true, OpArg::Reg(CTX_REG), OpArg::Reg(CALL_ARG_REGS[0]));
        self.mov(true, OpArg::Reg(MEMBASE_REG), OpArg::Reg(CALL_ARG_REGS[1]));
    }

    /// Dispatcher exit: restore the callee-saved set and return to the
    /// caller.
    pub fn emit_dispatcher_exit(&mut self) {
        for &r in CALLEE_SAVED.iter().rev() {
            self.pop(r);
        }
        self.ret();
    }

    pub fn call_reg(&mut self, reg: Reg) {
        self.op_rm(0xFF, 2, &OpArg::Reg(reg), 0);
    }

    pub fn jmp_reg(&mut self, reg: Reg) {
        self.op_rm(0xFF, 4, &OpArg::Reg(reg), 0);
    }

    /// Direct call to an absolute offset within the code buffer.
    pub fn call(&mut self, target: usize) {
        self.buf.emit_u8(0xE8);
        let disp = target as i64 - (self.buf.offset() as i64 + 4);
        self.buf.emit_u32(disp as u32);
    }

    // -- Branch fixups --

    /// Unconditional jump placeholder; `wide` chooses rel32 over rel8.
    pub fn jmp_fixup(&mut self, wide: bool) -> FixupJump {
        if wide {
            self.buf.emit_u8(0xE9);
            let disp_offset = self.buf.offset();
            self.buf.emit_u32(0);
            FixupJump { disp_offset, wide }
        } else {
            self.buf.emit_u8(0xEB);
            let disp_offset = self.buf.offset();
            self.buf.emit_u8(0);
            FixupJump { disp_offset, wide }
        }
    }

    /// Conditional jump placeholder.
    pub fn j_cc_fixup(&mut self, cond: X86Cond, wide: bool) -> FixupJump {
        if wide {
            self.buf.emit_u8(0x0F);
            self.buf.emit_u8(0x80 + cond as u8);
            let disp_offset = self.buf.offset();
            self.buf.emit_u32(0);
            FixupJump { disp_offset, wide }
        } else {
            self.buf.emit_u8(0x70 + cond as u8);
            let disp_offset = self.buf.offset();
            self.buf.emit_u8(0);
            FixupJump { disp_offset, wide }
        }
    }

    /// Resolve a placeholder against the current cursor.
    pub fn set_jump_target(&mut self, fixup: FixupJump) {
        if fixup.wide {
            let disp = self.buf.offset() as i64 - (fixup.disp_offset as i64 + 4);
            assert!(
                disp >= i32::MIN as i64 && disp <= i32::MAX as i64,
                "branch out of range: {disp} does not fit rel32"
            );
            self.buf.patch_u32(fixup.disp_offset, disp as u32);
        } else {
            let disp = self.buf.offset() as i64 - (fixup.disp_offset as i64 + 1);
            assert!(
                (-128..=127).contains(&disp),
                "branch out of range: {disp} does not fit rel8"
            );
            self.buf.patch_u8(fixup.disp_offset, disp as u8);
        }
    }

    // -- Conditionals --

    pub fn setcc(&mut self, cond: X86Cond, dst: OpArg) {
        self.op_rm(0x90 + cond as u32 | P_EXT | P_REXB_RM, 0, &dst, 0);
    }

    pub fn cmovcc(&mut self, cond: X86Cond, rexw: bool, dst: Reg, src: OpArg) {
        self.op_rm((0x40 + cond as u32) | P_EXT | rexw_flag(rexw), dst as u8, &src, 0);
    }

    // -- Scalar SSE --

    fn sse_op(&mut self, opc: u32, dst: u8, src: &OpArg) {
        self.op_rm(opc, dst, src, 0);
    }

    pub fn movss(&mut self, dst: Xmm, src: OpArg) {
        self.sse_op(0x10 | P_EXT | P_SIMDF3, dst as u8, &src);
    }

    pub fn movss_store(&mut self, dst: OpArg, src: Xmm) {
        self.op_rm(0x11 | P_EXT | P_SIMDF3, src as u8, &dst, 0);
    }

    pub fn addss(&mut self, dst: Xmm, src: OpArg) {
        self.sse_op(0x58 | P_EXT | P_SIMDF3, dst as u8, &src);
    }

    pub fn subss(&mut self, dst: Xmm, src: OpArg) {
        self.sse_op(0x5C | P_EXT | P_SIMDF3, dst as u8, &src);
    }

    pub fn mulss(&mut self, dst: Xmm, src: OpArg) {
        self.sse_op(0x59 | P_EXT | P_SIMDF3, dst as u8, &src);
    }

    pub fn divss(&mut self, dst: Xmm, src: OpArg) {
        self.sse_op(0x5E | P_EXT | P_SIMDF3, dst as u8, &src);
    }

    pub fn sqrtss(&mut self, dst: Xmm, src: OpArg) {
        self.sse_op(0x51 | P_EXT | P_SIMDF3, dst as u8, &src);
    }

    /// Packed XOR, the idiomatic register clear / sign-bit flip.
    pub fn xorps(&mut self, dst: Xmm, src: OpArg) {
        self.sse_op(0x57 | P_EXT, dst as u8, &src);
    }

    /// Ordered scalar compare, sets the integer flags.
    pub fn comiss(&mut self, dst: Xmm, src: OpArg) {
        self.sse_op(0x2F | P_EXT, dst as u8, &src);
    }

    pub fn ucomiss(&mut self, dst: Xmm, src: OpArg) {
        self.sse_op(0x2E | P_EXT, dst as u8, &src);
    }

    pub fn cvtsi2ss(&mut self, dst: Xmm, src: OpArg) {
        self.sse_op(0x2A | P_EXT | P_SIMDF3, dst as u8, &src);
    }

    /// Truncating float-to-int conversion.
    pub fn cvttss2si(&mut self, dst: Reg, src: OpArg) {
        self.sse_op(0x2C | P_EXT | P_SIMDF3, dst as u8, &src);
    }

    // -- AVX (VEX-encoded three-operand scalar forms) --

    fn vex_op(&mut self, opc: u32, dst: u8, vvvv: u8, src: &OpArg) {
        assert!(self.features.have_avx, "AVX not supported on this CPU");
        let rm = src.rm_bits();
        let index = src.index_bits();
        let pp: u8 = if opc & P_SIMDF3 != 0 {
            2
        } else if opc & P_SIMDF2 != 0 {
            3
        } else if opc & P_DATA16 != 0 {
            1
        } else {
            0
        };
        let mm: u8 = if opc & P_EXT38 != 0 { 2 } else { 1 };
        let r_bit: u8 = if dst >= 8 { 0 } else { 0x80 };
        let x_bit: u8 = if index >= 8 { 0 } else { 0x40 };
        let b_bit: u8 = if rm >= 8 { 0 } else { 0x20 };
        let vfield = (!vvvv & 0x0F) << 3;
        let w: u8 = if opc & P_REXW != 0 { 0x80 } else { 0 };

        if mm == 1 && w == 0 && x_bit != 0 && b_bit != 0 {
            self.buf.emit_u8(0xC5);
            self.buf.emit_u8(r_bit | vfield | pp);
        } else {
            self.buf.emit_u8(0xC4);
            self.buf.emit_u8(r_bit | x_bit | b_bit | mm);
            self.buf.emit_u8(w | vfield | pp);
        }
        self.buf.emit_u8(opc as u8);
        self.write_operand(dst, src, 0);
    }

    pub fn vaddss(&mut self, dst: Xmm, src1: Xmm, src2: OpArg) {
        self.vex_op(0x58 | P_SIMDF3, dst as u8, src1 as u8, &src2);
    }

    pub fn vsubss(&mut self, dst: Xmm, src1: Xmm, src2: OpArg) {
        self.vex_op(0x5C | P_SIMDF3, dst as u8, src1 as u8, &src2);
    }

    pub fn vmulss(&mut self, dst: Xmm, src1: Xmm, src2: OpArg) {
        self.vex_op(0x59 | P_SIMDF3, dst as u8, src1 as u8, &src2);
    }

    pub fn vdivss(&mut self, dst: Xmm, src1: Xmm, src2: OpArg) {
        self.vex_op(0x5E | P_SIMDF3, dst as u8, src1 as u8, &src2);
    }

    // -- Misc --

    pub fn nop(&mut self) {
        self.buf.emit_u8(0x90);
    }

    pub fn int3(&mut self) {
        self.buf.emit_u8(0xCC);
    }
}

#[inline]
fn rexw_flag(rexw: bool) -> u32 {
    if rexw {
        P_REXW
    } else {
        0
    }
}
