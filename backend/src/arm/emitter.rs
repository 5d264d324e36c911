//! ARM instruction emitter.
//!
//! A stateful cursor over the code buffer with one method per mnemonic.
//! Session state is the current condition predicate (every emitted word
//! ORs it in) and the literal pool. Branches to unknown targets go
//! through [`FixupBranch`] placeholders patched by `set_jump_target`.
//!
//! The immediate-materialization family (`movi2r`, `addi2r`, ...) picks
//! the cheapest sequence the encoding allows: direct Operand2, the
//! complement or negation trick, a two-chunk split or MOVW/MOVT pair,
//! rotate-masked ORR/BIC chains, and finally a scratch-register load.

use crate::code_buffer::CodeBuffer;
use jit_core::CpuFeatures;

use super::operand::{try_make_float_imm8, Operand2};
use super::regs::{ArmReg, CondCode, SReg, ShiftType};

/// Data-processing opcodes, in encoding order (bits 21..25).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataOp {
    And = 0,
    Eor,
    Sub,
    Rsb,
    Add,
    Adc,
    Sbc,
    Rsc,
    Tst,
    Teq,
    Cmp,
    Cmn,
    Orr,
    Mov,
    Bic,
    Mvn,
}

/// Load/store mnemonics covered by the addressing-form lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOp {
    Ldr,
    Ldrb,
    Ldrh,
    Ldrsb,
    Ldrsh,
    Str,
    Strb,
    Strh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrKind {
    Imm,
    Reg,
    ShiftedReg,
}

/// Operand form of an `Operand2`, for encodability lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Imm,
    Reg,
    ShiftedRegImm,
    ShiftedRegReg,
}

impl Operand2 {
    fn kind(self) -> OperandKind {
        match self {
            Operand2::Imm { .. } => OperandKind::Imm,
            Operand2::Reg(_) => OperandKind::Reg,
            Operand2::ShiftedRegImm { .. } => OperandKind::ShiftedRegImm,
            Operand2::ShiftedRegReg { .. } => OperandKind::ShiftedRegReg,
        }
    }
}

/// Opcode bits (21..25) for a data-processing op with the given operand
/// form, or `None` for combinations the hardware has no encoding for.
pub fn data_op_bits(op: DataOp, _kind: OperandKind) -> Option<u32> {
    // Every base data-processing op accepts all four operand forms; the
    // lookup exists so new rows (and their gaps) stay type-checked.
    Some((op as u32) << 21)
}

/// Addressing-form support per load/store mnemonic. Halfword and signed
/// transfers have no shifted-register form.
pub fn mem_op_supported(op: MemOp, kind: AddrKind) -> bool {
    match op {
        MemOp::Ldr | MemOp::Ldrb | MemOp::Str | MemOp::Strb => true,
        MemOp::Ldrh | MemOp::Ldrsb | MemOp::Ldrsh | MemOp::Strh => {
            kind != AddrKind::ShiftedReg
        }
    }
}

/// An unresolved branch: the placeholder's buffer offset, the condition
/// captured at emission time, and whether it links. Consumed exactly
/// once by [`ArmEmitter::set_jump_target`].
#[derive(Debug, Clone, Copy)]
pub struct FixupBranch {
    pub offset: usize,
    pub cond: u32,
    pub link: bool,
}

struct LitEntry {
    val: u32,
    /// Offset of the LDR waiting for this constant.
    ldr_offset: usize,
    /// Offset of the pool slot, once placed.
    loc: Option<usize>,
}

/// Chunk-synthesis cap for the `try_*i2r` helpers: above this many ALU
/// ops a scratch-register load is cheaper. The worst case is 4 chunks,
/// e.g. 0x55555555.
pub const MAX_CHUNK_OPS: u32 = 3;

pub struct ArmEmitter<'a> {
    buf: &'a mut CodeBuffer,
    /// Current predicate, pre-shifted into bits 28..32.
    cond: u32,
    lit_pool: Vec<LitEntry>,
    features: CpuFeatures,
}

/// Restores the previous condition predicate on drop.
pub struct CondScope<'b, 'a> {
    emit: &'b mut ArmEmitter<'a>,
    prev: u32,
}

impl<'a> std::ops::Deref for CondScope<'_, 'a> {
    type Target = ArmEmitter<'a>;
    fn deref(&self) -> &ArmEmitter<'a> {
        self.emit
    }
}

impl<'a> std::ops::DerefMut for CondScope<'_, 'a> {
    fn deref_mut(&mut self) -> &mut ArmEmitter<'a> {
        self.emit
    }
}

impl Drop for CondScope<'_, '_> {
    fn drop(&mut self) {
        self.emit.cond = self.prev;
    }
}

impl<'a> ArmEmitter<'a> {
    pub fn new(buf: &'a mut CodeBuffer, features: CpuFeatures) -> Self {
        ArmEmitter {
            buf,
            cond: CondCode::Al.bits(),
            lit_pool: Vec::new(),
            features,
        }
    }

    #[inline]
    pub fn buf(&mut self) -> &mut CodeBuffer {
        self.buf
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.buf.offset()
    }

    /// Set the predicate applied to every following instruction. Callers
    /// must restore `Al` after a conditional region, or use `with_cc`.
    pub fn set_cc(&mut self, cond: CondCode) {
        self.cond = cond.bits();
    }

    /// Predicate scope: restores the previous condition when dropped.
    pub fn with_cc(&mut self, cond: CondCode) -> CondScope<'_, 'a> {
        let prev = self.cond;
        self.cond = cond.bits();
        CondScope { emit: self, prev }
    }

    #[inline]
    fn write32(&mut self, word: u32) {
        self.buf.emit_u32(word);
    }

    // -- Data processing --

    fn write_data_op(
        &mut self,
        op: DataOp,
        set_flags: bool,
        rd: ArmReg,
        rn: ArmReg,
        op2: Operand2,
    ) {
        let opcode = match data_op_bits(op, op2.kind()) {
            Some(bits) => bits,
            None => panic!("{op:?} has no {:?} form", op2.kind()),
        };
        let word = self.cond
            | (op2.is_imm() as u32) << 25
            | opcode
            | (set_flags as u32) << 20
            | rn.bits() << 16
            | rd.bits() << 12
            | op2.encode();
        self.write32(word);
    }

    pub fn mov(&mut self, rd: ArmReg, op2: Operand2) {
        self.write_data_op(DataOp::Mov, false, rd, ArmReg::R0, op2);
    }

    pub fn movs(&mut self, rd: ArmReg, op2: Operand2) {
        self.write_data_op(DataOp::Mov, true, rd, ArmReg::R0, op2);
    }

    pub fn mvn(&mut self, rd: ArmReg, op2: Operand2) {
        self.write_data_op(DataOp::Mvn, false, rd, ArmReg::R0, op2);
    }

    pub fn add(&mut self, rd: ArmReg, rn: ArmReg, op2: Operand2) {
        self.write_data_op(DataOp::Add, false, rd, rn, op2);
    }

    pub fn adds(&mut self, rd: ArmReg, rn: ArmReg, op2: Operand2) {
        self.write_data_op(DataOp::Add, true, rd, rn, op2);
    }

    pub fn adc(&mut self, rd: ArmReg, rn: ArmReg, op2: Operand2) {
        self.write_data_op(DataOp::Adc, false, rd, rn, op2);
    }

    pub fn sub(&mut self, rd: ArmReg, rn: ArmReg, op2: Operand2) {
        self.write_data_op(DataOp::Sub, false, rd, rn, op2);
    }

    pub fn subs(&mut self, rd: ArmReg, rn: ArmReg, op2: Operand2) {
        self.write_data_op(DataOp::Sub, true, rd, rn, op2);
    }

    pub fn sbc(&mut self, rd: ArmReg, rn: ArmReg, op2: Operand2) {
        self.write_data_op(DataOp::Sbc, false, rd, rn, op2);
    }

    pub fn rsb(&mut self, rd: ArmReg, rn: ArmReg, op2: Operand2) {
        self.write_data_op(DataOp::Rsb, false, rd, rn, op2);
    }

    pub fn and_(&mut self, rd: ArmReg, rn: ArmReg, op2: Operand2) {
        self.write_data_op(DataOp::And, false, rd, rn, op2);
    }

    pub fn orr(&mut self, rd: ArmReg, rn: ArmReg, op2: Operand2) {
        self.write_data_op(DataOp::Orr, false, rd, rn, op2);
    }

    pub fn eor(&mut self, rd: ArmReg, rn: ArmReg, op2: Operand2) {
        self.write_data_op(DataOp::Eor, false, rd, rn, op2);
    }

    pub fn bic(&mut self, rd: ArmReg, rn: ArmReg, op2: Operand2) {
        self.write_data_op(DataOp::Bic, false, rd, rn, op2);
    }

    pub fn tst(&mut self, rn: ArmReg, op2: Operand2) {
        self.write_data_op(DataOp::Tst, true, ArmReg::R0, rn, op2);
    }

    pub fn teq(&mut self, rn: ArmReg, op2: Operand2) {
        self.write_data_op(DataOp::Teq, true, ArmReg::R0, rn, op2);
    }

    pub fn cmp(&mut self, rn: ArmReg, op2: Operand2) {
        self.write_data_op(DataOp::Cmp, true, ArmReg::R0, rn, op2);
    }

    pub fn cmn(&mut self, rn: ArmReg, op2: Operand2) {
        self.write_data_op(DataOp::Cmn, true, ArmReg::R0, rn, op2);
    }

    pub fn lsl(&mut self, rd: ArmReg, rm: ArmReg, amount: u8) {
        if amount == 0 {
            self.mov(rd, Operand2::Reg(rm));
        } else {
            self.mov(rd, Operand2::shifted(rm, ShiftType::Lsl, amount));
        }
    }

    pub fn lsr(&mut self, rd: ArmReg, rm: ArmReg, amount: u8) {
        if amount == 0 {
            self.mov(rd, Operand2::Reg(rm));
        } else {
            self.mov(rd, Operand2::shifted(rm, ShiftType::Lsr, amount));
        }
    }

    pub fn asr(&mut self, rd: ArmReg, rm: ArmReg, amount: u8) {
        if amount == 0 {
            self.mov(rd, Operand2::Reg(rm));
        } else {
            self.mov(rd, Operand2::shifted(rm, ShiftType::Asr, amount));
        }
    }

    pub fn lsl_reg(&mut self, rd: ArmReg, rm: ArmReg, rs: ArmReg) {
        self.mov(
            rd,
            Operand2::ShiftedRegReg {
                base: rm,
                shift: ShiftType::Lsl,
                reg: rs,
            },
        );
    }

    pub fn lsr_reg(&mut self, rd: ArmReg, rm: ArmReg, rs: ArmReg) {
        self.mov(
            rd,
            Operand2::ShiftedRegReg {
                base: rm,
                shift: ShiftType::Lsr,
                reg: rs,
            },
        );
    }

    pub fn asr_reg(&mut self, rd: ArmReg, rm: ArmReg, rs: ArmReg) {
        self.mov(
            rd,
            Operand2::ShiftedRegReg {
                base: rm,
                shift: ShiftType::Asr,
                reg: rs,
            },
        );
    }

    // -- Wide moves, bitfields, misc --

    pub fn movw(&mut self, rd: ArmReg, imm: u16) {
        assert!(self.features.have_armv7, "MOVW requires ARMv7");
        let imm = imm as u32;
        self.write32(
            self.cond
                | 0x0300_0000
                | (imm >> 12) << 16
                | rd.bits() << 12
                | (imm & 0xFFF),
        );
    }

    pub fn movt(&mut self, rd: ArmReg, imm: u16) {
        assert!(self.features.have_armv7, "MOVT requires ARMv7");
        let imm = imm as u32;
        self.write32(
            self.cond
                | 0x0340_0000
                | (imm >> 12) << 16
                | rd.bits() << 12
                | (imm & 0xFFF),
        );
    }

    pub fn ubfx(&mut self, rd: ArmReg, rn: ArmReg, lsb: u8, width: u8) {
        assert!(self.features.have_armv7, "UBFX requires ARMv7");
        assert!(lsb < 32 && width >= 1 && lsb + width <= 32);
        self.write32(
            self.cond
                | 0x07E0_0050
                | ((width - 1) as u32) << 16
                | rd.bits() << 12
                | (lsb as u32) << 7
                | rn.bits(),
        );
    }

    pub fn sbfx(&mut self, rd: ArmReg, rn: ArmReg, lsb: u8, width: u8) {
        assert!(self.features.have_armv7, "SBFX requires ARMv7");
        assert!(lsb < 32 && width >= 1 && lsb + width <= 32);
        self.write32(
            self.cond
                | 0x07A0_0050
                | ((width - 1) as u32) << 16
                | rd.bits() << 12
                | (lsb as u32) << 7
                | rn.bits(),
        );
    }

    pub fn bfi(&mut self, rd: ArmReg, rn: ArmReg, lsb: u8, width: u8) {
        assert!(self.features.have_armv7, "BFI requires ARMv7");
        assert!(lsb < 32 && width >= 1 && lsb + width <= 32);
        let msb = (lsb + width - 1) as u32;
        self.write32(
            self.cond
                | 0x07C0_0010
                | msb << 16
                | rd.bits() << 12
                | (lsb as u32) << 7
                | rn.bits(),
        );
    }

    pub fn bfc(&mut self, rd: ArmReg, lsb: u8, width: u8) {
        assert!(self.features.have_armv7, "BFC requires ARMv7");
        assert!(lsb < 32 && width >= 1 && lsb + width <= 32);
        let msb = (lsb + width - 1) as u32;
        self.write32(
            self.cond
                | 0x07C0_001F
                | msb << 16
                | rd.bits() << 12
                | (lsb as u32) << 7,
        );
    }

    pub fn clz(&mut self, rd: ArmReg, rm: ArmReg) {
        self.write32(self.cond | 0x016F_0F10 | rd.bits() << 12 | rm.bits());
    }

    pub fn rev(&mut self, rd: ArmReg, rm: ArmReg) {
        self.write32(self.cond | 0x06BF_0F30 | rd.bits() << 12 | rm.bits());
    }

    pub fn rev16(&mut self, rd: ArmReg, rm: ArmReg) {
        self.write32(self.cond | 0x06BF_0FB0 | rd.bits() << 12 | rm.bits());
    }

    pub fn sxtb(&mut self, rd: ArmReg, rm: ArmReg) {
        self.write32(self.cond | 0x06AF_0070 | rd.bits() << 12 | rm.bits());
    }

    pub fn sxth(&mut self, rd: ArmReg, rm: ArmReg) {
        self.write32(self.cond | 0x06BF_0070 | rd.bits() << 12 | rm.bits());
    }

    pub fn uxtb(&mut self, rd: ArmReg, rm: ArmReg) {
        self.write32(self.cond | 0x06EF_0070 | rd.bits() << 12 | rm.bits());
    }

    pub fn uxth(&mut self, rd: ArmReg, rm: ArmReg) {
        self.write32(self.cond | 0x06FF_0070 | rd.bits() << 12 | rm.bits());
    }

    pub fn nop(&mut self) {
        self.write32(self.cond | 0x01A0_0000);
    }

    pub fn bkpt(&mut self, imm: u16) {
        let imm = imm as u32;
        self.write32(
            self.cond | 0x0120_0070 | (imm << 4 & 0x000F_FF00) | (imm & 0xF),
        );
    }

    // -- Multiply / divide --

    pub fn mul(&mut self, rd: ArmReg, rm: ArmReg, rs: ArmReg) {
        self.write32(
            self.cond | rd.bits() << 16 | rs.bits() << 8 | 0x90 | rm.bits(),
        );
    }

    pub fn mla(&mut self, rd: ArmReg, rm: ArmReg, rs: ArmReg, ra: ArmReg) {
        self.write32(
            self.cond
                | 1 << 21
                | rd.bits() << 16
                | ra.bits() << 12
                | rs.bits() << 8
                | 0x90
                | rm.bits(),
        );
    }

    pub fn umull(
        &mut self,
        rd_lo: ArmReg,
        rd_hi: ArmReg,
        rm: ArmReg,
        rs: ArmReg,
    ) {
        self.write32(
            self.cond
                | 0x0080_0090
                | rd_hi.bits() << 16
                | rd_lo.bits() << 12
                | rs.bits() << 8
                | rm.bits(),
        );
    }

    pub fn smull(
        &mut self,
        rd_lo: ArmReg,
        rd_hi: ArmReg,
        rm: ArmReg,
        rs: ArmReg,
    ) {
        self.write32(
            self.cond
                | 0x00C0_0090
                | rd_hi.bits() << 16
                | rd_lo.bits() << 12
                | rs.bits() << 8
                | rm.bits(),
        );
    }

    pub fn udiv(&mut self, rd: ArmReg, rn: ArmReg, rm: ArmReg) {
        assert!(self.features.have_idiv, "UDIV not supported on this CPU");
        self.write32(
            self.cond | 0x0730_F010 | rd.bits() << 16 | rm.bits() << 8 | rn.bits(),
        );
    }

    pub fn sdiv(&mut self, rd: ArmReg, rn: ArmReg, rm: ArmReg) {
        assert!(self.features.have_idiv, "SDIV not supported on this CPU");
        self.write32(
            self.cond | 0x0710_F010 | rd.bits() << 16 | rm.bits() << 8 | rn.bits(),
        );
    }

    // -- Loads and stores --

    fn write_mem_imm(&mut self, op: MemOp, rd: ArmReg, rn: ArmReg, offset: i32) {
        assert!(mem_op_supported(op, AddrKind::Imm));
        let (up, abs) = if offset >= 0 {
            (1u32, offset as u32)
        } else {
            (0u32, (-offset) as u32)
        };
        let word = match op {
            MemOp::Ldr | MemOp::Ldrb | MemOp::Str | MemOp::Strb => {
                assert!(abs < 4096, "load/store offset out of range: {offset}");
                let byte = matches!(op, MemOp::Ldrb | MemOp::Strb);
                let load = matches!(op, MemOp::Ldr | MemOp::Ldrb);
                self.cond
                    | 0x0400_0000
                    | 1 << 24
                    | up << 23
                    | (byte as u32) << 22
                    | (load as u32) << 20
                    | rn.bits() << 16
                    | rd.bits() << 12
                    | abs
            }
            MemOp::Ldrh | MemOp::Ldrsb | MemOp::Ldrsh | MemOp::Strh => {
                assert!(abs < 256, "extra load/store offset out of range: {offset}");
                let load = op != MemOp::Strh;
                let (s, h) = match op {
                    MemOp::Ldrh | MemOp::Strh => (0u32, 1u32),
                    MemOp::Ldrsb => (1, 0),
                    MemOp::Ldrsh => (1, 1),
                    _ => unreachable!(),
                };
                self.cond
                    | 1 << 24
                    | up << 23
                    | 1 << 22
                    | (load as u32) << 20
                    | rn.bits() << 16
                    | rd.bits() << 12
                    | (abs & 0xF0) << 4
                    | 1 << 7
                    | s << 6
                    | h << 5
                    | 1 << 4
                    | (abs & 0xF)
            }
        };
        self.write32(word);
    }

    fn write_mem_reg(&mut self, op: MemOp, rd: ArmReg, rn: ArmReg, rm: ArmReg) {
        assert!(mem_op_supported(op, AddrKind::Reg));
        let word = match op {
            MemOp::Ldr | MemOp::Ldrb | MemOp::Str | MemOp::Strb => {
                let byte = matches!(op, MemOp::Ldrb | MemOp::Strb);
                let load = matches!(op, MemOp::Ldr | MemOp::Ldrb);
                self.cond
                    | 0x0600_0000
                    | 1 << 24
                    | 1 << 23
                    | (byte as u32) << 22
                    | (load as u32) << 20
                    | rn.bits() << 16
                    | rd.bits() << 12
                    | rm.bits()
            }
            MemOp::Ldrh | MemOp::Ldrsb | MemOp::Ldrsh | MemOp::Strh => {
                let load = op != MemOp::Strh;
                let (s, h) = match op {
                    MemOp::Ldrh | MemOp::Strh => (0u32, 1u32),
                    MemOp::Ldrsb => (1, 0),
                    MemOp::Ldrsh => (1, 1),
                    _ => unreachable!(),
                };
                self.cond
                    | 1 << 24
                    | 1 << 23
                    | (load as u32) << 20
                    | rn.bits() << 16
                    | rd.bits() << 12
                    | 1 << 7
                    | s << 6
                    | h << 5
                    | 1 << 4
                    | rm.bits()
            }
        };
        self.write32(word);
    }

    pub fn ldr(&mut self, rd: ArmReg, rn: ArmReg, offset: i32) {
        self.write_mem_imm(MemOp::Ldr, rd, rn, offset);
    }

    pub fn str(&mut self, rd: ArmReg, rn: ArmReg, offset: i32) {
        self.write_mem_imm(MemOp::Str, rd, rn, offset);
    }

    pub fn ldrb(&mut self, rd: ArmReg, rn: ArmReg, offset: i32) {
        self.write_mem_imm(MemOp::Ldrb, rd, rn, offset);
    }

    pub fn strb(&mut self, rd: ArmReg, rn: ArmReg, offset: i32) {
        self.write_mem_imm(MemOp::Strb, rd, rn, offset);
    }

    pub fn ldrh(&mut self, rd: ArmReg, rn: ArmReg, offset: i32) {
        self.write_mem_imm(MemOp::Ldrh, rd, rn, offset);
    }

    pub fn strh(&mut self, rd: ArmReg, rn: ArmReg, offset: i32) {
        self.write_mem_imm(MemOp::Strh, rd, rn, offset);
    }

    pub fn ldrsb(&mut self, rd: ArmReg, rn: ArmReg, offset: i32) {
        self.write_mem_imm(MemOp::Ldrsb, rd, rn, offset);
    }

    pub fn ldrsh(&mut self, rd: ArmReg, rn: ArmReg, offset: i32) {
        self.write_mem_imm(MemOp::Ldrsh, rd, rn, offset);
    }

    fn write_mem_reg_shifted(
        &mut self,
        op: MemOp,
        rd: ArmReg,
        rn: ArmReg,
        rm: ArmReg,
        shift: ShiftType,
        amount: u8,
    ) {
        assert!(mem_op_supported(op, AddrKind::ShiftedReg));
        assert!(amount < 32, "shift amount out of range: {amount}");
        let byte = matches!(op, MemOp::Ldrb | MemOp::Strb);
        let load = matches!(op, MemOp::Ldr | MemOp::Ldrb);
        self.write32(
            self.cond
                | 0x0600_0000
                | 1 << 24
                | 1 << 23
                | (byte as u32) << 22
                | (load as u32) << 20
                | rn.bits() << 16
                | rd.bits() << 12
                | (amount as u32) << 7
                | (shift as u32) << 5
                | rm.bits(),
        );
    }

    pub fn ldr_reg(&mut self, rd: ArmReg, rn: ArmReg, rm: ArmReg) {
        self.write_mem_reg(MemOp::Ldr, rd, rn, rm);
    }

    /// `LDR rd, [rn, rm, <shift> #amount]`.
    pub fn ldr_shifted(
        &mut self,
        rd: ArmReg,
        rn: ArmReg,
        rm: ArmReg,
        shift: ShiftType,
        amount: u8,
    ) {
        self.write_mem_reg_shifted(MemOp::Ldr, rd, rn, rm, shift, amount);
    }

    /// `STR rd, [rn, rm, <shift> #amount]`.
    pub fn str_shifted(
        &mut self,
        rd: ArmReg,
        rn: ArmReg,
        rm: ArmReg,
        shift: ShiftType,
        amount: u8,
    ) {
        self.write_mem_reg_shifted(MemOp::Str, rd, rn, rm, shift, amount);
    }

    pub fn str_reg(&mut self, rd: ArmReg, rn: ArmReg, rm: ArmReg) {
        self.write_mem_reg(MemOp::Str, rd, rn, rm);
    }

    pub fn ldrb_reg(&mut self, rd: ArmReg, rn: ArmReg, rm: ArmReg) {
        self.write_mem_reg(MemOp::Ldrb, rd, rn, rm);
    }

    pub fn strb_reg(&mut self, rd: ArmReg, rn: ArmReg, rm: ArmReg) {
        self.write_mem_reg(MemOp::Strb, rd, rn, rm);
    }

    /// Store multiple, increment after: `STMIA rn{!}, {mask}`.
    pub fn stmia(&mut self, rn: ArmReg, writeback: bool, mask: u16) {
        assert!(mask != 0, "empty register list");
        self.write32(
            self.cond
                | 0x0880_0000
                | (writeback as u32) << 21
                | rn.bits() << 16
                | mask as u32,
        );
    }

    /// Load multiple, increment after: `LDMIA rn{!}, {mask}`.
    pub fn ldmia(&mut self, rn: ArmReg, writeback: bool, mask: u16) {
        assert!(mask != 0, "empty register list");
        self.write32(
            self.cond
                | 0x0890_0000
                | (writeback as u32) << 21
                | rn.bits() << 16
                | mask as u32,
        );
    }

    /// `STMDB sp!, {mask}`.
    pub fn push(&mut self, mask: u16) {
        assert!(mask != 0, "empty register list");
        self.write32(self.cond | 0x092D_0000 | mask as u32);
    }

    /// `LDMIA sp!, {mask}`.
    pub fn pop(&mut self, mask: u16) {
        assert!(mask != 0, "empty register list");
        self.write32(self.cond | 0x08BD_0000 | mask as u32);
    }

    // -- Branches --

    /// Emit a placeholder branch; resolve with `set_jump_target`.
    pub fn b_fixup(&mut self) -> FixupBranch {
        let branch = FixupBranch {
            offset: self.buf.offset(),
            cond: self.cond,
            link: false,
        };
        self.nop();
        branch
    }

    pub fn bl_fixup(&mut self) -> FixupBranch {
        let branch = FixupBranch {
            offset: self.buf.offset(),
            cond: self.cond,
            link: true,
        };
        self.nop();
        branch
    }

    /// Placeholder branch under an explicit condition, without touching
    /// the session predicate.
    pub fn b_cc_fixup(&mut self, cond: CondCode) -> FixupBranch {
        let branch = FixupBranch {
            offset: self.buf.offset(),
            cond: cond.bits(),
            link: false,
        };
        self.nop();
        branch
    }

    /// Patch `fixup` to branch to the current cursor.
    pub fn set_jump_target(&mut self, fixup: FixupBranch) {
        let distance = self.buf.offset() as i64 - 8 - fixup.offset as i64;
        assert!(
            distance > -0x0200_0000 && distance < 0x0200_0000,
            "branch out of range: {distance:#x}"
        );
        let opcode = if fixup.link { 0x0B00_0000 } else { 0x0A00_0000 };
        let instr =
            fixup.cond | opcode | ((distance as u32) >> 2 & 0x00FF_FFFF);
        self.buf.patch_u32(fixup.offset, instr);
    }

    /// Branch to a known offset within the buffer.
    pub fn b_offset(&mut self, target: usize) {
        let distance = target as i64 - (self.buf.offset() as i64 + 8);
        assert!(
            distance > -0x0200_0000 && distance < 0x0200_0000,
            "branch out of range: {distance:#x}"
        );
        let word =
            self.cond | 0x0A00_0000 | ((distance as u32) >> 2 & 0x00FF_FFFF);
        self.write32(word);
    }

    /// Branch-and-link to an absolute address.
    pub fn bl_abs(&mut self, target: usize) {
        let distance = target as i64 - (self.buf.current_ptr() as i64 + 8);
        assert!(
            distance > -0x0200_0000 && distance < 0x0200_0000,
            "branch out of range: {distance:#x}"
        );
        let word =
            self.cond | 0x0B00_0000 | ((distance as u32) >> 2 & 0x00FF_FFFF);
        self.write32(word);
    }

    pub fn bl_in_range(&self, target: usize) -> bool {
        let distance = target as i64 - (self.buf.current_ptr() as i64 + 8);
        distance > -0x0200_0000 && distance < 0x0200_0000
    }

    pub fn bx(&mut self, rm: ArmReg) {
        self.write32(self.cond | 0x012F_FF10 | rm.bits());
    }

    pub fn blx_reg(&mut self, rm: ArmReg) {
        self.write32(self.cond | 0x012F_FF30 | rm.bits());
    }

    /// Call `target`: a direct BL when reachable, otherwise materialize
    /// the address into `scratch` and BLX through it.
    pub fn quick_call(&mut self, target: usize, scratch: ArmReg) {
        if self.bl_in_range(target) {
            self.bl_abs(target);
        } else {
            self.movi2r(scratch, target as u32);
            self.blx_reg(scratch);
        }
    }

    // -- Literal pool --

    /// Record a constant for the pool. The very next emitted instruction
    /// must be the `ldr_lit` that consumes it.
    pub fn add_new_lit(&mut self, val: u32) {
        self.lit_pool.push(LitEntry {
            val,
            ldr_offset: self.buf.offset(),
            loc: None,
        });
    }

    /// PC-relative load placeholder, back-patched by `flush_lit_pool`.
    pub fn ldr_lit(&mut self, rd: ArmReg) {
        self.write32(self.cond | 0x051F_0000 | rd.bits() << 12);
    }

    /// Place pooled constants at the cursor and patch their loads.
    /// Duplicate values share one slot. Must run within LDR range
    /// (±4 KB) of every pending load, i.e. at block boundaries.
    pub fn flush_lit_pool(&mut self) {
        let mut pool = std::mem::take(&mut self.lit_pool);
        self.buf.align(4);
        for i in 0..pool.len() {
            if pool[i].loc.is_none() {
                let dup = pool[..i]
                    .iter()
                    .find(|e| e.val == pool[i].val)
                    .and_then(|e| e.loc);
                pool[i].loc = dup;
            }
            if pool[i].loc.is_none() {
                pool[i].loc = Some(self.buf.offset());
                let val = pool[i].val;
                self.buf.emit_u32(val);
            }
            let loc = pool[i].loc.unwrap();
            let offset = loc as i64 - pool[i].ldr_offset as i64 - 8;
            assert!(
                offset.unsigned_abs() < 0x1000,
                "literal pool out of LDR range: {offset}"
            );
            let ldr_offset = pool[i].ldr_offset;
            let patched = self.buf.read_u32(ldr_offset)
                | ((offset >= 0) as u32) << 23
                | offset.unsigned_abs() as u32;
            self.buf.patch_u32(ldr_offset, patched);
        }
    }

    pub fn lit_pool_len(&self) -> usize {
        self.lit_pool.len()
    }

    // -- Immediate materialization --

    /// Materialize an arbitrary 32-bit constant in `rd`. Never fails:
    /// the ladder bottoms out in a chunked MOV/ORR synthesis.
    pub fn movi2r(&mut self, rd: ArmReg, val: u32) {
        if let Some((op2, inverse)) = Operand2::try_from_imm_inverse(val) {
            if inverse {
                self.mvn(rd, op2);
            } else {
                self.mov(rd, op2);
            }
        } else if self.features.have_armv7 {
            self.movw(rd, val as u16);
            if val & 0xFFFF_0000 != 0 {
                self.movt(rd, (val >> 16) as u16);
            }
        } else if !self.try_set_value_two_op(rd, val) {
            let mut first = true;
            let mut i = 0u32;
            while i < 32 {
                let bits = val.rotate_right(i) as u8;
                if bits & 3 != 0 {
                    let rotation = if i == 0 { 0 } else { (16 - i / 2) as u8 };
                    let op2 = Operand2::Imm {
                        value: bits,
                        rotation,
                    };
                    if first {
                        self.mov(rd, op2);
                        first = false;
                    } else {
                        self.orr(rd, rd, op2);
                    }
                    // Those eight bits are handled, skip past them.
                    i += 8 - 2;
                }
                i += 2;
            }
        }
    }

    /// Two-instruction MOV+ORR split over 8-bit chunks at even bit
    /// offsets. Fails when the value needs more than two chunks.
    pub fn try_set_value_two_op(&mut self, rd: ArmReg, val: u32) -> bool {
        let mut ops = 0;
        let mut i = 0;
        while i < 16 {
            if (val >> (i * 2)) & 0x3 != 0 {
                ops += 1;
                i += 3;
            }
            i += 1;
        }
        if ops > 2 {
            return false;
        }

        let mut first = true;
        let mut v = val;
        let mut i = 0u32;
        while i < 16 {
            if v & 0x3 != 0 {
                let op2 = Operand2::Imm {
                    value: v as u8,
                    rotation: ((16 - i) & 0xF) as u8,
                };
                if first {
                    self.mov(rd, op2);
                    first = false;
                } else {
                    self.orr(rd, rd, op2);
                }
                i += 3;
                v >>= 6;
            }
            i += 1;
            v >>= 2;
        }
        true
    }

    pub fn addi2r(&mut self, rd: ArmReg, rs: ArmReg, val: u32, scratch: ArmReg) {
        if !self.try_addi2r(rd, rs, val) {
            self.movi2r(scratch, val);
            self.add(rd, rs, Operand2::Reg(scratch));
        }
    }

    pub fn try_addi2r(&mut self, rd: ArmReg, rs: ArmReg, val: u32) -> bool {
        if val == 0 {
            if rd != rs {
                self.mov(rd, Operand2::Reg(rs));
            }
            return true;
        }
        if let Some((op2, negated)) = Operand2::try_from_imm_negated(val) {
            if negated {
                self.sub(rd, rs, op2);
            } else {
                self.add(rd, rs, op2);
            }
            return true;
        }
        // Decompose 16-bit values into two additions (or subtractions of
        // the negation).
        if val & 0xFFFF_0000 == 0 {
            // Rotation 12 is a left-rotate by 8.
            self.add(
                rd,
                rs,
                Operand2::Imm {
                    value: (val >> 8) as u8,
                    rotation: 12,
                },
            );
            self.add(
                rd,
                rd,
                Operand2::Imm {
                    value: val as u8,
                    rotation: 0,
                },
            );
            true
        } else if val.wrapping_neg() & 0xFFFF_0000 == 0 {
            let neg = val.wrapping_neg();
            self.sub(
                rd,
                rs,
                Operand2::Imm {
                    value: (neg >> 8) as u8,
                    rotation: 12,
                },
            );
            self.sub(
                rd,
                rd,
                Operand2::Imm {
                    value: neg as u8,
                    rotation: 0,
                },
            );
            true
        } else {
            false
        }
    }

    pub fn subi2r(&mut self, rd: ArmReg, rs: ArmReg, val: u32, scratch: ArmReg) {
        if !self.try_subi2r(rd, rs, val) {
            self.movi2r(scratch, val);
            self.sub(rd, rs, Operand2::Reg(scratch));
        }
    }

    pub fn try_subi2r(&mut self, rd: ArmReg, rs: ArmReg, val: u32) -> bool {
        // Just add the negation.
        self.try_addi2r(rd, rs, val.wrapping_neg())
    }

    pub fn andi2r(&mut self, rd: ArmReg, rs: ArmReg, val: u32, scratch: ArmReg) {
        if !self.try_andi2r(rd, rs, val) {
            self.movi2r(scratch, val);
            self.and_(rd, rs, Operand2::Reg(scratch));
        }
    }

    pub fn try_andi2r(&mut self, rd: ArmReg, rs: ArmReg, val: u32) -> bool {
        if val == 0 {
            // Avoid the ALU, may improve pipeline.
            self.mov(rd, Operand2::from_imm(0));
            return true;
        }
        if let Some((op2, inverse)) = Operand2::try_from_imm_inverse(val) {
            if inverse {
                self.bic(rd, rs, op2);
            } else {
                self.and_(rd, rs, op2);
            }
            return true;
        }

        if self.features.have_armv7 {
            // A single run of low bits extracts in one UBFX.
            let mut seq: i32 = -1;
            for i in 0..32 {
                if (val >> i) & 1 == 0 {
                    if seq == -1 {
                        seq = i;
                    }
                } else if seq != -1 {
                    seq = -2;
                }
            }
            if seq > 0 {
                self.ubfx(rd, rs, 0, seq as u8);
                return true;
            }
        }

        let mut ops = 0u32;
        let mut i = 0u32;
        while i < 32 {
            let bits = val.rotate_right(i) as u8;
            // Any clear low bit needs a BIC covering this byte.
            if bits & 3 != 3 {
                ops += 1;
                i += 8 - 2;
            }
            i += 2;
        }
        if self.features.have_armv7 && ops > MAX_CHUNK_OPS {
            return false;
        }

        let mut first = true;
        let mut i = 0u32;
        while i < 32 {
            let bits = val.rotate_right(i) as u8;
            if bits & 3 != 3 {
                let rotation = if i == 0 { 0 } else { (16 - i / 2) as u8 };
                let op2 = Operand2::Imm {
                    value: !bits,
                    rotation,
                };
                if first {
                    self.bic(rd, rs, op2);
                    first = false;
                } else {
                    self.bic(rd, rd, op2);
                }
                i += 8 - 2;
            }
            i += 2;
        }
        true
    }

    pub fn ori2r(&mut self, rd: ArmReg, rs: ArmReg, val: u32, scratch: ArmReg) {
        if !self.try_ori2r(rd, rs, val) {
            self.movi2r(scratch, val);
            self.orr(rd, rs, Operand2::Reg(scratch));
        }
    }

    pub fn try_ori2r(&mut self, rd: ArmReg, rs: ArmReg, val: u32) -> bool {
        if val == 0 {
            // OR with zero is a plain move.
            if rd != rs {
                self.mov(rd, Operand2::Reg(rs));
            }
            return true;
        }
        if let Some(op2) = Operand2::try_from_imm(val) {
            self.orr(rd, rs, op2);
            return true;
        }

        let mut ops = 0u32;
        let mut i = 0u32;
        while i < 32 {
            let bits = val.rotate_right(i) as u8;
            if bits & 3 != 0 {
                ops += 1;
                i += 8 - 2;
            }
            i += 2;
        }
        // An MVN-able value loads in two ops through a scratch register,
        // so give up early when chunking cannot beat that.
        if Operand2::try_from_imm(!val).is_some() && ops >= MAX_CHUNK_OPS {
            return false;
        }
        if self.features.have_armv7 && ops > MAX_CHUNK_OPS {
            return false;
        }

        let mut first = true;
        let mut i = 0u32;
        while i < 32 {
            let bits = val.rotate_right(i) as u8;
            if bits & 3 != 0 {
                let rotation = if i == 0 { 0 } else { (16 - i / 2) as u8 };
                let op2 = Operand2::Imm {
                    value: bits,
                    rotation,
                };
                if first {
                    self.orr(rd, rs, op2);
                    first = false;
                } else {
                    self.orr(rd, rd, op2);
                }
                i += 8 - 2;
            }
            i += 2;
        }
        true
    }

    pub fn eori2r(&mut self, rd: ArmReg, rs: ArmReg, val: u32, scratch: ArmReg) {
        if !self.try_eori2r(rd, rs, val) {
            self.movi2r(scratch, val);
            self.eor(rd, rs, Operand2::Reg(scratch));
        }
    }

    pub fn try_eori2r(&mut self, rd: ArmReg, rs: ArmReg, val: u32) -> bool {
        if val == 0 {
            if rd != rs {
                self.mov(rd, Operand2::Reg(rs));
            }
            return true;
        }
        if let Some(op2) = Operand2::try_from_imm(val) {
            self.eor(rd, rs, op2);
            return true;
        }
        false
    }

    pub fn cmpi2r(&mut self, rs: ArmReg, val: u32, scratch: ArmReg) {
        if !self.try_cmpi2r(rs, val) {
            self.movi2r(scratch, val);
            self.cmp(rs, Operand2::Reg(scratch));
        }
    }

    pub fn try_cmpi2r(&mut self, rs: ArmReg, val: u32) -> bool {
        if let Some((op2, negated)) = Operand2::try_from_imm_negated(val) {
            if negated {
                self.cmn(rs, op2);
            } else {
                self.cmp(rs, op2);
            }
            return true;
        }
        false
    }

    pub fn tsti2r(&mut self, rs: ArmReg, val: u32, scratch: ArmReg) {
        if !self.try_tsti2r(rs, val) {
            self.movi2r(scratch, val);
            self.tst(rs, Operand2::Reg(scratch));
        }
    }

    pub fn try_tsti2r(&mut self, rs: ArmReg, val: u32) -> bool {
        if let Some(op2) = Operand2::try_from_imm(val) {
            self.tst(rs, op2);
            return true;
        }
        false
    }

    // -- VFP --

    fn vd(s: SReg) -> u32 {
        (s.bits() >> 1) << 12 | (s.bits() & 1) << 22
    }

    fn vn(s: SReg) -> u32 {
        (s.bits() >> 1) << 16 | (s.bits() & 1) << 7
    }

    fn vm(s: SReg) -> u32 {
        (s.bits() >> 1) | (s.bits() & 1) << 5
    }

    /// `VLDR sd, [rn, #offset]` — offset must be a multiple of 4 within
    /// ±1020.
    pub fn vldr(&mut self, sd: SReg, rn: ArmReg, offset: i32) {
        let (up, abs) = if offset >= 0 {
            (1u32, offset as u32)
        } else {
            (0u32, (-offset) as u32)
        };
        assert!(abs < 1024 && abs & 3 == 0, "VLDR offset invalid: {offset}");
        self.write32(
            self.cond
                | 0x0D10_0A00
                | up << 23
                | rn.bits() << 16
                | Self::vd(sd)
                | abs >> 2,
        );
    }

    pub fn vstr(&mut self, sd: SReg, rn: ArmReg, offset: i32) {
        let (up, abs) = if offset >= 0 {
            (1u32, offset as u32)
        } else {
            (0u32, (-offset) as u32)
        };
        assert!(abs < 1024 && abs & 3 == 0, "VSTR offset invalid: {offset}");
        self.write32(
            self.cond
                | 0x0D00_0A00
                | up << 23
                | rn.bits() << 16
                | Self::vd(sd)
                | abs >> 2,
        );
    }

    /// `VLDMIA rn{!}, {first .. first+count-1}`.
    pub fn vldmia(&mut self, rn: ArmReg, writeback: bool, first: SReg, count: u8) {
        assert!(count > 0 && first.0 + count <= 32);
        self.write32(
            self.cond
                | 0x0C90_0A00
                | (writeback as u32) << 21
                | rn.bits() << 16
                | Self::vd(first)
                | count as u32,
        );
    }

    pub fn vstmia(&mut self, rn: ArmReg, writeback: bool, first: SReg, count: u8) {
        assert!(count > 0 && first.0 + count <= 32);
        self.write32(
            self.cond
                | 0x0C80_0A00
                | (writeback as u32) << 21
                | rn.bits() << 16
                | Self::vd(first)
                | count as u32,
        );
    }

    /// `VMOV sd, sm`.
    pub fn vmov(&mut self, sd: SReg, sm: SReg) {
        self.write32(self.cond | 0x0EB0_0A40 | Self::vd(sd) | Self::vm(sm));
    }

    /// Core register to VFP: `VMOV sn, rt`.
    pub fn vmov_sr(&mut self, sn: SReg, rt: ArmReg) {
        self.write32(self.cond | 0x0E00_0A10 | Self::vn(sn) | rt.bits() << 12);
    }

    /// VFP to core register: `VMOV rt, sn`.
    pub fn vmov_rs(&mut self, rt: ArmReg, sn: SReg) {
        self.write32(self.cond | 0x0E10_0A10 | Self::vn(sn) | rt.bits() << 12);
    }

    /// `VMOV.F32 sd, #imm` for VFP-encodable immediates.
    pub fn vmov_imm(&mut self, sd: SReg, val: f32) -> bool {
        assert!(
            self.features.have_vfpv3,
            "VFP immediate moves require VFPv3"
        );
        let Some(imm8) = try_make_float_imm8(val) else {
            return false;
        };
        let imm8 = imm8 as u32;
        self.write32(
            self.cond
                | 0x0EB0_0A00
                | Self::vd(sd)
                | (imm8 >> 4) << 16
                | (imm8 & 0xF),
        );
        true
    }

    pub fn vadd(&mut self, sd: SReg, sn: SReg, sm: SReg) {
        self.write32(
            self.cond | 0x0E30_0A00 | Self::vd(sd) | Self::vn(sn) | Self::vm(sm),
        );
    }

    pub fn vsub(&mut self, sd: SReg, sn: SReg, sm: SReg) {
        self.write32(
            self.cond | 0x0E30_0A40 | Self::vd(sd) | Self::vn(sn) | Self::vm(sm),
        );
    }

    pub fn vmul(&mut self, sd: SReg, sn: SReg, sm: SReg) {
        self.write32(
            self.cond | 0x0E20_0A00 | Self::vd(sd) | Self::vn(sn) | Self::vm(sm),
        );
    }

    pub fn vdiv(&mut self, sd: SReg, sn: SReg, sm: SReg) {
        self.write32(
            self.cond | 0x0E80_0A00 | Self::vd(sd) | Self::vn(sn) | Self::vm(sm),
        );
    }

    pub fn vabs(&mut self, sd: SReg, sm: SReg) {
        self.write32(self.cond | 0x0EB0_0AC0 | Self::vd(sd) | Self::vm(sm));
    }

    pub fn vneg(&mut self, sd: SReg, sm: SReg) {
        self.write32(self.cond | 0x0EB1_0A40 | Self::vd(sd) | Self::vm(sm));
    }

    pub fn vsqrt(&mut self, sd: SReg, sm: SReg) {
        self.write32(self.cond | 0x0EB1_0AC0 | Self::vd(sd) | Self::vm(sm));
    }

    pub fn vcmp(&mut self, sd: SReg, sm: SReg) {
        self.write32(self.cond | 0x0EB4_0A40 | Self::vd(sd) | Self::vm(sm));
    }

    pub fn vcmp_zero(&mut self, sd: SReg) {
        self.write32(self.cond | 0x0EB5_0A40 | Self::vd(sd));
    }

    /// Copy FPSCR flags into APSR: `VMRS APSR_nzcv, FPSCR`.
    pub fn vmrs_apsr(&mut self) {
        self.write32(self.cond | 0x0EF1_FA10);
    }

    /// `VCVT.F32.S32 sd, sm`.
    pub fn vcvt_f32_s32(&mut self, sd: SReg, sm: SReg) {
        self.write32(self.cond | 0x0EB8_0AC0 | Self::vd(sd) | Self::vm(sm));
    }

    /// `VCVT.S32.F32 sd, sm` (round toward zero).
    pub fn vcvt_s32_f32(&mut self, sd: SReg, sm: SReg) {
        self.write32(self.cond | 0x0EBD_0AC0 | Self::vd(sd) | Self::vm(sm));
    }

    /// Per-lane conditional copy on quad registers. The scalar form
    /// (predicated `vmov` under `set_cc`) covers the implemented paths;
    /// no selector currently emits the quad form, and its encoding has
    /// never been validated here.
    pub fn vmovq_cc(&mut self, _qd: super::regs::QReg, _qm: super::regs::QReg) {
        unimplemented!("quad-register conditional move");
    }
}
