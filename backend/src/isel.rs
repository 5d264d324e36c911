//! Instruction selector.
//!
//! Walks one guest opcode at a time, asks the register caches for host
//! registers holding the guest operands, and emits host instructions
//! that reproduce the guest semantics. Deliberately a thin layer: the
//! hard work lives in the emitter and the caches, and anything outside
//! the covered subset routes to the interpreter fallback.

use std::fmt;

use jit_core::ctx::{gpr_offset, pc_offset};
use jit_core::cpu::CpuFeatures;
use jit_core::mips::{mips_get_info, MipsOpcode, MipsReg, DELAYSLOT};

use crate::arm::emitter::ArmEmitter;
use crate::arm::operand::Operand2;
use crate::arm::regcache::{GprCache, MAP_NOINIT};
use crate::arm::regcache_fpu::FpuCache;
use crate::arm::regs::{CondCode, CTX_REG, DOWNCOUNT_REG, MEMBASE_REG, SCRATCH_REG};
use crate::arm::regs::ArmReg;

/// Hard cap on guest instructions per translation block.
pub const MAX_BLOCK_INSTRS: usize = 512;

/// Worst-case host bytes one guest instruction can expand to, with
/// slack for the exit stanzas and the literal pool.
const SPACE_PER_INSTR: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileError {
    /// Not enough room left in the code buffer; the driver clears the
    /// translation cache and retries.
    BufferFull,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::BufferFull => write!(f, "code buffer full"),
        }
    }
}

impl std::error::Error for CompileError {}

/// Per-block compile state.
pub struct JitState {
    pub compiler_pc: u32,
    pub block_start_pc: u32,
    /// Guest cycles accumulated since block entry, settled against the
    /// downcount register at every exit.
    pub down_count_amount: u32,
    pub in_delay_slot: bool,
    pub num_instructions: usize,
    pub compiling: bool,
}

impl JitState {
    fn start(&mut self, pc: u32) {
        self.compiler_pc = pc;
        self.block_start_pc = pc;
        self.down_count_amount = 0;
        self.in_delay_slot = false;
        self.num_instructions = 0;
        self.compiling = true;
    }
}

/// Bitwise ops with an immediate form, dispatched by value instead of
/// through member pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmLogicOp {
    And,
    Or,
    Xor,
}

impl ImmLogicOp {
    fn fold(self, a: u32, b: u32) -> u32 {
        match self {
            ImmLogicOp::And => a & b,
            ImmLogicOp::Or => a | b,
            ImmLogicOp::Xor => a ^ b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithRROp {
    Addu,
    Subu,
    And,
    Or,
    Xor,
}

impl ArithRROp {
    fn fold(self, a: u32, b: u32) -> u32 {
        match self {
            ArithRROp::Addu => a.wrapping_add(b),
            ArithRROp::Subu => a.wrapping_sub(b),
            ArithRROp::And => a & b,
            ArithRROp::Or => a | b,
            ArithRROp::Xor => a ^ b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadKind {
    Word,
    ByteSigned,
    ByteUnsigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreKind {
    Word,
    Byte,
}

pub struct MipsCompiler {
    pub gpr: GprCache,
    pub fpu: FpuCache,
    pub js: JitState,
    features: CpuFeatures,
    /// Buffer offset of the dispatcher loop, if one was emitted; block
    /// exits branch there, otherwise return to the caller.
    dispatcher: Option<usize>,
    /// Host address of the single-instruction interpreter fallback
    /// (`extern "C" fn(u32 opcode)` convention, context reachable
    /// through the reserved registers).
    fallback_handler: Option<usize>,
}

impl MipsCompiler {
    pub fn new(features: CpuFeatures) -> MipsCompiler {
        MipsCompiler {
            gpr: GprCache::new(),
            fpu: FpuCache::new(),
            js: JitState {
                compiler_pc: 0,
                block_start_pc: 0,
                down_count_amount: 0,
                in_delay_slot: false,
                num_instructions: 0,
                compiling: true,
            },
            features,
            dispatcher: None,
            fallback_handler: None,
        }
    }

    pub fn set_dispatcher(&mut self, offset: usize) {
        self.dispatcher = Some(offset);
    }

    pub fn set_fallback_handler(&mut self, addr: usize) {
        self.fallback_handler = Some(addr);
    }

    /// Compile one translation block. Returns the buffer offset of the
    /// block entry point.
    pub fn compile_block(
        &mut self,
        e: &mut ArmEmitter,
        start_pc: u32,
        instrs: &[MipsOpcode],
    ) -> Result<usize, CompileError> {
        self.js.start(start_pc);
        self.gpr.start(instrs);
        self.fpu.start();

        let entry = e.offset();
        let mut i = 0;
        while self.js.compiling && i < instrs.len() {
            if e.buf().remaining() < SPACE_PER_INSTR {
                return Err(CompileError::BufferFull);
            }
            self.js.compiler_pc = start_pc.wrapping_add(4 * i as u32);
            self.gpr.set_compile_pos(i);
            let consumed = self.compile_one(e, instrs, i);
            self.js.num_instructions += consumed;
            i += consumed;

            if self.js.compiling && self.js.num_instructions >= MAX_BLOCK_INSTRS {
                break;
            }
        }

        if self.js.compiling {
            // Fell off the end of the window; exit to the next pc.
            let next = start_pc.wrapping_add(4 * i as u32);
            self.write_exit(e, next);
        }
        Ok(entry)
    }

    /// Compile the instruction at `i`; returns how many guest
    /// instructions were consumed (2 when a delay slot was folded in).
    fn compile_one(&mut self, e: &mut ArmEmitter, instrs: &[MipsOpcode], i: usize) -> usize {
        // Accrue cycles before compiling, so exits written inside a
        // branch charge the branch (and, via the nested call, its delay
        // slot) too.
        self.js.down_count_amount += 1;
        let op = instrs[i];
        if !self.js.in_delay_slot
            && mips_get_info(op) & DELAYSLOT != 0
            && i + 1 >= instrs.len()
        {
            // The window ends on a branch whose delay slot is out of
            // reach. Compiling the branch without its slot would change
            // the guest's semantics, so close the block here and let the
            // next one start at the branch.
            self.js.down_count_amount -= 1;
            self.write_exit(e, self.js.compiler_pc);
            self.js.compiling = false;
            return 1;
        }
        match op.op() {
            0 => self.compile_special(e, instrs, i),
            2 => {
                let target =
                    (self.js.compiler_pc & 0xF000_0000) | (op.target26() << 2);
                self.compile_delay_slot(e, instrs, i);
                self.gpr.flush_all(e);
                self.fpu.flush_all(e);
                self.write_exit(e, target);
                self.js.compiling = false;
                2
            }
            4 => self.comp_branch_cmp(e, instrs, i, CondCode::Eq),
            5 => self.comp_branch_cmp(e, instrs, i, CondCode::Ne),
            // addi's overflow trap is not modeled; both behave as addiu.
            8 | 9 => {
                self.comp_addiu(e, op);
                1
            }
            12 => {
                self.comp_imm_logic(e, op, ImmLogicOp::And);
                1
            }
            13 => {
                self.comp_imm_logic(e, op, ImmLogicOp::Or);
                1
            }
            14 => {
                self.comp_imm_logic(e, op, ImmLogicOp::Xor);
                1
            }
            15 => {
                let rt = op.rt();
                if rt != MipsReg::Zero {
                    self.gpr.set_imm(rt, (op.imm16() as u32) << 16);
                }
                1
            }
            32 => {
                self.comp_load(e, op, LoadKind::ByteSigned);
                1
            }
            35 => {
                self.comp_load(e, op, LoadKind::Word);
                1
            }
            36 => {
                self.comp_load(e, op, LoadKind::ByteUnsigned);
                1
            }
            40 => {
                self.comp_store(e, op, StoreKind::Byte);
                1
            }
            43 => {
                self.comp_store(e, op, StoreKind::Word);
                1
            }
            _ => {
                self.fallback_interpret(e, op);
                1
            }
        }
    }

    fn compile_special(
        &mut self,
        e: &mut ArmEmitter,
        instrs: &[MipsOpcode],
        i: usize,
    ) -> usize {
        let op = instrs[i];
        match op.funct() {
            0 | 2 | 3 => {
                self.comp_shift_imm(e, op);
                1
            }
            8 => self.comp_jr(e, instrs, i),
            32 | 33 => {
                self.comp_arith(e, op, ArithRROp::Addu);
                1
            }
            34 | 35 => {
                self.comp_arith(e, op, ArithRROp::Subu);
                1
            }
            36 => {
                self.comp_arith(e, op, ArithRROp::And);
                1
            }
            37 => {
                self.comp_arith(e, op, ArithRROp::Or);
                1
            }
            38 => {
                self.comp_arith(e, op, ArithRROp::Xor);
                1
            }
            _ => {
                self.fallback_interpret(e, op);
                1
            }
        }
    }

    fn compile_delay_slot(&mut self, e: &mut ArmEmitter, instrs: &[MipsOpcode], i: usize) {
        if i + 1 >= instrs.len() {
            return;
        }
        self.js.in_delay_slot = true;
        self.gpr.set_compile_pos(i + 1);
        self.compile_one(e, instrs, i + 1);
        self.js.in_delay_slot = false;
        self.gpr.set_compile_pos(i);
    }

    /// rt = rs OP zero-extended imm16, folding when rs's value is known.
    fn comp_imm_logic(&mut self, e: &mut ArmEmitter, op: MipsOpcode, logic: ImmLogicOp) {
        let rs = op.rs();
        let rt = op.rt();
        let imm = op.imm16() as u32;
        if rt == MipsReg::Zero {
            return;
        }
        if self.gpr.is_imm(rs) {
            let folded = logic.fold(self.gpr.get_imm(rs), imm);
            self.gpr.set_imm(rt, folded);
            return;
        }
        self.gpr.map_dirty_in(e, rt, rs, true);
        let (rd_h, rs_h) = (self.gpr.r(rt), self.gpr.r(rs));
        match logic {
            ImmLogicOp::And => e.andi2r(rd_h, rs_h, imm, SCRATCH_REG),
            ImmLogicOp::Or => e.ori2r(rd_h, rs_h, imm, SCRATCH_REG),
            ImmLogicOp::Xor => e.eori2r(rd_h, rs_h, imm, SCRATCH_REG),
        }
    }

    fn comp_addiu(&mut self, e: &mut ArmEmitter, op: MipsOpcode) {
        let rs = op.rs();
        let rt = op.rt();
        let imm = op.simm16();
        if rt == MipsReg::Zero {
            return;
        }
        if self.gpr.is_imm(rs) {
            self.gpr
                .set_imm(rt, self.gpr.get_imm(rs).wrapping_add(imm as u32));
            return;
        }
        self.gpr.map_dirty_in(e, rt, rs, true);
        e.addi2r(self.gpr.r(rt), self.gpr.r(rs), imm as u32, SCRATCH_REG);
    }

    fn comp_arith(&mut self, e: &mut ArmEmitter, op: MipsOpcode, arith: ArithRROp) {
        let rs = op.rs();
        let rt = op.rt();
        let rd = op.rd();
        if rd == MipsReg::Zero {
            return;
        }
        if self.gpr.is_imm(rs) && self.gpr.is_imm(rt) {
            let folded = arith.fold(self.gpr.get_imm(rs), self.gpr.get_imm(rt));
            self.gpr.set_imm(rd, folded);
            return;
        }
        self.gpr.map_dirty_in_in(e, rd, rs, rt, true);
        let (d, s, t) = (self.gpr.r(rd), self.gpr.r(rs), self.gpr.r(rt));
        match arith {
            ArithRROp::Addu => e.add(d, s, Operand2::Reg(t)),
            ArithRROp::Subu => e.sub(d, s, Operand2::Reg(t)),
            ArithRROp::And => e.and_(d, s, Operand2::Reg(t)),
            ArithRROp::Or => e.orr(d, s, Operand2::Reg(t)),
            ArithRROp::Xor => e.eor(d, s, Operand2::Reg(t)),
        }
    }

    fn comp_shift_imm(&mut self, e: &mut ArmEmitter, op: MipsOpcode) {
        // The canonical nop is sll zero, zero, 0.
        if op.0 == 0 {
            return;
        }
        let rt = op.rt();
        let rd = op.rd();
        let sa = op.sa() as u8;
        if rd == MipsReg::Zero {
            return;
        }
        if self.gpr.is_imm(rt) {
            let v = self.gpr.get_imm(rt);
            let folded = match op.funct() {
                0 => v << sa,
                2 => v >> sa,
                _ => ((v as i32) >> sa) as u32,
            };
            self.gpr.set_imm(rd, folded);
            return;
        }
        self.gpr.map_dirty_in(e, rd, rt, true);
        let (d, t) = (self.gpr.r(rd), self.gpr.r(rt));
        match op.funct() {
            0 => e.lsl(d, t, sa),
            2 => e.lsr(d, t, sa),
            _ => e.asr(d, t, sa),
        }
    }

    fn comp_load(&mut self, e: &mut ArmEmitter, op: MipsOpcode, kind: LoadKind) {
        let rs = op.rs();
        let rt = op.rt();
        let offset = op.simm16();
        if rt == MipsReg::Zero {
            // Architecturally a load to the zero register still accesses
            // memory, but this core has no side-effecting loads to model.
            return;
        }
        self.gpr.spill_lock(&[rs, rt]);
        let addr = self.gpr.map_reg_as_pointer(e, rs);
        let dest = self.gpr.map_reg(e, rt, MAP_NOINIT);
        let range = match kind {
            LoadKind::Word => 4095,
            _ => 255,
        };
        let (base, off) = if (-range..=range).contains(&offset) {
            (addr, offset)
        } else {
            e.addi2r(SCRATCH_REG, addr, offset as u32, SCRATCH_REG);
            (SCRATCH_REG, 0)
        };
        match kind {
            LoadKind::Word => e.ldr(dest, base, off),
            LoadKind::ByteSigned => e.ldrsb(dest, base, off),
            LoadKind::ByteUnsigned => e.ldrb(dest, base, off),
        }
        self.gpr.release_spill_locks();
    }

    fn comp_store(&mut self, e: &mut ArmEmitter, op: MipsOpcode, kind: StoreKind) {
        let rs = op.rs();
        let rt = op.rt();
        let offset = op.simm16();
        self.gpr.spill_lock(&[rs, rt]);
        let (addr, src) = if rs == rt {
            // Base and source are the same guest register; turning its
            // host register into a pointer would clobber the value being
            // stored. Build the host address in the scratch register and
            // keep the value mapping intact.
            let src = self.gpr.map_reg(e, rs, 0);
            e.bic(
                SCRATCH_REG,
                src,
                Operand2::Imm {
                    value: 0xC0,
                    rotation: 4,
                },
            );
            e.add(SCRATCH_REG, MEMBASE_REG, Operand2::Reg(SCRATCH_REG));
            (SCRATCH_REG, src)
        } else {
            let addr = self.gpr.map_reg_as_pointer(e, rs);
            let src = self.gpr.map_reg(e, rt, 0);
            (addr, src)
        };
        let range = match kind {
            StoreKind::Word => 4095,
            StoreKind::Byte => 4095,
        };
        let (base, off) = if (-range..=range).contains(&offset) {
            (addr, offset)
        } else {
            e.addi2r(SCRATCH_REG, addr, offset as u32, SCRATCH_REG);
            (SCRATCH_REG, 0)
        };
        match kind {
            StoreKind::Word => e.str(src, base, off),
            StoreKind::Byte => e.strb(src, base, off),
        }
        self.gpr.release_spill_locks();
    }

    fn comp_branch_cmp(
        &mut self,
        e: &mut ArmEmitter,
        instrs: &[MipsOpcode],
        i: usize,
        cond: CondCode,
    ) -> usize {
        let op = instrs[i];
        let rs = op.rs();
        let rt = op.rt();
        let branch_pc = self.js.compiler_pc;
        let target = branch_pc.wrapping_add(4).wrapping_add((op.simm16() << 2) as u32);

        // The slot executes regardless of the outcome, so compile it
        // before the compare.
        self.compile_delay_slot(e, instrs, i);

        self.gpr.map_in_in(e, rs, rt);
        e.cmp(self.gpr.r(rs), Operand2::Reg(self.gpr.r(rt)));
        // Flushing emits no flag-setting instructions, so the compare
        // survives to the conditional branch.
        self.gpr.flush_all(e);
        self.fpu.flush_all(e);

        let taken = e.b_cc_fixup(cond);
        self.write_exit(e, branch_pc.wrapping_add(8));
        e.set_jump_target(taken);
        self.write_exit(e, target);

        self.js.compiling = false;
        2
    }

    fn comp_jr(&mut self, e: &mut ArmEmitter, instrs: &[MipsOpcode], i: usize) -> usize {
        let rs = instrs[i].rs();
        self.compile_delay_slot(e, instrs, i);
        self.gpr.flush_all(e);
        self.fpu.flush_all(e);
        // Everything is in memory now; fetch the target directly so the
        // flush machinery cannot touch the scratch register afterwards.
        e.ldr(SCRATCH_REG, CTX_REG, gpr_offset(rs));
        e.str(SCRATCH_REG, CTX_REG, pc_offset());
        self.write_downcount(e);
        self.write_exit_jump(e);
        e.flush_lit_pool();
        self.js.compiling = false;
        2
    }

    /// Interpreter escape hatch: flush everything, publish the pc, and
    /// call out with the raw opcode word. Without a handler the block
    /// simply ends here and the driver resumes interpretation.
    fn fallback_interpret(&mut self, e: &mut ArmEmitter, op: MipsOpcode) {
        self.gpr.flush_all(e);
        self.fpu.flush_all(e);
        match self.fallback_handler {
            Some(addr) => {
                e.movi2r(SCRATCH_REG, self.js.compiler_pc);
                e.str(SCRATCH_REG, CTX_REG, pc_offset());
                e.movi2r(ArmReg::R0, op.0);
                e.quick_call(addr, ArmReg::R1);
            }
            None => {
                self.write_exit(e, self.js.compiler_pc);
                self.js.compiling = false;
            }
        }
    }

    fn write_downcount(&mut self, e: &mut ArmEmitter) {
        let cycles = self.js.down_count_amount;
        if cycles != 0 {
            e.subi2r(DOWNCOUNT_REG, DOWNCOUNT_REG, cycles, SCRATCH_REG);
        }
    }

    fn write_exit_jump(&mut self, e: &mut ArmEmitter) {
        match self.dispatcher {
            Some(offset) => e.b_offset(offset),
            None => e.bx(ArmReg::Lr),
        }
    }

    /// Standard block exit: flush, publish the target pc, settle the
    /// downcount, jump out, and dump the literal pool behind the exit.
    fn write_exit(&mut self, e: &mut ArmEmitter, pc: u32) {
        self.gpr.flush_all(e);
        self.fpu.flush_all(e);
        e.movi2r(SCRATCH_REG, pc);
        e.str(SCRATCH_REG, CTX_REG, pc_offset());
        self.write_downcount(e);
        self.write_exit_jump(e);
        e.flush_lit_pool();
    }

    pub fn features(&self) -> CpuFeatures {
        self.features
    }
}
