//! Guest MIPS register file and instruction-usage info.
//!
//! The info bits describe which guest registers an instruction reads and
//! writes, plus the control-flow properties (branch, delay slot, likely)
//! the usage analysis needs to know when a forward scan becomes unsafe.

/// Guest MIPS general-purpose registers, plus the multiply/divide result
/// registers and the FPU condition flag, all addressable by the register
/// cache through one index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum MipsReg {
    Zero = 0,
    At,
    V0,
    V1,
    A0,
    A1,
    A2,
    A3,
    T0,
    T1,
    T2,
    T3,
    T4,
    T5,
    T6,
    T7,
    S0,
    S1,
    S2,
    S3,
    S4,
    S5,
    S6,
    S7,
    T8,
    T9,
    K0,
    K1,
    Gp,
    Sp,
    Fp,
    Ra,
    Hi = 32,
    Lo = 33,
    FpCond = 34,
}

/// Total mappable guest registers (32 GPRs + HI + LO + FPCOND).
pub const NUM_MIPS_REGS: usize = 35;

impl MipsReg {
    pub fn index(self) -> usize {
        self as usize
    }

    /// The 32 architectural GPRs; `Hi`/`Lo`/`FpCond` are not field-encoded.
    pub fn from_field(bits: u32) -> MipsReg {
        assert!(bits < 32, "GPR field out of range: {bits}");
        // Safe: the enum covers all values 0..32 contiguously.
        unsafe { core::mem::transmute(bits as u8) }
    }

    pub fn is_gpr(self) -> bool {
        (self as u8) < 32
    }
}

/// One raw guest instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipsOpcode(pub u32);

impl MipsOpcode {
    pub fn op(self) -> u32 {
        self.0 >> 26
    }

    pub fn funct(self) -> u32 {
        self.0 & 0x3F
    }

    pub fn rs(self) -> MipsReg {
        MipsReg::from_field((self.0 >> 21) & 0x1F)
    }

    pub fn rt(self) -> MipsReg {
        MipsReg::from_field((self.0 >> 16) & 0x1F)
    }

    pub fn rd(self) -> MipsReg {
        MipsReg::from_field((self.0 >> 11) & 0x1F)
    }

    pub fn sa(self) -> u32 {
        (self.0 >> 6) & 0x1F
    }

    pub fn imm16(self) -> u16 {
        self.0 as u16
    }

    pub fn simm16(self) -> i32 {
        self.0 as u16 as i16 as i32
    }

    pub fn target26(self) -> u32 {
        self.0 & 0x03FF_FFFF
    }
}

pub const IN_RS: u32 = 1 << 0;
pub const IN_RT: u32 = 1 << 1;
pub const OUT_RT: u32 = 1 << 2;
pub const OUT_RD: u32 = 1 << 3;
pub const OUT_RA: u32 = 1 << 4;
pub const IS_CONDBRANCH: u32 = 1 << 5;
pub const IS_JUMP: u32 = 1 << 6;
pub const LIKELY: u32 = 1 << 7;
pub const IS_CONDMOVE: u32 = 1 << 8;
pub const DELAYSLOT: u32 = 1 << 9;

/// Register-usage and control-flow info for one instruction.
///
/// Unknown encodings decode to "reads rs and rt, clobbers nothing", which
/// keeps the usage analysis conservative: an unrecognized instruction can
/// mark a register live but never dead.
pub fn mips_get_info(op: MipsOpcode) -> u32 {
    match op.op() {
        0 => special_info(op),
        1 => regimm_info(op),
        // j / jal
        2 => IS_JUMP | DELAYSLOT,
        3 => IS_JUMP | DELAYSLOT | OUT_RA,
        // beq / bne / blez / bgtz
        4 | 5 => IN_RS | IN_RT | IS_CONDBRANCH | DELAYSLOT,
        6 | 7 => IN_RS | IS_CONDBRANCH | DELAYSLOT,
        // addi / addiu / slti / sltiu / andi / ori / xori
        8..=14 => IN_RS | OUT_RT,
        // lui
        15 => OUT_RT,
        // beql / bnel / blezl / bgtzl
        20 | 21 => IN_RS | IN_RT | IS_CONDBRANCH | DELAYSLOT | LIKELY,
        22 | 23 => IN_RS | IS_CONDBRANCH | DELAYSLOT | LIKELY,
        // lb / lh / lw / lbu / lhu
        32 | 33 | 35 | 36 | 37 => IN_RS | OUT_RT,
        // lwl / lwr merge into the existing rt value
        34 | 38 => IN_RS | IN_RT | OUT_RT,
        // sb / sh / swl / sw / swr
        40..=43 | 46 => IN_RS | IN_RT,
        _ => IN_RS | IN_RT,
    }
}

fn special_info(op: MipsOpcode) -> u32 {
    match op.funct() {
        // sll / srl / sra
        0 | 2 | 3 => IN_RT | OUT_RD,
        // sllv / srlv / srav
        4 | 6 | 7 => IN_RS | IN_RT | OUT_RD,
        // jr
        8 => IN_RS | IS_JUMP | DELAYSLOT,
        // jalr
        9 => IN_RS | OUT_RD | IS_JUMP | DELAYSLOT,
        // movz / movn
        10 | 11 => IN_RS | IN_RT | OUT_RD | IS_CONDMOVE,
        // mfhi / mflo
        16 | 18 => OUT_RD,
        // mthi / mtlo
        17 | 19 => IN_RS,
        // mult / multu / div / divu
        24..=27 => IN_RS | IN_RT,
        // addu / add / sub / subu / and / or / xor / nor
        32..=39 => IN_RS | IN_RT | OUT_RD,
        // slt / sltu
        42 | 43 => IN_RS | IN_RT | OUT_RD,
        _ => IN_RS | IN_RT,
    }
}

fn regimm_info(op: MipsOpcode) -> u32 {
    let rt_field = (op.0 >> 16) & 0x1F;
    match rt_field {
        // bltz / bgez
        0 | 1 => IN_RS | IS_CONDBRANCH | DELAYSLOT,
        // bltzl / bgezl
        2 | 3 => IN_RS | IS_CONDBRANCH | DELAYSLOT | LIKELY,
        // bltzal / bgezal
        16 | 17 => IN_RS | IS_CONDBRANCH | DELAYSLOT | OUT_RA,
        // bltzall / bgezall
        18 | 19 => IN_RS | IS_CONDBRANCH | DELAYSLOT | OUT_RA | LIKELY,
        _ => IN_RS,
    }
}
