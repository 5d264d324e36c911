//! ARM host registers, condition codes, and the fixed register roles the
//! translator reserves.

/// ARM core registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ArmReg {
    R0 = 0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    R10,
    R11,
    R12,
    Sp,
    Lr,
    Pc,
}

impl ArmReg {
    #[inline]
    pub fn bits(self) -> u32 {
        self as u32
    }

    pub fn from_index(i: usize) -> ArmReg {
        assert!(i < 16, "ARM register index out of range: {i}");
        // Safe: the enum covers 0..16 contiguously.
        unsafe { core::mem::transmute(i as u8) }
    }
}

/// VFP single-precision registers S0..S31.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SReg(pub u8);

impl SReg {
    #[inline]
    pub fn bits(self) -> u32 {
        debug_assert!(self.0 < 32);
        self.0 as u32
    }
}

/// NEON quad registers Q0..Q15.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QReg(pub u8);

/// Condition codes, in encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CondCode {
    Eq = 0,
    Ne,
    Cs,
    Cc,
    Mi,
    Pl,
    Vs,
    Vc,
    Hi,
    Ls,
    Ge,
    Lt,
    Gt,
    Le,
    Al,
}

impl CondCode {
    /// The condition field as placed in bits 28..32 of an instruction.
    #[inline]
    pub fn bits(self) -> u32 {
        (self as u32) << 28
    }

    pub fn invert(self) -> CondCode {
        match self {
            CondCode::Eq => CondCode::Ne,
            CondCode::Ne => CondCode::Eq,
            CondCode::Cs => CondCode::Cc,
            CondCode::Cc => CondCode::Cs,
            CondCode::Mi => CondCode::Pl,
            CondCode::Pl => CondCode::Mi,
            CondCode::Vs => CondCode::Vc,
            CondCode::Vc => CondCode::Vs,
            CondCode::Hi => CondCode::Ls,
            CondCode::Ls => CondCode::Hi,
            CondCode::Ge => CondCode::Lt,
            CondCode::Lt => CondCode::Ge,
            CondCode::Gt => CondCode::Le,
            CondCode::Le => CondCode::Gt,
            CondCode::Al => panic!("AL has no inverse"),
        }
    }
}

/// Barrel-shifter shift kinds, in encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShiftType {
    Lsl = 0,
    Lsr,
    Asr,
    Ror,
}

// -- Fixed register roles --

/// Guest context base. Generated code addresses all guest state through
/// this register.
pub const CTX_REG: ArmReg = ArmReg::R10;
/// Guest RAM base, used by pointer-mapped guest registers.
pub const MEMBASE_REG: ArmReg = ArmReg::R11;
/// Selector-owned scratch, never allocated to a guest register.
pub const SCRATCH_REG: ArmReg = ArmReg::R0;
/// Cycle downcount lives in a register across the block.
pub const DOWNCOUNT_REG: ArmReg = ArmReg::R7;

/// Host registers the integer cache may hand out, in allocation order.
pub const GPR_ALLOCATION_ORDER: [ArmReg; 7] = [
    ArmReg::R1,
    ArmReg::R2,
    ArmReg::R3,
    ArmReg::R4,
    ArmReg::R5,
    ArmReg::R6,
    ArmReg::R12,
];

/// VFP registers the float cache may hand out. S0..S3 stay free as
/// selector scratch.
pub const FPR_ALLOCATION_ORDER_START: u8 = 4;
pub const FPR_ALLOCATION_ORDER_END: u8 = 32;
