pub mod emitter;
pub mod regs;

pub use emitter::{ArithOp, FixupJump, OpArg, ShiftOp, X64Emitter, X86Cond};
pub use regs::{Reg, Scale, Xmm};
