//! Guest-side model for the MIPS dynamic translator: register file and
//! context layout, per-instruction register-usage info, the static usage
//! analysis the register allocator's eviction policy relies on, and the
//! host CPU capability bag.

pub mod analysis;
pub mod cpu;
pub mod ctx;
pub mod mips;

pub use cpu::CpuFeatures;
pub use ctx::MipsContext;
pub use mips::{MipsOpcode, MipsReg};
