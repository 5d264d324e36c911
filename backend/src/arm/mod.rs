//! ARM 32-bit (ARMv7) code generation: registers, operand encoding, the
//! instruction emitter, and the integer and float register caches.

pub mod emitter;
pub mod operand;
pub mod regcache;
pub mod regcache_fpu;
pub mod regs;

pub use emitter::{ArmEmitter, FixupBranch};
pub use operand::Operand2;
pub use regcache::GprCache;
pub use regcache_fpu::FpuCache;
