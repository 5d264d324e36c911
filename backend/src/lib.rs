//! Host-side backend of the MIPS dynamic translator: the executable code
//! buffer, the ARM and x86-64 instruction emitters, the register caches
//! that map the guest register file onto host registers, and the
//! instruction-selection layer that drives them.
//!
//! Everything here is single-threaded and synchronous. One emitter, one
//! register cache, and one code buffer belong to one compiler instance;
//! none of it may be shared across threads.

pub mod arm;
pub mod code_buffer;
pub mod isel;
pub mod x86_64;

pub use code_buffer::CodeBuffer;
