//! Guest CPU context block and the byte offsets generated code uses to
//! address it through the reserved context base register.

use crate::mips::MipsReg;
use core::mem::offset_of;

/// Number of virtual FPU registers visible to the float register cache:
/// 32 scalar FPRs, 128 vector registers, 16 compiler temporaries.
pub const NUM_FPU_VIRTUAL: usize = 32 + 128 + 16;

/// First compiler-temporary virtual FPU register index.
pub const TEMP0: u16 = 160;

/// Guest CPU state addressed by generated code. Layout is load-bearing:
/// every offset function below feeds directly into emitted load/store
/// displacements.
#[repr(C)]
pub struct MipsContext {
    pub r: [u32; 32],
    pub hi: u32,
    pub lo: u32,
    pub fpcond: u32,
    pub pc: u32,
    pub downcount: i32,
    pub f: [f32; 32],
    pub v: [f32; 128],
    pub vfpu_ctrl: [u32; 16],
    /// Backing store for the FPU cache's compiler temporaries.
    pub temps: [f32; 16],
}

impl MipsContext {
    pub fn new() -> MipsContext {
        MipsContext {
            r: [0; 32],
            hi: 0,
            lo: 0,
            fpcond: 0,
            pc: 0,
            downcount: 0,
            f: [0.0; 32],
            v: [0.0; 128],
            vfpu_ctrl: [0; 16],
            temps: [0.0; 16],
        }
    }
}

impl Default for MipsContext {
    fn default() -> Self {
        MipsContext::new()
    }
}

/// Byte offset of an integer guest register's backing slot.
pub fn gpr_offset(r: MipsReg) -> i32 {
    match r {
        MipsReg::Hi => offset_of!(MipsContext, hi) as i32,
        MipsReg::Lo => offset_of!(MipsContext, lo) as i32,
        MipsReg::FpCond => offset_of!(MipsContext, fpcond) as i32,
        gpr => (offset_of!(MipsContext, r) + 4 * gpr.index()) as i32,
    }
}

pub fn pc_offset() -> i32 {
    offset_of!(MipsContext, pc) as i32
}

pub fn downcount_offset() -> i32 {
    offset_of!(MipsContext, downcount) as i32
}

pub fn fpr_offset(f: u8) -> i32 {
    assert!(f < 32, "FPR index out of range: {f}");
    (offset_of!(MipsContext, f) + 4 * f as usize) as i32
}

/// Staggered architectural-index to storage-index mapping for the 128
/// vector registers. The backing store keeps each 4x4 matrix column
/// consecutive in memory while the architectural index is row-major, so
/// column operations (the common case) hit contiguous slots.
pub fn voffset(i: u8) -> u8 {
    assert!(i < 128, "vector register index out of range: {i}");
    let mtx = (i >> 2) & 7;
    let col = i & 3;
    let row = (i >> 5) & 3;
    mtx * 16 + col * 4 + row
}

/// Byte offset of a vector register's backing slot (architectural index).
pub fn vec_offset(i: u8) -> i32 {
    (offset_of!(MipsContext, v) + 4 * voffset(i) as usize) as i32
}

/// Byte offset for any virtual FPU register index: scalar FPRs first,
/// then the staggered vector file, then the temp bank.
pub fn fpu_virtual_offset(v: u16) -> i32 {
    assert!(
        (v as usize) < NUM_FPU_VIRTUAL,
        "virtual FPU register out of range: {v}"
    );
    if v < 32 {
        fpr_offset(v as u8)
    } else if v < TEMP0 {
        vec_offset((v - 32) as u8)
    } else {
        (offset_of!(MipsContext, temps) + 4 * (v - TEMP0) as usize) as i32
    }
}
