//! Static register-usage analysis over a block's instruction window.
//!
//! The register allocator asks two questions when it needs to evict: is
//! this guest register read again soon (if not, no one will miss the
//! cached copy), and is it overwritten before any read (if so, even the
//! memory copy is dead and the store can be skipped). Both are answered
//! by a bounded forward scan that gives up at control flow it cannot see
//! through.

use crate::mips::{self, MipsOpcode, MipsReg};

/// How far ahead the eviction policy looks, in guest instructions.
pub const UNUSED_LOOKAHEAD_OPS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterUsage {
    Clobbered,
    Input,
    Unknown,
}

/// Scan forward from `start` (inclusive) for up to `lookahead`
/// instructions and classify the next access to `reg`.
///
/// A branch or jump limits the scan to its delay slot. In the delay slot
/// a clobber is only trusted when the scan did not start at the branch
/// itself: delay slots are compiled before their branch, so starting at
/// the branch means the slot may already have been emitted. Likely
/// branches never let the slot clobber (the slot may be skipped), and
/// conditional moves never count as a full clobber.
pub fn determine_usage(
    reg: MipsReg,
    instrs: &[MipsOpcode],
    start: usize,
    lookahead: usize,
) -> RegisterUsage {
    if !reg.is_gpr() {
        return RegisterUsage::Unknown;
    }

    let mut end = (start + lookahead).min(instrs.len());
    let mut can_clobber = true;
    let mut i = start;
    while i < end {
        let op = instrs[i];
        let info = mips::mips_get_info(op);

        if (info & mips::IN_RS) != 0 && op.rs() == reg {
            return RegisterUsage::Input;
        }
        if (info & mips::IN_RT) != 0 && op.rt() == reg {
            return RegisterUsage::Input;
        }

        let mut clobbered = false;
        if (info & mips::OUT_RT) != 0 && op.rt() == reg {
            clobbered = true;
        }
        if (info & mips::OUT_RD) != 0 && op.rd() == reg {
            clobbered = true;
        }
        if (info & mips::OUT_RA) != 0 && reg == MipsReg::Ra {
            clobbered = true;
        }
        if clobbered {
            if !can_clobber || (info & mips::IS_CONDMOVE) != 0 {
                return RegisterUsage::Unknown;
            }
            return RegisterUsage::Clobbered;
        }

        if (info & (mips::IS_CONDBRANCH | mips::IS_JUMP)) != 0 {
            // Only the delay slot remains visible past a branch.
            end = (i + 2).min(instrs.len());
            can_clobber = (info & mips::LIKELY) == 0 && start != i;
        }
        i += 1;
    }
    RegisterUsage::Unknown
}

pub fn is_register_used(
    reg: MipsReg,
    instrs: &[MipsOpcode],
    start: usize,
    lookahead: usize,
) -> bool {
    determine_usage(reg, instrs, start, lookahead) == RegisterUsage::Input
}

pub fn is_register_clobbered(
    reg: MipsReg,
    instrs: &[MipsOpcode],
    start: usize,
    lookahead: usize,
) -> bool {
    determine_usage(reg, instrs, start, lookahead) == RegisterUsage::Clobbered
}
