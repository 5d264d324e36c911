//! Float register cache.
//!
//! Maps a flat virtual register file (32 scalar FPRs, 128 vector
//! registers in staggered storage order, 16 compiler temporaries) onto
//! the VFP S registers. Unlike the integer cache there is no immediate
//! tracking; a virtual register is either in memory or in an S register.

use jit_core::ctx::{fpu_virtual_offset, vec_offset, NUM_FPU_VIRTUAL, TEMP0};

use super::emitter::ArmEmitter;
use super::operand::Operand2;
use super::regcache::{MAP_DIRTY, MAP_NOINIT};
use super::regs::{
    SReg, CTX_REG, FPR_ALLOCATION_ORDER_END, FPR_ALLOCATION_ORDER_START,
    SCRATCH_REG,
};

/// Number of compiler-temporary virtual registers past `TEMP0`.
pub const NUM_TEMPS: u16 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FpuLoc {
    Mem,
    Armreg,
}

#[derive(Debug, Clone, Copy)]
struct VirtRegStatus {
    loc: FpuLoc,
    reg: Option<SReg>,
    spill_locked: bool,
    temp_locked: bool,
}

#[derive(Debug, Clone, Copy)]
struct HostRegStatus {
    guest: Option<u16>,
    dirty: bool,
}

pub struct FpuCache {
    mr: [VirtRegStatus; NUM_FPU_VIRTUAL],
    ar: [HostRegStatus; 32],
    /// Cleared when nothing has been mapped since the last flush, which
    /// lets float-free blocks skip the whole flush walk.
    pending_flush: bool,
}

impl FpuCache {
    pub fn new() -> FpuCache {
        FpuCache {
            mr: [VirtRegStatus {
                loc: FpuLoc::Mem,
                reg: None,
                spill_locked: false,
                temp_locked: false,
            }; NUM_FPU_VIRTUAL],
            ar: [HostRegStatus {
                guest: None,
                dirty: false,
            }; 32],
            pending_flush: false,
        }
    }

    pub fn start(&mut self) {
        for a in self.ar.iter_mut() {
            a.guest = None;
            a.dirty = false;
        }
        for m in self.mr.iter_mut() {
            m.loc = FpuLoc::Mem;
            m.reg = None;
            m.spill_locked = false;
            m.temp_locked = false;
        }
        self.pending_flush = false;
    }

    pub fn is_mapped(&self, r: u16) -> bool {
        self.mr[r as usize].loc == FpuLoc::Armreg
    }

    /// S register holding virtual register `r`. Panics if unmapped.
    pub fn r(&self, r: u16) -> SReg {
        match (self.mr[r as usize].loc, self.mr[r as usize].reg) {
            (FpuLoc::Armreg, Some(s)) => s,
            _ => panic!("float register {r} not in a host register"),
        }
    }

    /// S register holding vector register `v` (architectural index).
    pub fn v(&self, v: u8) -> SReg {
        self.r(32 + v as u16)
    }

    pub fn spill_lock(&mut self, regs: &[u16]) {
        for &r in regs {
            self.mr[r as usize].spill_locked = true;
        }
    }

    pub fn spill_lock_v(&mut self, vregs: &[u8]) {
        for &v in vregs {
            self.mr[32 + v as usize].spill_locked = true;
        }
    }

    /// Map virtual register `r` into an S register, loading from the
    /// context block unless `MAP_NOINIT` skips it. Compiler temporaries
    /// are never loaded; they have no defined memory value yet.
    pub fn map_reg(&mut self, e: &mut ArmEmitter, r: u16, flags: u32) -> SReg {
        self.pending_flush = true;

        if self.mr[r as usize].loc == FpuLoc::Armreg {
            let s = self.mr[r as usize].reg.expect("mapped fpr without host reg");
            if self.ar[s.0 as usize].guest != Some(r) {
                panic!(
                    "float register cache out of sync: {r} claims S{}, \
                     which holds {:?}",
                    s.0, self.ar[s.0 as usize].guest
                );
            }
            if flags & MAP_DIRTY != 0 {
                self.ar[s.0 as usize].dirty = true;
            }
            return s;
        }

        loop {
            for i in FPR_ALLOCATION_ORDER_START..FPR_ALLOCATION_ORDER_END {
                if self.ar[i as usize].guest.is_some() {
                    continue;
                }
                let s = SReg(i);
                self.ar[i as usize].dirty = flags & MAP_DIRTY != 0;
                if flags & MAP_NOINIT != MAP_NOINIT
                    && self.mr[r as usize].loc == FpuLoc::Mem
                    && r < TEMP0
                {
                    e.vldr(s, CTX_REG, fpu_virtual_offset(r));
                }
                self.ar[i as usize].guest = Some(r);
                self.mr[r as usize].loc = FpuLoc::Armreg;
                self.mr[r as usize].reg = Some(s);
                return s;
            }

            // All taken; spill the first one not locked.
            let victim = (FPR_ALLOCATION_ORDER_START..FPR_ALLOCATION_ORDER_END)
                .find(|&i| match self.ar[i as usize].guest {
                    Some(g) => {
                        !self.mr[g as usize].spill_locked
                            && !self.mr[g as usize].temp_locked
                    }
                    None => true,
                });
            match victim {
                Some(i) => self.flush_arm_reg(e, SReg(i)),
                None => panic!("out of spillable registers mapping float {r}"),
            }
        }
    }

    pub fn map_reg_v(&mut self, e: &mut ArmEmitter, v: u8, flags: u32) -> SReg {
        self.map_reg(e, 32 + v as u16, flags)
    }

    pub fn map_in_in(&mut self, e: &mut ArmEmitter, rd: u16, rs: u16) {
        self.spill_lock(&[rd, rs]);
        self.map_reg(e, rd, 0);
        self.map_reg(e, rs, 0);
        self.release_spill_lock(rd);
        self.release_spill_lock(rs);
    }

    pub fn map_dirty_in(
        &mut self,
        e: &mut ArmEmitter,
        rd: u16,
        rs: u16,
        avoid_load: bool,
    ) {
        self.spill_lock(&[rd, rs]);
        let load = !avoid_load || rd == rs;
        self.map_reg(e, rd, if load { MAP_DIRTY } else { MAP_NOINIT });
        self.map_reg(e, rs, 0);
        self.release_spill_lock(rd);
        self.release_spill_lock(rs);
    }

    pub fn map_dirty_in_in(
        &mut self,
        e: &mut ArmEmitter,
        rd: u16,
        rs: u16,
        rt: u16,
        avoid_load: bool,
    ) {
        self.spill_lock(&[rd, rs, rt]);
        let load = !avoid_load || rd == rs || rd == rt;
        self.map_reg(e, rd, if load { MAP_DIRTY } else { MAP_NOINIT });
        self.map_reg(e, rt, 0);
        self.map_reg(e, rs, 0);
        self.release_spill_lock(rd);
        self.release_spill_lock(rs);
        self.release_spill_lock(rt);
    }

    /// Map and spill-lock a vector operand group.
    pub fn map_regs_v(&mut self, e: &mut ArmEmitter, vregs: &[u8], flags: u32) {
        self.spill_lock_v(vregs);
        for &v in vregs {
            self.map_reg_v(e, v, flags);
        }
    }

    /// Whether two vector registers occupy adjacent storage slots, which
    /// is what makes a column eligible for a multi-store.
    pub fn consecutive(&self, v1: u8, v2: u8) -> bool {
        vec_offset(v2) == vec_offset(v1) + 4
    }

    /// Claim a temp register slot (no host register yet; map it next).
    /// Temp slots stay claimed until discarded or the locks release.
    pub fn get_temp(&mut self) -> u16 {
        self.pending_flush = true;
        for r in TEMP0..TEMP0 + NUM_TEMPS {
            let m = &mut self.mr[r as usize];
            if m.loc == FpuLoc::Mem && !m.temp_locked {
                m.temp_locked = true;
                return r;
            }
        }
        panic!("out of float temp registers, discard some first");
    }

    /// Write an S register back (if dirty) and free it.
    pub fn flush_arm_reg(&mut self, e: &mut ArmEmitter, s: SReg) {
        let Some(guest) = self.ar[s.0 as usize].guest else {
            return;
        };
        if self.ar[s.0 as usize].dirty
            && self.mr[guest as usize].loc == FpuLoc::Armreg
        {
            e.vstr(s, CTX_REG, fpu_virtual_offset(guest));
        }
        self.mr[guest as usize].loc = FpuLoc::Mem;
        self.mr[guest as usize].reg = None;
        self.ar[s.0 as usize].dirty = false;
        self.ar[s.0 as usize].guest = None;
    }

    /// Write virtual register `r` back to the context block.
    pub fn flush_reg(&mut self, e: &mut ArmEmitter, r: u16) {
        if self.mr[r as usize].loc == FpuLoc::Armreg {
            let s = self.mr[r as usize].reg.expect("mapped fpr without host reg");
            if self.ar[s.0 as usize].dirty {
                e.vstr(s, CTX_REG, fpu_virtual_offset(r));
                self.ar[s.0 as usize].dirty = false;
            }
            self.ar[s.0 as usize].guest = None;
        }
        self.mr[r as usize].loc = FpuLoc::Mem;
        self.mr[r as usize].reg = None;
    }

    pub fn flush_v(&mut self, e: &mut ArmEmitter, v: u8) {
        self.flush_reg(e, 32 + v as u16);
    }

    /// Free `r` without writing back.
    pub fn discard_reg(&mut self, r: u16) {
        if self.mr[r as usize].loc == FpuLoc::Armreg {
            let s = self.mr[r as usize].reg.expect("mapped fpr without host reg");
            self.ar[s.0 as usize].dirty = false;
            self.ar[s.0 as usize].guest = None;
        }
        let m = &mut self.mr[r as usize];
        m.loc = FpuLoc::Mem;
        m.reg = None;
        m.temp_locked = false;
        m.spill_locked = false;
    }

    /// Length of the dirty host-register run starting at `s` whose
    /// backing slots are consecutive. The staggered vector storage makes
    /// column loads land in consecutive slots, so columns coalesce.
    fn flush_get_sequential(&self, s: u8) -> u8 {
        let guest = self.ar[s as usize].guest.expect("sequential scan off a free reg");
        let mut last_offset = fpu_virtual_offset(guest);
        let mut c = 1;
        let mut a = s + 1;
        while a < 32 {
            let h = &self.ar[a as usize];
            let Some(g) = h.guest else { break };
            if !h.dirty {
                break;
            }
            let offset = fpu_virtual_offset(g);
            if offset != last_offset + 4 {
                break;
            }
            last_offset = offset;
            a += 1;
            c += 1;
        }
        c
    }

    /// Flush every dirty mapping and drop the temps. Sequential backing
    /// slots in ascending S registers become one VSTMIA; a run of two is
    /// not worth the extra ADD and stays as two VSTRs.
    pub fn flush_all(&mut self, e: &mut ArmEmitter) {
        if !self.pending_flush {
            // Nothing mapped; float blocks are much rarer than integer.
            return;
        }

        for r in TEMP0..TEMP0 + NUM_TEMPS {
            self.discard_reg(r);
        }

        let mut i = FPR_ALLOCATION_ORDER_START;
        while i < FPR_ALLOCATION_ORDER_END {
            let Some(guest) = self.ar[i as usize].guest else {
                i += 1;
                continue;
            };
            if !self.ar[i as usize].dirty {
                self.mr[guest as usize].loc = FpuLoc::Mem;
                self.mr[guest as usize].reg = None;
                self.ar[i as usize].guest = None;
                i += 1;
                continue;
            }

            let c = self.flush_get_sequential(i);
            let offset = fpu_virtual_offset(guest);
            match c {
                1 => e.vstr(SReg(i), CTX_REG, offset),
                2 => {
                    e.vstr(SReg(i), CTX_REG, offset);
                    e.vstr(SReg(i + 1), CTX_REG, offset + 4);
                }
                _ => {
                    e.add(
                        SCRATCH_REG,
                        CTX_REG,
                        Operand2::from_imm(offset as u32),
                    );
                    e.vstmia(SCRATCH_REG, false, SReg(i), c);
                }
            }
            for j in 0..c {
                let b = (i + j) as usize;
                let g = self.ar[b].guest.expect("sequential run lost a reg");
                self.mr[g as usize].loc = FpuLoc::Mem;
                self.mr[g as usize].reg = None;
                self.ar[b].guest = None;
                self.ar[b].dirty = false;
            }
            i += c;
        }

        for (s, a) in self.ar.iter().enumerate() {
            if let Some(g) = a.guest {
                panic!("flush_all left float {g} mapped in S{s}");
            }
        }
        self.pending_flush = false;
    }

    pub fn release_spill_lock(&mut self, r: u16) {
        self.mr[r as usize].spill_locked = false;
    }

    /// Drop every spill lock and discard the temps. Called at the end of
    /// each compiled instruction.
    pub fn release_spill_locks_and_discard_temps(&mut self) {
        for m in self.mr.iter_mut() {
            m.spill_locked = false;
        }
        for r in TEMP0..TEMP0 + NUM_TEMPS {
            self.discard_reg(r);
        }
    }
}

impl Default for FpuCache {
    fn default() -> Self {
        FpuCache::new()
    }
}
