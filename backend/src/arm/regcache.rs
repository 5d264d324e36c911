//! Integer register cache.
//!
//! Tracks, for every guest register, whether its value lives in a host
//! register, is a known immediate, or sits in the guest context block,
//! and for every host register which guest register occupies it and
//! whether it is dirty. The mapping primitives insert loads, spills and
//! stores as needed; a dirty value is never lost and two guest registers
//! never share a host register.

use jit_core::analysis::{
    is_register_clobbered, is_register_used, UNUSED_LOOKAHEAD_OPS,
};
use jit_core::ctx::gpr_offset;
use jit_core::mips::{MipsOpcode, MipsReg, NUM_MIPS_REGS};

use super::emitter::ArmEmitter;
use super::operand::Operand2;
use super::regs::{ArmReg, CTX_REG, GPR_ALLOCATION_ORDER, MEMBASE_REG, SCRATCH_REG};

/// Destination will be written; the cached value becomes newer than the
/// context block.
pub const MAP_DIRTY: u32 = 1;
/// Destination is about to be fully overwritten, skip the load. Implies
/// dirty.
pub const MAP_NOINIT: u32 = 3;

/// Where a guest register's current value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegMipsLoc {
    /// Context block only.
    Mem,
    /// Known immediate, not in any host register.
    Imm,
    /// In a host register.
    ArmReg,
    /// In a host register, with the immediate value still known.
    ArmRegImm,
    /// In a host register as a ready-to-use host pointer (base added,
    /// high bits masked). One-way: reverting reloads from memory.
    ArmRegAsPtr,
}

#[derive(Debug, Clone, Copy)]
struct GuestRegStatus {
    loc: RegMipsLoc,
    reg: Option<ArmReg>,
    imm: u32,
    spill_locked: bool,
}

#[derive(Debug, Clone, Copy)]
struct HostRegStatus {
    guest: Option<MipsReg>,
    dirty: bool,
}

pub struct GprCache {
    mr: [GuestRegStatus; NUM_MIPS_REGS],
    ar: [HostRegStatus; 16],
    /// Block instruction window for eviction lookahead.
    instrs: Vec<MipsOpcode>,
    /// Index of the instruction being compiled.
    pos: usize,
}

impl GprCache {
    pub fn new() -> GprCache {
        GprCache {
            mr: [GuestRegStatus {
                loc: RegMipsLoc::Mem,
                reg: None,
                imm: 0,
                spill_locked: false,
            }; NUM_MIPS_REGS],
            ar: [HostRegStatus {
                guest: None,
                dirty: false,
            }; 16],
            instrs: Vec::new(),
            pos: 0,
        }
    }

    /// Reset for a new translation block: everything back in memory, all
    /// host registers free, and a fresh lookahead window.
    pub fn start(&mut self, instrs: &[MipsOpcode]) {
        for a in self.ar.iter_mut() {
            a.guest = None;
            a.dirty = false;
        }
        for m in self.mr.iter_mut() {
            m.loc = RegMipsLoc::Mem;
            m.reg = None;
            m.imm = 0;
            m.spill_locked = false;
        }
        self.instrs.clear();
        self.instrs.extend_from_slice(instrs);
        self.pos = 0;
    }

    /// Advance the lookahead cursor to the instruction being compiled.
    pub fn set_compile_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    fn mrs(&self, r: MipsReg) -> &GuestRegStatus {
        &self.mr[r.index()]
    }

    fn ars(&self, h: ArmReg) -> &HostRegStatus {
        &self.ar[h as usize]
    }

    pub fn is_mapped(&self, r: MipsReg) -> bool {
        matches!(
            self.mrs(r).loc,
            RegMipsLoc::ArmReg | RegMipsLoc::ArmRegImm
        )
    }

    pub fn is_mapped_as_pointer(&self, r: MipsReg) -> bool {
        self.mrs(r).loc == RegMipsLoc::ArmRegAsPtr
    }

    pub fn is_imm(&self, r: MipsReg) -> bool {
        if r == MipsReg::Zero {
            return true;
        }
        matches!(self.mrs(r).loc, RegMipsLoc::Imm | RegMipsLoc::ArmRegImm)
    }

    pub fn get_imm(&self, r: MipsReg) -> u32 {
        if r == MipsReg::Zero {
            return 0;
        }
        match self.mrs(r).loc {
            RegMipsLoc::Imm | RegMipsLoc::ArmRegImm => self.mrs(r).imm,
            loc => panic!("get_imm on non-imm register {r:?} ({loc:?})"),
        }
    }

    /// Record a compile-time-known value without touching any host
    /// register. The zero register only ever holds zero.
    pub fn set_imm(&mut self, r: MipsReg, imm: u32) {
        if r == MipsReg::Zero && imm != 0 {
            panic!("cannot overwrite zero register with {imm:#010x}");
        }
        if self.mrs(r).loc == RegMipsLoc::ArmRegImm && self.mrs(r).imm == imm {
            // Already holds that value, keep it in the register.
            return;
        }
        if let Some(h) = self.mrs(r).reg {
            self.ar[h as usize].guest = None;
            self.ar[h as usize].dirty = false;
        }
        let m = &mut self.mr[r.index()];
        m.loc = RegMipsLoc::Imm;
        m.imm = imm;
        m.reg = None;
    }

    /// Host register holding `r`'s value. Panics if not value-mapped.
    pub fn r(&self, r: MipsReg) -> ArmReg {
        match self.mrs(r).loc {
            RegMipsLoc::ArmReg | RegMipsLoc::ArmRegImm => {
                self.mrs(r).reg.expect("mapped reg without host register")
            }
            loc => panic!("{r:?} not in a host register ({loc:?})"),
        }
    }

    /// Host register holding `r` as a pointer. Panics if not
    /// pointer-mapped.
    pub fn r_ptr(&self, r: MipsReg) -> ArmReg {
        match self.mrs(r).loc {
            RegMipsLoc::ArmRegAsPtr => {
                self.mrs(r).reg.expect("pointer reg without host register")
            }
            loc => panic!("{r:?} not pointer-mapped ({loc:?})"),
        }
    }

    pub fn spill_lock(&mut self, regs: &[MipsReg]) {
        for &r in regs {
            self.mr[r.index()].spill_locked = true;
        }
    }

    pub fn release_spill_locks(&mut self) {
        for m in self.mr.iter_mut() {
            m.spill_locked = false;
        }
    }

    pub fn release_spill_lock(&mut self, r: MipsReg) {
        self.mr[r.index()].spill_locked = false;
    }

    /// Load `imm` into a host register, preferring cheap derivations
    /// from registers whose immediate value is still known.
    pub fn set_reg_imm(&mut self, e: &mut ArmEmitter, reg: ArmReg, imm: u32) {
        if let Some((op2, inverse)) = Operand2::try_from_imm_inverse(imm) {
            if inverse {
                e.mvn(reg, op2);
            } else {
                e.mov(reg, op2);
            }
            return;
        }

        // See if a register with a known immediate gets us there in one
        // op: a small add or subtract, or masking off the high address
        // bits.
        for m in self.mr.iter() {
            if m.loc != RegMipsLoc::ArmRegImm {
                continue;
            }
            let href = m.reg.expect("imm-shadow reg without host register");
            if m.imm.wrapping_sub(imm) < 256 {
                e.sub(reg, href, Operand2::from_imm(m.imm.wrapping_sub(imm)));
                return;
            }
            if imm.wrapping_sub(m.imm) < 256 {
                e.add(reg, href, Operand2::from_imm(imm.wrapping_sub(m.imm)));
                return;
            }
            if m.imm & 0x3FFF_FFFF == imm {
                e.bic(
                    reg,
                    href,
                    Operand2::Imm {
                        value: 0xC0,
                        rotation: 4,
                    },
                );
                return;
            }
        }

        e.movi2r(reg, imm);
    }

    fn map_reg_to(
        &mut self,
        e: &mut ArmEmitter,
        h: ArmReg,
        r: MipsReg,
        flags: u32,
    ) {
        self.ar[h as usize].dirty = flags & MAP_DIRTY != 0;
        if flags & MAP_NOINIT != MAP_NOINIT {
            if r == MipsReg::Zero {
                // Cheaper than a memory access, and SetImm keeps it.
                e.mov(h, Operand2::from_imm(0));
                self.mr[r.index()].loc = RegMipsLoc::ArmRegImm;
                self.mr[r.index()].imm = 0;
            } else {
                match self.mrs(r).loc {
                    RegMipsLoc::Mem => {
                        e.ldr(h, CTX_REG, gpr_offset(r));
                        self.mr[r.index()].loc = RegMipsLoc::ArmReg;
                    }
                    RegMipsLoc::Imm => {
                        let imm = self.mrs(r).imm;
                        self.set_reg_imm(e, h, imm);
                        // An immediate is always newer than memory.
                        self.ar[h as usize].dirty = true;
                        // Mapping dirty means the value will change, so
                        // the immediate shadow dies.
                        if flags & MAP_DIRTY != 0 {
                            self.mr[r.index()].loc = RegMipsLoc::ArmReg;
                        } else {
                            self.mr[r.index()].loc = RegMipsLoc::ArmRegImm;
                        }
                    }
                    _ => {
                        self.mr[r.index()].loc = RegMipsLoc::ArmReg;
                    }
                }
            }
        } else {
            self.mr[r.index()].loc = RegMipsLoc::ArmReg;
        }
        self.ar[h as usize].guest = Some(r);
        self.mr[r.index()].reg = Some(h);
    }

    /// Pick an eviction victim: clobbered-soon registers first (free to
    /// discard), then registers not read within the lookahead window.
    /// Returns the host register and whether its guest is clobbered.
    fn find_best_to_spill(&self, unused_only: bool) -> Option<(ArmReg, bool)> {
        for &h in GPR_ALLOCATION_ORDER.iter() {
            let Some(guest) = self.ars(h).guest else {
                continue;
            };
            if self.mrs(guest).spill_locked {
                continue;
            }
            if is_register_clobbered(
                guest,
                &self.instrs,
                self.pos,
                UNUSED_LOOKAHEAD_OPS,
            ) {
                return Some((h, true));
            }
            if unused_only
                && is_register_used(
                    guest,
                    &self.instrs,
                    self.pos,
                    UNUSED_LOOKAHEAD_OPS,
                )
            {
                continue;
            }
            return Some((h, false));
        }
        None
    }

    /// Map guest register `r` into a host register, loading its value
    /// from the context block unless `MAP_NOINIT` asked to skip it.
    /// The fast path (already resident) emits nothing.
    pub fn map_reg(&mut self, e: &mut ArmEmitter, r: MipsReg, flags: u32) -> ArmReg {
        match self.mrs(r).loc {
            RegMipsLoc::ArmReg | RegMipsLoc::ArmRegImm => {
                let h = self.mrs(r).reg.expect("mapped reg without host register");
                if self.ars(h).guest != Some(r) {
                    panic!(
                        "register cache out of sync: {r:?} claims {h:?}, \
                         which holds {:?}",
                        self.ars(h).guest
                    );
                }
                if flags & MAP_DIRTY != 0 {
                    // The old immediate value is about to be invalid.
                    self.mr[r.index()].loc = RegMipsLoc::ArmReg;
                    self.ar[h as usize].dirty = true;
                }
                return h;
            }
            RegMipsLoc::ArmRegAsPtr => {
                // Pointer-mapped, wanted as a value again. The pointer
                // transform is lossy, reload from backing storage.
                let h = self.mrs(r).reg.expect("pointer reg without host register");
                if flags & MAP_NOINIT != MAP_NOINIT {
                    e.ldr(h, CTX_REG, gpr_offset(r));
                }
                self.mr[r.index()].loc = RegMipsLoc::ArmReg;
                if flags & MAP_DIRTY != 0 {
                    self.ar[h as usize].dirty = true;
                }
                return h;
            }
            _ => {}
        }

        // Not mapped. Try to place the saved regs statically so flushes
        // can coalesce into STMIA runs.
        let alloc = &GPR_ALLOCATION_ORDER;
        let desired = (alloc.len() as i32)
            - (6 - (r.index() as i32 - MipsReg::V0.index() as i32));
        if desired >= 0 && (desired as usize) < alloc.len() {
            let h = alloc[desired as usize];
            if self.ars(h).guest.is_none() {
                self.map_reg_to(e, h, r, flags);
                return h;
            }
        }

        loop {
            for &h in alloc.iter() {
                if self.ars(h).guest.is_none() {
                    self.map_reg_to(e, h, r, flags);
                    return h;
                }
            }

            let victim = self
                .find_best_to_spill(true)
                .or_else(|| self.find_best_to_spill(false));
            match victim {
                Some((h, clobbered)) => {
                    let guest = self.ars(h).guest.unwrap();
                    if clobbered {
                        self.discard_reg(guest);
                    } else {
                        self.flush_arm_reg(e, h);
                    }
                }
                None => panic!("out of spillable registers mapping {r:?}"),
            }
        }
    }

    /// Read-only mapping that turns the guest value into a host pointer:
    /// mask the high address bits, add the guest RAM base. Distinct from
    /// a value mapping; converting back reloads from memory.
    pub fn map_reg_as_pointer(&mut self, e: &mut ArmEmitter, r: MipsReg) -> ArmReg {
        if self.mrs(r).loc == RegMipsLoc::ArmRegAsPtr {
            return self.mrs(r).reg.expect("pointer reg without host register");
        }
        self.map_reg(e, r, 0);
        let h = self.mrs(r).reg.expect("mapped reg without host register");
        if self.ars(h).dirty {
            let guest = self.ars(h).guest.unwrap();
            e.str(h, CTX_REG, gpr_offset(guest));
        }
        // &= 0x3FFFFFFF, then add the RAM base.
        e.bic(
            h,
            h,
            Operand2::Imm {
                value: 0xC0,
                rotation: 4,
            },
        );
        e.add(h, MEMBASE_REG, Operand2::Reg(h));
        self.ar[h as usize].dirty = false;
        self.ar[h as usize].guest = Some(r);
        self.mr[r.index()].loc = RegMipsLoc::ArmRegAsPtr;
        h
    }

    pub fn map_in_in(&mut self, e: &mut ArmEmitter, rd: MipsReg, rs: MipsReg) {
        self.spill_lock(&[rd, rs]);
        self.map_reg(e, rd, 0);
        self.map_reg(e, rs, 0);
        self.release_spill_locks();
    }

    pub fn map_dirty_in(
        &mut self,
        e: &mut ArmEmitter,
        rd: MipsReg,
        rs: MipsReg,
        avoid_load: bool,
    ) {
        self.spill_lock(&[rd, rs]);
        let load = !avoid_load || rd == rs;
        self.map_reg(e, rd, if load { MAP_DIRTY } else { MAP_NOINIT });
        self.map_reg(e, rs, 0);
        self.release_spill_locks();
    }

    pub fn map_dirty_in_in(
        &mut self,
        e: &mut ArmEmitter,
        rd: MipsReg,
        rs: MipsReg,
        rt: MipsReg,
        avoid_load: bool,
    ) {
        self.spill_lock(&[rd, rs, rt]);
        let load = !avoid_load || rd == rs || rd == rt;
        self.map_reg(e, rd, if load { MAP_DIRTY } else { MAP_NOINIT });
        self.map_reg(e, rt, 0);
        self.map_reg(e, rs, 0);
        self.release_spill_locks();
    }

    pub fn map_dirty_dirty_in(
        &mut self,
        e: &mut ArmEmitter,
        rd1: MipsReg,
        rd2: MipsReg,
        rs: MipsReg,
        avoid_load: bool,
    ) {
        self.spill_lock(&[rd1, rd2, rs]);
        let load1 = !avoid_load || rd1 == rs;
        let load2 = !avoid_load || rd2 == rs;
        self.map_reg(e, rd1, if load1 { MAP_DIRTY } else { MAP_NOINIT });
        self.map_reg(e, rd2, if load2 { MAP_DIRTY } else { MAP_NOINIT });
        self.map_reg(e, rs, 0);
        self.release_spill_locks();
    }

    pub fn map_dirty_dirty_in_in(
        &mut self,
        e: &mut ArmEmitter,
        rd1: MipsReg,
        rd2: MipsReg,
        rs: MipsReg,
        rt: MipsReg,
        avoid_load: bool,
    ) {
        self.spill_lock(&[rd1, rd2, rs, rt]);
        let load1 = !avoid_load || rd1 == rs || rd1 == rt;
        let load2 = !avoid_load || rd2 == rs || rd2 == rt;
        self.map_reg(e, rd1, if load1 { MAP_DIRTY } else { MAP_NOINIT });
        self.map_reg(e, rd2, if load2 { MAP_DIRTY } else { MAP_NOINIT });
        self.map_reg(e, rt, 0);
        self.map_reg(e, rs, 0);
        self.release_spill_locks();
    }

    /// Write a host register's value back (if dirty) and free it.
    pub fn flush_arm_reg(&mut self, e: &mut ArmEmitter, h: ArmReg) {
        let Some(guest) = self.ars(h).guest else {
            if self.ars(h).dirty {
                panic!("host register {h:?} dirty but unmapped");
            }
            return;
        };
        let m = &mut self.mr[guest.index()];
        if m.loc == RegMipsLoc::ArmRegImm || guest == MipsReg::Zero {
            // Value still known, no store needed.
            m.loc = RegMipsLoc::Imm;
            m.reg = None;
        } else {
            if self.ar[h as usize].dirty && m.loc == RegMipsLoc::ArmReg {
                e.str(h, CTX_REG, gpr_offset(guest));
            }
            m.loc = RegMipsLoc::Mem;
            m.reg = None;
            m.imm = 0;
        }
        self.ar[h as usize].dirty = false;
        self.ar[h as usize].guest = None;
    }

    /// Free `r`'s host register without writing back. For values the
    /// selector knows are dead.
    pub fn discard_reg(&mut self, r: MipsReg) {
        let prev = self.mrs(r).loc;
        if matches!(
            prev,
            RegMipsLoc::ArmReg | RegMipsLoc::ArmRegAsPtr | RegMipsLoc::ArmRegImm
        ) {
            let h = self.mrs(r).reg.expect("mapped reg without host register");
            self.ar[h as usize].dirty = false;
            self.ar[h as usize].guest = None;
            let m = &mut self.mr[r.index()];
            m.reg = None;
            m.loc = if r == MipsReg::Zero {
                RegMipsLoc::Imm
            } else {
                RegMipsLoc::Mem
            };
            m.imm = 0;
        }
        if prev == RegMipsLoc::Imm && r != MipsReg::Zero {
            let m = &mut self.mr[r.index()];
            m.loc = RegMipsLoc::Mem;
            m.imm = 0;
        }
    }

    /// Write `r` back to the context block and demote it to memory.
    pub fn flush_reg(&mut self, e: &mut ArmEmitter, r: MipsReg) {
        match self.mrs(r).loc {
            RegMipsLoc::Imm => {
                // Immediates are always newer than memory.
                if r != MipsReg::Zero {
                    let imm = self.mrs(r).imm;
                    self.set_reg_imm(e, SCRATCH_REG, imm);
                    e.str(SCRATCH_REG, CTX_REG, gpr_offset(r));
                }
            }
            RegMipsLoc::ArmReg | RegMipsLoc::ArmRegImm => {
                let h = self.mrs(r).reg.expect("mapped reg without host register");
                if self.ars(h).dirty {
                    if r != MipsReg::Zero {
                        e.str(h, CTX_REG, gpr_offset(r));
                    }
                    self.ar[h as usize].dirty = false;
                }
                self.ar[h as usize].guest = None;
            }
            RegMipsLoc::ArmRegAsPtr => {
                let h = self.mrs(r).reg.expect("pointer reg without host register");
                // Pointer mappings are read-only.
                assert!(!self.ars(h).dirty, "pointer-mapped {r:?} cannot be dirty");
                self.ar[h as usize].guest = None;
            }
            RegMipsLoc::Mem => {}
        }
        let m = &mut self.mr[r.index()];
        m.loc = if r == MipsReg::Zero {
            RegMipsLoc::Imm
        } else {
            RegMipsLoc::Mem
        };
        m.reg = None;
        m.imm = 0;
    }

    /// Length of the dirty run starting at `start` whose host registers
    /// ascend and whose context slots are consecutive, for STMIA. With
    /// `allow_flush_imm`, pending immediates get parked in free later
    /// host registers so they can join the run.
    fn flush_get_sequential(
        &mut self,
        e: &mut ArmEmitter,
        start: MipsReg,
        allow_flush_imm: bool,
    ) -> usize {
        let sm = self.mrs(start);
        let start_reg = match (sm.loc, sm.reg) {
            (RegMipsLoc::ArmReg | RegMipsLoc::ArmRegImm, Some(h)) => h,
            _ => return 0,
        };
        if !self.ars(start_reg).dirty {
            return 0;
        }

        let mut count = 1;
        let mut last_arm = start_reg as u8;
        // Only the main 32 GPR slots are contiguous; HI/LO never join.
        for i in start.index() + 1..32 {
            let r = MipsReg::from_field(i as u32);
            let m = self.mrs(r);
            if matches!(m.loc, RegMipsLoc::ArmReg | RegMipsLoc::ArmRegImm) {
                if let Some(h) = m.reg {
                    if (h as u8) > last_arm && self.ars(h).dirty {
                        count += 1;
                        last_arm = h as u8;
                        continue;
                    }
                }
            } else if allow_flush_imm
                && m.loc == RegMipsLoc::Imm
                && r != MipsReg::Zero
            {
                // Park the immediate in a free, later host register;
                // even if the run dies it had to reach a register anyway.
                let mut found = false;
                for &h in GPR_ALLOCATION_ORDER.iter() {
                    if (h as u8) > last_arm && self.ars(h).guest.is_none() {
                        count += 1;
                        last_arm = h as u8;
                        self.map_reg_to(e, h, r, 0);
                        found = true;
                        break;
                    }
                }
                if found {
                    continue;
                }
            }
            // STMIA cannot skip a slot; the run ends here.
            break;
        }
        count
    }

    /// Flush every dirty mapping. Runs of contiguous guest slots in
    /// ascending host registers become one ADD+STMIA instead of N
    /// stores; the result is observably identical to flushing each
    /// register in order.
    pub fn flush_all(&mut self, e: &mut ArmEmitter) {
        // ADD+STMIA beats STR+STR from two registers up.
        const MIN_SEQUENTIAL: usize = 2;

        // First pass parks immediates in registers where that lets them
        // join a run. Separate pass so no existing mapping gets
        // overwritten.
        let mut i = 0;
        while i < NUM_MIPS_REGS {
            let r = mips_reg_at(i);
            let c = self.flush_get_sequential(e, r, true);
            i += if c >= MIN_SEQUENTIAL { c } else { 1 };
        }

        let mut i = 0;
        while i < NUM_MIPS_REGS {
            let r = mips_reg_at(i);
            let c = self.flush_get_sequential(e, r, false);
            if c >= MIN_SEQUENTIAL {
                let mut mask: u16 = 0;
                for j in 0..c {
                    let h = self.mr[i + j].reg.expect("sequential run lost a reg");
                    mask |= 1 << h as u16;
                }
                e.add(SCRATCH_REG, CTX_REG, Operand2::from_imm(gpr_offset(r) as u32));
                e.stmia(SCRATCH_REG, true, mask);
                for j in 0..c {
                    self.discard_reg(mips_reg_at(i + j));
                }
                i += c;
            } else {
                self.flush_reg(e, r);
                i += 1;
            }
        }

        for (h, a) in self.ar.iter().enumerate() {
            if let Some(guest) = a.guest {
                panic!(
                    "flush_all left {guest:?} mapped in {:?}",
                    ArmReg::from_index(h)
                );
            }
        }
    }

    /// Flush the caller-saved registers before calling out to C code.
    pub fn flush_before_call(&mut self, e: &mut ArmEmitter) {
        // R4-R11 survive the call, the rest do not.
        self.flush_arm_reg(e, ArmReg::R1);
        self.flush_arm_reg(e, ArmReg::R2);
        self.flush_arm_reg(e, ArmReg::R3);
        self.flush_arm_reg(e, ArmReg::R12);
    }
}

impl Default for GprCache {
    fn default() -> Self {
        GprCache::new()
    }
}

fn mips_reg_at(i: usize) -> MipsReg {
    match i {
        0..=31 => MipsReg::from_field(i as u32),
        32 => MipsReg::Hi,
        33 => MipsReg::Lo,
        34 => MipsReg::FpCond,
        _ => panic!("bad guest register index {i}"),
    }
}
