//! Register-usage analysis over instruction windows.

use jit_core::analysis::{
    determine_usage, is_register_clobbered, is_register_used, RegisterUsage,
};
use jit_core::mips::{MipsOpcode, MipsReg};

fn r_type(funct: u32, rd: MipsReg, rs: MipsReg, rt: MipsReg) -> MipsOpcode {
    MipsOpcode(
        ((rs.index() as u32) << 21)
            | ((rt.index() as u32) << 16)
            | ((rd.index() as u32) << 11)
            | funct,
    )
}

fn i_type(op: u32, rt: MipsReg, rs: MipsReg, imm: u16) -> MipsOpcode {
    MipsOpcode(
        (op << 26)
            | ((rs.index() as u32) << 21)
            | ((rt.index() as u32) << 16)
            | imm as u32,
    )
}

fn addu(rd: MipsReg, rs: MipsReg, rt: MipsReg) -> MipsOpcode {
    r_type(0x21, rd, rs, rt)
}

fn addiu(rt: MipsReg, rs: MipsReg, imm: u16) -> MipsOpcode {
    i_type(9, rt, rs, imm)
}

fn beq(rs: MipsReg, rt: MipsReg, off: u16) -> MipsOpcode {
    i_type(4, rt, rs, off)
}

fn beql(rs: MipsReg, rt: MipsReg, off: u16) -> MipsOpcode {
    i_type(20, rt, rs, off)
}

fn nop() -> MipsOpcode {
    MipsOpcode(0)
}

#[test]
fn operands_read_count_as_input() {
    let instrs = [addu(MipsReg::V0, MipsReg::A0, MipsReg::A1)];
    assert_eq!(
        determine_usage(MipsReg::A0, &instrs, 0, 30),
        RegisterUsage::Input
    );
    assert_eq!(
        determine_usage(MipsReg::A1, &instrs, 0, 30),
        RegisterUsage::Input
    );
    assert!(is_register_used(MipsReg::A0, &instrs, 0, 30));
}

#[test]
fn overwritten_register_is_clobbered() {
    let instrs = [addiu(MipsReg::A0, MipsReg::V0, 1)];
    assert_eq!(
        determine_usage(MipsReg::A0, &instrs, 0, 30),
        RegisterUsage::Clobbered
    );
    assert!(is_register_clobbered(MipsReg::A0, &instrs, 0, 30));
}

#[test]
fn read_wins_over_a_simultaneous_write() {
    // addu a0, a0, a1 reads a0 before replacing it.
    let instrs = [addu(MipsReg::A0, MipsReg::A0, MipsReg::A1)];
    assert_eq!(
        determine_usage(MipsReg::A0, &instrs, 0, 30),
        RegisterUsage::Input
    );
}

#[test]
fn lookahead_bounds_the_scan() {
    let instrs = [nop(), addiu(MipsReg::A0, MipsReg::V0, 1)];
    assert_eq!(
        determine_usage(MipsReg::A0, &instrs, 0, 1),
        RegisterUsage::Unknown
    );
    assert_eq!(
        determine_usage(MipsReg::A0, &instrs, 0, 2),
        RegisterUsage::Clobbered
    );
}

#[test]
fn nothing_is_visible_past_a_branch_and_its_slot() {
    let instrs = [
        beq(MipsReg::V0, MipsReg::Zero, 4),
        nop(),
        addiu(MipsReg::A1, MipsReg::Zero, 7),
    ];
    assert_eq!(
        determine_usage(MipsReg::A1, &instrs, 0, 30),
        RegisterUsage::Unknown
    );
}

#[test]
fn delay_slot_clobber_counts_when_the_scan_starts_before_the_branch() {
    let instrs = [
        nop(),
        beq(MipsReg::V0, MipsReg::Zero, 4),
        addiu(MipsReg::A1, MipsReg::Zero, 7),
    ];
    assert_eq!(
        determine_usage(MipsReg::A1, &instrs, 0, 30),
        RegisterUsage::Clobbered
    );
}

#[test]
fn delay_slot_clobber_is_untrusted_from_the_branch_itself() {
    // Scanning from the branch means the slot may already be compiled.
    let instrs = [
        beq(MipsReg::V0, MipsReg::Zero, 4),
        addiu(MipsReg::A1, MipsReg::Zero, 7),
    ];
    assert_eq!(
        determine_usage(MipsReg::A1, &instrs, 0, 30),
        RegisterUsage::Unknown
    );
}

#[test]
fn likely_branch_never_trusts_the_slot_clobber() {
    // The slot of a likely branch may be skipped entirely.
    let instrs = [
        nop(),
        beql(MipsReg::V0, MipsReg::Zero, 4),
        addiu(MipsReg::A1, MipsReg::Zero, 7),
    ];
    assert_eq!(
        determine_usage(MipsReg::A1, &instrs, 0, 30),
        RegisterUsage::Unknown
    );
}

#[test]
fn conditional_move_is_never_a_full_clobber() {
    // movz a0, v0, v1 may leave a0 untouched.
    let instrs = [r_type(10, MipsReg::A0, MipsReg::V0, MipsReg::V1)];
    assert_eq!(
        determine_usage(MipsReg::A0, &instrs, 0, 30),
        RegisterUsage::Unknown
    );
}

#[test]
fn non_gpr_registers_are_always_unknown() {
    let instrs = [addu(MipsReg::V0, MipsReg::A0, MipsReg::A1)];
    assert_eq!(
        determine_usage(MipsReg::Hi, &instrs, 0, 30),
        RegisterUsage::Unknown
    );
    assert_eq!(
        determine_usage(MipsReg::FpCond, &instrs, 0, 30),
        RegisterUsage::Unknown
    );
}

#[test]
fn jal_clobbers_the_return_address() {
    let instrs = [MipsOpcode(3 << 26)];
    assert_eq!(
        determine_usage(MipsReg::Ra, &instrs, 0, 30),
        RegisterUsage::Clobbered
    );
}

#[test]
fn empty_window_is_unknown() {
    assert_eq!(
        determine_usage(MipsReg::A0, &[], 0, 30),
        RegisterUsage::Unknown
    );
}
