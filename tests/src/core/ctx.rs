//! Context block layout. The offsets are baked into emitted code, so
//! these pin the layout down explicitly.

use jit_core::ctx::{
    downcount_offset, fpr_offset, fpu_virtual_offset, gpr_offset, pc_offset,
    vec_offset, voffset, MipsContext, NUM_FPU_VIRTUAL, TEMP0,
};
use jit_core::mips::MipsReg;

#[test]
fn integer_slots_are_where_generated_code_expects() {
    assert_eq!(gpr_offset(MipsReg::Zero), 0);
    assert_eq!(gpr_offset(MipsReg::At), 4);
    assert_eq!(gpr_offset(MipsReg::A0), 16);
    assert_eq!(gpr_offset(MipsReg::Ra), 124);
    assert_eq!(gpr_offset(MipsReg::Hi), 128);
    assert_eq!(gpr_offset(MipsReg::Lo), 132);
    assert_eq!(gpr_offset(MipsReg::FpCond), 136);
    assert_eq!(pc_offset(), 140);
    assert_eq!(downcount_offset(), 144);
}

#[test]
fn float_slots_follow_the_integer_state() {
    assert_eq!(fpr_offset(0), 148);
    assert_eq!(fpr_offset(31), 148 + 31 * 4);
    assert_eq!(vec_offset(0), 276);
    assert_eq!(fpu_virtual_offset(0), 148);
    assert_eq!(fpu_virtual_offset(32), 276);
    assert_eq!(fpu_virtual_offset(TEMP0), 852);
    assert_eq!(
        fpu_virtual_offset((NUM_FPU_VIRTUAL - 1) as u16),
        852 + 15 * 4
    );
}

#[test]
fn voffset_is_a_permutation_of_the_vector_file() {
    let mut seen = [false; 128];
    for i in 0..128u8 {
        let s = voffset(i);
        assert!((s as usize) < 128);
        assert!(!seen[s as usize], "storage slot {s} assigned twice");
        seen[s as usize] = true;
    }
}

#[test]
fn matrix_columns_land_in_consecutive_storage() {
    // Rows of a column differ by 32 in the architectural index and by
    // one storage slot, which is what lets column stores coalesce.
    for i in 0..96u8 {
        assert_eq!(voffset(i + 32), voffset(i) + 1, "column break at {i}");
    }
}

#[test]
fn fresh_context_is_zeroed() {
    let ctx = MipsContext::new();
    assert!(ctx.r.iter().all(|&r| r == 0));
    assert_eq!(ctx.pc, 0);
    assert_eq!(ctx.downcount, 0);
    assert!(ctx.f.iter().all(|&f| f == 0.0));
}

#[test]
#[should_panic(expected = "vector register index out of range")]
fn voffset_rejects_out_of_range() {
    voffset(128);
}

#[test]
#[should_panic(expected = "virtual FPU register out of range")]
fn fpu_virtual_offset_rejects_out_of_range() {
    fpu_virtual_offset(NUM_FPU_VIRTUAL as u16);
}
