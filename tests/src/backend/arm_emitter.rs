use jit_backend::arm::emitter::ArmEmitter;
use jit_backend::arm::operand::Operand2;
use jit_backend::arm::regs::{ArmReg, CondCode, SReg, ShiftType};
use jit_backend::CodeBuffer;
use jit_core::cpu::CpuFeatures;

use ArmReg::*;

fn emit(f: impl FnOnce(&mut ArmEmitter)) -> CodeBuffer {
    emit_with(CpuFeatures::all(), f)
}

fn emit_with(features: CpuFeatures, f: impl FnOnce(&mut ArmEmitter)) -> CodeBuffer {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let mut e = ArmEmitter::new(&mut buf, features);
    f(&mut e);
    buf
}

fn words(buf: &CodeBuffer) -> Vec<u32> {
    assert_eq!(buf.offset() % 4, 0, "unaligned instruction stream");
    (0..buf.offset()).step_by(4).map(|o| buf.read_u32(o)).collect()
}

// -- Data processing --

#[test]
fn mov_immediate() {
    let buf = emit(|e| e.mov(R0, Operand2::from_imm(1)));
    assert_eq!(words(&buf), [0xE3A00001]);
}

#[test]
fn mvn_immediate() {
    let buf = emit(|e| e.mvn(R0, Operand2::from_imm(0)));
    assert_eq!(words(&buf), [0xE3E00000]);
}

#[test]
fn add_register() {
    let buf = emit(|e| e.add(R1, R2, Operand2::Reg(R3)));
    assert_eq!(words(&buf), [0xE0821003]);
}

#[test]
fn sub_immediate() {
    let buf = emit(|e| e.sub(R0, R1, Operand2::from_imm(4)));
    assert_eq!(words(&buf), [0xE2410004]);
}

#[test]
fn cmp_sets_s_bit() {
    let buf = emit(|e| e.cmp(R0, Operand2::from_imm(0)));
    assert_eq!(words(&buf), [0xE3500000]);
}

#[test]
fn bic_with_rotated_immediate() {
    // The address-masking constant: 0xC0 rotated right 8 is 0xC0000000.
    let buf = emit(|e| e.bic(R0, R0, Operand2::Imm { value: 0xC0, rotation: 4 }));
    assert_eq!(words(&buf), [0xE3C004C0]);
}

#[test]
fn shifts_go_through_the_barrel_shifter() {
    let buf = emit(|e| {
        e.lsl(R0, R1, 2);
        e.lsr(R0, R1, 32);
        e.lsl_reg(R0, R1, R2);
    });
    assert_eq!(words(&buf), [0xE1A00101, 0xE1A00021, 0xE1A00211]);
}

#[test]
fn lsl_zero_is_plain_mov() {
    let buf = emit(|e| e.lsl(R0, R1, 0));
    assert_eq!(words(&buf), [0xE1A00001]);
}

#[test]
fn cond_scope_predicates_and_restores() {
    let buf = emit(|e| {
        {
            let mut cc = e.with_cc(CondCode::Eq);
            cc.mov(R0, Operand2::from_imm(1));
        }
        e.mov(R0, Operand2::from_imm(2));
    });
    assert_eq!(words(&buf), [0x03A00001, 0xE3A00002]);
}

// -- Wide moves and bitfields --

#[test]
fn movw_movt_split_the_halfword() {
    let buf = emit(|e| {
        e.movw(R0, 0x1234);
        e.movt(R0, 0xBEEF);
    });
    assert_eq!(words(&buf), [0xE3010234, 0xE34B0EEF]);
}

#[test]
fn ubfx_encodes_width_minus_one() {
    let buf = emit(|e| e.ubfx(R0, R1, 8, 8));
    assert_eq!(words(&buf), [0xE7E70451]);
}

#[test]
fn bfi_encodes_msb() {
    let buf = emit(|e| e.bfi(R0, R1, 0, 8));
    assert_eq!(words(&buf), [0xE7C70011]);
}

#[test]
fn clz_encoding() {
    let buf = emit(|e| e.clz(R0, R1));
    assert_eq!(words(&buf), [0xE16F0F11]);
}

#[test]
fn bkpt_splits_the_immediate() {
    let buf = emit(|e| {
        e.bkpt(0);
        e.bkpt(0xDEAD);
    });
    assert_eq!(words(&buf), [0xE1200070, 0xE12DEA7D]);
}

// -- Multiply / divide --

#[test]
fn mul_operand_order() {
    let buf = emit(|e| e.mul(R1, R2, R3));
    assert_eq!(words(&buf), [0xE0010392]);
}

#[test]
fn umull_low_high_fields() {
    let buf = emit(|e| e.umull(R0, R1, R2, R3));
    assert_eq!(words(&buf), [0xE0810392]);
}

#[test]
fn udiv_encoding() {
    let buf = emit(|e| e.udiv(R0, R1, R2));
    assert_eq!(words(&buf), [0xE730F211]);
}

#[test]
#[should_panic(expected = "not supported on this CPU")]
fn udiv_requires_hardware_divide() {
    emit_with(CpuFeatures::armv7_no_idiv(), |e| e.udiv(R0, R1, R2));
}

// -- Loads and stores --

#[test]
fn word_load_store_immediate() {
    let buf = emit(|e| {
        e.ldr(R0, R10, 4);
        e.str(R1, R10, -8);
    });
    assert_eq!(words(&buf), [0xE59A0004, 0xE50A1008]);
}

#[test]
fn byte_load() {
    let buf = emit(|e| e.ldrb(R0, R10, 1));
    assert_eq!(words(&buf), [0xE5DA0001]);
}

#[test]
fn halfword_load_splits_offset_nibbles() {
    let buf = emit(|e| e.ldrh(R0, R10, 0x12));
    assert_eq!(words(&buf), [0xE1DA01B2]);
}

#[test]
fn signed_byte_load() {
    let buf = emit(|e| e.ldrsb(R0, R4, 0));
    assert_eq!(words(&buf), [0xE1D400D0]);
}

#[test]
#[should_panic(expected = "out of range")]
fn word_load_offset_limit() {
    emit(|e| e.ldr(R0, R10, 4096));
}

#[test]
#[should_panic(expected = "out of range")]
fn halfword_load_offset_limit() {
    emit(|e| e.ldrh(R0, R10, 256));
}

#[test]
fn register_offset_load() {
    let buf = emit(|e| e.ldr_reg(R0, R11, R1));
    assert_eq!(words(&buf), [0xE79B0001]);
}

#[test]
fn shifted_register_offset_forms() {
    let buf = emit(|e| {
        e.ldr_shifted(R4, R11, R2, ShiftType::Lsl, 2);
        e.str_shifted(R5, R11, R2, ShiftType::Lsr, 8);
    });
    // ldr r4, [r11, r2, lsl #2] ; str r5, [r11, r2, lsr #8]
    assert_eq!(words(&buf), [0xE79B4102, 0xE78B5422]);
}

#[test]
fn block_transfers() {
    let buf = emit(|e| {
        e.stmia(R0, true, 0x30);
        e.ldmia(R10, false, 0x0F);
    });
    assert_eq!(words(&buf), [0xE8A00030, 0xE89A000F]);
}

#[test]
fn push_pop_use_the_stack_pointer() {
    let mask = 1 << 4 | 1 << 14;
    let buf = emit(|e| {
        e.push(mask);
        e.pop(mask);
    });
    assert_eq!(words(&buf), [0xE92D4010, 0xE8BD4010]);
}

// -- Branches --

#[test]
fn branch_fixup_resolves_forward() {
    let buf = emit(|e| {
        let fx = e.b_fixup();
        e.nop();
        e.nop();
        e.set_jump_target(fx);
    });
    // Skips two instructions: offset field is (12 - 8 - 0) >> 2 = 1.
    assert_eq!(words(&buf)[0], 0xEA000001);
}

#[test]
fn conditional_fixup_keeps_its_condition() {
    let buf = emit(|e| {
        let fx = e.b_cc_fixup(CondCode::Eq);
        e.set_jump_target(fx);
    });
    assert_eq!(words(&buf), [0x0AFFFFFF]);
}

#[test]
fn link_fixup_sets_the_l_bit() {
    let buf = emit(|e| {
        let fx = e.bl_fixup();
        e.nop();
        e.set_jump_target(fx);
    });
    assert_eq!(words(&buf)[0], 0xEB000000);
}

#[test]
fn backward_branch_to_offset() {
    let buf = emit(|e| {
        e.nop();
        e.b_offset(0);
    });
    assert_eq!(words(&buf)[1], 0xEAFFFFFD);
}

#[test]
fn bx_and_blx() {
    let buf = emit(|e| {
        e.bx(Lr);
        e.blx_reg(R1);
    });
    assert_eq!(words(&buf), [0xE12FFF1E, 0xE12FFF31]);
}

// -- Literal pool --

#[test]
fn literal_pool_coalesces_duplicates_and_patches_loads() {
    let buf = emit(|e| {
        e.add_new_lit(0xDEAD_BEEF);
        e.ldr_lit(R0);
        e.add_new_lit(0xDEAD_BEEF);
        e.ldr_lit(R1);
        assert_eq!(e.lit_pool_len(), 2);
        e.flush_lit_pool();
        assert_eq!(e.lit_pool_len(), 0);
    });
    // One pool slot at 8, shared: the first LDR reaches forward, the
    // second backward relative to its pc.
    assert_eq!(buf.offset(), 12);
    assert_eq!(buf.read_u32(0), 0xE59F0000);
    assert_eq!(buf.read_u32(4), 0xE51F1004);
    assert_eq!(buf.read_u32(8), 0xDEAD_BEEF);
}

// -- Immediate materialization --

#[test]
fn movi2r_single_op_when_encodable() {
    let buf = emit(|e| e.movi2r(R0, 0xFF));
    assert_eq!(words(&buf), [0xE3A000FF]);
}

#[test]
fn movi2r_uses_mvn_for_complements() {
    let buf = emit(|e| e.movi2r(R0, 0xFFFF_FFFF));
    assert_eq!(words(&buf), [0xE3E00000]);
}

#[test]
fn movi2r_movw_movt_on_armv7() {
    let buf = emit(|e| e.movi2r(R0, 0x1234_5678));
    assert_eq!(words(&buf), [0xE3050678, 0xE3410234]);
}

#[test]
fn movi2r_skips_movt_for_low_halfword() {
    let buf = emit(|e| e.movi2r(R0, 0x1004));
    assert_eq!(words(&buf), [0xE3010004]);
}

fn pre_v7() -> CpuFeatures {
    CpuFeatures {
        have_armv7: false,
        ..CpuFeatures::all()
    }
}

#[test]
fn movi2r_chunks_the_worst_case_without_movw() {
    let buf = emit_with(pre_v7(), |e| e.movi2r(R0, 0x5555_5555));
    assert_eq!(
        words(&buf),
        [0xE3A00055, 0xE3800C55, 0xE3800855, 0xE3800455]
    );
}

#[test]
fn two_op_synthesis_covers_two_chunks() {
    let buf = emit_with(pre_v7(), |e| {
        assert!(e.try_set_value_two_op(R0, 0x1001));
    });
    assert_eq!(words(&buf), [0xE3A00001, 0xE3800A01]);
}

#[test]
fn addi2r_splits_16_bit_values() {
    let buf = emit(|e| e.addi2r(R0, R1, 0x1234, R12));
    assert_eq!(words(&buf), [0xE2810C12, 0xE2800034]);
}

#[test]
fn subi2r_adds_the_negation() {
    let buf = emit(|e| e.subi2r(R0, R0, 1, R12));
    assert_eq!(words(&buf), [0xE2400001]);
}

#[test]
fn andi2r_prefers_bic_for_complements() {
    let buf = emit(|e| e.andi2r(R0, R1, 0xFFFF_FF00, R12));
    assert_eq!(words(&buf), [0xE3C100FF]);
}

#[test]
fn andi2r_extracts_low_runs_with_ubfx() {
    let buf = emit(|e| {
        assert!(e.try_andi2r(R0, R1, 0xFFFF));
    });
    assert_eq!(words(&buf), [0xE7EF0051]);
}

#[test]
fn ori2r_gives_up_when_a_scratch_load_is_cheaper() {
    let buf = emit(|e| {
        // MVN-able through a scratch register in two ops; chunking
        // would take at least three.
        assert!(!e.try_ori2r(R0, R1, 0xFFFF_FF55));
    });
    assert_eq!(buf.offset(), 0);
}

#[test]
fn cmpi2r_uses_cmn_for_negations() {
    let buf = emit(|e| e.cmpi2r(R0, 0xFFFF_FFFF, R12));
    assert_eq!(words(&buf), [0xE3700001]);
}

// -- VFP --

#[test]
fn vldr_odd_single_sets_the_d_bit() {
    let buf = emit(|e| e.vldr(SReg(1), R10, 8));
    assert_eq!(words(&buf), [0xEDDA0A02]);
}

#[test]
#[should_panic(expected = "VLDR offset invalid")]
fn vldr_rejects_unaligned_offsets() {
    emit(|e| e.vldr(SReg(0), R10, 2));
}

#[test]
fn vstmia_counts_registers() {
    let buf = emit(|e| e.vstmia(R0, false, SReg(4), 3));
    assert_eq!(words(&buf), [0xEC802A03]);
}

#[test]
fn vadd_three_operand_fields() {
    let buf = emit(|e| e.vadd(SReg(0), SReg(1), SReg(2)));
    assert_eq!(words(&buf), [0xEE300A81]);
}

#[test]
fn vmov_imm_encodes_or_declines() {
    let buf = emit(|e| {
        assert!(e.vmov_imm(SReg(0), 1.0));
        assert!(!e.vmov_imm(SReg(0), 0.1));
    });
    assert_eq!(words(&buf), [0xEEB70A00]);
}

#[test]
fn vcvt_both_directions() {
    let buf = emit(|e| {
        e.vcvt_f32_s32(SReg(0), SReg(1));
        e.vmrs_apsr();
    });
    assert_eq!(words(&buf), [0xEEB80AE0, 0xEEF1FA10]);
}

#[test]
#[should_panic(expected = "quad-register conditional move")]
fn quad_conditional_move_is_not_wired_up() {
    use jit_backend::arm::regs::QReg;
    emit(|e| e.vmovq_cc(QReg(0), QReg(1)));
}

#[test]
#[should_panic(expected = "branch out of range")]
fn branch_distance_over_32mb_panics() {
    let mut buf = CodeBuffer::new(0x280_0000).unwrap();
    let mut e = ArmEmitter::new(&mut buf, CpuFeatures::all());
    let fx = e.b_fixup();
    e.buf().set_offset(0x240_0000);
    e.set_jump_target(fx);
}
