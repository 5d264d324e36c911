//! x86-64 emitter: REX/VEX prefixes, ModR/M and SIB forms, immediates,
//! branch fixups, and scalar SSE.

use jit_backend::code_buffer::CodeBuffer;
use jit_backend::x86_64::emitter::{OpArg, ShiftOp, X64Emitter, X86Cond};
use jit_backend::x86_64::regs::{Reg, Scale, Xmm};
use jit_core::CpuFeatures;

fn emit(f: impl FnOnce(&mut X64Emitter)) -> Vec<u8> {
    emit_with(CpuFeatures::all(), f)
}

fn emit_with(features: CpuFeatures, f: impl FnOnce(&mut X64Emitter)) -> Vec<u8> {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let mut e = X64Emitter::new(&mut buf, features);
    f(&mut e);
    drop(e);
    buf.as_slice().to_vec()
}

// -- Moves and immediates --

#[test]
fn mov_reg_reg_carries_rex_w() {
    let code = emit(|e| e.mov(true, OpArg::Reg(Reg::Rax), OpArg::Reg(Reg::Rbx)));
    assert_eq!(code, [0x48, 0x89, 0xD8]); // mov rax, rbx
}

#[test]
fn mov_to_extended_register_uses_rex_b() {
    let code = emit(|e| e.mov(false, OpArg::Reg(Reg::R8), OpArg::Reg(Reg::Rax)));
    assert_eq!(code, [0x41, 0x89, 0xC0]); // mov r8d, eax
}

#[test]
fn mov_ri_zero_becomes_xor() {
    let code = emit(|e| e.mov(false, OpArg::Reg(Reg::Rax), OpArg::Imm32(0)));
    assert_eq!(code, [0x31, 0xC0]); // xor eax, eax
}

#[test]
fn mov_ri_picks_the_shortest_form() {
    let code = emit(|e| e.mov(false, OpArg::Reg(Reg::Rcx), OpArg::Imm32(0x12345678)));
    assert_eq!(code, [0xB9, 0x78, 0x56, 0x34, 0x12]);

    // A 64-bit value that fits u32 drops REX.W: the write zero-extends.
    let code = emit(|e| e.mov_ri(true, Reg::Rax, 0xFFFF_FFFF));
    assert_eq!(code, [0xB8, 0xFF, 0xFF, 0xFF, 0xFF]);

    // Negative values use the sign-extending C7 form.
    let code = emit(|e| e.mov_ri(true, Reg::Rax, u64::MAX));
    assert_eq!(code, [0x48, 0xC7, 0xC0, 0xFF, 0xFF, 0xFF, 0xFF]);

    // Only the general case pays for the ten-byte movabs.
    let code = emit(|e| e.mov_ri(true, Reg::Rax, 0x1234_5678_9ABC_DEF0));
    assert_eq!(
        code,
        [0x48, 0xB8, 0xF0, 0xDE, 0xBC, 0x9A, 0x78, 0x56, 0x34, 0x12]
    );
}

#[test]
#[should_panic(expected = "does not fit in a 32-bit move")]
fn mov_ri_rejects_a_wide_value_without_rexw() {
    emit(|e| e.mov_ri(false, Reg::Rax, 0x1_0000_0000));
}

// -- Memory operand forms --

#[test]
fn rbp_base_needs_an_explicit_displacement() {
    let code = emit(|e| e.mov(true, OpArg::Reg(Reg::Rax), OpArg::mem(Reg::Rbp, 0)));
    assert_eq!(code, [0x48, 0x8B, 0x45, 0x00]); // mov rax, [rbp+0]
}

#[test]
fn r13_base_needs_an_explicit_displacement() {
    let code = emit(|e| e.mov(true, OpArg::Reg(Reg::Rax), OpArg::mem(Reg::R13, 0)));
    assert_eq!(code, [0x49, 0x8B, 0x45, 0x00]);
}

#[test]
fn rsp_base_forces_a_sib_byte() {
    let code = emit(|e| e.mov(true, OpArg::Reg(Reg::Rax), OpArg::mem(Reg::Rsp, 8)));
    assert_eq!(code, [0x48, 0x8B, 0x44, 0x24, 0x08]); // mov rax, [rsp+8]
}

#[test]
fn store_uses_disp8_when_it_fits() {
    let code = emit(|e| e.mov(false, OpArg::mem(Reg::Rbx, 0x10), OpArg::Reg(Reg::Rcx)));
    assert_eq!(code, [0x89, 0x4B, 0x10]); // mov [rbx+0x10], ecx
}

#[test]
fn scaled_index_with_disp32() {
    let code = emit(|e| {
        e.mov(
            true,
            OpArg::Reg(Reg::Rax),
            OpArg::sib(Reg::Rbx, Reg::Rcx, Scale::X4, 0x100),
        )
    });
    // mov rax, [rbx+rcx*4+0x100]
    assert_eq!(code, [0x48, 0x8B, 0x84, 0x8B, 0x00, 0x01, 0x00, 0x00]);
}

#[test]
#[should_panic(expected = "RSP cannot be an index register")]
fn rsp_index_is_rejected() {
    emit(|e| {
        e.mov(
            true,
            OpArg::Reg(Reg::Rax),
            OpArg::sib(Reg::Rax, Reg::Rsp, Scale::X1, 0),
        )
    });
}

#[test]
fn rip_relative_displacement_counts_from_the_next_instruction() {
    let code = emit(|e| e.mov(false, OpArg::Reg(Reg::Rax), OpArg::RipRel { target: 0x10 }));
    // Instruction ends at offset 6, so disp = 0x10 - 6.
    assert_eq!(code, [0x8B, 0x05, 0x0A, 0x00, 0x00, 0x00]);
}

// -- Arithmetic --

#[test]
fn arith_selects_imm8_or_imm32() {
    let code = emit(|e| e.add(true, OpArg::Reg(Reg::Rax), OpArg::Imm8(5)));
    assert_eq!(code, [0x48, 0x83, 0xC0, 0x05]);

    let code = emit(|e| e.add(false, OpArg::Reg(Reg::Rax), OpArg::Imm32(0x1000)));
    assert_eq!(code, [0x81, 0xC0, 0x00, 0x10, 0x00, 0x00]);

    // An Imm32 that fits a signed byte shrinks automatically.
    let code = emit(|e| e.cmp(false, OpArg::Reg(Reg::Rdi), OpArg::Imm32(0xFFFF_FFFF)));
    assert_eq!(code, [0x83, 0xFF, 0xFF]); // cmp edi, -1
}

#[test]
fn arith_direction_depends_on_which_side_is_memory() {
    let code = emit(|e| e.add(true, OpArg::Reg(Reg::Rax), OpArg::mem(Reg::Rbx, 0)));
    assert_eq!(code, [0x48, 0x03, 0x03]); // add rax, [rbx]

    let code = emit(|e| e.add(true, OpArg::mem(Reg::Rbx, 0), OpArg::Reg(Reg::Rax)));
    assert_eq!(code, [0x48, 0x01, 0x03]); // add [rbx], rax
}

#[test]
fn shift_forms() {
    let code = emit(|e| e.shift(ShiftOp::Shl, false, OpArg::Reg(Reg::Rax), OpArg::Imm8(1)));
    assert_eq!(code, [0xD1, 0xE0]);

    let code = emit(|e| e.shift(ShiftOp::Shl, false, OpArg::Reg(Reg::Rax), OpArg::Imm8(4)));
    assert_eq!(code, [0xC1, 0xE0, 0x04]);

    let code = emit(|e| {
        e.shift(ShiftOp::Shl, false, OpArg::Reg(Reg::Rax), OpArg::Reg(Reg::Rcx))
    });
    assert_eq!(code, [0xD3, 0xE0]); // shl eax, cl
}

#[test]
#[should_panic(expected = "shift amount must be an immediate or CL")]
fn shift_by_non_cl_register_is_rejected() {
    emit(|e| e.shift(ShiftOp::Shr, false, OpArg::Reg(Reg::Rax), OpArg::Reg(Reg::Rbx)));
}

#[test]
fn unary_group_f7() {
    let code = emit(|e| e.div(false, OpArg::Reg(Reg::Rcx)));
    assert_eq!(code, [0xF7, 0xF1]);

    let code = emit(|e| e.idiv(false, OpArg::Reg(Reg::Rcx)));
    assert_eq!(code, [0xF7, 0xF9]);

    let code = emit(|e| e.neg(false, OpArg::Reg(Reg::Rax)));
    assert_eq!(code, [0xF7, 0xD8]);
}

#[test]
fn push_pop_extended_registers() {
    let code = emit(|e| {
        e.push(Reg::Rbp);
        e.push(Reg::R12);
        e.pop(Reg::R15);
    });
    assert_eq!(code, [0x55, 0x41, 0x54, 0x41, 0x5F]);
}

#[test]
fn dispatcher_entry_saves_callee_saved_and_claims_the_pinned_registers() {
    let code = emit(|e| e.emit_dispatcher_entry());
    assert_eq!(
        code,
        [
            0x55, // push rbp
            0x53, // push rbx
            0x41, 0x54, // push r12
            0x41, 0x55, // push r13
            0x41, 0x56, // push r14
            0x41, 0x57, // push r15
            0x48, 0x89, 0xFD, // mov rbp, rdi   (context)
            0x48, 0x89, 0xF3, // mov rbx, rsi   (RAM base)
        ]
    );
}

#[test]
fn dispatcher_exit_restores_in_reverse_and_returns() {
    let code = emit(|e| e.emit_dispatcher_exit());
    assert_eq!(
        code,
        [
            0x41, 0x5F, // pop r15
            0x41, 0x5E, // pop r14
            0x41, 0x5D, // pop r13
            0x41, 0x5C, // pop r12
            0x5B, // pop rbx
            0x5D, // pop rbp
            0xC3, // ret
        ]
    );
}

// -- Branches --

#[test]
fn short_jump_fixup_patches_rel8() {
    let code = emit(|e| {
        let fx = e.jmp_fixup(false);
        e.nop();
        e.nop();
        e.set_jump_target(fx);
    });
    assert_eq!(code, [0xEB, 0x02, 0x90, 0x90]);
}

#[test]
fn wide_jump_fixup_patches_rel32() {
    let code = emit(|e| {
        let fx = e.jmp_fixup(true);
        e.nop();
        e.nop();
        e.set_jump_target(fx);
    });
    assert_eq!(code, [0xE9, 0x02, 0x00, 0x00, 0x00, 0x90, 0x90]);
}

#[test]
fn conditional_jump_forms() {
    let code = emit(|e| {
        let fx = e.j_cc_fixup(X86Cond::Ne, false);
        e.set_jump_target(fx);
    });
    assert_eq!(code, [0x75, 0x00]);

    let code = emit(|e| {
        let fx = e.j_cc_fixup(X86Cond::Ne, true);
        e.set_jump_target(fx);
    });
    assert_eq!(code, [0x0F, 0x85, 0x00, 0x00, 0x00, 0x00]);
}

#[test]
#[should_panic(expected = "branch out of range")]
fn rel8_overflow_panics() {
    emit(|e| {
        let fx = e.jmp_fixup(false);
        for _ in 0..200 {
            e.nop();
        }
        e.set_jump_target(fx);
    });
}

// -- Conditionals and extensions --

#[test]
fn setcc_low_byte_registers_need_a_bare_rex() {
    let code = emit(|e| e.setcc(X86Cond::E, OpArg::Reg(Reg::Rax)));
    assert_eq!(code, [0x0F, 0x94, 0xC0]); // sete al

    // SIL would alias DH without the empty REX.
    let code = emit(|e| e.setcc(X86Cond::E, OpArg::Reg(Reg::Rsi)));
    assert_eq!(code, [0x40, 0x0F, 0x94, 0xC6]); // sete sil
}

#[test]
fn cmovcc_encodes_0f_40_plus_cond() {
    let code = emit(|e| e.cmovcc(X86Cond::Ne, true, Reg::Rax, OpArg::Reg(Reg::Rbx)));
    assert_eq!(code, [0x48, 0x0F, 0x45, 0xC3]); // cmovne rax, rbx
}

#[test]
fn zero_and_sign_extension() {
    let code = emit(|e| e.movzx(false, 8, Reg::Rax, OpArg::Reg(Reg::Rcx)));
    assert_eq!(code, [0x0F, 0xB6, 0xC1]); // movzx eax, cl

    let code = emit(|e| e.movsx(true, 32, Reg::Rax, OpArg::Reg(Reg::Rcx)));
    assert_eq!(code, [0x48, 0x63, 0xC1]); // movsxd rax, ecx
}

#[test]
#[should_panic(expected = "movsxd only exists")]
fn movsxd_without_wide_destination_is_rejected() {
    emit(|e| e.movsx(false, 32, Reg::Rax, OpArg::Reg(Reg::Rcx)));
}

// -- Scalar SSE --

#[test]
fn movss_from_context_memory() {
    let code = emit(|e| e.movss(Xmm::Xmm0, OpArg::mem(Reg::Rbp, 0x130)));
    assert_eq!(code, [0xF3, 0x0F, 0x10, 0x85, 0x30, 0x01, 0x00, 0x00]);
}

#[test]
fn scalar_float_arithmetic() {
    let code = emit(|e| e.addss(Xmm::Xmm1, OpArg::Xmm(Xmm::Xmm2)));
    assert_eq!(code, [0xF3, 0x0F, 0x58, 0xCA]);

    let code = emit(|e| e.xorps(Xmm::Xmm0, OpArg::Xmm(Xmm::Xmm0)));
    assert_eq!(code, [0x0F, 0x57, 0xC0]);

    let code = emit(|e| e.comiss(Xmm::Xmm0, OpArg::Xmm(Xmm::Xmm1)));
    assert_eq!(code, [0x0F, 0x2F, 0xC1]);

    let code = emit(|e| e.cvttss2si(Reg::Rax, OpArg::Xmm(Xmm::Xmm3)));
    assert_eq!(code, [0xF3, 0x0F, 0x2C, 0xC3]);
}

#[test]
fn high_xmm_registers_take_rex_after_the_prefix() {
    let code = emit(|e| e.movss(Xmm::Xmm8, OpArg::Xmm(Xmm::Xmm1)));
    assert_eq!(code, [0xF3, 0x44, 0x0F, 0x10, 0xC1]);
}

// -- AVX --

#[test]
fn vex_two_byte_form_when_all_fields_fit() {
    let code = emit(|e| e.vaddss(Xmm::Xmm0, Xmm::Xmm1, OpArg::Xmm(Xmm::Xmm2)));
    assert_eq!(code, [0xC5, 0xF2, 0x58, 0xC2]); // vaddss xmm0, xmm1, xmm2
}

#[test]
fn vex_three_byte_form_for_extended_rm() {
    let code = emit(|e| e.vmulss(Xmm::Xmm0, Xmm::Xmm1, OpArg::Xmm(Xmm::Xmm9)));
    assert_eq!(code, [0xC4, 0xC1, 0x72, 0x59, 0xC1]); // vmulss xmm0, xmm1, xmm9
}

#[test]
#[should_panic(expected = "AVX not supported on this CPU")]
fn vex_without_avx_is_rejected() {
    let features = CpuFeatures {
        have_avx: false,
        ..CpuFeatures::all()
    };
    emit_with(features, |e| {
        e.vaddss(Xmm::Xmm0, Xmm::Xmm1, OpArg::Xmm(Xmm::Xmm2))
    });
}
