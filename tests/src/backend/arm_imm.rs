//! Semantic checks for the immediate-synthesis ladders: decode the
//! emitted data-processing words and replay them, then compare against
//! plain arithmetic on the original value.

use jit_backend::arm::emitter::ArmEmitter;
use jit_backend::arm::regs::ArmReg;
use jit_backend::CodeBuffer;
use jit_core::cpu::CpuFeatures;

fn pre_v7() -> CpuFeatures {
    CpuFeatures {
        have_armv7: false,
        ..CpuFeatures::all()
    }
}

fn emit_with(features: CpuFeatures, f: impl FnOnce(&mut ArmEmitter)) -> Vec<u32> {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let mut e = ArmEmitter::new(&mut buf, features);
    f(&mut e);
    (0..buf.offset()).step_by(4).map(|o| buf.read_u32(o)).collect()
}

fn decoded_imm(word: u32) -> u32 {
    assert!(word & 1 << 25 != 0, "{word:#010x} is not an immediate form");
    (word & 0xFF).rotate_right(((word >> 8) & 0xF) * 2)
}

fn data_opcode(word: u32) -> u32 {
    (word >> 21) & 0xF
}

/// Replay a MOV/MVN/ORR stream into a value.
fn replay_build(words: &[u32]) -> u32 {
    let mut acc = 0u32;
    for (i, &w) in words.iter().enumerate() {
        let imm = decoded_imm(w);
        match data_opcode(w) {
            13 => acc = imm,        // MOV
            15 => acc = !imm,       // MVN
            12 => acc |= imm,       // ORR
            op => panic!("unexpected opcode {op} in word {i}: {w:#010x}"),
        }
    }
    acc
}

#[test]
fn movi2r_composes_arbitrary_values_without_movw() {
    let cases = [
        0x5555_5555u32,
        0x1234_5678,
        0xDEAD_BEEF,
        0xFFFF_0001,
        0xFF,
        0xFFFF_FF00,
        0,
    ];
    for val in cases {
        let words = emit_with(pre_v7(), |e| e.movi2r(ArmReg::R0, val));
        assert!(!words.is_empty());
        assert_eq!(
            replay_build(&words),
            val,
            "movi2r stream for {val:#010x} decodes wrong"
        );
        assert!(
            words.len() <= 4,
            "movi2r took {} ops for {val:#010x}",
            words.len()
        );
    }
}

#[test]
fn two_op_synthesis_is_exact_when_it_claims_success() {
    for val in [0x1001u32, 0x4100, 0xC000_0003, 0x0003_F000, 5] {
        let words = emit_with(pre_v7(), |e| {
            assert!(e.try_set_value_two_op(ArmReg::R0, val), "{val:#010x}");
        });
        assert!(words.len() <= 2);
        assert_eq!(replay_build(&words), val, "two-op stream for {val:#010x}");
    }
}

#[test]
fn andi2r_chains_mask_exactly() {
    // Start from all-ones so surviving bits are exactly the mask.
    for val in [0x00FF_00FFu32, 0x3FFF_FFFF, 0xFFFF_FF00, 0x00FF_FF00] {
        let words = emit_with(pre_v7(), |e| {
            assert!(e.try_andi2r(ArmReg::R0, ArmReg::R1, val), "{val:#010x}");
        });
        let mut acc = u32::MAX;
        for &w in &words {
            let imm = decoded_imm(w);
            match data_opcode(w) {
                0 => acc &= imm,  // AND
                14 => acc &= !imm, // BIC
                op => panic!("unexpected opcode {op}: {w:#010x}"),
            }
        }
        assert_eq!(acc, val, "andi2r stream for {val:#010x}");
    }
}

#[test]
fn ori2r_chains_set_bits_exactly() {
    for val in [0x5500_0055u32, 0x0012_3400, 0xFF00_00FF] {
        let words = emit_with(pre_v7(), |e| {
            assert!(e.try_ori2r(ArmReg::R0, ArmReg::R1, val), "{val:#010x}");
        });
        let mut acc = 0u32;
        for &w in &words {
            assert_eq!(data_opcode(w), 12, "expected ORR: {w:#010x}");
            acc |= decoded_imm(w);
        }
        assert_eq!(acc, val, "ori2r stream for {val:#010x}");
    }
}

#[test]
fn addi2r_totals_the_constant() {
    let base = 0x1000_0000u32;
    for val in [0x1234u32, 0xFFFF_EDCC, 0xFF, 1, 0x8000] {
        let words = emit_with(CpuFeatures::all(), |e| {
            assert!(e.try_addi2r(ArmReg::R0, ArmReg::R1, val), "{val:#010x}");
        });
        let mut acc = base;
        for &w in &words {
            let imm = decoded_imm(w);
            match data_opcode(w) {
                4 => acc = acc.wrapping_add(imm), // ADD
                2 => acc = acc.wrapping_sub(imm), // SUB
                op => panic!("unexpected opcode {op}: {w:#010x}"),
            }
        }
        assert_eq!(
            acc,
            base.wrapping_add(val),
            "addi2r stream for {val:#010x}"
        );
    }
}

#[test]
fn addi2r_zero_moves_or_elides() {
    let words = emit_with(CpuFeatures::all(), |e| {
        assert!(e.try_addi2r(ArmReg::R0, ArmReg::R0, 0));
    });
    assert!(words.is_empty(), "add #0 onto itself should emit nothing");
    let words = emit_with(CpuFeatures::all(), |e| {
        assert!(e.try_addi2r(ArmReg::R0, ArmReg::R1, 0));
    });
    assert_eq!(words, [0xE1A00001], "add #0 across registers is a move");
}
