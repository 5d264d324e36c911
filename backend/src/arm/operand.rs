//! The flexible second operand of ARM data-processing instructions.
//!
//! An `Operand2` is either an 8-bit immediate with a 4-bit even rotation,
//! a plain register, or a register run through the barrel shifter. Each
//! variant knows its own 12-bit field encoding; the instruction decides
//! the I bit from the variant, so a wrong-form operand cannot be packed
//! silently.

use super::regs::{ArmReg, ShiftType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand2 {
    /// `value` rotated right by `rotation * 2`.
    Imm { value: u8, rotation: u8 },
    Reg(ArmReg),
    /// Register shifted by a constant amount.
    ShiftedRegImm {
        base: ArmReg,
        shift: ShiftType,
        amount: u8,
    },
    /// Register shifted by another register.
    ShiftedRegReg {
        base: ArmReg,
        shift: ShiftType,
        reg: ArmReg,
    },
}

impl Operand2 {
    /// Shifted-register operand with an immediate amount, checking the
    /// per-shift amount rules (LSL 0..31, LSR/ASR 1..32, ROR 1..31).
    pub fn shifted(base: ArmReg, shift: ShiftType, amount: u8) -> Operand2 {
        let encoded = match shift {
            ShiftType::Lsl => {
                assert!(amount < 32, "LSL amount out of range: {amount}");
                amount
            }
            ShiftType::Lsr | ShiftType::Asr => {
                assert!(
                    amount >= 1 && amount <= 32,
                    "LSR/ASR amount out of range: {amount}"
                );
                // 32 encodes as 0.
                amount & 31
            }
            ShiftType::Ror => {
                assert!(
                    amount >= 1 && amount < 32,
                    "ROR amount out of range: {amount}"
                );
                amount
            }
        };
        Operand2::ShiftedRegImm {
            base,
            shift,
            amount: encoded,
        }
    }

    /// The 12-bit operand field.
    pub fn encode(self) -> u32 {
        match self {
            Operand2::Imm { value, rotation } => {
                debug_assert!(rotation < 16);
                (rotation as u32) << 8 | value as u32
            }
            Operand2::Reg(r) => r.bits(),
            Operand2::ShiftedRegImm {
                base,
                shift,
                amount,
            } => (amount as u32) << 7 | (shift as u32) << 5 | base.bits(),
            Operand2::ShiftedRegReg { base, shift, reg } => {
                reg.bits() << 8 | (shift as u32) << 5 | 1 << 4 | base.bits()
            }
        }
    }

    /// Whether the instruction's I bit must be set for this operand.
    pub fn is_imm(self) -> bool {
        matches!(self, Operand2::Imm { .. })
    }

    /// The immediate this operand decodes to. Panics on register forms.
    pub fn imm_value(self) -> u32 {
        match self {
            Operand2::Imm { value, rotation } => {
                (value as u32).rotate_right(rotation as u32 * 2)
            }
            other => panic!("imm_value on register operand {other:?}"),
        }
    }

    /// Try to express `imm` as an 8-bit value with an even rotation.
    /// Rotations are tried in ascending order, so the canonical lowest
    /// rotation wins.
    pub fn try_from_imm(imm: u32) -> Option<Operand2> {
        for rotation in 0..16u32 {
            let mask = 0xFFu32.rotate_right(rotation * 2);
            if imm & mask == imm {
                return Some(Operand2::Imm {
                    value: imm.rotate_left(rotation * 2) as u8,
                    rotation: rotation as u8,
                });
            }
        }
        None
    }

    /// Direct encoding first, then the bitwise complement. The returned
    /// flag is true when the caller must substitute the complementary
    /// opcode (MOV/MVN, AND/BIC).
    pub fn try_from_imm_inverse(imm: u32) -> Option<(Operand2, bool)> {
        if let Some(op2) = Operand2::try_from_imm(imm) {
            return Some((op2, false));
        }
        Operand2::try_from_imm(!imm).map(|op2| (op2, true))
    }

    /// Direct encoding first, then arithmetic negation, for opcode pairs
    /// like ADD/SUB and CMP/CMN.
    pub fn try_from_imm_negated(imm: u32) -> Option<(Operand2, bool)> {
        if let Some(op2) = Operand2::try_from_imm(imm) {
            return Some((op2, false));
        }
        Operand2::try_from_imm(imm.wrapping_neg()).map(|op2| (op2, true))
    }

    /// Immediate the caller has asserted is representable.
    pub fn from_imm(imm: u32) -> Operand2 {
        match Operand2::try_from_imm(imm) {
            Some(op2) => op2,
            None => panic!("immediate {imm:#010x} not encodable as Operand2"),
        }
    }
}

/// VFP 8-bit float immediate: representable only when the low 19
/// mantissa bits are zero and exponent bits 25..30 are all the complement
/// of bit 30. Packs sign, inverted bit 30, and the remaining six bits.
pub fn try_make_float_imm8(val: f32) -> Option<u8> {
    let bits = val.to_bits();
    if bits & 0x0007_FFFF != 0 {
        return None;
    }
    let bit6 = bits & 0x4000_0000 != 0;
    let mut mask = 0x2000_0000u32;
    while mask >= 0x0200_0000 {
        if (bits & mask == mask) == bit6 {
            return None;
        }
        mask >>= 1;
    }
    let mut imm8 = (bits & 0x8000_0000) >> 24;
    imm8 |= (!bit6 as u32) << 6;
    imm8 |= (bits & 0x01F8_0000) >> 19;
    Some(imm8 as u8)
}
