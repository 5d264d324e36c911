//! Host CPU capability bag.
//!
//! The emitters query this before packing any encoding that is
//! conditional on hardware support; emitting an instruction the bag says
//! is absent panics, since the selector should have checked first.

#[derive(Debug, Clone, Copy)]
pub struct CpuFeatures {
    /// ARMv7 base ISA (MOVW/MOVT, UBFX/BFI and friends).
    pub have_armv7: bool,
    /// Hardware integer divide (SDIV/UDIV).
    pub have_idiv: bool,
    /// VFPv3 (required for the 8-bit float-immediate VMOV form).
    pub have_vfpv3: bool,
    pub have_neon: bool,
    /// AVX on x86 hosts (VEX-encoded scalar float ops).
    pub have_avx: bool,
}

impl CpuFeatures {
    /// Everything present. What tests and modern hosts use.
    pub fn all() -> CpuFeatures {
        CpuFeatures {
            have_armv7: true,
            have_idiv: true,
            have_vfpv3: true,
            have_neon: true,
            have_avx: true,
        }
    }

    /// A pre-divide ARMv7 profile, for exercising the gated paths.
    pub fn armv7_no_idiv() -> CpuFeatures {
        CpuFeatures {
            have_idiv: false,
            ..CpuFeatures::all()
        }
    }
}

impl Default for CpuFeatures {
    fn default() -> Self {
        CpuFeatures::all()
    }
}
