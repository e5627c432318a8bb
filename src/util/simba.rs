use simba::simd::{SimdValue, WideBoolF32x8, WideF32x8};

use crate::geometry::{SimdFloatType, SimdMaskType, WorldVector8};

pub trait SimbaWorkarounds: SimdValue {
    fn is_nan(self) -> Self::SimdBool;

    fn infinity() -> Self;
    fn neg_infinity() -> Self;
}

impl SimbaWorkarounds for WideF32x8 {
    #[inline(always)]
    fn is_nan(self) -> Self::SimdBool {
        WideBoolF32x8(self.0.is_nan())
    }

    #[inline(always)]
    fn infinity() -> Self {
        Self::splat(f32::INFINITY)
    }

    #[inline(always)]
    fn neg_infinity() -> Self {
        Self::splat(f32::NEG_INFINITY)
    }
}

/// Lanewise minimum, NaN handling is unspecified.
#[inline(always)]
pub fn fast_min(a: SimdFloatType, b: SimdFloatType) -> SimdFloatType {
    WideF32x8(a.0.fast_min(b.0))
}

/// Lanewise maximum, NaN handling is unspecified.
#[inline(always)]
pub fn fast_max(a: SimdFloatType, b: SimdFloatType) -> SimdFloatType {
    WideF32x8(a.0.fast_max(b.0))
}

/// Bit mask of lanes where the mask is set, lane 0 is the lowest bit.
#[inline(always)]
pub fn lane_bits(mask: SimdMaskType) -> u64 {
    mask.0.move_mask() as u64
}

pub fn fma_dot(a: &WorldVector8, b: &WorldVector8) -> SimdFloatType {
    WideF32x8(a.z.0.mul_add(b.z.0, a.y.0.mul_add(b.y.0, a.x.0 * b.x.0)))
}
