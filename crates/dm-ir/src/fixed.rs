//! Fixed-point formats shared with the mixing coprocessor.
//!
//! All conversions from `f32` truncate toward zero and saturate at the
//! edges of the representable range (Rust `as` semantics), which matches
//! the float-to-int casts the coprocessor program was written against.

use bytemuck::{Pod, Zeroable};

/// Fractional bits of [`Fx32`]. Must match the coprocessor's position format.
pub const FX32_FRAC: u32 = 12;

/// Signed Q20.12 value used for waveform positions, steps and lengths.
///
/// In a [`ChannelDescriptor`](crate::ChannelDescriptor) these values are
/// additionally shifted left by the sample width shift, so that the integer
/// part counts bytes rather than samples.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
pub struct Fx32(pub i32);

impl Fx32 {
    pub const ZERO: Fx32 = Fx32(0);
    /// Largest representable value; used as the "no end" length sentinel.
    pub const MAX: Fx32 = Fx32(i32::MAX);

    /// Convert from a float, truncating toward zero.
    pub fn from_f32(value: f32) -> Self {
        Fx32((value * (1u32 << FX32_FRAC) as f32) as i32)
    }

    /// Convert an integer sample count, saturating at [`Fx32::MAX`].
    pub fn from_int(value: i32) -> Self {
        Fx32(value.saturating_mul(1 << FX32_FRAC))
    }

    /// Convert back to a float.
    pub fn to_f32(self) -> f32 {
        self.0 as f32 / (1u32 << FX32_FRAC) as f32
    }

    /// Scale by a sample width shift (`<< shift`), saturating.
    pub fn scaled(self, shift: u32) -> Self {
        match self.0.checked_mul(1 << shift) {
            Some(v) => Fx32(v),
            None if self.0 < 0 => Fx32(i32::MIN),
            None => Fx32::MAX,
        }
    }

    /// Integer part after removing a sample width shift.
    pub fn whole(self, shift: u32) -> i32 {
        self.0 >> (FX32_FRAC + shift)
    }

    pub fn raw(self) -> i32 {
        self.0
    }
}

/// Signed Q1.15 channel volume.
///
/// Full scale is `0x7FFF`, one unit below the "1.0" bit pattern, so that
/// a volume of 1.0 never overflows the signed 16-bit lane.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
pub struct Fx15(pub i16);

impl Fx15 {
    pub const ZERO: Fx15 = Fx15(0);
    pub const MAX: Fx15 = Fx15(0x7FFF);

    /// Convert from a float in `[-1.0, 1.0]`; out-of-range values clamp.
    ///
    /// Volumes set through the channel API are in `[0.0, 1.0]`; negative
    /// values only arise from the surround matrix, which encodes phase.
    pub fn from_f32(value: f32) -> Self {
        Fx15((value.clamp(-1.0, 1.0) * 0x7FFF as f32) as i16)
    }

    pub fn to_f32(self) -> f32 {
        self.0 as f32 / 0x7FFF as f32
    }

    pub fn raw(self) -> i16 {
        self.0
    }
}

/// Unsigned Q0.16 master volume.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
pub struct Fx16(pub u16);

impl Fx16 {
    pub const MAX: Fx16 = Fx16(0xFFFF);

    /// Convert from a float in `[0.0, 1.0]`; out-of-range values clamp.
    pub fn from_f32(value: f32) -> Self {
        Fx16((value.clamp(0.0, 1.0) * 0xFFFF as f32) as u16)
    }

    pub fn to_f32(self) -> f32 {
        self.0 as f32 / 0xFFFF as f32
    }

    pub fn raw(self) -> u16 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fx32_one_is_4096() {
        assert_eq!(Fx32::from_f32(1.0).raw(), 4096);
        assert_eq!(Fx32::from_int(3).raw(), 3 * 4096);
        assert_eq!(Fx32::from_f32(0.5).whole(0), 0);
        assert_eq!(Fx32::from_f32(2.75).whole(0), 2);
    }

    #[test]
    fn fx32_truncates_toward_zero() {
        // 1/4096 is the smallest step; anything below truncates to zero.
        assert_eq!(Fx32::from_f32(0.0001).raw(), 0);
        assert_eq!(Fx32::from_f32(-0.0001).raw(), 0);
    }

    #[test]
    fn fx32_scaled_saturates() {
        assert_eq!(Fx32::from_int(100).scaled(1).whole(1), 100);
        assert_eq!(Fx32(i32::MAX / 2 + 1).scaled(1), Fx32::MAX);
        assert_eq!(Fx32::from_int(i32::MAX), Fx32::MAX);
    }

    #[test]
    fn fx15_full_scale_is_one_below_top_bit() {
        assert_eq!(Fx15::from_f32(1.0), Fx15::MAX);
        assert_eq!(Fx15::from_f32(1.0).raw(), 0x7FFF);
        assert_ne!(Fx15::from_f32(1.0).raw() as u16, 0x8000);
        assert_eq!(Fx15::from_f32(7.0).raw(), 0x7FFF);
        assert_eq!(Fx15::from_f32(0.0).raw(), 0);
    }

    #[test]
    fn fx16_clamps() {
        assert_eq!(Fx16::from_f32(1.0), Fx16::MAX);
        assert_eq!(Fx16::from_f32(-1.0).raw(), 0);
        assert_eq!(Fx16::from_f32(0.5).raw(), 0x7FFF);
    }
}
