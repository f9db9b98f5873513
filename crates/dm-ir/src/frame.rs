//! Interleaved stereo output sample.

/// A stereo output sample pair (16-bit signed, left then right).
///
/// This is the unit the AI drains: one `Frame` is one 32-bit word in the
/// output buffers, so every buffer length in this workspace counts frames.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    pub left: i16,
    pub right: i16,
}

const _: () = assert!(core::mem::size_of::<Frame>() == 4);

impl Frame {
    /// Create a silent frame.
    pub const fn silence() -> Self {
        Self { left: 0, right: 0 }
    }

    /// Create a mono frame (same value for both channels).
    pub const fn mono(value: i16) -> Self {
        Self {
            left: value,
            right: value,
        }
    }

    /// Build a frame from 32-bit accumulators, saturating to the i16 range.
    pub fn saturating(left: i32, right: i32) -> Self {
        Self {
            left: left.clamp(-32768, 32767) as i16,
            right: right.clamp(-32768, 32767) as i16,
        }
    }

    /// True if both channels are zero.
    pub fn is_silent(&self) -> bool {
        self.left == 0 && self.right == 0
    }
}
