//! Stride sampling of frame sequences.
//!
//! Bounds the number of images sent to the vision model: every Nth frame
//! starting at index 0, order preserved.

use super::EncodedFrame;

/// Select every `stride`-th frame starting at index 0.
///
/// A sequence shorter than the stride still yields its first frame; an
/// empty sequence yields an empty result. A stride of 0 is treated as 1.
pub fn sample_stride(frames: &[EncodedFrame], stride: usize) -> Vec<EncodedFrame> {
    let stride = stride.max(1);
    frames.iter().step_by(stride).cloned().collect()
}
