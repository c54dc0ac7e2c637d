//! Makeup gain stage
//!
//! Flat gain applied after compression. The processing chain keeps makeup
//! separate from the compressor so the curve and the level trim stay
//! independent. Unity by default.

/// Lowest allowed gain (mute).
pub const MIN_GAIN: f32 = 0.0;
/// Highest allowed gain (+12 dB).
pub const MAX_GAIN: f32 = 4.0;

/// Fixed multiplier over interleaved stereo samples.
pub struct GainStage {
    gain: f32,
}

impl GainStage {
    /// Create a gain stage, clamping into the legal range.
    pub fn new(gain: f32) -> Self {
        Self {
            gain: gain.clamp(MIN_GAIN, MAX_GAIN),
        }
    }

    /// The applied gain factor.
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Scale samples in place. Unity gain leaves the buffer untouched.
    #[inline]
    pub fn process(&mut self, samples: &mut [f32]) {
        if (self.gain - 1.0).abs() < f32::EPSILON {
            return;
        }
        for sample in samples.iter_mut() {
            *sample *= self.gain;
        }
    }
}
