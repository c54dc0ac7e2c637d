//! Loudness compressor
//!
//! Downward compressor used to even out loudness differences in live media
//! playback. The default curve is deliberately aggressive: a low threshold
//! with a wide soft knee and a high ratio pulls loud passages down hard while
//! leaving very quiet material untouched, which is what "same perceived
//! volume across items" needs in practice.

/// Default threshold in dB.
pub const DEFAULT_THRESHOLD_DB: f32 = -50.0;
/// Default knee width in dB.
pub const DEFAULT_KNEE_DB: f32 = 40.0;
/// Default compression ratio.
pub const DEFAULT_RATIO: f32 = 12.0;
/// Default attack time in seconds (instant).
pub const DEFAULT_ATTACK_SECS: f32 = 0.0;
/// Default release time in seconds.
pub const DEFAULT_RELEASE_SECS: f32 = 0.25;

/// One-pole coefficient for the applied-gain smoother (zipper suppression).
const GAIN_SMOOTH_COEFF: f32 = 0.995;

/// Compression curve parameters.
///
/// Values outside the legal ranges are clamped on construction; see
/// [`CompressorParams::clamped`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressorParams {
    /// Threshold in dB (-100 to 0).
    pub threshold_db: f32,
    /// Knee width in dB (0 to 40).
    pub knee_db: f32,
    /// Compression ratio (1 to 20).
    pub ratio: f32,
    /// Attack time in seconds (0 to 1). Zero means instant.
    pub attack_secs: f32,
    /// Release time in seconds (0 to 1). Zero means instant.
    pub release_secs: f32,
}

impl Default for CompressorParams {
    fn default() -> Self {
        Self {
            threshold_db: DEFAULT_THRESHOLD_DB,
            knee_db: DEFAULT_KNEE_DB,
            ratio: DEFAULT_RATIO,
            attack_secs: DEFAULT_ATTACK_SECS,
            release_secs: DEFAULT_RELEASE_SECS,
        }
    }
}

impl CompressorParams {
    /// Clamp every field to its legal range.
    pub fn clamped(self) -> Self {
        Self {
            threshold_db: self.threshold_db.clamp(-100.0, 0.0),
            knee_db: self.knee_db.clamp(0.0, 40.0),
            ratio: self.ratio.clamp(1.0, 20.0),
            attack_secs: self.attack_secs.clamp(0.0, 1.0),
            release_secs: self.release_secs.clamp(0.0, 1.0),
        }
    }
}

/// Soft-knee dynamics compressor with linked-stereo peak detection.
///
/// Processes interleaved stereo f32 in place. Makeup gain is not part of
/// this stage; the processing chain applies it in a separate gain node.
pub struct Compressor {
    sample_rate: f32,
    params: CompressorParams,

    // Computed time constants
    attack_coeff: f32,
    release_coeff: f32,

    // Envelope follower state, in the gain domain (1.0 = no reduction)
    envelope: f32,

    // Smoothed applied gain
    gain_smooth: f32,

    // Metering
    current_gr_db: f32,
}

impl Compressor {
    /// Create a compressor for the given sample rate.
    pub fn new(sample_rate: f32, params: CompressorParams) -> Self {
        let params = params.clamped();
        let mut comp = Self {
            sample_rate,
            params,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            envelope: 1.0,
            gain_smooth: 1.0,
            current_gr_db: 0.0,
        };
        comp.update_coefficients();
        comp
    }

    /// The curve this compressor was built with (after clamping).
    pub fn params(&self) -> CompressorParams {
        self.params
    }

    /// Current gain reduction in dB (for metering).
    pub fn gain_reduction_db(&self) -> f32 {
        self.current_gr_db
    }

    /// Update time constants from the attack/release parameters.
    fn update_coefficients(&mut self) {
        self.attack_coeff = Self::time_to_coeff(self.sample_rate, self.params.attack_secs);
        self.release_coeff = Self::time_to_coeff(self.sample_rate, self.params.release_secs);
    }

    /// Convert a time constant in seconds to a one-pole coefficient.
    /// A zero time constant yields an instant (coefficient 0) response.
    #[inline]
    fn time_to_coeff(sample_rate: f32, secs: f32) -> f32 {
        if secs <= 0.0 {
            return 0.0;
        }
        (-1.0 / (sample_rate * secs)).exp()
    }

    /// Convert dB to linear
    #[inline]
    fn db_to_linear(db: f32) -> f32 {
        10.0f32.powf(db / 20.0)
    }

    /// Convert linear to dB
    #[inline]
    fn linear_to_db(linear: f32) -> f32 {
        if linear > 1e-10 {
            20.0 * linear.log10()
        } else {
            -200.0
        }
    }

    /// Compute gain reduction with soft knee
    #[inline]
    fn compute_gain_reduction(&self, input_db: f32) -> f32 {
        let threshold = self.params.threshold_db;
        let ratio = self.params.ratio;
        let knee = self.params.knee_db;

        if input_db < threshold - knee / 2.0 {
            // Below knee - no compression
            0.0
        } else if input_db > threshold + knee / 2.0 {
            // Above knee - full compression
            threshold + (input_db - threshold) / ratio - input_db
        } else {
            // In knee - soft transition
            let knee_start = threshold - knee / 2.0;
            let x = input_db - knee_start;
            // Quadratic knee curve
            (1.0 / ratio - 1.0) * (x * x) / (2.0 * knee)
        }
    }

    /// Process a single stereo sample pair
    #[inline]
    fn process_sample(&mut self, left: f32, right: f32) -> (f32, f32) {
        // Peak detection, linked stereo
        let peak = left.abs().max(right.abs());
        let peak_db = Self::linear_to_db(peak);

        // Target gain for this input level
        let gr_db = self.compute_gain_reduction(peak_db);
        let target_gain = Self::db_to_linear(gr_db);

        // Envelope follower: attack when the gain must drop, release when
        // it may recover
        let coeff = if target_gain < self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope = coeff * self.envelope + (1.0 - coeff) * target_gain;

        // Smooth the applied gain to avoid zipper noise on instant attack
        self.gain_smooth =
            GAIN_SMOOTH_COEFF * self.gain_smooth + (1.0 - GAIN_SMOOTH_COEFF) * self.envelope;

        // Update metering
        self.current_gr_db = Self::linear_to_db(self.gain_smooth);

        (left * self.gain_smooth, right * self.gain_smooth)
    }

    /// Process interleaved stereo samples in place.
    pub fn process(&mut self, samples: &mut [f32]) {
        for frame in samples.chunks_exact_mut(2) {
            let (out_l, out_r) = self.process_sample(frame[0], frame[1]);
            frame[0] = out_l;
            frame[1] = out_r;
        }
    }

    /// Clear envelope and smoothing state.
    pub fn reset(&mut self) {
        self.envelope = 1.0;
        self.gain_smooth = 1.0;
        self.current_gr_db = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressor_creation() {
        let comp = Compressor::new(48000.0, CompressorParams::default());
        assert!((comp.params().threshold_db - (-50.0)).abs() < 0.01);
        assert!((comp.params().knee_db - 40.0).abs() < 0.01);
        assert!((comp.params().ratio - 12.0).abs() < 0.01);
        assert!((comp.params().release_secs - 0.25).abs() < 0.001);
        // Instant attack maps to a zero coefficient
        assert_eq!(comp.attack_coeff, 0.0);
    }

    #[test]
    fn test_parameter_clamping() {
        let params = CompressorParams {
            threshold_db: -200.0,
            knee_db: 90.0,
            ratio: 50.0,
            attack_secs: -1.0,
            release_secs: 5.0,
        };
        let comp = Compressor::new(48000.0, params);

        assert!((comp.params().threshold_db - (-100.0)).abs() < 0.01);
        assert!((comp.params().knee_db - 40.0).abs() < 0.01);
        assert!((comp.params().ratio - 20.0).abs() < 0.01);
        assert!((comp.params().attack_secs - 0.0).abs() < 0.001);
        assert!((comp.params().release_secs - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_very_quiet_signal_passes_through() {
        let mut comp = Compressor::new(48000.0, CompressorParams::default());

        // -80 dB sits below the knee start (-70 dB), so the gain stays unity
        let mut samples: Vec<f32> = vec![1e-4; 512];
        let original = samples.clone();
        comp.process(&mut samples);

        assert_eq!(samples, original);
    }

    #[test]
    fn test_loud_signal_heavily_reduced() {
        let mut comp = Compressor::new(48000.0, CompressorParams::default());

        // 0.9 is roughly -0.9 dBFS, far above the -50 dB threshold; the
        // default 12:1 curve should pull it down by tens of dB once the
        // gain smoother settles
        let mut samples: Vec<f32> = vec![0.9; 4096];
        comp.process(&mut samples);

        let tail = samples[samples.len() - 1].abs();
        assert!(tail < 0.02, "expected heavy reduction, got {tail}");
        assert!(
            comp.gain_reduction_db() < -20.0,
            "expected deep gain reduction, got {} dB",
            comp.gain_reduction_db()
        );
    }

    #[test]
    fn test_release_recovers_slowly() {
        let mut comp = Compressor::new(48000.0, CompressorParams::default());

        let mut loud: Vec<f32> = vec![0.9; 2048];
        comp.process(&mut loud);
        let reduced_db = comp.gain_reduction_db();

        // A short quiet stretch is not enough for a 250 ms release to let
        // the gain back up
        let mut quiet: Vec<f32> = vec![1e-4; 200];
        comp.process(&mut quiet);

        assert!(reduced_db < -20.0);
        assert!(
            comp.gain_reduction_db() < -10.0,
            "release recovered too fast: {} dB",
            comp.gain_reduction_db()
        );
    }

    #[test]
    fn test_soft_knee_curve() {
        let comp = Compressor::new(48000.0, CompressorParams::default());

        // Below the knee: no reduction
        assert_eq!(comp.compute_gain_reduction(-80.0), 0.0);

        // Above the knee: full-ratio slope
        let gr = comp.compute_gain_reduction(-10.0);
        let expected = -50.0 + (-10.0 + 50.0) / 12.0 - (-10.0);
        assert!((gr - expected).abs() < 0.001, "got {gr}, expected {expected}");

        // Inside the knee: between the two
        let gr_knee = comp.compute_gain_reduction(-50.0);
        assert!(gr_knee < 0.0 && gr_knee > expected);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut comp = Compressor::new(48000.0, CompressorParams::default());

        let mut samples: Vec<f32> = vec![0.9; 2048];
        comp.process(&mut samples);
        assert!(comp.gain_reduction_db() < -20.0);

        comp.reset();
        assert_eq!(comp.gain_reduction_db(), 0.0);

        // Unity gain again right away
        let mut quiet = vec![1e-4f32; 4];
        let original = quiet.clone();
        comp.process(&mut quiet);
        assert_eq!(quiet, original);
    }
}
