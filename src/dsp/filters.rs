//! Reverb building blocks
//!
//! Comb, all-pass and early-reflection filters. Each one owns its delay line
//! and works sample by sample on normalized floats.

use super::delay_line::FractionalDelayLine;

// ============================================================================
// Constants
// ============================================================================

/// Number of early-reflection taps
pub const NUM_TAPS: usize = 8;

/// Early-reflection buffer length in seconds
const EARLY_BUFFER_SECS: f32 = 0.05;

/// Base early-reflection delay per unit room size, in seconds
const EARLY_BASE_SECS: f32 = 0.01;

/// Tap delay multipliers (relative to the base delay)
const TAP_DELAYS: [f32; NUM_TAPS] = [0.5, 0.8, 1.2, 1.8, 2.3, 2.9, 3.5, 4.2];

/// Tap gains (scaled by room size)
const TAP_GAINS: [f32; NUM_TAPS] = [0.8, 0.6, 0.7, 0.5, 0.4, 0.3, 0.25, 0.2];

// ============================================================================
// Comb Filter
// ============================================================================

/// Feedback comb filter with one-pole lowpass damping in the loop
///
/// Models one decaying resonant reflection. The delay equals the line
/// capacity.
#[derive(Debug, Clone)]
pub struct CombFilter {
    line: FractionalDelayLine,
    feedback: f32,
    damping: f32,
    filter_state: f32,
}

impl CombFilter {
    /// Create a comb filter
    ///
    /// # Arguments
    /// * `delay_samples` - Loop length (at least 1)
    /// * `feedback` - Loop gain, clamped to 0-0.99
    /// * `damping` - Lowpass amount, clamped to 0-1
    pub fn new(delay_samples: usize, feedback: f32, damping: f32) -> Self {
        let mut comb = Self {
            line: FractionalDelayLine::new(delay_samples),
            feedback: 0.0,
            damping: 0.0,
            filter_state: 0.0,
        };
        comb.set_feedback(feedback);
        comb.set_damping(damping);
        comb
    }

    /// Process a single sample
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let delayed = self.line.oldest();
        self.filter_state = delayed * (1.0 - self.damping) + self.filter_state * self.damping;
        self.line.write(input + self.filter_state * self.feedback);
        delayed
    }

    pub fn set_feedback(&mut self, feedback: f32) {
        self.feedback = feedback.clamp(0.0, 0.99);
    }

    pub fn set_damping(&mut self, damping: f32) {
        self.damping = damping.clamp(0.0, 1.0);
    }

    pub fn feedback(&self) -> f32 {
        self.feedback
    }

    pub fn damping(&self) -> f32 {
        self.damping
    }

    pub fn delay_samples(&self) -> usize {
        self.line.capacity()
    }

    /// Clear the filter state
    pub fn clear(&mut self) {
        self.line.clear();
        self.filter_state = 0.0;
    }
}

// ============================================================================
// All-pass Filter
// ============================================================================

/// Schroeder all-pass filter
///
/// Implements: y[n] = -g*x[n] + d[n], d written as x[n] + g*d[n]
#[derive(Debug, Clone)]
pub struct AllPassFilter {
    line: FractionalDelayLine,
    gain: f32,
}

impl AllPassFilter {
    /// Create an all-pass filter
    ///
    /// # Arguments
    /// * `delay_samples` - Delay length (at least 1)
    /// * `gain` - Coefficient, clamped to -0.99-0.99
    pub fn new(delay_samples: usize, gain: f32) -> Self {
        let mut allpass = Self {
            line: FractionalDelayLine::new(delay_samples),
            gain: 0.0,
        };
        allpass.set_gain(gain);
        allpass
    }

    /// Process a single sample
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let delayed = self.line.oldest();
        let output = -self.gain * input + delayed;
        self.line.write(input + self.gain * delayed);
        output
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(-0.99, 0.99);
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn delay_samples(&self) -> usize {
        self.line.capacity()
    }

    pub fn clear(&mut self) {
        self.line.clear();
    }
}

// ============================================================================
// Early Reflections
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct Tap {
    delay: usize,
    gain: f32,
}

/// Eight-tap delay approximating the first wall reflections of a room
#[derive(Debug, Clone)]
pub struct EarlyReflections {
    line: FractionalDelayLine,
    taps: [Tap; NUM_TAPS],
}

impl EarlyReflections {
    /// Create an early-reflection generator
    ///
    /// # Arguments
    /// * `sample_rate` - Stream sample rate in Hz
    /// * `room_size` - Room size scale (larger rooms spread taps further)
    pub fn new(sample_rate: u32, room_size: f32) -> Self {
        let len = (sample_rate as f32 * EARLY_BUFFER_SECS) as usize;
        let mut early = Self {
            line: FractionalDelayLine::new(len),
            taps: [Tap::default(); NUM_TAPS],
        };
        early.set_room_size(sample_rate, room_size);
        early
    }

    /// Recompute tap delays and gains; taps past the buffer are clamped
    pub fn set_room_size(&mut self, sample_rate: u32, room_size: f32) {
        let base = room_size * EARLY_BASE_SECS;
        let max_delay = self.line.capacity() - 1;
        for (i, tap) in self.taps.iter_mut().enumerate() {
            let delay = (base * TAP_DELAYS[i] * sample_rate as f32).round() as usize;
            tap.delay = delay.min(max_delay);
            tap.gain = TAP_GAINS[i] * room_size;
        }
    }

    /// Process a single sample
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        self.line.write(input);
        let sum: f32 = self
            .taps
            .iter()
            .map(|tap| self.line.read(tap.delay) * tap.gain)
            .sum();
        sum / NUM_TAPS as f32
    }

    /// Tap delays in samples
    pub fn tap_delays(&self) -> [usize; NUM_TAPS] {
        std::array::from_fn(|i| self.taps[i].delay)
    }

    pub fn clear(&mut self) {
        self.line.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_comb_filter_first_output_is_silent() {
        let mut comb = CombFilter::new(10, 0.5, 0.0);
        assert_eq!(comb.process(1.0), 0.0);
    }

    #[test]
    fn test_comb_filter_decay_is_geometric() {
        let delay = 7;
        let feedback = 0.8;
        let mut comb = CombFilter::new(delay, feedback, 0.0);

        let output: Vec<f32> = (0..delay * 6)
            .map(|n| comb.process(if n == 0 { 1.0 } else { 0.0 }))
            .collect();

        // Impulse reappears at every multiple of the delay, scaled by f each time
        for k in 1..6 {
            let expected = feedback.powi(k as i32 - 1);
            assert_abs_diff_eq!(output[k * delay], expected, epsilon = 1e-6);
        }
        // Nothing in between
        assert_eq!(output[delay + 3], 0.0);
    }

    #[test]
    fn test_comb_filter_damping_softens_echoes() {
        let mut bright = CombFilter::new(5, 0.9, 0.0);
        let mut dark = CombFilter::new(5, 0.9, 0.7);
        let mut peak_bright = 0.0f32;
        let mut peak_dark = 0.0f32;
        for n in 0..200 {
            let x = if n == 0 { 1.0 } else { 0.0 };
            let b = bright.process(x);
            let d = dark.process(x);
            if n > 50 {
                peak_bright = peak_bright.max(b.abs());
                peak_dark = peak_dark.max(d.abs());
            }
        }
        assert!(peak_dark < peak_bright);
    }

    #[test]
    fn test_comb_filter_parameter_clamps() {
        let mut comb = CombFilter::new(4, 1.5, -1.0);
        assert_eq!(comb.feedback(), 0.99);
        assert_eq!(comb.damping(), 0.0);
        comb.set_damping(3.0);
        assert_eq!(comb.damping(), 1.0);
    }

    #[test]
    fn test_allpass_impulse_response() {
        let mut allpass = AllPassFilter::new(3, 0.5);
        // First output is -g * input
        assert_abs_diff_eq!(allpass.process(1.0), -0.5);
        assert_eq!(allpass.process(0.0), 0.0);
        assert_eq!(allpass.process(0.0), 0.0);
        // Delayed impulse arrives at n = delay
        assert_abs_diff_eq!(allpass.process(0.0), 1.0);
    }

    #[test]
    fn test_allpass_energy_decays() {
        let delay = 5;
        let gain = 0.7f32;
        let mut allpass = AllPassFilter::new(delay, gain);

        // |g|^k drops below f32 epsilon after this many periods
        let periods = (f32::EPSILON.ln() / gain.ln()).ceil() as usize + 1;
        let total = delay * (periods + 2);
        let output: Vec<f32> = (0..total)
            .map(|n| allpass.process(if n == 0 { 1.0 } else { 0.0 }))
            .collect();

        assert!(output.iter().all(|s| s.abs() <= 1.0));
        let tail = &output[delay * (periods + 1)..];
        assert!(tail.iter().all(|s| s.abs() < f32::EPSILON));
    }

    #[test]
    fn test_allpass_gain_clamp() {
        let allpass = AllPassFilter::new(4, -3.0);
        assert_eq!(allpass.gain(), -0.99);
    }

    #[test]
    fn test_early_reflections_taps_clamped() {
        // Huge room would push taps past the 50 ms buffer
        let early = EarlyReflections::new(48000, 30.0);
        let max = (48000.0 * 0.05) as usize - 1;
        assert!(early.tap_delays().iter().all(|&d| d <= max));
    }

    #[test]
    fn test_early_reflections_tap_schedule() {
        let early = EarlyReflections::new(48000, 1.0);
        // base = 10 ms = 480 samples
        assert_eq!(early.tap_delays()[0], 240);
        assert_eq!(early.tap_delays()[7], 2016);
    }

    #[test]
    fn test_early_reflections_output_scaled() {
        let mut early = EarlyReflections::new(1000, 1.0);
        // base = 10 samples, taps at 5, 8, 12, 18, 23, 29, 35, 42
        let mut output = Vec::new();
        for n in 0..50 {
            output.push(early.process(if n == 0 { 1.0 } else { 0.0 }));
        }
        assert_abs_diff_eq!(output[5], 0.8 / 8.0);
        assert_abs_diff_eq!(output[42], 0.2 / 8.0);
        assert_eq!(output[6], 0.0);
    }
}
