//! Fractional delay line
//!
//! Fixed-capacity circular buffer of normalized samples. Index arithmetic
//! stays private; callers only see `write`, the two read flavors and `clear`.

/// Circular sample buffer with integer and linearly interpolated reads
///
/// `read(0)` returns the most recently written sample and `read(d)` the
/// sample written `d` writes before that. Delays at or past the capacity are
/// clamped to `capacity - 1`, so reads never leave the buffer.
#[derive(Debug, Clone)]
pub struct FractionalDelayLine {
    buffer: Vec<f32>,
    write_index: usize,
}

impl FractionalDelayLine {
    /// Create a zero-filled delay line
    ///
    /// # Arguments
    /// * `capacity` - Number of samples held (at least 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity.max(1)],
            write_index: 0,
        }
    }

    /// Number of samples the line holds
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Store a sample and advance the write position
    #[inline]
    pub fn write(&mut self, sample: f32) {
        self.buffer[self.write_index] = sample;
        self.write_index = (self.write_index + 1) % self.buffer.len();
    }

    /// Read the sample written `delay` writes before the latest one
    #[inline]
    pub fn read(&self, delay: usize) -> f32 {
        let len = self.buffer.len();
        let delay = delay.min(len - 1);
        // write_index points one past the latest sample
        let index = (self.write_index + len - 1 - delay) % len;
        self.buffer[index]
    }

    /// Read at a fractional delay using linear interpolation
    ///
    /// At an integer delay this returns exactly `read(delay)`.
    #[inline]
    pub fn read_interpolated(&self, delay: f32) -> f32 {
        let max = (self.buffer.len() - 1) as f32;
        let delay = if delay.is_nan() { 0.0 } else { delay.clamp(0.0, max) };
        let whole = delay.floor();
        let frac = delay - whole;
        let index = whole as usize;
        let a = self.read(index);
        if frac == 0.0 {
            return a;
        }
        let b = self.read(index + 1);
        a + (b - a) * frac
    }

    /// The sample the next `write` replaces (a delay of exactly `capacity`)
    #[inline]
    pub fn oldest(&self) -> f32 {
        self.buffer[self.write_index]
    }

    /// Zero the storage and rewind the write position
    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn filled(capacity: usize, count: usize) -> FractionalDelayLine {
        let mut line = FractionalDelayLine::new(capacity);
        for i in 0..count {
            line.write(i as f32);
        }
        line
    }

    #[test]
    fn test_read_returns_past_writes() {
        let line = filled(8, 5);
        assert_eq!(line.read(0), 4.0);
        assert_eq!(line.read(1), 3.0);
        assert_eq!(line.read(4), 0.0);
    }

    #[test]
    fn test_read_clamps_to_capacity() {
        let line = filled(4, 10);
        // Holds 6, 7, 8, 9
        assert_eq!(line.read(3), 6.0);
        assert_eq!(line.read(4), line.read(3));
        assert_eq!(line.read(1000), line.read(3));
    }

    #[test]
    fn test_interpolation_identity_at_integers() {
        let line = filled(16, 16);
        for d in 0..16 {
            assert_eq!(line.read_interpolated(d as f32), line.read(d));
        }
    }

    #[test]
    fn test_interpolation_between_samples() {
        let line = filled(8, 8);
        // read(1) = 6, read(2) = 5
        assert_relative_eq!(line.read_interpolated(1.25), 5.75);
        assert_relative_eq!(line.read_interpolated(-3.0), 7.0);
    }

    #[test]
    fn test_interpolated_read_clamps_to_capacity() {
        let line = filled(4, 10);
        assert_eq!(line.read_interpolated(3.0), 6.0);
        assert_eq!(line.read_interpolated(3.5), 6.0);
        assert_eq!(line.read_interpolated(1e9), 6.0);
        assert_eq!(line.read_interpolated(f32::INFINITY), 6.0);
        assert_eq!(line.read_interpolated(f32::NEG_INFINITY), 9.0);
        assert_eq!(line.read_interpolated(f32::NAN), 9.0);
    }

    #[test]
    fn test_oldest_is_full_capacity_delay() {
        let mut line = FractionalDelayLine::new(3);
        line.write(1.0);
        line.write(2.0);
        line.write(3.0);
        assert_eq!(line.oldest(), 1.0);
        assert_eq!(line.oldest(), line.read(2));
    }

    #[test]
    fn test_clear() {
        let mut line = filled(8, 8);
        line.clear();
        assert!((0..8).all(|d| line.read(d) == 0.0));
        line.write(9.0);
        assert_eq!(line.read(0), 9.0);
    }

    #[test]
    fn test_zero_capacity_is_promoted() {
        let mut line = FractionalDelayLine::new(0);
        assert_eq!(line.capacity(), 1);
        line.write(0.5);
        assert_eq!(line.read(0), 0.5);
        assert_eq!(line.read(7), 0.5);
    }
}
