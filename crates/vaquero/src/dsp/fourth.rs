//! Fs/4 frequency shifter.
//!
//! Zero-IF tuners leave the wanted signal sitting on DC, where LO leakage
//! and 1/f noise live. Multiplying sample `n` by `j^(-n)` moves the
//! spectrum down by a quarter of the sample rate using only swaps and sign
//! flips. The rotation counter survives across blocks so the shift stays
//! phase-continuous.

use crate::IqSample;

use super::DspBlock;

/// Spectrum shifter by plus or minus Fs/4.
pub struct FourthConverter {
    /// Shift up (+Fs/4) instead of down
    up: bool,
    /// Rotation position, modulo 4
    index: u32,
}

impl FourthConverter {
    /// Create a shifter; `up` selects +Fs/4, otherwise -Fs/4.
    pub fn new(up: bool) -> Self {
        Self { up, index: 0 }
    }
}

impl DspBlock for FourthConverter {
    fn process(&mut self, data: &[IqSample]) -> Vec<IqSample> {
        let mut out = Vec::with_capacity(data.len());
        for &s in data {
            // Multiply by j^(-n) (down) or j^n (up), cycling {1, -j, -1, j}.
            let rotated = match (self.index & 3, self.up) {
                (0, _) => s,
                (1, false) => IqSample::new(s.im, -s.re),
                (2, _) => IqSample::new(-s.re, -s.im),
                (3, false) => IqSample::new(-s.im, s.re),
                (1, true) => IqSample::new(-s.im, s.re),
                (3, true) => IqSample::new(s.im, -s.re),
                _ => unreachable!(),
            };
            out.push(rotated);
            self.index = (self.index + 1) & 3;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dc_becomes_quarter_rate_tone() {
        let mut conv = FourthConverter::new(false);
        let input = vec![IqSample::new(1.0, 0.0); 8];
        let output = conv.process(&input);
        let expected = [
            IqSample::new(1.0, 0.0),
            IqSample::new(0.0, -1.0),
            IqSample::new(-1.0, 0.0),
            IqSample::new(0.0, 1.0),
        ];
        for (i, &s) in output.iter().enumerate() {
            assert_eq!(s, expected[i & 3]);
        }
    }

    #[test]
    fn test_counter_persists_across_blocks() {
        let mut conv = FourthConverter::new(false);
        let ones = vec![IqSample::new(1.0, 0.0); 3];
        let first = conv.process(&ones);
        let second = conv.process(&ones);
        // Continuation of the same {1, -j, -1, j} cycle.
        assert_eq!(first[2], IqSample::new(-1.0, 0.0));
        assert_eq!(second[0], IqSample::new(0.0, 1.0));
        assert_eq!(second[1], IqSample::new(1.0, 0.0));
    }

    #[test]
    fn test_four_applications_are_identity() {
        let input: Vec<IqSample> = (0..32)
            .map(|i| IqSample::new((i as f32 * 0.3).cos(), (i as f32 * 0.3).sin()))
            .collect();

        let mut block = input.clone();
        for _ in 0..4 {
            let mut conv = FourthConverter::new(false);
            block = conv.process(&block);
        }
        for (a, b) in block.iter().zip(&input) {
            assert!((a - b).norm() < 1e-6);
        }
    }

    #[test]
    fn test_up_then_down_is_identity() {
        let input: Vec<IqSample> = (0..16)
            .map(|i| IqSample::new(i as f32, -(i as f32)))
            .collect();
        let mut down = FourthConverter::new(false);
        let mut up = FourthConverter::new(true);
        let output = up.process(&down.process(&input));
        for (a, b) in output.iter().zip(&input) {
            assert!((a - b).norm() < 1e-6);
        }
    }
}
