//! First-order IIR filters for the audio path.

/// Single-pole low-pass used for deemphasis.
///
/// FM and AM broadcast transmitters boost high frequencies before
/// modulation; this filter applies the inverse tilt. The time constant is
/// given in samples (`tau_us * sample_rate * 1e-6`); a non-positive time
/// constant yields the identity filter.
pub struct Deemphasis {
    a1: f64,
    b0: f64,
    y1: f64,
}

impl Deemphasis {
    pub fn new(timeconst_samples: f64) -> Self {
        let (a1, b0) = if timeconst_samples > 0.0 {
            let a1 = (-1.0 / timeconst_samples).exp();
            (a1, 1.0 - a1)
        } else {
            (0.0, 1.0)
        };
        Self { a1, b0, y1: 0.0 }
    }

    pub fn process_inplace(&mut self, samples: &mut [f64]) {
        for s in samples.iter_mut() {
            let y = self.b0 * *s + self.a1 * self.y1;
            self.y1 = y;
            *s = y;
        }
    }
}

/// First-order DC blocking high-pass.
///
/// `y[n] = x[n] - x[n-1] + (1 - cutoff) * y[n-1]`, with `cutoff` the
/// normalized corner (1e-4 is 4.8 Hz at 48 kHz).
pub struct DcBlocker {
    r: f64,
    x1: f64,
    y1: f64,
}

impl DcBlocker {
    pub fn new(cutoff: f64) -> Self {
        Self {
            r: 1.0 - cutoff,
            x1: 0.0,
            y1: 0.0,
        }
    }

    pub fn process_inplace(&mut self, samples: &mut [f64]) {
        for s in samples.iter_mut() {
            let y = *s - self.x1 + self.r * self.y1;
            self.x1 = *s;
            self.y1 = y;
            *s = y;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_deemphasis_zero_tau_is_identity() {
        let mut filter = Deemphasis::new(0.0);
        let mut block: Vec<f64> = (0..100).map(|n| (n as f64 * 0.37).sin()).collect();
        let original = block.clone();
        filter.process_inplace(&mut block);
        assert_eq!(block, original);
    }

    #[test]
    fn test_deemphasis_dc_gain_is_unity() {
        // 50 us at 384 kHz
        let mut filter = Deemphasis::new(50e-6 * 384_000.0);
        let mut block = vec![0.5; 2000];
        filter.process_inplace(&mut block);
        assert_relative_eq!(block[1999], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_deemphasis_attenuates_highs() {
        let fs = 384_000.0;
        let mut filter = Deemphasis::new(50e-6 * fs);
        let mut tone: Vec<f64> = (0..8000)
            .map(|n| (2.0 * PI * 15_000.0 * n as f64 / fs).sin())
            .collect();
        filter.process_inplace(&mut tone);
        let peak = tone[4000..].iter().fold(0.0f64, |a, &b| a.max(b.abs()));
        // |H| at 15 kHz with tau = 50 us is about 0.21
        assert!(peak < 0.3, "peak {}", peak);
        assert!(peak > 0.1, "peak {}", peak);
    }

    #[test]
    fn test_dc_blocker_removes_offset_keeps_tone() {
        let mut filter = DcBlocker::new(1e-4);
        let mut block: Vec<f64> = (0..50_000)
            .map(|n| 0.7 + (2.0 * PI * 1_000.0 * n as f64 / 48_000.0).sin())
            .collect();
        filter.process_inplace(&mut block);
        let tail = &block[40_000..];
        let mean: f64 = tail.iter().sum::<f64>() / tail.len() as f64;
        assert!(mean.abs() < 0.01, "residual offset {}", mean);
        let peak = tail.iter().fold(0.0f64, |a, &b| a.max(b.abs()));
        assert_relative_eq!(peak, 1.0, epsilon = 0.05);
    }
}
