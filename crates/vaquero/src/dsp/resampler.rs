//! Fractional sample-rate conversion.
//!
//! Both converters wrap `rubato`'s fixed-output sinc resampler and carry a
//! leftover buffer, feeding the resampler exactly the number of input
//! frames it asks for and keeping the remainder for the next call. State
//! lives inside the resampler, so the output is phase-continuous across
//! block boundaries. When input and output rates match, both convert to a
//! plain copy.
//!
//! [`IfResampler`] runs the complex IF stream through one two-channel
//! resampler (I and Q as channels of the same instance), which keeps the
//! two components sample-aligned by construction. [`AudioResampler`]
//! converts the f64 audio path from the demodulator rate to the PCM rate.

use num_complex::Complex;
use rubato::{
    Resampler, SincFixedOut, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::warn;

use crate::{IqSample, Sample};

const OUTPUT_FRAMES: usize = 1024;

fn if_sinc_parameters() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.9,
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    }
}

fn audio_sinc_parameters() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 160,
        window: WindowFunction::BlackmanHarris2,
    }
}

/// Complex-stream resampler between device IF rate and demodulator rate.
pub struct IfResampler {
    resampler: Option<SincFixedOut<f32>>,
    leftover: Vec<IqSample>,
}

impl IfResampler {
    /// Create a converter from `input_rate` to `output_rate` Hz.
    ///
    /// Equal rates select a pass-through.
    pub fn new(input_rate: f64, output_rate: f64) -> Self {
        let resampler = if (input_rate - output_rate).abs() < f64::EPSILON {
            None
        } else {
            let ratio = output_rate / input_rate;
            Some(
                SincFixedOut::<f32>::new(ratio, 1.1, if_sinc_parameters(), OUTPUT_FRAMES, 2)
                    .expect("invalid IF resampler ratio"),
            )
        };
        Self {
            resampler,
            leftover: Vec::new(),
        }
    }

    pub fn process(&mut self, input: &[IqSample]) -> Vec<IqSample> {
        let Some(resampler) = self.resampler.as_mut() else {
            return input.to_vec();
        };

        self.leftover.extend_from_slice(input);
        let mut output = Vec::new();

        loop {
            let needed = resampler.input_frames_next();
            if self.leftover.len() < needed {
                break;
            }
            let mut re = Vec::with_capacity(needed);
            let mut im = Vec::with_capacity(needed);
            for s in self.leftover.drain(..needed) {
                re.push(s.re);
                im.push(s.im);
            }

            match resampler.process(&[re, im], None) {
                Ok(resampled) => {
                    for (&i, &q) in resampled[0].iter().zip(resampled[1].iter()) {
                        output.push(Complex::new(i, q));
                    }
                }
                Err(e) => {
                    warn!("IF resampler error: {:?}", e);
                    break;
                }
            }
        }
        output
    }
}

/// Audio-path resampler between demodulator rate and PCM rate.
pub struct AudioResampler {
    resampler: Option<SincFixedOut<f64>>,
    leftover: Vec<Sample>,
}

impl AudioResampler {
    /// Create a converter from `input_rate` to `output_rate` Hz.
    ///
    /// Equal rates select a pass-through.
    pub fn new(input_rate: f64, output_rate: f64) -> Self {
        let resampler = if (input_rate - output_rate).abs() < f64::EPSILON {
            None
        } else {
            let ratio = output_rate / input_rate;
            Some(
                SincFixedOut::<f64>::new(ratio, 1.1, audio_sinc_parameters(), OUTPUT_FRAMES, 1)
                    .expect("invalid audio resampler ratio"),
            )
        };
        Self {
            resampler,
            leftover: Vec::new(),
        }
    }

    pub fn process(&mut self, input: &[Sample]) -> Vec<Sample> {
        let Some(resampler) = self.resampler.as_mut() else {
            return input.to_vec();
        };

        self.leftover.extend_from_slice(input);
        let mut output = Vec::new();

        loop {
            let needed = resampler.input_frames_next();
            if self.leftover.len() < needed {
                break;
            }
            let chunk: Vec<Sample> = self.leftover.drain(..needed).collect();
            match resampler.process(&[chunk], None) {
                Ok(resampled) => output.extend_from_slice(&resampled[0]),
                Err(e) => {
                    warn!("audio resampler error: {:?}", e);
                    break;
                }
            }
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_passthrough_at_equal_rates() {
        let mut resampler = AudioResampler::new(48_000.0, 48_000.0);
        let input = vec![0.25; 100];
        assert_eq!(resampler.process(&input), input);

        let mut resampler = IfResampler::new(384_000.0, 384_000.0);
        let input = vec![IqSample::new(0.5, -0.5); 100];
        assert_eq!(resampler.process(&input), input);
    }

    #[test]
    fn test_audio_rate_conversion_8_to_1() {
        let mut resampler = AudioResampler::new(384_000.0, 48_000.0);
        let mut produced = 0usize;
        let mut consumed = 0usize;
        for _ in 0..100 {
            let block = vec![0.0; 4096];
            consumed += block.len();
            produced += resampler.process(&block).len();
        }
        let expected = consumed / 8;
        let err = (produced as f64 - expected as f64).abs() / expected as f64;
        assert!(err < 0.05, "produced {} for {} in", produced, consumed);
    }

    #[test]
    fn test_tone_survives_conversion() {
        // A 1 kHz tone resampled 96 kHz -> 48 kHz keeps amplitude and rate.
        let mut resampler = AudioResampler::new(96_000.0, 48_000.0);
        let input: Vec<f64> = (0..96_000)
            .map(|n| (2.0 * PI * 1_000.0 * n as f64 / 96_000.0).sin())
            .collect();
        let output = resampler.process(&input);
        assert!(output.len() > 40_000);

        let tail = &output[output.len() - 8_000..];
        let peak = tail.iter().fold(0.0f64, |a, &b| a.max(b.abs()));
        assert!((peak - 1.0).abs() < 0.02, "peak {}", peak);

        // Count zero crossings: 1 kHz at 48 kHz gives 2 per millisecond.
        let crossings = tail.windows(2).filter(|w| w[0] < 0.0 && w[1] >= 0.0).count();
        let seconds = tail.len() as f64 / 48_000.0;
        let freq = crossings as f64 / seconds;
        assert!((freq - 1_000.0).abs() < 20.0, "freq {}", freq);
    }

    #[test]
    fn test_if_resampler_keeps_iq_aligned() {
        // A complex exponential stays a complex exponential (unit norm).
        let mut resampler = IfResampler::new(768_000.0, 384_000.0);
        let input: Vec<IqSample> = (0..65_536)
            .map(|n| {
                let phi = 2.0 * PI * 10_000.0 * n as f64 / 768_000.0;
                IqSample::new(phi.cos() as f32, phi.sin() as f32)
            })
            .collect();
        let output = resampler.process(&input);
        assert!(!output.is_empty());
        for s in &output[output.len() / 2..] {
            assert!((s.norm() - 1.0).abs() < 0.02, "norm {}", s.norm());
        }
    }

    #[test]
    fn test_fractional_ratio() {
        // 937.5 kHz to 384 kHz, a non-integer ratio from a real tuner.
        let mut resampler = IfResampler::new(937_500.0, 384_000.0);
        let mut produced = 0usize;
        for _ in 0..50 {
            let block = vec![IqSample::new(0.1, 0.0); 8192];
            produced += resampler.process(&block).len();
        }
        let expected = (50.0 * 8192.0 * 384.0 / 937.5) as usize;
        let err = (produced as f64 - expected as f64).abs() / expected as f64;
        assert!(err < 0.05, "produced {} expected {}", produced, expected);
    }
}
