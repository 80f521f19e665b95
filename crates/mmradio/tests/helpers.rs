//! Signal synthesis shared by the integration tests.

use vaquero::IqSample;

/// Frequency modulator producing complex baseband at unit amplitude.
///
/// Phase accumulates across calls, so a scenario can be fed block by block.
pub struct FmModulator {
    phase: f64,
    gain: f64,
}

impl FmModulator {
    pub fn new(sample_rate: f64, freq_dev: f64) -> Self {
        Self {
            phase: 0.0,
            gain: 2.0 * std::f64::consts::PI * freq_dev / sample_rate,
        }
    }

    /// Modulate one block of baseband samples (full scale = full deviation).
    pub fn modulate(&mut self, mpx: &[f64]) -> Vec<IqSample> {
        mpx.iter()
            .map(|&m| {
                self.phase += self.gain * m;
                if self.phase > std::f64::consts::PI {
                    self.phase -= 2.0 * std::f64::consts::PI;
                } else if self.phase < -std::f64::consts::PI {
                    self.phase += 2.0 * std::f64::consts::PI;
                }
                IqSample::new(self.phase.cos() as f32, self.phase.sin() as f32)
            })
            .collect()
    }
}

/// MPX generator with a phase-coherent pilot and 38 kHz subcarrier.
pub struct MpxGenerator {
    sample_rate: f64,
    index: u64,
}

impl MpxGenerator {
    pub const PILOT_FREQ: f64 = 19_000.0;

    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            index: 0,
        }
    }

    /// One block of `n` samples: mono tone, pilot, and a tone on the
    /// 38 kHz stereo subcarrier. Any amplitude may be zero.
    pub fn block(
        &mut self,
        n: usize,
        mono: (f64, f64),
        pilot_level: f64,
        stereo: (f64, f64),
    ) -> Vec<f64> {
        let two_pi = 2.0 * std::f64::consts::PI;
        (0..n)
            .map(|_| {
                let t = self.index as f64 / self.sample_rate;
                self.index += 1;
                let pilot_phase = two_pi * Self::PILOT_FREQ * t;
                let (mono_freq, mono_amp) = mono;
                let (stereo_freq, stereo_amp) = stereo;
                mono_amp * (two_pi * mono_freq * t).sin()
                    + pilot_level * pilot_phase.sin()
                    + stereo_amp * (two_pi * stereo_freq * t).sin() * (2.0 * pilot_phase).sin()
            })
            .collect()
    }
}

/// RMS of a slice of audio samples.
pub fn rms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f64>() / samples.len() as f64).sqrt()
}
