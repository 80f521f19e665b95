//! Narrow-band FM demodulation.
//!
//! Communications-grade FM at a 48 kHz internal rate: IF AGC, a selectable
//! narrow band-pass, and the phase discriminator scaled to narrow-band
//! deviation. No stereo, no deemphasis network beyond what the transmitter
//! side assumes.

use vaquero::dsp::agc::IfAgc;
use vaquero::dsp::fir::FirFilterC;
use vaquero::dsp::{rms_level, samples_mean_rms, DspBlock};
use vaquero::{IqSample, Sample, SampleBlock};

use crate::fm::PhaseDiscriminator;

/// Narrow-band FM decoder.
pub struct NbfmDecoder {
    if_agc: IfAgc,
    filter: FirFilterC,
    phasedisc: PhaseDiscriminator,
    freq_dev: f64,
    if_rms: f32,
    baseband_mean: f32,
}

impl NbfmDecoder {
    /// Internal processing rate, equal to the PCM output rate.
    pub const INTERNAL_RATE_PCM: f64 = 48_000.0;
    /// Deviation of regular narrow-band channels.
    pub const FREQ_DEV_NORMAL: f64 = 5_000.0;
    /// Deviation paired with the wide filter setting.
    pub const FREQ_DEV_WIDE: f64 = 17_000.0;

    pub fn new(filter_coeff: Vec<IqSample>, freq_dev: f64) -> Self {
        Self {
            if_agc: IfAgc::new(1.0, 10_000.0, 1.0, 0.001),
            filter: FirFilterC::new(filter_coeff),
            phasedisc: PhaseDiscriminator::new(freq_dev, Self::INTERNAL_RATE_PCM),
            freq_dev,
            if_rms: 0.0,
            baseband_mean: 0.0,
        }
    }

    /// Decode one IF block at 48 kHz into mono audio.
    pub fn process(&mut self, samples_in: &[IqSample], audio: &mut SampleBlock) {
        audio.clear();
        if samples_in.is_empty() {
            return;
        }

        self.if_rms = rms_level(samples_in);

        let leveled = self.if_agc.process(samples_in);
        let filtered = self.filter.process(&leveled);
        let decoded = self.phasedisc.process(&filtered);

        let (mean, _) = samples_mean_rms(&decoded);
        self.baseband_mean = 0.95 * self.baseband_mean + 0.05 * mean;

        audio.extend(decoded.iter().map(|&v| v as Sample));
    }

    /// RMS level of the last IF input block.
    pub fn if_rms(&self) -> f32 {
        self.if_rms
    }

    /// Estimated tuning offset in Hz, from the baseband DC component.
    pub fn tuning_offset(&self) -> f64 {
        self.baseband_mean as f64 * self.freq_dev
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;
    use vaquero::dsp::fir::complex_bandpass_taps;

    const FS: f64 = NbfmDecoder::INTERNAL_RATE_PCM;

    #[test]
    fn test_nbfm_recovers_tone() {
        // Wide filter so the Carson bandwidth of the test signal fits.
        let coeff = complex_bandpass_taps(-20_000.0, 20_000.0, FS, 127);
        let mut decoder = NbfmDecoder::new(coeff, NbfmDecoder::FREQ_DEV_NORMAL);

        // FM with 5 kHz deviation by a 1 kHz tone.
        let mut phase = 0.0f64;
        let input: Vec<IqSample> = (0..48_000)
            .map(|n| {
                let t = n as f64 / FS;
                phase += 2.0 * PI * 5_000.0 / FS * (2.0 * PI * 1_000.0 * t).sin();
                IqSample::new(phase.cos() as f32, phase.sin() as f32)
            })
            .collect();

        let mut audio = Vec::new();
        decoder.process(&input, &mut audio);
        let tail = &audio[24_000..];
        let peak = tail.iter().fold(0.0f64, |a, &b| a.max(b.abs()));
        assert!((peak - 1.0).abs() < 0.1, "peak {}", peak);

        let crossings = tail.windows(2).filter(|w| w[0] < 0.0 && w[1] >= 0.0).count();
        let freq = crossings as f64 / (tail.len() as f64 / FS);
        assert!((freq - 1_000.0).abs() < 25.0, "tone at {}", freq);
    }

    #[test]
    fn test_tuning_offset_tracks_carrier_error() {
        let coeff = complex_bandpass_taps(-10_000.0, 10_000.0, FS, 127);
        let mut decoder = NbfmDecoder::new(coeff, NbfmDecoder::FREQ_DEV_NORMAL);

        // Unmodulated carrier 500 Hz off-tune.
        let mut audio = Vec::new();
        for block in 0..100 {
            let input: Vec<IqSample> = (0..960)
                .map(|n| {
                    let phi = 2.0 * PI * 500.0 * (block * 960 + n) as f64 / FS;
                    IqSample::new(phi.cos() as f32, phi.sin() as f32)
                })
                .collect();
            decoder.process(&input, &mut audio);
        }
        assert!(
            (decoder.tuning_offset() - 500.0).abs() < 25.0,
            "offset {}",
            decoder.tuning_offset()
        );
    }
}
