//! Wideband FM demodulation with stereo decoding.
//!
//! The chain turns the complex IF stream into audio: optional IF
//! filtering, a slow IF AGC, the adaptive multipath equalizer, a phase
//! discriminator producing the MPX baseband, and from there the mono and
//! stereo paths with deemphasis, resampling to the PCM rate, pilot-cut
//! filtering and DC blocking. A phase-locked loop on the 19 kHz pilot
//! drives the 38 kHz subcarrier product detector and emits pulse-per-second
//! events usable as a timing reference.

use std::f64::consts::PI;

use vaquero::dsp::agc::IfAgc;
use vaquero::dsp::fir::{lowpass_taps, FirFilter, FirFilterC};
use vaquero::dsp::iir::{DcBlocker, Deemphasis};
use vaquero::dsp::resampler::AudioResampler;
use vaquero::dsp::{fast_atan2f, rms_level, samples_mean_rms, DspBlock};
use vaquero::{IqSample, Sample, SampleBlock};

use crate::multipath::{MfCoeff, MultipathFilter};

/// Converts a complex IF stream into instantaneous frequency.
///
/// The output is the phase of `z[n] * conj(z[n-1])`, scaled so a deviation
/// of `freq_dev` reads as full scale (1.0).
pub struct PhaseDiscriminator {
    gain: f32,
    last: IqSample,
}

impl PhaseDiscriminator {
    pub fn new(freq_dev: f64, sample_rate: f64) -> Self {
        Self {
            gain: (sample_rate / (2.0 * PI * freq_dev)) as f32,
            last: IqSample::new(1.0, 0.0),
        }
    }

    pub fn process(&mut self, samples: &[IqSample]) -> Vec<f32> {
        let mut out = Vec::with_capacity(samples.len());
        for &s in samples {
            let d = s * self.last.conj();
            out.push(fast_atan2f(d.im, d.re) * self.gain);
            self.last = s;
        }
        out
    }
}

/// A pulse-per-second marker derived from counted pilot periods.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PpsEvent {
    pub pps_index: u64,
    pub sample_index: u64,
    /// Fractional position of the event inside its block, in [0, 1).
    pub block_position: f64,
}

/// Phase-locked loop for the 19 kHz stereo pilot.
///
/// A type-2, 4th order loop: the I/Q phase detector output runs through a
/// two-pole low-pass, the resulting phase error through a one-tap loop
/// filter, and two integrators (frequency, then phase) close the loop.
/// Frequencies are normalized to the MPX sample rate.
///
/// The output block carries the doubled oscillator, `sin(2φ)`, ready to
/// demodulate the 38 kHz subcarrier; pilot-shift mode emits `cos(2φ)`
/// instead, rotating the subcarrier by 90 degrees for quadrature multipath
/// monitoring.
pub struct PilotPhaseLock {
    // Loop coefficients
    phasor_a1: f64,
    phasor_a2: f64,
    phasor_b0: f64,
    loopfilter_b0: f64,
    loopfilter_b1: f64,
    // Loop state
    phasor_i1: f64,
    phasor_i2: f64,
    phasor_q1: f64,
    phasor_q2: f64,
    loopfilter_x1: f64,
    freq: f64,
    phase: f64,
    minfreq: f64,
    maxfreq: f64,
    // Lock detection
    minsignal: f64,
    lock_delay: u64,
    lock_cnt: u64,
    pilot_level: f64,
    // Pulse-per-second generation
    pilot_periods: u64,
    pps_cnt: u64,
    sample_cnt: u64,
    pps_events: Vec<PpsEvent>,
}

impl PilotPhaseLock {
    /// Pilot periods per PPS event; 19,000 periods of a 19 kHz pilot span
    /// exactly one second.
    pub const PPS_PILOT_PERIODS: u64 = 19_000;

    /// Create the loop. `freq` and `bandwidth` are fractions of the sample
    /// rate; `minsignal` is the pilot amplitude threshold for lock.
    pub fn new(freq: f64, bandwidth: f64, minsignal: f64) -> Self {
        // Two-pole low-pass for the I/Q phase detector output, unit DC gain.
        let p1 = (-1.146 * bandwidth * 2.0 * PI).exp();
        let p2 = (-5.331 * bandwidth * 2.0 * PI).exp();
        let phasor_a1 = -p1 - p2;
        let phasor_a2 = p1 * p2;
        let phasor_b0 = 1.0 + phasor_a1 + phasor_a2;

        // One-tap loop filter; the remaining two poles sit at z = 1 in the
        // frequency and phase integrators below.
        let q1 = (-0.1153 * bandwidth * 2.0 * PI).exp();
        let loopfilter_b0 = 0.62 * bandwidth * 2.0 * PI;

        Self {
            phasor_a1,
            phasor_a2,
            phasor_b0,
            loopfilter_b0,
            loopfilter_b1: -loopfilter_b0 * q1,
            phasor_i1: 0.0,
            phasor_i2: 0.0,
            phasor_q1: 0.0,
            phasor_q2: 0.0,
            loopfilter_x1: 0.0,
            freq: freq * 2.0 * PI,
            phase: 0.0,
            minfreq: (freq - bandwidth) * 2.0 * PI,
            maxfreq: (freq + bandwidth) * 2.0 * PI,
            minsignal,
            lock_delay: (20.0 / bandwidth) as u64,
            lock_cnt: 0,
            pilot_level: 0.0,
            pilot_periods: 0,
            pps_cnt: 0,
            sample_cnt: 0,
            pps_events: Vec::new(),
        }
    }

    /// True once the pilot level has held above threshold for the lock delay.
    pub fn locked(&self) -> bool {
        self.lock_cnt >= self.lock_delay
    }

    /// Pilot level detected over the last block (conservative minimum).
    pub fn pilot_level(&self) -> f64 {
        self.pilot_level
    }

    /// Loop frequency in radians per sample.
    pub fn current_freq(&self) -> f64 {
        self.freq
    }

    /// PPS events recorded during the last processed block.
    pub fn pps_events(&self) -> &[PpsEvent] {
        &self.pps_events
    }

    /// Track the pilot in `samples_in` and write the doubled subcarrier
    /// reference into `samples_out`.
    pub fn process(&mut self, samples_in: &[Sample], samples_out: &mut SampleBlock, pilot_shift: bool) {
        let n = samples_in.len();
        samples_out.clear();
        samples_out.reserve(n);

        let was_locked = self.locked();
        self.pps_events.clear();
        if n == 0 {
            return;
        }
        self.pilot_level = 1000.0;

        for (i, &x) in samples_in.iter().enumerate() {
            // Local oscillator and doubled-frequency output.
            let psin = self.phase.sin();
            let pcos = self.phase.cos();
            samples_out.push(if pilot_shift {
                // cos(2x) = 2 cos(x) cos(x) - 1, subcarrier shifted 90 degrees
                2.0 * pcos * pcos - 1.0
            } else {
                // sin(2x) = 2 sin(x) cos(x)
                2.0 * psin * pcos
            });

            // Mix with the local oscillator and low-pass the I/Q phasor.
            let phasor_i = self.phasor_b0 * (psin * x)
                - self.phasor_a1 * self.phasor_i1
                - self.phasor_a2 * self.phasor_i2;
            let phasor_q = self.phasor_b0 * (pcos * x)
                - self.phasor_a1 * self.phasor_q1
                - self.phasor_a2 * self.phasor_q2;
            self.phasor_i2 = self.phasor_i1;
            self.phasor_i1 = phasor_i;
            self.phasor_q2 = self.phasor_q1;
            self.phasor_q1 = phasor_q;

            // Maximum phase error in the locked state is about 0.02 radian,
            // well inside the approximation's accuracy.
            let phase_err = fast_atan2f(phasor_q as f32, phasor_i as f32) as f64;

            self.pilot_level = self.pilot_level.min(phasor_i);

            // Loop filter feeds the frequency integrator.
            self.freq += self.loopfilter_b0 * phase_err + self.loopfilter_b1 * self.loopfilter_x1;
            self.loopfilter_x1 = phase_err;
            self.freq = self.freq.clamp(self.minfreq, self.maxfreq);

            self.phase += self.freq;
            if self.phase > 2.0 * PI {
                self.phase -= 2.0 * PI;
                self.pilot_periods += 1;

                if self.pilot_periods == Self::PPS_PILOT_PERIODS {
                    self.pilot_periods = 0;
                    if was_locked {
                        self.pps_events.push(PpsEvent {
                            pps_index: self.pps_cnt,
                            sample_index: self.sample_cnt + i as u64,
                            block_position: i as f64 / n as f64,
                        });
                        self.pps_cnt += 1;
                    }
                }
            }
        }

        // Update lock status from the weakest pilot seen in this block.
        if 2.0 * self.pilot_level > self.minsignal {
            if self.lock_cnt < self.lock_delay {
                self.lock_cnt += n as u64;
            }
        } else {
            self.lock_cnt = 0;
        }

        // Drop PPS bookkeeping whenever the pilot is not locked.
        if self.lock_cnt < self.lock_delay {
            self.pilot_periods = 0;
            self.pps_cnt = 0;
            self.pps_events.clear();
        }

        self.sample_cnt += n as u64;
    }
}

/// Complete wideband FM decoder.
pub struct FmDecoder {
    pilot_shift: bool,
    enable_multipath: bool,
    wait_multipath_blocks: u32,
    stereo_enabled: bool,
    stereo_detected: bool,
    // Processing chain
    if_filter: Option<FirFilterC>,
    if_agc: IfAgc,
    multipath: MultipathFilter,
    phasedisc: PhaseDiscriminator,
    pilot_pll: PilotPhaseLock,
    deemph_mono: Deemphasis,
    deemph_stereo: Deemphasis,
    resampler_mono: AudioResampler,
    resampler_stereo: AudioResampler,
    pilotcut_mono: FirFilter,
    pilotcut_stereo: FirFilter,
    dcblock_mono: DcBlocker,
    dcblock_stereo: DcBlocker,
    // Telemetry
    if_rms: f32,
    baseband_mean: f32,
    baseband_level: f32,
}

impl FmDecoder {
    /// Native demodulator rate.
    pub const SAMPLE_RATE_IF: f64 = 384_000.0;
    /// Audio output rate.
    pub const SAMPLE_RATE_PCM: f64 = 48_000.0;
    /// Broadcast FM deviation.
    pub const FREQ_DEV: f64 = 75_000.0;
    /// Audio bandwidth after the pilot-cut filter.
    pub const BANDWIDTH_PCM: f64 = 16_500.0;
    /// Stereo pilot frequency.
    pub const PILOT_FREQ: f64 = 19_000.0;
    /// Deemphasis time constants in microseconds.
    pub const DEFAULT_DEEMPHASIS_EU: f64 = 50.0;
    pub const DEFAULT_DEEMPHASIS_NA: f64 = 75.0;

    /// Pilot PLL bandwidth in Hz.
    const PILOT_BANDWIDTH: f64 = 50.0;
    /// Pilot amplitude threshold for lock.
    const PILOT_MINSIGNAL: f64 = 0.01;
    /// Blocks to let the AGC and pilot loop settle before equalizing.
    const MULTIPATH_WARMUP_BLOCKS: u32 = 100;
    /// Empirical boost of the L-R channel for better separation.
    const STEREO_BOOST: f64 = 1.017;
    /// Taps of the 19 kHz pilot-cut filter at the PCM rate.
    const PILOTCUT_TAPS: usize = 127;

    /// Build a decoder running at [`Self::SAMPLE_RATE_IF`].
    ///
    /// `if_filter_coeff` narrows the IF ahead of the AGC (`None` keeps the
    /// full band); `deemphasis` is the time constant in microseconds, 0 for
    /// none; `multipath_stages` enables the equalizer when positive.
    pub fn new(
        if_filter_coeff: Option<Vec<IqSample>>,
        stereo: bool,
        deemphasis: f64,
        pilot_shift: bool,
        multipath_stages: usize,
    ) -> Self {
        let deemph_samples = deemphasis * Self::SAMPLE_RATE_IF * 1.0e-6;
        let pilotcut = lowpass_taps(
            Self::BANDWIDTH_PCM,
            Self::SAMPLE_RATE_PCM,
            Self::PILOTCUT_TAPS,
        );
        Self {
            pilot_shift,
            enable_multipath: multipath_stages > 0,
            wait_multipath_blocks: Self::MULTIPATH_WARMUP_BLOCKS,
            stereo_enabled: stereo,
            stereo_detected: false,
            if_filter: if_filter_coeff.map(FirFilterC::new),
            if_agc: IfAgc::new(1.0, 10_000.0, MultipathFilter::IF_TARGET_LEVEL, 0.001),
            multipath: MultipathFilter::new(multipath_stages.max(1)),
            phasedisc: PhaseDiscriminator::new(Self::FREQ_DEV, Self::SAMPLE_RATE_IF),
            pilot_pll: PilotPhaseLock::new(
                Self::PILOT_FREQ / Self::SAMPLE_RATE_IF,
                Self::PILOT_BANDWIDTH / Self::SAMPLE_RATE_IF,
                Self::PILOT_MINSIGNAL,
            ),
            deemph_mono: Deemphasis::new(deemph_samples),
            deemph_stereo: Deemphasis::new(deemph_samples),
            resampler_mono: AudioResampler::new(Self::SAMPLE_RATE_IF, Self::SAMPLE_RATE_PCM),
            resampler_stereo: AudioResampler::new(Self::SAMPLE_RATE_IF, Self::SAMPLE_RATE_PCM),
            pilotcut_mono: FirFilter::new(pilotcut.clone()),
            pilotcut_stereo: FirFilter::new(pilotcut),
            dcblock_mono: DcBlocker::new(1.0e-4),
            dcblock_stereo: DcBlocker::new(1.0e-4),
            if_rms: 0.0,
            baseband_mean: 0.0,
            baseband_level: 0.0,
        }
    }

    /// Decode one IF block into interleaved or mono audio.
    pub fn process(&mut self, samples_in: &[IqSample], audio: &mut SampleBlock) {
        audio.clear();
        if samples_in.is_empty() {
            return;
        }

        self.if_rms = rms_level(samples_in);

        let samples_band = match self.if_filter.as_mut() {
            Some(filter) => filter.process(samples_in),
            None => samples_in.to_vec(),
        };

        let samples_agc = self.if_agc.process(&samples_band);

        // Let the AGC and pilot loop settle before trusting the equalizer;
        // afterwards, fall back to the unequalized block whenever the error
        // evaluation goes invalid and start the coefficients over.
        let samples_eq = if self.wait_multipath_blocks > 0 {
            self.wait_multipath_blocks -= 1;
            samples_agc
        } else if self.enable_multipath {
            let filtered = self.multipath.process(&samples_agc);
            let abnormal_error = !self.multipath.error().is_finite();
            let reference_vanished = self.multipath.reference_level().abs() < 0.01;
            if abnormal_error || reference_vanished {
                self.multipath.initialize_coefficients();
                samples_agc
            } else {
                filtered
            }
        } else {
            samples_agc
        };

        // Demodulate FM to the MPX signal and move to the audio-side type.
        let decoded = self.phasedisc.process(&samples_eq);
        if decoded.is_empty() {
            return;
        }
        let mut baseband: SampleBlock = decoded.iter().map(|&v| v as Sample).collect();

        let (mean, rms) = samples_mean_rms(&decoded);
        self.baseband_mean = 0.95 * self.baseband_mean + 0.05 * mean;
        self.baseband_level = 0.95 * self.baseband_level + 0.05 * rms;

        let mut stereo_pcm = Vec::new();
        if self.stereo_enabled {
            // Lock on the pilot and get the doubled subcarrier reference.
            let mut rawstereo = Vec::new();
            self.pilot_pll
                .process(&baseband, &mut rawstereo, self.pilot_shift);

            // In pilot-shift mode the decoder is a measurement instrument
            // and keeps the stereo path alive regardless of lock.
            self.stereo_detected = if self.pilot_shift {
                true
            } else {
                self.pilot_pll.locked()
            };

            // Product detection of the 38 kHz subcarrier, full amplitude.
            for (s, &m) in rawstereo.iter_mut().zip(baseband.iter()) {
                *s *= 2.0 * m;
            }

            if !self.pilot_shift {
                self.deemph_stereo.process_inplace(&mut rawstereo);
            }

            // The stereo resampler must advance even when its output ends up
            // unused, to stay in phase with the mono resampler.
            let stereo_first = self.resampler_stereo.process(&rawstereo);
            stereo_pcm = self.pilotcut_stereo.process(&stereo_first);
            self.dcblock_stereo.process_inplace(&mut stereo_pcm);
        }

        self.deemph_mono.process_inplace(&mut baseband);
        let mono_first = self.resampler_mono.process(&baseband);
        if mono_first.is_empty() {
            return;
        }
        let mut mono_pcm = self.pilotcut_mono.process(&mono_first);
        self.dcblock_mono.process_inplace(&mut mono_pcm);

        if !self.stereo_enabled {
            audio.append(&mut mono_pcm);
            return;
        }

        debug_assert_eq!(mono_pcm.len(), stereo_pcm.len());
        match (self.stereo_detected, self.pilot_shift) {
            (true, false) => Self::stereo_to_left_right(&mono_pcm, &stereo_pcm, audio),
            (true, true) => Self::mono_to_left_right(&stereo_pcm, audio),
            (false, false) => Self::mono_to_left_right(&mono_pcm, audio),
            (false, true) => audio.resize(2 * stereo_pcm.len(), 0.0),
        }
    }

    /// Duplicate one channel into interleaved left/right.
    fn mono_to_left_right(samples: &[Sample], audio: &mut SampleBlock) {
        audio.reserve(2 * samples.len());
        for &m in samples {
            audio.push(m);
            audio.push(m);
        }
    }

    /// Matrix (L+R)/(L-R) into interleaved left/right.
    fn stereo_to_left_right(mono: &[Sample], stereo: &[Sample], audio: &mut SampleBlock) {
        audio.reserve(2 * mono.len());
        for (&m, &s) in mono.iter().zip(stereo.iter()) {
            let s = Self::STEREO_BOOST * s;
            audio.push(m + s);
            audio.push(m - s);
        }
    }

    /// RMS level of the last IF input block.
    pub fn if_rms(&self) -> f32 {
        self.if_rms
    }

    /// Smoothed RMS of the MPX baseband.
    pub fn baseband_level(&self) -> f32 {
        self.baseband_level
    }

    /// Estimated tuning offset in Hz, from the baseband DC component.
    pub fn tuning_offset(&self) -> f64 {
        self.baseband_mean as f64 * Self::FREQ_DEV
    }

    /// Stereo output policy result for the last block.
    pub fn stereo_detected(&self) -> bool {
        self.stereo_detected
    }

    /// Raw pilot lock predicate.
    pub fn pilot_locked(&self) -> bool {
        self.pilot_pll.locked()
    }

    /// Pilot level seen during the last block.
    pub fn pilot_level(&self) -> f64 {
        self.pilot_pll.pilot_level()
    }

    /// PPS events recorded during the last block.
    pub fn pps_events(&self) -> &[PpsEvent] {
        self.pilot_pll.pps_events()
    }

    /// Multipath filter envelope error.
    pub fn multipath_error(&self) -> f32 {
        self.multipath.error()
    }

    /// Multipath filter coefficients.
    pub fn multipath_coefficients(&self) -> &[MfCoeff] {
        self.multipath.coefficients()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: f64 = FmDecoder::SAMPLE_RATE_IF;

    fn pll() -> PilotPhaseLock {
        PilotPhaseLock::new(19_000.0 / FS, 50.0 / FS, 0.01)
    }

    /// Pilot tone blocks at the exact pilot frequency.
    fn pilot_blocks(amplitude: f64, blocks: usize, block_len: usize) -> Vec<Vec<Sample>> {
        let omega = 2.0 * PI * 19_000.0 / FS;
        let mut n = 0u64;
        (0..blocks)
            .map(|_| {
                (0..block_len)
                    .map(|_| {
                        let v = amplitude * (omega * n as f64).sin();
                        n += 1;
                        v
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_pll_frequency_stays_clamped() {
        let mut pll = pll();
        let center = 2.0 * PI * 19_000.0 / FS;
        let bound = 2.0 * PI * 50.0 / FS;

        // Hostile input: broadband junk from a small LCG.
        let mut seed = 0x2545f491u32;
        let mut out = Vec::new();
        for _ in 0..100 {
            let block: Vec<Sample> = (0..1024)
                .map(|_| {
                    seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
                    (seed >> 16) as f64 / 32768.0 - 1.0
                })
                .collect();
            pll.process(&block, &mut out, false);
            assert!(
                (pll.current_freq() - center).abs() <= bound + 1e-12,
                "freq {} outside clamp",
                pll.current_freq()
            );
        }
    }

    #[test]
    fn test_pll_lock_hysteresis() {
        let mut pll = pll();
        let lock_delay = (20.0 * FS / 50.0) as u64; // samples
        let block_len = 4800usize;
        let mut out = Vec::new();

        let mut fed = 0u64;
        for block in pilot_blocks(0.1, 80, block_len) {
            pll.process(&block, &mut out, false);
            fed += block_len as u64;
            if fed < lock_delay {
                assert!(!pll.locked(), "locked after only {} samples", fed);
            }
        }
        // 80 blocks = 384k samples, comfortably past the delay.
        assert!(pll.locked());
        assert!(2.0 * pll.pilot_level() > 0.01);
    }

    #[test]
    fn test_pll_pps_cadence_while_locked() {
        let mut pll = pll();
        let mut out = Vec::new();
        let mut events = Vec::new();
        // 5 seconds of clean pilot.
        for block in pilot_blocks(0.1, 500, 3840) {
            pll.process(&block, &mut out, false);
            events.extend_from_slice(pll.pps_events());
        }
        assert!(events.len() >= 3, "only {} PPS events", events.len());
        for pair in events.windows(2) {
            let delta = pair[1].sample_index - pair[0].sample_index;
            // 19,000 pilot periods at 384 kHz / 19 kHz span one second.
            assert!(
                (delta as i64 - 384_000).abs() <= 1,
                "PPS spacing {}",
                delta
            );
        }
        for (i, ev) in events.iter().enumerate() {
            assert_eq!(ev.pps_index, i as u64);
            assert!(ev.block_position >= 0.0 && ev.block_position < 1.0);
        }
    }

    #[test]
    fn test_pll_signal_drop_loses_lock_and_discards_events() {
        let mut pll = pll();
        let mut out = Vec::new();
        for block in pilot_blocks(0.1, 200, 3840) {
            pll.process(&block, &mut out, false);
        }
        assert!(pll.locked());

        // 50 ms of dead air.
        let silence = vec![0.0; 19_200];
        pll.process(&silence, &mut out, false);
        assert!(!pll.locked());
        assert!(pll.pps_events().is_empty());
    }

    #[test]
    fn test_discriminator_tracks_deviation() {
        let mut disc = PhaseDiscriminator::new(75_000.0, FS);
        // Constant +75 kHz offset reads as +1.0 after settling.
        let step = 2.0 * PI * 75_000.0 / FS;
        let samples: Vec<IqSample> = (0..1000)
            .map(|n| {
                let phi = step * n as f64;
                IqSample::new(phi.cos() as f32, phi.sin() as f32)
            })
            .collect();
        let out = disc.process(&samples);
        for &v in &out[1..] {
            assert!((v - 1.0).abs() < 0.01, "deviation {}", v);
        }
    }

    #[test]
    fn test_decoder_mono_stereo_lockstep() {
        // Whatever the input cadence, stereo output is two interleaved
        // channels of the mono path's length.
        let mut decoder = FmDecoder::new(None, true, 50.0, false, 0);
        let mut audio = Vec::new();
        let mut seed = 12345u32;
        for len in [1000usize, 3000, 777, 4096, 65_536] {
            let block: Vec<IqSample> = (0..len)
                .map(|_| {
                    seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
                    let phi = (seed >> 16) as f32 / 1e4;
                    IqSample::new(phi.cos(), phi.sin())
                })
                .collect();
            decoder.process(&block, &mut audio);
            assert_eq!(audio.len() % 2, 0);
        }
    }
}
