//! AM-family demodulation: AM, DSB, USB, LSB and CW.
//!
//! The whole family shares one chain at a 48 kHz internal rate: IF AGC,
//! a mode-dependent complex band-pass, then either envelope extraction
//! (AM, DSB) or product detection of one sideband (USB, LSB, CW). CW is
//! upper-sideband reception with a fixed 500 Hz beat oscillator so a
//! carrier on the tuned frequency comes out as a 500 Hz tone.

use vaquero::dsp::agc::{AudioAgc, IfAgc};
use vaquero::dsp::fir::FirFilterC;
use vaquero::dsp::iir::{DcBlocker, Deemphasis};
use vaquero::dsp::{rms_level, DspBlock};
use vaquero::{IqSample, Sample, SampleBlock};

use crate::ModType;

/// Beat oscillator as a renormalized rotating phasor.
struct Bfo {
    rot: IqSample,
    mult: IqSample,
}

impl Bfo {
    fn new(freq: f64, sample_rate: f64) -> Self {
        let angle = (2.0 * std::f64::consts::PI * freq / sample_rate) as f32;
        Self {
            rot: IqSample::new(1.0, 0.0),
            mult: IqSample::new(angle.cos(), angle.sin()),
        }
    }

    fn next(&mut self) -> IqSample {
        let out = self.rot;
        self.rot *= self.mult;
        let norm = self.rot.norm();
        if norm > 0.0 {
            self.rot /= norm;
        }
        out
    }
}

/// Demodulator for the AM family of modes.
pub struct AmDecoder {
    mode: ModType,
    if_agc: IfAgc,
    filter: FirFilterC,
    bfo: Option<Bfo>,
    dcblock: DcBlocker,
    deemph: Deemphasis,
    audio_agc: AudioAgc,
    if_rms: f32,
}

impl AmDecoder {
    /// Internal processing rate, equal to the PCM output rate.
    pub const INTERNAL_RATE_PCM: f64 = 48_000.0;
    /// Audio deemphasis time constant in microseconds.
    pub const DEFAULT_DEEMPHASIS: f64 = 100.0;
    /// Peak level the audio AGC drives towards.
    pub const AUDIO_TARGET_LEVEL: f64 = 0.5;
    /// Audio AGC gain ceiling, about 7 dB.
    pub const AUDIO_GAIN_MAX: f64 = 5.0;
    /// CW beat oscillator pitch in Hz.
    pub const CW_PITCH: f64 = 500.0;

    /// Build a decoder for `mode` with the mode's band-pass coefficients.
    pub fn new(filter_coeff: Vec<IqSample>, mode: ModType) -> Self {
        let bfo = match mode {
            ModType::Cw => Some(Bfo::new(Self::CW_PITCH, Self::INTERNAL_RATE_PCM)),
            _ => None,
        };
        Self {
            mode,
            if_agc: IfAgc::new(1.0, 10_000.0, 1.0, 0.001),
            filter: FirFilterC::new(filter_coeff),
            bfo,
            dcblock: DcBlocker::new(1.0e-4),
            deemph: Deemphasis::new(
                Self::DEFAULT_DEEMPHASIS * Self::INTERNAL_RATE_PCM * 1.0e-6,
            ),
            audio_agc: AudioAgc::new(Self::AUDIO_TARGET_LEVEL, Self::AUDIO_GAIN_MAX, 1.0e-4),
            if_rms: 0.0,
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

        audio.reserve(filtered.len());
        match self.mode {
            ModType::Am | ModType::Dsb => {
                for &z in &filtered {
                    audio.push(z.norm() as Sample);
                }
            }
            ModType::Usb | ModType::Lsb => {
                // One sideband carries half the amplitude.
                for &z in &filtered {
                    audio.push(2.0 * z.re as Sample);
                }
            }
            ModType::Cw => {
                let bfo = self.bfo.as_mut().expect("CW decoder carries a BFO");
                for &z in &filtered {
                    audio.push(2.0 * (z * bfo.next()).re as Sample);
                }
            }
            ModType::Fm | ModType::Nbfm => unreachable!("not an AM-family mode"),
        }

        // Carrier DC out, tilt compensation, then level control.
        self.dcblock.process_inplace(audio);
        self.deemph.process_inplace(audio);
        self.audio_agc.process_inplace(audio);
    }

    /// RMS level of the last IF input block.
    pub fn if_rms(&self) -> f32 {
        self.if_rms
    }

    /// Current IF AGC gain (linear).
    pub fn if_agc_current_gain(&self) -> f32 {
        self.if_agc.current_gain()
    }
}
