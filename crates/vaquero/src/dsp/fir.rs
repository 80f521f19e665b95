//! Finite impulse response filters.
//!
//! Coefficients come from a windowed-sinc design with a Blackman window.
//! Real filters run on the f64 audio path; complex filters run on the f32
//! IF path, where a frequency-shifted design yields one-sided passbands for
//! single-sideband work. Both keep their delay line across calls, so block
//! boundaries are seamless.

use std::f64::consts::PI;

use crate::IqSample;

use super::DspBlock;

/// Design a low-pass FIR, Blackman-windowed sinc, unity DC gain.
///
/// `cutoff` and `sample_rate` in Hz; `taps` should be odd for a symmetric
/// linear-phase response.
pub fn lowpass_taps(cutoff: f64, sample_rate: f64, taps: usize) -> Vec<f64> {
    assert!(taps > 0, "number of taps must be greater than 0");
    assert!(sample_rate > 0.0, "sample rate must be greater than 0");

    let mut fir = Vec::with_capacity(taps);
    let mid = (taps / 2) as isize;
    let norm_cutoff = cutoff / (sample_rate / 2.0);

    for n in 0..taps {
        let x = n as isize - mid;
        let sinc = if x == 0 {
            2.0 * norm_cutoff
        } else {
            (2.0 * norm_cutoff * PI * x as f64).sin() / (PI * x as f64)
        };
        let window = 0.42 - 0.5 * ((2.0 * PI * n as f64) / (taps as f64 - 1.0)).cos()
            + 0.08 * ((4.0 * PI * n as f64) / (taps as f64 - 1.0)).cos();
        fir.push(sinc * window);
    }

    let norm: f64 = fir.iter().sum();
    for v in fir.iter_mut() {
        *v /= norm;
    }
    fir
}

/// Design a complex band-pass FIR with passband `[low, high]` Hz.
///
/// The band edges may be negative: `[-6000, 6000]` is a symmetric AM
/// filter, `[0, 3000]` keeps only the upper sideband, `[-3000, 0]` the
/// lower. Implemented as a low-pass of half the bandwidth modulated onto
/// the band center.
pub fn complex_bandpass_taps(
    low: f64,
    high: f64,
    sample_rate: f64,
    taps: usize,
) -> Vec<IqSample> {
    assert!(high > low, "passband must have positive width");
    let center = (low + high) / 2.0;
    let lowpass = lowpass_taps((high - low) / 2.0, sample_rate, taps);
    let omega = 2.0 * PI * center / sample_rate;
    lowpass
        .iter()
        .enumerate()
        .map(|(n, &c)| {
            let phi = omega * n as f64;
            IqSample::new((c * phi.cos()) as f32, (c * phi.sin()) as f32)
        })
        .collect()
}

/// Stateful real FIR filter on the audio path.
pub struct FirFilter {
    coeffs: Vec<f64>,
    /// Last `taps - 1` input samples from previous blocks
    state: Vec<f64>,
}

impl FirFilter {
    pub fn new(coeffs: Vec<f64>) -> Self {
        assert!(!coeffs.is_empty());
        let state = vec![0.0; coeffs.len() - 1];
        Self { coeffs, state }
    }

    pub fn process(&mut self, input: &[f64]) -> Vec<f64> {
        let taps = self.coeffs.len();
        let mut buf = Vec::with_capacity(self.state.len() + input.len());
        buf.extend_from_slice(&self.state);
        buf.extend_from_slice(input);

        let mut out = Vec::with_capacity(input.len());
        for i in 0..input.len() {
            let mut acc = 0.0;
            for (k, &c) in self.coeffs.iter().enumerate() {
                acc += c * buf[i + taps - 1 - k];
            }
            out.push(acc);
        }

        if taps > 1 {
            let keep = taps - 1;
            self.state.clear();
            self.state.extend_from_slice(&buf[buf.len() - keep..]);
        }
        out
    }
}

/// Stateful complex FIR filter on the IF path.
pub struct FirFilterC {
    coeffs: Vec<IqSample>,
    state: Vec<IqSample>,
}

impl FirFilterC {
    pub fn new(coeffs: Vec<IqSample>) -> Self {
        assert!(!coeffs.is_empty());
        let state = vec![IqSample::new(0.0, 0.0); coeffs.len() - 1];
        Self { coeffs, state }
    }
}

impl DspBlock for FirFilterC {
    fn process(&mut self, data: &[IqSample]) -> Vec<IqSample> {
        let taps = self.coeffs.len();
        let mut buf = Vec::with_capacity(self.state.len() + data.len());
        buf.extend_from_slice(&self.state);
        buf.extend_from_slice(data);

        let mut out = Vec::with_capacity(data.len());
        for i in 0..data.len() {
            let mut acc = IqSample::new(0.0, 0.0);
            for (k, &c) in self.coeffs.iter().enumerate() {
                acc += c * buf[i + taps - 1 - k];
            }
            out.push(acc);
        }

        if taps > 1 {
            let keep = taps - 1;
            self.state.clear();
            self.state.extend_from_slice(&buf[buf.len() - keep..]);
        }
        out
    }
}
