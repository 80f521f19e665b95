//! Adaptive multipath equalizer for the FM IF.
//!
//! Short-delay echoes from multipath reception turn the constant-envelope
//! FM carrier into an amplitude-modulated one. This filter exploits that:
//! a complex FIR is adapted with a constant-modulus LMS step so its output
//! envelope matches a smoothed reference derived from the gain-controlled
//! input. Inverting the envelope distortion inverts the channel.
//!
//! The filter expects input normalized near [`MultipathFilter::IF_TARGET_LEVEL`]
//! by the IF AGC; the LMS step is normalized by the reference power so the
//! adaptation speed does not depend on absolute level.

use vaquero::IqSample;

/// One complex equalizer coefficient.
pub type MfCoeff = IqSample;

/// Envelope smoothing rate per sample.
const REFERENCE_RATE: f32 = 0.001;

/// Base LMS step before reference-power normalization.
const LMS_STEP: f32 = 0.1;

/// Adaptive complex FIR equalizer.
pub struct MultipathFilter {
    coeff: Vec<MfCoeff>,
    /// Delay line, newest sample last, length equal to the filter order.
    state: Vec<IqSample>,
    reference_level: f32,
    error: f32,
}

impl MultipathFilter {
    /// Envelope the IF AGC drives the input towards.
    pub const IF_TARGET_LEVEL: f32 = 1.0;

    /// Create a filter with `stages` adaptive stages on each side of the
    /// center tap; the order is `2 * stages + 1`, always odd.
    pub fn new(stages: usize) -> Self {
        let order = 2 * stages + 1;
        let mut filter = Self {
            coeff: vec![MfCoeff::new(0.0, 0.0); order],
            state: vec![IqSample::new(0.0, 0.0); order],
            reference_level: Self::IF_TARGET_LEVEL,
            error: 0.0,
        };
        filter.initialize_coefficients();
        filter
    }

    /// Reset the coefficient vector to the pass-through delta: center tap
    /// one, everything else zero. The delay line is flushed so a poisoned
    /// history cannot re-derail the fresh coefficients.
    pub fn initialize_coefficients(&mut self) {
        for c in self.coeff.iter_mut() {
            *c = MfCoeff::new(0.0, 0.0);
        }
        let center = self.coeff.len() / 2;
        self.coeff[center] = MfCoeff::new(1.0, 0.0);
        for s in self.state.iter_mut() {
            *s = IqSample::new(0.0, 0.0);
        }
    }

    /// Envelope error at the last processed sample.
    pub fn error(&self) -> f32 {
        self.error
    }

    /// Smoothed input envelope the adaptation references.
    pub fn reference_level(&self) -> f32 {
        self.reference_level
    }

    /// Current coefficient vector.
    pub fn coefficients(&self) -> &[MfCoeff] {
        &self.coeff
    }

    /// Filter one block, adapting per sample.
    pub fn process(&mut self, input: &[IqSample]) -> Vec<IqSample> {
        let order = self.coeff.len();
        let mut output = Vec::with_capacity(input.len());

        for &x in input {
            self.state.rotate_left(1);
            self.state[order - 1] = x;

            // coeff[0] weighs the newest sample.
            let mut y = IqSample::new(0.0, 0.0);
            for (k, &c) in self.coeff.iter().enumerate() {
                y += c * self.state[order - 1 - k];
            }
            output.push(y);

            self.reference_level += REFERENCE_RATE * (x.norm() - self.reference_level);

            // Constant-modulus error against the reference envelope.
            let reference_power = self.reference_level * self.reference_level;
            self.error = reference_power - y.norm_sqr();

            let step = LMS_STEP * self.error / (order as f32 * reference_power.max(1e-9));
            for (k, c) in self.coeff.iter_mut().enumerate() {
                *c += step * y * self.state[order - 1 - k].conj();
            }
        }
        output
    }
}
