//! Core building blocks for software-defined radio receivers.
//!
//! This crate provides the pieces a receiver application assembles into a
//! processing pipeline:
//! - sample type aliases and I/Q byte-format conversion,
//! - [`buffer::DataBuffer`], the block queue shared between pipeline threads,
//! - the device capability surface in [`source`] with a file-backed
//!   implementation,
//! - shared DSP primitives in [`dsp`] (FIR/IIR filters, AGC, Fs/4 shifter,
//!   fractional resamplers).

pub mod buffer;
pub mod dsp;
pub mod error;
pub mod iqread;
pub mod source;

pub use error::{Error, Result};

/// Complex baseband sample (in-phase, quadrature).
pub type IqSample = num_complex::Complex<f32>;

/// Audio-side scalar sample.
pub type Sample = f64;

/// A block of I/Q samples, one tick of pipeline work.
pub type IqBlock = Vec<IqSample>;

/// A block of audio samples.
pub type SampleBlock = Vec<Sample>;

/**
 * I/Q Data Format
 */
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IqFormat {
    /// Complex unsigned 8-bit
    Cu8,
    /// Complex signed 8-bit
    Cs8,
    /// Complex signed 16-bit little-endian
    Cs16,
    /// Complex signed 24-bit little-endian
    Cs24,
    /// Complex 32-bit float little-endian
    Cf32,
}

impl IqFormat {
    /// Number of bytes per complex sample.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            IqFormat::Cu8 | IqFormat::Cs8 => 2,
            IqFormat::Cs16 => 4,
            IqFormat::Cs24 => 6,
            IqFormat::Cf32 => 8,
        }
    }
}

impl std::str::FromStr for IqFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "u8" | "cu8" => Ok(IqFormat::Cu8),
            "s8" | "cs8" => Ok(IqFormat::Cs8),
            "s16" | "cs16" => Ok(IqFormat::Cs16),
            "s24" | "cs24" => Ok(IqFormat::Cs24),
            "f32" | "cf32" | "float" => Ok(IqFormat::Cf32),
            other => Err(Error::format(format!("unknown I/Q format '{}'", other))),
        }
    }
}

fn convert_bytes_to_complex(format: IqFormat, buffer: &[u8]) -> Vec<IqSample> {
    match format {
        IqFormat::Cu8 => buffer
            .chunks_exact(2)
            .map(|c| IqSample::new((c[0] as f32 - 127.5) / 128.0, (c[1] as f32 - 127.5) / 128.0))
            .collect(),
        IqFormat::Cs8 => buffer
            .chunks_exact(2)
            .map(|c| IqSample::new((c[0] as i8) as f32 / 128.0, (c[1] as i8) as f32 / 128.0))
            .collect(),
        IqFormat::Cs16 => buffer
            .chunks_exact(4)
            .map(|c| {
                IqSample::new(
                    i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0,
                    i16::from_le_bytes([c[2], c[3]]) as f32 / 32768.0,
                )
            })
            .collect(),
        IqFormat::Cs24 => buffer
            .chunks_exact(6)
            .map(|c| {
                IqSample::new(
                    s24_to_i32(c[0], c[1], c[2]) as f32 / 8_388_608.0,
                    s24_to_i32(c[3], c[4], c[5]) as f32 / 8_388_608.0,
                )
            })
            .collect(),
        IqFormat::Cf32 => buffer
            .chunks_exact(8)
            .map(|c| {
                IqSample::new(
                    f32::from_le_bytes([c[0], c[1], c[2], c[3]]),
                    f32::from_le_bytes([c[4], c[5], c[6], c[7]]),
                )
            })
            .collect(),
    }
}

/// Sign-extend a little-endian 24-bit integer.
fn s24_to_i32(b0: u8, b1: u8, b2: u8) -> i32 {
    (i32::from_le_bytes([b0, b1, b2, 0]) << 8) >> 8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_format_bytes_per_sample() {
        assert_eq!(IqFormat::Cu8.bytes_per_sample(), 2);
        assert_eq!(IqFormat::Cs16.bytes_per_sample(), 4);
        assert_eq!(IqFormat::Cs24.bytes_per_sample(), 6);
        assert_eq!(IqFormat::Cf32.bytes_per_sample(), 8);
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!(IqFormat::from_str("s16").unwrap(), IqFormat::Cs16);
        assert_eq!(IqFormat::from_str("FLOAT").unwrap(), IqFormat::Cf32);
        assert!(IqFormat::from_str("s12").is_err());
    }

    #[test]
    fn test_convert_cu8_midpoint() {
        let samples = convert_bytes_to_complex(IqFormat::Cu8, &[127, 128]);
        assert_eq!(samples.len(), 1);
        assert!(samples[0].re < 0.0 && samples[0].im > 0.0);
        assert!(samples[0].norm() < 0.01);
    }

    #[test]
    fn test_convert_cs16_full_scale() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&i16::MIN.to_le_bytes());
        bytes.extend_from_slice(&i16::MAX.to_le_bytes());
        let samples = convert_bytes_to_complex(IqFormat::Cs16, &bytes);
        assert_eq!(samples[0].re, -1.0);
        assert!((samples[0].im - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_convert_cs24_sign_extension() {
        // -1 in 24-bit two's complement is 0xffffff
        let samples = convert_bytes_to_complex(IqFormat::Cs24, &[0xff, 0xff, 0xff, 0, 0, 0x40]);
        assert!((samples[0].re + 1.0 / 8_388_608.0).abs() < 1e-9);
        assert!((samples[0].im - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_convert_cf32_verbatim() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0.25f32.to_le_bytes());
        bytes.extend_from_slice(&(-0.75f32).to_le_bytes());
        let samples = convert_bytes_to_complex(IqFormat::Cf32, &bytes);
        assert_eq!(samples[0], IqSample::new(0.25, -0.75));
    }
}
