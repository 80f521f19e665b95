//! Audio sinks and sample encoders.
//!
//! Three sinks share the [`AudioOutput`] trait: raw files or stdout with a
//! pluggable encoder, a WAV container whose header is completed when the
//! file is closed, and live playback through the default sound device.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::time::Duration;

use crossbeam::channel;
use tinyaudio::prelude::*;
use tracing::info;

use vaquero::{Error, Result, Sample};

/// Encode samples as signed 16-bit two's complement little-endian.
///
/// Samples are limited to [-1.0, 1.0] before scaling to [-32767, 32767].
pub fn samples_to_int16(samples: &[Sample], bytes: &mut Vec<u8>) {
    bytes.clear();
    bytes.reserve(2 * samples.len());
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        bytes.extend_from_slice(&v.to_le_bytes());
    }
}

/// Encode samples as 32-bit little-endian IEEE floats, unclamped.
pub fn samples_to_float32(samples: &[Sample], bytes: &mut Vec<u8>) {
    bytes.clear();
    bytes.reserve(4 * samples.len());
    for &s in samples {
        bytes.extend_from_slice(&(s as f32).to_le_bytes());
    }
}

/// Common surface of every audio sink.
pub trait AudioOutput {
    /// Write one block of (interleaved) samples.
    fn write(&mut self, samples: &[Sample]) -> Result<()>;

    /// Human-readable name of the sink.
    fn device_name(&self) -> &str;

    /// Flush and complete the sink; called once at shutdown.
    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Raw sample writer with a pluggable encoder.
pub struct RawAudioOutput {
    writer: Box<dyn Write + Send>,
    converter: fn(&[Sample], &mut Vec<u8>),
    bytebuf: Vec<u8>,
    name: String,
}

impl RawAudioOutput {
    /// Open `filename` for writing, `-` meaning standard output.
    pub fn new(filename: &str, converter: fn(&[Sample], &mut Vec<u8>)) -> Result<Self> {
        let writer: Box<dyn Write + Send> = if filename == "-" {
            Box::new(std::io::stdout())
        } else {
            Box::new(
                File::create(filename)
                    .map_err(|e| Error::sink(format!("can not open '{}' ({})", filename, e)))?,
            )
        };
        Ok(Self {
            writer,
            converter,
            bytebuf: Vec::new(),
            name: "RawAudioOutput".to_string(),
        })
    }
}

impl AudioOutput for RawAudioOutput {
    fn write(&mut self, samples: &[Sample]) -> Result<()> {
        (self.converter)(samples, &mut self.bytebuf);
        self.writer
            .write_all(&self.bytebuf)
            .map_err(|e| Error::sink(format!("write failed ({})", e)))
    }

    fn device_name(&self) -> &str {
        &self.name
    }

    fn finalize(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| Error::sink(format!("flush failed ({})", e)))
    }
}

/// .WAV file writer, 16-bit PCM.
pub struct WavAudioOutput {
    stream: File,
    channels: u16,
    sample_rate: u32,
    samples_written: u64,
    finalized: bool,
    bytebuf: Vec<u8>,
    name: String,
}

impl WavAudioOutput {
    /// Create the file and write a provisional header; the real sample
    /// count lands in the header on [`finalize`](AudioOutput::finalize).
    pub fn new(filename: &str, sample_rate: u32, stereo: bool) -> Result<Self> {
        let stream = File::create(filename)
            .map_err(|e| Error::sink(format!("can not open '{}' ({})", filename, e)))?;
        let mut output = Self {
            stream,
            channels: if stereo { 2 } else { 1 },
            sample_rate,
            samples_written: 0,
            finalized: false,
            bytebuf: Vec::new(),
            name: "WavAudioOutput".to_string(),
        };
        // Dummy count, replaced when the file is closed.
        output.write_header(0x7fff_0000)?;
        Ok(output)
    }

    fn write_header(&mut self, nsamples: u32) -> Result<()> {
        const BYTES_PER_SAMPLE: u32 = 2;
        const WAVE_FORMAT_PCM: u16 = 0x0001;

        let mut header = [0u8; 44];
        header[0..4].copy_from_slice(b"RIFF");
        header[4..8].copy_from_slice(&(36 + nsamples * BYTES_PER_SAMPLE).to_le_bytes());
        header[8..12].copy_from_slice(b"WAVE");
        header[12..16].copy_from_slice(b"fmt ");
        header[16..20].copy_from_slice(&16u32.to_le_bytes());
        header[20..22].copy_from_slice(&WAVE_FORMAT_PCM.to_le_bytes());
        header[22..24].copy_from_slice(&self.channels.to_le_bytes());
        header[24..28].copy_from_slice(&self.sample_rate.to_le_bytes());
        header[28..32].copy_from_slice(
            &(self.sample_rate * u32::from(self.channels) * BYTES_PER_SAMPLE).to_le_bytes(),
        );
        header[32..34]
            .copy_from_slice(&(u16::from(self.channels) * BYTES_PER_SAMPLE as u16).to_le_bytes());
        header[34..36].copy_from_slice(&16u16.to_le_bytes());
        header[36..40].copy_from_slice(b"data");
        header[40..44].copy_from_slice(&(nsamples * BYTES_PER_SAMPLE).to_le_bytes());

        self.stream
            .write_all(&header)
            .map_err(|e| Error::sink(format!("write failed ({})", e)))
    }
}

impl AudioOutput for WavAudioOutput {
    fn write(&mut self, samples: &[Sample]) -> Result<()> {
        samples_to_int16(samples, &mut self.bytebuf);
        self.stream
            .write_all(&self.bytebuf)
            .map_err(|e| Error::sink(format!("write failed ({})", e)))?;
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    fn device_name(&self) -> &str {
        &self.name
    }

    /// Rewrite the header with the final sample count.
    fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;
        debug_assert_eq!(self.samples_written % u64::from(self.channels), 0);
        let nsamples = u32::try_from(self.samples_written)
            .map_err(|_| Error::sink("sample count exceeds WAV limits"))?;
        self.stream
            .seek(SeekFrom::Start(0))
            .map_err(|e| Error::sink(format!("seek failed ({})", e)))?;
        self.write_header(nsamples)?;
        self.stream
            .flush()
            .map_err(|e| Error::sink(format!("flush failed ({})", e)))
    }
}

impl Drop for WavAudioOutput {
    fn drop(&mut self) {
        // Best effort; an explicit finalize already did the work.
        let _ = self.finalize();
    }
}

/// Live playback through the default output device.
///
/// The device callback drains a bounded channel and substitutes silence
/// when it runs dry, so transient underflows are inaudible bookkeeping,
/// not errors. The returned [`OutputDevice`] guard must be kept alive by
/// the caller for as long as playback should run.
pub struct PlaybackOutput {
    tx: channel::Sender<f32>,
    name: String,
}

impl PlaybackOutput {
    pub fn start(channels: usize, sample_rate: usize) -> Result<(Self, OutputDevice)> {
        let (tx, rx) = channel::bounded::<f32>(sample_rate * channels);
        let params = OutputDeviceParameters {
            channels_count: channels,
            sample_rate,
            channel_sample_count: 1024,
        };
        let device = run_output_device(params, move |data| {
            for sample in data.iter_mut() {
                *sample = rx.try_recv().unwrap_or(0.0);
            }
        })
        .map_err(|e| Error::sink(format!("can not open audio device ({})", e)))?;

        info!("playing audio to the default output device");
        Ok((
            Self {
                tx,
                name: "default audio output".to_string(),
            },
            device,
        ))
    }
}

impl AudioOutput for PlaybackOutput {
    fn write(&mut self, samples: &[Sample]) -> Result<()> {
        for &s in samples {
            // Pacing comes from the sound card draining the channel. A
            // stalled device turns into a sink error instead of a hang.
            self.tx
                .send_timeout(s as f32, Duration::from_secs(2))
                .map_err(|_| Error::sink("audio device stopped consuming samples"))?;
        }
        Ok(())
    }

    fn device_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_int16_round_trip_within_half_lsb() {
        let samples: Vec<Sample> = (-100..=100).map(|i| i as f64 / 100.0).collect();
        let mut bytes = Vec::new();
        samples_to_int16(&samples, &mut bytes);
        for (i, chunk) in bytes.chunks_exact(2).enumerate() {
            let v = i16::from_le_bytes([chunk[0], chunk[1]]);
            let decoded = v as f64 / 32767.0;
            assert!(
                (decoded - samples[i]).abs() <= 1.0 / 32767.0,
                "sample {} decoded {}",
                samples[i],
                decoded
            );
        }
    }

    #[test]
    fn test_int16_clamps_out_of_range() {
        let mut bytes = Vec::new();
        samples_to_int16(&[2.0, -2.0], &mut bytes);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 32767);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -32767);
    }

    #[test]
    fn test_zero_block_encodings() {
        let zeros = vec![0.0; 100];
        let mut bytes = Vec::new();
        samples_to_int16(&zeros, &mut bytes);
        assert_eq!(bytes.len(), 200);
        assert!(bytes.iter().all(|&b| b == 0));

        samples_to_float32(&zeros, &mut bytes);
        assert_eq!(bytes.len(), 400);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_float32_is_verbatim_and_unclamped() {
        let mut bytes = Vec::new();
        samples_to_float32(&[1.5, -0.25], &mut bytes);
        assert_eq!(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 1.5);
        assert_eq!(f32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), -0.25);
    }

    #[test]
    fn test_wav_file_is_bit_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let path_str = path.to_str().unwrap();

        {
            let mut wav = WavAudioOutput::new(path_str, 48_000, true).unwrap();
            // 16,000 stereo frames in uneven blocks.
            let mut remaining = 16_000usize;
            while remaining > 0 {
                let frames = remaining.min(1234);
                wav.write(&vec![0.0; frames * 2]).unwrap();
                remaining -= frames;
            }
            wav.finalize().unwrap();
        }

        let mut bytes = Vec::new();
        File::open(&path).unwrap().read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 44 + 16_000 * 2 * 2);

        // Header fields, little-endian throughout.
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(
            u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            36 + 32_000 * 2
        );
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]), 16);
        assert_eq!(u16::from_le_bytes([bytes[20], bytes[21]]), 0x0001);
        assert_eq!(u16::from_le_bytes([bytes[22], bytes[23]]), 2);
        assert_eq!(
            u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]),
            48_000
        );
        assert_eq!(
            u32::from_le_bytes([bytes[28], bytes[29], bytes[30], bytes[31]]),
            48_000 * 2 * 2
        );
        assert_eq!(u16::from_le_bytes([bytes[32], bytes[33]]), 4);
        assert_eq!(u16::from_le_bytes([bytes[34], bytes[35]]), 16);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(
            u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]),
            32_000 * 2
        );
    }

    #[test]
    fn test_raw_output_writes_encoded_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.raw");
        let path_str = path.to_str().unwrap();

        let mut raw = RawAudioOutput::new(path_str, samples_to_int16).unwrap();
        raw.write(&[0.0, 1.0, -1.0]).unwrap();
        raw.finalize().unwrap();

        let mut bytes = Vec::new();
        File::open(&path).unwrap().read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 6);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), 32767);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), -32767);
    }
}
