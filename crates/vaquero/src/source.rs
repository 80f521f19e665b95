//! Device capability surface.
//!
//! A receiver consumes tuner devices through the [`SdrSource`] trait: a
//! small operation set for configuration, rate/frequency queries and block
//! streaming into a [`DataBuffer`]. One implementation ships in-tree, the
//! file-backed [`FileSource`]; hardware families are listed in [`DevType`]
//! but their drivers live outside this crate.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::buffer::DataBuffer;
use crate::error::{Error, Result};
use crate::iqread::IqRead;
use crate::{IqFormat, IqSample};

/// Supported device families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevType {
    /// RTL-SDR dongles
    RtlSdr,
    /// Airspy R2 / Mini
    AirspyR2,
    /// Airspy HF+
    AirspyHf,
    /// Raw I/Q file playback
    File,
}

impl FromStr for DevType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rtlsdr" => Ok(DevType::RtlSdr),
            "airspy" => Ok(DevType::AirspyR2),
            "airspyhf" => Ok(DevType::AirspyHf),
            "filesource" => Ok(DevType::File),
            other => Err(Error::config(format!(
                "unknown device type '{}' (expected rtlsdr, airspy, airspyhf or filesource)",
                other
            ))),
        }
    }
}

/// Capability surface of a tuner device.
///
/// `start` begins pushing I/Q blocks into the sink from a thread owned by
/// the source; the thread honors the termination flag at each block boundary
/// and pushes an end-of-stream marker when it stops. A source that fails
/// mid-stream sets the termination flag itself so the rest of the pipeline
/// can drain.
pub trait SdrSource: Send {
    /// Apply a comma-separated `key=value` configuration string.
    fn configure(&mut self, config: &str) -> Result<()>;

    /// Device sample rate in Hz, valid after configuration.
    fn sample_rate(&self) -> f64;

    /// Frequency the device is actually tuned to, in Hz.
    fn frequency(&self) -> f64;

    /// Frequency that was requested, in Hz.
    fn configured_frequency(&self) -> f64;

    /// True for low-IF devices whose spectrum needs no Fs/4 shift.
    fn is_low_if(&self) -> bool;

    /// Begin streaming blocks into `sink` from the device thread.
    fn start(&mut self, sink: Arc<DataBuffer<IqSample>>, stop: Arc<AtomicBool>) -> Result<()>;

    /// Halt production and join the device thread.
    fn stop(&mut self);
}

/// List the devices a family can enumerate.
pub fn device_names(devtype: DevType) -> Vec<String> {
    match devtype {
        DevType::File => vec!["FileSource".to_string()],
        // Tuner drivers are external; nothing to enumerate in-tree.
        DevType::RtlSdr | DevType::AirspyR2 | DevType::AirspyHf => Vec::new(),
    }
}

/// Open a device of the given family by index.
pub fn open(devtype: DevType, devidx: usize) -> Result<Box<dyn SdrSource>> {
    match devtype {
        DevType::File => {
            if devidx != 0 {
                return Err(Error::device(format!("invalid device index {}", devidx)));
            }
            Ok(Box::new(FileSource::new()))
        }
        DevType::RtlSdr | DevType::AirspyR2 | DevType::AirspyHf => Err(Error::device(
            "tuner driver support is not built into this binary",
        )),
    }
}

/// Split a `key=value,switch,...` configuration string into pairs.
///
/// Bare words become `(word, None)`; empty segments are skipped.
pub fn parse_config_pairs(config: &str) -> Vec<(String, Option<String>)> {
    config
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|item| match item.split_once('=') {
            Some((k, v)) => (k.trim().to_string(), Some(v.trim().to_string())),
            None => (item.to_string(), None),
        })
        .collect()
}

fn parse_value<T: FromStr>(key: &str, value: Option<String>) -> Result<T> {
    value
        .as_deref()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::config(format!("invalid value for '{}'", key)))
}

const DEFAULT_BLOCK_LENGTH: usize = 2048;

/// I/Q file playback source.
///
/// Reads raw interleaved I/Q samples at a configured rate, pacing blocks to
/// wall-clock time so the pipeline sees the cadence of a real tuner.
///
/// Configuration keys: `freq=<Hz>`, `srate=<Hz>`, `filename=<path>`,
/// `format=<u8|s8|s16|s24|f32>`, `blklen=<samples>` and the `zero_offset`
/// switch for zero-IF recordings. The legacy `raw` switch is accepted;
/// raw input is the only supported encoding.
pub struct FileSource {
    freq: f64,
    srate: f64,
    filename: Option<PathBuf>,
    format: IqFormat,
    block_length: usize,
    zero_offset: bool,
    handle: Option<JoinHandle<()>>,
}

impl FileSource {
    pub fn new() -> Self {
        Self {
            freq: 100_000_000.0,
            srate: 0.0,
            filename: None,
            format: IqFormat::Cf32,
            block_length: DEFAULT_BLOCK_LENGTH,
            zero_offset: false,
            handle: None,
        }
    }
}

impl Default for FileSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SdrSource for FileSource {
    fn configure(&mut self, config: &str) -> Result<()> {
        for (key, value) in parse_config_pairs(config) {
            match key.as_str() {
                "freq" => self.freq = parse_value(&key, value)?,
                "srate" => self.srate = parse_value(&key, value)?,
                "filename" => {
                    self.filename = Some(PathBuf::from(value.ok_or_else(|| {
                        Error::config("missing value for 'filename'")
                    })?))
                }
                "format" => {
                    let v: String = parse_value(&key, value)?;
                    self.format = IqFormat::from_str(&v)?;
                }
                "blklen" => self.block_length = parse_value(&key, value)?,
                "zero_offset" => self.zero_offset = true,
                "raw" => {}
                other => {
                    return Err(Error::config(format!(
                        "unknown file source option '{}'",
                        other
                    )))
                }
            }
        }

        if self.srate <= 0.0 {
            return Err(Error::config("file source requires srate=<Hz>"));
        }
        if self.block_length == 0 {
            return Err(Error::config("blklen must be positive"));
        }
        if self.filename.is_none() {
            return Err(Error::config("file source requires filename=<path>"));
        }
        Ok(())
    }

    fn sample_rate(&self) -> f64 {
        self.srate
    }

    fn frequency(&self) -> f64 {
        self.freq
    }

    fn configured_frequency(&self) -> f64 {
        self.freq
    }

    fn is_low_if(&self) -> bool {
        // A zero-offset recording keeps the wanted signal on DC and needs
        // the Fs/4 shift, exactly like a zero-IF tuner.
        !self.zero_offset
    }

    fn start(&mut self, sink: Arc<DataBuffer<IqSample>>, stop: Arc<AtomicBool>) -> Result<()> {
        let path = self
            .filename
            .clone()
            .ok_or_else(|| Error::device("file source not configured"))?;
        let reader = IqRead::from_file(&path, self.block_length, self.format)?;
        info!("streaming I/Q samples from {}", path.display());

        let srate = self.srate;
        self.handle = Some(std::thread::spawn(move || {
            let started = Instant::now();
            let mut samples_sent = 0u64;
            for block in reader {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                match block {
                    Ok(samples) => {
                        samples_sent += samples.len() as u64;
                        sink.push(samples);
                        // Pace playback to the nominal device rate.
                        let target = Duration::from_secs_f64(samples_sent as f64 / srate);
                        let elapsed = started.elapsed();
                        if target > elapsed {
                            std::thread::sleep(target - elapsed);
                        }
                    }
                    Err(e) => {
                        error!("file source read failed: {}", e);
                        stop.store(true, Ordering::Release);
                        break;
                    }
                }
            }
            sink.push_end();
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
