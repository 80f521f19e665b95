//! Pulse-per-second timestamp writer.
//!
//! In FM mode each event derived from counted pilot periods is written with
//! its sample index and an interpolated wall-clock time. The other modes
//! have no pilot to count, so a periodic block marker is written instead.

use std::fs::File;
use std::io::Write;

use vaquero::{Error, Result};

use crate::fm::PpsEvent;
use crate::ModType;

/// Writer for pulse-per-second markers.
pub struct PpsWriter {
    writer: Box<dyn Write + Send>,
}

impl PpsWriter {
    /// Open `filename` (`-` for stdout) and write the mode's header line.
    pub fn open(filename: &str, modtype: ModType) -> Result<Self> {
        let writer: Box<dyn Write + Send> = if filename == "-" {
            Box::new(std::io::stdout())
        } else {
            Box::new(
                File::create(filename)
                    .map_err(|e| Error::sink(format!("can not open '{}' ({})", filename, e)))?,
            )
        };
        let mut pps = Self { writer };
        match modtype {
            ModType::Fm => pps.write_line("#pps_index sample_index   unix_time\n")?,
            _ => pps.write_line("#  block   unix_time\n")?,
        }
        Ok(pps)
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer
            .write_all(line.as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(|e| Error::sink(format!("PPS write failed ({})", e)))
    }

    /// One pilot-derived event with its interpolated timestamp.
    pub fn write_fm_event(&mut self, ev: &PpsEvent, unix_time: f64) -> Result<()> {
        self.write_line(&format!(
            "{:>8} {:>14} {:>18.6}\n",
            ev.pps_index, ev.sample_index, unix_time
        ))
    }

    /// Periodic marker for modes without a pilot.
    pub fn write_block_marker(&mut self, block: u64, unix_time: f64) -> Result<()> {
        self.write_line(&format!("{:>8} {:>18.6}\n", block, unix_time))
    }
}
