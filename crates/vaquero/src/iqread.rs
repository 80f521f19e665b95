//! I/Q data reading.
//!
//! [`IqRead`] turns any byte stream of interleaved I/Q samples into an
//! iterator over sample blocks, converting from the configured byte format
//! to complex floats. Files and standard input are supported out of the box.

use std::io::Read;
use std::path::Path;

use crate::{convert_bytes_to_complex, IqBlock, IqFormat};

/// Synchronous block reader over a raw I/Q byte stream.
pub struct IqRead<R: Read> {
    format: IqFormat,
    chunk_size: usize,
    reader: R,
}

impl IqRead<std::io::BufReader<std::fs::File>> {
    /// Open a file of raw interleaved I/Q samples.
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        chunk_size: usize,
        format: IqFormat,
    ) -> Result<Self, std::io::Error> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(Self {
            format,
            chunk_size,
            reader,
        })
    }
}

impl IqRead<std::io::BufReader<std::io::Stdin>> {
    /// Read raw interleaved I/Q samples from standard input.
    pub fn from_stdin(chunk_size: usize, format: IqFormat) -> Self {
        Self {
            format,
            chunk_size,
            reader: std::io::BufReader::new(std::io::stdin()),
        }
    }
}

impl<R: Read> IqRead<R> {
    /// Wrap an arbitrary byte reader.
    pub fn new(reader: R, chunk_size: usize, format: IqFormat) -> Self {
        Self {
            format,
            chunk_size,
            reader,
        }
    }

    fn read_samples(&mut self) -> Result<IqBlock, std::io::Error> {
        let bytes_per_sample = self.format.bytes_per_sample();
        let mut buffer = vec![0u8; self.chunk_size * bytes_per_sample];

        // Fill the whole block; a short final read yields a partial block.
        let mut filled = 0;
        while filled < buffer.len() {
            let n = self.reader.read(&mut buffer[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        let whole = filled - filled % bytes_per_sample;
        Ok(convert_bytes_to_complex(self.format, &buffer[..whole]))
    }
}

impl<R: Read> Iterator for IqRead<R> {
    type Item = Result<IqBlock, std::io::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_samples() {
            Ok(samples) if samples.is_empty() => None,
            Ok(samples) => Some(Ok(samples)),
            Err(e) => Some(Err(e)),
        }
    }
}
