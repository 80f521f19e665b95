//! Error handling for the vaquero library.
//!
//! A single error type covers I/O, device, configuration and sink failures.
//! DSP blocks themselves are infallible; anomalies inside them are handled
//! locally by the block concerned.

use thiserror::Error;

/// A specialized Result type for vaquero operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for vaquero operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, pipes, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid option or out-of-range value, fatal at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// Device open, configuration or streaming failure
    #[error("device error: {0}")]
    Device(String),

    /// Audio sink failure
    #[error("audio output error: {0}")]
    Sink(String),

    /// Invalid sample format or conversion error
    #[error("format error: {0}")]
    Format(String),
}

// Helper constructors for common error scenarios

impl Error {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Create a device error with a custom message
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Error::Device(msg.into())
    }

    /// Create a sink error with a custom message
    pub fn sink<S: Into<String>>(msg: S) -> Self {
        Error::Sink(msg.into())
    }

    /// Create a format error with a custom message
    pub fn format<S: Into<String>>(msg: S) -> Self {
        Error::Format(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_config_error_constructor() {
        let err = Error::config("unknown option 'foo'");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.to_string(), "configuration error: unknown option 'foo'");
    }

    #[test]
    fn test_device_error_constructor() {
        let err = Error::device("open failed");
        assert!(matches!(err, Error::Device(_)));
        assert!(err.to_string().contains("device error"));
    }
}
