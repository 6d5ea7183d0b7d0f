//! # Error Types Module
//!
//! Centralized error handling for the spectrograph core.
//! Each concern gets its own error type with context and error chaining.
//!
//! ## Error Types
//! - `FrameDecodeError`: malformed byte stuffing in a received frame
//! - `ReaderError`: serial transport failures, fatal to the reader loop
//! - `TraceError`: saving or loading a recorded trace
//! - `ConfigError`: configuration file I/O and parsing errors
//!
//! ## Propagation
//! Frame and packet errors are absorbed inside the port reader. Only
//! transport, persistence and configuration errors reach the caller.

use std::fmt;
use std::path::PathBuf;

/// Errors produced when removing the byte stuffing from a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameDecodeError {
    /// The encoded frame contains the reserved delimiter byte
    ZeroInFrame { position: usize },
    /// A length code points past the end of the frame
    Truncated { expected: usize, available: usize },
}

impl fmt::Display for FrameDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameDecodeError::ZeroInFrame { position } => {
                write!(f, "Delimiter byte found inside frame at offset {}", position)
            }
            FrameDecodeError::Truncated { expected, available } => {
                write!(
                    f,
                    "Frame truncated: length code needs {} bytes, {} available",
                    expected, available
                )
            }
        }
    }
}

impl std::error::Error for FrameDecodeError {}

/// Errors that can occur while running the serial port reader
#[derive(Debug)]
pub enum ReaderError {
    /// Failed to open the serial port
    Open { port: String, source: std::io::Error },
    /// Failed to configure an opened port
    Configure { port: String, source: std::io::Error },
    /// Reading from or writing to the transport failed
    Io(std::io::Error),
    /// The reader is already running
    AlreadyRunning,
    /// The reader thread panicked before it could be joined
    ThreadPanicked,
}

impl fmt::Display for ReaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderError::Open { port, source } => {
                write!(f, "Failed to open serial port {}: {}", port, source)
            }
            ReaderError::Configure { port, source } => {
                write!(f, "Failed to configure serial port {}: {}", port, source)
            }
            ReaderError::Io(e) => write!(f, "Serial transport failed: {}", e),
            ReaderError::AlreadyRunning => write!(f, "Port reader is already running"),
            ReaderError::ThreadPanicked => write!(f, "Port reader thread panicked"),
        }
    }
}

impl std::error::Error for ReaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReaderError::Open { source, .. } => Some(source),
            ReaderError::Configure { source, .. } => Some(source),
            ReaderError::Io(e) => Some(e),
            ReaderError::AlreadyRunning | ReaderError::ThreadPanicked => None,
        }
    }
}

impl From<std::io::Error> for ReaderError {
    fn from(e: std::io::Error) -> Self {
        ReaderError::Io(e)
    }
}

/// Errors that can occur while saving or loading a trace file
#[derive(Debug)]
pub enum TraceError {
    /// Failed to open an existing trace
    Open { path: PathBuf, source: hdf5::Error },
    /// Failed to create a new trace file
    Create { path: PathBuf, source: hdf5::Error },
    /// Failed to read the sample dataset
    Read(hdf5::Error),
    /// Failed to write the sample dataset
    Write(hdf5::Error),
    /// The sample dataset is not an N x 3 array
    BadShape { dims: Vec<usize> },
    /// The trace was recorded at a different sampling rate
    SamplingRate { found: u32, expected: u32 },
    /// There are no samples to save
    Empty,
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceError::Open { path, source } => {
                write!(f, "Failed to open trace {}: {}", path.display(), source)
            }
            TraceError::Create { path, source } => {
                write!(f, "Failed to create trace {}: {}", path.display(), source)
            }
            TraceError::Read(e) => write!(f, "Failed to read trace samples: {}", e),
            TraceError::Write(e) => write!(f, "Failed to write trace samples: {}", e),
            TraceError::BadShape { dims } => {
                write!(f, "Trace samples must be an N x 3 array, found shape {:?}", dims)
            }
            TraceError::SamplingRate { found, expected } => {
                write!(
                    f,
                    "Trace was recorded at {} Hz, expected {} Hz",
                    found, expected
                )
            }
            TraceError::Empty => write!(f, "No samples to save"),
        }
    }
}

impl std::error::Error for TraceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TraceError::Open { source, .. } => Some(source),
            TraceError::Create { source, .. } => Some(source),
            TraceError::Read(e) => Some(e),
            TraceError::Write(e) => Some(e),
            TraceError::BadShape { .. } | TraceError::SamplingRate { .. } | TraceError::Empty => {
                None
            }
        }
    }
}

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::WriteFailed(e) => {
                write!(f, "Failed to write config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
            ConfigError::SerializeFailed(e) => {
                write!(f, "Failed to serialize config: {}", e)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
        }
    }
}
