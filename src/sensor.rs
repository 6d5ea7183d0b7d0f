//! # Sensor Device Types
//!
//! Values exchanged with the accelerometer and the events the port reader
//! publishes about it.
//!
//! ## Key Types
//! - `SensorRange`: full-scale range of the accelerometer in g
//! - `Command`: outgoing configuration sent through the reader's queue
//! - `ReaderEvent`: connection status updates for the consumer side
//! - `ReaderStats`: counters kept by the reader thread

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Full-scale range of the accelerometer.
///
/// The numeric value doubles as the wire encoding of the set-range command
/// and as the scale used to convert raw readings into g.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SensorRange {
    G2,
    G4,
    G8,
    G16,
}

impl SensorRange {
    pub fn all() -> [SensorRange; 4] {
        [
            SensorRange::G2,
            SensorRange::G4,
            SensorRange::G8,
            SensorRange::G16,
        ]
    }

    /// Range in g, also the byte sent to the device
    pub fn value(&self) -> u8 {
        match self {
            SensorRange::G2 => 2,
            SensorRange::G4 => 4,
            SensorRange::G8 => 8,
            SensorRange::G16 => 16,
        }
    }
}

impl TryFrom<u8> for SensorRange {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(SensorRange::G2),
            4 => Ok(SensorRange::G4),
            8 => Ok(SensorRange::G8),
            16 => Ok(SensorRange::G16),
            other => Err(format!(
                "Unsupported sensor range {} (expected 2, 4, 8 or 16)",
                other
            )),
        }
    }
}

impl From<SensorRange> for u8 {
    fn from(range: SensorRange) -> u8 {
        range.value()
    }
}

impl FromStr for SensorRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_end_matches(['g', 'G']);
        let value: u8 = trimmed
            .parse()
            .map_err(|_| format!("Invalid sensor range: {}", s))?;
        SensorRange::try_from(value)
    }
}

impl fmt::Display for SensorRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}g", self.value())
    }
}

/// Command queued by the consumer side and sent by the reader thread.
///
/// Commands are written before the reader's next transport read, not
/// immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetRange(SensorRange),
}

/// Status updates published by the port reader
#[derive(Debug, Clone, PartialEq)]
pub enum ReaderEvent {
    Connected(String),
    Disconnected,
    /// Transport failure that terminated the reader loop
    Error(String),
    /// Diagnostic text reported by the device firmware
    DeviceError(String),
}

/// Counters updated by the reader thread
#[derive(Debug, Default)]
pub struct ReaderStats {
    samples: AtomicU64,
    dropped_frames: AtomicU64,
    dropped_packets: AtomicU64,
    device_errors: AtomicU64,
}

/// Point-in-time copy of `ReaderStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStatsSnapshot {
    pub samples: u64,
    pub dropped_frames: u64,
    pub dropped_packets: u64,
    pub device_errors: u64,
}

impl ReaderStats {
    pub fn record_sample(&self) {
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_frame(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_packet(&self) {
        self.dropped_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_device_error(&self) {
        self.device_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReaderStatsSnapshot {
        ReaderStatsSnapshot {
            samples: self.samples.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            dropped_packets: self.dropped_packets.load(Ordering::Relaxed),
            device_errors: self.device_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_values() {
        let values: Vec<u8> = SensorRange::all().iter().map(|r| r.value()).collect();
        assert_eq!(values, vec![2, 4, 8, 16]);
    }

    #[test]
    fn test_range_try_from() {
        assert_eq!(SensorRange::try_from(8), Ok(SensorRange::G8));
        assert!(SensorRange::try_from(3).is_err());
    }

    #[test]
    fn test_range_from_str() {
        assert_eq!("16".parse::<SensorRange>(), Ok(SensorRange::G16));
        assert_eq!("4g".parse::<SensorRange>(), Ok(SensorRange::G4));
        assert!("five".parse::<SensorRange>().is_err());
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = ReaderStats::default();
        stats.record_sample();
        stats.record_sample();
        stats.record_dropped_frame();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.samples, 2);
        assert_eq!(snapshot.dropped_frames, 1);
        assert_eq!(snapshot.dropped_packets, 0);
    }
}
