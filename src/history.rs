//! # Sample History Module
//!
//! Bounded, time-ordered store of accelerometer samples with a staging
//! buffer that decouples the reader thread from the analysis side.
//!
//! ## Architecture
//! - **SampleSink**: cloneable producer handle, appends to the staging buffer
//! - **SampleHistory**: consumer-owned ring of the most recent samples
//!
//! ## Data Flow
//! ```text
//! reader thread ── push ──▶ staging (Mutex<Vec>) ── flush ──▶ durable ring
//!                                                        └── window(from, to)
//! ```
//!
//! Samples carry no timestamp: the sample at index `i` was taken
//! `i / SAMPLING_RATE` seconds after the start of the recording.
//!
//! Pushed samples stay invisible to `window` until the consumer calls
//! `flush`, so an analysis pass never sees the history grow under it.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

/// Fixed sampling rate of the accelerometer in Hz
pub const SAMPLING_RATE: u32 = 4000;

/// History capacity: five minutes of samples
pub const MAX_HISTORY: usize = 5 * 60 * SAMPLING_RATE as usize;

/// One triaxial acceleration reading in g
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Sample {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Scalar extracted from a sample before analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Projection {
    /// Sum of the three axes
    #[default]
    Xyz,
    X,
    Y,
    Z,
}

impl Projection {
    pub fn apply(&self, sample: &Sample) -> f64 {
        match self {
            Projection::Xyz => sample.x + sample.y + sample.z,
            Projection::X => sample.x,
            Projection::Y => sample.y,
            Projection::Z => sample.z,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Projection::Xyz => "xyz",
            Projection::X => "x",
            Projection::Y => "y",
            Projection::Z => "z",
        }
    }
}

impl FromStr for Projection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xyz" | "sum" => Ok(Projection::Xyz),
            "x" => Ok(Projection::X),
            "y" => Ok(Projection::Y),
            "z" => Ok(Projection::Z),
            other => Err(format!(
                "Unknown projection '{}' (expected xyz, x, y or z)",
                other
            )),
        }
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Number of samples covering `duration` seconds.
///
/// Ties round to even, so 0.000125 s (half a sample) rounds to zero.
pub fn sample_count_for_window(duration: f64) -> usize {
    (duration * SAMPLING_RATE as f64).round_ties_even().max(0.0) as usize
}

/// Producer handle onto the staging buffer.
///
/// Cloned into the reader thread. The lock is held only for a single
/// `Vec::push` here and for a buffer swap in `SampleHistory::flush`.
#[derive(Clone, Default)]
pub struct SampleSink {
    staging: Arc<Mutex<Vec<Sample>>>,
}

impl SampleSink {
    pub fn push(&self, sample: Sample) {
        self.staging
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sample);
    }

    /// Samples waiting for the next flush
    pub fn pending(&self) -> usize {
        self.staging
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn swap(&self, spare: &mut Vec<Sample>) {
        let mut staging = self.staging.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::swap(&mut *staging, spare);
    }

    fn discard(&self) {
        self.staging
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Bounded ring of the most recent samples.
///
/// Owned by the consumer side; only the staging buffer is shared with the
/// producer.
pub struct SampleHistory {
    data: VecDeque<Sample>,
    capacity: usize,
    sink: SampleSink,
    /// Second buffer swapped with staging on flush, keeps its allocation
    spare: Vec<Sample>,
}

impl Default for SampleHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleHistory {
    /// History holding up to `MAX_HISTORY` samples
    pub fn new() -> Self {
        Self::with_capacity(MAX_HISTORY)
    }

    /// History with a custom bound, at least one sample
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: VecDeque::with_capacity(capacity.min(MAX_HISTORY)),
            capacity,
            sink: SampleSink::default(),
            spare: Vec::new(),
        }
    }

    /// Producer handle for the reader thread
    pub fn sink(&self) -> SampleSink {
        self.sink.clone()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a sample to the staging buffer
    pub fn push(&self, sample: Sample) {
        self.sink.push(sample);
    }

    /// Move all staged samples into the ring, evicting the oldest beyond
    /// capacity. Returns the number of samples moved.
    pub fn flush(&mut self) -> usize {
        self.sink.swap(&mut self.spare);
        let moved = self.spare.len();
        if moved == 0 {
            return 0;
        }

        // Only the newest `capacity` staged samples can survive
        let skip = moved.saturating_sub(self.capacity);
        for sample in self.spare.drain(..).skip(skip) {
            if self.data.len() == self.capacity {
                self.data.pop_front();
            }
            self.data.push_back(sample);
        }

        log::trace!("Flushed {} samples, history holds {}", moved, self.data.len());
        moved
    }

    /// Number of durable samples
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Durable history length in seconds
    pub fn length_seconds(&self) -> f64 {
        self.data.len() as f64 / SAMPLING_RATE as f64
    }

    /// Projected values for the time range `[from_t, to_t)` in seconds.
    ///
    /// Always returns `sample_count_for_window(to_t - from_t)` values. A
    /// start before zero is clamped to zero; if the history does not cover
    /// the whole window the result is all zeros.
    pub fn window(&self, from_t: f64, to_t: f64, projection: Projection) -> Vec<f64> {
        let expected = sample_count_for_window(to_t - from_t);
        let len = self.data.len();

        // Truncate towards zero, then clamp into the buffer
        let start = ((from_t * SAMPLING_RATE as f64) as i64).clamp(0, len as i64) as usize;
        let end = (start + expected).min(len);

        if end - start != expected {
            return vec![0.0; expected];
        }

        self.data
            .range(start..end)
            .map(|sample| projection.apply(sample))
            .collect()
    }

    /// Replace the durable contents, keeping only the most recent
    /// `capacity` samples. Staged samples are discarded.
    pub fn replace(&mut self, samples: Vec<Sample>) {
        let skip = samples.len().saturating_sub(self.capacity);
        if skip > 0 {
            log::warn!(
                "Loaded trace exceeds history capacity, dropping {} oldest samples",
                skip
            );
        }
        self.data.clear();
        self.data.extend(samples.into_iter().skip(skip));
        self.sink.discard();
    }

    /// Empty the durable history. Ingestion should be stopped first.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Full durable contents, oldest first
    pub fn snapshot_all(&self) -> Vec<Sample> {
        self.data.iter().copied().collect()
    }

    /// Most recent durable sample
    pub fn last(&self) -> Option<Sample> {
        self.data.back().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn ramp(count: usize) -> Vec<Sample> {
        (0..count)
            .map(|i| Sample::new(i as f64, -(i as f64), 0.5))
            .collect()
    }

    #[test]
    fn test_projections() {
        let sample = Sample::new(1.0, 2.0, 4.0);
        assert_eq!(Projection::Xyz.apply(&sample), 7.0);
        assert_eq!(Projection::X.apply(&sample), 1.0);
        assert_eq!(Projection::Y.apply(&sample), 2.0);
        assert_eq!(Projection::Z.apply(&sample), 4.0);
        assert_eq!("Y".parse::<Projection>(), Ok(Projection::Y));
        assert!("w".parse::<Projection>().is_err());
    }

    #[test]
    fn test_sample_count_rounding() {
        assert_eq!(sample_count_for_window(1.0), 4000);
        assert_eq!(sample_count_for_window(0.5), 2000);
        assert_eq!(sample_count_for_window(-1.0), 0);
    }

    #[test]
    fn test_push_invisible_until_flush() {
        let mut history = SampleHistory::new();
        for sample in ramp(4000) {
            history.push(sample);
        }
        assert_eq!(history.length_seconds(), 0.0);
        assert_eq!(history.window(0.0, 1.0, Projection::X), vec![0.0; 4000]);

        assert_eq!(history.flush(), 4000);
        assert_eq!(history.length_seconds(), 1.0);
        let window = history.window(0.0, 1.0, Projection::X);
        assert_eq!(window.len(), 4000);
        assert_eq!(window[0], 0.0);
        assert_eq!(window[3999], 3999.0);
    }

    #[test]
    fn test_flush_increases_length_by_pushed_count() {
        let mut history = SampleHistory::new();
        history.push(Sample::default());
        history.flush();
        let before = history.length_seconds();

        for sample in ramp(1000) {
            history.push(sample);
        }
        history.flush();
        assert!((history.length_seconds() - before - 1000.0 / 4000.0).abs() < 1e-12);
    }

    #[test]
    fn test_window_on_empty_history() {
        let history = SampleHistory::new();
        let window = history.window(-1.0, 0.0, Projection::X);
        assert_eq!(window.len(), 4000);
        assert!(window.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_window_length_always_expected() {
        let mut history = SampleHistory::new();
        for sample in ramp(8000) {
            history.push(sample);
        }
        history.flush();

        // Negative start clamps to zero and reads real data
        let clamped = history.window(-0.25, 0.75, Projection::X);
        assert_eq!(clamped.len(), 4000);
        assert_eq!(clamped[1], 1.0);

        // Window running past the end is zero-filled
        let past_end = history.window(1.5, 2.5, Projection::X);
        assert_eq!(past_end.len(), 4000);
        assert!(past_end.iter().all(|&v| v == 0.0));

        // Entirely beyond the buffer
        let beyond = history.window(10.0, 10.5, Projection::Y);
        assert_eq!(beyond.len(), 2000);
        assert!(beyond.iter().all(|&v| v == 0.0));

        let exact = history.window(1.0, 2.0, Projection::Y);
        assert_eq!(exact[0], -4000.0);
        assert_eq!(exact[3999], -7999.0);
    }

    #[test]
    fn test_fifo_eviction() {
        let mut history = SampleHistory::with_capacity(100);
        for sample in ramp(60) {
            history.push(sample);
        }
        history.flush();
        for sample in ramp(90).into_iter().skip(60) {
            history.push(sample);
        }
        history.flush();
        assert_eq!(history.len(), 90);

        for i in 90..250 {
            history.push(Sample::new(i as f64, 0.0, 0.0));
        }
        history.flush();
        assert_eq!(history.len(), 100);
        let snapshot = history.snapshot_all();
        assert_eq!(snapshot[0].x, 150.0);
        assert_eq!(snapshot[99].x, 249.0);
    }

    #[test]
    fn test_replace_truncates_to_capacity() {
        let mut history = SampleHistory::with_capacity(10);
        history.push(Sample::new(99.0, 99.0, 99.0));
        history.replace(ramp(25));

        assert_eq!(history.len(), 10);
        assert_eq!(history.snapshot_all()[0].x, 15.0);
        assert_eq!(history.last().map(|s| s.x), Some(24.0));

        // Staged sample was discarded by replace
        assert_eq!(history.flush(), 0);
        assert_eq!(history.len(), 10);
    }

    #[test]
    fn test_clear_keeps_staging() {
        let mut history = SampleHistory::new();
        history.replace(ramp(40));
        history.push(Sample::default());
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.sink().pending(), 1);
    }

    #[test]
    fn test_concurrent_push_and_flush() {
        let mut history = SampleHistory::new();
        let sink = history.sink();

        let producer = thread::spawn(move || {
            for i in 0..20_000 {
                sink.push(Sample::new(i as f64, 0.0, 0.0));
            }
        });

        let mut total = 0;
        while !producer.is_finished() {
            total += history.flush();
        }
        producer.join().unwrap();
        total += history.flush();

        assert_eq!(total, 20_000);
        let snapshot = history.snapshot_all();
        assert!(snapshot.windows(2).all(|pair| pair[0].x < pair[1].x));
    }
}
