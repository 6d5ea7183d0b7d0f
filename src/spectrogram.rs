//! # Spectrogram Assembly Module
//!
//! Builds a scrolling time-frequency view out of overlapping spectra.
//!
//! ## Layout
//! - Each line is the magnitude spectrum of one `sample_window`.
//! - Consecutive windows start `sample_window / DIVISION_FACTOR` apart
//!   (90% overlap).
//! - Lines live in a fixed-capacity ring covering `spectrogram_length`
//!   seconds; pushing a new line overwrites the oldest.
//!
//! ## Incremental Updates
//! `update` is called once per display tick. It computes the lines whose
//! windows became available since the previous call, at most
//! `MAX_LINES_PER_UPDATE` of them. A larger backlog carries over to the next
//! tick, so one call never costs more than that many FFTs.

use crate::history::{sample_count_for_window, Projection, SampleHistory};
use crate::spectrum::SpectralAnalyzer;

/// Lines per `sample_window`; the window advance is its reciprocal
pub const DIVISION_FACTOR: usize = 10;

/// Upper bound on spectra computed by a single `update`
pub const MAX_LINES_PER_UPDATE: usize = 300;

/// Time-offset change that forces a rebuild, in seconds
const OFFSET_EPSILON: f64 = 0.01;

/// Parameters that define the shape of the spectrogram
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrogramParams {
    /// Seconds of data per line
    pub sample_window: f64,
    pub min_freq: f64,
    pub max_freq: f64,
    /// Seconds of history covered by all lines
    pub spectrogram_length: f64,
    pub projection: Projection,
}

impl SpectrogramParams {
    /// Time between the starts of consecutive windows
    pub fn step(&self) -> f64 {
        self.sample_window / DIVISION_FACTOR as f64
    }

    /// Whether a window covers at least one sample. Updates with a
    /// shorter window are ignored.
    pub fn is_analyzable(&self) -> bool {
        sample_count_for_window(self.sample_window) > 0
    }

    /// Number of lines the ring holds
    pub fn line_capacity(&self) -> usize {
        if self.sample_window <= 0.0 {
            return 0;
        }
        (DIVISION_FACTOR as f64 * self.spectrogram_length / self.sample_window).max(0.0) as usize
    }
}

/// Preallocated ring of equally wide spectrum lines
#[derive(Debug, Default)]
struct LineRing {
    lines: Vec<Vec<f64>>,
    /// Slot holding the oldest line
    head: usize,
}

impl LineRing {
    fn filled(capacity: usize, width: usize) -> Self {
        Self {
            lines: vec![vec![0.0; width]; capacity],
            head: 0,
        }
    }

    fn push(&mut self, line: &[f64]) {
        if self.lines.is_empty() {
            return;
        }
        let slot = &mut self.lines[self.head];
        slot.clear();
        slot.extend_from_slice(line);
        self.head = (self.head + 1) % self.lines.len();
    }

    fn push_zeros(&mut self) {
        if self.lines.is_empty() {
            return;
        }
        self.lines[self.head].fill(0.0);
        self.head = (self.head + 1) % self.lines.len();
    }

    fn iter(&self) -> impl Iterator<Item = &[f64]> {
        let (newer, older) = self.lines.split_at(self.head);
        older.iter().chain(newer.iter()).map(|line| line.as_slice())
    }

    fn len(&self) -> usize {
        self.lines.len()
    }
}

/// Work done by one `update` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    /// The ring was rebuilt because parameters or offset changed
    pub reset: bool,
    /// Lines computed from data
    pub computed: usize,
    /// Zero lines pushed for windows before the start of the recording
    pub placeholders: usize,
    /// More windows were ready but deferred to the next call
    pub deferred: bool,
}

/// Rolling spectrogram over the sample history
#[derive(Debug, Default)]
pub struct Spectrogram {
    ring: LineRing,
    params: Option<SpectrogramParams>,
    time_offset: f64,
    /// Start time of the most recent window
    last_time: f64,
    frequencies: Vec<f64>,
}

impl Spectrogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the spectrogram up to the end of the history.
    ///
    /// `time_offset` shifts the right edge of the view relative to the end
    /// of the history (negative values scrub back in time).
    pub fn update(
        &mut self,
        history: &SampleHistory,
        analyzer: &mut SpectralAnalyzer,
        params: &SpectrogramParams,
        time_offset: f64,
    ) -> UpdateSummary {
        let mut summary = UpdateSummary::default();
        if !params.is_analyzable() {
            log::debug!(
                "Spectrogram window of {}s holds no samples, skipping update",
                params.sample_window
            );
            return summary;
        }
        let horizon = history.length_seconds() + time_offset;

        let params_changed = self.params.as_ref() != Some(params);
        if params_changed || (time_offset - self.time_offset).abs() > OFFSET_EPSILON {
            self.reset(history, analyzer, params, time_offset);
            summary.reset = true;
        }

        let step = params.step();
        loop {
            let start = self.last_time + step;
            let end = start + params.sample_window;
            if end > horizon {
                break;
            }

            if start < 0.0 && end < 0.0 {
                self.ring.push_zeros();
                summary.placeholders += 1;
            } else {
                if summary.computed == MAX_LINES_PER_UPDATE {
                    summary.deferred = true;
                    break;
                }
                let window = history.window(start, end, params.projection);
                let line = analyzer.spectrum(&window, params.min_freq, params.max_freq);
                self.ring.push(&line.magnitudes);
                summary.computed += 1;
            }
            self.last_time = start;
        }

        if summary.deferred {
            log::debug!(
                "Spectrogram backlog of {:.2}s deferred to next update",
                horizon - self.last_time - params.sample_window
            );
        }
        summary
    }

    fn reset(
        &mut self,
        history: &SampleHistory,
        analyzer: &mut SpectralAnalyzer,
        params: &SpectrogramParams,
        time_offset: f64,
    ) {
        let probe_window = history.window(0.0, params.sample_window, params.projection);
        let probe = analyzer.spectrum(&probe_window, params.min_freq, params.max_freq);

        let capacity = params.line_capacity();
        log::debug!(
            "Rebuilding spectrogram: {} lines of {} bins",
            capacity,
            probe.len()
        );

        self.ring = LineRing::filled(capacity, probe.len());
        self.frequencies = probe.frequencies;
        self.params = Some(*params);
        self.time_offset = time_offset;
        self.last_time = history.length_seconds() + time_offset - params.spectrogram_length;
    }

    /// Force a rebuild on the next `update`, for when the history was
    /// replaced or cleared under it
    pub fn invalidate(&mut self) {
        self.params = None;
    }

    /// Lines from oldest to newest
    pub fn lines(&self) -> impl Iterator<Item = &[f64]> {
        self.ring.iter()
    }

    /// Number of lines currently held
    pub fn line_count(&self) -> usize {
        self.ring.len()
    }

    /// Bin frequencies shared by every line
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    /// Start time of the most recently computed window
    pub fn last_time(&self) -> f64 {
        self.last_time
    }

    pub fn params(&self) -> Option<&SpectrogramParams> {
        self.params.as_ref()
    }

    /// Lines padded to a common width and clamped to `[0, y_range]`,
    /// oldest first
    pub fn to_matrix(&self, y_range: f64) -> Vec<Vec<f64>> {
        let width = self.lines().map(|line| line.len()).max().unwrap_or(0);
        let ceiling = y_range.max(0.0);
        self.lines()
            .map(|line| {
                let mut row: Vec<f64> = line.iter().map(|v| v.clamp(0.0, ceiling)).collect();
                row.resize(width, 0.0);
                row
            })
            .collect()
    }
}
