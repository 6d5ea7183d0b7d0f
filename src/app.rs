//! # Spectrograph Session
//!
//! Consumer-side façade tying the pieces together. A GUI or the CLI drives
//! it: start/stop recording, change the sensor range, call `tick` on every
//! refresh, read spectra, save and load traces.
//!
//! ## Tick
//! 1. Drain reader status events
//! 2. Flush the staging buffer into the history
//! 3. Advance the spectrogram (bounded work per tick)

use crate::config::{AnalysisParams, Config};
use crate::error::{ReaderError, TraceError};
use crate::history::{Projection, SampleHistory};
use crate::reader::PortReader;
use crate::sensor::{ReaderEvent, ReaderStatsSnapshot, SensorRange};
use crate::spectrogram::{Spectrogram, UpdateSummary};
use crate::spectrum::{SpectralAnalyzer, Spectrum};
use crate::trace;
use crossbeam_channel::Receiver;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connected(String),
    Failed(String),
}

/// Result of one refresh tick
#[derive(Debug, Clone, Default)]
pub struct TickSummary {
    /// Samples moved from staging into the history
    pub flushed: usize,
    pub spectrogram: UpdateSummary,
    /// Status events received since the previous tick
    pub events: Vec<ReaderEvent>,
}

pub struct Spectrograph {
    history: SampleHistory,
    reader: PortReader,
    events: Receiver<ReaderEvent>,
    analyzer: SpectralAnalyzer,
    spectrogram: Spectrogram,
    params: AnalysisParams,
    time_offset: f64,
    connection_state: ConnectionState,
}

impl Spectrograph {
    pub fn new(config: &Config) -> Self {
        let history = SampleHistory::new();
        let (reader, events) = PortReader::with_settings(history.sink(), config.port_settings());

        Spectrograph {
            history,
            reader,
            events,
            analyzer: SpectralAnalyzer::new(),
            spectrogram: Spectrogram::new(),
            params: config.analysis.validate(),
            time_offset: 0.0,
            connection_state: ConnectionState::Disconnected,
        }
    }

    /// Open `port` and start ingesting samples
    pub fn start(&mut self, port: &str) -> Result<(), ReaderError> {
        self.reader.start(port)
    }

    /// Stop ingesting. No samples arrive after this returns.
    pub fn stop(&mut self) -> Result<(), ReaderError> {
        self.reader.stop()?;
        self.drain_events();
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.reader.is_running()
    }

    /// Queue a range change; sent before the reader's next read
    pub fn set_range(&self, range: SensorRange) {
        self.reader.set_range(range);
    }

    pub fn reader(&mut self) -> &mut PortReader {
        &mut self.reader
    }

    pub fn reader_stats(&self) -> ReaderStatsSnapshot {
        self.reader.stats()
    }

    pub fn connection_state(&self) -> &ConnectionState {
        &self.connection_state
    }

    pub fn history(&self) -> &SampleHistory {
        &self.history
    }

    pub fn params(&self) -> &AnalysisParams {
        &self.params
    }

    /// Replace the analysis parameters; the spectrogram rebuilds on the
    /// next tick if they changed
    pub fn set_params(&mut self, params: AnalysisParams) {
        self.params = params.validate();
    }

    /// Shift the view back from the end of the history, in seconds
    pub fn set_time_offset(&mut self, offset: f64) {
        self.time_offset = offset.min(0.0);
    }

    pub fn time_offset(&self) -> f64 {
        self.time_offset
    }

    /// Pull new samples and advance the spectrogram
    pub fn tick(&mut self) -> TickSummary {
        let events = self.drain_events();
        let flushed = self.history.flush();
        let spectrogram = self.spectrogram.update(
            &self.history,
            &mut self.analyzer,
            &self.params.spectrogram_params(),
            self.time_offset,
        );

        TickSummary {
            flushed,
            spectrogram,
            events,
        }
    }

    fn drain_events(&mut self) -> Vec<ReaderEvent> {
        let events: Vec<ReaderEvent> = self.events.try_iter().collect();
        for event in &events {
            match event {
                ReaderEvent::Connected(port) => {
                    self.connection_state = ConnectionState::Connected(port.clone());
                }
                ReaderEvent::Disconnected => {
                    self.connection_state = ConnectionState::Disconnected;
                }
                ReaderEvent::Error(message) => {
                    self.connection_state = ConnectionState::Failed(message.clone());
                }
                ReaderEvent::DeviceError(_) => {}
            }
        }
        events
    }

    /// History length in seconds
    pub fn get_length(&self) -> f64 {
        self.history.length_seconds()
    }

    /// Spectrum of the window `[from_t, to_t)` restricted to
    /// `[from_freq, to_freq)`
    pub fn get_fft(
        &mut self,
        from_t: f64,
        to_t: f64,
        from_freq: f64,
        to_freq: f64,
        projection: Projection,
    ) -> Spectrum {
        let window = self.history.window(from_t, to_t, projection);
        self.analyzer.spectrum(&window, from_freq, to_freq)
    }

    /// Spectrum of the most recent `sample_window` seconds
    pub fn current_spectrum(&mut self) -> Spectrum {
        let AnalysisParams {
            sample_window,
            min_freq,
            max_freq,
            projection,
            ..
        } = self.params;
        let end = self.get_length() + self.time_offset;
        self.get_fft(end - sample_window, end, min_freq, max_freq, projection)
    }

    pub fn spectrogram(&self) -> &Spectrogram {
        &self.spectrogram
    }

    /// Spectrogram lines clamped to the configured y range
    pub fn spectrogram_matrix(&self) -> Vec<Vec<f64>> {
        self.spectrogram.to_matrix(self.params.y_range)
    }

    /// Save the history. A directory gets a timestamped file name.
    ///
    /// Returns the path written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<PathBuf, TraceError> {
        let path = path.as_ref();
        let target = if path.is_dir() {
            trace::default_trace_path(path)
        } else {
            path.to_path_buf()
        };
        trace::save(&target, &self.history.snapshot_all())?;
        Ok(target)
    }

    /// Replace the history with a saved trace. On failure the current
    /// history is left untouched.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), TraceError> {
        let samples = trace::load(path)?;
        self.history.replace(samples);
        self.spectrogram.invalidate();
        Ok(())
    }

    /// Empty the history. Stop recording first.
    pub fn clear(&mut self) {
        if self.reader.is_running() {
            log::warn!("Clearing history while the reader is still running");
        }
        self.history.clear();
        self.spectrogram.invalidate();
    }
}
