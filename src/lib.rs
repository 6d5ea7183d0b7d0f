//! Vibration spectrograph for a USB serial accelerometer.
//!
//! The device streams COBS framed packets at 4 kHz. A [`reader::PortReader`]
//! decodes them on its own thread into the staging buffer of a
//! [`history::SampleHistory`]; the consumer flushes that buffer on each tick
//! and computes spectra and a rolling spectrogram from it.

pub mod app;
pub mod codec;
pub mod config;
pub mod error;
pub mod history;
pub mod reader;
pub mod sensor;
pub mod spectrogram;
pub mod spectrum;
pub mod trace;

pub use app::Spectrograph;
pub use config::Config;
pub use history::{Projection, Sample, SampleHistory, SAMPLING_RATE};
pub use sensor::SensorRange;
pub use spectrum::Spectrum;
