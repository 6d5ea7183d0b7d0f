//! # Spectral Analysis Module
//!
//! Turns a window of projected samples into a single-sided magnitude
//! spectrum over a frequency sub-range.
//!
//! ## Pipeline
//! 1. Least-squares linear detrend (removes gravity offset and drift)
//! 2. Hann window
//! 3. Real FFT, magnitudes scaled by `4 / N` (approximate peak amplitude in g)
//! 4. Bin centres `k * SAMPLING_RATE / N`
//! 5. Slice both arrays to the bins in `[from_freq, to_freq)`

use crate::history::SAMPLING_RATE;
use realfft::{RealFftPlanner, RealToComplex};

/// Magnitude spectrum restricted to a frequency range
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spectrum {
    /// Bin centre frequencies in Hz, ascending
    pub frequencies: Vec<f64>,
    /// Magnitudes in g, one per frequency
    pub magnitudes: Vec<f64>,
}

impl Spectrum {
    pub fn len(&self) -> usize {
        self.magnitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }

    /// Frequency and magnitude of the strongest bin
    pub fn peak(&self) -> Option<(f64, f64)> {
        self.frequencies
            .iter()
            .zip(self.magnitudes.iter())
            .fold(None, |acc: Option<(f64, f64)>, (&freq, &mag)| match acc {
                Some((_, best)) if best >= mag => acc,
                _ => Some((freq, mag)),
            })
    }
}

/// Subtract the least-squares line through `values` (index as abscissa)
pub fn detrend(values: &mut [f64]) {
    let n = values.len();
    if n == 0 {
        return;
    }

    let mean_t = (n - 1) as f64 / 2.0;
    let mean_v = values.iter().sum::<f64>() / n as f64;

    let mut covariance = 0.0;
    let mut variance = 0.0;
    for (i, &v) in values.iter().enumerate() {
        let dt = i as f64 - mean_t;
        covariance += dt * (v - mean_v);
        variance += dt * dt;
    }
    let slope = if variance > 0.0 { covariance / variance } else { 0.0 };

    for (i, v) in values.iter_mut().enumerate() {
        *v -= mean_v + slope * (i as f64 - mean_t);
    }
}

/// Symmetric Hann window of length `n`
pub fn hann_window(n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let denom = (n - 1) as f64;
            (0..n)
                .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / denom).cos())
                .collect()
        }
    }
}

/// Centre frequencies of the real FFT bins for a window of `n` samples
pub fn frequency_bins(n: usize, sample_rate: f64) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    let resolution = sample_rate / n as f64;
    (0..n / 2 + 1).map(|k| k as f64 * resolution).collect()
}

/// Index range of `bins` covering `[from_freq, to_freq)`
fn bin_range(bins: &[f64], from_freq: f64, to_freq: f64) -> std::ops::Range<usize> {
    let low = bins.partition_point(|&f| f < from_freq);
    let high = bins.partition_point(|&f| f < to_freq).max(low);
    low..high
}

/// Reusable analyzer caching FFT plans and window coefficients
pub struct SpectralAnalyzer {
    planner: RealFftPlanner<f64>,
    window: Vec<f64>,
    sample_rate: f64,
}

impl Default for SpectralAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectralAnalyzer {
    pub fn new() -> Self {
        Self::with_sample_rate(SAMPLING_RATE as f64)
    }

    pub fn with_sample_rate(sample_rate: f64) -> Self {
        Self {
            planner: RealFftPlanner::new(),
            window: Vec::new(),
            sample_rate,
        }
    }

    /// Magnitude spectrum of `samples` between `from_freq` and `to_freq`.
    ///
    /// # Panics
    /// If `samples` is empty.
    pub fn spectrum(&mut self, samples: &[f64], from_freq: f64, to_freq: f64) -> Spectrum {
        let n = samples.len();
        assert!(n != 0, "cannot compute the spectrum of an empty window");

        if self.window.len() != n {
            self.window = hann_window(n);
        }

        let fft = self.planner.plan_fft_forward(n);
        let mut input = fft.make_input_vec();
        input.copy_from_slice(samples);
        detrend(&mut input);
        for (value, weight) in input.iter_mut().zip(self.window.iter()) {
            *value *= weight;
        }

        let mut output = fft.make_output_vec();
        fft.process(&mut input, &mut output)
            .expect("real FFT buffers sized by the plan");

        let scale = 4.0 / n as f64;
        let bins = frequency_bins(n, self.sample_rate);
        let range = bin_range(&bins, from_freq, to_freq);

        Spectrum {
            magnitudes: output[range.clone()].iter().map(|c| c.norm() * scale).collect(),
            frequencies: bins[range].to_vec(),
        }
    }
}

/// One-off spectrum at the accelerometer sampling rate
pub fn spectrum(samples: &[f64], from_freq: f64, to_freq: f64) -> Spectrum {
    SpectralAnalyzer::new().spectrum(samples, from_freq, to_freq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine(freq: f64, amplitude: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| amplitude * (2.0 * PI * freq * i as f64 / SAMPLING_RATE as f64).sin())
            .collect()
    }

    #[test]
    fn test_detrend_removes_line() {
        let mut values: Vec<f64> = (0..100).map(|i| 3.0 + 0.5 * i as f64).collect();
        detrend(&mut values);
        assert!(values.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn test_detrend_single_value() {
        let mut values = vec![9.81];
        detrend(&mut values);
        assert_eq!(values, vec![0.0]);
    }

    #[test]
    fn test_hann_window_shape() {
        let window = hann_window(5);
        assert!(window[0].abs() < 1e-12);
        assert!((window[2] - 1.0).abs() < 1e-12);
        assert!(window[4].abs() < 1e-12);
        assert_eq!(hann_window(1), vec![1.0]);
    }

    #[test]
    fn test_frequency_bins() {
        let bins = frequency_bins(8000, 4000.0);
        assert_eq!(bins.len(), 4001);
        assert_eq!(bins[1], 0.5);
        assert_eq!(bins[4000], 2000.0);
        assert_eq!(frequency_bins(5, 4000.0).len(), 3);
    }

    #[test]
    fn test_spectrum_restricted_to_range() {
        let samples = sine(100.0, 1.0, 4000);
        let result = spectrum(&samples, 50.0, 150.0);
        assert_eq!(result.frequencies.len(), result.magnitudes.len());
        assert_eq!(result.len(), 100);
        assert!(result
            .frequencies
            .iter()
            .all(|&f| (50.0..=150.0).contains(&f)));
        assert_eq!(result.frequencies.first(), Some(&50.0));
    }

    #[test]
    fn test_sinusoid_peak_at_its_frequency() {
        let mut analyzer = SpectralAnalyzer::new();
        for freq in [37.0, 120.5, 880.0] {
            let samples = sine(freq, 0.5, 8000);
            let result = analyzer.spectrum(&samples, 0.0, 2000.0);
            let (peak_freq, peak_mag) = result.peak().unwrap();
            let bin_width = SAMPLING_RATE as f64 / 8000.0;
            assert!((peak_freq - freq).abs() <= bin_width, "peak {} for {}", peak_freq, freq);
            assert!(peak_mag > 0.0);
        }
    }

    #[test]
    fn test_peak_amplitude_scale() {
        // Hann window with 4/N scaling reports roughly the amplitude
        let samples = sine(250.0, 0.8, 4000);
        let (_, magnitude) = spectrum(&samples, 0.0, 2000.0).peak().unwrap();
        assert!((magnitude - 0.8).abs() < 0.05, "magnitude {}", magnitude);
    }

    #[test]
    fn test_constant_offset_is_removed() {
        let samples = vec![1.0; 2000];
        let result = spectrum(&samples, 0.0, 2000.0);
        assert!(result.magnitudes.iter().all(|m| m.abs() < 1e-9));
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let samples = sine(100.0, 1.0, 400);
        let result = spectrum(&samples, 500.0, 100.0);
        assert!(result.is_empty());
        assert!(result.frequencies.is_empty());
    }

    #[test]
    #[should_panic(expected = "empty window")]
    fn test_empty_window_panics() {
        spectrum(&[], 0.0, 2000.0);
    }
}
