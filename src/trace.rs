//! # Trace Persistence Module
//!
//! Saves and loads the sample history as an HDF5 file.
//!
//! ## HDF5 File Structure
//! ```text
//! trace_YYYYMMDD_HHMMSS.h5
//! └── /samples (dataset: f64, shape [N, 3], columns x y z in g)
//!     └── sampling_rate (attribute: u32)
//! ```
//! Rows are in chronological order, oldest first. Sample `i` was taken
//! `i / sampling_rate` seconds after the start of the trace.

use crate::error::TraceError;
use crate::history::{Sample, SAMPLING_RATE};
use hdf5::File;
use std::path::{Path, PathBuf};

const SAMPLES_DATASET: &str = "samples";
const SAMPLING_RATE_ATTR: &str = "sampling_rate";

/// Timestamped file name for a new trace inside `dir`
pub fn default_trace_path(dir: impl AsRef<Path>) -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    dir.as_ref().join(format!("trace_{}.h5", timestamp))
}

/// Write `samples` to a new trace file at `path`, replacing any existing file
pub fn save(path: impl AsRef<Path>, samples: &[Sample]) -> Result<(), TraceError> {
    let path = path.as_ref();
    if samples.is_empty() {
        return Err(TraceError::Empty);
    }

    let file = File::create(path).map_err(|source| TraceError::Create {
        path: path.to_path_buf(),
        source,
    })?;

    let flat: Vec<f64> = samples
        .iter()
        .flat_map(|sample| [sample.x, sample.y, sample.z])
        .collect();

    let dataset = file
        .new_dataset::<f64>()
        .shape((samples.len(), 3))
        .create(SAMPLES_DATASET)
        .map_err(TraceError::Write)?;
    dataset.write_raw(&flat).map_err(TraceError::Write)?;

    dataset
        .new_attr::<u32>()
        .create(SAMPLING_RATE_ATTR)
        .map_err(TraceError::Write)?
        .write_scalar(&SAMPLING_RATE)
        .map_err(TraceError::Write)?;

    log::info!(
        "Saved {} samples ({:.1}s) to {}",
        samples.len(),
        samples.len() as f64 / SAMPLING_RATE as f64,
        path.display()
    );
    Ok(())
}

/// Read every sample from the trace at `path`, oldest first
pub fn load(path: impl AsRef<Path>) -> Result<Vec<Sample>, TraceError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| TraceError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let dataset = file.dataset(SAMPLES_DATASET).map_err(TraceError::Read)?;
    let dims = dataset.shape();
    if dims.len() != 2 || dims[1] != 3 {
        return Err(TraceError::BadShape { dims });
    }

    // Older traces may lack the attribute
    if let Ok(attr) = dataset.attr(SAMPLING_RATE_ATTR) {
        let found: u32 = attr.read_scalar().map_err(TraceError::Read)?;
        if found != SAMPLING_RATE {
            return Err(TraceError::SamplingRate {
                found,
                expected: SAMPLING_RATE,
            });
        }
    }

    let flat: Vec<f64> = dataset.read_raw().map_err(TraceError::Read)?;
    let samples: Vec<Sample> = flat
        .chunks_exact(3)
        .map(|row| Sample::new(row[0], row[1], row[2]))
        .collect();

    log::info!("Loaded {} samples from {}", samples.len(), path.display());
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn synthetic(count: usize) -> Vec<Sample> {
        (0..count)
            .map(|i| {
                let t = i as f64 / SAMPLING_RATE as f64;
                Sample::new((t * 31.0).sin(), (t * 7.0).cos() * 0.5, -1.0 + t * 1e-3)
            })
            .collect()
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trace.h5");
        let samples = synthetic(1234);

        save(&path, &samples).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded, samples);
    }

    #[test]
    fn test_save_empty_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.h5");
        assert!(matches!(save(&path, &[]), Err(TraceError::Empty)));
        assert!(!path.exists());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let result = load(dir.path().join("missing.h5"));
        assert!(matches!(result, Err(TraceError::Open { .. })));
    }

    #[test]
    fn test_load_rejects_wrong_shape() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flat.h5");
        {
            let file = File::create(&path).unwrap();
            let dataset = file
                .new_dataset::<f64>()
                .shape((4, 2))
                .create(SAMPLES_DATASET)
                .unwrap();
            dataset.write_raw(&vec![0.0f64; 8]).unwrap();
        }

        match load(&path) {
            Err(TraceError::BadShape { dims }) => assert_eq!(dims, vec![4, 2]),
            other => panic!("expected shape error, got {:?}", other),
        }
    }

    #[test]
    fn test_default_trace_path() {
        let path = default_trace_path("/tmp/traces");
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("trace_"));
        assert!(name.ends_with(".h5"));
        assert_eq!(path.parent(), Some(Path::new("/tmp/traces")));
    }
}
