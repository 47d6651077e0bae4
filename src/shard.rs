//! Shard serialization.
//!
//! Each batch of assembled samples is written as one `.npz` archive. A
//! record contributes three flattened arrays in row-major order under
//! zero-padded keys:
//!
//! ```text
//! x_00000, y_00000, w_00000, x_00001, y_00001, w_00001, ...
//! ```
//!
//! Flattening keeps the archive layout independent of grid geometry; a
//! reader reconstructs the tensors from the grid shape, channel count
//! and horizon recorded in the dataset manifest.

use crate::error::Result;
use crate::sample::{ForecastSample, GridElement, SampleSpec};
use chrono::NaiveDate;
use ndarray::{Array1, Array3, Array4};
use ndarray_npy::{NpzReader, NpzWriter};
use std::fs::File;
use std::path::{Path, PathBuf};

/// One shard to produce: an output file plus the pre-resolved sample
/// payloads that go into it.
#[derive(Debug, Clone)]
pub struct ShardTask {
    /// Destination `.npz` path
    pub path: PathBuf,
    /// Sample payloads, in forecast-date order
    pub specs: Vec<SampleSpec>,
}

/// Tensors for one record read back from a shard.
#[derive(Debug, Clone)]
pub struct ShardRecord<F: GridElement> {
    /// Input tensor, `(rows, cols, num_channels)`
    pub x: Array3<F>,
    /// Target tensor, `(rows, cols, horizon, 1)`
    pub y: Array4<F>,
    /// Loss-weight tensor, same shape as the target
    pub weights: Array4<F>,
}

fn flat<F: GridElement, D: ndarray::Dimension>(
    tensor: &ndarray::Array<F, D>,
) -> Array1<F> {
    tensor.iter().cloned().collect()
}

/// Write a batch of assembled samples to one `.npz` shard.
pub fn write_shard<F: GridElement>(
    path: &Path,
    samples: &[ForecastSample<F>],
) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut npz = NpzWriter::new(File::create(path)?);
    for (i, sample) in samples.iter().enumerate() {
        npz.add_array(format!("x_{:05}", i), &flat(&sample.x))?;
        npz.add_array(format!("y_{:05}", i), &flat(&sample.y))?;
        npz.add_array(format!("w_{:05}", i), &flat(&sample.weights))?;
    }
    npz.finish()?;

    log::debug!("Wrote {} samples to {}", samples.len(), path.display());
    Ok(())
}

/// Number of records in a shard, without decoding any tensor data.
pub fn shard_len(path: &Path) -> Result<usize> {
    let mut npz = NpzReader::new(File::open(path)?)?;
    // Three arrays per record.
    Ok(npz.names()?.len() / 3)
}

/// Read every record of a shard back into full-shape tensors.
///
/// The geometry arguments come from the dataset manifest; they must
/// match what the shard was generated with.
pub fn read_shard<F: GridElement>(
    path: &Path,
    shape: (usize, usize),
    num_channels: usize,
    horizon: usize,
) -> Result<Vec<ShardRecord<F>>> {
    let (rows, cols) = shape;
    let mut npz = NpzReader::new(File::open(path)?)?;
    let n = npz.names()?.len() / 3;

    let mut records = Vec::with_capacity(n);
    for i in 0..n {
        let x: Array1<F> = npz.by_name(&format!("x_{:05}", i))?;
        let y: Array1<F> = npz.by_name(&format!("y_{:05}", i))?;
        let w: Array1<F> = npz.by_name(&format!("w_{:05}", i))?;

        records.push(ShardRecord {
            x: x.into_shape((rows, cols, num_channels))
                .map_err(|e| shape_error(path, e))?,
            y: y.into_shape((rows, cols, horizon, 1))
                .map_err(|e| shape_error(path, e))?,
            weights: w
                .into_shape((rows, cols, horizon, 1))
                .map_err(|e| shape_error(path, e))?,
        });
    }
    Ok(records)
}

fn shape_error(path: &Path, err: ndarray::ShapeError) -> crate::error::DatagenError {
    crate::error::DatagenError::config(format!(
        "shard {} does not match the manifest geometry: {}",
        path.display(),
        err
    ))
}

/// Shard file name for a batch index within a split directory.
pub fn shard_file_name(batch_index: usize) -> String {
    format!("{:08}.npz", batch_index)
}

/// Dates a shard covers, for logging.
pub fn shard_date_range(specs: &[SampleSpec]) -> Option<(NaiveDate, NaiveDate)> {
    let first = specs.first()?.forecast_date;
    let last = specs.last()?.forecast_date;
    Some((first, last))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4};
    use tempfile::TempDir;

    fn sample(date: NaiveDate, fill: f32) -> ForecastSample<f32> {
        ForecastSample {
            forecast_date: date,
            x: Array3::from_elem((3, 3, 4), fill),
            y: Array4::from_elem((3, 3, 2, 1), fill * 2.0),
            weights: Array4::from_elem((3, 3, 2, 1), 1.0),
        }
    }

    #[test]
    fn test_shard_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("train").join(shard_file_name(0));

        let d0 = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let d1 = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
        let samples = vec![sample(d0, 0.25), sample(d1, 0.5)];
        write_shard(&path, &samples).unwrap();

        assert_eq!(shard_len(&path).unwrap(), 2);

        let records = read_shard::<f32>(&path, (3, 3), 4, 2).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].x.shape(), &[3, 3, 4]);
        assert_eq!(records[0].y.shape(), &[3, 3, 2, 1]);
        assert_eq!(records[0].x[[1, 1, 2]], 0.25);
        assert_eq!(records[1].y[[0, 0, 1, 0]], 1.0);
        assert_eq!(records[1].weights[[2, 2, 0, 0]], 1.0);
    }

    #[test]
    fn test_empty_shard() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(shard_file_name(3));
        write_shard::<f32>(&path, &[]).unwrap();
        assert_eq!(shard_len(&path).unwrap(), 0);
        assert!(read_shard::<f32>(&path, (3, 3), 4, 2).unwrap().is_empty());
    }

    #[test]
    fn test_geometry_mismatch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(shard_file_name(0));
        let d0 = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        write_shard(&path, &[sample(d0, 1.0)]).unwrap();

        assert!(read_shard::<f32>(&path, (5, 5), 4, 2).is_err());
    }

    #[test]
    fn test_shard_file_name_is_zero_padded() {
        assert_eq!(shard_file_name(0), "00000000.npz");
        assert_eq!(shard_file_name(42), "00000042.npz");
    }
}
