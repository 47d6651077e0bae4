//! Per-date sample assembly.
//!
//! For one forecast date, the assembler turns pre-resolved raster file
//! references into the three fixed-shape tensors a training sample is
//! made of:
//!
//! - **input** `(rows, cols, num_channels)` — lag, trend and metadata
//!   slices stacked into each channel's planned column range; an absent
//!   file contributes an all-zero slice
//! - **target** `(rows, cols, horizon, 1)` — ground truth per forecast
//!   step; an absent file contributes a NaN step
//! - **weights** `(rows, cols, horizon, 1)` — the month's active-cell
//!   mask per step, forced to zero for globally missing dates, optionally
//!   rescaled so low-activity months carry comparable total loss
//!
//! Tensors always come out in the configured shape; missing data is
//! encoded in values, never in dimensions. A NaN target cell paired with
//! nonzero weight is a fatal inconsistency: both tensors are dumped for
//! inspection and the run aborts.

use crate::channels::{ChannelRole, ChannelSpec};
use crate::config::DATE_FORMAT;
use crate::error::{DatagenError, Result};
use chrono::{Datelike, Duration, NaiveDate};
use ndarray::{s, Array2, Array3, Array4, NdFloat};
use ndarray_npy::{NpzWriter, ReadableElement, WritableElement};
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Element type the engine can assemble tensors in.
///
/// Satisfied by `f32` and `f64`; selected once from the configured
/// [`Precision`](crate::config::Precision).
pub trait GridElement: NdFloat + ReadableElement + WritableElement {}

impl<T: NdFloat + ReadableElement + WritableElement> GridElement for T {}

fn cast<F: GridElement>(value: f64) -> F {
    // f32/f64 conversions of finite calibration values cannot fail.
    F::from(value).expect("numeric cast between float precisions")
}

// ============================================================================
// Sample payloads
// ============================================================================

/// Pre-resolved input files for one channel, in lag/lead order.
#[derive(Debug, Clone)]
pub struct ChannelInputs {
    /// Channel this belongs to
    pub channel: ChannelSpec,
    /// One entry per sub-channel; `None` means missing data
    pub files: Vec<Option<PathBuf>>,
}

/// Plain, pre-resolved payload for assembling one forecast date.
///
/// Built entirely on the orchestrator side so workers never touch the
/// file index or configuration: only owned paths and flags cross into
/// the worker pool.
#[derive(Debug, Clone)]
pub struct SampleSpec {
    /// The forecast date this sample is keyed by
    pub forecast_date: NaiveDate,
    /// Per-channel input files in planned channel order
    pub inputs: Vec<ChannelInputs>,
    /// Ground-truth file per forecast step, `None` if absent
    pub output_files: Vec<Option<PathBuf>>,
    /// Per-step flag: date is on the global missing list
    pub step_missing: Vec<bool>,
}

/// One assembled training sample.
///
/// Constructed transiently inside a worker, serialized immediately,
/// then dropped.
#[derive(Debug, Clone)]
pub struct ForecastSample<F: GridElement> {
    /// Forecast date the sample is keyed by
    pub forecast_date: NaiveDate,
    /// Input tensor, `(rows, cols, num_channels)`
    pub x: Array3<F>,
    /// Target tensor, `(rows, cols, horizon, 1)`
    pub y: Array4<F>,
    /// Loss-weight tensor, same shape as the target
    pub weights: Array4<F>,
}

// ============================================================================
// Assembler
// ============================================================================

/// Assembles fixed-shape samples for individual forecast dates.
///
/// Holds the shared, read-only assembly context: grid shape, horizon,
/// channel count, weighting policy, and the twelve monthly masks. Safe
/// to share across worker threads.
#[derive(Debug, Clone)]
pub struct SampleAssembler {
    shape: (usize, usize),
    n_forecast_days: usize,
    num_channels: usize,
    loss_weight_days: bool,
    reference_active_cells: f64,
    month_masks: HashMap<u32, Array2<f32>>,
    diagnostics_dir: PathBuf,
}

impl SampleAssembler {
    /// Create an assembler from the planned generation context.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shape: (usize, usize),
        n_forecast_days: usize,
        num_channels: usize,
        loss_weight_days: bool,
        reference_active_cells: f64,
        month_masks: HashMap<u32, Array2<f32>>,
        diagnostics_dir: PathBuf,
    ) -> Self {
        Self {
            shape,
            n_forecast_days,
            num_channels,
            loss_weight_days,
            reference_active_cells,
            month_masks,
            diagnostics_dir,
        }
    }

    /// Grid shape this assembler produces.
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    /// Forecast horizon in days.
    pub fn n_forecast_days(&self) -> usize {
        self.n_forecast_days
    }

    /// Total input channel count.
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Assemble the input, target and weight tensors for one date.
    pub fn assemble<F: GridElement>(&self, spec: &SampleSpec) -> Result<ForecastSample<F>> {
        let (rows, cols) = self.shape;
        let horizon = self.n_forecast_days;

        if spec.output_files.len() != horizon || spec.step_missing.len() != horizon {
            return Err(DatagenError::config(format!(
                "sample for {} has {} target and {} missing-flag steps, horizon is {}",
                spec.forecast_date,
                spec.output_files.len(),
                spec.step_missing.len(),
                horizon
            )));
        }

        // Target: one slice per forecast step, NaN where ground truth
        // is absent.
        let mut y = Array4::<F>::zeros((rows, cols, horizon, 1));
        for (step, file) in spec.output_files.iter().enumerate() {
            match file {
                Some(path) => {
                    let grid = self.load_grid::<F>(path)?;
                    y.slice_mut(s![.., .., step, 0]).assign(&grid);
                }
                None => y.slice_mut(s![.., .., step, 0]).fill(F::nan()),
            }
        }

        // Weights: masked recomposition per step. Globally missing dates
        // stay at zero regardless of mask content.
        let mut weights = Array4::<F>::zeros((rows, cols, horizon, 1));
        for step in 0..horizon {
            if spec.step_missing[step] {
                continue;
            }

            let day = spec.forecast_date + Duration::days(step as i64);
            let mask = self.month_masks.get(&day.month()).ok_or_else(|| {
                DatagenError::config(format!(
                    "no active-cell mask loaded for month {}",
                    day.month()
                ))
            })?;

            let mut step_weight = mask.mapv(|v| cast::<F>(v as f64));
            if self.loss_weight_days {
                // Scale each step so months with fewer active cells carry
                // comparable total loss magnitude.
                let total = step_weight.sum();
                if total > F::zero() {
                    let scale = cast::<F>(self.reference_active_cells) / total;
                    step_weight.mapv_inplace(|v| v * scale);
                }
            }
            weights.slice_mut(s![.., .., step, 0]).assign(&step_weight);
        }

        // Guard against training on undefined signal.
        for (target, weight) in y.iter().zip(weights.iter()) {
            if target.is_nan() && *weight != F::zero() {
                self.dump_diagnostics(spec.forecast_date, &y, &weights)?;
                return Err(DatagenError::DataInconsistency {
                    date: spec.forecast_date.format(DATE_FORMAT).to_string(),
                    reason: "sample weighting would introduce NaNs into the loss"
                        .to_string(),
                });
            }
        }

        // Input: stack each channel's sub-slices into its planned column
        // range; absent files stay zero.
        let mut x = Array3::<F>::zeros((rows, cols, self.num_channels));
        let mut column = 0;
        for inputs in &spec.inputs {
            if inputs.channel.role == ChannelRole::Meta && inputs.channel.width > 1 {
                return Err(DatagenError::config(format!(
                    "{} meta variable cannot have more than one channel",
                    inputs.channel.name
                )));
            }

            for (k, file) in inputs.files.iter().enumerate() {
                if let Some(path) = file {
                    let grid = self.load_grid::<F>(path)?;
                    x.slice_mut(s![.., .., column + k]).assign(&grid);
                }
            }
            column += inputs.channel.width;
        }

        if column != self.num_channels {
            return Err(DatagenError::config(format!(
                "channel widths sum to {} but the input tensor has {} columns",
                column, self.num_channels
            )));
        }

        log::debug!(
            "Assembled {}: x {:?}, y {:?}",
            spec.forecast_date,
            x.shape(),
            y.shape()
        );

        Ok(ForecastSample {
            forecast_date: spec.forecast_date,
            x,
            y,
            weights,
        })
    }

    fn load_grid<F: GridElement>(&self, path: &Path) -> Result<Array2<F>> {
        let grid: Array2<F> = ndarray_npy::read_npy(path)?;
        if grid.dim() != self.shape {
            return Err(DatagenError::ShapeMismatch {
                path: path.to_path_buf(),
                actual: grid.shape().to_vec(),
                expected: vec![self.shape.0, self.shape.1],
            });
        }
        Ok(grid)
    }

    fn dump_diagnostics<F: GridElement>(
        &self,
        date: NaiveDate,
        y: &Array4<F>,
        weights: &Array4<F>,
    ) -> Result<()> {
        let path = self
            .diagnostics_dir
            .join(format!("{}.nan.npz", date.format(DATE_FORMAT)));
        log::error!(
            "Dumping inconsistent target/weight tensors to {}",
            path.display()
        );

        let mut npz = NpzWriter::new(File::create(&path)?);
        npz.add_array("y", y)?;
        npz.add_array("sample_weights", weights)?;
        npz.finish()?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use ndarray_npy::write_npy;
    use tempfile::TempDir;

    const SHAPE: (usize, usize) = (4, 4);

    fn write_grid(dir: &Path, rel: &str, fill: f32) -> PathBuf {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        write_npy(&path, &Array2::<f32>::from_elem(SHAPE, fill)).unwrap();
        path
    }

    fn assembler(
        num_channels: usize,
        horizon: usize,
        loss_weight_days: bool,
        mask_value: f32,
        diagnostics_dir: PathBuf,
    ) -> SampleAssembler {
        let mut masks = HashMap::new();
        for month in 1..=12 {
            masks.insert(month, Array2::<f32>::from_elem(SHAPE, mask_value));
        }
        SampleAssembler::new(
            SHAPE,
            horizon,
            num_channels,
            loss_weight_days,
            32.0,
            masks,
            diagnostics_dir,
        )
    }

    fn lag_channel(name: &str, width: usize, files: Vec<Option<PathBuf>>) -> ChannelInputs {
        ChannelInputs {
            channel: ChannelSpec {
                name: name.to_string(),
                width,
                role: ChannelRole::Lag,
            },
            files,
        }
    }

    fn meta_channel(name: &str, file: Option<PathBuf>) -> ChannelInputs {
        ChannelInputs {
            channel: ChannelSpec {
                name: name.to_string(),
                width: 1,
                role: ChannelRole::Meta,
            },
            files: vec![file],
        }
    }

    #[test]
    fn test_lag_and_meta_column_layout() {
        let dir = TempDir::new().unwrap();
        let d1 = write_grid(dir.path(), "north/tas/2020_01_14.npy", 1.0);
        let d2 = write_grid(dir.path(), "north/tas/2020_01_13.npy", 2.0);
        let doy = write_grid(dir.path(), "north/cos/015.npy", 3.0);
        let truth = write_grid(dir.path(), "north/siconca/2020_01_15.npy", 0.5);

        let date = NaiveDate::from_ymd_opt(2020, 1, 15).unwrap();
        let spec = SampleSpec {
            forecast_date: date,
            inputs: vec![
                lag_channel("tas_abs", 2, vec![Some(d1), Some(d2)]),
                meta_channel("cos", Some(doy)),
            ],
            output_files: vec![Some(truth)],
            step_missing: vec![false],
        };

        let asm = assembler(3, 1, false, 1.0, dir.path().to_path_buf());
        let sample = asm.assemble::<f32>(&spec).unwrap();

        // Column 0 is D-1, column 1 is D-2, column 2 the metadata grid.
        assert_eq!(sample.x[[0, 0, 0]], 1.0);
        assert_eq!(sample.x[[0, 0, 1]], 2.0);
        assert_eq!(sample.x[[0, 0, 2]], 3.0);
        assert_eq!(sample.y[[0, 0, 0, 0]], 0.5);
    }

    #[test]
    fn test_absent_input_is_zero_filled() {
        let dir = TempDir::new().unwrap();
        let truth = write_grid(dir.path(), "north/siconca/2020_01_15.npy", 0.5);

        let date = NaiveDate::from_ymd_opt(2020, 1, 15).unwrap();
        let spec = SampleSpec {
            forecast_date: date,
            inputs: vec![lag_channel("tas_abs", 2, vec![None, None])],
            output_files: vec![Some(truth)],
            step_missing: vec![false],
        };

        let asm = assembler(2, 1, false, 1.0, dir.path().to_path_buf());
        let sample = asm.assemble::<f32>(&spec).unwrap();
        assert!(sample.x.iter().all(|&v| v == 0.0));
        assert_eq!(sample.x.shape(), &[4, 4, 2]);
    }

    #[test]
    fn test_fully_missing_target_with_missing_steps_is_fine() {
        let dir = TempDir::new().unwrap();
        let date = NaiveDate::from_ymd_opt(2020, 1, 15).unwrap();
        let spec = SampleSpec {
            forecast_date: date,
            inputs: vec![],
            output_files: vec![None, None, None],
            step_missing: vec![true, true, true],
        };

        let asm = assembler(0, 3, false, 1.0, dir.path().to_path_buf());
        let sample = asm.assemble::<f32>(&spec).unwrap();

        assert!(sample.y.iter().all(|v| v.is_nan()));
        assert!(sample.weights.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_nan_target_with_nonzero_weight_is_fatal_and_dumped() {
        let dir = TempDir::new().unwrap();
        let date = NaiveDate::from_ymd_opt(2020, 1, 15).unwrap();
        let spec = SampleSpec {
            forecast_date: date,
            inputs: vec![],
            output_files: vec![None],
            step_missing: vec![false],
        };

        let asm = assembler(0, 1, false, 1.0, dir.path().to_path_buf());
        let err = asm.assemble::<f32>(&spec).unwrap_err();
        assert!(matches!(err, DatagenError::DataInconsistency { .. }));
        assert!(dir.path().join("2020_01_15.nan.npz").exists());
    }

    #[test]
    fn test_missing_step_zero_weight_others_rescaled() {
        let dir = TempDir::new().unwrap();
        let t0 = write_grid(dir.path(), "north/siconca/2020_01_15.npy", 0.1);
        let t2 = write_grid(dir.path(), "north/siconca/2020_01_17.npy", 0.3);

        let date = NaiveDate::from_ymd_opt(2020, 1, 15).unwrap();
        let spec = SampleSpec {
            forecast_date: date,
            inputs: vec![],
            output_files: vec![Some(t0), None, Some(t2)],
            step_missing: vec![false, true, false],
        };

        // Mask of ones over a 4x4 grid sums to 16; reference is 32, so
        // every active cell is weighted 2.0 when weighting is enabled.
        let asm = assembler(0, 3, true, 1.0, dir.path().to_path_buf());
        let sample = asm.assemble::<f32>(&spec).unwrap();

        assert_eq!(sample.weights[[0, 0, 0, 0]], 2.0);
        assert!(sample
            .weights
            .slice(s![.., .., 1, 0])
            .iter()
            .all(|&v| v == 0.0));
        assert_eq!(sample.weights[[0, 0, 2, 0]], 2.0);
        assert!(sample.y[[0, 0, 1, 0]].is_nan());
    }

    #[test]
    fn test_weight_disabled_uses_raw_mask() {
        let dir = TempDir::new().unwrap();
        let truth = write_grid(dir.path(), "north/siconca/2020_01_15.npy", 0.5);

        let date = NaiveDate::from_ymd_opt(2020, 1, 15).unwrap();
        let spec = SampleSpec {
            forecast_date: date,
            inputs: vec![],
            output_files: vec![Some(truth)],
            step_missing: vec![false],
        };

        let asm = assembler(0, 1, false, 0.5, dir.path().to_path_buf());
        let sample = asm.assemble::<f64>(&spec).unwrap();
        assert_eq!(sample.weights[[0, 0, 0, 0]], 0.5);
    }

    #[test]
    fn test_step_count_mismatch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let date = NaiveDate::from_ymd_opt(2020, 1, 15).unwrap();
        // Horizon is 3, but the payload covers a single step.
        let spec = SampleSpec {
            forecast_date: date,
            inputs: vec![],
            output_files: vec![None],
            step_missing: vec![true],
        };

        let asm = assembler(0, 3, false, 1.0, dir.path().to_path_buf());
        let err = asm.assemble::<f32>(&spec).unwrap_err();
        assert!(matches!(err, DatagenError::Config { .. }));
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("north/siconca/2020_01_15.npy");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        write_npy(&path, &Array2::<f32>::zeros((2, 2))).unwrap();

        let date = NaiveDate::from_ymd_opt(2020, 1, 15).unwrap();
        let spec = SampleSpec {
            forecast_date: date,
            inputs: vec![],
            output_files: vec![Some(path)],
            step_missing: vec![false],
        };

        let asm = assembler(0, 1, false, 1.0, dir.path().to_path_buf());
        let err = asm.assemble::<f32>(&spec).unwrap_err();
        assert!(matches!(err, DatagenError::ShapeMismatch { .. }));
    }
}
