//! Dataset manifest.
//!
//! Terminal record of one generation run, written as
//! `dataset_config.<identifier>.json` once every shard landed on disk.
//! Training-side consumers read it to locate the shards and to
//! reconstruct tensor geometry without re-reading the loader
//! configuration.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Per-split record counts of a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitCounts {
    /// Records written to the train split
    pub train: usize,
    /// Records written to the val split
    pub val: usize,
    /// Records written to the test split
    pub test: usize,
}

impl SplitCounts {
    /// Total records across all splits.
    pub fn total(&self) -> usize {
        self.train + self.val + self.test
    }
}

/// Summary of a generated dataset.
///
/// Field layout mirrors what downstream training pipelines consume; the
/// channel list is expanded to one name per tensor column
/// (`tas_abs_1`, `tas_abs_2`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetManifest {
    /// Dataset identifier
    pub identifier: String,
    /// Generator implementation that produced the dataset
    pub implementation: String,
    /// Expanded channel names, one per input column
    pub channels: Vec<String>,
    /// Records written per split
    pub counts: SplitCounts,
    /// Element type of the shard tensors ("float32" or "float64")
    pub dtype: String,
    /// Loader configuration the run was driven by
    pub loader_config: PathBuf,
    /// Globally missing dates, in canonical format
    pub missing_dates: Vec<String>,
    /// Forecast horizon in days
    pub n_forecast_days: usize,
    /// Northern-hemisphere dataset
    pub north: bool,
    /// Southern-hemisphere dataset
    pub south: bool,
    /// Total input channel count
    pub num_channels: usize,
    /// Grid shape, rows then columns
    pub shape: Vec<usize>,
    /// Directory the shard tree was written under
    pub dataset_path: PathBuf,
    /// Whether per-step loss-day weighting was applied
    pub loss_weight_days: bool,
    /// Records per shard
    pub output_batch_size: usize,
    /// Default lag width
    pub var_lag: usize,
    /// Per-variable lag overrides
    pub var_lag_override: HashMap<String, usize>,
}

impl DatasetManifest {
    /// Manifest file name for a dataset identifier.
    pub fn file_name(identifier: &str) -> String {
        format!("dataset_config.{}.json", identifier)
    }

    /// Full manifest path under a configuration directory.
    pub fn path_in(dir: &Path, identifier: &str) -> PathBuf {
        dir.join(Self::file_name(identifier))
    }

    /// Write the manifest as pretty-printed JSON into `dir`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = Self::path_in(dir, &self.identifier);
        let file = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(file, self)?;
        log::info!("Wrote dataset manifest to {}", path.display());
        Ok(path)
    }

    /// Load a manifest back from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = BufReader::new(File::open(path.as_ref())?);
        let manifest = serde_json::from_reader(file)?;
        Ok(manifest)
    }
}
