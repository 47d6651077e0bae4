//! Loader configuration schema and generation parameters.
//!
//! Two documents drive a generation run:
//!
//! - **[`LoaderConfig`]** — the structured JSON document produced by the
//!   preprocessing stage, keyed by source identity. It lists every
//!   variable, its candidate file manifest, and the per-split forecast
//!   dates. Consumed read-only here.
//! - **[`GeneratorConfig`]** — the engine knobs: lag length and overrides,
//!   forecast horizon, loss-day weighting, batch size, worker count,
//!   numeric precision, and output paths. Serializable to TOML for
//!   experiment reproducibility.
//!
//! # Example
//!
//! ```ignore
//! use forecast_datagen::config::{GeneratorConfig, LoaderConfig};
//!
//! let loader = LoaderConfig::load_json("loader.south.json")?;
//! let params = GeneratorConfig::new("south_2020")
//!     .with_var_lag(2)
//!     .with_forecast_days(93)
//!     .with_workers(8);
//! params.validate()?;
//! ```

use crate::error::{DatagenError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// Default date format used in raster file names and date lists.
pub const DATE_FORMAT: &str = "%Y_%m_%d";

/// Day-of-year format used for metadata channel file names.
pub const DAY_OF_YEAR_FORMAT: &str = "%j";

/// Parse a date string with the given format.
pub fn parse_date(value: &str, format: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, format).map_err(|source| DatagenError::DateParse {
        value: value.to_string(),
        source,
    })
}

// ============================================================================
// Splits
// ============================================================================

/// Train/validation/test split identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    /// Training dates
    Train,
    /// Validation dates
    Val,
    /// Test dates
    Test,
}

impl Split {
    /// All splits in generation order.
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    /// Directory name for this split.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

/// Per-split forecast date lists, as formatted date strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SplitDates {
    /// Training dates
    #[serde(default)]
    pub train: Vec<String>,
    /// Validation dates
    #[serde(default)]
    pub val: Vec<String>,
    /// Test dates
    #[serde(default)]
    pub test: Vec<String>,
}

impl SplitDates {
    /// Date strings for one split.
    pub fn for_split(&self, split: Split) -> &[String] {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        }
    }
}

// ============================================================================
// Hemisphere
// ============================================================================

/// Hemisphere the dataset covers.
///
/// Contributes the leading directory segment of every per-date raster
/// file lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hemisphere {
    /// Northern hemisphere grids
    North,
    /// Southern hemisphere grids
    South,
}

impl Hemisphere {
    /// Directory segment used in file lookups.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Hemisphere::North => "north",
            Hemisphere::South => "south",
        }
    }

    /// True for the northern hemisphere.
    pub fn is_north(&self) -> bool {
        matches!(self, Hemisphere::North)
    }
}

// ============================================================================
// Numeric precision
// ============================================================================

/// Working numeric precision, resolved once at construction.
///
/// Replaces the dtype-by-name string lookup of the upstream tooling with
/// an explicit enumerated type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precision {
    /// 32-bit floats
    F32,
    /// 64-bit floats
    F64,
}

impl Precision {
    /// Resolve a dtype name from the loader configuration.
    ///
    /// Accepts the NumPy-style names the preprocessing stage records.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "float32" | "f32" => Ok(Precision::F32),
            "float64" | "f64" => Ok(Precision::F64),
            other => Err(DatagenError::config(format!(
                "unsupported dtype '{}' (expected float32 or float64)",
                other
            ))),
        }
    }

    /// Canonical dtype name, as recorded in the dataset manifest.
    pub fn name(&self) -> &'static str {
        match self {
            Precision::F32 => "float32",
            Precision::F64 => "float64",
        }
    }
}

// ============================================================================
// Loader configuration (input document)
// ============================================================================

/// One data source inside the loader configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Absolute-value variable names
    #[serde(default)]
    pub abs: Vec<String>,

    /// Anomaly variable names
    #[serde(default)]
    pub anom: Vec<String>,

    /// Metadata variable names (single-channel, day-of-year keyed)
    #[serde(default)]
    pub meta: Vec<String>,

    /// Variables with a linear-trend channel
    #[serde(default)]
    pub linear_trends: Vec<String>,

    /// Width of each linear-trend channel, in lead days
    #[serde(default)]
    pub linear_trend_days: usize,

    /// Candidate file manifest per variable
    #[serde(default)]
    pub var_files: HashMap<String, Vec<PathBuf>>,

    /// Forecast dates per split
    #[serde(default)]
    pub dates: SplitDates,
}

/// The loader configuration document.
///
/// Sources are held in a `BTreeMap` so iteration is already in ascending
/// identity order; variable lists are sorted at planning time. Channel
/// ordering therefore never depends on document layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Data sources keyed by identity
    pub sources: BTreeMap<String, SourceConfig>,

    /// Numeric dtype name (e.g. "float32")
    pub dtype: String,

    /// Grid shape as (rows, cols)
    pub shape: Vec<usize>,

    /// Globally missing dates, formatted with [`DATE_FORMAT`]
    #[serde(default)]
    pub missing_dates: Vec<String>,

    /// Path this document was loaded from (not part of the schema)
    #[serde(skip)]
    pub source_path: PathBuf,
}

impl LoaderConfig {
    /// Load the configuration document from a JSON file.
    ///
    /// A missing or unreadable document is a fatal configuration error.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DatagenError::config(format!(
                "loader configuration {} not found",
                path.display()
            )));
        }

        log::info!("Loading configuration {}", path.display());
        let contents = fs::read_to_string(path)?;
        let mut config: LoaderConfig = serde_json::from_str(&contents)?;
        config.source_path = path.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    /// Validate the document.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(DatagenError::config("no sources declared"));
        }
        if self.shape.len() != 2 || self.shape.iter().any(|&d| d == 0) {
            return Err(DatagenError::config(format!(
                "shape must be two positive dimensions, got {:?}",
                self.shape
            )));
        }
        Precision::from_name(&self.dtype)?;
        Ok(())
    }

    /// Grid shape as a (rows, cols) pair.
    pub fn grid_shape(&self) -> (usize, usize) {
        (self.shape[0], self.shape[1])
    }

    /// Working precision resolved from the dtype name.
    pub fn precision(&self) -> Result<Precision> {
        Precision::from_name(&self.dtype)
    }

    /// Parsed globally missing dates.
    pub fn parsed_missing_dates(&self) -> Result<Vec<NaiveDate>> {
        self.missing_dates
            .iter()
            .map(|s| parse_date(s, DATE_FORMAT))
            .collect()
    }

    /// Sorted, de-duplicated forecast dates for one split, unioned
    /// across all sources.
    pub fn split_dates(&self, split: Split) -> Result<Vec<NaiveDate>> {
        let mut dates = Vec::new();
        for source in self.sources.values() {
            for s in source.dates.for_split(split) {
                dates.push(parse_date(s, DATE_FORMAT)?);
            }
        }
        dates.sort_unstable();
        dates.dedup();
        Ok(dates)
    }
}

// ============================================================================
// Generator configuration (engine knobs)
// ============================================================================

/// Engine parameters for one generation run.
///
/// Built in the usual builder style and serializable to TOML so a run can
/// be reproduced from its parameter file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Dataset identifier (names the output and manifest)
    pub identifier: String,

    /// Hemisphere the raster files belong to
    #[serde(default = "default_hemisphere")]
    pub hemisphere: Hemisphere,

    /// Default lag width for lag channels, in days
    #[serde(default = "default_var_lag")]
    pub var_lag: usize,

    /// Per-variable lag overrides
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub var_lag_override: HashMap<String, usize>,

    /// Forecast horizon in days
    #[serde(default = "default_forecast_days")]
    pub n_forecast_days: usize,

    /// Rescale each step's weights by active-cell count
    #[serde(default = "default_loss_weight_days")]
    pub loss_weight_days: bool,

    /// Calibration constant for loss-day weighting.
    ///
    /// A reference total of active cells; steps with fewer active cells
    /// are weighted proportionally higher. Grid-resolution specific, so
    /// configurable rather than assumed.
    #[serde(default = "default_reference_active_cells")]
    pub reference_active_cells: f64,

    /// Samples per shard file
    #[serde(default = "default_batch_size")]
    pub output_batch_size: usize,

    /// Worker threads for batch generation
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Root directory for generated shards
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,

    /// Directory the dataset manifest is written to
    #[serde(default = "default_dataset_config_path")]
    pub dataset_config_path: PathBuf,

    /// Date format for raster file names
    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// Date format for metadata channel file names
    #[serde(default = "default_meta_date_format")]
    pub meta_date_format: String,
}

fn default_hemisphere() -> Hemisphere {
    Hemisphere::North
}

fn default_var_lag() -> usize {
    2
}

fn default_forecast_days() -> usize {
    93
}

fn default_loss_weight_days() -> bool {
    true
}

fn default_reference_active_cells() -> f64 {
    33928.0
}

fn default_batch_size() -> usize {
    32
}

fn default_workers() -> usize {
    8
}

fn default_output_path() -> PathBuf {
    PathBuf::from("network_datasets")
}

fn default_dataset_config_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_date_format() -> String {
    DATE_FORMAT.to_string()
}

fn default_meta_date_format() -> String {
    DAY_OF_YEAR_FORMAT.to_string()
}

impl GeneratorConfig {
    /// Create a configuration with defaults for the given identifier.
    pub fn new<S: Into<String>>(identifier: S) -> Self {
        Self {
            identifier: identifier.into(),
            hemisphere: default_hemisphere(),
            var_lag: default_var_lag(),
            var_lag_override: HashMap::new(),
            n_forecast_days: default_forecast_days(),
            loss_weight_days: default_loss_weight_days(),
            reference_active_cells: default_reference_active_cells(),
            output_batch_size: default_batch_size(),
            workers: default_workers(),
            output_path: default_output_path(),
            dataset_config_path: default_dataset_config_path(),
            date_format: default_date_format(),
            meta_date_format: default_meta_date_format(),
        }
    }

    /// Set the hemisphere.
    pub fn with_hemisphere(mut self, hemisphere: Hemisphere) -> Self {
        self.hemisphere = hemisphere;
        self
    }

    /// Set the default lag width.
    pub fn with_var_lag(mut self, var_lag: usize) -> Self {
        self.var_lag = var_lag;
        self
    }

    /// Override the lag width for one variable.
    pub fn with_var_lag_override<S: Into<String>>(mut self, var: S, lag: usize) -> Self {
        self.var_lag_override.insert(var.into(), lag);
        self
    }

    /// Set the forecast horizon.
    pub fn with_forecast_days(mut self, days: usize) -> Self {
        self.n_forecast_days = days;
        self
    }

    /// Enable or disable loss-day weighting.
    pub fn with_loss_weight_days(mut self, enabled: bool) -> Self {
        self.loss_weight_days = enabled;
        self
    }

    /// Set the loss-day weighting calibration constant.
    pub fn with_reference_active_cells(mut self, cells: f64) -> Self {
        self.reference_active_cells = cells;
        self
    }

    /// Set samples per shard.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.output_batch_size = batch_size;
        self
    }

    /// Set the worker thread count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the shard output root.
    pub fn with_output_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.output_path = path.as_ref().to_path_buf();
        self
    }

    /// Set the manifest output directory.
    pub fn with_dataset_config_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.dataset_config_path = path.as_ref().to_path_buf();
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.identifier.is_empty() {
            return Err(DatagenError::config("identifier cannot be empty"));
        }
        if self.var_lag == 0 {
            return Err(DatagenError::config("var_lag must be > 0"));
        }
        if self.n_forecast_days == 0 {
            return Err(DatagenError::config("n_forecast_days must be > 0"));
        }
        if self.output_batch_size == 0 {
            return Err(DatagenError::config("output_batch_size must be > 0"));
        }
        if self.workers == 0 {
            return Err(DatagenError::config("workers must be > 0"));
        }
        if self.reference_active_cells <= 0.0 {
            return Err(DatagenError::config(
                "reference_active_cells must be positive",
            ));
        }
        Ok(())
    }

    /// Lag width for a variable, honouring overrides.
    pub fn lag_for(&self, var: &str) -> usize {
        self.var_lag_override
            .get(var)
            .copied()
            .unwrap_or(self.var_lag)
    }

    /// Save to a TOML file.
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string)?;
        Ok(())
    }

    /// Load from a TOML file.
    pub fn load_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: GeneratorConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================
