//! Forecast Datagen
//!
//! Training-dataset generation for gridded geospatial forecasting models.
//!
//! # Overview
//!
//! This library turns daily raster files (`.npy` grids produced by an
//! upstream preprocessing stage) into sharded training datasets. For each
//! forecast date it assembles:
//!
//! - an **input tensor** stacking lagged observations, linear-trend
//!   projections and calendar metadata into a deterministic channel layout
//! - a **target tensor** covering the forecast horizon
//! - a **loss-weight tensor** derived from monthly active-cell masks, with
//!   globally missing dates zeroed out
//!
//! Samples are batched into `.npz` shards per split (train/val/test) by a
//! worker pool, and a finished run is summarized in a JSON dataset
//! manifest.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Dataset Generator                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  config/    - Loader document and generator parameters          │
//! │  channels/  - Channel planning and raster file resolution       │
//! │  mask/      - Monthly active-cell mask providers                │
//! │  sample/    - Per-date tensor assembly                          │
//! │  shard/     - Batch serialization to .npz shards                │
//! │  generator/ - Parallel orchestration over the worker pool       │
//! │  manifest/  - Terminal dataset manifest                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use forecast_datagen::prelude::*;
//!
//! let loader = LoaderConfig::load_json("loader.exp_a.json")?;
//! let params = GeneratorConfig::new("exp_a")
//!     .with_var_lag(2)
//!     .with_forecast_days(93)
//!     .with_workers(8);
//! let masks = NpyMaskProvider::new("masks/north");
//!
//! let generator = DatasetGenerator::new(loader, params, &masks)?;
//! let manifest = generator.generate()?;
//! println!("{} samples written", manifest.counts.total());
//! ```

pub mod channels;
pub mod config;
pub mod error;
pub mod generator;
pub mod manifest;
pub mod mask;
pub mod prelude;
pub mod sample;
pub mod shard;

// Re-exports - Configuration
pub use config::{
    GeneratorConfig, Hemisphere, LoaderConfig, Precision, SourceConfig, Split, SplitDates,
};

// Re-exports - Planning
pub use channels::{ChannelFileIndex, ChannelPlan, ChannelRole, ChannelSpec};

// Re-exports - Assembly and serialization
pub use mask::{FnMaskProvider, MaskProvider, NpyMaskProvider};
pub use sample::{ChannelInputs, ForecastSample, GridElement, SampleAssembler, SampleSpec};
pub use shard::{read_shard, write_shard, ShardRecord, ShardTask};

// Re-exports - Orchestration
pub use error::{DatagenError, Result};
pub use generator::DatasetGenerator;
pub use manifest::{DatasetManifest, SplitCounts};
