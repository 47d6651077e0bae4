//! Prelude module for convenient imports.
//!
//! Re-exports the types most runs touch: the two configuration
//! documents, the generator, the mask providers and the manifest.
//!
//! # Usage
//!
//! ```ignore
//! use forecast_datagen::prelude::*;
//!
//! let loader = LoaderConfig::load_json("loader.exp_a.json")?;
//! let params = GeneratorConfig::new("exp_a").with_workers(8);
//! let masks = NpyMaskProvider::new("masks/north");
//! let manifest = DatasetGenerator::new(loader, params, &masks)?.generate()?;
//! ```

pub use crate::channels::{ChannelPlan, ChannelRole, ChannelSpec};
pub use crate::config::{
    GeneratorConfig, Hemisphere, LoaderConfig, Precision, SourceConfig, Split, SplitDates,
};
pub use crate::error::{DatagenError, Result};
pub use crate::generator::DatasetGenerator;
pub use crate::manifest::{DatasetManifest, SplitCounts};
pub use crate::mask::{FnMaskProvider, MaskProvider, NpyMaskProvider};
pub use crate::sample::{ForecastSample, SampleAssembler, SampleSpec};
pub use crate::shard::{read_shard, write_shard, ShardRecord};
