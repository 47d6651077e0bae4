//! Dataset generation orchestration.
//!
//! [`DatasetGenerator`] ties the pipeline together: it plans the channel
//! layout, preloads the monthly active-cell masks, resolves every sample's
//! file references up front, and fans the resulting shard tasks out over a
//! dedicated worker pool. Workers receive plain, owned payloads only; all
//! shared state is immutable for the duration of a run.
//!
//! Failure semantics are fail-fast: the first assembly or write error
//! aborts the run once already-dispatched shards settle. Completed shards
//! stay on disk, but no manifest is written, so a partial run is never
//! mistaken for a finished dataset.
//!
//! # Example
//!
//! ```ignore
//! let loader = LoaderConfig::load_json("loader.exp_a.json")?;
//! let params = GeneratorConfig::new("exp_a").with_workers(8);
//! let masks = NpyMaskProvider::new("masks/north");
//!
//! let generator = DatasetGenerator::new(loader, params, &masks)?;
//! let manifest = generator.generate()?;
//! println!("{} samples written", manifest.counts.total());
//! ```

use crate::channels::{ChannelPlan, ChannelRole};
use crate::config::{GeneratorConfig, LoaderConfig, Precision, Split};
use crate::error::{DatagenError, Result};
use crate::manifest::{DatasetManifest, SplitCounts};
use crate::mask::MaskProvider;
use crate::sample::{ChannelInputs, ForecastSample, GridElement, SampleAssembler, SampleSpec};
use crate::shard::{shard_date_range, shard_file_name, write_shard, ShardTask};
use chrono::{Duration, NaiveDate};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Channel whose rasters supply the ground-truth sequence.
pub const TARGET_CHANNEL: &str = "siconca_abs";

/// A shard task tagged with the split it belongs to.
#[derive(Debug, Clone)]
struct PlannedShard {
    split: Split,
    task: ShardTask,
}

/// Orchestrates one dataset generation run.
///
/// Construction performs all planning and validation; [`generate`]
/// performs the I/O. The generator itself is immutable once built and
/// can be shared across threads.
///
/// [`generate`]: DatasetGenerator::generate
#[derive(Debug)]
pub struct DatasetGenerator {
    loader: LoaderConfig,
    params: GeneratorConfig,
    precision: Precision,
    plan: ChannelPlan,
    assembler: SampleAssembler,
    missing: HashSet<NaiveDate>,
    dataset_dir: PathBuf,
}

impl DatasetGenerator {
    /// Plan a generation run from validated configuration.
    ///
    /// Builds the channel plan, loads and checks all twelve monthly
    /// masks, and parses the global missing-date list. Any
    /// inconsistency surfaces here rather than mid-run.
    pub fn new<M: MaskProvider>(
        loader: LoaderConfig,
        params: GeneratorConfig,
        masks: &M,
    ) -> Result<Self> {
        loader.validate()?;
        params.validate()?;

        let precision = loader.precision()?;
        let plan = ChannelPlan::build(&loader, &params)?;
        let grid = loader.grid_shape();

        let mut month_masks = HashMap::new();
        for month in 1..=12 {
            let mask = masks.active_cell_mask(month)?;
            if mask.dim() != grid {
                return Err(DatagenError::config(format!(
                    "active-cell mask for month {} has shape {:?}, grid is {:?}",
                    month,
                    mask.shape(),
                    grid
                )));
            }
            month_masks.insert(month, mask);
        }

        let dataset_dir = params.output_path.join(&params.identifier);
        let assembler = SampleAssembler::new(
            grid,
            params.n_forecast_days,
            plan.num_channels(),
            params.loss_weight_days,
            params.reference_active_cells,
            month_masks,
            dataset_dir.clone(),
        );

        let missing: HashSet<NaiveDate> =
            loader.parsed_missing_dates()?.into_iter().collect();

        log::info!(
            "Planned {} channels ({} columns) for dataset {}",
            plan.channels().len(),
            plan.num_channels(),
            params.identifier
        );

        Ok(Self {
            loader,
            params,
            precision,
            plan,
            assembler,
            missing,
            dataset_dir,
        })
    }

    /// The deduced channel plan.
    pub fn plan(&self) -> &ChannelPlan {
        &self.plan
    }

    /// Working precision of the run.
    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Directory the shard tree is written under.
    pub fn dataset_dir(&self) -> &PathBuf {
        &self.dataset_dir
    }

    /// Resolve the full sample payload for one forecast date.
    ///
    /// Lag channels look back from the day before the forecast date,
    /// most recent first; trend channels look forward over their lead
    /// window; metadata channels key on day of year. Unresolvable
    /// files become `None` and later assemble as zero slices.
    pub fn sample_for_date(&self, date: NaiveDate) -> SampleSpec {
        let index = self.plan.index();
        let date_format = &self.params.date_format;

        let inputs = self
            .plan
            .channels()
            .iter()
            .map(|channel| {
                let files = match channel.role {
                    ChannelRole::Lag => (1..=channel.width)
                        .map(|i| {
                            index.resolve(
                                &channel.name,
                                date - Duration::days(i as i64),
                                date_format,
                            )
                        })
                        .collect(),
                    ChannelRole::Trend => (1..=channel.width)
                        .map(|i| {
                            index.resolve(
                                &channel.name,
                                date + Duration::days(i as i64),
                                date_format,
                            )
                        })
                        .collect(),
                    ChannelRole::Meta => vec![index.resolve(
                        &channel.name,
                        date,
                        &self.params.meta_date_format,
                    )],
                };
                ChannelInputs {
                    channel: channel.clone(),
                    files,
                }
            })
            .collect();

        let horizon = self.params.n_forecast_days;
        let output_files = (0..horizon)
            .map(|step| {
                index.resolve(
                    TARGET_CHANNEL,
                    date + Duration::days(step as i64),
                    date_format,
                )
            })
            .collect();

        let step_missing = (0..horizon)
            .map(|step| self.missing.contains(&(date + Duration::days(step as i64))))
            .collect();

        SampleSpec {
            forecast_date: date,
            inputs,
            output_files,
            step_missing,
        }
    }

    /// The shared sample assembler.
    pub fn assembler(&self) -> &SampleAssembler {
        &self.assembler
    }

    /// Assemble the full tensors for one forecast date, outside batch
    /// generation.
    ///
    /// The element type is the caller's choice; datasets written by
    /// [`generate`](DatasetGenerator::generate) use the one matching
    /// [`precision`](DatasetGenerator::precision).
    pub fn assemble_for_date<F: GridElement>(
        &self,
        date: NaiveDate,
    ) -> Result<ForecastSample<F>> {
        let spec = self.sample_for_date(date);
        self.assembler.assemble(&spec)
    }

    /// Generate every shard and write the dataset manifest.
    ///
    /// Returns the manifest on success. On failure the manifest is not
    /// written and the error of the first failing shard is returned.
    pub fn generate(&self) -> Result<DatasetManifest> {
        let shards = self.plan_shards()?;
        log::info!(
            "Dispatching {} shards over {} workers",
            shards.len(),
            self.params.workers
        );

        let counts = match self.precision {
            Precision::F32 => self.run_shards::<f32>(&shards)?,
            Precision::F64 => self.run_shards::<f64>(&shards)?,
        };

        log::info!(
            "Generation finished: {} train, {} val, {} test samples",
            counts.train,
            counts.val,
            counts.test
        );

        let manifest = self.manifest(counts);
        manifest.save(&self.params.dataset_config_path)?;
        Ok(manifest)
    }

    /// Write the dataset manifest without generating any data.
    ///
    /// Counts come from the configured per-split date lists; useful when
    /// the shard tree already exists or only the configuration record is
    /// needed.
    pub fn write_dataset_config_only(&self) -> Result<DatasetManifest> {
        let counts = SplitCounts {
            train: self.loader.split_dates(Split::Train)?.len(),
            val: self.loader.split_dates(Split::Val)?.len(),
            test: self.loader.split_dates(Split::Test)?.len(),
        };
        let manifest = self.manifest(counts);
        manifest.save(&self.params.dataset_config_path)?;
        Ok(manifest)
    }

    fn plan_shards(&self) -> Result<Vec<PlannedShard>> {
        std::fs::create_dir_all(&self.dataset_dir)?;

        let mut shards = Vec::new();
        for split in Split::ALL {
            let dates = self.loader.split_dates(split)?;
            log::info!("{} {} dates in total", dates.len(), split.dir_name());

            let split_dir = self.dataset_dir.join(split.dir_name());
            std::fs::create_dir_all(&split_dir)?;

            for (batch, chunk) in dates.chunks(self.params.output_batch_size).enumerate() {
                let specs = chunk
                    .iter()
                    .map(|&date| self.sample_for_date(date))
                    .collect();
                shards.push(PlannedShard {
                    split,
                    task: ShardTask {
                        path: split_dir.join(shard_file_name(batch)),
                        specs,
                    },
                });
            }
        }
        Ok(shards)
    }

    fn run_shards<F: GridElement>(&self, shards: &[PlannedShard]) -> Result<SplitCounts> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.params.workers)
            .build()
            .map_err(|e| {
                DatagenError::config(format!("failed to build worker pool: {}", e))
            })?;

        let assembler = &self.assembler;
        let written: Vec<(Split, usize)> = pool.install(|| {
            shards
                .par_iter()
                .map(|shard| {
                    let samples = shard
                        .task
                        .specs
                        .iter()
                        .map(|spec| assembler.assemble::<F>(spec))
                        .collect::<Result<Vec<_>>>()?;
                    write_shard(&shard.task.path, &samples)?;

                    if let Some((first, last)) = shard_date_range(&shard.task.specs) {
                        log::info!(
                            "Wrote {} ({} to {})",
                            shard.task.path.display(),
                            first,
                            last
                        );
                    }
                    Ok((shard.split, samples.len()))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let mut counts = SplitCounts::default();
        for (split, n) in written {
            match split {
                Split::Train => counts.train += n,
                Split::Val => counts.val += n,
                Split::Test => counts.test += n,
            }
        }
        Ok(counts)
    }

    fn manifest(&self, counts: SplitCounts) -> DatasetManifest {
        DatasetManifest {
            identifier: self.params.identifier.clone(),
            implementation: "DatasetGenerator".to_string(),
            channels: self.plan.expanded_names(),
            counts,
            dtype: self.precision.name().to_string(),
            loader_config: self.loader.source_path.clone(),
            missing_dates: self.loader.missing_dates.clone(),
            n_forecast_days: self.params.n_forecast_days,
            north: self.params.hemisphere.is_north(),
            south: !self.params.hemisphere.is_north(),
            num_channels: self.plan.num_channels(),
            shape: self.loader.shape.clone(),
            dataset_path: self.dataset_dir.clone(),
            loss_weight_days: self.params.loss_weight_days,
            output_batch_size: self.params.output_batch_size,
            var_lag: self.params.var_lag,
            var_lag_override: self.params.var_lag_override.clone(),
        }
    }
}
