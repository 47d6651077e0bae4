//! Channel planning and per-date file resolution.
//!
//! A *channel* is one named group of columns in the assembled input
//! tensor. Channels come in three roles:
//!
//! - **Lag**: historical rasters, `width` days back from the forecast date
//! - **Trend**: linear-trend rasters, `width` days of lead offsets
//! - **Meta**: a single day-of-year keyed auxiliary raster
//!
//! Channel order defines the column layout of every input tensor, so it
//! must be a pure function of the configuration: data-format categories
//! in fixed order (`abs`, then `anom`), source identities ascending,
//! variable names ascending. The plan keeps channels in an explicit
//! ordered `Vec` — never a map whose iteration order could drift.
//!
//! [`ChannelFileIndex`] is the companion lookup from (channel, date) to a
//! resolved raster path. It is built once during planning and shared
//! read-only afterwards.

use crate::config::{GeneratorConfig, Hemisphere, LoaderConfig};
use crate::error::{DatagenError, Result};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::ops::Range;
use std::path::PathBuf;

// ============================================================================
// Channel identity
// ============================================================================

/// Role a channel plays in the input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// Historical lag inputs (dates before the forecast date)
    Lag,
    /// Linear-trend inputs (lead offsets after the forecast date)
    Trend,
    /// Single-slice metadata input (day-of-year keyed)
    Meta,
}

/// One planned channel: name, column width, and role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Channel name, e.g. `tas_abs`, `siconca_linear_trend`, `cos`
    pub name: String,
    /// Number of input-tensor columns this channel contributes
    pub width: usize,
    /// Channel role
    pub role: ChannelRole,
}

impl ChannelSpec {
    /// Base variable name, the part before the first underscore.
    ///
    /// Raster files live under `<hemisphere>/<base>/`, so `tas_abs` and
    /// `tas_anom` both resolve under `tas/`.
    pub fn var_base(&self) -> &str {
        self.name.split('_').next().unwrap_or(&self.name)
    }
}

// ============================================================================
// Channel file index
// ============================================================================

/// Immutable lookup from (channel, date) to a resolved raster path.
///
/// Built once from the configuration's file manifests and shared
/// read-only by all workers.
#[derive(Debug, Clone)]
pub struct ChannelFileIndex {
    hemisphere: Hemisphere,
    files: HashMap<String, Vec<PathBuf>>,
}

impl ChannelFileIndex {
    /// Create an empty index for one hemisphere.
    pub fn new(hemisphere: Hemisphere) -> Self {
        Self {
            hemisphere,
            files: HashMap::new(),
        }
    }

    /// Register candidate files for a channel.
    ///
    /// Registering a channel that already has files appends to its list;
    /// this usually means two sources declare the same variable, which is
    /// allowed but worth flagging.
    pub fn register(&mut self, channel: &str, files: &[PathBuf]) {
        if self.files.contains_key(channel) {
            log::warn!(
                "{} already has files, but more found, this could be an \
                 unintentional merge of sources",
                channel
            );
        }
        log::debug!("Adding {} files to {} channel", files.len(), channel);
        self.files
            .entry(channel.to_string())
            .or_default()
            .extend_from_slice(files);
    }

    /// Resolve the raster file for a channel and date.
    ///
    /// The expected fragment is
    /// `<hemisphere>/<var-base>/<formatted-date>.npy`; the channel's
    /// candidate list is searched for a path containing it. Multiple
    /// matches return the first with a warning; no match returns `None`
    /// (missing data, not an error).
    pub fn resolve(
        &self,
        channel: &str,
        date: NaiveDate,
        date_format: &str,
    ) -> Option<PathBuf> {
        let var_base = channel.split('_').next().unwrap_or(channel);
        let filename = format!("{}.npy", date.format(date_format));
        let fragment = format!("{}/{}/{}", self.hemisphere.dir_name(), var_base, filename);

        let candidates = self.files.get(channel)?;
        let mut matches = candidates
            .iter()
            .filter(|p| p.to_string_lossy().contains(&fragment));

        let first = matches.next()?;
        if matches.next().is_some() {
            log::warn!(
                "Multiple files found for {}, only returning {}",
                filename,
                first.display()
            );
        }
        Some(first.clone())
    }

    /// Number of channels with at least one registered file.
    pub fn channel_count(&self) -> usize {
        self.files.len()
    }
}

// ============================================================================
// Channel plan
// ============================================================================

/// The deduced channel layout for one configuration.
///
/// Holds the ordered channel list and the populated file index. Building
/// the same configuration twice yields an identical plan.
#[derive(Debug, Clone)]
pub struct ChannelPlan {
    channels: Vec<ChannelSpec>,
    index: ChannelFileIndex,
}

impl ChannelPlan {
    /// Deduce channels and populate the file index from the configuration.
    ///
    /// Fails with a configuration error if a metadata variable is given a
    /// width greater than one via a lag override.
    pub fn build(loader: &LoaderConfig, params: &GeneratorConfig) -> Result<Self> {
        let mut plan = Self {
            channels: Vec::new(),
            index: ChannelFileIndex::new(params.hemisphere),
        };

        // Lag channels: abs before anom, sources ascending, vars ascending.
        for data_format in ["abs", "anom"] {
            for (identity, source) in &loader.sources {
                let mut vars: Vec<&String> = match data_format {
                    "abs" => source.abs.iter().collect(),
                    _ => source.anom.iter().collect(),
                };
                vars.sort();

                for var in vars {
                    let name = format!("{}_{}", var, data_format);
                    let width = params.lag_for(var);
                    plan.push_channel(identity, source, var, name, width, ChannelRole::Lag);
                }
            }
        }

        // Trend channels.
        for (identity, source) in &loader.sources {
            let mut vars: Vec<&String> = source.linear_trends.iter().collect();
            vars.sort();

            for var in vars {
                let name = format!("{}_linear_trend", var);
                plan.push_channel(
                    identity,
                    source,
                    var,
                    name,
                    source.linear_trend_days,
                    ChannelRole::Trend,
                );
            }
        }

        // Metadata channels, always width 1.
        for (identity, source) in &loader.sources {
            let mut vars: Vec<&String> = source.meta.iter().collect();
            vars.sort();

            for var in vars {
                if params.lag_for(var) > 1 && params.var_lag_override.contains_key(var.as_str())
                {
                    return Err(DatagenError::config(format!(
                        "{} meta variable cannot have more than one channel",
                        var
                    )));
                }
                plan.push_channel(identity, source, var, var.clone(), 1, ChannelRole::Meta);
            }
        }

        log::debug!(
            "Channel quantities deduced: {:?}, total channels: {}",
            plan.channels
                .iter()
                .map(|c| (c.name.as_str(), c.width))
                .collect::<Vec<_>>(),
            plan.num_channels()
        );

        Ok(plan)
    }

    fn push_channel(
        &mut self,
        identity: &str,
        source: &crate::config::SourceConfig,
        var: &str,
        name: String,
        width: usize,
        role: ChannelRole,
    ) {
        match source.var_files.get(var) {
            Some(files) => self.index.register(&name, files),
            None => log::warn!(
                "source {} declares variable {} without a file manifest",
                identity,
                var
            ),
        }

        // A channel declared by more than one source keeps its first
        // position; the later declaration only updates the width.
        if let Some(existing) = self.channels.iter_mut().find(|c| c.name == name) {
            existing.width = width;
        } else {
            self.channels.push(ChannelSpec { name, width, role });
        }
    }

    /// Planned channels in column order.
    pub fn channels(&self) -> &[ChannelSpec] {
        &self.channels
    }

    /// The populated file index.
    pub fn index(&self) -> &ChannelFileIndex {
        &self.index
    }

    /// Total input-tensor column count.
    pub fn num_channels(&self) -> usize {
        self.channels.iter().map(|c| c.width).sum()
    }

    /// Contiguous input-tensor column range of one channel.
    pub fn column_range(&self, name: &str) -> Option<Range<usize>> {
        let mut offset = 0;
        for channel in &self.channels {
            if channel.name == name {
                return Some(offset..offset + channel.width);
            }
            offset += channel.width;
        }
        None
    }

    /// Expanded per-column channel names, `<name>_1 .. <name>_w`.
    pub fn expanded_names(&self) -> Vec<String> {
        self.channels
            .iter()
            .flat_map(|c| (1..=c.width).map(move |i| format!("{}_{}", c.name, i)))
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use std::collections::BTreeMap;

    fn loader_with(sources: BTreeMap<String, SourceConfig>) -> LoaderConfig {
        LoaderConfig {
            sources,
            dtype: "float32".to_string(),
            shape: vec![4, 4],
            missing_dates: Vec::new(),
            source_path: PathBuf::new(),
        }
    }

    fn source(
        abs: &[&str],
        anom: &[&str],
        meta: &[&str],
        trends: &[&str],
        trend_days: usize,
    ) -> SourceConfig {
        let mut var_files = HashMap::new();
        for var in abs.iter().chain(anom).chain(meta).chain(trends) {
            var_files.insert(var.to_string(), Vec::new());
        }
        SourceConfig {
            abs: abs.iter().map(|s| s.to_string()).collect(),
            anom: anom.iter().map(|s| s.to_string()).collect(),
            meta: meta.iter().map(|s| s.to_string()).collect(),
            linear_trends: trends.iter().map(|s| s.to_string()).collect(),
            linear_trend_days: trend_days,
            var_files,
            dates: Default::default(),
        }
    }

    #[test]
    fn test_channel_order_is_deterministic() {
        let mut sources = BTreeMap::new();
        sources.insert(
            "era5".to_string(),
            source(&["zg500", "tas"], &["uas"], &[], &[], 0),
        );
        sources.insert(
            "osisaf".to_string(),
            source(&["siconca"], &[], &["cos", "sin"], &["siconca"], 3),
        );
        let loader = loader_with(sources);
        let params = GeneratorConfig::new("test").with_var_lag(2);

        let plan = ChannelPlan::build(&loader, &params).unwrap();
        let names: Vec<&str> = plan.channels().iter().map(|c| c.name.as_str()).collect();

        // abs (sources then vars ascending), anom, trends, meta.
        assert_eq!(
            names,
            vec![
                "tas_abs",
                "zg500_abs",
                "siconca_abs",
                "uas_anom",
                "siconca_linear_trend",
                "cos",
                "sin"
            ]
        );

        // Rebuild: identical ordering.
        let again = ChannelPlan::build(&loader, &params).unwrap();
        let names_again: Vec<&str> =
            again.channels().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, names_again);
    }

    #[test]
    fn test_num_channels_is_sum_of_widths() {
        let mut sources = BTreeMap::new();
        sources.insert(
            "osisaf".to_string(),
            source(&["siconca"], &[], &["cos"], &["siconca"], 3),
        );
        let loader = loader_with(sources);
        let params = GeneratorConfig::new("test").with_var_lag(2);

        let plan = ChannelPlan::build(&loader, &params).unwrap();
        // siconca_abs (2) + siconca_linear_trend (3) + cos (1)
        assert_eq!(plan.num_channels(), 6);
        assert_eq!(plan.expanded_names().len(), plan.num_channels());
        assert_eq!(plan.expanded_names()[0], "siconca_abs_1");
        assert_eq!(plan.expanded_names()[5], "cos_1");
    }

    #[test]
    fn test_column_ranges_are_contiguous() {
        let mut sources = BTreeMap::new();
        sources.insert(
            "osisaf".to_string(),
            source(&["siconca"], &[], &["cos"], &[], 0),
        );
        let loader = loader_with(sources);
        let params = GeneratorConfig::new("test").with_var_lag(2);

        let plan = ChannelPlan::build(&loader, &params).unwrap();
        assert_eq!(plan.column_range("siconca_abs"), Some(0..2));
        assert_eq!(plan.column_range("cos"), Some(2..3));
        assert_eq!(plan.column_range("missing"), None);
    }

    #[test]
    fn test_meta_width_override_is_fatal() {
        let mut sources = BTreeMap::new();
        sources.insert("osisaf".to_string(), source(&[], &[], &["cos"], &[], 0));
        let loader = loader_with(sources);
        let params = GeneratorConfig::new("test").with_var_lag_override("cos", 3);

        let err = ChannelPlan::build(&loader, &params).unwrap_err();
        assert!(matches!(err, DatagenError::Config { .. }));
    }

    #[test]
    fn test_index_resolve_first_match() {
        let mut index = ChannelFileIndex::new(Hemisphere::South);
        index.register(
            "tas_abs",
            &[
                PathBuf::from("/data/south/tas/2020_01_01.npy"),
                PathBuf::from("/data/south/tas/2020_01_02.npy"),
                PathBuf::from("/backup/south/tas/2020_01_02.npy"),
            ],
        );

        let date = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
        let resolved = index.resolve("tas_abs", date, "%Y_%m_%d").unwrap();
        assert_eq!(resolved, PathBuf::from("/data/south/tas/2020_01_02.npy"));
    }

    #[test]
    fn test_index_resolve_absent_is_none() {
        let mut index = ChannelFileIndex::new(Hemisphere::North);
        index.register(
            "tas_abs",
            &[PathBuf::from("/data/north/tas/2020_01_01.npy")],
        );

        let date = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
        assert!(index.resolve("tas_abs", date, "%Y_%m_%d").is_none());
        assert!(index.resolve("unknown", date, "%Y_%m_%d").is_none());
    }

    #[test]
    fn test_index_resolve_day_of_year_format() {
        let mut index = ChannelFileIndex::new(Hemisphere::North);
        index.register("cos", &[PathBuf::from("/data/north/cos/032.npy")]);

        let date = NaiveDate::from_ymd_opt(2020, 2, 1).unwrap();
        let resolved = index.resolve("cos", date, "%j").unwrap();
        assert_eq!(resolved, PathBuf::from("/data/north/cos/032.npy"));
    }

    #[test]
    fn test_duplicate_registration_appends() {
        let mut index = ChannelFileIndex::new(Hemisphere::North);
        index.register(
            "tas_abs",
            &[PathBuf::from("/a/north/tas/2020_01_01.npy")],
        );
        index.register(
            "tas_abs",
            &[PathBuf::from("/b/north/tas/2020_01_02.npy")],
        );

        let date = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
        assert!(index.resolve("tas_abs", date, "%Y_%m_%d").is_some());
    }
}
