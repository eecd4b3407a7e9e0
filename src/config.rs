//! Tunable parameters for the matching pipeline.
//!
//! Every section has defaults (100x100 sampling, five clusters, 5% minimum
//! share, top five matches). A configuration can be written to and read back
//! from JSON so experiments are reproducible:
//!
//! ```no_run
//! use garment_match::MatchConfig;
//! use std::path::Path;
//!
//! let config = MatchConfig::default();
//! config.to_json_file(Path::new("match.json"))?;
//! let config = MatchConfig::from_json_file(Path::new("match.json"))?;
//! # Ok::<(), garment_match::Error>(())
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterParams;
use crate::color_ops::{self, HueMetric};
use crate::ranker::RankParams;
use crate::sampler::SamplerParams;
use crate::segmentation::SegmentationParams;
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub sampler: SamplerParams,
    pub cluster: ClusterParams,
    pub rank: RankParams,
    pub segmentation: SegmentationParams,
    pub pipeline: PipelineParams,
}

/// Execution settings that do not change results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    /// Worker threads for per-image processing, 0 picks one per core
    pub jobs: usize,
    /// Directory for masks, masked images and the combined cluster JSON
    pub intermediary_dir: Option<PathBuf>,
}

impl MatchConfig {
    /// Load configuration from JSON file
    ///
    /// The result is not validated, so command line overrides can still be
    /// applied; call [`MatchConfig::validate`] once they are.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Use the same hue metric for clustering and ranking
    pub fn set_hue_metric(&mut self, metric: HueMetric) {
        self.cluster.hue_metric = metric;
        self.rank.hue_metric = metric;
    }

    /// Reject parameter combinations the pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.sampler.sample_dim == 0 {
            return Err(Error::Config("sample_dim must be at least 1".to_string()));
        }
        if self.sampler.sample_stride == 0 {
            return Err(Error::Config("sample_stride must be at least 1".to_string()));
        }
        if self.cluster.k == 0 {
            return Err(Error::Config("k must be at least 1".to_string()));
        }
        if !(0.0..=100.0).contains(&self.cluster.min_share_percent) {
            return Err(Error::Config(format!(
                "min_share_percent must be within 0..=100, got {}",
                self.cluster.min_share_percent
            )));
        }
        if self.rank.top_k == 0 {
            return Err(Error::Config("top_k must be at least 1".to_string()));
        }
        if let Err(e) = color_ops::parse_color(&self.segmentation.chroma_key_color) {
            return Err(Error::Config(format!(
                "chroma key color {}: {e}",
                self.segmentation.chroma_key_color
            )));
        }
        if self.cluster.hue_metric != self.rank.hue_metric {
            return Err(Error::Config(format!(
                "clustering uses {:?} hue metric but ranking uses {:?}",
                self.cluster.hue_metric, self.rank.hue_metric
            )));
        }
        Ok(())
    }
}
