//! Match a garment photo against a catalog of reference photos by dominant
//! color composition.
//!
//! Every image is segmented into garment and background, its foreground is
//! sampled in HSV, the samples are grouped into at most five hue clusters, and
//! catalog images are ranked by a share-weighted distance between their
//! clusters and the query's.

pub use self::catalog::{
    AggregatedCatalog, CatalogEntry, CatalogSnapshot, FileSystemStore, ImageClusterSet, ImageStore,
};
pub use self::cluster::{ClusterParams, ColorCluster};
pub use self::color_ops::HueMetric;
pub use self::config::{MatchConfig, PipelineParams};
pub use self::error::{Error, Result};
pub use self::pipeline::Matcher;
pub use self::ranker::{MatchResult, RankParams};
pub use self::sampler::{BackgroundRule, PixelSample, SamplerParams};
pub use self::segmentation::{SegmentationHandle, SegmentationParams, Segmenter, SegmenterKind};

use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;
use tracing::{Level, info, warn};
use wild::ArgsOs;

mod alpha_channel;
mod arg_validators;
pub mod catalog;
pub mod cluster;
mod color_ops;
pub mod config;
mod error;
pub mod io;
pub mod pipeline;
pub mod ranker;
pub mod sampler;
pub mod segmentation;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Query garment image
    #[arg(required(true))]
    query: PathBuf,
    /// Catalog image files (glob patterns allowed)
    #[arg(short, long, num_args(1..))]
    catalog: Vec<String>,
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write the effective configuration to this file and exit
    #[arg(long)]
    dump_config: Option<PathBuf>,
    /// Number of color clusters per image
    #[arg(short('k'), long, value_parser = arg_validators::validate_positive_count)]
    clusters: Option<usize>,
    /// Minimum share of an image a cluster needs (percent)
    #[arg(short('m'), long, value_parser = arg_validators::validate_min_share_percent)]
    min_share: Option<f64>,
    /// Number of matches to report
    #[arg(short('t'), long, value_parser = arg_validators::validate_positive_count)]
    top_k: Option<usize>,
    /// Edge length images are resized to before sampling
    #[arg(long, value_parser = arg_validators::validate_positive_dimension)]
    sample_dim: Option<u32>,
    /// Sample every n-th row and column
    #[arg(long, value_parser = arg_validators::validate_positive_dimension)]
    sample_stride: Option<u32>,
    /// Seed for cluster initialization
    #[arg(long)]
    seed: Option<u64>,
    /// Hue distance used for clustering and ranking
    #[arg(long, value_enum)]
    hue_metric: Option<HueMetric>,
    /// How background pixels are recognized
    #[arg(long, value_enum)]
    background_rule: Option<BackgroundRule>,
    /// Foreground segmentation method
    #[arg(long, value_enum)]
    segmenter: Option<SegmenterKind>,
    /// Background color for chroma key segmentation
    #[arg(long, value_parser = arg_validators::validate_chroma_key_color)]
    chroma_key_color: Option<String>,
    /// Floodfill fuzz (euclidean distance)
    #[arg(short('f'), long)]
    floodfill_fuzz: Option<f32>,
    /// Trim mask edges (pixels)
    #[arg(long)]
    trim_edges: Option<u8>,
    /// Grow mask edges (pixels)
    #[arg(long)]
    grow_edges: Option<u8>,
    /// Segmentation deadline per image in milliseconds (0 disables)
    #[arg(long)]
    segmentation_timeout_ms: Option<u64>,
    /// Worker threads (0 means one per core)
    #[arg(short('j'), long)]
    jobs: Option<usize>,
    /// Save masks, masked images and combined clusters into this directory
    #[arg(short('s'), long)]
    save_intermediary_images: Option<PathBuf>,
    /// List the catalog snapshot and exit
    #[arg(long, default_value_t = false)]
    list_catalog: bool,
    /// Print matches as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
    /// Verbose messages
    #[arg(short('v'), long, default_value_t = false, conflicts_with = "quiet")]
    verbose: bool,
    /// Only print warnings and errors
    #[arg(short('q'), long, default_value_t = false)]
    quiet: bool,
}

impl Args {
    /// Effective configuration: defaults, then the config file, then flags
    fn to_config(&self) -> Result<MatchConfig> {
        let mut config = match &self.config {
            Some(path) => MatchConfig::from_json_file(path)?,
            None => MatchConfig::default(),
        };
        if let Some(k) = self.clusters {
            config.cluster.k = k;
        }
        if let Some(min_share) = self.min_share {
            config.cluster.min_share_percent = min_share;
        }
        if let Some(top_k) = self.top_k {
            config.rank.top_k = top_k;
        }
        if let Some(sample_dim) = self.sample_dim {
            config.sampler.sample_dim = sample_dim;
        }
        if let Some(sample_stride) = self.sample_stride {
            config.sampler.sample_stride = sample_stride;
        }
        if let Some(seed) = self.seed {
            config.cluster.seed = seed;
        }
        if let Some(metric) = self.hue_metric {
            config.set_hue_metric(metric);
        }
        if let Some(rule) = self.background_rule {
            config.sampler.background_rule = rule;
        }
        if let Some(kind) = self.segmenter {
            config.segmentation.kind = kind;
        }
        if let Some(color) = &self.chroma_key_color {
            config.segmentation.chroma_key_color = color.clone();
        }
        if let Some(fuzz) = self.floodfill_fuzz {
            config.segmentation.floodfill_fuzz = fuzz;
        }
        if let Some(trim) = self.trim_edges {
            config.segmentation.trim_edges = trim;
        }
        if let Some(grow) = self.grow_edges {
            config.segmentation.grow_edges = grow;
        }
        if let Some(timeout) = self.segmentation_timeout_ms {
            config.segmentation.timeout_ms = timeout;
        }
        if let Some(jobs) = self.jobs {
            config.pipeline.jobs = jobs;
        }
        if let Some(directory) = &self.save_intermediary_images {
            config.pipeline.intermediary_dir = Some(directory.clone());
        }
        config.validate()?;
        Ok(config)
    }

    fn log_level(&self) -> Level {
        match (self.verbose, self.quiet) {
            (true, _) => Level::DEBUG,
            (_, true) => Level::WARN,
            _ => Level::INFO,
        }
    }
}

#[derive(Serialize)]
struct Report<'a> {
    query: &'a str,
    matches: &'a [MatchResult],
}

pub fn run(args: ArgsOs) -> Result<()> {
    let args = Args::parse_from(args);
    tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_writer(std::io::stderr)
        .init();

    let config = args.to_config()?;
    if let Some(path) = &args.dump_config {
        config.to_json_file(path)?;
        info!("{}: configuration saved", path.display());
        return Ok(());
    }

    let snapshot = CatalogSnapshot::from_patterns(&args.catalog)?;
    if args.list_catalog {
        for entry in snapshot.entries() {
            println!("{}\t{}", entry.identifier, entry.location.display());
        }
        return Ok(());
    }
    if snapshot.is_empty() {
        warn!("no catalog images found");
    }

    let query_identifier = catalog::identifier_for(&args.query);
    let query_bytes = std::fs::read(&args.query)?;
    let matcher = Matcher::new(config)?;
    let matches = matcher.process(&query_identifier, &query_bytes, &snapshot, &FileSystemStore)?;

    if args.json {
        let report = Report {
            query: &query_identifier,
            matches: &matches,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for result in &matches {
            println!(
                "{:>2}. {:>10.4} {}",
                result.rank, result.score, result.entry_identifier
            );
        }
    }
    Ok(())
}
