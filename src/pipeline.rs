//! Request pipeline: mask, sample and cluster every image, then rank.

use image::{GrayImage, RgbaImage};
use rayon::ThreadPool;
use rayon::prelude::*;
use tracing::{Level, debug, info, warn};

use crate::catalog::{self, AggregatedCatalog, CatalogEntry, CatalogSnapshot, ImageClusterSet, ImageStore};
use crate::config::MatchConfig;
use crate::io::{self, ImageSaver};
use crate::ranker::{self, MatchResult};
use crate::segmentation::SegmentationHandle;
use crate::{Result, cluster, color_ops, sampler};

/// Long-lived matcher that owns the segmenter and the worker pool
///
/// Requests share nothing but the read-only configuration and the loaded
/// segmenter; every request builds its own cluster sets and drops them when
/// it returns.
pub struct Matcher {
    config: MatchConfig,
    segmentation: SegmentationHandle,
    pool: ThreadPool,
    saver: Option<ImageSaver>,
}

impl Matcher {
    /// Matcher using the segmenter described by the configuration
    pub fn new(config: MatchConfig) -> Result<Self> {
        let segmentation = SegmentationHandle::new(&config.segmentation);
        Self::with_segmentation(config, segmentation)
    }

    /// Matcher using a caller-supplied segmentation handle
    pub fn with_segmentation(config: MatchConfig, segmentation: SegmentationHandle) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.pipeline.jobs)
            .thread_name(|index| format!("garment-match-{index}"))
            .build()?;
        let saver = match &config.pipeline.intermediary_dir {
            Some(directory) => Some(ImageSaver::new(directory)?),
            None => None,
        };
        Ok(Self {
            config,
            segmentation,
            pool,
            saver,
        })
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Release the segmenter; it is loaded again on the next request
    pub fn shutdown(&mut self) {
        self.segmentation.teardown();
    }

    /// Mask, sample and cluster one image
    ///
    /// Segmentation failures are returned as errors; see
    /// [`Matcher::cluster_image_or_empty`] for the degrading variant.
    pub fn cluster_image(&self, identifier: &str, image: &RgbaImage) -> Result<ImageClusterSet> {
        self.cluster_labelled(identifier, identifier, image)
    }

    /// Like [`Matcher::cluster_image`], but a recoverable failure yields an
    /// image without clusters instead of an error
    pub fn cluster_image_or_empty(&self, identifier: &str, image: &RgbaImage) -> Result<ImageClusterSet> {
        self.cluster_labelled_or_empty(identifier, identifier, image)
    }

    /// `artifact_name` names the saved mask and masked image
    fn cluster_labelled(&self, identifier: &str, artifact_name: &str, image: &RgbaImage) -> Result<ImageClusterSet> {
        let (mask, masked) = self.segmentation.extract(image)?;
        self.save_masks(artifact_name, &mask, &masked);
        if tracing::enabled!(Level::DEBUG) {
            let color = color_ops::find_dominant_color_hex(&masked);
            debug!("{identifier}: dominant color is {color}");
        }
        let samples = sampler::sample(&masked, &self.config.sampler);
        if samples.is_empty() {
            warn!("{identifier}: no foreground pixels, image has no clusters");
            return Ok(ImageClusterSet::empty(identifier));
        }
        let clusters = cluster::cluster(&samples, &self.config.cluster);
        debug!(
            "{identifier}: {} samples in {} clusters",
            samples.len(),
            clusters.len()
        );
        Ok(ImageClusterSet::new(identifier, clusters))
    }

    fn cluster_labelled_or_empty(
        &self,
        identifier: &str,
        artifact_name: &str,
        image: &RgbaImage,
    ) -> Result<ImageClusterSet> {
        match self.cluster_labelled(identifier, artifact_name, image) {
            Err(e) if e.is_recoverable() => {
                warn!("{identifier}: {e}, image has no clusters");
                Ok(ImageClusterSet::empty(identifier))
            }
            result => result,
        }
    }

    /// Intermediate artifacts never change the outcome of a request
    fn save_masks(&self, artifact_name: &str, mask: &GrayImage, masked: &RgbaImage) {
        let Some(saver) = &self.saver else {
            return;
        };
        if let Err(e) = saver.save_luma_image_as(mask, artifact_name, "mask") {
            warn!("{artifact_name}: mask not saved, {e}");
        }
        if let Err(e) = saver.save_rgba_image_as(masked, artifact_name, "masked") {
            warn!("{artifact_name}: masked image not saved, {e}");
        }
    }

    /// Read, decode and cluster one catalog entry; `None` if it cannot be read
    fn cluster_entry(&self, entry: &CatalogEntry, store: &dyn ImageStore) -> Result<Option<ImageClusterSet>> {
        let image = store.read(entry).and_then(|bytes| io::decode_image(&bytes));
        match image {
            Ok(image) => {
                let artifact_name = format!("data_{}", entry.identifier);
                let set = self.cluster_labelled_or_empty(&entry.identifier, &artifact_name, &image.to_rgba8())?;
                Ok(Some(set))
            }
            Err(e) => {
                warn!("{}: skipped, {e}", entry.identifier);
                Ok(None)
            }
        }
    }

    /// Cluster the query and every usable catalog entry
    ///
    /// A query that cannot be decoded is an error, and so is any failure that
    /// is not confined to one image (see [`crate::Error::is_recoverable`]).
    /// Catalog entries are processed in parallel and keep the snapshot's order.
    /// Saved artifacts are prefixed `test_` for the query and `data_` for
    /// catalog entries.
    pub fn aggregate(
        &self,
        query_identifier: &str,
        query_bytes: &[u8],
        catalog: &CatalogSnapshot,
        store: &dyn ImageStore,
    ) -> Result<AggregatedCatalog> {
        let query_image = io::decode_image(query_bytes)?.to_rgba8();
        let query = self.cluster_labelled_or_empty(
            query_identifier,
            &format!("test_{query_identifier}"),
            &query_image,
        )?;
        let entries: Vec<ImageClusterSet> = self.pool.install(|| {
            catalog
                .entries()
                .par_iter()
                .filter_map(|entry| self.cluster_entry(entry, store).transpose())
                .collect::<Result<Vec<_>>>()
        })?;
        if entries.len() < catalog.len() {
            warn!(
                "{} of {} catalog entries could not be read",
                catalog.len() - entries.len(),
                catalog.len()
            );
        }
        let aggregated = catalog::aggregate(query, entries);
        if let Some(saver) = &self.saver {
            let name = format!("combined_{query_identifier}");
            if let Err(e) = saver.save_json_as(&aggregated.to_labeled_json(), &name) {
                warn!("{name}: not saved, {e}");
            }
        }
        Ok(aggregated)
    }

    /// Rank the catalog against a query image
    ///
    /// Returns the placeholder list from [`ranker::fallback`] when the query
    /// has no clusters or no catalog entry is usable.
    pub fn process(
        &self,
        query_identifier: &str,
        query_bytes: &[u8],
        catalog: &CatalogSnapshot,
        store: &dyn ImageStore,
    ) -> Result<Vec<MatchResult>> {
        info!(
            "{query_identifier}: matching against {} catalog entries",
            catalog.len()
        );
        let aggregated = self.aggregate(query_identifier, query_bytes, catalog, store)?;
        if aggregated.entries().is_empty() {
            warn!("{query_identifier}: no usable catalog entries");
        }
        let matches = ranker::rank(aggregated.query(), aggregated.entries(), &self.config.rank);
        if matches.first().is_some_and(MatchResult::is_placeholder) {
            info!("{query_identifier}: no match found");
        } else {
            info!("{query_identifier}: ranked {} matches", matches.len());
        }
        Ok(matches)
    }
}

impl Drop for Matcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
