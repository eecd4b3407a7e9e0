//! Catalog snapshots and per-request aggregation of cluster sets.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::cluster::ColorCluster;
use crate::{Error, Result};

/// Color clusters of one processed image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageClusterSet {
    pub identifier: String,
    pub clusters: Vec<ColorCluster>,
}

impl ImageClusterSet {
    pub fn new(identifier: impl Into<String>, clusters: Vec<ColorCluster>) -> Self {
        Self {
            identifier: identifier.into(),
            clusters,
        }
    }

    /// Cluster set for an image that produced no usable foreground
    pub fn empty(identifier: impl Into<String>) -> Self {
        Self::new(identifier, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

/// The query's cluster set next to every catalog entry's cluster set
///
/// The query is kept in its own field, so a catalog entry that happens to share
/// the query's identifier is still a catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedCatalog {
    query: ImageClusterSet,
    entries: Vec<ImageClusterSet>,
}

/// Merge the query and catalog cluster sets of one request
pub fn aggregate(query: ImageClusterSet, entries: Vec<ImageClusterSet>) -> AggregatedCatalog {
    AggregatedCatalog { query, entries }
}

impl AggregatedCatalog {
    pub fn query(&self) -> &ImageClusterSet {
        &self.query
    }

    pub fn entries(&self) -> &[ImageClusterSet] {
        &self.entries
    }

    /// Flat JSON object keyed `test_<identifier>` for the query and
    /// `data_<identifier>` for catalog entries, each holding its clusters by label
    pub fn to_labeled_json(&self) -> Value {
        let mut combined = Map::new();
        combined.insert(
            format!("test_{}", self.query.identifier),
            clusters_by_label(&self.query.clusters),
        );
        for entry in &self.entries {
            combined.insert(
                format!("data_{}", entry.identifier),
                clusters_by_label(&entry.clusters),
            );
        }
        Value::Object(combined)
    }
}

fn clusters_by_label(clusters: &[ColorCluster]) -> Value {
    let map: Map<String, Value> = clusters
        .iter()
        .map(|c| {
            let value = json!({ "h": c.h, "s": c.s, "v": c.v, "percent": c.percent });
            (c.label.clone(), value)
        })
        .collect();
    Value::Object(map)
}

/// A reference image in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub identifier: String,
    pub location: PathBuf,
}

impl CatalogEntry {
    /// Entry whose identifier is the file stem of its path
    pub fn from_path(path: &Path) -> Self {
        Self {
            identifier: identifier_for(path),
            location: path.to_owned(),
        }
    }
}

/// Identifier of an image file, derived from its file stem
pub fn identifier_for(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Immutable listing of the catalog, captured once per request
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    entries: Arc<[CatalogEntry]>,
}

impl CatalogSnapshot {
    /// Expand glob patterns into a sorted, deduplicated snapshot
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut paths = Vec::new();
        for pattern in patterns {
            for path in glob::glob(pattern.as_ref())? {
                let path = path?;
                if path.is_file() {
                    paths.push(path);
                }
            }
        }
        paths.sort();
        paths.dedup();
        Ok(Self::from_entries(
            paths.iter().map(|path| CatalogEntry::from_path(path)).collect(),
        ))
    }

    /// Snapshot of the given entries, sorted by identifier
    ///
    /// Repeated identifiers get a numeric suffix so every entry stays addressable.
    pub fn from_entries(mut entries: Vec<CatalogEntry>) -> Self {
        entries.sort_by(|a, b| {
            a.identifier
                .cmp(&b.identifier)
                .then_with(|| a.location.cmp(&b.location))
        });
        let mut seen = HashSet::new();
        for entry in &mut entries {
            let base = entry.identifier.clone();
            let mut suffix = 1;
            while !seen.insert(entry.identifier.clone()) {
                suffix += 1;
                entry.identifier = format!("{base}_{suffix}");
            }
        }
        Self {
            entries: entries.into(),
        }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolves catalog entries to encoded image bytes
pub trait ImageStore: Sync {
    fn read(&self, entry: &CatalogEntry) -> Result<Vec<u8>>;
}

/// Reads catalog images from their file system location
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSystemStore;

impl ImageStore for FileSystemStore {
    fn read(&self, entry: &CatalogEntry) -> Result<Vec<u8>> {
        std::fs::read(&entry.location).map_err(|_| Error::MissingInput(entry.identifier.clone()))
    }
}

/// In-memory catalog keyed by identifier
impl ImageStore for HashMap<String, Vec<u8>> {
    fn read(&self, entry: &CatalogEntry) -> Result<Vec<u8>> {
        self.get(&entry.identifier)
            .cloned()
            .ok_or_else(|| Error::MissingInput(entry.identifier.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(label: &str, h: f64, percent: f64) -> ColorCluster {
        ColorCluster {
            label: label.to_string(),
            h,
            s: 100.0,
            v: 100.0,
            percent,
        }
    }

    #[test]
    fn query_keeps_its_role_on_identifier_collision() {
        let query = ImageClusterSet::new("shirt", vec![cluster("cluster_0", 10.0, 100.0)]);
        let entries = vec![
            ImageClusterSet::new("shirt", vec![cluster("cluster_0", 90.0, 100.0)]),
            ImageClusterSet::empty("dress"),
        ];
        let catalog = aggregate(query.clone(), entries);
        assert_eq!(catalog.query(), &query);
        assert_eq!(catalog.entries().len(), 2);
        assert_eq!(catalog.entries()[0].clusters[0].h, 90.0);

        let json = catalog.to_labeled_json();
        assert_eq!(json["test_shirt"]["cluster_0"]["h"], 10.0);
        assert_eq!(json["data_shirt"]["cluster_0"]["h"], 90.0);
        assert_eq!(json["data_dress"], json!({}));
    }

    #[test]
    fn identifier_is_file_stem() {
        assert_eq!(identifier_for(Path::new("catalog/image_with_mask_3.png")), "image_with_mask_3");
        let entry = CatalogEntry::from_path(Path::new("a/b/coat.jpg"));
        assert_eq!(entry.identifier, "coat");
        assert_eq!(entry.location, PathBuf::from("a/b/coat.jpg"));
    }

    #[test]
    fn snapshot_sorts_and_disambiguates() {
        let snapshot = CatalogSnapshot::from_entries(vec![
            CatalogEntry::from_path(Path::new("winter/coat.png")),
            CatalogEntry::from_path(Path::new("blouse.png")),
            CatalogEntry::from_path(Path::new("autumn/coat.png")),
        ]);
        let ids: Vec<&str> = snapshot.entries().iter().map(|e| e.identifier.as_str()).collect();
        assert_eq!(ids, ["blouse", "coat", "coat_2"]);
        assert_eq!(snapshot.entries()[1].location, PathBuf::from("autumn/coat.png"));
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn in_memory_store_reports_missing_entries() {
        let mut store = HashMap::new();
        store.insert("coat".to_string(), vec![1, 2, 3]);
        let coat = CatalogEntry::from_path(Path::new("coat.png"));
        let hat = CatalogEntry::from_path(Path::new("hat.png"));
        assert_eq!(store.read(&coat).unwrap(), vec![1, 2, 3]);
        assert!(matches!(store.read(&hat), Err(Error::MissingInput(id)) if id == "hat"));
    }

    #[test]
    fn file_system_store_reports_missing_files() {
        let entry = CatalogEntry::from_path(Path::new("/nonexistent/garment-match/ghost.png"));
        assert!(matches!(FileSystemStore.read(&entry), Err(Error::MissingInput(_))));
    }

    #[test]
    fn empty_pattern_match_is_empty_snapshot() {
        let snapshot = CatalogSnapshot::from_patterns(&["/nonexistent/garment-match/*.png"]).unwrap();
        assert!(snapshot.is_empty());
    }
}
