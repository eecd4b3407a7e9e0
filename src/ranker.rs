//! Ranking catalog entries by weighted color-cluster distance to the query.
//!
//! The distance between two clusters is the euclidean distance of their
//! `(h, s, v)` means divided by the geometric mean of their shares, so a close
//! match between two dominant clusters counts for more than a close match
//! between two minor ones. An entry's score is the sum, over the query's
//! clusters, of the distance to the entry's nearest cluster. Lower is better.

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::catalog::ImageClusterSet;
use crate::cluster::ColorCluster;
use crate::color_ops::HueMetric;

/// Default number of matches returned
pub const DEFAULT_TOP_K: usize = 5;

/// Identifier used by the placeholder results when nothing can be ranked
pub const NO_MATCH_IDENTIFIER: &str = "no match found";

/// One ranked catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// 1-based position in the ranking
    pub rank: usize,
    pub entry_identifier: String,
    /// Aggregate weighted distance, infinite for entries without clusters
    pub score: f64,
}

impl MatchResult {
    /// Whether this is one of the placeholder results
    pub fn is_placeholder(&self) -> bool {
        self.entry_identifier == NO_MATCH_IDENTIFIER && self.score.is_infinite()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankParams {
    pub top_k: usize,
    pub hue_metric: HueMetric,
}

impl Default for RankParams {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            hue_metric: HueMetric::default(),
        }
    }
}

/// Weighted distance between two clusters
pub fn cluster_distance(a: &ColorCluster, b: &ColorCluster, metric: HueMetric) -> f64 {
    let dh = metric.distance(a.h, b.h);
    let ds = a.s - b.s;
    let dv = a.v - b.v;
    let euclidean = (dh * dh + ds * ds + dv * dv).sqrt();
    let weight = (a.percent * b.percent).sqrt();
    if weight > 0.0 {
        euclidean / weight
    } else {
        f64::INFINITY
    }
}

/// Score of one catalog entry against the query's clusters
///
/// Entries without clusters score infinity so they rank last.
pub fn entry_score(query: &[ColorCluster], entry: &[ColorCluster], metric: HueMetric) -> f64 {
    if entry.is_empty() {
        return f64::INFINITY;
    }
    query
        .iter()
        .map(|q| {
            entry
                .iter()
                .map(|e| cluster_distance(q, e, metric))
                .fold(f64::INFINITY, f64::min)
        })
        .sum()
}

/// The placeholder ranking returned when there is nothing to compare
pub fn fallback(top_k: usize) -> Vec<MatchResult> {
    (1..=top_k)
        .map(|rank| MatchResult {
            rank,
            entry_identifier: NO_MATCH_IDENTIFIER.to_string(),
            score: f64::INFINITY,
        })
        .collect()
}

/// Rank catalog entries by ascending score, ties broken by identifier
///
/// Returns at most `top_k` results without padding. When the query has no
/// clusters or there are no entries, the [`fallback`] list is returned instead.
pub fn rank(query: &ImageClusterSet, entries: &[ImageClusterSet], params: &RankParams) -> Vec<MatchResult> {
    if query.is_empty() || entries.is_empty() {
        return fallback(params.top_k);
    }
    entries
        .iter()
        .map(|entry| {
            let score = entry_score(&query.clusters, &entry.clusters, params.hue_metric);
            (score, entry.identifier.as_str())
        })
        .sorted_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)))
        .take(params.top_k)
        .enumerate()
        .map(|(index, (score, identifier))| MatchResult {
            rank: index + 1,
            entry_identifier: identifier.to_string(),
            score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(h: f64, s: f64, v: f64, percent: f64) -> ColorCluster {
        ColorCluster {
            label: "cluster_0".to_string(),
            h,
            s,
            v,
            percent,
        }
    }

    fn set(identifier: &str, clusters: Vec<ColorCluster>) -> ImageClusterSet {
        ImageClusterSet::new(identifier, clusters)
    }

    #[test]
    fn distance_is_weighted_by_geometric_mean_share() {
        let a = cluster(10.0, 100.0, 100.0, 25.0);
        let b = cluster(13.0, 104.0, 100.0, 100.0);
        // euclidean 5, weight sqrt(25 * 100) = 50
        assert!((cluster_distance(&a, &b, HueMetric::Linear) - 0.1).abs() < 1e-12);
        assert_eq!(cluster_distance(&a, &a, HueMetric::Linear), 0.0);
    }

    #[test]
    fn dominant_matches_move_the_score_more() {
        let query = cluster(30.0, 100.0, 100.0, 80.0);
        let dominant = cluster(40.0, 100.0, 100.0, 80.0);
        let minor = cluster(40.0, 100.0, 100.0, 10.0);
        assert!(
            cluster_distance(&query, &dominant, HueMetric::Linear)
                < cluster_distance(&query, &minor, HueMetric::Linear)
        );
    }

    #[test]
    fn circular_metric_matches_wrapped_reds() {
        let a = cluster(1.0, 200.0, 200.0, 50.0);
        let b = cluster(179.0, 200.0, 200.0, 50.0);
        assert!((cluster_distance(&a, &b, HueMetric::Circular) - 2.0 / 50.0).abs() < 1e-12);
        assert!((cluster_distance(&a, &b, HueMetric::Linear) - 178.0 / 50.0).abs() < 1e-12);
    }

    #[test]
    fn score_sums_nearest_cluster_distances() {
        let query = vec![cluster(10.0, 0.0, 0.0, 50.0), cluster(100.0, 0.0, 0.0, 50.0)];
        let entry = vec![cluster(20.0, 0.0, 0.0, 50.0), cluster(100.0, 0.0, 0.0, 50.0)];
        // 10 / 50 for the first query cluster, 0 for the second
        assert!((entry_score(&query, &entry, HueMetric::Linear) - 0.2).abs() < 1e-12);
        assert_eq!(entry_score(&query, &[], HueMetric::Linear), f64::INFINITY);
    }

    #[test]
    fn returns_all_entries_when_fewer_than_top_k() {
        let query = set("query", vec![cluster(60.0, 100.0, 100.0, 100.0)]);
        let entries = vec![
            set("far", vec![cluster(150.0, 100.0, 100.0, 100.0)]),
            set("near", vec![cluster(62.0, 100.0, 100.0, 100.0)]),
            set("mid", vec![cluster(90.0, 100.0, 100.0, 100.0)]),
        ];
        let results = rank(&query, &entries, &RankParams::default());
        assert_eq!(results.len(), 3);
        let ids: Vec<&str> = results.iter().map(|r| r.entry_identifier.as_str()).collect();
        assert_eq!(ids, ["near", "mid", "far"]);
        let ranks: Vec<usize> = results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, [1, 2, 3]);
        assert!(results.windows(2).all(|w| w[0].score <= w[1].score));
    }

    #[test]
    fn truncates_to_top_k() {
        let query = set("query", vec![cluster(60.0, 100.0, 100.0, 100.0)]);
        let entries: Vec<ImageClusterSet> = (0..8)
            .map(|i| set(&format!("entry_{i}"), vec![cluster(60.0 + i as f64 * 10.0, 100.0, 100.0, 100.0)]))
            .collect();
        let params = RankParams {
            top_k: 2,
            ..Default::default()
        };
        let results = rank(&query, &entries, &params);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].entry_identifier, "entry_0");
        assert_eq!(results[1].entry_identifier, "entry_1");
    }

    #[test]
    fn ties_break_by_identifier_and_empty_entries_sort_last() {
        let query = set("query", vec![cluster(60.0, 100.0, 100.0, 100.0)]);
        let same = vec![cluster(70.0, 100.0, 100.0, 100.0)];
        let entries = vec![
            set("blank", vec![]),
            set("b", same.clone()),
            set("a", same),
        ];
        let results = rank(&query, &entries, &RankParams::default());
        let ids: Vec<&str> = results.iter().map(|r| r.entry_identifier.as_str()).collect();
        assert_eq!(ids, ["a", "b", "blank"]);
        assert_eq!(results[2].score, f64::INFINITY);
    }

    #[test]
    fn empty_query_returns_fallback() {
        let entries = vec![set("coat", vec![cluster(10.0, 10.0, 10.0, 100.0)])];
        let results = rank(&ImageClusterSet::empty("query"), &entries, &RankParams::default());
        assert_eq!(results, fallback(5));
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(MatchResult::is_placeholder));
        assert_eq!(results[4].rank, 5);
    }

    #[test]
    fn no_entries_returns_fallback() {
        let query = set("query", vec![cluster(10.0, 10.0, 10.0, 100.0)]);
        assert_eq!(rank(&query, &[], &RankParams::default()), fallback(5));
    }
}
