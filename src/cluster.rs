//! Dominant color clustering.
//!
//! Samples are grouped by hue alone with k-means (k-means++ seeding, Lloyd
//! iterations). Saturation and value do not take part in the assignment; they
//! are averaged over each cluster's members afterwards.
//!
//! Hues are 8-bit, so the clusterer works on a 180-bin histogram instead of the
//! raw samples. Assigning a bin is the same as assigning every sample in it,
//! and the weighted means are the sample means, so the result is identical to
//! running k-means on the samples themselves.
//!
//! With [`HueMetric::Linear`] hue is treated as a line, which splits reds that
//! straddle 0/179 into two clusters. [`HueMetric::Circular`] measures the
//! shortest arc and averages hues on the circle instead.

use std::f64::consts::TAU;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::color_ops::{HUE_RANGE, HueMetric};
use crate::sampler::PixelSample;

/// Default number of clusters per image
pub const DEFAULT_K: usize = 5;

/// Default minimum share (in percent) a cluster needs to survive
pub const DEFAULT_MIN_SHARE_PERCENT: f64 = 5.0;

const HUE_BINS: usize = HUE_RANGE as usize;

/// One dominant color group of an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorCluster {
    pub label: String,
    /// Mean hue of the members (0..180)
    pub h: f64,
    /// Mean saturation of the members (0..=255)
    pub s: f64,
    /// Mean value of the members (0..=255)
    pub v: f64,
    /// Share of the image's samples in this cluster, 0..=100
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    /// Target number of clusters
    pub k: usize,
    /// Clusters with a smaller share are dropped
    pub min_share_percent: f64,
    /// Seed for centroid initialization
    pub seed: u64,
    /// Upper bound on Lloyd iterations
    pub max_iterations: usize,
    pub hue_metric: HueMetric,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            min_share_percent: DEFAULT_MIN_SHARE_PERCENT,
            seed: 42,
            max_iterations: 100,
            hue_metric: HueMetric::default(),
        }
    }
}

/// Per-hue sample statistics
#[derive(Debug, Clone, Copy, Default)]
struct HueBin {
    count: usize,
    sum_s: f64,
    sum_v: f64,
}

/// Group samples into dominant hue clusters
///
/// Returns at most `k` clusters ordered by hue, labelled `cluster_0`,
/// `cluster_1`, ... before clusters under `min_share_percent` are removed.
/// Percentages are not renormalized after removal. Fewer distinct hues than
/// `k` reduce the number of clusters; empty input gives no clusters.
pub fn cluster(samples: &[PixelSample], params: &ClusterParams) -> Vec<ColorCluster> {
    if samples.is_empty() || params.k == 0 {
        return Vec::new();
    }
    let mut bins = [HueBin::default(); HUE_BINS];
    for sample in samples {
        let bin = &mut bins[sample.h() as usize];
        bin.count += 1;
        bin.sum_s += sample.s() as f64;
        bin.sum_v += sample.v() as f64;
    }
    let occupied: Vec<(f64, HueBin)> = bins
        .iter()
        .enumerate()
        .filter(|(_, bin)| bin.count > 0)
        .map(|(hue, bin)| (hue as f64, *bin))
        .collect();

    let k = params.k.min(occupied.len());
    let kmeans = HueKmeans {
        k,
        metric: params.hue_metric,
        max_iterations: params.max_iterations,
    };
    let mut rng = StdRng::seed_from_u64(params.seed);
    let fit = kmeans.fit(&occupied, &mut rng);
    trace!(k, iterations = fit.iterations, "hue k-means converged");

    summarize(&occupied, &fit, samples.len(), params)
}

/// Turn bin assignments into labelled, filtered clusters
fn summarize(
    occupied: &[(f64, HueBin)],
    fit: &HueFit,
    total: usize,
    params: &ClusterParams,
) -> Vec<ColorCluster> {
    let mut order: Vec<usize> = (0..fit.centroids.len()).collect();
    order.sort_by(|&a, &b| fit.centroids[a].total_cmp(&fit.centroids[b]));

    let mut clusters = Vec::new();
    for index in order {
        let members: Vec<&(f64, HueBin)> = occupied
            .iter()
            .zip(&fit.assignments)
            .filter(|(_, assigned)| **assigned == index)
            .map(|(bin, _)| bin)
            .collect();
        let count: usize = members.iter().map(|(_, bin)| bin.count).sum();
        if count == 0 {
            continue;
        }
        let h = mean_hue(
            members.iter().map(|(hue, bin)| (*hue, bin.count as f64)),
            params.hue_metric,
        )
        .unwrap_or(fit.centroids[index]);
        let s = members.iter().map(|(_, bin)| bin.sum_s).sum::<f64>() / count as f64;
        let v = members.iter().map(|(_, bin)| bin.sum_v).sum::<f64>() / count as f64;
        clusters.push(ColorCluster {
            label: format!("cluster_{}", clusters.len()),
            h,
            s,
            v,
            percent: 100.0 * count as f64 / total as f64,
        });
    }
    clusters.retain(|cluster| cluster.percent >= params.min_share_percent);
    clusters
}

/// Weighted mean of hues; `None` when there is no weight or the hues cancel out
fn mean_hue(hues: impl Iterator<Item = (f64, f64)>, metric: HueMetric) -> Option<f64> {
    match metric {
        HueMetric::Linear => {
            let (sum, weight) = hues.fold((0.0, 0.0), |(sum, weight), (hue, w)| {
                (sum + hue * w, weight + w)
            });
            (weight > 0.0).then(|| sum / weight)
        }
        HueMetric::Circular => {
            let (sin, cos) = hues.fold((0.0, 0.0), |(sin, cos), (hue, w)| {
                let angle = hue * TAU / HUE_RANGE;
                (sin + angle.sin() * w, cos + angle.cos() * w)
            });
            if sin.hypot(cos) < 1e-9 {
                return None;
            }
            Some((sin.atan2(cos) * HUE_RANGE / TAU).rem_euclid(HUE_RANGE))
        }
    }
}

/// K-means over weighted one-dimensional hue points
#[derive(Debug, Clone)]
struct HueKmeans {
    k: usize,
    metric: HueMetric,
    max_iterations: usize,
}

#[derive(Debug, Clone)]
struct HueFit {
    centroids: Vec<f64>,
    /// Centroid index for every occupied bin
    assignments: Vec<usize>,
    iterations: usize,
}

impl HueKmeans {
    fn fit(&self, points: &[(f64, HueBin)], rng: &mut StdRng) -> HueFit {
        let mut centroids = self.seed_centroids(points, rng);
        let mut assignments = self.assign(points, &centroids);
        let mut iterations = 0;
        while iterations < self.max_iterations {
            iterations += 1;
            for (index, centroid) in centroids.iter_mut().enumerate() {
                let members = points
                    .iter()
                    .zip(&assignments)
                    .filter(|(_, assigned)| **assigned == index)
                    .map(|((hue, bin), _)| (*hue, bin.count as f64));
                // Centroids that lost every member stay where they are
                if let Some(mean) = mean_hue(members, self.metric) {
                    *centroid = mean;
                }
            }
            let next = self.assign(points, &centroids);
            if next == assignments {
                break;
            }
            assignments = next;
        }
        HueFit {
            centroids,
            assignments,
            iterations,
        }
    }

    /// k-means++: the first centroid is drawn by sample count, the rest by
    /// sample count times squared distance to the nearest chosen centroid
    fn seed_centroids(&self, points: &[(f64, HueBin)], rng: &mut StdRng) -> Vec<f64> {
        let mut centroids: Vec<f64> = Vec::with_capacity(self.k);
        if points.is_empty() {
            return centroids;
        }
        let mut weights: Vec<f64> = points.iter().map(|(_, bin)| bin.count as f64).collect();
        while centroids.len() < self.k {
            let index = pick_weighted(&weights, rng);
            centroids.push(points[index].0);
            for (weight, (hue, bin)) in weights.iter_mut().zip(points) {
                let distance = centroids
                    .iter()
                    .map(|centroid| self.metric.distance(*hue, *centroid))
                    .fold(f64::INFINITY, f64::min);
                *weight = bin.count as f64 * distance * distance;
            }
        }
        centroids
    }

    fn assign(&self, points: &[(f64, HueBin)], centroids: &[f64]) -> Vec<usize> {
        points
            .iter()
            .map(|(hue, _)| {
                let mut best = 0;
                let mut best_distance = f64::INFINITY;
                for (index, centroid) in centroids.iter().enumerate() {
                    let distance = self.metric.distance(*hue, *centroid);
                    if distance < best_distance {
                        best = index;
                        best_distance = distance;
                    }
                }
                best
            })
            .collect()
    }
}

/// Draw an index with probability proportional to its weight
fn pick_weighted(weights: &[f64], rng: &mut StdRng) -> usize {
    let total: f64 = weights.iter().sum();
    let last_positive = weights.iter().rposition(|w| *w > 0.0).unwrap_or(0);
    if total <= 0.0 {
        return last_positive;
    }
    let mut target = rng.random::<f64>() * total;
    for (index, weight) in weights.iter().enumerate() {
        if *weight <= 0.0 {
            continue;
        }
        if target < *weight {
            return index;
        }
        target -= weight;
    }
    last_positive
}
