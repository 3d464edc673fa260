//! Collapse near-duplicate line candidates into canonical grid lines.
//!
//! The segment sweep reports the same printed line many times: once per
//! configuration, and again for each stroke edge of a thick line. A single
//! left-to-right pass over the sorted candidates chains each one onto the
//! open cluster while it lies within `tolerance` of the cluster's most
//! recent member; otherwise the cluster closes at its (rounded) mean.

use serde::{Deserialize, Serialize};

/// Ascending, duplicate-free pixel positions of grid lines along one axis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineSet(Vec<u32>);

impl LineSet {
    /// Build a line set from arbitrary positions: sorts and removes
    /// exact duplicates.
    #[must_use]
    pub fn new(mut positions: Vec<u32>) -> Self {
        positions.sort_unstable();
        positions.dedup();
        Self(positions)
    }

    /// Positions in ascending order.
    #[must_use]
    pub fn positions(&self) -> &[u32] {
        &self.0
    }

    /// Number of lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Distances between consecutive lines.
    #[must_use]
    pub fn gaps(&self) -> Vec<f64> {
        self.0
            .windows(2)
            .map(|w| f64::from(w[1] - w[0]))
            .collect()
    }

    /// Positions as floating-point candidates, e.g. to re-cluster.
    #[must_use]
    pub fn to_candidates(&self) -> Vec<f64> {
        self.0.iter().map(|&p| f64::from(p)).collect()
    }
}

impl From<LineSet> for Vec<u32> {
    fn from(set: LineSet) -> Self {
        set.0
    }
}

/// Cluster line-position candidates.
///
/// Candidates are sorted; each is added to the open cluster when its
/// distance to the cluster's last member is at most `tolerance`.
/// Clusters close at the mean of their members, rounded half away from
/// zero and clamped to the `u32` range. Non-finite candidates are
/// ignored.
///
/// An empty input returns an empty set and, when `context` names a
/// sample, logs a warning.
///
/// For integer candidates, re-clustering the result with the same
/// tolerance returns it unchanged: each rounded mean stays within its
/// cluster's range, so consecutive centres remain more than `tolerance`
/// apart.
#[must_use]
pub fn cluster_lines(candidates: &[f64], tolerance: f64, context: Option<&str>) -> LineSet {
    let mut sorted: Vec<f64> = candidates.iter().copied().filter(|c| c.is_finite()).collect();
    if sorted.is_empty() {
        if let Some(name) = context {
            log::warn!("no lines to cluster in {name}");
        }
        return LineSet::default();
    }
    sorted.sort_by(f64::total_cmp);

    let mut centers = Vec::new();
    let mut start = 0;
    for i in 1..sorted.len() {
        if sorted[i] - sorted[i - 1] > tolerance {
            centers.push(cluster_center(&sorted[start..i]));
            start = i;
        }
    }
    centers.push(cluster_center(&sorted[start..]));

    LineSet::new(centers)
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn cluster_center(members: &[f64]) -> u32 {
    let mean = members.iter().sum::<f64>() / members.len() as f64;
    mean.round().clamp(0.0, f64::from(u32::MAX)) as u32
}
