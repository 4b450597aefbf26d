//! Frame-sequence comparators.

use serde::{Deserialize, Serialize};

use crate::features::FeatureFrame;

/// Result of comparing two frame sequences.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    /// Aggregate cost; 0 means identical.
    pub cost: f64,
    /// Local cost of each aligned step, in path order.
    pub frame_costs: Vec<f64>,
}

impl Alignment {
    /// Similarity in `(0, 1]` derived from the cost.
    #[inline]
    pub fn similarity(&self) -> f64 {
        similarity_from_cost(self.cost)
    }
}

/// Maps a non-negative cost to a similarity in `(0, 1]`.
#[inline]
pub fn similarity_from_cost(cost: f64) -> f64 {
    1.0 / (1.0 + cost.max(0.0))
}

/// Compares two sequences of feature frames.
pub trait SequenceComparator {
    fn compare(&self, a: &[FeatureFrame], b: &[FeatureFrame]) -> Alignment;
}

/// Built-in comparators, selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Mean per-frame Euclidean distance over equal positions.
    Euclidean,
    /// Mean per-frame cosine distance (`1 - cos`).
    Cosine,
    /// Dynamic time warping with Euclidean local cost.
    Dtw,
}

impl SequenceComparator for DistanceMetric {
    fn compare(&self, a: &[FeatureFrame], b: &[FeatureFrame]) -> Alignment {
        match self {
            DistanceMetric::Euclidean => lockstep(a, b, euclidean),
            DistanceMetric::Cosine => lockstep(a, b, cosine_distance),
            DistanceMetric::Dtw => dtw(a, b),
        }
    }
}

pub fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// `1 - cos(a, b)`. Two zero vectors are identical; one zero vector is orthogonal.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    match (na > 0.0, nb > 0.0) {
        (false, false) => 0.0,
        (true, true) => (1.0 - dot / (na.sqrt() * nb.sqrt())).clamp(0.0, 2.0),
        _ => 1.0,
    }
}

/// Compares frames position by position over the shorter length.
fn lockstep(a: &[FeatureFrame], b: &[FeatureFrame], local: fn(&[f32], &[f32]) -> f64) -> Alignment {
    let frame_costs: Vec<f64> = a
        .iter()
        .zip(b)
        .map(|(fa, fb)| local(&fa.values, &fb.values))
        .collect();
    let cost = if frame_costs.is_empty() {
        f64::INFINITY
    } else {
        frame_costs.iter().sum::<f64>() / frame_costs.len() as f64
    };
    Alignment { cost, frame_costs }
}

/// Monotonic alignment with steps (1,0), (0,1), (1,1).
///
/// The accumulated path cost is normalised by `n + m`; `frame_costs` holds
/// the local cost of every step on the backtracked path.
fn dtw(a: &[FeatureFrame], b: &[FeatureFrame]) -> Alignment {
    let (n, m) = (a.len(), b.len());
    if n == 0 || m == 0 {
        return Alignment {
            cost: f64::INFINITY,
            frame_costs: Vec::new(),
        };
    }

    let local: Vec<f64> = (0..n * m)
        .map(|idx| euclidean(&a[idx / m].values, &b[idx % m].values))
        .collect();

    // acc[i][j] is the best cost of aligning a[..=i] with b[..=j]
    let mut acc = vec![f64::INFINITY; n * m];
    for i in 0..n {
        for j in 0..m {
            let c = local[i * m + j];
            let best_prev = if i == 0 && j == 0 {
                0.0
            } else {
                let up = if i > 0 { acc[(i - 1) * m + j] } else { f64::INFINITY };
                let left = if j > 0 { acc[i * m + j - 1] } else { f64::INFINITY };
                let diag = if i > 0 && j > 0 {
                    acc[(i - 1) * m + j - 1]
                } else {
                    f64::INFINITY
                };
                diag.min(up).min(left)
            };
            acc[i * m + j] = c + best_prev;
        }
    }

    let mut path = vec![local[(n - 1) * m + (m - 1)]];
    let (mut i, mut j) = (n - 1, m - 1);
    while i > 0 || j > 0 {
        (i, j) = if i == 0 {
            (0, j - 1)
        } else if j == 0 {
            (i - 1, 0)
        } else {
            let diag = acc[(i - 1) * m + j - 1];
            let up = acc[(i - 1) * m + j];
            let left = acc[i * m + j - 1];
            if diag <= up && diag <= left {
                (i - 1, j - 1)
            } else if up <= left {
                (i - 1, j)
            } else {
                (i, j - 1)
            }
        };
        path.push(local[i * m + j]);
    }
    path.reverse();

    Alignment {
        cost: acc[n * m - 1] / (n + m) as f64,
        frame_costs: path,
    }
}
