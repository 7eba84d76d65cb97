//! Minority-class rebalancing by k-nearest-neighbor interpolation.
//!
//! Synthetic minority examples are interpolated between a real minority row
//! and one of its nearest minority neighbors. Applied to the TRAINING fold
//! only; the evaluation fold never sees synthetic rows.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::dataset::LabeledSignal;
use feature_engineering::FeatureVector;

const NEIGHBORS: usize = 5;

/// Oversample the minority class until the classes are balanced.
/// Deterministic for a given seed. A set with fewer than two minority
/// examples (nothing to interpolate between) is returned unchanged.
pub fn rebalance_minority(examples: &[LabeledSignal], seed: u64) -> Vec<LabeledSignal> {
    let positives = examples.iter().filter(|e| e.label).count();
    let negatives = examples.len() - positives;
    if positives == 0 || negatives == 0 || positives == negatives {
        return examples.to_vec();
    }

    let minority_label = positives < negatives;
    let minority: Vec<&LabeledSignal> = examples
        .iter()
        .filter(|e| e.label == minority_label)
        .collect();
    if minority.len() < 2 {
        return examples.to_vec();
    }

    let deficit = positives.abs_diff(negatives);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut result = examples.to_vec();

    for _ in 0..deficit {
        let anchor_idx = rng.gen_range(0..minority.len());
        let anchor = minority[anchor_idx].features.values();

        let neighbor_idx = nearest_neighbors(&minority, anchor_idx)
            [rng.gen_range(0..NEIGHBORS.min(minority.len() - 1))];
        let neighbor = minority[neighbor_idx].features.values();

        let t: f64 = rng.gen_range(0.0..1.0);
        let synthetic: Vec<f64> = anchor
            .iter()
            .zip(neighbor)
            .map(|(a, b)| a + t * (b - a))
            .collect();

        result.push(LabeledSignal {
            features: FeatureVector::new(synthetic),
            label: minority_label,
        });
    }

    debug!(
        original = examples.len(),
        synthetic = deficit,
        "minority class rebalanced"
    );
    result
}

/// Indices of the minority rows closest to `anchor_idx`, nearest first.
fn nearest_neighbors(minority: &[&LabeledSignal], anchor_idx: usize) -> Vec<usize> {
    let anchor = minority[anchor_idx].features.values();
    let mut distances: Vec<(usize, f64)> = minority
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != anchor_idx)
        .map(|(i, e)| (i, squared_distance(anchor, e.features.values())))
        .collect();
    distances.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    distances.into_iter().map(|(i, _)| i).collect()
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}
