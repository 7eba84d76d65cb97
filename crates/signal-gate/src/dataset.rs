use serde::{Deserialize, Serialize};

use feature_engineering::FeatureVector;

/// One training example: the features at a historical signal's trigger bar
/// plus the realized outcome. Label 1 when the simulated trade's net return
/// reached the configured profit threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledSignal {
    pub features: FeatureVector,
    pub label: bool,
}

impl LabeledSignal {
    pub fn from_return(features: FeatureVector, return_pct: f64, profit_threshold: f64) -> Self {
        Self {
            features,
            label: return_pct >= profit_threshold,
        }
    }
}

/// Dense row-major training data for the tree learners.
#[derive(Debug, Clone)]
pub struct TrainingMatrix {
    pub rows: Vec<Vec<f64>>,
    pub labels: Vec<u32>,
}

impl TrainingMatrix {
    pub fn from_labeled(examples: &[LabeledSignal]) -> Self {
        let rows = examples
            .iter()
            .map(|e| e.features.values().to_vec())
            .collect();
        let labels = examples.iter().map(|e| u32::from(e.label)).collect();
        Self { rows, labels }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn positive_count(&self) -> usize {
        self.labels.iter().filter(|l| **l == 1).count()
    }

    pub fn negative_count(&self) -> usize {
        self.labels.iter().filter(|l| **l == 0).count()
    }

    /// True when both classes are present, the precondition for fitting.
    pub fn has_both_classes(&self) -> bool {
        self.positive_count() > 0 && self.negative_count() > 0
    }
}
