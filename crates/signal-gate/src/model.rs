//! Gate model families: a random-forest classifier and a gradient-boosted
//! ensemble of regression trees with a logistic link.

use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_classifier::{
    RandomForestClassifier, RandomForestClassifierParameters,
};
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_regressor::{
    DecisionTreeRegressor, DecisionTreeRegressorParameters,
};

use market_core::{ModelFamily, PlatformError};

use crate::dataset::TrainingMatrix;

fn dense_matrix(rows: &[Vec<f64>]) -> Result<DenseMatrix<f64>, PlatformError> {
    DenseMatrix::from_2d_vec(&rows.to_vec())
        .map_err(|e| PlatformError::ModelFit(format!("matrix construction failed: {}", e)))
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Gradient boosting over shallow regression trees, log-loss objective.
///
/// Each round fits a tree to the residual `y - sigmoid(score)` and adds its
/// shrunk prediction to the running score.
#[derive(Serialize, Deserialize)]
pub struct BoostedTrees {
    base_score: f64,
    learning_rate: f64,
    trees: Vec<DecisionTreeRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>>,
}

#[derive(Debug, Clone)]
pub struct BoostedTreesParameters {
    pub rounds: usize,
    pub learning_rate: f64,
    pub max_depth: u16,
}

impl Default for BoostedTreesParameters {
    fn default() -> Self {
        Self {
            rounds: 100,
            learning_rate: 0.1,
            max_depth: 3,
        }
    }
}

impl BoostedTrees {
    pub fn fit(
        rows: &[Vec<f64>],
        labels: &[u32],
        params: &BoostedTreesParameters,
    ) -> Result<Self, PlatformError> {
        let n = rows.len();
        let x = dense_matrix(rows)?;
        let y: Vec<f64> = labels.iter().map(|l| *l as f64).collect();

        let positive_rate = (y.iter().sum::<f64>() / n as f64).clamp(1e-6, 1.0 - 1e-6);
        let base_score = (positive_rate / (1.0 - positive_rate)).ln();

        let mut scores = vec![base_score; n];
        let mut trees = Vec::with_capacity(params.rounds);

        for _ in 0..params.rounds {
            let residuals: Vec<f64> = y
                .iter()
                .zip(&scores)
                .map(|(yi, s)| yi - sigmoid(*s))
                .collect();

            let tree = DecisionTreeRegressor::fit(
                &x,
                &residuals,
                DecisionTreeRegressorParameters::default().with_max_depth(params.max_depth),
            )
            .map_err(|e| PlatformError::ModelFit(format!("boosting round failed: {}", e)))?;

            let predictions = tree
                .predict(&x)
                .map_err(|e| PlatformError::ModelFit(format!("boosting predict failed: {}", e)))?;
            for (score, p) in scores.iter_mut().zip(&predictions) {
                *score += params.learning_rate * p;
            }
            trees.push(tree);
        }

        Ok(Self {
            base_score,
            learning_rate: params.learning_rate,
            trees,
        })
    }

    pub fn predict_proba(&self, features: &[f64]) -> Result<f64, PlatformError> {
        let x = dense_matrix(&[features.to_vec()])?;
        let mut score = self.base_score;
        for tree in &self.trees {
            let prediction = tree
                .predict(&x)
                .map_err(|e| PlatformError::ModelFit(format!("predict failed: {}", e)))?;
            score += self.learning_rate * prediction[0];
        }
        Ok(sigmoid(score))
    }
}

/// A fitted gate model of either family.
#[derive(Serialize, Deserialize)]
pub enum GateModel {
    Forest(RandomForestClassifier<f64, u32, DenseMatrix<f64>, Vec<u32>>),
    Boosted(BoostedTrees),
}

impl GateModel {
    /// Train a model of the configured family.
    ///
    /// Fails with `ModelFit` when the training set is empty or single-class;
    /// the walk-forward layer decides whether such a fold runs ungated or is
    /// skipped.
    pub fn train(
        family: ModelFamily,
        matrix: &TrainingMatrix,
        seed: u64,
    ) -> Result<Self, PlatformError> {
        if matrix.is_empty() {
            return Err(PlatformError::ModelFit("empty training set".to_string()));
        }
        if !matrix.has_both_classes() {
            return Err(PlatformError::ModelFit(
                "training labels are single-class".to_string(),
            ));
        }

        match family {
            ModelFamily::TreeEnsemble => {
                let x = dense_matrix(&matrix.rows)?;
                let params = RandomForestClassifierParameters::default()
                    .with_n_trees(100)
                    .with_max_depth(12)
                    .with_min_samples_split(3)
                    .with_seed(seed);
                let forest = RandomForestClassifier::fit(&x, &matrix.labels, params)
                    .map_err(|e| PlatformError::ModelFit(format!("forest fit failed: {}", e)))?;
                Ok(GateModel::Forest(forest))
            }
            ModelFamily::GradientBoosted => {
                let boosted = BoostedTrees::fit(
                    &matrix.rows,
                    &matrix.labels,
                    &BoostedTreesParameters::default(),
                )?;
                Ok(GateModel::Boosted(boosted))
            }
        }
    }

    /// Probability that the signal is profitable, in [0, 1]. Pure: the same
    /// input always yields the same output.
    pub fn confidence(&self, features: &[f64]) -> Result<f64, PlatformError> {
        match self {
            GateModel::Forest(forest) => {
                let x = dense_matrix(&[features.to_vec()])?;
                let proba = forest
                    .predict_proba(&x)
                    .map_err(|e| PlatformError::ModelFit(format!("predict failed: {}", e)))?;
                // Column 1 is P(label = 1); classes are sorted ascending.
                Ok(*proba.get((0, 1)))
            }
            GateModel::Boosted(boosted) => boosted.predict_proba(features),
        }
    }
}
