//! File-backed model store.
//!
//! Each model id maps to one bincode envelope holding the fitted model, the
//! feature schema it was trained under, and its training metadata. A model
//! saved and immediately loaded produces identical predictions.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use feature_engineering::FeatureSchema;
use market_core::{ModelFamily, PlatformError};

use crate::model::GateModel;

/// Provenance recorded with every saved model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub train_start: DateTime<Utc>,
    pub train_end: DateTime<Utc>,
    pub model_family: ModelFamily,
    /// The profit threshold that defined a positive label.
    pub profit_label_threshold: f64,
    pub hyperparameters: serde_json::Value,
    pub cv_metrics: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct ModelEnvelope {
    model: GateModel,
    schema: FeatureSchema,
    metadata: ModelMetadata,
}

pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.bin", id))
    }

    pub fn save(
        &self,
        id: &str,
        model: &GateModel,
        schema: &FeatureSchema,
        metadata: &ModelMetadata,
    ) -> Result<(), PlatformError> {
        fs::create_dir_all(&self.root)
            .map_err(|e| PlatformError::Storage(format!("create model dir: {}", e)))?;

        let envelope = ModelEnvelope {
            model: bincode_roundtrip(model)?,
            schema: schema.clone(),
            metadata: metadata.clone(),
        };
        let bytes = bincode::serialize(&envelope)
            .map_err(|e| PlatformError::Storage(format!("serialize model '{}': {}", id, e)))?;

        let path = self.path_for(id);
        fs::write(&path, bytes)
            .map_err(|e| PlatformError::Storage(format!("write {}: {}", path.display(), e)))?;
        info!(id, path = %path.display(), "model saved");
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<(GateModel, FeatureSchema, ModelMetadata), PlatformError> {
        let path = self.path_for(id);
        let bytes = fs::read(&path)
            .map_err(|e| PlatformError::Storage(format!("read {}: {}", path.display(), e)))?;
        let envelope: ModelEnvelope = bincode::deserialize(&bytes)
            .map_err(|e| PlatformError::Storage(format!("decode model '{}': {}", id, e)))?;
        Ok((envelope.model, envelope.schema, envelope.metadata))
    }
}

/// The caller keeps ownership of the model; clone it through its serialized
/// form since fitted smartcore models are not Clone.
fn bincode_roundtrip(model: &GateModel) -> Result<GateModel, PlatformError> {
    let bytes = bincode::serialize(model)
        .map_err(|e| PlatformError::Storage(format!("serialize model: {}", e)))?;
    bincode::deserialize(&bytes)
        .map_err(|e| PlatformError::Storage(format!("roundtrip model: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::TrainingMatrix;

    fn separable() -> TrainingMatrix {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..30 {
            let offset = (i % 5) as f64 * 0.05;
            rows.push(vec![0.0 + offset, 0.0]);
            labels.push(0);
            rows.push(vec![10.0 + offset, 10.0]);
            labels.push(1);
        }
        TrainingMatrix { rows, labels }
    }

    fn metadata() -> ModelMetadata {
        ModelMetadata {
            train_start: Utc::now() - chrono::Duration::days(540),
            train_end: Utc::now(),
            model_family: ModelFamily::TreeEnsemble,
            profit_label_threshold: 0.02,
            hyperparameters: serde_json::json!({"n_trees": 100, "max_depth": 12}),
            cv_metrics: serde_json::json!({}),
        }
    }

    #[test]
    fn test_save_then_load_reproduces_predictions() {
        let dir = std::env::temp_dir().join(format!("wave3-model-store-{}", std::process::id()));
        let store = ModelStore::new(&dir);

        let model = GateModel::train(ModelFamily::TreeEnsemble, &separable(), 7).unwrap();
        let schema = FeatureSchema::new(vec!["a".to_string(), "b".to_string()]);
        store.save("fold-001", &model, &schema, &metadata()).unwrap();

        let (loaded, loaded_schema, loaded_meta) = store.load("fold-001").unwrap();
        assert_eq!(loaded_schema, schema);
        assert_eq!(loaded_meta.profit_label_threshold, 0.02);

        for sample in [[0.5, 0.5], [9.5, 9.5], [5.0, 5.0]] {
            let before = model.confidence(&sample).unwrap();
            let after = loaded.confidence(&sample).unwrap();
            assert_eq!(before, after);
        }

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_missing_id_is_storage_error() {
        let store = ModelStore::new(std::env::temp_dir().join("wave3-model-store-missing"));
        let err = store.load("nope").unwrap_err();
        assert!(matches!(err, PlatformError::Storage(_)));
    }
}
