use serde::{Deserialize, Serialize};

use market_core::PlatformError;

pub use market_core::FeatureVector;

/// The fixed, ordered list of feature names a model was trained with.
///
/// A schema is serialized alongside every trained model; inference against
/// a vector built under a different schema is a structural error, never
/// silently reordered or coerced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    names: Vec<String>,
}

impl FeatureSchema {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Fail loudly when `other` differs in names, order, or width.
    pub fn validate_against(&self, other: &FeatureSchema) -> Result<(), PlatformError> {
        if self == other {
            return Ok(());
        }
        if self.len() != other.len() {
            return Err(PlatformError::FeatureSchemaMismatch(format!(
                "expected {} features, got {}",
                self.len(),
                other.len()
            )));
        }
        for (expected, got) in self.names.iter().zip(&other.names) {
            if expected != got {
                return Err(PlatformError::FeatureSchemaMismatch(format!(
                    "expected feature '{}', got '{}'",
                    expected, got
                )));
            }
        }
        Err(PlatformError::FeatureSchemaMismatch(
            "feature schemas differ".to_string(),
        ))
    }
}
