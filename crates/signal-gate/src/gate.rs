use serde::{Deserialize, Serialize};
use tracing::debug;

use feature_engineering::{FeatureSchema, FeatureVector};
use market_core::PlatformError;

use crate::model::GateModel;

/// The gate's verdict on one candidate. The signal itself is never mutated;
/// this annotation rides alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub accepted: bool,
    pub confidence: f64,
}

/// The ML gate. When disabled every candidate passes with full confidence.
pub enum SignalGate {
    Disabled,
    Model {
        model: GateModel,
        schema: FeatureSchema,
        threshold: f64,
    },
}

impl SignalGate {
    pub fn disabled() -> Self {
        SignalGate::Disabled
    }

    pub fn with_model(model: GateModel, schema: FeatureSchema, threshold: f64) -> Self {
        SignalGate::Model {
            model,
            schema,
            threshold,
        }
    }

    /// Classify a candidate's feature vector.
    ///
    /// `live_schema` is the schema of the builder that produced `features`;
    /// any mismatch against the trained schema is a structural error, not a
    /// rejection.
    pub fn evaluate(
        &self,
        live_schema: &FeatureSchema,
        features: &FeatureVector,
    ) -> Result<GateDecision, PlatformError> {
        match self {
            SignalGate::Disabled => Ok(GateDecision {
                accepted: true,
                confidence: 1.0,
            }),
            SignalGate::Model {
                model,
                schema,
                threshold,
            } => {
                schema.validate_against(live_schema)?;
                if features.len() != schema.len() {
                    return Err(PlatformError::FeatureSchemaMismatch(format!(
                        "vector width {} does not match schema width {}",
                        features.len(),
                        schema.len()
                    )));
                }
                let confidence = model.confidence(features.values())?;
                let accepted = confidence >= *threshold;
                debug!(confidence, accepted, "gate decision");
                Ok(GateDecision {
                    accepted,
                    confidence,
                })
            }
        }
    }
}
