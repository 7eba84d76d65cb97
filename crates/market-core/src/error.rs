use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("Insufficient history: need {required} bars, have {available}")]
    InsufficientHistory { required: usize, available: usize },

    #[error("Feature schema mismatch: {0}")]
    FeatureSchemaMismatch(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Model fit failed: {0}")]
    ModelFit(String),

    #[error("Storage error: {0}")]
    Storage(String),
}
