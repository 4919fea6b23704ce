//! Error types for rescoring

/// Caller contract violations. Per-model problems (missing files, OOV
/// tokens, rejected enable requests) are logged and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum RescoreError {
    #[error("automaton not built: set the application context first")]
    AutomatonNotBuilt,

    #[error("history width {0} is not supported by the model backend")]
    UnsupportedHistoryWidth(usize),

    #[error("base model group '{0}' is not enabled")]
    MissingBaseModel(&'static str),

    #[error("base model weight must be 1.0, got {0}")]
    InvalidBaseWeight(f32),

    #[error("{0} models configured, the rescorer key holds at most 32")]
    TooManyModels(usize),
}

pub type Result<T> = std::result::Result<T, RescoreError>;
