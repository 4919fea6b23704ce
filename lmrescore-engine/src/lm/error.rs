//! Error types for language model loading

/// Errors that can occur while loading a language model.
#[derive(Debug, thiserror::Error)]
pub enum LmError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("ARPA line {line}: {message}")]
    Format { line: usize, message: String },

    #[error("model order {0} exceeds the supported maximum of {max}", max = super::MAX_ORDER)]
    OrderTooHigh(usize),

    #[error("model vocabulary lacks required token '{0}'")]
    MissingToken(&'static str),

    #[error("failed to build double-array n-gram index")]
    TrieBuild,

    #[error("unknown model type: '{0}'")]
    UnknownModelType(String),
}

pub type Result<T> = std::result::Result<T, LmError>;
