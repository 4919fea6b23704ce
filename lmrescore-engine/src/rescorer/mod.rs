//! Weighted multi-model rescoring

pub mod error;
mod scorer;

pub use error::RescoreError;
pub use scorer::{CacheDelegate, LogProb, Rescorer, StateCache};

/// Models enabled at construction, in order.
pub const DEFAULT_ENABLED_MODELS: [&str; 3] = ["secondpass", "bugfix", "newword"];

/// Cost substituted for a word or context token a model does not know.
pub const OOV_PENALTY: f32 = -1.5;

/// `-ln(10)`, turns a log10 probability into a natural-log cost.
pub const NEG_LN_10: f32 = -std::f32::consts::LN_10;

/// Upper bound on configured models, one rescorer key bit each.
pub const MAX_MODELS: usize = u32::BITS as usize;
