pub mod automata;
pub mod cache;
pub mod config;
pub mod history;
pub mod lm;
pub mod manager;
pub mod rescorer;
pub mod symbols;
pub mod wrapper;

#[cfg(test)]
mod testutil;

/// Word identifier in the decoder's shared vocabulary.
pub type Label = u32;

/// Sentence boundary. Empty history slots read as this label.
pub const SENTENCE_BOUNDARY: Label = 0;
/// End of sentence, scored as the model's `</s>`.
pub const END_OF_SENTENCE: Label = u32::MAX - 2;
/// Marks an open composite token (class tag) in history slot 0.
pub const CLASS_TAG: Label = u32::MAX - 1;
/// Relabel result for tokens a model does not know.
pub const OOV_LABEL: Label = u32::MAX;

/// Cost returned for a history that ends in an open class tag.
pub const MAX_COST: f32 = 1e10;

pub use automata::{AhoCorasickTree, AutomatonState, LevenState, LevenshteinAutomata};
pub use cache::MruCache;
pub use config::{ContextScoringConfig, ModelConfig, RescorerConfig};
pub use history::{History, LongRescoringHistory, RescoringHistory};
pub use lm::{LanguageModel, LmState, ModelType, load_model};
pub use manager::{ModelItem, ModelManager, UpdateRequest};
pub use rescorer::{CacheDelegate, LogProb, RescoreError, Rescorer, StateCache};
pub use symbols::SymbolTable;
pub use wrapper::CachingWrapper;
