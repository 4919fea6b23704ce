//! Back-off n-gram language model backends
//!
//! Every backend implements [`LanguageModel`]: a model-private vocabulary,
//! begin-sentence / null-context start states and step-wise scoring that
//! returns a continuation state. The concrete storage is chosen once at load
//! time from [`ModelType`] and then used through a shared trait object.

mod arpa;
pub mod error;
mod ngram;
mod probing;
mod trie;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use arpa::{ArpaData, NgramWeights, parse_arpa};
pub use error::LmError;
pub use ngram::{NgramModel, NgramStore};
pub use probing::ProbingStore;
pub use trie::TrieStore;

type Result<T> = error::Result<T>;

/// Model-private word id. 0 is the unknown word.
pub type WordIndex = u32;

/// Id every backend assigns to `<unk>`.
pub const UNKNOWN_WORD: WordIndex = 0;

/// Highest n-gram order a backend accepts.
pub const MAX_ORDER: usize = 5;

pub const BEGIN_SENTENCE_TOKEN: &str = "<s>";
pub const END_SENTENCE_TOKEN: &str = "</s>";
pub const UNKNOWN_TOKEN: &str = "<unk>";

/// Continuation state after scoring a word.
///
/// Holds the matched context (most recent first) with the back-off weight of
/// each context length, enough to score the next word without replaying the
/// history.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LmState {
    pub words: [WordIndex; MAX_ORDER - 1],
    pub backoff: [f32; MAX_ORDER - 1],
    pub length: u8,
}

impl LmState {
    /// Context words, most recent first.
    pub fn context(&self) -> &[WordIndex] {
        &self.words[..self.length as usize]
    }
}

/// Storage layout of a loaded model.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    /// Hash table keyed by n-gram
    #[default]
    Probing,
    /// Double-array trie keyed by encoded n-gram
    Trie,
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelType::Probing => f.write_str("probing"),
            ModelType::Trie => f.write_str("trie"),
        }
    }
}

impl FromStr for ModelType {
    type Err = LmError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "probing" => Ok(ModelType::Probing),
            "trie" => Ok(ModelType::Trie),
            other => Err(LmError::UnknownModelType(other.to_string())),
        }
    }
}

/// Scoring capability shared by all backends.
pub trait LanguageModel: Send + Sync + fmt::Debug {
    /// Highest n-gram order in the model.
    fn order(&self) -> usize;

    /// Model-private id of `token`, [`UNKNOWN_WORD`] if absent.
    fn index(&self, token: &str) -> WordIndex;

    /// Id of `</s>`.
    fn end_sentence(&self) -> WordIndex;

    /// State whose context is `<s>`.
    fn begin_sentence_state(&self) -> LmState;

    /// State with no context at all.
    fn null_context_state(&self) -> LmState;

    /// Score `word` after `state`: returns log10 probability and the state
    /// to continue from.
    fn full_score(&self, state: &LmState, word: WordIndex) -> (f32, LmState);

    /// Number of words in the model vocabulary, `<unk>` included.
    fn vocab_size(&self) -> usize;
}

/// Load an ARPA file into the storage selected by `model_type`.
pub fn load_model(path: impl AsRef<Path>, model_type: ModelType) -> Result<Arc<dyn LanguageModel>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)?;
    let data = parse_arpa(std::io::BufReader::new(file))?;
    debug!(
        "Parsed {}: order {}, {} words",
        path.display(),
        data.order,
        data.vocab.len()
    );
    let model: Arc<dyn LanguageModel> = match model_type {
        ModelType::Probing => Arc::new(NgramModel::<ProbingStore>::build(data)?),
        ModelType::Trie => Arc::new(NgramModel::<TrieStore>::build(data)?),
    };
    Ok(model)
}
