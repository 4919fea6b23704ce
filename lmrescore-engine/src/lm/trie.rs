//! Double-array trie n-gram storage.
//!
//! Each n-gram is encoded as a byte string, four bytes per word, and stored
//! in a `yada` double array whose value indexes the weight table. Uses less
//! memory than [`super::ProbingStore`] on large models at the cost of a
//! slower lookup.

use std::fmt;

use yada::DoubleArray;
use yada::builder::DoubleArrayBuilder;

use super::arpa::NgramWeights;
use super::error::LmError;
use super::ngram::NgramStore;
use super::{MAX_ORDER, WordIndex};

type Result<T> = super::error::Result<T>;

const BYTES_PER_WORD: usize = 4;

/// Append `word` as four base-255 digits offset by one, so no byte is zero.
///
/// Ids up to 255^4 - 1 are representable.
fn encode_word(word: WordIndex, out: &mut [u8]) {
    let mut rest = word;
    for byte in out[..BYTES_PER_WORD].iter_mut().rev() {
        *byte = (rest % 255) as u8 + 1;
        rest /= 255;
    }
}

fn encode(ngram: &[WordIndex], out: &mut [u8]) -> usize {
    for (i, &word) in ngram.iter().enumerate() {
        encode_word(word, &mut out[i * BYTES_PER_WORD..]);
    }
    ngram.len() * BYTES_PER_WORD
}

/// N-grams in a double-array trie.
pub struct TrieStore {
    trie: DoubleArray<Vec<u8>>,
    weights: Vec<NgramWeights>,
}

impl fmt::Debug for TrieStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrieStore")
            .field("ngrams", &self.weights.len())
            .finish_non_exhaustive()
    }
}

impl NgramStore for TrieStore {
    fn build(ngrams: Vec<Vec<(Vec<WordIndex>, NgramWeights)>>) -> Result<Self> {
        let mut keyed: Vec<(Vec<u8>, NgramWeights)> = ngrams
            .into_iter()
            .flatten()
            .map(|(words, weights)| {
                let mut key = vec![0u8; words.len() * BYTES_PER_WORD];
                encode(&words, &mut key);
                (key, weights)
            })
            .collect();

        // The builder needs sorted, unique keys
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed.dedup_by(|b, a| a.0 == b.0);

        let weights: Vec<NgramWeights> = keyed.iter().map(|(_, w)| *w).collect();
        let keyset: Vec<(&[u8], u32)> = keyed
            .iter()
            .enumerate()
            .map(|(i, (key, _))| (key.as_slice(), i as u32))
            .collect();
        let trie_bytes = DoubleArrayBuilder::build(&keyset).ok_or(LmError::TrieBuild)?;

        Ok(Self {
            trie: DoubleArray::new(trie_bytes),
            weights,
        })
    }

    fn lookup(&self, ngram: &[WordIndex]) -> Option<NgramWeights> {
        if ngram.len() > MAX_ORDER {
            return None;
        }
        let mut key = [0u8; MAX_ORDER * BYTES_PER_WORD];
        let len = encode(ngram, &mut key);
        let idx = self.trie.exact_match_search(&key[..len])?;
        self.weights.get(idx as usize).copied()
    }

    fn len(&self) -> usize {
        self.weights.len()
    }
}
