//! Back-off n-gram scoring over a pluggable n-gram store.

use std::collections::HashMap;
use std::fmt;

use super::arpa::{ArpaData, NgramWeights};
use super::error::LmError;
use super::{
    BEGIN_SENTENCE_TOKEN, END_SENTENCE_TOKEN, LanguageModel, LmState, MAX_ORDER, UNKNOWN_WORD,
    WordIndex,
};

type Result<T> = super::error::Result<T>;

/// Lookup table from an n-gram (oldest word first) to its weights.
pub trait NgramStore: Send + Sync + fmt::Debug + Sized {
    fn build(ngrams: Vec<Vec<(Vec<WordIndex>, NgramWeights)>>) -> Result<Self>;

    fn lookup(&self, ngram: &[WordIndex]) -> Option<NgramWeights>;

    /// Number of stored n-grams across all orders.
    fn len(&self) -> usize;
}

/// Back-off language model.
#[derive(Debug)]
pub struct NgramModel<S> {
    order: usize,
    vocab: HashMap<String, WordIndex>,
    begin_sentence: WordIndex,
    end_sentence: WordIndex,
    store: S,
}

/// Write `context[..k]` oldest first followed by `word` into `buf`.
fn gram<'a>(
    context: &[WordIndex],
    k: usize,
    word: WordIndex,
    buf: &'a mut [WordIndex; MAX_ORDER],
) -> &'a [WordIndex] {
    for i in 0..k {
        buf[i] = context[k - 1 - i];
    }
    buf[k] = word;
    &buf[..=k]
}

impl<S: NgramStore> NgramModel<S> {
    pub fn build(data: ArpaData) -> Result<Self> {
        let vocab: HashMap<String, WordIndex> = data
            .vocab
            .iter()
            .enumerate()
            .map(|(id, token)| (token.clone(), id as WordIndex))
            .collect();
        let begin_sentence = *vocab
            .get(BEGIN_SENTENCE_TOKEN)
            .ok_or(LmError::MissingToken(BEGIN_SENTENCE_TOKEN))?;
        let end_sentence = *vocab
            .get(END_SENTENCE_TOKEN)
            .ok_or(LmError::MissingToken(END_SENTENCE_TOKEN))?;

        Ok(Self {
            order: data.order,
            vocab,
            begin_sentence,
            end_sentence,
            store: S::build(data.ngrams)?,
        })
    }

    /// Number of stored n-grams.
    pub fn ngram_count(&self) -> usize {
        self.store.len()
    }

    fn max_context(&self) -> usize {
        self.order.saturating_sub(1)
    }
}

impl<S: NgramStore> LanguageModel for NgramModel<S> {
    fn order(&self) -> usize {
        self.order
    }

    fn index(&self, token: &str) -> WordIndex {
        self.vocab.get(token).copied().unwrap_or(UNKNOWN_WORD)
    }

    fn end_sentence(&self) -> WordIndex {
        self.end_sentence
    }

    fn begin_sentence_state(&self) -> LmState {
        let mut state = LmState::default();
        if self.max_context() == 0 {
            return state;
        }
        state.words[0] = self.begin_sentence;
        state.backoff[0] = self
            .store
            .lookup(&[self.begin_sentence])
            .map(|w| w.backoff)
            .unwrap_or(0.0);
        state.length = 1;
        state
    }

    fn null_context_state(&self) -> LmState {
        LmState::default()
    }

    fn full_score(&self, state: &LmState, word: WordIndex) -> (f32, LmState) {
        let (word, unigram) = match self.store.lookup(&[word]) {
            Some(w) => (word, w),
            None => (
                UNKNOWN_WORD,
                self.store.lookup(&[UNKNOWN_WORD]).unwrap_or_default(),
            ),
        };
        let context = state.context();

        // Longest matching n-gram; every suffix of a listed n-gram is listed too
        let mut buf = [0; MAX_ORDER];
        let mut matched = 0;
        let mut prob = unigram.prob;
        let mut backoffs = [0.0f32; MAX_ORDER];
        backoffs[0] = unigram.backoff;
        for k in 1..=context.len() {
            match self.store.lookup(gram(context, k, word, &mut buf)) {
                Some(w) => {
                    matched = k;
                    prob = w.prob;
                    backoffs[k] = w.backoff;
                }
                None => break,
            }
        }
        // Back off through every context length longer than the match
        prob += state.backoff[matched..context.len()].iter().sum::<f32>();

        let mut next = LmState::default();
        let length = (matched + 1).min(self.max_context());
        for i in 0..length {
            next.words[i] = if i == 0 { word } else { context[i - 1] };
            next.backoff[i] = backoffs[i];
        }
        next.length = length as u8;
        (prob, next)
    }

    fn vocab_size(&self) -> usize {
        self.vocab.len()
    }
}
