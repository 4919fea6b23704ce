//! Hash-table n-gram storage.

use std::collections::HashMap;

use super::arpa::NgramWeights;
use super::ngram::NgramStore;
use super::WordIndex;

type Result<T> = super::error::Result<T>;

/// N-grams keyed directly by their word ids.
#[derive(Debug, Default)]
pub struct ProbingStore {
    table: HashMap<Vec<WordIndex>, NgramWeights>,
}

impl NgramStore for ProbingStore {
    fn build(ngrams: Vec<Vec<(Vec<WordIndex>, NgramWeights)>>) -> Result<Self> {
        let table = ngrams.into_iter().flatten().collect();
        Ok(Self { table })
    }

    fn lookup(&self, ngram: &[WordIndex]) -> Option<NgramWeights> {
        self.table.get(ngram).copied()
    }

    fn len(&self) -> usize {
        self.table.len()
    }
}
