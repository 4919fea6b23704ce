//! Keyword matcher tolerating a bounded number of token edits.
//!
//! Every active match is a [`LevenState`]: a position in one keyword plus
//! the edits spent so far. [`LevenshteinAutomata::expand_step`] advances all
//! of them by one decoded token, trying a match, a substitution, an inserted
//! token and a skipped keyword token, and starts new matches on tokens that
//! open a keyword.

use std::collections::HashMap;

use crate::Label;

/// One partial keyword match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevenState {
    /// Index of the keyword in insertion order
    pub keyword: u32,
    /// Keyword tokens consumed so far
    pub height: u16,
    /// Edits spent so far
    pub distance: u8,
    /// Frame at which the match started
    pub start_frame: u16,
    /// Decoder score attached when the match started
    pub score: f32,
}

#[derive(Debug, Clone)]
struct Keyword {
    labels: Vec<Label>,
    max_distance: u8,
    /// Max states kept per step, 0 for no limit
    limit: usize,
}

/// Set of keywords matched with bounded edit distance.
#[derive(Debug, Clone, Default)]
pub struct LevenshteinAutomata {
    keywords: Vec<Keyword>,
    /// Label -> (keyword, height reached, distance) for match starts
    starts: HashMap<Label, Vec<(u32, u16, u8)>>,
}

impl LevenshteinAutomata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a keyword allowing `max_distance` edits and keeping at most
    /// `limit` partial matches of it per step (0 keeps all).
    pub fn insert(&mut self, labels: &[Label], max_distance: u8, limit: usize) {
        if labels.is_empty() {
            return;
        }
        self.keywords.push(Keyword {
            labels: labels.to_vec(),
            max_distance,
            limit,
        });
    }

    /// Index the tokens that can open a match.
    ///
    /// A match opens on the first keyword token, or on the second one with
    /// the first counted as deleted.
    pub fn build(&mut self) {
        self.starts.clear();
        for (id, keyword) in self.keywords.iter().enumerate() {
            let id = id as u32;
            self.starts
                .entry(keyword.labels[0])
                .or_default()
                .push((id, 1, 0));
            if keyword.max_distance > 0 && keyword.labels.len() > 1 {
                self.starts
                    .entry(keyword.labels[1])
                    .or_default()
                    .push((id, 2, 1));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// Advance `states` over `label`.
    ///
    /// New matches started by `label` carry `frame` and `score`. When several
    /// paths reach the same keyword position only the one with the fewest
    /// edits survives.
    pub fn expand_step(
        &self,
        states: &[LevenState],
        label: Label,
        frame: u16,
        score: f32,
    ) -> Vec<LevenState> {
        let mut next: Vec<LevenState> = Vec::new();
        let mut slot: HashMap<(u32, u16), usize> = HashMap::new();
        let mut push = |state: LevenState| match slot.get(&(state.keyword, state.height)) {
            Some(&i) if next[i].distance <= state.distance => {}
            Some(&i) => next[i] = state,
            None => {
                slot.insert((state.keyword, state.height), next.len());
                next.push(state);
            }
        };

        for state in states {
            let Some(keyword) = self.keywords.get(state.keyword as usize) else {
                continue;
            };
            let pos = state.height as usize;
            let len = keyword.labels.len();
            let at = |height: usize, distance: u8| LevenState {
                height: height as u16,
                distance,
                ..*state
            };

            if pos < len && keyword.labels[pos] == label {
                push(at(pos + 1, state.distance));
            }
            if state.distance >= keyword.max_distance {
                continue;
            }
            let distance = state.distance + 1;
            if pos < len {
                // Substitution and an extra decoded token
                if keyword.labels[pos] != label {
                    push(at(pos + 1, distance));
                }
                push(at(pos, distance));
            }
            if pos + 1 < len && keyword.labels[pos + 1] == label {
                push(at(pos + 2, distance));
            }
        }

        if let Some(starts) = self.starts.get(&label) {
            for &(keyword, height, distance) in starts {
                push(LevenState {
                    keyword,
                    height,
                    distance,
                    start_frame: frame,
                    score,
                });
            }
        }

        self.apply_limits(next)
    }

    /// Keep at most `limit` states per keyword, fewest edits first, then
    /// lowest score.
    fn apply_limits(&self, mut states: Vec<LevenState>) -> Vec<LevenState> {
        if self.keywords.iter().all(|k| k.limit == 0) {
            return states;
        }
        states.sort_by(|a, b| {
            a.keyword
                .cmp(&b.keyword)
                .then(a.distance.cmp(&b.distance))
                .then(a.score.total_cmp(&b.score))
        });
        let mut kept: HashMap<u32, usize> = HashMap::new();
        states.retain(|state| {
            let limit = self.keywords[state.keyword as usize].limit;
            let count = kept.entry(state.keyword).or_insert(0);
            *count += 1;
            limit == 0 || *count <= limit
        });
        states
    }

    /// True if `state` completes its keyword within the edit budget.
    pub fn is_accepting(&self, state: &LevenState) -> bool {
        self.keywords
            .get(state.keyword as usize)
            .is_some_and(|keyword| {
                let remaining = keyword.labels.len().saturating_sub(state.height as usize);
                remaining + state.distance as usize <= keyword.max_distance as usize
            })
    }

    /// Labels of the keyword `state` completes, empty if it does not.
    pub fn keyword_match(&self, state: &LevenState) -> Vec<Label> {
        if !self.is_accepting(state) {
            return Vec::new();
        }
        self.keywords[state.keyword as usize].labels.clone()
    }
}
