//! Per-session scoring front end.
//!
//! [`CachingWrapper`] owns a [`Rescorer`], the two session caches and the
//! automata built from the application context. The caches are registered
//! as the rescorer's [`CacheDelegate`], so a model sync always empties them.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::automata::{
    AhoCorasickTree, AutomatonState, LevenState, LevenshteinAutomata, split_phrases,
};
use crate::cache::MruCache;
use crate::history::{History, RescoringHistory};
use crate::manager::ModelManager;
use crate::rescorer::error::{RescoreError, Result};
use crate::rescorer::{CacheDelegate, Rescorer, StateCache};
use crate::{CLASS_TAG, Label, MAX_COST, SENTENCE_BOUNDARY};

/// Composite scores keyed by (word, history, rescorer key).
pub type ScoreCache = MruCache<(Label, RescoringHistory, u32), (f32, bool)>;

/// Edit budget of every keyword.
const KEYWORD_EDIT_DISTANCE: u8 = 1;

#[derive(Debug)]
struct CacheSet {
    scores: Mutex<ScoreCache>,
    states: Mutex<StateCache>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CacheSet {
    fn new(capacity: usize) -> Self {
        Self {
            scores: Mutex::new(ScoreCache::new(capacity)),
            states: Mutex::new(StateCache::new(capacity)),
        }
    }

    fn clear(&self) {
        lock(&self.scores).clear();
        lock(&self.states).clear();
    }
}

impl CacheDelegate for CacheSet {
    fn on_cache_clear(&self) {
        debug!("Clear rescoring caches");
        self.clear();
    }
}

/// Input the keyword automaton was last built from.
#[derive(Debug, PartialEq)]
struct KeywordSource {
    context: Vec<Label>,
    limits: Vec<usize>,
}

/// Cached scoring plus phrase and keyword matching for one decode session.
#[derive(Debug)]
pub struct CachingWrapper {
    rescorer: Rescorer,
    caches: Option<Arc<CacheSet>>,
    app_context: Option<Arc<[Label]>>,
    query_context: Vec<Label>,
    /// Built on first look-ahead after the context changes
    tree: Option<AhoCorasickTree>,
    leven: Option<LevenshteinAutomata>,
    leven_source: Option<KeywordSource>,
}

impl CachingWrapper {
    /// Wrap `rescorer`. A `cache_size` of 0 disables both caches.
    pub fn new(mut rescorer: Rescorer, cache_size: usize) -> Self {
        let caches = (cache_size > 0).then(|| Arc::new(CacheSet::new(cache_size)));
        if let Some(caches) = &caches {
            rescorer.set_cache_delegate(Some(caches.clone() as Arc<dyn CacheDelegate>));
        }
        Self {
            rescorer,
            caches,
            app_context: None,
            query_context: Vec::new(),
            tree: None,
            leven: None,
            leven_source: None,
        }
    }

    pub fn rescorer(&self) -> &Rescorer {
        &self.rescorer
    }

    /// Mutable access, e.g. to enable models for this session.
    pub fn rescorer_mut(&mut self) -> &mut Rescorer {
        &mut self.rescorer
    }

    /// Composite cost of `word` after `history` and whether it matched the
    /// context.
    ///
    /// Default-width histories go through the score cache; wider ones are
    /// passed to the rescorer uncached.
    pub fn lm_score<const N: usize>(&self, history: &History<N>, word: Label) -> Result<(f32, bool)> {
        if word == SENTENCE_BOUNDARY {
            return Ok((0.0, false));
        }
        if history[0] == CLASS_TAG {
            return Ok((MAX_COST, false));
        }
        let app_context = self.app_context.as_deref().unwrap_or_default();

        let (Some(caches), Some(history)) = (&self.caches, history.cast::<4>()) else {
            return self
                .rescorer
                .lm_score(history, word, &self.query_context, app_context, None);
        };

        let key = (word, history, self.rescorer.rescorer_key());
        if let Some(&hit) = lock(&caches.scores).peek(&key) {
            return Ok(hit);
        }
        let result = {
            let mut states = lock(&caches.states);
            self.rescorer.lm_score(
                &history,
                word,
                &self.query_context,
                app_context,
                Some(&mut *states),
            )?
        };
        // Another caller may have filled the key while the lock was released
        lock(&caches.scores).put(key, result);
        Ok(result)
    }

    /// Replace the application and query contexts.
    ///
    /// The phrase automaton is rebuilt on the next look-ahead. Cached scores
    /// carry context bonuses, so they are dropped; backend states are kept.
    pub fn set_context(&mut self, app_context: Option<Arc<[Label]>>, query_context: Vec<Label>) {
        self.app_context = app_context;
        self.query_context = query_context;
        self.tree = None;
        if let Some(caches) = &self.caches {
            lock(&caches.scores).clear();
        }
    }

    /// Build the keyword automaton from `app_context`, one limit per
    /// keyword.
    pub fn set_keyword_context(&mut self, app_context: &[Label], keyword_limits: &[usize]) {
        self.build_leven_auto(app_context, keyword_limits);
    }

    /// Build the phrase automaton over every phrase of two or more labels.
    pub fn build_automaton(&mut self, app_context: &[Label]) {
        let mut tree = AhoCorasickTree::new();
        for phrase in split_phrases(app_context).filter(|p| p.len() > 1) {
            tree.insert(phrase.iter().rev().copied());
        }
        tree.build();
        debug!("Phrase automaton built with {} phrases", tree.len());
        self.tree = Some(tree);
    }

    /// Build the keyword automaton unless the input is unchanged.
    ///
    /// Keywords are read from the tail of the context; the last limit goes
    /// to the last keyword. Keywords without a limit get none.
    pub fn build_leven_auto(&mut self, app_context: &[Label], keyword_limits: &[usize]) {
        let source = KeywordSource {
            context: app_context.to_vec(),
            limits: keyword_limits.to_vec(),
        };
        if self.leven.is_some() && self.leven_source.as_ref() == Some(&source) {
            debug!("Levenshtein automata: cache");
            return;
        }

        let mut automata = LevenshteinAutomata::new();
        let mut limits = keyword_limits.iter().rev();
        for keyword in split_phrases(app_context).rev() {
            let limit = limits.next().copied().unwrap_or(0);
            let labels: Vec<Label> = keyword.iter().rev().copied().collect();
            automata.insert(&labels, KEYWORD_EDIT_DISTANCE, limit);
        }
        automata.build();
        info!("Levenshtein automata: build, {} keywords", automata.len());
        self.leven = Some(automata);
        self.leven_source = Some(source);
    }

    /// Step the phrase automaton and return the bonus and height change.
    pub fn look_ahead_score(&mut self, state: &mut AutomatonState, word: Label) -> Result<(f32, i32)> {
        if self.tree.is_none() {
            let app_context = self
                .app_context
                .clone()
                .ok_or(RescoreError::AutomatonNotBuilt)?;
            self.build_automaton(&app_context);
        }
        let tree = self.tree.as_ref().ok_or(RescoreError::AutomatonNotBuilt)?;
        Ok(self.rescorer.look_ahead_score(tree, state, word))
    }

    /// Labels of the keyword completed by `state`, empty if none.
    pub fn leven_match(&self, state: &LevenState) -> Result<Vec<Label>> {
        let automata = self.leven.as_ref().ok_or(RescoreError::AutomatonNotBuilt)?;
        Ok(automata.keyword_match(state))
    }

    /// Advance keyword matches over `word` and return the new states with
    /// the largest height among them.
    pub fn look_leven_score(
        &self,
        states: &[LevenState],
        word: Label,
        frame: u16,
        score: f32,
    ) -> Result<(Vec<LevenState>, u16)> {
        let automata = self.leven.as_ref().ok_or(RescoreError::AutomatonNotBuilt)?;
        let next = automata.expand_step(states, word, frame, score);
        let height = next.iter().map(|s| s.height).max().unwrap_or(0);
        Ok((next, height))
    }

    /// Clear both caches and drop the contexts and phrase automaton.
    pub fn reset(&mut self) {
        if let Some(caches) = &self.caches {
            caches.clear();
        }
        self.app_context = None;
        self.query_context.clear();
        self.tree = None;
    }

    /// Adopt committed dynamic models; clears both caches.
    pub fn sync_dynamic_models(&mut self, manager: &ModelManager) {
        self.rescorer.sync_dynamic_models(manager);
    }

    /// (score cache, state cache) entry counts.
    pub fn cache_len(&self) -> (usize, usize) {
        match &self.caches {
            Some(caches) => (lock(&caches.scores).len(), lock(&caches.states).len()),
            None => (0, 0),
        }
    }
}
