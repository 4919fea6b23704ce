use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::error::{RescoreError, Result};
use super::{DEFAULT_ENABLED_MODELS, MAX_MODELS, NEG_LN_10, OOV_PENALTY};
use crate::automata::{AhoCorasickTree, AutomatonState};
use crate::cache::MruCache;
use crate::config::{BASE_MODEL_GROUP, ContextScoringConfig};
use crate::history::{History, RescoringHistory};
use crate::lm::{LmState, UNKNOWN_WORD, WordIndex};
use crate::manager::{ModelItem, ModelManager};
use crate::{END_OF_SENTENCE, Label, OOV_LABEL, SENTENCE_BOUNDARY};

/// Backend states keyed by (history, model index).
pub type StateCache = MruCache<(RescoringHistory, usize), LmState>;

/// Receives a notification whenever cached scores become stale.
pub trait CacheDelegate: Send + Sync {
    fn on_cache_clear(&self);
}

/// Per-model costs of one word.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogProb {
    /// Cost under the base model
    pub base: f32,
    /// (weight, cost) of every other enabled model
    pub extra: Vec<(f32, f32)>,
}

impl LogProb {
    /// Interpolate: the base model takes whatever weight the others leave.
    pub fn compose(&self) -> f32 {
        let weight_sum: f32 = self.extra.iter().map(|(w, _)| w).sum();
        let extra: f32 = self.extra.iter().map(|(w, s)| w * s).sum();
        (1.0 - weight_sum) * self.base + extra
    }
}

/// Scores words against the enabled subset of the configured models.
///
/// At most one model per group is enabled. The set of enabled model indices
/// is mirrored in [`Rescorer::rescorer_key`] so callers can key their own
/// caches by it. Cloning is cheap: model data is shared. A clone starts
/// without a cache delegate, since the original's caches are not its own.
pub struct Rescorer {
    models: Vec<Arc<ModelItem>>,
    name_index: HashMap<String, usize>,
    path_index: HashMap<String, usize>,
    /// Group name -> enabled model index
    enabled: BTreeMap<String, usize>,
    key: u32,
    context_scoring: ContextScoringConfig,
    cache_delegate: Option<Arc<dyn CacheDelegate>>,
}

impl Clone for Rescorer {
    fn clone(&self) -> Self {
        Self {
            models: self.models.clone(),
            name_index: self.name_index.clone(),
            path_index: self.path_index.clone(),
            enabled: self.enabled.clone(),
            key: self.key,
            context_scoring: self.context_scoring.clone(),
            cache_delegate: None,
        }
    }
}

impl fmt::Debug for Rescorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rescorer")
            .field("models", &self.models.len())
            .field("enabled", &self.enabled)
            .field("key", &format_args!("{:#x}", self.key))
            .finish_non_exhaustive()
    }
}

impl Rescorer {
    /// Take the manager's init models and enable the defaults.
    pub fn new(manager: &ModelManager) -> Result<Self> {
        let items = manager.init_model_items();
        if items.len() > MAX_MODELS {
            return Err(RescoreError::TooManyModels(items.len()));
        }

        let mut rescorer = Self {
            models: items.into_iter().map(Arc::new).collect(),
            name_index: HashMap::new(),
            path_index: HashMap::new(),
            enabled: BTreeMap::new(),
            key: 0,
            context_scoring: manager.context_scoring().clone(),
            cache_delegate: None,
        };
        rescorer.build_indexes();

        for name in DEFAULT_ENABLED_MODELS {
            rescorer.enable_model(name);
        }
        let base = rescorer
            .enabled
            .get(BASE_MODEL_GROUP)
            .ok_or(RescoreError::MissingBaseModel(BASE_MODEL_GROUP))?;
        let base_weight = rescorer.models[*base].weight;
        if (1.0 - base_weight).abs() >= f32::EPSILON {
            return Err(RescoreError::InvalidBaseWeight(base_weight));
        }
        Ok(rescorer)
    }

    fn build_indexes(&mut self) {
        self.name_index.clear();
        self.path_index.clear();
        for (i, model) in self.models.iter().enumerate() {
            debug!("model index: {}, name: {}, path: {}", i, model.name, model.model_path);
            self.name_index.entry(model.name.clone()).or_insert(i);
            self.path_index.entry(model.model_path.clone()).or_insert(i);
        }
    }

    /// Enable the model called `name`, replacing the enabled model of its
    /// group. Returns false if the name is unknown or the weight budget
    /// would be exceeded; the enabled set is then unchanged.
    pub fn enable_model(&mut self, name: &str) -> bool {
        debug!("Enable model: {}", name);
        match self.name_index.get(name) {
            Some(&index) => self.enable_index(index),
            None => {
                warn!("Unknown model name: {}", name);
                false
            }
        }
    }

    /// Like [`Rescorer::enable_model`], looking the model up by file path.
    pub fn enable_model_by_path(&mut self, path: &str) -> bool {
        debug!("Enable model by path: {}", path);
        match self.path_index.get(path) {
            Some(&index) => self.enable_index(index),
            None => {
                warn!("Unknown model path: {}", path);
                false
            }
        }
    }

    fn enable_index(&mut self, index: usize) -> bool {
        let model = &self.models[index];
        let mut weight_sum = model.weight
            + self
                .enabled
                .iter()
                .filter(|(group, _)| group.as_str() != BASE_MODEL_GROUP)
                .map(|(_, &i)| self.models[i].weight)
                .sum::<f32>();

        let occupant = self.enabled.get(&model.group).copied();
        if let Some(current) = occupant {
            weight_sum -= self.models[current].weight;
        }
        if weight_sum > 1.0 {
            warn!(
                "Enabling {} would raise the summed model weight to {}, ignored",
                model.name, weight_sum
            );
            return false;
        }

        if let Some(current) = occupant {
            self.key &= !(1u32 << current);
        }
        self.enabled.insert(model.group.clone(), index);
        self.key |= 1u32 << index;
        true
    }

    /// Bitmask of the enabled model indices.
    pub fn rescorer_key(&self) -> u32 {
        self.key
    }

    /// (name, path) of every enabled model, ordered by group name.
    pub fn enabled_model_state(&self) -> Vec<(String, String)> {
        self.enabled
            .values()
            .map(|&i| (self.models[i].name.clone(), self.models[i].model_path.clone()))
            .collect()
    }

    pub fn context_scoring(&self) -> &ContextScoringConfig {
        &self.context_scoring
    }

    pub fn set_cache_delegate(&mut self, delegate: Option<Arc<dyn CacheDelegate>>) {
        self.cache_delegate = delegate;
    }

    /// Adopt the manager's committed dynamic models.
    ///
    /// Always clears the delegate's caches: entries computed under the
    /// replaced models are stale.
    pub fn sync_dynamic_models(&mut self, manager: &ModelManager) {
        for (name, item) in manager.dynamic_model_items() {
            if let Some(&index) = self.name_index.get(&name) {
                debug!("Sync dynamic model {} into index {}", name, index);
                self.models[index] = item;
            }
        }
        self.path_index = self
            .models
            .iter()
            .enumerate()
            .rev()
            .map(|(i, model)| (model.model_path.clone(), i))
            .collect();

        let weight_sum: f32 = self
            .enabled
            .iter()
            .filter(|(group, _)| group.as_str() != BASE_MODEL_GROUP)
            .map(|(_, &i)| self.models[i].weight)
            .sum();
        if weight_sum > 1.0 {
            warn!("Summed weight of enabled models is {} after sync", weight_sum);
        }

        if let Some(delegate) = &self.cache_delegate {
            delegate.on_cache_clear();
        }
    }

    /// Costs of `word` after `history` under every enabled, valid model.
    ///
    /// Only the default history width is supported. With a cache, the
    /// context state is stored under `history` and the state after `word`
    /// under `history.update(word)`, which is the next key a decoder asks
    /// for.
    pub fn log_prob<const N: usize>(
        &self,
        history: &History<N>,
        word: Label,
        mut cache: Option<&mut StateCache>,
    ) -> Result<LogProb> {
        let history: RescoringHistory = history
            .cast()
            .ok_or(RescoreError::UnsupportedHistoryWidth(N))?;

        let mut result = LogProb::default();
        for (group, &index) in &self.enabled {
            let item = &self.models[index];
            if !item.is_valid {
                continue;
            }
            let score = self.query(item, index, &history, word, cache.as_deref_mut());
            trace!("log_prob word: {}, score: {}, model: {}", word, score, index);

            if group == BASE_MODEL_GROUP {
                result.base = score;
            } else {
                result.extra.push((item.weight, score));
            }
        }
        Ok(result)
    }

    fn query(
        &self,
        item: &ModelItem,
        index: usize,
        history: &RescoringHistory,
        word: Label,
        mut cache: Option<&mut StateCache>,
    ) -> f32 {
        let Some(model) = item.model.as_deref() else {
            return OOV_PENALTY;
        };
        let current = if word == END_OF_SENTENCE {
            model.end_sentence()
        } else {
            match item.relabel.as_ref().and_then(|map| map.get(&word)) {
                Some(&id) if id != UNKNOWN_WORD => id,
                _ => return OOV_PENALTY,
            }
        };

        let key = (*history, index);
        let cached = cache.as_deref_mut().and_then(|c| c.get(&key).copied());
        let state = match cached {
            Some(state) => state,
            None => {
                let (context, count) = extract_context(item, history);
                let mut state = if count < item.ngram_order.saturating_sub(1) {
                    model.begin_sentence_state()
                } else {
                    model.null_context_state()
                };
                // Oldest first
                for &id in context[..count].iter().rev() {
                    if id == OOV_LABEL || id == UNKNOWN_WORD {
                        return OOV_PENALTY;
                    }
                    state = model.full_score(&state, id).1;
                }
                if let Some(c) = cache.as_deref_mut() {
                    c.put_new_key(key, state);
                }
                state
            }
        };

        let (prob, next) = model.full_score(&state, current);
        if let Some(c) = cache {
            c.put((history.update(word), index), next);
        }
        prob * NEG_LN_10
    }

    /// Composite cost of `word` and whether it occurs in either context.
    ///
    /// A context hit lowers the cost by the configured match bonus.
    pub fn lm_score<const N: usize>(
        &self,
        history: &History<N>,
        word: Label,
        query_context: &[Label],
        app_context: &[Label],
        cache: Option<&mut StateCache>,
    ) -> Result<(f32, bool)> {
        let mut score = self.log_prob(history, word, cache)?.compose();
        let matched = query_context.contains(&word) || app_context.contains(&word);
        if matched {
            score -= self.context_scoring.matched_bonus;
        }
        Ok((score, matched))
    }

    /// Step the phrase automaton over `word`.
    ///
    /// Returns the look-ahead bonus and the change in match height.
    pub fn look_ahead_score(
        &self,
        tree: &AhoCorasickTree,
        state: &mut AutomatonState,
        word: Label,
    ) -> (f32, i32) {
        let before = i32::from(tree.height(*state));
        let after = i32::from(tree.query(state, word));
        let delta = after - before;
        (-self.context_scoring.lookahead_bonus * delta as f32, delta)
    }
}

/// Relabeled context of `history`, most recent first, up to the model's
/// order minus one. Labels missing from the relabel map become
/// [`OOV_LABEL`].
fn extract_context(item: &ModelItem, history: &RescoringHistory) -> ([WordIndex; 4], usize) {
    let max = item.ngram_order.saturating_sub(1).min(history.capacity());
    let mut context = [0; 4];
    let mut count = 0;
    for (slot, &label) in context.iter_mut().zip(history.words()).take(max) {
        if label == SENTENCE_BOUNDARY {
            break;
        }
        *slot = item
            .relabel
            .as_ref()
            .and_then(|map| map.get(&label).copied())
            .unwrap_or(OOV_LABEL);
        count += 1;
    }
    (context, count)
}
