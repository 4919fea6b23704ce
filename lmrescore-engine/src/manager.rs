//! Lifecycle of the named, grouped n-gram models.
//!
//! The manager parses the rescorer config once at startup into an immutable
//! init set. Models in dynamic groups can later be replaced through a
//! three-phase update:
//!
//! 1. [`ModelManager::prepare_update`] clones the current item into a request
//!    private to the caller.
//! 2. [`UpdateRequest::apply`] persists the override, merges it over the
//!    static config and reloads the model file if its path changed.
//! 3. [`UpdateRequest::commit`] publishes the item into the dynamic overlay.
//!
//! Loading happens in step 2, off any decoding path. Step 3 is a single map
//! insert, the only point at which sessions can observe the new item (on
//! their next [`crate::Rescorer::sync_dynamic_models`]).

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::config::{
    BUGFIX_MODEL_GROUP, ConfigError, ContextScoringConfig, ModelConfig, NEWWORD_MODEL_GROUP,
    RescorerConfig,
};
use crate::lm::{self, LanguageModel, ModelType, WordIndex};
use crate::symbols::SymbolTable;
use crate::Label;

/// File name of a persisted override under `<model_base_dir>/<model name>/`.
pub const DYNAMIC_CONFIG_FILE_NAME: &str = "config.toml";

/// Groups whose models may be updated at runtime.
const DYNAMIC_GROUPS: [&str; 2] = [BUGFIX_MODEL_GROUP, NEWWORD_MODEL_GROUP];

/// Decoder label to model-private word id.
pub type RelabelMap = HashMap<Label, WordIndex>;

/// One loaded model and its scoring parameters.
#[derive(Debug, Clone)]
pub struct ModelItem {
    pub name: String,
    pub group: String,
    /// Interpolation weight in [0, 1]
    pub weight: f32,
    pub ngram_order: usize,
    pub model_path: String,
    pub model_type: ModelType,
    /// False when the model file is missing or failed to load
    pub is_valid: bool,
    pub relabel: Option<Arc<RelabelMap>>,
    pub model: Option<Arc<dyn LanguageModel>>,
}

impl Default for ModelItem {
    fn default() -> Self {
        Self {
            name: String::new(),
            group: String::new(),
            weight: 1.0,
            ngram_order: 4,
            model_path: String::new(),
            model_type: ModelType::default(),
            is_valid: false,
            relabel: None,
            model: None,
        }
    }
}

/// Owner of the init model set and the published dynamic overlay.
#[derive(Debug)]
pub struct ModelManager {
    /// Root of the persisted per-model overrides
    model_base_dir: PathBuf,
    dynamic_config_enabled: bool,
    context_scoring: ContextScoringConfig,
    /// Parsed once by `init`, keyed by model name
    init_models: BTreeMap<String, ModelItem>,
    /// Latest committed items, keyed by model name
    dynamic_models: DashMap<String, Arc<ModelItem>>,
    /// Dynamic-eligible model names with their static config
    dynamic_eligible: HashMap<String, ModelConfig>,
    symbols: Arc<SymbolTable>,
}

impl ModelManager {
    pub fn new(model_base_dir: impl Into<PathBuf>, enable_dynamic_config: bool) -> Self {
        Self {
            model_base_dir: model_base_dir.into(),
            dynamic_config_enabled: enable_dynamic_config,
            context_scoring: ContextScoringConfig::default(),
            init_models: BTreeMap::new(),
            dynamic_models: DashMap::new(),
            dynamic_eligible: HashMap::new(),
            symbols: Arc::new(SymbolTable::new()),
        }
    }

    /// Parse `config` and load every model it lists.
    ///
    /// Models that fail to load are kept as invalid items; the others are
    /// unaffected.
    pub fn init(&mut self, config: &RescorerConfig, symbols: Arc<SymbolTable>) {
        info!(
            "config file epoch is: {}, config base dir is: {}",
            config.epoch,
            self.model_base_dir.display()
        );
        self.context_scoring = config.context_scoring.clone();
        self.symbols = symbols;

        if config.is_legacy() {
            self.parse_config(&config.upgrade_legacy());
        } else {
            self.parse_config(config);
        }
    }

    fn parse_config(&mut self, config: &RescorerConfig) {
        for model_config in &config.models {
            let item = self.load_model_item(model_config);
            debug!(
                "name = {}, group = {}, ngram_order = {}, weight = {}, path = {}, valid = {}",
                item.name, item.group, item.ngram_order, item.weight, item.model_path, item.is_valid
            );

            if self.dynamic_config_enabled && DYNAMIC_GROUPS.contains(&item.group.as_str()) {
                self.dynamic_eligible
                    .entry(item.name.clone())
                    .or_insert_with(|| model_config.clone());
            }
            if self.init_models.contains_key(&item.name) {
                warn!("Duplicate model name {}, keeping the first entry", item.name);
                continue;
            }
            self.init_models.insert(item.name.clone(), item);
        }
    }

    /// Path of the persisted override for `model_name`.
    pub fn dynamic_config_path(&self, model_name: &str) -> PathBuf {
        self.model_base_dir
            .join(model_name)
            .join(DYNAMIC_CONFIG_FILE_NAME)
    }

    /// Build an item from its static config plus any persisted override.
    fn load_model_item(&self, static_config: &ModelConfig) -> ModelItem {
        let mut merged = static_config.clone();
        if self.dynamic_config_enabled {
            let path = self.dynamic_config_path(static_config.name());
            if path.exists() {
                match ModelConfig::load(&path) {
                    Ok(dynamic_config) => merged.merge_from(&dynamic_config),
                    Err(e) => warn!("Ignoring unreadable override {}: {}", path.display(), e),
                }
            }
        }
        let mut item = ModelItem::default();
        self.update_model_item(&merged, &mut item);
        item
    }

    /// Apply `config` to `item`, reloading the model only if its path changed.
    fn update_model_item(&self, config: &ModelConfig, item: &mut ModelItem) {
        item.name = config.name().to_string();
        item.group = config.group().to_string();
        item.weight = config.weight();
        item.ngram_order = config.ngram_order();
        if item.model_path == config.model_path() {
            // Same file: keep the loaded model and its validity
            return;
        }
        item.model_path = config.model_path().to_string();
        item.model_type = config.model_type();
        item.model = None;
        item.relabel = None;
        item.is_valid = false;

        if !Path::new(&item.model_path).exists() {
            warn!("Model file {} for {} does not exist", item.model_path, item.name);
            return;
        }

        debug!("Load model: {} begin, model_path = {}", item.name, item.model_path);
        let model = match lm::load_model(&item.model_path, item.model_type) {
            Ok(model) => model,
            Err(e) => {
                warn!("Failed to load model {} from {}: {}", item.name, item.model_path, e);
                return;
            }
        };
        debug!("Load model: {} done, order = {}", item.name, model.order());

        item.relabel = Some(Arc::new(self.create_relabel_map(model.as_ref())));
        item.model = Some(model);
        item.is_valid = true;
    }

    /// Map every symbol table label to the model's private word id.
    fn create_relabel_map(&self, model: &dyn LanguageModel) -> RelabelMap {
        self.symbols
            .iter()
            .map(|(label, token)| (label, model.index(token)))
            .collect()
    }

    /// Snapshot of the init set, ordered by model name.
    pub fn init_model_items(&self) -> Vec<ModelItem> {
        self.init_models.values().cloned().collect()
    }

    /// Snapshot of the committed dynamic overlay.
    pub fn dynamic_model_items(&self) -> Vec<(String, Arc<ModelItem>)> {
        self.dynamic_models
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    pub fn context_scoring(&self) -> &ContextScoringConfig {
        &self.context_scoring
    }

    pub fn is_dynamic_eligible(&self, model_name: &str) -> bool {
        self.dynamic_eligible.contains_key(model_name)
    }

    /// Start an update of `model_name`.
    ///
    /// Returns `None` if the model is not eligible for dynamic update.
    pub fn prepare_update(&self, model_name: &str) -> Option<UpdateRequest<'_>> {
        let Some(static_config) = self.dynamic_eligible.get(model_name) else {
            warn!(
                "Cannot find {} in dynamic model supporting list, is it a wrong name?",
                model_name
            );
            return None;
        };

        // The overlay is filled lazily: most eligible models are never updated
        let item = match self.dynamic_models.get(model_name) {
            Some(entry) => ModelItem::clone(entry.value()),
            None => self.init_models.get(model_name).cloned().unwrap_or_default(),
        };

        Some(UpdateRequest {
            manager: self,
            merged_config: static_config.clone(),
            dynamic_config_path: self.dynamic_config_path(model_name),
            model_name: model_name.to_string(),
            item,
        })
    }

    /// Prepare, apply and commit in one call.
    ///
    /// Returns `Ok(false)` if the model is not eligible for dynamic update.
    pub fn update_model(&self, model_name: &str, config: &ModelConfig) -> Result<bool, ConfigError> {
        let Some(mut request) = self.prepare_update(model_name) else {
            return Ok(false);
        };
        request.apply(config)?;
        request.commit();
        Ok(true)
    }

    fn commit_update(&self, model_name: String, item: ModelItem) {
        info!("Commit model update: {}, path = {}", model_name, item.model_path);
        self.dynamic_models.insert(model_name, Arc::new(item));
    }
}

/// A pending update of one model, private until committed.
#[derive(Debug)]
pub struct UpdateRequest<'a> {
    manager: &'a ModelManager,
    /// Static config with every applied override merged in
    merged_config: ModelConfig,
    dynamic_config_path: PathBuf,
    model_name: String,
    item: ModelItem,
}

impl UpdateRequest<'_> {
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// The staged item.
    pub fn item(&self) -> &ModelItem {
        &self.item
    }

    /// Persist `config` as the model's override and rebuild the staged item.
    ///
    /// Nothing is visible to sessions until [`UpdateRequest::commit`].
    pub fn apply(&mut self, config: &ModelConfig) -> Result<(), ConfigError> {
        debug!(
            "model name: {} write to {}",
            self.model_name,
            self.dynamic_config_path.display()
        );
        config.save(&self.dynamic_config_path)?;

        self.merged_config.merge_from(config);
        self.manager
            .update_model_item(&self.merged_config, &mut self.item);
        if !self.item.is_valid {
            warn!("Update model: {} to invalid state", self.model_name);
        }
        Ok(())
    }

    /// Publish the staged item into the dynamic overlay.
    pub fn commit(self) {
        self.manager.commit_update(self.model_name, self.item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fixture_symbols, model_config, write_fixture};
    use tempfile::TempDir;

    fn static_config(model_path: &str) -> RescorerConfig {
        RescorerConfig {
            models: vec![
                model_config("secondpass", "secondpass", 1.0, model_path),
                model_config("bugfix", "bugfix", 0.1, model_path),
                model_config("newword", "newword", 0.2, model_path),
                model_config("poi1", "poi", 0.5, model_path),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_init_loads_models() {
        let dir = TempDir::new().unwrap();
        let lm_path = write_fixture(dir.path());
        let mut manager = ModelManager::new(dir.path(), false);
        manager.init(&static_config(&lm_path), Arc::new(fixture_symbols()));

        let items = manager.init_model_items();
        assert_eq!(items.len(), 4);
        assert!(items.iter().all(|item| item.is_valid));
        // Ordered by name
        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["bugfix", "newword", "poi1", "secondpass"]);

        let relabel = items[0].relabel.as_ref().unwrap();
        let model = items[0].model.as_ref().unwrap();
        assert_eq!(relabel[&28633], model.index("打电话"));
        assert_eq!(relabel[&500], lm::UNKNOWN_WORD);
    }

    #[test]
    fn test_missing_model_file_is_invalid() {
        let dir = TempDir::new().unwrap();
        let lm_path = write_fixture(dir.path());
        let mut config = static_config(&lm_path);
        config.models[3].model_path = Some("/nonexistent/poi.arpa".into());

        let mut manager = ModelManager::new(dir.path(), false);
        manager.init(&config, Arc::new(fixture_symbols()));

        let items = manager.init_model_items();
        let poi = items.iter().find(|i| i.name == "poi1").unwrap();
        assert!(!poi.is_valid);
        assert!(poi.model.is_none());
        assert_eq!(items.iter().filter(|i| i.is_valid).count(), 3);
    }

    #[test]
    fn test_unparsable_model_file_is_invalid() {
        let dir = TempDir::new().unwrap();
        let bad = dir.path().join("bad.arpa");
        std::fs::write(&bad, "not an arpa file").unwrap();

        let mut manager = ModelManager::new(dir.path(), false);
        manager.init(
            &RescorerConfig {
                models: vec![model_config("secondpass", "secondpass", 1.0, bad.to_str().unwrap())],
                ..Default::default()
            },
            Arc::new(fixture_symbols()),
        );
        assert!(!manager.init_model_items()[0].is_valid);
    }

    #[test]
    fn test_legacy_config_is_upgraded() {
        let dir = TempDir::new().unwrap();
        let lm_path = write_fixture(dir.path());
        let config = RescorerConfig::from_toml_str(&format!(
            "epoch = 1\n[base_score]\nweight = [1.0, 0.2]\n\
             [[models]]\nmodel_path = \"{lm_path}\"\n\
             [[models]]\nmodel_path = \"{lm_path}\"\n\
             [[models]]\nmodel_path = \"{lm_path}\"\n"
        ))
        .unwrap();

        let mut manager = ModelManager::new(dir.path(), false);
        manager.init(&config, Arc::new(fixture_symbols()));
        let items = manager.init_model_items();
        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["bugfix", "poi2", "secondpass"]);
        assert_eq!(items[0].weight, 0.2);
        assert_eq!(items[1].group, "poi2");
        assert_eq!(items[1].weight, 0.0);
    }

    #[test]
    fn test_prepare_rejects_non_dynamic_models() {
        let dir = TempDir::new().unwrap();
        let lm_path = write_fixture(dir.path());
        let mut manager = ModelManager::new(dir.path(), true);
        manager.init(&static_config(&lm_path), Arc::new(fixture_symbols()));

        assert!(manager.prepare_update("secondpass").is_none());
        assert!(manager.prepare_update("poi1").is_none());
        assert!(manager.prepare_update("not_existed").is_none());
        assert!(manager.prepare_update("newword").is_some());
        assert!(manager.is_dynamic_eligible("bugfix"));
    }

    #[test]
    fn test_dynamic_config_disabled() {
        let dir = TempDir::new().unwrap();
        let lm_path = write_fixture(dir.path());
        let mut manager = ModelManager::new(dir.path(), false);
        manager.init(&static_config(&lm_path), Arc::new(fixture_symbols()));

        assert!(manager.prepare_update("newword").is_none());
        assert!(!manager.update_model("newword", &ModelConfig::default()).unwrap());
    }

    #[test]
    fn test_update_is_invisible_until_commit() {
        let dir = TempDir::new().unwrap();
        let lm_path = write_fixture(dir.path());
        let mut manager = ModelManager::new(dir.path(), true);
        manager.init(&static_config(&lm_path), Arc::new(fixture_symbols()));

        let mut request = manager.prepare_update("newword").unwrap();
        request
            .apply(&ModelConfig {
                weight: Some(0.3),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(request.item().weight, 0.3);
        assert!(manager.dynamic_model_items().is_empty());

        request.commit();
        let dynamic = manager.dynamic_model_items();
        assert_eq!(dynamic.len(), 1);
        assert_eq!(dynamic[0].0, "newword");
        assert_eq!(dynamic[0].1.weight, 0.3);
        // Init set is untouched
        let init = manager.init_model_items();
        assert_eq!(init.iter().find(|i| i.name == "newword").unwrap().weight, 0.2);
    }

    #[test]
    fn test_unchanged_path_skips_reload() {
        let dir = TempDir::new().unwrap();
        let lm_path = write_fixture(dir.path());
        let mut manager = ModelManager::new(dir.path(), true);
        manager.init(&static_config(&lm_path), Arc::new(fixture_symbols()));
        let before = manager
            .init_model_items()
            .into_iter()
            .find(|i| i.name == "newword")
            .unwrap();

        let mut request = manager.prepare_update("newword").unwrap();
        request
            .apply(&ModelConfig {
                model_path: Some(lm_path.clone()),
                weight: Some(0.15),
                ..Default::default()
            })
            .unwrap();

        let staged = request.item();
        assert!(staged.is_valid);
        assert!(Arc::ptr_eq(
            staged.model.as_ref().unwrap(),
            before.model.as_ref().unwrap()
        ));
        assert!(Arc::ptr_eq(
            staged.relabel.as_ref().unwrap(),
            before.relabel.as_ref().unwrap()
        ));
    }

    #[test]
    fn test_missing_path_on_update_invalidates_only_that_model() {
        let dir = TempDir::new().unwrap();
        let lm_path = write_fixture(dir.path());
        let mut manager = ModelManager::new(dir.path(), true);
        manager.init(&static_config(&lm_path), Arc::new(fixture_symbols()));

        assert!(
            manager
                .update_model(
                    "newword",
                    &ModelConfig {
                        model_path: Some("invalid_path_for_test".into()),
                        ..Default::default()
                    },
                )
                .unwrap()
        );
        let dynamic = manager.dynamic_model_items();
        assert!(!dynamic[0].1.is_valid);
        assert_eq!(dynamic[0].1.model_path, "invalid_path_for_test");
        assert!(manager.init_model_items().iter().all(|i| i.is_valid));

        // An empty override restores the static path
        assert!(manager.update_model("newword", &ModelConfig::default()).unwrap());
        let dynamic = manager.dynamic_model_items();
        assert!(dynamic[0].1.is_valid);
        assert_eq!(dynamic[0].1.model_path, lm_path);
    }

    #[test]
    fn test_override_is_persisted_and_reloaded() {
        let dir = TempDir::new().unwrap();
        let lm_path = write_fixture(dir.path());
        {
            let mut manager = ModelManager::new(dir.path(), true);
            manager.init(&static_config(&lm_path), Arc::new(fixture_symbols()));
            manager
                .update_model(
                    "bugfix",
                    &ModelConfig {
                        weight: Some(0.05),
                        ..Default::default()
                    },
                )
                .unwrap();
        }
        assert!(dir.path().join("bugfix").join(DYNAMIC_CONFIG_FILE_NAME).exists());

        let mut manager = ModelManager::new(dir.path(), true);
        manager.init(&static_config(&lm_path), Arc::new(fixture_symbols()));
        let bugfix = manager
            .init_model_items()
            .into_iter()
            .find(|i| i.name == "bugfix")
            .unwrap();
        assert_eq!(bugfix.weight, 0.05);
        assert!(bugfix.is_valid);
    }
}
