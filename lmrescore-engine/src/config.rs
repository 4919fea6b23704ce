//! Rescorer configuration
//!
//! Configs are TOML. A user config is merged on top of the embedded
//! `config/default.toml`, so omitted keys keep their defaults. Per-model
//! dynamic overrides are stored as standalone [`ModelConfig`] files and
//! merged field by field over the static entry.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::lm::ModelType;

/// Default configuration TOML embedded from config/default.toml
const DEFAULT_CONFIG_TOML: &str = include_str!("../config/default.toml");

/// Base model name and group. Always enabled with weight 1.0.
pub const BASE_MODEL_GROUP: &str = "secondpass";
pub const BUGFIX_MODEL_GROUP: &str = "bugfix";
pub const NEWWORD_MODEL_GROUP: &str = "newword";
/// Name and group prefix for legacy slots beyond the bugfix model.
pub const POI_MODEL_PREFIX: &str = "poi";

/// Epoch of the legacy single-weight-vector schema.
pub const LEGACY_EPOCH: u32 = 1;

const DEFAULT_NGRAM_ORDER: usize = 4;
const DEFAULT_WEIGHT: f32 = 1.0;

/// Errors that can occur while reading or writing configs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("TOML parse error")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialize error")]
    Serialize(#[from] toml::ser::Error),
}

type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration of one n-gram model.
///
/// Every field is optional so a dynamic override can carry only the fields
/// it changes.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ngram_order: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<ModelType>,
}

impl ModelConfig {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    pub fn group(&self) -> &str {
        self.group.as_deref().unwrap_or_default()
    }

    pub fn weight(&self) -> f32 {
        self.weight.unwrap_or(DEFAULT_WEIGHT)
    }

    pub fn ngram_order(&self) -> usize {
        self.ngram_order.unwrap_or(DEFAULT_NGRAM_ORDER)
    }

    pub fn model_path(&self) -> &str {
        self.model_path.as_deref().unwrap_or_default()
    }

    pub fn model_type(&self) -> ModelType {
        self.model_type.unwrap_or_default()
    }

    /// Overwrite every field that is set in `other`.
    pub fn merge_from(&mut self, other: &ModelConfig) {
        if other.name.is_some() {
            self.name.clone_from(&other.name);
        }
        if other.group.is_some() {
            self.group.clone_from(&other.group);
        }
        if other.weight.is_some() {
            self.weight = other.weight;
        }
        if other.ngram_order.is_some() {
            self.ngram_order = other.ngram_order;
        }
        if other.model_path.is_some() {
            self.model_path.clone_from(&other.model_path);
        }
        if other.model_type.is_some() {
            self.model_type = other.model_type;
        }
    }

    /// Read a standalone model config (a persisted dynamic override).
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Write this config to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string(self)?)?;
        Ok(())
    }
}

/// Weight vector of the legacy schema, one weight per model slot.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseScoreConfig {
    #[serde(default)]
    pub weight: Vec<f32>,
}

/// Context scoring parameters.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextScoringConfig {
    /// Cost subtracted when the scored word occurs in the query or app context
    pub matched_bonus: f32,
    /// Cost subtracted per phrase-automaton depth gained on look-ahead
    pub lookahead_bonus: f32,
}

/// Top-level rescorer config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RescorerConfig {
    /// Schema version
    pub epoch: u32,
    pub models: Vec<ModelConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_score: Option<BaseScoreConfig>,
    pub context_scoring: ContextScoringConfig,
}

impl Default for RescorerConfig {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("embedded default.toml must be valid")
    }
}

/// Recursively merge `overlay` TOML values on top of `base`.
fn merge_toml(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                if let Some(base_value) = base_table.get_mut(key) {
                    merge_toml(base_value, value);
                } else {
                    base_table.insert(key.clone(), value.clone());
                }
            }
        }
        (base, _) => {
            *base = overlay.clone();
        }
    }
}

impl RescorerConfig {
    /// Parse user TOML content merged on top of the embedded defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut base: toml::Value = toml::from_str(DEFAULT_CONFIG_TOML)?;
        let user: toml::Value = toml::from_str(content)?;
        merge_toml(&mut base, &user);
        Ok(base.try_into()?)
    }

    /// Load a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn is_legacy(&self) -> bool {
        self.epoch == LEGACY_EPOCH
    }

    /// Rewrite a legacy config into named, grouped entries.
    ///
    /// Slot 0 becomes the base model, slot 1 the bugfix model and every later
    /// slot `i` its own `poi{i}` group. Weights come from
    /// `base_score.weight`; a slot without one gets 1.0 if it is the base
    /// model and 0.0 otherwise.
    pub fn upgrade_legacy(&self) -> RescorerConfig {
        let weights = self
            .base_score
            .as_ref()
            .map(|b| b.weight.as_slice())
            .unwrap_or_default();

        let models = self
            .models
            .iter()
            .enumerate()
            .map(|(i, model)| {
                let mut model = model.clone();
                model.weight = Some(match weights.get(i) {
                    Some(&w) => w,
                    None if i == 0 => 1.0,
                    None => {
                        warn!("models[{i}] has no base_score weight, set its weight to 0");
                        0.0
                    }
                });
                let (name, group) = match i {
                    0 => (BASE_MODEL_GROUP.to_string(), BASE_MODEL_GROUP.to_string()),
                    1 => (BUGFIX_MODEL_GROUP.to_string(), BUGFIX_MODEL_GROUP.to_string()),
                    _ => {
                        let poi = format!("{POI_MODEL_PREFIX}{i}");
                        (poi.clone(), poi)
                    }
                };
                model.name = Some(name);
                model.group = Some(group);
                model
            })
            .collect();

        RescorerConfig {
            epoch: self.epoch,
            models,
            base_score: None,
            context_scoring: self.context_scoring.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = RescorerConfig::default();
        assert_eq!(config.epoch, 2);
        assert!(config.models.is_empty());
        assert_eq!(config.context_scoring, ContextScoringConfig::default());
    }

    #[test]
    fn test_parse_with_defaults() {
        let config = RescorerConfig::from_toml_str(
            r#"
[[models]]
name = "secondpass"
group = "secondpass"
model_path = "lm.arpa"

[context_scoring]
matched_bonus = 0.5
"#,
        )
        .unwrap();
        assert_eq!(config.epoch, 2);
        assert_eq!(config.models.len(), 1);
        assert_eq!(config.models[0].weight(), 1.0);
        assert_eq!(config.models[0].ngram_order(), 4);
        assert_eq!(config.models[0].model_type(), ModelType::Probing);
        assert_eq!(config.context_scoring.matched_bonus, 0.5);
        assert_eq!(config.context_scoring.lookahead_bonus, 0.0);
    }

    #[test]
    fn test_merge_from_only_overrides_set_fields() {
        let mut base = ModelConfig {
            name: Some("newword".into()),
            group: Some("newword".into()),
            weight: Some(0.2),
            ngram_order: Some(4),
            model_path: Some("static.arpa".into()),
            model_type: None,
        };
        base.merge_from(&ModelConfig {
            weight: Some(0.4),
            model_path: Some("dynamic.arpa".into()),
            ..Default::default()
        });
        assert_eq!(base.name(), "newword");
        assert_eq!(base.weight(), 0.4);
        assert_eq!(base.model_path(), "dynamic.arpa");

        let before = base.clone();
        base.merge_from(&ModelConfig::default());
        assert_eq!(base, before);
    }

    #[test]
    fn test_override_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("newword").join("config.toml");
        let config = ModelConfig {
            model_path: Some("dynamic.arpa".into()),
            weight: Some(0.4),
            ..Default::default()
        };
        config.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("group"));
        assert_eq!(ModelConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_upgrade_legacy() {
        let config = RescorerConfig::from_toml_str(
            r#"
epoch = 1

[base_score]
weight = [1.0, 0.3]

[[models]]
model_path = "base.arpa"

[[models]]
model_path = "bugfix.arpa"

[[models]]
model_path = "poi.arpa"
"#,
        )
        .unwrap();
        assert!(config.is_legacy());

        let upgraded = config.upgrade_legacy();
        let names: Vec<&str> = upgraded.models.iter().map(|m| m.name()).collect();
        let groups: Vec<&str> = upgraded.models.iter().map(|m| m.group()).collect();
        let weights: Vec<f32> = upgraded.models.iter().map(|m| m.weight()).collect();
        assert_eq!(names, vec!["secondpass", "bugfix", "poi2"]);
        assert_eq!(groups, vec!["secondpass", "bugfix", "poi2"]);
        assert_eq!(weights, vec![1.0, 0.3, 0.0]);
        assert_eq!(upgraded.models[2].model_path(), "poi.arpa");
        assert!(upgraded.base_score.is_none());
    }

    #[test]
    fn test_upgrade_legacy_without_weights() {
        let config = RescorerConfig::from_toml_str(
            "epoch = 1\n[[models]]\nmodel_path = \"base.arpa\"\n",
        )
        .unwrap();
        let upgraded = config.upgrade_legacy();
        assert_eq!(upgraded.models[0].weight(), 1.0);
    }
}
