//! Settings file: engine calibration and provider selection, persisted as TOML.
//!
//! Resolution order: explicit `--config` path, then
//! `$XDG_CONFIG_HOME/lexgraph/config.toml` if present, then built-in defaults.
//! CLI flags override individual values afterwards.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::{EngineConfig, Providers};
use crate::error::ConfigError;
use crate::knowledge::IndexConfig;
use crate::matcher::Threshold;
use crate::provider::{CannedGenerator, HashingEmbedder, OllamaClient, OllamaConfig, PlainSimplifier};

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

const APP_DIR: &str = "lexgraph";

/// Which provider family backs the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Hashing embedder and plain simplifier; no generation.
    #[default]
    Offline,
    /// Ollama REST API for all three providers.
    Ollama,
}

/// `[engine]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Data directory; `None` uses `$XDG_DATA_HOME/lexgraph`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Inclusive cosine threshold in [-1, 1].
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Similarity at which a drafted principle reuses an existing one.
    #[serde(default = "default_principle_reuse_threshold")]
    pub principle_reuse_threshold: f32,
    /// Similarity at which a drafted article reuses an existing one.
    #[serde(default = "default_threshold")]
    pub article_reuse_threshold: f32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_related_depth")]
    pub related_depth: usize,
    /// Per-call upstream timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Largest index searched exhaustively.
    #[serde(default = "default_exact_search_limit")]
    pub exact_search_limit: usize,
    /// Expected number of scenarios.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_threshold() -> f32 {
    0.75
}
fn default_principle_reuse_threshold() -> f32 {
    0.92
}
fn default_top_k() -> usize {
    5
}
fn default_related_depth() -> usize {
    1
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_exact_search_limit() -> usize {
    10_000
}
fn default_capacity() -> usize {
    100_000
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            data_dir: None,
            threshold: default_threshold(),
            principle_reuse_threshold: default_principle_reuse_threshold(),
            article_reuse_threshold: default_threshold(),
            top_k: default_top_k(),
            related_depth: default_related_depth(),
            timeout_secs: default_timeout_secs(),
            exact_search_limit: default_exact_search_limit(),
            capacity: default_capacity(),
        }
    }
}

/// `[provider]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub kind: ProviderKind,
    /// Dimension of the offline hashing embedder.
    #[serde(default = "default_offline_dimension")]
    pub offline_dimension: usize,
    #[serde(default)]
    pub ollama: OllamaConfig,
}

fn default_offline_dimension() -> usize {
    256
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            offline_dimension: default_offline_dimension(),
            ollama: OllamaConfig::default(),
        }
    }
}

/// The whole settings file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub provider: ProviderSettings,
}

impl Settings {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Load `explicit` if given, else the default file if it exists, else defaults.
    pub fn resolve(explicit: Option<&Path>) -> ConfigResult<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_config_file() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Validate and convert into an engine configuration.
    pub fn to_engine_config(&self) -> ConfigResult<EngineConfig> {
        let data_dir = match &self.engine.data_dir {
            Some(dir) => dir.clone(),
            None => default_data_dir()?,
        };
        let config = EngineConfig {
            data_dir: Some(data_dir),
            threshold: Threshold::new(self.engine.threshold)?,
            top_k: self.engine.top_k,
            related_depth: self.engine.related_depth,
            upstream_timeout: Duration::from_secs(self.engine.timeout_secs),
            principle_reuse: Threshold::new(self.engine.principle_reuse_threshold)?,
            article_reuse: Threshold::new(self.engine.article_reuse_threshold)?,
            index: IndexConfig {
                capacity: self.engine.capacity,
                exact_search_limit: self.engine.exact_search_limit,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Instantiate the configured providers.
    pub fn providers(&self) -> ConfigResult<Providers> {
        match self.provider.kind {
            ProviderKind::Offline => {
                if self.provider.offline_dimension == 0 {
                    return Err(ConfigError::Invalid {
                        message: "offline_dimension must be > 0".into(),
                    });
                }
                Ok(Providers {
                    embedder: Arc::new(HashingEmbedder::new(self.provider.offline_dimension)),
                    generator: Arc::new(CannedGenerator::failing(
                        "offline mode has no generation provider",
                    )),
                    simplifier: Arc::new(PlainSimplifier),
                })
            }
            ProviderKind::Ollama => {
                if self.provider.ollama.embedding_dimension == 0 {
                    return Err(ConfigError::Invalid {
                        message: "ollama.embedding_dimension must be > 0".into(),
                    });
                }
                let client = Arc::new(OllamaClient::new(self.provider.ollama.clone()));
                Ok(Providers {
                    embedder: client.clone(),
                    generator: client.clone(),
                    simplifier: client,
                })
            }
        }
    }
}

fn home() -> Option<PathBuf> {
    std::env::var("HOME").map(PathBuf::from).ok()
}

/// `$XDG_CONFIG_HOME/lexgraph/config.toml`.
pub fn default_config_file() -> Option<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .ok()
        .or_else(|| home().map(|h| h.join(".config")))
        .map(|dir| dir.join(APP_DIR).join("config.toml"))
}

/// `$XDG_DATA_HOME/lexgraph/`.
pub fn default_data_dir() -> ConfigResult<PathBuf> {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .ok()
        .or_else(|| home().map(|h| h.join(".local/share")))
        .map(|dir| dir.join(APP_DIR))
        .ok_or_else(|| ConfigError::Invalid {
            message: "cannot determine a data directory; set HOME or pass --data-dir".into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_calibration() {
        let settings = Settings::default();
        assert_eq!(settings.engine.threshold, 0.75);
        assert_eq!(settings.engine.principle_reuse_threshold, 0.92);
        assert_eq!(settings.engine.article_reuse_threshold, 0.75);
        assert_eq!(settings.engine.top_k, 5);
        assert_eq!(settings.engine.related_depth, 1);
        assert_eq!(settings.engine.timeout_secs, 30);
        assert_eq!(settings.engine.exact_search_limit, 10_000);
        assert_eq!(settings.provider.kind, ProviderKind::Offline);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[engine]\nthreshold = 0.8\n\n[provider]\nkind = \"ollama\"\n\n[provider.ollama]\nmodel = \"mistral\"\n",
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.engine.threshold, 0.8);
        assert_eq!(settings.engine.top_k, 5);
        assert_eq!(settings.provider.kind, ProviderKind::Ollama);
        assert_eq!(settings.provider.ollama.model, "mistral");
        assert_eq!(settings.provider.ollama.base_url, "http://localhost:11434");
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut settings = Settings::default();
        settings.engine.data_dir = Some(dir.path().join("data"));
        settings.engine.related_depth = 3;
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn invalid_values_rejected() {
        let mut settings = Settings::default();
        settings.engine.data_dir = Some(PathBuf::from("/tmp/lexgraph-test"));
        settings.engine.threshold = 1.5;
        assert!(matches!(
            settings.to_engine_config(),
            Err(ConfigError::Invalid { .. })
        ));

        settings.engine.threshold = 0.75;
        settings.engine.principle_reuse_threshold = -2.0;
        assert!(settings.to_engine_config().is_err());

        settings.engine.principle_reuse_threshold = 0.92;
        settings.engine.top_k = 0;
        assert!(settings.to_engine_config().is_err());
    }

    #[test]
    fn broken_toml_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[engine\nthreshold = ").unwrap();
        assert!(matches!(Settings::load(&path), Err(ConfigError::Parse { .. })));
    }
}
