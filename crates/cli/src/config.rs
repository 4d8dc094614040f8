use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tally_ocr::{ModelPaths, PipelineOptions};

/// On-disk settings for the `tally` binary. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelSettings,
    pub pipeline: PipelineSettings,
    pub ocr: OcrSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    /// Directory holding `vocab.txt`, `tokenizer.json`, `config.json` and `model.onnx`.
    pub dir: PathBuf,
    pub vocab: Option<PathBuf>,
    pub tokenizer_config: Option<PathBuf>,
    pub model_config: Option<PathBuf>,
    pub model: Option<PathBuf>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models/bert-base-uncased"),
            vocab: None,
            tokenizer_config: None,
            model_config: None,
            model: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct OcrSettings {
    pub lang: String,
    pub tessdata: Option<String>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self { lang: "eng".to_string(), tessdata: None }
    }
}

impl AppConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML config")
    }

    /// Read `path` if given, otherwise use the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Artifact locations, with `dir_override` replacing the configured model directory.
    pub fn model_paths(&self, dir_override: Option<&Path>) -> ModelPaths {
        let m = &self.model;
        let defaults = ModelPaths::in_dir(dir_override.unwrap_or(m.dir.as_path()));
        ModelPaths {
            vocab: m.vocab.clone().unwrap_or(defaults.vocab),
            tokenizer_config: m.tokenizer_config.clone().unwrap_or(defaults.tokenizer_config),
            model_config: m.model_config.clone().unwrap_or(defaults.model_config),
            model: m.model.clone().unwrap_or(defaults.model),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            request_timeout: self.pipeline.request_timeout_ms.map(Duration::from_millis),
        }
    }
}
