use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Sequence length used when the model config does not declare one.
pub const DEFAULT_MAX_LENGTH: usize = 512;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Locations of the model artifacts on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub vocab: PathBuf,
    pub tokenizer_config: PathBuf,
    pub model_config: PathBuf,
    pub model: PathBuf,
}

impl ModelPaths {
    /// Default file layout of an exported BERT model directory.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            vocab: dir.join("vocab.txt"),
            tokenizer_config: dir.join("tokenizer.json"),
            model_config: dir.join("config.json"),
            model: dir.join("model.onnx"),
        }
    }
}

/// Settings that shape tokenization, merged from the tokenizer and model configs.
/// Only constructible through [`TokenizerConfig::new`], which bounds `max_length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenizerConfig {
    do_lower_case: bool,
    max_length: usize,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self { do_lower_case: true, max_length: DEFAULT_MAX_LENGTH }
    }
}

#[derive(Debug, Deserialize)]
struct TokenizerFile {
    #[serde(default = "default_lower_case")]
    do_lower_case: bool,
}

fn default_lower_case() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ModelFile {
    max_position_embeddings: Option<usize>,
}

impl TokenizerConfig {
    /// Load from the tokenizer config and model config JSON files.
    pub fn load(tokenizer_config: &Path, model_config: &Path) -> Result<Self, ConfigError> {
        let tokenizer: TokenizerFile = read_json(tokenizer_config)?;
        let model: ModelFile = read_json(model_config)?;
        Self::new(
            tokenizer.do_lower_case,
            model.max_position_embeddings.unwrap_or(DEFAULT_MAX_LENGTH),
        )
    }

    /// `max_length` must leave room for CLS and SEP.
    pub fn new(do_lower_case: bool, max_length: usize) -> Result<Self, ConfigError> {
        if max_length < 2 {
            return Err(ConfigError::Invalid(format!(
                "max_position_embeddings must be at least 2, got {max_length}"
            )));
        }
        Ok(Self { do_lower_case, max_length })
    }

    pub fn do_lower_case(&self) -> bool {
        self.do_lower_case
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Json { path: path.to_path_buf(), source })
}

/// Per-request limits applied by the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Upper bound on one text-to-receipt run. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
}
