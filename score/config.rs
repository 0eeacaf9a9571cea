//! Pipeline configuration, read from an optional TOML file.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. Command-line flags are applied on top by the binary.

use crate::explain::sampling::{DEFAULT_BACKGROUND_SIZE, DEFAULT_PERMUTATIONS, DEFAULT_SEED};
use crate::explain::{Explainer, LinearExplainer, SamplingExplainer};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Model artifact looked up when no path is configured.
pub const DEFAULT_MODEL_PATH: &str = "model.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse configuration file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Which attribution method explains each prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplainerKind {
    /// Model-agnostic permutation sampling on the probability scale.
    #[default]
    Sampling,
    /// Exact coefficient attribution on the log-odds scale.
    ///
    /// Baseline plus contributions reproduces the log-odds of fever, not the
    /// probability; use `Sampling` when the attributions must add up to
    /// P(fever).
    Linear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub model_path: PathBuf,
    /// When false, predictions are returned without an explanation.
    pub explanations: bool,
    pub explainer: ExplainerKind,
    /// Background reference points drawn per explanation.
    pub background_size: usize,
    /// Feature orderings sampled per background point.
    pub permutations: usize,
    pub seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            explanations: true,
            explainer: ExplainerKind::Sampling,
            background_size: DEFAULT_BACKGROUND_SIZE,
            permutations: DEFAULT_PERMUTATIONS,
            seed: DEFAULT_SEED,
        }
    }
}

impl PipelineConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PipelineConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.background_size == 0 {
            return Err(ConfigError::Invalid(
                "background_size must be at least 1".to_string(),
            ));
        }
        if self.permutations == 0 {
            return Err(ConfigError::Invalid(
                "permutations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The configured explainer, or `None` when explanations are switched off.
    pub fn build_explainer(&self) -> Option<Box<dyn Explainer>> {
        if !self.explanations {
            return None;
        }
        let explainer: Box<dyn Explainer> = match self.explainer {
            ExplainerKind::Sampling => Box::new(SamplingExplainer::new(
                self.background_size,
                self.permutations,
                self.seed,
            )),
            ExplainerKind::Linear => Box::new(LinearExplainer),
        };
        Some(explainer)
    }
}
