//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the `SecureSupportConfig` struct, which holds the configuration parameters,
//! and a `load_config` function to load the configuration from a YAML file.
//!
//! Only the two service endpoints are required; everything else has a default:
//!
//! ```yaml
//! api_base: "http://localhost:11434/v1"
//! api_key: "ollama"
//! model: "llama3.2:1b"
//! vector_service_url: "http://localhost:8000"
//! vector_api_key: "CHANGEME"
//! # index_name: "support_tickets"
//! # key_path: "/home/me/.config/secsup/encryption_key.bin"
//! # tickets_path: "tickets.json"
//! # persist_key: true
//! # recover_on_mismatch: true
//! # top_k: 3
//! ```
//!
//! # Examples
//!
//! ```no_run
//! use secure_support::config::load_config;
//!
//! let config = load_config("/path/to/config.yaml").unwrap();
//! println!("{:?}", config.index_name);
//! ```

use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf, time::Duration};

use tracing::debug;

use crate::embedder::{DEFAULT_MODEL_ID, EMBEDDING_DIM};
use crate::error::{SupportError, SupportResult};
use crate::vector_service::{DistanceMetric, IndexConfig};

/// Environment variable overriding [`SecureSupportConfig::vector_api_key`].
pub const VECTOR_API_KEY_ENV: &str = "SECSUP_VECTOR_API_KEY";

/// Environment variable overriding [`SecureSupportConfig::api_key`].
pub const LLM_API_KEY_ENV: &str = "SECSUP_LLM_API_KEY";

/// Represents the application's configuration.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct SecureSupportConfig {
    /// The API key used to authenticate requests to the LLM API.
    pub api_key: String,

    /// The base URL of the OpenAI-compatible LLM API.
    pub api_base: String,

    /// The name of the model to be used for generating answers.
    pub model: String,

    // The context size of the model.
    #[serde(default = "default_context_max_tokens")]
    pub context_max_tokens: u16,

    // Tokens kept free for the answer when stuffing tickets into the prompt.
    #[serde(default = "default_answer_reserve_tokens")]
    pub answer_reserve_tokens: u16,

    // Stop words
    #[serde(default)]
    pub stop_words: Vec<String>,

    /// Base URL of the encrypted vector service.
    pub vector_service_url: String,

    /// API key for the encrypted vector service.
    #[serde(default)]
    pub vector_api_key: String,

    /// Seconds before a vector service request is abandoned. Unset means no timeout.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    /// Logical name of the encrypted index.
    #[serde(default = "default_index_name")]
    pub index_name: String,

    /// Where the encryption key blob lives. Defaults to `<config_dir>/encryption_key.bin`.
    #[serde(default)]
    pub key_path: Option<PathBuf>,

    /// Ticket document used for indexing and for re-indexing after recovery.
    #[serde(default = "default_tickets_path")]
    pub tickets_path: Option<PathBuf>,

    /// Keep the key on disk. When false the key only lives for the process.
    #[serde(default = "default_true")]
    pub persist_key: bool,

    /// Rebuild the index when the local key no longer opens it.
    #[serde(default = "default_true")]
    pub recover_on_mismatch: bool,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    #[serde(default)]
    pub metric: DistanceMetric,

    /// Name of the answer template under `<config_dir>/templates/`.
    #[serde(default)]
    pub template: Option<String>,
}

fn default_context_max_tokens() -> u16 {
    4096
}

fn default_answer_reserve_tokens() -> u16 {
    512
}

fn default_index_name() -> String {
    "support_tickets".to_string()
}

fn default_tickets_path() -> Option<PathBuf> {
    Some(PathBuf::from("tickets.json"))
}

fn default_true() -> bool {
    true
}

fn default_top_k() -> usize {
    3
}

fn default_embedding_model() -> String {
    DEFAULT_MODEL_ID.to_string()
}

fn default_embedding_dimension() -> usize {
    EMBEDDING_DIM
}

impl Default for SecureSupportConfig {
    fn default() -> Self {
        Self {
            api_key: "ollama".to_string(),
            api_base: "http://localhost:11434/v1".to_string(),
            model: "llama3.2:1b".to_string(),
            context_max_tokens: default_context_max_tokens(),
            answer_reserve_tokens: default_answer_reserve_tokens(),
            stop_words: Vec::new(),
            vector_service_url: "http://localhost:8000".to_string(),
            vector_api_key: "CHANGEME".to_string(),
            request_timeout_secs: None,
            index_name: default_index_name(),
            key_path: None,
            tickets_path: default_tickets_path(),
            persist_key: true,
            recover_on_mismatch: true,
            top_k: default_top_k(),
            embedding_model: default_embedding_model(),
            embedding_dimension: default_embedding_dimension(),
            metric: DistanceMetric::default(),
            template: None,
        }
    }
}

impl SecureSupportConfig {
    /// Key file location, falling back to `<config_dir>/encryption_key.bin`.
    pub fn resolved_key_path(&self) -> SupportResult<PathBuf> {
        match &self.key_path {
            Some(path) => Ok(path.clone()),
            None => crate::config_dir()
                .map(|dir| dir.join("encryption_key.bin"))
                .map_err(|e| SupportError::Config(e.to_string())),
        }
    }

    pub fn index_config(&self) -> IndexConfig {
        IndexConfig {
            dimension: self.embedding_dimension,
            metric: self.metric,
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Token budget for retrieved ticket text inside the prompt.
    pub fn context_token_budget(&self) -> usize {
        self.context_max_tokens
            .saturating_sub(self.answer_reserve_tokens) as usize
    }

    /// Replace API keys with values from the environment when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = env::var(VECTOR_API_KEY_ENV) {
            debug!("Using vector API key from {VECTOR_API_KEY_ENV}");
            self.vector_api_key = key;
        }
        if let Ok(key) = env::var(LLM_API_KEY_ENV) {
            debug!("Using LLM API key from {LLM_API_KEY_ENV}");
            self.api_key = key;
        }
    }

    fn validate(&self) -> SupportResult<()> {
        if self.top_k == 0 {
            return Err(SupportError::Config("top_k must be at least 1".into()));
        }
        if self.embedding_dimension == 0 {
            return Err(SupportError::Config(
                "embedding_dimension must be at least 1".into(),
            ));
        }
        if self.index_name.trim().is_empty() {
            return Err(SupportError::Config("index_name must not be empty".into()));
        }
        Ok(())
    }
}

/// Loads the application's configuration from a YAML file.
///
/// Environment overrides are not applied here; see
/// [`SecureSupportConfig::apply_env_overrides`].
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid YAML for
/// [`SecureSupportConfig`], or holds out-of-range values.
pub fn load_config(file: &str) -> SupportResult<SecureSupportConfig> {
    debug!("Loading config from {file}");
    let content = fs::read_to_string(file)?;
    let config: SecureSupportConfig = serde_yaml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}
