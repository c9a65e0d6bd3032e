//! Configuration for the `peer-review` binary.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Command-line flags (applied by the CLI)
//! 2. Environment variables (`PEER_REVIEW_*`, `<PROVIDER>_BASE_URL`)
//! 3. The TOML file (`--config`, else `peer-review.toml` if present)
//! 4. Built-in defaults
//!
//! API keys are never stored here by default: each provider reads
//! `<PROVIDER>_API_KEY` (or its `api_key_env`) when the router is built.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use coordination::anonymize::{AliasGroup, AliasTable, DEFAULT_PLACEHOLDER};
use coordination::concerns::{DEFAULT_MAX_DESCRIPTION_CHARS, DEFAULT_SIMILARITY_THRESHOLD};
use coordination::prompts::{DEFAULT_METAREVIEW_PROMPT, DEFAULT_REVIEW_PROMPT, DEFAULT_SYSTEM_PROMPT};
use coordination::{ConcernsConfig, SessionConfig, SessionOptions};

/// Looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "peer-review.toml";

const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_TOKENS: u32 = 4_000;
const DEFAULT_TEMPERATURE: f32 = 0.1;
const DEFAULT_META_REVIEWER: &str = "gpt-4o";
const DEFAULT_PROVIDER: &str = "openai";

const ENV_MODELS: &str = "PEER_REVIEW_MODELS";
const ENV_META_REVIEWER: &str = "PEER_REVIEW_META_REVIEWER";
const ENV_TIMEOUT_SECS: &str = "PEER_REVIEW_TIMEOUT_SECS";

/// Wire format spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKind {
    /// `POST {base_url}/chat/completions` (OpenAI, DeepSeek, Together, local servers).
    #[default]
    OpenAi,
    /// `POST {base_url}/messages`.
    Anthropic,
    /// `POST {base_url}/models/{model}:generateContent`.
    Gemini,
}

impl std::fmt::Display for ApiKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
            Self::Gemini => write!(f, "gemini"),
        }
    }
}

/// One HTTP provider (`[providers.<name>]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api: ApiKind,
    pub base_url: String,
    /// Environment variable holding the key; defaults to `<NAME>_API_KEY`.
    pub api_key_env: Option<String>,
    /// Inline key. Prefer the environment.
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api: ApiKind::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: None,
            api_key: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

impl ProviderConfig {
    fn builtin(api: ApiKind, base_url: &str) -> Self {
        Self {
            api,
            base_url: base_url.to_string(),
            ..Self::default()
        }
    }

    /// Name of the environment variable that holds this provider's key.
    pub fn key_env_name(&self, provider: &str) -> String {
        self.api_key_env
            .clone()
            .unwrap_or_else(|| format!("{}_API_KEY", env_prefix(provider)))
    }

    /// Inline key first, then the environment.
    pub fn resolve_api_key(
        &self,
        provider: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| env(&self.key_env_name(provider)))
            .filter(|k| !k.trim().is_empty())
    }
}

/// Where a user-facing model name is served (`[models.<name>]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub provider: String,
    /// Identifier sent to the provider; defaults to the catalog name.
    #[serde(default)]
    pub api_model: Option<String>,
}

impl ModelEntry {
    fn new(provider: &str, api_model: &str) -> Self {
        Self {
            provider: provider.to_string(),
            api_model: Some(api_model.to_string()),
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerReviewConfig {
    pub review_prompt: String,
    pub metareview_prompt: String,
    pub system_prompt: String,
    pub reviewer_models: Vec<String>,
    pub meta_reviewer_model: String,
    pub timeout_secs: u64,
    pub similarity_threshold: f64,
    pub max_description_chars: usize,
    pub placeholder: String,
    pub aliases: Vec<AliasGroup>,
    /// Provider for models that have no catalog entry.
    pub default_provider: String,
    pub providers: BTreeMap<String, ProviderConfig>,
    pub models: BTreeMap<String, ModelEntry>,
}

impl Default for PeerReviewConfig {
    fn default() -> Self {
        let models = builtin_models();
        Self {
            review_prompt: DEFAULT_REVIEW_PROMPT.to_string(),
            metareview_prompt: DEFAULT_METAREVIEW_PROMPT.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            reviewer_models: DEFAULT_REVIEWERS.iter().map(|m| m.to_string()).collect(),
            meta_reviewer_model: DEFAULT_META_REVIEWER.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_description_chars: DEFAULT_MAX_DESCRIPTION_CHARS,
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
            aliases: AliasTable::builtin().groups().to_vec(),
            default_provider: DEFAULT_PROVIDER.to_string(),
            providers: builtin_providers(),
            models,
        }
    }
}

/// Reviewers used when neither the file nor the CLI names any.
const DEFAULT_REVIEWERS: [&str; 6] = [
    "gpt4-o1",
    "gpt4-o3-mini",
    "claude-3.7-sonnet",
    "gemini-2.5-pro",
    "deepseek-r1",
    "llama-4-maverick",
];

fn builtin_providers() -> BTreeMap<String, ProviderConfig> {
    BTreeMap::from([
        (
            "openai".to_string(),
            ProviderConfig::builtin(ApiKind::OpenAi, "https://api.openai.com/v1"),
        ),
        (
            "anthropic".to_string(),
            ProviderConfig::builtin(ApiKind::Anthropic, "https://api.anthropic.com/v1"),
        ),
        (
            "google".to_string(),
            ProviderConfig::builtin(
                ApiKind::Gemini,
                "https://generativelanguage.googleapis.com/v1beta",
            ),
        ),
        (
            "deepseek".to_string(),
            ProviderConfig::builtin(ApiKind::OpenAi, "https://api.deepseek.com/v1"),
        ),
        (
            "together".to_string(),
            ProviderConfig::builtin(ApiKind::OpenAi, "https://api.together.xyz/v1"),
        ),
    ])
}

fn builtin_models() -> BTreeMap<String, ModelEntry> {
    BTreeMap::from([
        ("gpt4-o1".to_string(), ModelEntry::new("openai", "o1")),
        ("gpt4-o3-mini".to_string(), ModelEntry::new("openai", "o3-mini")),
        ("gpt-4o".to_string(), ModelEntry::new("openai", "gpt-4o")),
        (
            "claude-3.7-sonnet".to_string(),
            ModelEntry::new("anthropic", "claude-3-7-sonnet-20250219"),
        ),
        (
            "gemini-2.5-pro".to_string(),
            ModelEntry::new("google", "gemini-2.5-pro"),
        ),
        (
            "deepseek-r1".to_string(),
            ModelEntry::new("deepseek", "deepseek-reasoner"),
        ),
        (
            "llama-4-maverick".to_string(),
            ModelEntry::new("together", "meta-llama/Llama-4-Maverick-17B-128E-Instruct-FP8"),
        ),
    ])
}

/// `deepseek` → `DEEPSEEK`, `my-proxy` → `MY_PROXY`.
fn env_prefix(provider: &str) -> String {
    provider
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

impl PeerReviewConfig {
    /// Load `path`, or `peer-review.toml` if present, or the defaults; then
    /// apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                debug!("no configuration file; using defaults");
                Self::default()
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parse TOML. Built-in providers and models the file does not mention
    /// stay available.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        for (name, provider) in builtin_providers() {
            config.providers.entry(name).or_insert(provider);
        }
        for (name, model) in builtin_models() {
            config.models.entry(name).or_insert(model);
        }
        Ok(config)
    }

    /// Apply `PEER_REVIEW_*` and `<PROVIDER>_BASE_URL` overrides.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(models) = env(ENV_MODELS) {
            self.reviewer_models = split_models(&models);
        }
        if let Some(model) = env(ENV_META_REVIEWER) {
            self.meta_reviewer_model = model.trim().to_string();
        }
        if let Some(secs) = env(ENV_TIMEOUT_SECS) {
            self.timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("{ENV_TIMEOUT_SECS} must be a whole number of seconds"))?;
        }
        for (name, provider) in self.providers.iter_mut() {
            if let Some(url) = env(&format!("{}_BASE_URL", env_prefix(name))) {
                provider.base_url = url;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be greater than zero");
        }
        if !self.providers.contains_key(&self.default_provider) {
            bail!(
                "default_provider '{}' has no [providers.{}] section",
                self.default_provider,
                self.default_provider
            );
        }
        for (model, entry) in &self.models {
            if !self.providers.contains_key(&entry.provider) {
                bail!(
                    "model '{model}' refers to unknown provider '{}'",
                    entry.provider
                );
            }
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Session settings for the review pipeline.
    pub fn session_config(&self, options: SessionOptions) -> SessionConfig {
        SessionConfig {
            reviewer_models: self.reviewer_models.clone(),
            meta_reviewer_model: self.meta_reviewer_model.clone(),
            review_prompt: self.review_prompt.clone(),
            metareview_prompt: self.metareview_prompt.clone(),
            aliases: AliasTable::new(self.aliases.clone()),
            placeholder: self.placeholder.clone(),
            concerns: ConcernsConfig {
                similarity_threshold: self.similarity_threshold,
                max_description_chars: self.max_description_chars,
            },
            call_timeout: self.call_timeout(),
            options,
        }
    }
}

/// Split a comma-separated model list, dropping blanks.
pub fn split_models(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}
