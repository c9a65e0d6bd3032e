//! HTTP providers and the model router.
//!
//! `ProviderRouter` implements [`Backend`]: it maps a model name from the
//! catalog to its provider and provider-side identifier, then makes one
//! request through that provider's `ProviderClient`. Names without a catalog
//! entry go to the default provider unchanged.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use coordination::{Backend, BackendError};

use crate::config::{ApiKind, ModelEntry, PeerReviewConfig, ProviderConfig};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Longest error body kept in a `BackendError`.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Slack on top of the per-call timeout so the pipeline's own timeout fires
/// first and is reported as such.
const HTTP_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

/// One configured provider endpoint.
pub struct ProviderClient {
    name: String,
    api: ApiKind,
    base_url: String,
    api_key: Option<String>,
    system_prompt: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl ProviderClient {
    pub fn new(
        name: &str,
        settings: &ProviderConfig,
        api_key: Option<String>,
        system_prompt: &str,
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.to_string(),
            api: settings.api,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            system_prompt: system_prompt.to_string(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn api(&self) -> ApiKind {
        self.api
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Send `prompt` to `api_model` and return the generated text.
    pub async fn complete(&self, api_model: &str, prompt: &str) -> Result<String, BackendError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BackendError::MissingApiKey {
                provider: self.name.clone(),
            })?;

        let request = match self.api {
            ApiKind::OpenAi => self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(api_key)
                .json(&openai_body(
                    api_model,
                    &self.system_prompt,
                    prompt,
                    self.max_tokens,
                    self.temperature,
                )),
            ApiKind::Anthropic => self
                .client
                .post(format!("{}/messages", self.base_url))
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&anthropic_body(
                    api_model,
                    &self.system_prompt,
                    prompt,
                    self.max_tokens,
                    self.temperature,
                )),
            ApiKind::Gemini => self
                .client
                .post(format!(
                    "{}/models/{}:generateContent",
                    self.base_url, api_model
                ))
                .query(&[("key", api_key)])
                .json(&gemini_body(
                    &self.system_prompt,
                    prompt,
                    self.max_tokens,
                    self.temperature,
                )),
        };

        let start = Instant::now();
        let response = request.send().await.map_err(BackendError::transport)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::HttpStatus {
                status,
                body: truncate(&body, MAX_ERROR_BODY_CHARS),
            });
        }

        let body: Value = response.json().await.map_err(BackendError::malformed)?;
        let text = extract_text(self.api, &body)?;
        debug!(
            provider = %self.name,
            model = %api_model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            chars = text.len(),
            "provider call complete"
        );
        Ok(text)
    }
}

/// Chat-completions request body.
pub fn openai_body(
    model: &str,
    system_prompt: &str,
    prompt: &str,
    max_tokens: u32,
    temperature: f32,
) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": system_prompt },
            { "role": "user", "content": prompt }
        ],
        "max_tokens": max_tokens,
        "temperature": temperature
    })
}

/// Messages API request body.
pub fn anthropic_body(
    model: &str,
    system_prompt: &str,
    prompt: &str,
    max_tokens: u32,
    temperature: f32,
) -> Value {
    json!({
        "model": model,
        "max_tokens": max_tokens,
        "temperature": temperature,
        "system": system_prompt,
        "messages": [{ "role": "user", "content": prompt }]
    })
}

/// generateContent request body.
pub fn gemini_body(system_prompt: &str, prompt: &str, max_tokens: u32, temperature: f32) -> Value {
    json!({
        "systemInstruction": { "parts": [{ "text": system_prompt }] },
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": {
            "temperature": temperature,
            "maxOutputTokens": max_tokens
        }
    })
}

/// Pull the generated text out of a provider response.
pub fn extract_text(api: ApiKind, body: &Value) -> Result<String, BackendError> {
    let text = match api {
        ApiKind::OpenAi => body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string),
        ApiKind::Anthropic => joined_text(
            body["content"]
                .as_array()
                .map(|blocks| {
                    blocks
                        .iter()
                        .filter(|b| b["type"].as_str().map_or(true, |t| t == "text"))
                        .collect()
                })
                .unwrap_or_default(),
        ),
        ApiKind::Gemini => joined_text(
            body["candidates"][0]["content"]["parts"]
                .as_array()
                .map(|parts| parts.iter().collect())
                .unwrap_or_default(),
        ),
    };

    text.ok_or_else(|| {
        let detail = body
            .get("error")
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no text in response".to_string());
        BackendError::malformed(detail)
    })
}

fn joined_text(parts: Vec<&Value>) -> Option<String> {
    let texts: Vec<&str> = parts.iter().filter_map(|p| p["text"].as_str()).collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.concat())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}…", &text[..end]),
        None => text.to_string(),
    }
}

/// A catalog line for `list-models`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelListing {
    pub name: String,
    pub provider: String,
    pub api_model: String,
    pub key_configured: bool,
}

/// Routes model names to provider clients.
pub struct ProviderRouter {
    providers: HashMap<String, ProviderClient>,
    models: BTreeMap<String, ModelEntry>,
    default_provider: String,
}

impl ProviderRouter {
    /// Build clients for every configured provider, reading API keys from
    /// the process environment.
    pub fn from_config(config: &PeerReviewConfig) -> Result<Self> {
        Self::with_env(config, |key| std::env::var(key).ok())
    }

    pub fn with_env(config: &PeerReviewConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.call_timeout() + HTTP_TIMEOUT_SLACK)
            .build()
            .context("Failed to create HTTP client")?;

        let providers = config
            .providers
            .iter()
            .map(|(name, settings)| {
                let api_key = settings.resolve_api_key(name, &env);
                if api_key.is_none() {
                    debug!(provider = %name, env = %settings.key_env_name(name), "no API key configured");
                }
                let provider =
                    ProviderClient::new(name, settings, api_key, &config.system_prompt, client.clone());
                (name.clone(), provider)
            })
            .collect();

        Ok(Self {
            providers,
            models: config.models.clone(),
            default_provider: config.default_provider.clone(),
        })
    }

    /// Provider and provider-side model identifier for `model`.
    pub fn resolve(&self, model: &str) -> Result<(&ProviderClient, String), BackendError> {
        let (provider_name, api_model) = match self.models.get(model) {
            Some(entry) => (
                entry.provider.as_str(),
                entry.api_model.clone().unwrap_or_else(|| model.to_string()),
            ),
            None => (self.default_provider.as_str(), model.to_string()),
        };
        let provider = self
            .providers
            .get(provider_name)
            .ok_or_else(|| BackendError::UnknownModel {
                model: model.to_string(),
            })?;
        Ok((provider, api_model))
    }

    /// Catalog entries in name order.
    pub fn catalog(&self) -> Vec<ModelListing> {
        self.models
            .iter()
            .map(|(name, entry)| ModelListing {
                name: name.clone(),
                provider: entry.provider.clone(),
                api_model: entry.api_model.clone().unwrap_or_else(|| name.clone()),
                key_configured: self
                    .providers
                    .get(&entry.provider)
                    .is_some_and(ProviderClient::has_api_key),
            })
            .collect()
    }
}

#[async_trait]
impl Backend for ProviderRouter {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, BackendError> {
        let (provider, api_model) = self.resolve(model)?;
        debug!(model, provider = %provider.name(), api_model = %api_model, "routing request");
        provider.complete(&api_model, prompt).await.inspect_err(|e| {
            warn!(model, provider = %provider.name(), error = %e, "provider call failed");
        })
    }
}
