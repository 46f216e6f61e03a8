//! Generation Service Abstraction
//!
//! Contract the pipeline needs from the external generative service: document upload,
//! generation over uploaded references, and best-effort deletion. The HTTP client is
//! constructed once at the composition root and shared behind `Arc<dyn GenerationService>`.

use crate::assembler::GenerationRequest;
use crate::error::ProviderError;
use crate::types::RemoteRef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod envelope;
pub mod http;

pub use envelope::{strip_code_fence, Extracted, ResponseEnvelope};
pub use http::HttpGenerationService;

/// A document ready to be sent to the service (after any conversion).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedDocument {
    pub name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

/// Sampling options for a generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: Some(0.4),
            max_output_tokens: Some(8192),
        }
    }
}

/// Generation service client trait
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Upload one document and return the service's reference to it
    async fn upload(&self, document: &PreparedDocument) -> Result<RemoteRef, ProviderError>;

    /// Run one generation over previously uploaded documents
    async fn generate(
        &self,
        request: &GenerationRequest,
        options: &GenerationOptions,
    ) -> Result<ResponseEnvelope, ProviderError>;

    /// Delete an uploaded document
    async fn delete(&self, remote: &RemoteRef) -> Result<(), ProviderError>;

    /// Get the provider name
    fn provider_name(&self) -> &str;
}

/// Provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the generation service API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key; takes precedence over `api_key_env`
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub max_output_tokens: Option<u32>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Generation calls run for minutes; keep this well above typical latency
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8088/v1".to_string()
}

fn default_api_key_env() -> String {
    "EXAMGEN_API_KEY".to_string()
}

fn default_model() -> String {
    "exam-writer-large".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    600
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: None,
            max_output_tokens: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("Model name cannot be empty".to_string());
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(format!(
                "Base URL must start with http:// or https://, got '{}'",
                self.base_url
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be at least 1".to_string());
        }
        Ok(())
    }

    /// Resolve the API key from config, then the configured environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok().filter(|key| !key.is_empty()))
    }

    pub fn generation_options(&self) -> GenerationOptions {
        let defaults = GenerationOptions::default();
        GenerationOptions {
            model: self.model.clone(),
            temperature: self.temperature.or(defaults.temperature),
            max_output_tokens: self.max_output_tokens.or(defaults.max_output_tokens),
        }
    }
}
