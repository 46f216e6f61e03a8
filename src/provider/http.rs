//! HTTP client for the generation service.

use super::{GenerationOptions, GenerationService, PreparedDocument, ProviderConfig, ResponseEnvelope};
use crate::assembler::GenerationRequest;
use crate::error::{ProviderError, UpstreamErrorKind};
use crate::types::RemoteRef;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct DocumentRefBody<'a> {
    uri: &'a str,
    mime_type: &'a str,
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    documents: Vec<DocumentRefBody<'a>>,
    instructions: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct UploadResponse {
    uri: String,
    mime_type: Option<String>,
}

fn map_transport_error(error: reqwest::Error) -> ProviderError {
    if let Some(status) = error.status() {
        return ProviderError::upstream(
            UpstreamErrorKind::from_status(status.as_u16()),
            format!("Request failed with status {}: {}", status, error),
        );
    }
    if error.is_timeout() {
        ProviderError::Transport(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        ProviderError::Transport(format!("Connection error: {}", error))
    } else {
        ProviderError::Transport(format!("HTTP error: {}", error))
    }
}

async fn error_for_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    if status == StatusCode::UNSUPPORTED_MEDIA_TYPE {
        return Err(ProviderError::UnsupportedFormat(error_text));
    }
    let kind = match UpstreamErrorKind::from_status(status.as_u16()) {
        UpstreamErrorKind::SafetyBlocked(_) => UpstreamErrorKind::SafetyBlocked(error_text.clone()),
        other => other,
    };
    Err(ProviderError::upstream(
        kind,
        format!("Request failed with status {}: {}", status, error_text),
    ))
}

/// Generation service reached over HTTP
pub struct HttpGenerationService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpGenerationService {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ProviderError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.resolve_api_key(),
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }

    fn file_url(&self, remote: &RemoteRef) -> String {
        if remote.uri.starts_with("http://") || remote.uri.starts_with("https://") {
            remote.uri.clone()
        } else {
            format!("{}/{}", self.base_url, remote.uri.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl GenerationService for HttpGenerationService {
    async fn upload(&self, document: &PreparedDocument) -> Result<RemoteRef, ProviderError> {
        let url = format!("{}/files", self.base_url);
        let response = self
            .authorized(self.client.post(&url))
            .header("Content-Type", document.mime_type.as_str())
            .header("X-File-Name", document.name.as_str())
            .body(document.content.clone())
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = error_for_status(response).await?;

        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transport(format!("Failed to parse upload response: {}", e)))?;

        debug!(name = %document.name, uri = %uploaded.uri, "Document uploaded");
        Ok(RemoteRef::new(
            uploaded.uri,
            uploaded
                .mime_type
                .unwrap_or_else(|| document.mime_type.clone()),
        ))
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        options: &GenerationOptions,
    ) -> Result<ResponseEnvelope, ProviderError> {
        let body = GenerateBody {
            model: &options.model,
            documents: request
                .document_refs
                .iter()
                .map(|r| DocumentRefBody {
                    uri: &r.uri,
                    mime_type: &r.mime_type,
                })
                .collect(),
            instructions: &request.instructions,
            temperature: options.temperature,
            max_output_tokens: options.max_output_tokens,
        };

        let url = format!("{}/generate", self.base_url);
        let response = self
            .authorized(self.client.post(&url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = error_for_status(response).await?;

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Transport(format!("Failed to parse response: {}", e)))?;
        Ok(ResponseEnvelope::from_json(value))
    }

    async fn delete(&self, remote: &RemoteRef) -> Result<(), ProviderError> {
        let response = self
            .authorized(self.client.delete(self.file_url(remote)))
            .send()
            .await
            .map_err(map_transport_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        error_for_status(response).await?;
        Ok(())
    }

    fn provider_name(&self) -> &str {
        "http"
    }
}
