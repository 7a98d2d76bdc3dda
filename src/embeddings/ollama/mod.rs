#[cfg(test)]
mod tests;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::embeddings::Embedder;
use crate::http::{HttpTransport, TransportError};
use crate::{RagError, Result};

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Embedding client for an Ollama server
#[derive(Debug, Clone)]
pub struct OllamaClient {
    transport: HttpTransport,
    model: String,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ModelsResponse {
    pub(crate) models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .map_err(|e| RagError::Config(format!("Failed to generate Ollama URL: {}", e)))?;

        Ok(Self::with_base_url(
            base_url,
            config.embedding.model.clone(),
            Duration::from_secs(config.embedding.timeout_seconds),
        ))
    }

    #[inline]
    pub fn with_base_url(base_url: Url, model: String, timeout: Duration) -> Self {
        Self {
            transport: HttpTransport::new(base_url, timeout, DEFAULT_RETRY_ATTEMPTS),
            model,
        }
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.transport = self.transport.with_timeout(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.transport = self.transport.with_retry_attempts(attempts);
        self
    }

    #[inline]
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.transport = self.transport.with_backoff_unit(unit);
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Per-request timeout applied to every call
    #[inline]
    pub fn timeout(&self) -> Duration {
        self.transport.timeout()
    }

    /// Test connection to Ollama server and verify model availability
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!(
            "Performing health check for Ollama at {}",
            self.transport.base_url()
        );

        let models = self.list_models()?;
        ensure_model_available(&models, &self.model)?;

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.transport.base_url(),
            self.model
        );
        Ok(())
    }

    /// List all models installed on the server
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response: ModelsResponse = self
            .transport
            .get_json("/api/tags")
            .map_err(|e| embedding_error("Failed to fetch models", e))?;

        debug!("Found {} models", response.models.len());
        Ok(response.models)
    }

    /// Embed a single text
    #[inline]
    pub fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| RagError::EmbeddingService("Ollama returned no embedding".to_string()))
    }
}

impl Embedder for OllamaClient {
    #[inline]
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let response: EmbedResponse = self
            .transport
            .post_json("/api/embed", &request)
            .map_err(|e| embedding_error("Failed to generate embeddings", e))?;

        if response.embeddings.len() != texts.len() {
            return Err(RagError::EmbeddingService(format!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            )));
        }

        debug!(
            "Generated {} embeddings with {} dimensions",
            response.embeddings.len(),
            response.embeddings.first().map_or(0, Vec::len)
        );

        Ok(response.embeddings)
    }

    #[inline]
    fn model_name(&self) -> &str {
        &self.model
    }
}

pub(crate) fn ensure_model_available(models: &[ModelInfo], model: &str) -> Result<()> {
    // Ollama reports untagged models with an implicit ":latest"
    let wanted_latest = format!("{}:latest", model);
    if models
        .iter()
        .any(|m| m.name == model || m.name == wanted_latest)
    {
        debug!("Model {} is available", model);
        return Ok(());
    }

    let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
    warn!(
        "Model {} not found. Available models: {:?}",
        model, available
    );
    Err(RagError::Config(format!(
        "Model '{}' is not available. Available models: {:?}",
        model, available
    )))
}

fn embedding_error(context: &str, error: TransportError) -> RagError {
    match error {
        TransportError::Timeout(message) => RagError::Timeout(format!("{}: {}", context, message)),
        other => RagError::EmbeddingService(format!("{}: {}", context, other)),
    }
}
