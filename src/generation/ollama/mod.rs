
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::config::{Config, GenerationConfig};
use crate::embeddings::ollama::{ModelsResponse, ensure_model_available};
use crate::generation::Generator;
use crate::http::{HttpTransport, TransportError};
use crate::{RagError, Result};

/// A failed generation is surfaced to the caller, never retried
const GENERATION_ATTEMPTS: u32 = 1;

/// Decoding parameters forwarded to Ollama's `options` object
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    pub num_predict: u32,
}

impl From<&GenerationConfig> for GenerationOptions {
    #[inline]
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            repeat_penalty: config.repeat_penalty,
            num_predict: config.max_tokens,
        }
    }
}

/// Text generation client for an Ollama server
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    transport: HttpTransport,
    model: String,
    options: GenerationOptions,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerationOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    eval_count: Option<u64>,
}

impl OllamaGenerator {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .map_err(|e| RagError::Config(format!("Failed to generate Ollama URL: {}", e)))?;

        Ok(Self::with_base_url(
            base_url,
            config.generation.model.clone(),
            GenerationOptions::from(&config.generation),
            Duration::from_secs(config.generation.timeout_seconds),
        ))
    }

    #[inline]
    pub fn with_base_url(
        base_url: Url,
        model: String,
        options: GenerationOptions,
        timeout: Duration,
    ) -> Self {
        Self {
            transport: HttpTransport::new(base_url, timeout, GENERATION_ATTEMPTS),
            model,
            options,
        }
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.transport = self.transport.with_timeout(timeout);
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

    #[inline]
    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    /// Verify the server is reachable and the generation model is installed
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        let response: ModelsResponse = self
            .transport
            .get_json("/api/tags")
            .map_err(|e| generation_error("Failed to fetch models", e))?;
        ensure_model_available(&response.models, &self.model)?;

        info!(
            "Generation model {} is available at {}",
            self.model,
            self.transport.base_url()
        );
        Ok(())
    }
}

impl Generator for OllamaGenerator {
    #[inline]
    fn generate(&self, prompt: &str) -> Result<String> {
        debug!(
            "Generating answer with {} (prompt length: {})",
            self.model,
            prompt.len()
        );

        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: self.options,
        };

        let response: GenerateResponse = self
            .transport
            .post_json("/api/generate", &request)
            .map_err(|e| generation_error("Failed to generate answer", e))?;

        debug!(
            "Generated {} characters ({:?} tokens)",
            response.response.len(),
            response.eval_count
        );

        Ok(response.response)
    }
}

fn generation_error(context: &str, error: TransportError) -> RagError {
    match error {
        TransportError::Timeout(message) => RagError::Timeout(format!("{}: {}", context, message)),
        other => RagError::GenerationService(format!("{}: {}", context, other)),
    }
}
