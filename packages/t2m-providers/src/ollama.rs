//! Thin adapter over Ollama's `/api/embeddings` and `/api/generate`. Only
//! the request/response contract from spec.md §6 is implemented; retries,
//! pooling, and backoff are the pipeline controller's job (`t2m-bench`).

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::traits::{EmbeddingProvider, EmbeddingResult, GenerationOptions, GenerationProvider, GenerationResult};

pub struct OllamaEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OllamaEmbeddingProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            dimension,
        }
    }
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<EmbeddingResult> {
        let url = format!("{}/api/embeddings", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({"model": self.model, "prompt": text});
        let resp = self.client.post(url).json(&body).send().await?;
        let parsed: OllamaEmbeddingResponse = resp.json().await.map_err(|e| Error::MalformedResponse {
            provider: self.provider_tag().to_string(),
            message: e.to_string(),
        })?;
        let dimension = parsed.embedding.len();
        Ok(EmbeddingResult {
            vector: parsed.embedding,
            dimension,
            model: self.model.clone(),
            provider: self.provider_tag().to_string(),
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provider_tag(&self) -> &str {
        "ollama"
    }
}

pub struct OllamaGenerationProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaGenerationProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[async_trait]
impl GenerationProvider for OllamaGenerationProvider {
    async fn generate(&self, prompt: &str, opts: &GenerationOptions) -> Result<GenerationResult> {
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let mut body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });
        if let Some(temperature) = opts.temperature {
            body["options"] = serde_json::json!({"temperature": temperature, "top_p": opts.top_p});
        }
        let mut request = self.client.post(url).json(&body);
        if let Some(timeout) = opts.timeout {
            request = request.timeout(timeout);
        }
        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout {
                    provider: self.provider_tag().to_string(),
                }
            } else {
                Error::Http(e)
            }
        })?;
        let parsed: OllamaGenerateResponse = resp.json().await.map_err(|e| Error::MalformedResponse {
            provider: self.provider_tag().to_string(),
            message: e.to_string(),
        })?;
        Ok(GenerationResult {
            text: parsed.response,
            model: self.model.clone(),
            prompt_tokens: None,
            completion_tokens: None,
        })
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
        opts: &GenerationOptions,
    ) -> Result<GenerationResult> {
        let augmented = format!(
            "{prompt}\n\nRespond with JSON matching this schema only, no commentary:\n{schema}"
        );
        self.generate(&augmented, opts).await
    }

    fn provider_tag(&self) -> &str {
        "ollama"
    }
}
