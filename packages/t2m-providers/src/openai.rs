//! Thin adapter over the OpenAI-compatible embeddings/chat-completions API.
//! Same minimal-contract stance as [`crate::ollama`].

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::traits::{EmbeddingProvider, EmbeddingResult, GenerationOptions, GenerationProvider, GenerationResult};

pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbeddingProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            dimension,
        }
    }
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingDatum>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<EmbeddingResult> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({"model": self.model, "input": text});
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let mut parsed: OpenAiEmbeddingResponse = resp.json().await.map_err(|e| Error::MalformedResponse {
            provider: self.provider_tag().to_string(),
            message: e.to_string(),
        })?;
        let datum = parsed.data.pop().ok_or_else(|| Error::MalformedResponse {
            provider: self.provider_tag().to_string(),
            message: "empty embeddings response".into(),
        })?;
        let dimension = datum.embedding.len();
        Ok(EmbeddingResult {
            vector: datum.embedding,
            dimension,
            model: self.model.clone(),
            provider: self.provider_tag().to_string(),
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provider_tag(&self) -> &str {
        "openai"
    }
}

pub struct OpenAiGenerationProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiGenerationProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    async fn chat(&self, messages: serde_json::Value, opts: &GenerationOptions) -> Result<GenerationResult> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": opts.temperature,
            "top_p": opts.top_p,
            "max_tokens": opts.max_tokens,
        });
        let mut request = self.client.post(url).bearer_auth(&self.api_key).json(&body);
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
        let parsed: OpenAiChatResponse = resp.json().await.map_err(|e| Error::MalformedResponse {
            provider: self.provider_tag().to_string(),
            message: e.to_string(),
        })?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| Error::MalformedResponse {
            provider: self.provider_tag().to_string(),
            message: "empty choices array".into(),
        })?;
        Ok(GenerationResult {
            text: choice.message.content,
            model: self.model.clone(),
            prompt_tokens: parsed.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens: parsed.usage.as_ref().map(|u| u.completion_tokens),
        })
    }
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[async_trait]
impl GenerationProvider for OpenAiGenerationProvider {
    async fn generate(&self, prompt: &str, opts: &GenerationOptions) -> Result<GenerationResult> {
        let messages = serde_json::json!([{"role": "user", "content": prompt}]);
        self.chat(messages, opts).await
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
        opts: &GenerationOptions,
    ) -> Result<GenerationResult> {
        let messages = serde_json::json!([
            {"role": "system", "content": "Respond with a single JSON document matching the given schema. No prose."},
            {"role": "user", "content": format!("{prompt}\n\nSchema:\n{schema}")},
        ]);
        self.chat(messages, opts).await
    }

    fn provider_tag(&self) -> &str {
        "openai"
    }
}
