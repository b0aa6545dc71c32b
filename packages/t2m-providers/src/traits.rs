//! LLM Generation and Embedding contracts (spec.md §6 "External interfaces").
//! Kept minimal on purpose: only the request/response shape matters here,
//! not a full per-vendor client (spec.md §1 "deliberately out of scope").

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub vector: Vec<f32>,
    pub dimension: usize,
    pub model: String,
    pub provider: String,
}

#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    pub model: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<EmbeddingResult>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingResult>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize;
    fn provider_tag(&self) -> &str;
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, prompt: &str, opts: &GenerationOptions) -> Result<GenerationResult>;

    /// Requests JSON-shaped output; `schema` is advisory (a JSON Schema
    /// document passed in the prompt for providers with no native
    /// structured-output mode).
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
        opts: &GenerationOptions,
    ) -> Result<GenerationResult>;

    fn provider_tag(&self) -> &str;
}
