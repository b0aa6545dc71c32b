//! Builds providers from the `TEXT2MEM_*` / `OLLAMA_*` / `OPENAI_*`
//! environment variables spec.md §6 enumerates. Dependency-injected rather
//! than a global singleton so the evaluator and tests swap in mocks
//! (spec.md §9 Design Note "Global singletons -> injected dependencies").

use std::sync::Arc;

use crate::mock::{MockEmbeddingProvider, MockGenerationProvider};
use crate::ollama::{OllamaEmbeddingProvider, OllamaGenerationProvider};
use crate::openai::{OpenAiEmbeddingProvider, OpenAiGenerationProvider};
use crate::traits::{EmbeddingProvider, GenerationProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Mock,
    Ollama,
    OpenAi,
}

impl ProviderKind {
    pub fn from_env_value(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "mock" => Some(Self::Mock),
            "ollama" => Some(Self::Ollama),
            "openai" => Some(Self::OpenAi),
            "auto" => None,
            _ => None,
        }
    }
}

/// Resolves `TEXT2MEM_EMBEDDING_PROVIDER`, falling back to
/// `TEXT2MEM_PROVIDER`, falling back to `mock`.
pub struct ProviderFactory;

impl ProviderFactory {
    pub fn embedding_from_env() -> Arc<dyn EmbeddingProvider> {
        let kind = std::env::var("TEXT2MEM_EMBEDDING_PROVIDER")
            .ok()
            .or_else(|| std::env::var("TEXT2MEM_PROVIDER").ok())
            .and_then(|v| ProviderKind::from_env_value(&v))
            .unwrap_or(ProviderKind::Mock);
        match kind {
            ProviderKind::Mock => Arc::new(MockEmbeddingProvider::new()),
            ProviderKind::Ollama => {
                let base_url = std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| "http://localhost:11434".into());
                let model = std::env::var("TEXT2MEM_EMBEDDING_MODEL").unwrap_or_else(|_| "nomic-embed-text".into());
                Arc::new(OllamaEmbeddingProvider::new(base_url, model, 768))
            }
            ProviderKind::OpenAi => {
                let base_url = std::env::var("OPENAI_API_BASE").unwrap_or_else(|_| "https://api.openai.com/v1".into());
                let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
                let model = std::env::var("TEXT2MEM_EMBEDDING_MODEL").unwrap_or_else(|_| "text-embedding-3-small".into());
                Arc::new(OpenAiEmbeddingProvider::new(base_url, api_key, model, 1536))
            }
        }
    }

    pub fn generation_from_env() -> Arc<dyn GenerationProvider> {
        let kind = std::env::var("TEXT2MEM_GENERATION_PROVIDER")
            .ok()
            .or_else(|| std::env::var("TEXT2MEM_PROVIDER").ok())
            .and_then(|v| ProviderKind::from_env_value(&v))
            .unwrap_or(ProviderKind::Mock);
        match kind {
            ProviderKind::Mock => Arc::new(MockGenerationProvider::new()),
            ProviderKind::Ollama => {
                let base_url = std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| "http://localhost:11434".into());
                let model = std::env::var("TEXT2MEM_GENERATION_MODEL").unwrap_or_else(|_| "llama3".into());
                Arc::new(OllamaGenerationProvider::new(base_url, model))
            }
            ProviderKind::OpenAi => {
                let base_url = std::env::var("OPENAI_API_BASE").unwrap_or_else(|_| "https://api.openai.com/v1".into());
                let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
                let model = std::env::var("TEXT2MEM_GENERATION_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
                Arc::new(OpenAiGenerationProvider::new(base_url, api_key, model))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_or_auto_values_fall_back_to_none() {
        assert_eq!(ProviderKind::from_env_value("auto"), None);
        assert_eq!(ProviderKind::from_env_value("bogus"), None);
        assert_eq!(ProviderKind::from_env_value("Mock"), Some(ProviderKind::Mock));
    }
}
