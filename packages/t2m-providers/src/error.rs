use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Provider errors: LLM timeout or malformed response (spec.md §7
/// "Provider error" — per-task retry lives in `t2m-bench`, not here).
#[derive(Error, Debug)]
pub enum Error {
    #[error("request to {provider} timed out")]
    Timeout { provider: String },

    #[error("{provider} returned a malformed response: {message}")]
    MalformedResponse { provider: String, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
