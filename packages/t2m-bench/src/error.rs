use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] t2m_core::Error),

    #[error(transparent)]
    Store(#[from] t2m_store::Error),

    #[error(transparent)]
    Provider(#[from] t2m_providers::Error),

    #[error(transparent)]
    Engine(#[from] t2m_engine::Error),

    #[error("failed to parse generated output: {0}")]
    Parse(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}
