use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] t2m_core::Error),

    #[error(transparent)]
    Storage(#[from] t2m_store::Error),

    #[error(transparent)]
    Provider(#[from] t2m_providers::Error),

    #[error("target '{0}' matched no rows")]
    NoMatch(String),

    #[error("record {0} is locked read-only")]
    Locked(i64),
}
