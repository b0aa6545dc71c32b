use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Storage errors: every SQL failure is wrapped here rather than leaking
/// `rusqlite::Error` across the engine boundary (spec.md §7 "Storage error").
#[derive(Error, Debug)]
pub enum Error {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("record {0} not found")]
    NotFound(i64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
