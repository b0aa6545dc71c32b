//! The MemoryEngine: interprets a validated [`t2m_core::Ir`] against a
//! [`t2m_store::MemoryStore`], calling out to embedding/generation
//! providers where an operation needs one (spec.md §2, §4.5).

pub mod engine;
pub mod error;
pub mod ranking;
pub mod result;
pub mod split;
pub mod target;

pub use engine::MemoryEngine;
pub use error::{Error, Result};
pub use ranking::RankingWeights;
pub use result::{
    AffectedRowsResult, EncodeResult, EngineResult, MergeResult, RetrieveResult, SplitOutcome, SplitResult,
    SummarizeResult,
};
