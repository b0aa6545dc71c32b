//! Per-operation result payloads (spec.md §4.5, §9 Design Note: "adapter
//! operations return Result{success, data, error, meta}" — modeled here as
//! the `Ok` side of `engine::Result`, one struct per op rather than a loose
//! map, since dispatch is already a typed `match`).

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct EncodeResult {
    pub inserted_id: i64,
    pub embedding_dim: Option<usize>,
    pub embedding_model: Option<String>,
    pub embedding_provider: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AffectedRowsResult {
    pub affected_rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrieveResult {
    pub rows: Vec<t2m_core::record::MemoryRecord>,
    pub skipped_incompatible_vectors: usize,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummarizeResult {
    pub summary: String,
    pub count: usize,
    pub source_ids: Vec<i64>,
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeResult {
    pub primary_id: i64,
    pub merged_count: usize,
    pub strategy: String,
    pub reembedded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitOutcome {
    pub parent_id: i64,
    pub split_count: usize,
    pub strategy_used: String,
    pub child_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitResult {
    pub results: Vec<SplitOutcome>,
    pub total_splits: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EngineResult {
    Encode(EncodeResult),
    AffectedRows(AffectedRowsResult),
    Retrieve(RetrieveResult),
    Summarize(SummarizeResult),
    Merge(MergeResult),
    Split(SplitResult),
}
