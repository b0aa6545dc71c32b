//! Per-sample evaluation: sandbox store, prerequisites, the program under
//! test, assertions, ranking, and triggers (spec.md §4.6, grounded on
//! `original_source/bench/core/runner.py`).

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use t2m_core::ir::Ir;
use t2m_core::sample::{GenerationSample, RankingSpec};
use t2m_providers::{EmbeddingProvider, GenerationProvider};
use t2m_engine::{EngineResult, MemoryEngine};
use t2m_store::MemoryStore;

use crate::assertions::{AssertionCompiler, AssertionOutcome};
use crate::clock::VirtualClock;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingOutcome {
    pub hits: Vec<i64>,
    pub missed: Vec<i64>,
    pub extras: Vec<i64>,
    pub precision: f64,
    pub recall: f64,
    pub passed: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerOutcome {
    pub advance: String,
    pub assertions: Vec<AssertionOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleOutcome {
    pub sample_id: String,
    pub passed: bool,
    pub timed_out: bool,
    pub errors: Vec<String>,
    pub assertions: Vec<AssertionOutcome>,
    pub ranking: Option<RankingOutcome>,
    pub triggers: Vec<TriggerOutcome>,
    pub duration_ms: u64,
}

impl SampleOutcome {
    fn failed(sample_id: &str, errors: Vec<String>) -> Self {
        Self {
            sample_id: sample_id.to_string(),
            passed: false,
            timed_out: false,
            errors,
            assertions: Vec::new(),
            ranking: None,
            triggers: Vec::new(),
            duration_ms: 0,
        }
    }
}

/// Executes one [`GenerationSample`] against a fresh sandbox store and
/// reports whether it passes (spec.md §4.6).
pub struct TestRunner {
    snapshot_dir: Option<PathBuf>,
    eval_timeout: Duration,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    /// Whether the embedding provider is the mock one — controls the
    /// pass-with-warning downgrade for insufficient ranking hits (spec.md §9
    /// Open Question, toggleable per the same note).
    embedding_is_mock: bool,
    downgrade_insufficient_hits: bool,
}

impl TestRunner {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
        embedding_is_mock: bool,
        eval_timeout: Duration,
    ) -> Self {
        Self {
            snapshot_dir: None,
            eval_timeout,
            embedder,
            generator,
            embedding_is_mock,
            downgrade_insufficient_hits: true,
        }
    }

    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    /// Disables the mock-provider ranking downgrade, so insufficient hits
    /// hard-fail even under the mock embedding provider.
    pub fn without_ranking_downgrade(mut self) -> Self {
        self.downgrade_insufficient_hits = false;
        self
    }

    pub async fn run_sample(&self, sample: &GenerationSample) -> Result<SampleOutcome> {
        let start = Instant::now();
        let timeout = tokio::time::timeout(self.eval_timeout, self.run_sample_inner(sample)).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        match timeout {
            Ok(result) => {
                let mut outcome = result?;
                outcome.duration_ms = duration_ms;
                Ok(outcome)
            }
            Err(_) => {
                let mut outcome = SampleOutcome::failed(
                    &sample.id,
                    vec![format!("sample exceeded {:?} evaluation budget", self.eval_timeout)],
                );
                outcome.timed_out = true;
                outcome.duration_ms = duration_ms;
                Ok(outcome)
            }
        }
    }

    async fn run_sample_inner(&self, sample: &GenerationSample) -> Result<SampleOutcome> {
        let store = Arc::new(self.open_sandbox_store(sample.init_db.as_deref())?);
        let engine = MemoryEngine::new(store.clone(), self.embedder.clone(), self.generator.clone());

        let now = sample
            .expected
            .meta
            .as_ref()
            .and_then(|m| m.eval_time_utc.as_deref())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let mut errors = Vec::new();

        for ir in &sample.prerequisites {
            if let Err(e) = engine.execute(ir, now).await {
                errors.push(format!("prerequisite failed: {e}"));
            }
        }

        let mut last_retrieve: Option<(Ir, EngineResult)> = None;
        for ir in &sample.schema_list {
            match engine.execute(ir, now).await {
                Ok(result) => {
                    if matches!(result, EngineResult::Retrieve(_)) {
                        last_retrieve = Some((ir.clone(), result));
                    }
                }
                Err(e) => errors.push(format!("schema_list op `{}` failed: {e}", ir.op_name())),
            }
        }

        let mut assertion_outcomes = Vec::with_capacity(sample.expected.assertions.len());
        for spec in &sample.expected.assertions {
            assertion_outcomes.push(AssertionCompiler::evaluate(&store, spec)?);
        }
        let assertions_passed = assertion_outcomes.iter().all(|a| a.passed);

        let ranking = match &sample.expected.ranking {
            Some(ranking_spec) => Some(
                self.evaluate_ranking(&engine, ranking_spec, last_retrieve.as_ref(), now)
                    .await?,
            ),
            None => None,
        };
        let ranking_passed = ranking.as_ref().map(|r| r.passed).unwrap_or(true);

        let mut trigger_outcomes = Vec::with_capacity(sample.expected.triggers.len());
        let clock = VirtualClock::starting_at(now);
        for block in &sample.expected.triggers {
            clock.advance(&block.advance)?;
            let advanced_now = clock.now();
            Self::reap_expired(&store, advanced_now)?;
            let mut results = Vec::with_capacity(block.assertions.len());
            for spec in &block.assertions {
                results.push(Self::evaluate_with_now(&store, spec, advanced_now)?);
            }
            trigger_outcomes.push(TriggerOutcome {
                advance: block.advance.clone(),
                assertions: results,
            });
        }
        let triggers_passed = trigger_outcomes
            .iter()
            .all(|t| t.assertions.iter().all(|a| a.passed));

        let passed = errors.is_empty() && assertions_passed && ranking_passed && triggers_passed;

        Ok(SampleOutcome {
            sample_id: sample.id.clone(),
            passed,
            timed_out: false,
            errors,
            assertions: assertion_outcomes,
            ranking,
            triggers: trigger_outcomes,
            duration_ms: 0,
        })
    }

    /// `init_db` snapshot loading prefers a `.sql` script over a `.db` file
    /// of the same id when both exist (spec.md §9 Open Question, "keep the
    /// source's preference").
    fn open_sandbox_store(&self, init_db: Option<&str>) -> Result<MemoryStore> {
        let Some(id) = init_db else {
            return Ok(MemoryStore::open_in_memory()?);
        };
        let Some(dir) = &self.snapshot_dir else {
            return Err(Error::Config(format!(
                "sample requests init_db `{id}` but no snapshot directory was configured"
            )));
        };
        let sql_path = dir.join(format!("{id}.sql"));
        if sql_path.exists() {
            let script = std::fs::read_to_string(&sql_path)?;
            return Ok(MemoryStore::open_in_memory_from_script(&script)?);
        }
        let db_path = dir.join(format!("{id}.db"));
        if db_path.exists() {
            return Ok(MemoryStore::open_file(&db_path)?);
        }
        Err(Error::Config(format!(
            "no snapshot found for init_db `{id}` under {}",
            dir.display()
        )))
    }

    /// Applies each expired row's `expire_action` against the advanced
    /// virtual clock. The engine only ever schedules `expire_at`/`expire_action`
    /// (spec.md §4.5 Expire); the harness's trigger evaluation is the policy
    /// that actually reaps, which is what lets scenario S5's assertion on
    /// `deleted` count observe anything after an `advance`.
    fn reap_expired(store: &MemoryStore, now: DateTime<Utc>) -> Result<usize> {
        let rows = store.query_where("deleted=0 AND expire_at IS NOT NULL", &[])?;
        let mut reaped = 0usize;
        for mut rec in rows {
            if !rec.is_past_expiry(&now) {
                continue;
            }
            match rec.expire_action {
                Some(t2m_core::record::ExpireAction::SoftDelete) | None => {
                    store.soft_delete(&[rec.id])?;
                }
                Some(t2m_core::record::ExpireAction::HardDelete) => {
                    store.hard_delete(&[rec.id])?;
                }
                Some(t2m_core::record::ExpireAction::Demote) => {
                    rec.weight = 0.0;
                    store.replace(&rec, &now.to_rfc3339())?;
                }
                Some(t2m_core::record::ExpireAction::Anonymize) => {
                    rec.text = String::new();
                    rec.subject = None;
                    rec.location = None;
                    rec.topic = None;
                    rec.tags = Vec::new();
                    store.replace(&rec, &now.to_rfc3339())?;
                }
            }
            reaped += 1;
        }
        Ok(reaped)
    }

    /// Binds the trigger-advanced "now" into the assertion's params under
    /// `:now`, available to any `where` clause that references it (spec.md
    /// §4.6 step 7).
    fn evaluate_with_now(store: &MemoryStore, spec: &t2m_core::sample::AssertionSpec, now: DateTime<Utc>) -> Result<AssertionOutcome> {
        let mut spec = spec.clone();
        spec.params.insert("now".to_string(), serde_json::json!(now.to_rfc3339()));
        AssertionCompiler::evaluate(store, &spec)
    }

    /// Re-runs a search-shaped ranking query against the engine when the
    /// sample's own Retrieve was filter-based; otherwise reuses the rows the
    /// engine already returned (spec.md §4.6 step 6).
    async fn evaluate_ranking(
        &self,
        engine: &MemoryEngine,
        ranking: &RankingSpec,
        last_retrieve: Option<&(Ir, EngineResult)>,
        now: DateTime<Utc>,
    ) -> Result<RankingOutcome> {
        // A filter-targeted Retrieve's rows are reused as-is; a
        // search-targeted one is re-run from the ranking's own query/topk,
        // since the sample's own `overrides.k` may differ from `topk`
        // (spec.md §4.6 step 6).
        let reuse_existing = matches!(
            last_retrieve,
            Some((ir, _)) if ir.target.as_ref().map(|t| t.filter.is_some() && t.search.is_none()).unwrap_or(false)
        );

        let retrieved_ids: Vec<i64> = if reuse_existing {
            match &last_retrieve.unwrap().1 {
                EngineResult::Retrieve(r) => r.rows.iter().map(|row| row.id).collect(),
                _ => Vec::new(),
            }
        } else {
            let ir = Ir::from_value(serde_json::json!({
                "stage": "RET",
                "op": "Retrieve",
                "target": {"search": {"intent": {"query": ranking.query}}, "limit": ranking.topk},
                "args": {}
            }))?;
            match engine.execute(&ir, now).await? {
                EngineResult::Retrieve(r) => r.rows.iter().map(|row| row.id).collect(),
                _ => Vec::new(),
            }
        };

        let gold: HashSet<i64> = ranking
            .gold_ids
            .iter()
            .filter_map(|s| s.parse::<i64>().ok())
            .collect();
        let retrieved: HashSet<i64> = retrieved_ids.into_iter().collect();

        let hits: Vec<i64> = retrieved.intersection(&gold).copied().collect();
        let missed: Vec<i64> = gold.difference(&retrieved).copied().collect();
        let extras: Vec<i64> = retrieved.difference(&gold).copied().collect();

        let precision = if retrieved.is_empty() {
            0.0
        } else {
            hits.len() as f64 / retrieved.len() as f64
        };
        let recall = if gold.is_empty() {
            1.0
        } else {
            hits.len() as f64 / gold.len() as f64
        };

        let structurally_passes = hits.len() >= ranking.min_hits && (ranking.allow_extra || extras.is_empty());

        let (passed, message) = if !structurally_passes && self.embedding_is_mock && self.downgrade_insufficient_hits {
            (
                true,
                Some(format!(
                    "ranking had {} hits < min_hits {} under the mock embedding provider; downgraded to a warning",
                    hits.len(),
                    ranking.min_hits
                )),
            )
        } else {
            (structurally_passes, None)
        };

        Ok(RankingOutcome {
            hits,
            missed,
            extras,
            precision,
            recall,
            passed,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use t2m_core::sample::{Classification, Expected, InstructionType, Structure};
    use t2m_providers::mock::{MockEmbeddingProvider, MockGenerationProvider};

    fn sample_with(schema_list: Vec<Ir>, expected: Expected) -> GenerationSample {
        GenerationSample {
            id: "t2m-en-direct-single-enc-001".into(),
            classification: Classification {
                lang: "en".into(),
                instruction_type: InstructionType::Direct,
                structure: Structure::Single,
            },
            nl: HashMap::from([("en".into(), "remember this".into())]),
            prerequisites: vec![],
            schema_list,
            init_db: None,
            expected,
            notes: None,
        }
    }

    fn runner() -> TestRunner {
        TestRunner::new(
            Arc::new(MockEmbeddingProvider::with_dimension(16)),
            Arc::new(MockGenerationProvider::default()),
            true,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn sample_passes_when_assertions_and_schema_list_succeed() {
        let encode = Ir::from_value(serde_json::json!({
            "stage": "ENC", "op": "Encode",
            "args": {"payload": {"text": "alpha project notes"}, "tags": ["proj"]}
        }))
        .unwrap();
        let expected = Expected {
            assertions: vec![t2m_core::sample::AssertionSpec {
                name: "has_proj".into(),
                select: t2m_core::sample::AssertionSelect {
                    from: "memory".into(),
                    where_clauses: vec!["deleted=0".into()],
                    agg: "count".into(),
                },
                expect: t2m_core::sample::AssertionExpect {
                    op: t2m_core::sample::CompareOp::Ge,
                    value: serde_json::json!(1),
                },
                params: HashMap::new(),
            }],
            ranking: None,
            triggers: vec![],
            meta: None,
        };
        let sample = sample_with(vec![encode], expected);
        let outcome = runner().run_sample(&sample).await.unwrap();
        assert!(outcome.passed, "{:?}", outcome.errors);
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn sample_fails_when_an_assertion_fails() {
        let encode = Ir::from_value(serde_json::json!({
            "stage": "ENC", "op": "Encode",
            "args": {"payload": {"text": "alpha project notes"}}
        }))
        .unwrap();
        let expected = Expected {
            assertions: vec![t2m_core::sample::AssertionSpec {
                name: "impossible".into(),
                select: t2m_core::sample::AssertionSelect {
                    from: "memory".into(),
                    where_clauses: vec!["deleted=1".into()],
                    agg: "count".into(),
                },
                expect: t2m_core::sample::AssertionExpect {
                    op: t2m_core::sample::CompareOp::Ge,
                    value: serde_json::json!(1),
                },
                params: HashMap::new(),
            }],
            ranking: None,
            triggers: vec![],
            meta: None,
        };
        let sample = sample_with(vec![encode], expected);
        let outcome = runner().run_sample(&sample).await.unwrap();
        assert!(!outcome.passed);
    }

    #[tokio::test]
    async fn expired_rows_are_reaped_before_a_trigger_blocks_assertions_run() {
        let encode = Ir::from_value(serde_json::json!({
            "stage": "ENC", "op": "Encode",
            "args": {"payload": {"text": "a note that should expire"}}
        }))
        .unwrap();
        let expire = Ir::from_value(serde_json::json!({
            "stage": "STO", "op": "Expire",
            "target": {"all": true},
            "args": {"ttl": "PT1H", "on_expire": "soft_delete"},
            "meta": {"confirmation": true}
        }))
        .unwrap();
        let expected = Expected {
            assertions: vec![],
            ranking: None,
            triggers: vec![t2m_core::sample::TriggerBlock {
                advance: "PT2H".into(),
                assertions: vec![t2m_core::sample::AssertionSpec {
                    name: "expired_rows_got_soft_deleted".into(),
                    select: t2m_core::sample::AssertionSelect {
                        from: "memory".into(),
                        where_clauses: vec!["deleted=1".into()],
                        agg: "count".into(),
                    },
                    expect: t2m_core::sample::AssertionExpect {
                        op: t2m_core::sample::CompareOp::Ge,
                        value: serde_json::json!(1),
                    },
                    params: HashMap::new(),
                }],
            }],
            meta: None,
        };
        let sample = sample_with(vec![encode, expire], expected);
        let outcome = runner().run_sample(&sample).await.unwrap();
        assert!(outcome.passed, "{:?}", outcome);
        assert_eq!(outcome.triggers.len(), 1);
        assert!(outcome.triggers[0].assertions[0].passed);
        assert!(outcome.triggers[0].assertions[0].actual >= 1.0);
    }

    #[tokio::test]
    async fn missing_init_db_snapshot_reports_a_config_error() {
        let sample = GenerationSample {
            init_db: Some("nonexistent".into()),
            ..sample_with(vec![], Expected::default())
        };
        let err = runner().run_sample(&sample).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
