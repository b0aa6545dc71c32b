//! Drives the three [`crate::stages`] generators over a [`TaskAllocator`]
//! schedule, persisting through [`CheckpointManager`] and emitting one JSONL
//! line per sample (spec.md §4.4, §5). Two implementations share the same
//! contract, grounded on `codegraph-orchestration/src/orchestrator.rs`'s
//! `PipelineOrchestrator` (worker-id-tagged, tracing-instrumented run loop)
//! generalised to the synchronous-vs-bounded-async split spec.md §5
//! describes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};
use uuid::Uuid;

use t2m_core::sample::GenerationSample;
use t2m_providers::{GenerationOptions, GenerationProvider};

use crate::allocator::{GenerationPlan, StructureLabel, TaskAllocator, TaskBatch};
use crate::checkpoint::CheckpointManager;
use crate::config::BenchConfig;
use crate::error::{Error, Result};
use crate::stages::{
    assemble_sample, Stage1InstructionGenerator, Stage2IrGenerator, Stage3AssertionGenerator,
};

/// On-disk layout for one pipeline run: `runs/{timestamp}/stage{N}.jsonl`
/// (spec.md §4.4 "Write discipline").
#[derive(Debug, Clone)]
pub struct RunPaths {
    root: PathBuf,
}

impl RunPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn stage_file(&self, stage: u8) -> PathBuf {
        self.root.join(format!("stage{stage}.jsonl"))
    }

    pub fn checkpoint_file(&self) -> PathBuf {
        self.root.join("checkpoint.json")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Everything about a scenario/operation the prompt-assembly step needs
/// (spec.md §4.2 "Assemble a prompt"); looked up by the caller per batch,
/// e.g. from a loaded plan file — reading that file is out of scope here.
#[derive(Debug, Clone)]
pub struct OperationCatalogEntry {
    pub scenario_description: String,
    pub operation_description: String,
    pub operation_examples: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub samples_written: usize,
    pub samples_failed: usize,
    pub stage_outputs: HashMap<String, String>,
}

/// Shared setup both controller implementations need: the generators, the
/// schedule, and where to read per-operation prompt context from.
pub struct GenerationContext<'a> {
    pub stage1: Stage1InstructionGenerator<'a>,
    pub stage2: Stage2IrGenerator<'a>,
    pub stage3: Stage3AssertionGenerator<'a>,
    pub catalog: HashMap<String, OperationCatalogEntry>,
    pub min_context_length: usize,
    pub max_context_length: usize,
}

impl<'a> GenerationContext<'a> {
    pub fn new(provider: &'a dyn GenerationProvider, config: &BenchConfig, catalog: HashMap<String, OperationCatalogEntry>) -> Self {
        let opts = GenerationOptions {
            temperature: Some(config.temperature),
            max_tokens: Some(config.max_tokens),
            top_p: Some(config.top_p),
            timeout: Some(config.request_timeout),
        };
        Self {
            stage1: Stage1InstructionGenerator::new(provider, opts.clone()),
            stage2: Stage2IrGenerator::new(provider, opts.clone()),
            stage3: Stage3AssertionGenerator::new(provider, opts),
            catalog,
            min_context_length: 20,
            max_context_length: 2000,
        }
    }

    /// Runs all three stages for one `(batch, structure-slot)` unit,
    /// producing a finished [`GenerationSample`].
    async fn generate_one(&self, batch: &TaskBatch, structure: &StructureLabel) -> Result<GenerationSample> {
        let entry = self.catalog.get(&batch.operation).ok_or_else(|| {
            Error::Config(format!("no operation catalog entry for `{}`", batch.operation))
        })?;

        let single_batch = TaskBatch {
            batch_id: batch.batch_id,
            scenario: batch.scenario.clone(),
            operation: batch.operation.clone(),
            count: 1,
            structures: vec![structure.clone()],
        };
        let mut stage1_results = self
            .stage1
            .generate_batch(
                &single_batch,
                &entry.scenario_description,
                &entry.operation_description,
                &entry.operation_examples,
                self.min_context_length,
                self.max_context_length,
            )
            .await;
        let stage1 = stage1_results.pop().ok_or_else(|| Error::Parse("stage1 produced no draft".into()))??;

        let stage2 = self.stage2.generate(&stage1, &batch.operation).await?;
        let stage3 = self.stage3.generate(&stage1, &stage2.schema_list).await?;

        let id = self.stage1.next_id(
            &stage1.classification.lang,
            stage1.classification.instruction_type,
            stage1.classification.structure,
            &op_abbrev(&batch.operation),
        );
        Ok(assemble_sample(id, stage1, stage2, stage3))
    }
}

fn op_abbrev(operation: &str) -> String {
    operation.chars().take(3).collect::<String>().to_lowercase()
}

#[async_trait]
pub trait PipelineController: Send + Sync {
    async fn run(&self, plan: &GenerationPlan) -> Result<PipelineReport>;
}

/// One task at a time; no shared mutable state beyond the checkpoint file,
/// which is written whole on every bump (spec.md §5 "Synchronous sequential
/// pipeline").
pub struct SequentialPipelineController<'a> {
    ctx: GenerationContext<'a>,
    checkpoint: Arc<CheckpointManager>,
    paths: RunPaths,
    batch_size: usize,
}

impl<'a> SequentialPipelineController<'a> {
    pub fn new(ctx: GenerationContext<'a>, checkpoint: Arc<CheckpointManager>, paths: RunPaths, batch_size: usize) -> Self {
        Self {
            ctx,
            checkpoint,
            paths,
            batch_size,
        }
    }
}

#[async_trait]
impl<'a> PipelineController for SequentialPipelineController<'a> {
    async fn run(&self, plan: &GenerationPlan) -> Result<PipelineReport> {
        let worker_id = format!("worker-{}", Uuid::new_v4());
        info!(worker_id, "starting sequential generation run");

        let batches = TaskAllocator::allocate(plan, self.batch_size);
        let stage_path = self.paths.stage_file(3);
        if let Some(parent) = stage_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let resume_point = self.checkpoint.resume_point("stage3");
        self.checkpoint.ensure_stage("stage3", batches.len(), &now_rfc3339());

        let mut report = PipelineReport::default();
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&stage_path)?;

        for batch in batches.iter().skip(resume_point) {
            for structure in &batch.structures {
                match self.ctx.generate_one(batch, structure).await {
                    Ok(sample) => {
                        let line = serde_json::to_string(&sample)?;
                        use std::io::Write;
                        writeln!(file, "{line}")?;
                        report.samples_written += 1;
                    }
                    Err(e) => {
                        warn!(batch_id = batch.batch_id, error = %e, "sample generation failed");
                        report.samples_failed += 1;
                    }
                }
            }
            self.checkpoint.record_batch_completed(
                "stage3",
                &batch.scenario,
                &batch.operation,
                batch.count,
                &now_rfc3339(),
            );
            self.checkpoint.save_to_disk()?;
        }

        report
            .stage_outputs
            .insert("stage3".to_string(), stage_path.to_string_lossy().to_string());
        info!(worker_id, samples_written = report.samples_written, "sequential run finished");
        Ok(report)
    }
}

enum WriterMsg {
    Sample {
        batch_id: usize,
        scenario: String,
        operation: String,
        line: String,
    },
    Failure {
        batch_id: usize,
    },
}

/// A bounded semaphore guards concurrent generator calls; a single writer
/// task owns the output file and the checkpoint for this stage, draining an
/// unbounded channel in arrival order (spec.md §4.4 "Async implementation",
/// §5 "Asynchronous concurrent pipeline").
pub struct AsyncPipelineController<'a> {
    ctx: GenerationContext<'a>,
    checkpoint: Arc<CheckpointManager>,
    paths: RunPaths,
    batch_size: usize,
    max_concurrent: usize,
    checkpoint_batch_size: usize,
}

impl<'a> AsyncPipelineController<'a> {
    pub fn new(
        ctx: GenerationContext<'a>,
        checkpoint: Arc<CheckpointManager>,
        paths: RunPaths,
        batch_size: usize,
        max_concurrent: usize,
        checkpoint_batch_size: usize,
    ) -> Self {
        Self {
            ctx,
            checkpoint,
            paths,
            batch_size,
            max_concurrent,
            checkpoint_batch_size,
        }
    }
}

#[async_trait]
impl<'a> PipelineController for AsyncPipelineController<'a> {
    async fn run(&self, plan: &GenerationPlan) -> Result<PipelineReport> {
        let worker_id = format!("worker-{}", Uuid::new_v4());
        info!(worker_id, max_concurrent = self.max_concurrent, "starting async generation run");

        let batches = TaskAllocator::allocate(plan, self.batch_size);
        let stage_path = self.paths.stage_file(3);
        if let Some(parent) = stage_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let resume_point = self.checkpoint.resume_point("stage3");
        self.checkpoint.ensure_stage("stage3", batches.len(), &now_rfc3339());

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent.max(1)));
        let (tx, mut rx) = mpsc::unbounded_channel::<WriterMsg>();

        let pending: Vec<&TaskBatch> = batches.iter().skip(resume_point).collect();
        let mut tasks = Vec::with_capacity(pending.len());

        // Each batch's structures are generated concurrently, bounded by the
        // semaphore; the writer below is the only task touching disk state.
        for batch in pending {
            for structure in batch.structures.clone() {
                let permit_sem = semaphore.clone();
                let tx = tx.clone();
                let batch_id = batch.batch_id;
                let scenario = batch.scenario.clone();
                let operation = batch.operation.clone();
                // generate_one borrows self.ctx, so these run as joined
                // futures rather than detached tokio::spawn tasks.
                let fut = async move {
                    let _permit = permit_sem.acquire_owned().await.expect("semaphore not closed");
                    let result = self.ctx.generate_one(batch, &structure).await;
                    match result {
                        Ok(sample) => {
                            let line = match serde_json::to_string(&sample) {
                                Ok(l) => l,
                                Err(e) => {
                                    let _ = tx.send(WriterMsg::Failure { batch_id });
                                    error!(batch_id, error = %e, "failed to serialize sample");
                                    return;
                                }
                            };
                            let _ = tx.send(WriterMsg::Sample {
                                batch_id,
                                scenario,
                                operation,
                                line,
                            });
                        }
                        Err(e) => {
                            warn!(batch_id, error = %e, "sample generation failed");
                            let _ = tx.send(WriterMsg::Failure { batch_id });
                        }
                    }
                };
                tasks.push(fut);
            }
        }
        drop(tx);

        let writer = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&stage_path)
                .await?;
            let mut report = PipelineReport::default();
            let mut since_last_checkpoint = 0usize;
            use tokio::io::AsyncWriteExt;

            while let Some(msg) = rx.recv().await {
                match msg {
                    WriterMsg::Sample {
                        batch_id,
                        scenario,
                        operation,
                        line,
                    } => {
                        file.write_all(line.as_bytes()).await?;
                        file.write_all(b"\n").await?;
                        file.flush().await?;
                        self.checkpoint
                            .record_batch_completed("stage3", &scenario, &operation, 1, &now_rfc3339());
                        report.samples_written += 1;
                        since_last_checkpoint += 1;
                        let _ = batch_id;
                        if since_last_checkpoint >= self.checkpoint_batch_size {
                            self.checkpoint.save_to_disk()?;
                            since_last_checkpoint = 0;
                        }
                    }
                    WriterMsg::Failure { batch_id } => {
                        self.checkpoint.record_batch_failed("stage3", batch_id, &now_rfc3339());
                        report.samples_failed += 1;
                    }
                }
            }
            self.checkpoint.save_to_disk()?;
            report
                .stage_outputs
                .insert("stage3".to_string(), stage_path.to_string_lossy().to_string());
            Ok::<PipelineReport, Error>(report)
        };

        let (_, report) = tokio::join!(futures::future::join_all(tasks), writer);
        let report = report?;
        info!(worker_id, samples_written = report.samples_written, "async run finished");
        Ok(report)
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use tempfile::tempdir;

    use crate::checkpoint::{Checkpoint, StageProgress};
    use crate::config::BenchConfig;
    use t2m_providers::mock::MockGenerationProvider;

    /// Simulates a prior session that generated and durably wrote half of a
    /// 6-batch plan before being killed: the checkpoint already records 3
    /// completed `stage3` batches and the output file already holds 3 lines.
    /// Resuming must skip those 3 batches and append exactly the remaining 3,
    /// with no id written twice (spec.md §4.3 "exact-prefix resume").
    #[tokio::test]
    async fn resuming_from_a_partial_checkpoint_skips_completed_batches_and_avoids_duplicate_ids() {
        let dir = tempdir().unwrap();
        let paths = RunPaths::new(dir.path());
        let stage_path = paths.stage_file(3);
        std::fs::create_dir_all(stage_path.parent().unwrap()).unwrap();
        std::fs::write(
            &stage_path,
            "{\"id\":\"prior-session-1\"}\n{\"id\":\"prior-session-2\"}\n{\"id\":\"prior-session-3\"}\n",
        )
        .unwrap();

        let mut checkpoint = Checkpoint::new("resume-test", 6, "2024-01-01T00:00:00Z");
        let mut progress = StageProgress::new("stage3", 6);
        progress.completed_batches = 3;
        checkpoint.stages.insert("stage3".to_string(), progress);
        let checkpoint = Arc::new(CheckpointManager::open(paths.checkpoint_file(), checkpoint).unwrap());
        checkpoint.save_to_disk().unwrap();

        let plan = GenerationPlan {
            total_samples: 6,
            scenario_proportions: vec![("work".to_string(), 1.0)],
            operation_proportions: vec![("Encode".to_string(), 1.0)],
            workflow_pct: 0.0,
        };
        let provider = MockGenerationProvider::default();
        let config = BenchConfig::default();
        let catalog = HashMap::from([(
            "Encode".to_string(),
            OperationCatalogEntry {
                scenario_description: "a work scenario".into(),
                operation_description: "store something for later".into(),
                operation_examples: vec!["remember the deadline".into()],
            },
        )]);
        let ctx = GenerationContext::new(&provider, &config, catalog);
        let controller = SequentialPipelineController::new(ctx, checkpoint.clone(), paths.clone(), 1);

        let report = controller.run(&plan).await.unwrap();
        assert_eq!(report.samples_written, 3, "only the 3 un-checkpointed batches should run");
        assert_eq!(report.samples_failed, 0, "{:?}", report);

        let written = std::fs::read_to_string(&stage_path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 6);

        let mut seen = HashSet::new();
        for line in &lines {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            let id = value.get("id").unwrap().as_str().unwrap().to_string();
            assert!(seen.insert(id), "sample id repeated across the resumed run: {line}");
        }
        assert_eq!(checkpoint.resume_point("stage3"), 6);
    }

    #[test]
    fn run_paths_lay_out_stage_files_under_the_run_root() {
        let paths = RunPaths::new("runs/20240101_000000");
        assert_eq!(
            paths.stage_file(2),
            PathBuf::from("runs/20240101_000000/stage2.jsonl")
        );
        assert_eq!(
            paths.checkpoint_file(),
            PathBuf::from("runs/20240101_000000/checkpoint.json")
        );
    }

    #[test]
    fn op_abbrev_takes_the_first_three_lowercased_characters() {
        assert_eq!(op_abbrev("Encode"), "enc");
        assert_eq!(op_abbrev("Retrieve"), "ret");
    }
}
