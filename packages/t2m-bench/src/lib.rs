//! Construction and evaluation pipeline for the T2M benchmark: generates
//! candidate samples with an LLM, repairs and validates their JSON,
//! evaluates them against a sandboxed [`t2m_engine::MemoryEngine`], and
//! assembles the survivors into a published benchmark (spec.md §1).

pub mod allocator;
pub mod assertions;
pub mod builder;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod error;
pub mod json_repair;
pub mod pipeline;
pub mod runner;
pub mod stages;

pub use allocator::{GenerationPlan, StructureLabel, TaskAllocator, TaskBatch};
pub use assertions::{AssertionCompiler, AssertionOutcome};
pub use builder::{BenchmarkBuilder, BenchmarkMetadata, BenchmarkStats, BuildReport};
pub use checkpoint::{Checkpoint, CheckpointManager, StageProgress, StageStatus};
pub use clock::VirtualClock;
pub use config::BenchConfig;
pub use error::{Error, Result};
pub use pipeline::{
    AsyncPipelineController, GenerationContext, OperationCatalogEntry, PipelineController, PipelineReport, RunPaths,
    SequentialPipelineController,
};
pub use runner::{RankingOutcome, SampleOutcome, TestRunner, TriggerOutcome};
pub use stages::{Stage1InstructionGenerator, Stage2IrGenerator, Stage3AssertionGenerator};
