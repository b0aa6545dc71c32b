//! Durable generation checkpoint (spec.md §4.3, grounded on
//! `codegraph-orchestration/src/checkpoint.rs`'s `Arc<Mutex<...>>` +
//! JSON-file-backed persistence and `bench/generate/src/checkpoint_manager.py`'s
//! field shape).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageProgress {
    pub stage_name: String,
    pub status: StageStatus,
    pub total_batches: usize,
    pub completed_batches: usize,
    #[serde(default)]
    pub failed_batches: Vec<usize>,
    pub output_file: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl StageProgress {
    pub fn new(stage_name: impl Into<String>, total_batches: usize) -> Self {
        Self {
            stage_name: stage_name.into(),
            status: StageStatus::Pending,
            total_batches,
            completed_batches: 0,
            failed_batches: Vec::new(),
            output_file: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.total_batches == 0 {
            0.0
        } else {
            (self.completed_batches as f64 / self.total_batches as f64) * 100.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub plan_name: String,
    pub total_samples: usize,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub stages: HashMap<String, StageProgress>,
    #[serde(default)]
    pub completed_by_scenario: HashMap<String, usize>,
    #[serde(default)]
    pub completed_by_operation: HashMap<String, usize>,
    #[serde(default)]
    pub output_files: HashMap<String, String>,
    #[serde(default)]
    pub errors: Vec<serde_json::Value>,
}

impl Checkpoint {
    pub fn new(plan_name: impl Into<String>, total_samples: usize, now: &str) -> Self {
        Self {
            plan_name: plan_name.into(),
            total_samples,
            created_at: now.to_string(),
            updated_at: now.to_string(),
            stages: HashMap::new(),
            completed_by_scenario: HashMap::new(),
            completed_by_operation: HashMap::new(),
            output_files: HashMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn total_completed(&self) -> usize {
        self.completed_by_scenario.values().sum()
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.total_samples == 0 {
            0.0
        } else {
            (self.total_completed() as f64 / self.total_samples as f64) * 100.0
        }
    }
}

/// Owns a [`Checkpoint`] behind a mutex, optionally backed by a JSON file on
/// disk. Batches are resumed by exact prefix: a stage's `completed_batches`
/// counter is the number of leading batches (by ascending `batch_id`)
/// already durably written, and resuming a run skips exactly that many.
pub struct CheckpointManager {
    path: Option<PathBuf>,
    state: Mutex<Checkpoint>,
}

impl CheckpointManager {
    pub fn new(checkpoint: Checkpoint) -> Self {
        Self {
            path: None,
            state: Mutex::new(checkpoint),
        }
    }

    /// Loads an existing checkpoint from `path` if present, else starts a
    /// fresh one; all subsequent `save_to_disk` calls write back to `path`.
    pub fn open(path: impl AsRef<Path>, fallback: Checkpoint) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let checkpoint = match Self::load_from_disk(&path)? {
            Some(c) => c,
            None => fallback,
        };
        Ok(Self {
            path: Some(path),
            state: Mutex::new(checkpoint),
        })
    }

    pub fn load_from_disk(path: impl AsRef<Path>) -> Result<Option<Checkpoint>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub fn save_to_disk(&self) -> Result<()> {
        if let Some(path) = &self.path {
            let snapshot = self.snapshot();
            let raw = serde_json::to_string_pretty(&snapshot)?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, raw)?;
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Checkpoint {
        self.state.lock().unwrap().clone()
    }

    pub fn stage_progress(&self, stage: &str) -> Option<StageProgress> {
        self.state.lock().unwrap().stages.get(stage).cloned()
    }

    /// The number of leading batches already completed for `stage`; a
    /// resuming pipeline should skip batches with `batch_id < this`.
    pub fn resume_point(&self, stage: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .stages
            .get(stage)
            .map(|s| s.completed_batches)
            .unwrap_or(0)
    }

    pub fn ensure_stage(&self, stage: &str, total_batches: usize, now: &str) {
        let mut guard = self.state.lock().unwrap();
        guard
            .stages
            .entry(stage.to_string())
            .or_insert_with(|| StageProgress::new(stage, total_batches));
        guard.updated_at = now.to_string();
    }

    pub fn record_batch_completed(
        &self,
        stage: &str,
        scenario: &str,
        operation: &str,
        count: usize,
        now: &str,
    ) {
        let mut guard = self.state.lock().unwrap();
        if let Some(progress) = guard.stages.get_mut(stage) {
            progress.completed_batches += 1;
            if progress.started_at.is_none() {
                progress.started_at = Some(now.to_string());
            }
            progress.status = if progress.completed_batches >= progress.total_batches {
                progress.completed_at = Some(now.to_string());
                StageStatus::Completed
            } else {
                StageStatus::Running
            };
        }
        *guard.completed_by_scenario.entry(scenario.to_string()).or_insert(0) += count;
        *guard.completed_by_operation.entry(operation.to_string()).or_insert(0) += count;
        guard.updated_at = now.to_string();
    }

    pub fn record_batch_failed(&self, stage: &str, batch_id: usize, now: &str) {
        let mut guard = self.state.lock().unwrap();
        if let Some(progress) = guard.stages.get_mut(stage) {
            progress.failed_batches.push(batch_id);
            progress.status = StageStatus::Failed;
        }
        guard.updated_at = now.to_string();
    }

    pub fn record_output_file(&self, stage: &str, path: &str) {
        self.state
            .lock()
            .unwrap()
            .output_files
            .insert(stage.to_string(), path.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resume_point_reflects_completed_batches() {
        let checkpoint = Checkpoint::new("plan", 10, "2024-01-01T00:00:00Z");
        let manager = CheckpointManager::new(checkpoint);
        manager.ensure_stage("stage1", 5, "2024-01-01T00:00:00Z");
        assert_eq!(manager.resume_point("stage1"), 0);
        manager.record_batch_completed("stage1", "scenario_a", "encode", 3, "2024-01-01T00:01:00Z");
        assert_eq!(manager.resume_point("stage1"), 1);
    }

    #[test]
    fn save_and_reload_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let checkpoint = Checkpoint::new("plan", 4, "2024-01-01T00:00:00Z");
        let manager = CheckpointManager::open(&path, checkpoint).unwrap();
        manager.ensure_stage("stage1", 2, "2024-01-01T00:00:00Z");
        manager.record_batch_completed("stage1", "scenario_a", "encode", 2, "2024-01-01T00:01:00Z");
        manager.save_to_disk().unwrap();

        let reloaded = CheckpointManager::open(&path, Checkpoint::new("plan", 4, "2024-01-01T00:00:00Z")).unwrap();
        assert_eq!(reloaded.resume_point("stage1"), 1);
        assert_eq!(reloaded.snapshot().total_completed(), 2);
    }
}
