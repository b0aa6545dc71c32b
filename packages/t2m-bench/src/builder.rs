//! Fuses test outcomes with raw stage-3 samples into the published
//! benchmark artefact (spec.md §4.7, grounded on
//! `original_source/bench/core/builder.py`).

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;
use t2m_core::sample::GenerationSample;

use crate::error::Result;
use crate::runner::SampleOutcome;

/// The twelve IR operations a benchmark sample's `schema_list` may use
/// (spec.md §1 item 2); anything else disqualifies the sample (spec.md
/// §4.7, §8 property 9).
const ALLOWED_OPS: &[&str] = &[
    "Encode", "Retrieve", "Update", "Delete", "Label", "Promote", "Demote", "Merge", "Split", "Lock", "Expire",
    "Summarize",
];

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkMetadata {
    pub created_at: String,
    pub source_run: String,
    pub total_count: usize,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct BenchmarkStats {
    pub by_lang: HashMap<String, usize>,
    pub by_instruction_type: HashMap<String, usize>,
    pub by_structure: HashMap<String, usize>,
    pub by_primary_op: HashMap<String, usize>,
}

pub struct BuildReport {
    pub benchmark: Vec<GenerationSample>,
    pub metadata: BenchmarkMetadata,
    pub stats: BenchmarkStats,
    pub dropped_unknown_token: usize,
    pub dropped_disallowed_op: usize,
    pub dropped_failed_test: usize,
}

pub struct BenchmarkBuilder;

impl BenchmarkBuilder {
    /// `samples` is raw stage-3 output; `outcomes` is the test runner's
    /// per-sample verdicts, keyed by sample id. Only samples present in
    /// `outcomes` with `passed=true`, clean of the `unknown` token, and
    /// restricted to the twelve-op allow-list survive (spec.md §4.7).
    pub fn build(samples: Vec<GenerationSample>, outcomes: &HashMap<String, SampleOutcome>, source_run: &str, now: &str) -> BuildReport {
        let mut dropped_unknown_token = 0;
        let mut dropped_disallowed_op = 0;
        let mut dropped_failed_test = 0;

        let mut survivors: Vec<GenerationSample> = Vec::new();
        for sample in samples {
            let passed = outcomes.get(&sample.id).map(|o| o.passed).unwrap_or(false);
            if !passed {
                dropped_failed_test += 1;
                continue;
            }
            if contains_unknown_token(&sample) {
                dropped_unknown_token += 1;
                continue;
            }
            if !schema_list_is_allowed(&sample) {
                dropped_disallowed_op += 1;
                continue;
            }
            survivors.push(sample);
        }

        let benchmark = Self::reassign_canonical_ids(survivors);
        let stats = Self::compute_stats(&benchmark);
        let metadata = BenchmarkMetadata {
            created_at: now.to_string(),
            source_run: source_run.to_string(),
            total_count: benchmark.len(),
        };

        BuildReport {
            benchmark,
            metadata,
            stats,
            dropped_unknown_token,
            dropped_disallowed_op,
            dropped_failed_test,
        }
    }

    /// Groups by `{lang, instruction_type, structure, primary_op}` and
    /// assigns sequential canonical ids within each group (spec.md §4.7).
    fn reassign_canonical_ids(samples: Vec<GenerationSample>) -> Vec<GenerationSample> {
        let mut counters: HashMap<String, usize> = HashMap::new();
        let mut out = Vec::with_capacity(samples.len());
        for mut sample in samples {
            let primary_op = primary_op_abbrev(&sample);
            let lang = sample.classification.lang.clone();
            let group_key = format!(
                "{lang}-{:?}-{:?}-{primary_op}",
                sample.classification.instruction_type, sample.classification.structure
            );
            let counter = counters.entry(group_key).or_insert(0);
            *counter += 1;
            sample.id = crate::stages::canonical_sample_id(
                &lang,
                sample.classification.instruction_type,
                sample.classification.structure,
                &primary_op,
                *counter,
            );
            out.push(sample);
        }
        out
    }

    fn compute_stats(samples: &[GenerationSample]) -> BenchmarkStats {
        let mut stats = BenchmarkStats::default();
        for sample in samples {
            *stats.by_lang.entry(sample.classification.lang.clone()).or_insert(0) += 1;
            *stats
                .by_instruction_type
                .entry(format!("{:?}", sample.classification.instruction_type))
                .or_insert(0) += 1;
            *stats
                .by_structure
                .entry(format!("{:?}", sample.classification.structure))
                .or_insert(0) += 1;
            *stats.by_primary_op.entry(primary_op_abbrev(sample)).or_insert(0) += 1;
        }
        stats
    }

    /// Writes `benchmark.jsonl`, `metadata.json`, and `stats.json` under
    /// `dir` (spec.md §4.7, §6 "On-disk layout"). Updating the
    /// `benchmarks/latest` symbolic alias is a filesystem/CLI concern left
    /// to the caller (spec.md §1 "deliberately out of scope").
    pub fn write_to_dir(report: &BuildReport, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let mut jsonl = String::new();
        for sample in &report.benchmark {
            jsonl.push_str(&serde_json::to_string(sample)?);
            jsonl.push('\n');
        }
        std::fs::write(dir.join("benchmark.jsonl"), jsonl)?;
        std::fs::write(dir.join("metadata.json"), serde_json::to_string_pretty(&report.metadata)?)?;
        std::fs::write(dir.join("stats.json"), serde_json::to_string_pretty(&report.stats)?)?;
        Ok(())
    }
}

fn primary_op_abbrev(sample: &GenerationSample) -> String {
    sample
        .schema_list
        .first()
        .map(|ir| ir.op_name().chars().take(3).collect::<String>().to_lowercase())
        .unwrap_or_else(|| "unk".to_string())
}

fn contains_unknown_token(sample: &GenerationSample) -> bool {
    sample.classification.contains_unknown_token()
        || sample.nl.values().any(|text| text.to_lowercase().contains("unknown"))
}

fn schema_list_is_allowed(sample: &GenerationSample) -> bool {
    sample
        .schema_list
        .iter()
        .all(|ir| ALLOWED_OPS.contains(&ir.op_name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use t2m_core::ir::Ir;
    use t2m_core::sample::{Classification, Expected, InstructionType, Structure};

    fn encode_sample(id: &str, lang: &str) -> GenerationSample {
        GenerationSample {
            id: id.to_string(),
            classification: Classification {
                lang: lang.to_string(),
                instruction_type: InstructionType::Direct,
                structure: Structure::Single,
            },
            nl: Map::from([(lang.to_string(), "remember this".to_string())]),
            prerequisites: vec![],
            schema_list: vec![Ir::from_value(serde_json::json!({
                "stage": "ENC", "op": "Encode", "args": {"payload": {"text": "hi"}}
            }))
            .unwrap()],
            init_db: None,
            expected: Expected::default(),
            notes: None,
        }
    }

    fn passing_outcome(id: &str) -> SampleOutcome {
        SampleOutcome {
            sample_id: id.to_string(),
            passed: true,
            timed_out: false,
            errors: vec![],
            assertions: vec![],
            ranking: None,
            triggers: vec![],
            duration_ms: 1,
        }
    }

    #[test]
    fn build_drops_samples_with_no_passing_outcome() {
        let samples = vec![encode_sample("t2m-en-direct-single-enc-001", "en")];
        let outcomes = Map::new();
        let report = BenchmarkBuilder::build(samples, &outcomes, "run1", "2024-01-01T00:00:00Z");
        assert_eq!(report.benchmark.len(), 0);
        assert_eq!(report.dropped_failed_test, 1);
    }

    #[test]
    fn build_drops_samples_containing_the_unknown_token() {
        let mut sample = encode_sample("t2m-en-direct-single-enc-001", "en");
        sample.nl.insert("en".to_string(), "this is unknown territory".to_string());
        let outcomes = Map::from([(sample.id.clone(), passing_outcome(&sample.id))]);
        let report = BenchmarkBuilder::build(vec![sample], &outcomes, "run1", "2024-01-01T00:00:00Z");
        assert_eq!(report.benchmark.len(), 0);
        assert_eq!(report.dropped_unknown_token, 1);
    }

    #[test]
    fn build_reassigns_canonical_ids_sequentially_within_groups() {
        let samples = vec![
            encode_sample("raw-1", "en"),
            encode_sample("raw-2", "en"),
        ];
        let outcomes = Map::from([
            ("raw-1".to_string(), passing_outcome("raw-1")),
            ("raw-2".to_string(), passing_outcome("raw-2")),
        ]);
        let report = BenchmarkBuilder::build(samples, &outcomes, "run1", "2024-01-01T00:00:00Z");
        assert_eq!(report.benchmark.len(), 2);
        assert!(report.benchmark[0].has_canonical_id_shape());
        assert_ne!(report.benchmark[0].id, report.benchmark[1].id);
    }

    #[test]
    fn stats_count_by_lang() {
        let samples = vec![encode_sample("t2m-en-direct-single-enc-001", "en")];
        let outcomes = Map::from([("t2m-en-direct-single-enc-001".to_string(), passing_outcome("t2m-en-direct-single-enc-001"))]);
        let report = BenchmarkBuilder::build(samples, &outcomes, "run1", "2024-01-01T00:00:00Z");
        assert_eq!(report.stats.by_lang.get("en"), Some(&1));
    }
}
