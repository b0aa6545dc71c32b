//! Benchmark sample types shared by the stage generators, the assertion
//! compiler, and the test runner (spec.md §3 "GenerationSample" and
//! §6 "Sample JSONL record").

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ir::Ir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionType {
    Direct,
    Indirect,
    Implicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Structure {
    Single,
    Combo,
    Workflow,
}

/// The classification axes a sample is generated against (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub lang: String,
    pub instruction_type: InstructionType,
    pub structure: Structure,
}

impl Classification {
    /// The `{op_abbrev}` slot of a canonical sample id is derived from the
    /// sample's primary (first schema_list) operation, so classification
    /// alone never decides it; callers combine this with that operation.
    pub fn contains_unknown_token(&self) -> bool {
        self.lang.eq_ignore_ascii_case("unknown")
            || format!("{:?}", self.instruction_type).eq_ignore_ascii_case("unknown")
            || format!("{:?}", self.structure).eq_ignore_ascii_case("unknown")
    }
}

/// An aggregation an [`AssertionSpec`] may request (spec.md §3 only names
/// `count`, leaving the set open — modeled as a string so new aggregates
/// don't require a crate release to add).
pub type AggKind = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
}

impl CompareOp {
    pub fn compare(self, actual: f64, expected: f64) -> bool {
        match self {
            CompareOp::Eq => (actual - expected).abs() < f64::EPSILON,
            CompareOp::Ne => (actual - expected).abs() >= f64::EPSILON,
            CompareOp::Gt => actual > expected,
            CompareOp::Ge => actual >= expected,
            CompareOp::Lt => actual < expected,
            CompareOp::Le => actual <= expected,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionSelect {
    pub from: String,
    #[serde(rename = "where")]
    pub where_clauses: Vec<String>,
    pub agg: AggKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionExpect {
    pub op: CompareOp,
    pub value: serde_json::Value,
}

/// A single condition the test runner compiles into a parameterised
/// count-query and checks against the engine's resulting state
/// (spec.md §3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionSpec {
    pub name: String,
    pub select: AssertionSelect,
    pub expect: AssertionExpect,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

/// Ranking-quality expectations evaluated against a Retrieve's result ids
/// (spec.md §3, §4.6 step 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingSpec {
    pub query: String,
    pub gold_ids: Vec<String>,
    pub topk: usize,
    #[serde(default)]
    pub allow_extra: bool,
    pub min_hits: usize,
}

/// One block of a trigger sequence: advance the virtual clock, then
/// evaluate a batch of assertions against the advanced "now" (spec.md §3,
/// §4.6 step 7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerBlock {
    pub advance: String,
    pub assertions: Vec<AssertionSpec>,
}

/// Fixes the virtual "now" the test runner seeds its clock with, so
/// expire/trigger evaluation is deterministic (spec.md §4.6 step 2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalMeta {
    pub eval_time_utc: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Expected {
    #[serde(default)]
    pub assertions: Vec<AssertionSpec>,
    pub ranking: Option<RankingSpec>,
    #[serde(default)]
    pub triggers: Vec<TriggerBlock>,
    #[serde(default)]
    pub meta: Option<EvalMeta>,
}

/// One fully generated benchmark item: the IR program under test plus
/// everything needed to set it up and grade it (spec.md §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSample {
    pub id: String,
    #[serde(rename = "class")]
    pub classification: Classification,
    /// Natural-language instruction text, keyed by language code.
    pub nl: HashMap<String, String>,
    #[serde(default)]
    pub prerequisites: Vec<Ir>,
    pub schema_list: Vec<Ir>,
    pub init_db: Option<String>,
    #[serde(default)]
    pub expected: Expected,
    pub notes: Option<String>,
}

impl GenerationSample {
    /// The canonical id shape is `t2m-{lang}-{instruction_type}-{structure}-{op_abbrev}-{NNN}`
    /// (spec.md §4.2, §8 property 9); this only checks the pattern, not the
    /// counter, since `BenchmarkBuilder` owns assignment.
    pub fn has_canonical_id_shape(&self) -> bool {
        self.id.starts_with("t2m-") && self.id.split('-').count() >= 6
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ir(op: &str, stage: &str, args: serde_json::Value) -> Ir {
        Ir::from_value(json!({"stage": stage, "op": op, "args": args})).unwrap()
    }

    #[test]
    fn sample_round_trips_through_json() {
        let sample = GenerationSample {
            id: "t2m-en-direct-single-prm-001".into(),
            classification: Classification {
                lang: "en".into(),
                instruction_type: InstructionType::Direct,
                structure: Structure::Single,
            },
            nl: HashMap::from([("en".into(), "bump up the weight of this note".into())]),
            prerequisites: vec![ir(
                "Encode",
                "ENC",
                json!({"payload": {"text": "alice likes rust"}}),
            )],
            schema_list: vec![Ir::from_value(json!({
                "stage": "STO",
                "op": "Promote",
                "target": {"ids": 1},
                "args": {"weight": 0.9}
            }))
            .unwrap()],
            init_db: None,
            expected: Expected {
                assertions: vec![AssertionSpec {
                    name: "weight_bumped".into(),
                    select: AssertionSelect {
                        from: "memory".into(),
                        where_clauses: vec!["deleted=0".into(), "weight>=:w".into()],
                        agg: "count".into(),
                    },
                    expect: AssertionExpect {
                        op: CompareOp::Ge,
                        value: json!(1),
                    },
                    params: HashMap::from([("w".into(), json!(0.9))]),
                }],
                ranking: None,
                triggers: vec![],
                meta: None,
            },
            notes: None,
        };
        let value = serde_json::to_value(&sample).unwrap();
        let back: GenerationSample = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, sample.id);
        assert!(back.has_canonical_id_shape());
    }

    #[test]
    fn unknown_token_detection_is_case_insensitive() {
        let c = Classification {
            lang: "UNKNOWN".into(),
            instruction_type: InstructionType::Direct,
            structure: Structure::Single,
        };
        assert!(c.contains_unknown_token());
    }

    #[test]
    fn compare_op_matches_expected_semantics() {
        assert!(CompareOp::Ge.compare(1.0, 1.0));
        assert!(!CompareOp::Gt.compare(1.0, 1.0));
        assert!(CompareOp::Ne.compare(2.0, 1.0));
    }
}
