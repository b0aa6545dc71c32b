//! The three staged generators (spec.md §4.2, grounded on the common shape
//! in `original_source/bench/generate/src/stage{1,2,3}_generator.py` and on
//! `codegraph-orchestration/src/stages/*.rs`'s per-stage-struct-with-a-
//! `StageHandler`-style-trait layout). Stage 1 produces an instruction and
//! its classification, Stage 2 turns that into an IR program, Stage 3 adds
//! the assertions/ranking/triggers that grade it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{json, Value};
use t2m_core::ir::Ir;
use t2m_core::sample::{Classification, Expected, GenerationSample, InstructionType, Structure};
use t2m_providers::{GenerationOptions, GenerationProvider};

use crate::allocator::{StructureLabel, TaskBatch};
use crate::error::{Error, Result};
use crate::json_repair::repair_and_parse;

const MAX_ATTEMPTS: u32 = 3;

/// 1-2s backoff, stated as a range in spec.md §4.2 "Failure policy"; we
/// widen slightly per attempt so repeated failures don't hammer the
/// provider in lockstep.
fn backoff_for_attempt(attempt: u32) -> Duration {
    Duration::from_millis(1000 + 500 * attempt as u64)
}

async fn sleep_backoff(attempt: u32) {
    tokio::time::sleep(backoff_for_attempt(attempt)).await;
}

/// Renames classification keys an LLM commonly mangles (spec.md §4.2
/// "normalise classification key misspellings").
fn normalize_classification_keys(value: &mut Value) {
    if let Value::Object(map) = value {
        if let Some(v) = map.remove("instruction") {
            map.entry("instruction_type").or_insert(v);
        }
        if let Some(v) = map.remove("struct") {
            map.entry("structure").or_insert(v);
        }
        if let Some(v) = map.remove("language") {
            map.entry("lang").or_insert(v);
        }
    }
}

/// `t2m-{lang}-{instruction_type}-{structure}-{op_abbrev}-{NNN}` (spec.md
/// §4.2, §8 property 9).
pub fn canonical_sample_id(
    lang: &str,
    instruction_type: InstructionType,
    structure: Structure,
    op_abbrev: &str,
    counter: usize,
) -> String {
    let it = match instruction_type {
        InstructionType::Direct => "direct",
        InstructionType::Indirect => "indirect",
        InstructionType::Implicit => "implicit",
    };
    let st = match structure {
        Structure::Single => "single",
        Structure::Combo => "combo",
        Structure::Workflow => "workflow",
    };
    format!("t2m-{lang}-{it}-{st}-{op_abbrev}-{counter:03}")
}

/// Per-generator-instance counter for assigning canonical ids (spec.md §4.2
/// "counter scoped per generator instance").
#[derive(Default)]
pub struct IdCounter(AtomicUsize);

impl IdCounter {
    pub fn next(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Flat `{slot}` substitution, no inheritance (spec.md §9 Design Note
/// "Prompt template inheritance").
fn render_template(template: &str, slots: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in slots {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// Runs `build_prompt` / `call` / `parse` up to [`MAX_ATTEMPTS`] times with
/// backoff between attempts, matching the shared retry contract all three
/// stages follow (spec.md §4.2 "Failure policy").
async fn retry_generate<F, P, T>(mut build_prompt: F, provider: &dyn GenerationProvider, opts: &GenerationOptions, mut parse: P) -> Result<T>
where
    F: FnMut() -> String,
    P: FnMut(&str) -> Result<T>,
{
    let mut last_err = None;
    for attempt in 0..MAX_ATTEMPTS {
        if attempt > 0 {
            sleep_backoff(attempt).await;
        }
        let prompt = build_prompt();
        let call_result = provider.generate_structured(&prompt, &json!({"type": "object"}), opts).await;
        match call_result {
            Ok(result) => match parse(&result.text) {
                Ok(parsed) => return Ok(parsed),
                Err(e) => last_err = Some(e),
            },
            Err(e) => last_err = Some(Error::from(e)),
        }
    }
    Err(last_err.unwrap_or_else(|| Error::Parse("no attempts made".to_string())))
}

pub const STAGE1_TEMPLATE: &str = "Scenario: {scenario_name} — {scenario_description}\n\
Operation: {operation_name} — {operation_description}\n\
Examples: {operation_examples}\n\
Structure: {structure_hint}\n\
Produce exactly one JSON object with fields instruction, context, classification \
{{lang, instruction_type, structure}}, scenario_info. Context must be at least \
{min_length} characters and at most {max_length} characters.";

#[derive(Debug, Clone)]
pub struct Stage1Draft {
    pub instruction: String,
    pub context: String,
    pub classification: Classification,
    pub scenario_info: Value,
}

pub struct Stage1InstructionGenerator<'a> {
    provider: &'a dyn GenerationProvider,
    opts: GenerationOptions,
    ids: IdCounter,
}

impl<'a> Stage1InstructionGenerator<'a> {
    pub fn new(provider: &'a dyn GenerationProvider, opts: GenerationOptions) -> Self {
        Self {
            provider,
            opts,
            ids: IdCounter::default(),
        }
    }

    pub fn next_id(&self, lang: &str, instruction_type: InstructionType, structure: Structure, op_abbrev: &str) -> String {
        canonical_sample_id(lang, instruction_type, structure, op_abbrev, self.ids.next())
    }

    /// Generates one draft per `(scenario, operation)` slot the batch
    /// requests, one structure label at a time.
    pub async fn generate_batch(
        &self,
        batch: &TaskBatch,
        scenario_description: &str,
        operation_description: &str,
        operation_examples: &[String],
        min_length: usize,
        max_length: usize,
    ) -> Vec<Result<Stage1Draft>> {
        let mut out = Vec::with_capacity(batch.structures.len());
        for structure in &batch.structures {
            let structure_hint = match structure {
                StructureLabel::Single => "single",
                StructureLabel::Workflow => "workflow",
            };
            let examples_joined = operation_examples.join("; ");
            let scenario = batch.scenario.clone();
            let operation = batch.operation.clone();
            let min_length_s = min_length.to_string();
            let max_length_s = max_length.to_string();

            let result = retry_generate(
                || {
                    render_template(
                        STAGE1_TEMPLATE,
                        &[
                            ("scenario_name", &scenario),
                            ("scenario_description", scenario_description),
                            ("operation_name", &operation),
                            ("operation_description", operation_description),
                            ("operation_examples", &examples_joined),
                            ("structure_hint", structure_hint),
                            ("min_length", &min_length_s),
                            ("max_length", &max_length_s),
                        ],
                    )
                },
                self.provider,
                &self.opts,
                |raw| Self::parse_and_validate(raw, min_length, &batch.operation),
            )
            .await;
            out.push(result);
        }
        out
    }

    fn parse_and_validate(raw: &str, min_length: usize, expected_operation: &str) -> Result<Stage1Draft> {
        let mut value = repair_and_parse(raw)?;
        if let Some(obj) = value.get_mut("classification") {
            normalize_classification_keys(obj);
        }

        let instruction = value
            .get("instruction")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Parse("stage1 response missing `instruction`".into()))?
            .to_string();
        let context = value
            .get("context")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Parse("stage1 response missing `context`".into()))?
            .to_string();
        if context.len() < min_length {
            return Err(Error::Parse(format!(
                "stage1 context too short: {} < {min_length}",
                context.len()
            )));
        }
        let classification_value = value
            .get("classification")
            .cloned()
            .ok_or_else(|| Error::Parse("stage1 response missing `classification`".into()))?;
        let classification: Classification = serde_json::from_value(classification_value)?;
        let scenario_info = value
            .get("scenario_info")
            .cloned()
            .ok_or_else(|| Error::Parse("stage1 response missing `scenario_info`".into()))?;

        if let Some(op_hint) = scenario_info.get("operation").and_then(Value::as_str) {
            if !op_hint.eq_ignore_ascii_case(expected_operation) {
                return Err(Error::Parse(format!(
                    "stage1 response operation `{op_hint}` does not match batch operation `{expected_operation}`"
                )));
            }
        }

        Ok(Stage1Draft {
            instruction,
            context,
            classification,
            scenario_info,
        })
    }
}

pub const STAGE2_TEMPLATE: &str = "Instruction: {instruction}\n\
Context: {context}\n\
Operation: {operation_name}\n\
Produce exactly one JSON object with fields prerequisites (array of IR \
objects) and schema_list (array of IR objects, the program under test). Each \
IR object has stage, op, target?, args, meta?.";

#[derive(Debug, Clone)]
pub struct Stage2Draft {
    pub prerequisites: Vec<Ir>,
    pub schema_list: Vec<Ir>,
}

pub struct Stage2IrGenerator<'a> {
    provider: &'a dyn GenerationProvider,
    opts: GenerationOptions,
}

impl<'a> Stage2IrGenerator<'a> {
    pub fn new(provider: &'a dyn GenerationProvider, opts: GenerationOptions) -> Self {
        Self { provider, opts }
    }

    pub async fn generate(&self, draft: &Stage1Draft, operation_name: &str) -> Result<Stage2Draft> {
        let instruction = draft.instruction.clone();
        let context = draft.context.clone();
        retry_generate(
            || render_template(STAGE2_TEMPLATE, &[("instruction", &instruction), ("context", &context), ("operation_name", operation_name)]),
            self.provider,
            &self.opts,
            |raw| Self::parse_and_validate(raw, operation_name),
        )
        .await
    }

    fn parse_and_validate(raw: &str, operation_name: &str) -> Result<Stage2Draft> {
        let value = repair_and_parse(raw)?;
        let prerequisites = Self::parse_ir_array(value.get("prerequisites"))?;
        let schema_list = Self::parse_ir_array(value.get("schema_list"))?;
        if schema_list.is_empty() {
            return Err(Error::Parse("stage2 response has an empty schema_list".into()));
        }
        if !schema_list.iter().any(|ir| ir.op_name().eq_ignore_ascii_case(operation_name)) {
            return Err(Error::Parse(format!(
                "stage2 schema_list does not contain the requested operation `{operation_name}`"
            )));
        }
        Ok(Stage2Draft { prerequisites, schema_list })
    }

    fn parse_ir_array(value: Option<&Value>) -> Result<Vec<Ir>> {
        let items = match value {
            Some(Value::Array(items)) => items.clone(),
            None => Vec::new(),
            Some(_) => return Err(Error::Parse("expected a JSON array of IR objects".into())),
        };
        items
            .into_iter()
            .map(|v| Ir::from_value(v).map_err(Error::from))
            .collect()
    }
}

pub const STAGE3_TEMPLATE: &str = "Instruction: {instruction}\n\
IR program: {schema_list}\n\
Produce exactly one JSON object with fields assertions (array), ranking \
(object or null), triggers (array), notes (string or null) that would verify \
this program's effect on a memory store.";

#[derive(Debug, Clone)]
pub struct Stage3Draft {
    pub expected: Expected,
    pub notes: Option<String>,
}

pub struct Stage3AssertionGenerator<'a> {
    provider: &'a dyn GenerationProvider,
    opts: GenerationOptions,
}

impl<'a> Stage3AssertionGenerator<'a> {
    pub fn new(provider: &'a dyn GenerationProvider, opts: GenerationOptions) -> Self {
        Self { provider, opts }
    }

    pub async fn generate(&self, draft: &Stage1Draft, schema_list: &[Ir]) -> Result<Stage3Draft> {
        let instruction = draft.instruction.clone();
        let schema_list_json = serde_json::to_string(schema_list).unwrap_or_default();
        retry_generate(
            || render_template(STAGE3_TEMPLATE, &[("instruction", &instruction), ("schema_list", &schema_list_json)]),
            self.provider,
            &self.opts,
            Self::parse_and_validate,
        )
        .await
    }

    fn parse_and_validate(raw: &str) -> Result<Stage3Draft> {
        let value = repair_and_parse(raw)?;
        let expected: Expected = serde_json::from_value(Value::Object(
            [
                ("assertions".to_string(), value.get("assertions").cloned().unwrap_or_else(|| json!([]))),
                ("ranking".to_string(), value.get("ranking").cloned().unwrap_or(Value::Null)),
                ("triggers".to_string(), value.get("triggers").cloned().unwrap_or_else(|| json!([]))),
            ]
            .into_iter()
            .collect(),
        ))?;
        let notes = value.get("notes").and_then(Value::as_str).map(str::to_string);
        Ok(Stage3Draft { expected, notes })
    }
}

/// Assembles a finished [`GenerationSample`] once all three stages have
/// produced their piece, assigning the canonical id.
pub fn assemble_sample(
    id: String,
    stage1: Stage1Draft,
    stage2: Stage2Draft,
    stage3: Stage3Draft,
) -> GenerationSample {
    let mut nl = std::collections::HashMap::new();
    nl.insert(stage1.classification.lang.clone(), stage1.instruction);

    GenerationSample {
        id,
        classification: stage1.classification,
        nl,
        prerequisites: stage2.prerequisites,
        schema_list: stage2.schema_list,
        init_db: None,
        expected: stage3.expected,
        notes: stage3.notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_id_has_the_documented_shape() {
        let id = canonical_sample_id("en", InstructionType::Direct, Structure::Single, "enc", 1);
        assert_eq!(id, "t2m-en-direct-single-enc-001");
    }

    #[test]
    fn normalize_classification_keys_fixes_common_misspellings() {
        let mut v = json!({"instruction": "direct", "struct": "single", "language": "en"});
        normalize_classification_keys(&mut v);
        assert_eq!(v["instruction_type"], json!("direct"));
        assert_eq!(v["structure"], json!("single"));
        assert_eq!(v["lang"], json!("en"));
    }

    #[test]
    fn render_template_substitutes_every_slot() {
        let out = render_template("hello {name}, op {op}", &[("name", "alice"), ("op", "Encode")]);
        assert_eq!(out, "hello alice, op Encode");
    }

    #[test]
    fn stage1_parse_rejects_context_shorter_than_minimum() {
        let raw = json!({
            "instruction": "do it",
            "context": "short",
            "classification": {"lang": "en", "instruction_type": "direct", "structure": "single"},
            "scenario_info": {}
        })
        .to_string();
        let err = Stage1InstructionGenerator::parse_and_validate(&raw, 50, "Encode").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn stage1_parse_accepts_well_formed_response() {
        let raw = json!({
            "instruction": "remember this meeting",
            "context": "a".repeat(60),
            "classification": {"lang": "en", "instruction_type": "direct", "structure": "single"},
            "scenario_info": {"operation": "Encode"}
        })
        .to_string();
        let draft = Stage1InstructionGenerator::parse_and_validate(&raw, 50, "Encode").unwrap();
        assert_eq!(draft.instruction, "remember this meeting");
    }

    #[test]
    fn stage2_parse_requires_requested_operation_present() {
        let raw = json!({
            "prerequisites": [],
            "schema_list": [{"stage": "STO", "op": "Promote", "target": {"ids": 1}, "args": {"weight": 0.9}}]
        })
        .to_string();
        let err = Stage2IrGenerator::parse_and_validate(&raw, "Encode").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn stage2_parse_accepts_matching_operation() {
        let raw = json!({
            "prerequisites": [],
            "schema_list": [{"stage": "ENC", "op": "Encode", "args": {"payload": {"text": "hi"}}}]
        })
        .to_string();
        let draft = Stage2IrGenerator::parse_and_validate(&raw, "Encode").unwrap();
        assert_eq!(draft.schema_list.len(), 1);
    }

    #[test]
    fn stage3_parse_defaults_missing_ranking_and_triggers() {
        let raw = json!({"assertions": [], "notes": "none"}).to_string();
        let draft = Stage3AssertionGenerator::parse_and_validate(&raw).unwrap();
        assert!(draft.expected.ranking.is_none());
        assert!(draft.expected.triggers.is_empty());
        assert_eq!(draft.notes.as_deref(), Some("none"));
    }
}
