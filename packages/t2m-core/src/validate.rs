//! Structural and semantic validation of an [`Ir`], run once at parse time
//! before any side effect reaches the engine (spec.md §7, "Validation error").

use crate::error::{Error, Result};
use crate::ir::{IrArgs, SplitStrategyName, TargetSpec, TimeRange};

/// Validate an already-typed [`Ir`]. Field paths in errors are dotted,
/// rooted at the failing argument (`target`, `args.set`, ...).
pub fn validate_ir(ir: &crate::ir::Ir) -> Result<()> {
    validate_stage_binding(ir)?;
    if let Some(target) = &ir.target {
        validate_target(target)?;
        validate_all_confirmation(ir, target)?;
    } else if requires_target(&ir.args) {
        return Err(Error::validation(
            "target",
            format!("{} requires a target", ir.op_name()),
        ));
    }
    validate_args(&ir.args)?;
    Ok(())
}

fn requires_target(args: &IrArgs) -> bool {
    // Encode creates a fresh row and never needs a target; every other op
    // acts on existing rows.
    !matches!(args, IrArgs::Encode(_))
}

fn validate_stage_binding(ir: &crate::ir::Ir) -> Result<()> {
    let expected = ir.args.required_stage();
    if ir.stage != expected {
        return Err(Error::validation(
            "stage",
            format!(
                "{} requires stage {}, got {}",
                ir.op_name(),
                expected.as_str(),
                ir.stage.as_str()
            ),
        ));
    }
    Ok(())
}

fn validate_target(target: &TargetSpec) -> Result<()> {
    if !target.has_selector() {
        return Err(Error::validation(
            "target",
            "target must provide at least one of ids, filter, search, or all",
        ));
    }
    if let Some(filter) = &target.filter {
        if let Some(tr) = &filter.time_range {
            validate_time_range(tr, "target.filter.time_range")?;
        }
        if let Some(limit) = filter.limit {
            if limit == 0 {
                return Err(Error::validation("target.filter.limit", "limit must be >= 1"));
            }
        }
    }
    // target.search.limit is optional (Open Question: preserve the loose
    // contract), but an explicit 0 is never valid for either limit source.
    if let Some(search) = &target.search {
        if search.limit == Some(0) {
            return Err(Error::validation("target.search.limit", "limit must be >= 1"));
        }
        if let Some(overrides) = &search.overrides {
            if overrides.k == Some(0) {
                return Err(Error::validation("target.search.overrides.k", "k must be >= 1"));
            }
        }
    }
    Ok(())
}

fn validate_time_range(tr: &TimeRange, field: &str) -> Result<()> {
    if !tr.is_well_formed() {
        return Err(Error::validation(
            field,
            "time_range needs either (start, end) or (relative, amount, unit), not both or neither",
        ));
    }
    Ok(())
}

/// Safety invariant: `all=true` combined with a write stage (STO) or a RET
/// scan must carry `meta.confirmation=true` or `meta.dry_run=true`.
fn validate_all_confirmation(ir: &crate::ir::Ir, target: &TargetSpec) -> Result<()> {
    if !target.all {
        return Ok(());
    }
    let confirmed = ir
        .meta
        .as_ref()
        .map(|m| m.confirmation || m.dry_run)
        .unwrap_or(false);
    if !confirmed {
        return Err(Error::validation(
            "meta.confirmation",
            "target.all=true requires meta.confirmation=true or meta.dry_run=true",
        ));
    }
    Ok(())
}

fn validate_args(args: &IrArgs) -> Result<()> {
    match args {
        IrArgs::Encode(a) => {
            if let Some(t) = &a.time {
                validate_timestamp(t, "args.time")?;
            }
        }
        // Label with no tags/facets/auto_generate_tags is not a validation
        // error: the engine runs it as a no-op returning affected_rows=0
        // (spec.md §4.5 Label "fails silently").
        IrArgs::Label(_) => {}
        IrArgs::Update(a) => {
            if a.set.embedding.is_some() {
                return Err(Error::SafetyRefusal(
                    "Update must not write the embedding field directly".into(),
                ));
            }
            let set = &a.set;
            let any_set = set.text.is_some()
                || set.time.is_some()
                || set.type_.is_some()
                || set.weight.is_some()
                || set.subject.is_some()
                || set.location.is_some()
                || set.topic.is_some()
                || set.facets.is_some()
                || set.auto_frequency.is_some()
                || set.expire_at.is_some()
                || set.next_auto_update_at.is_some()
                || set.permissions.read_perm_level.is_some()
                || set.permissions.write_perm_level.is_some();
            if !any_set {
                return Err(Error::validation("args.set", "Update.set must set at least one field"));
            }
        }
        IrArgs::Promote(a) => {
            let provided = [a.weight.is_some(), a.weight_delta.is_some(), a.remind.is_some()]
                .iter()
                .filter(|x| **x)
                .count();
            if provided == 0 {
                return Err(Error::validation(
                    "args",
                    "Promote requires one of weight, weight_delta, or remind",
                ));
            }
            if let Some(delta) = a.weight_delta {
                if !(-1.0..=1.0).contains(&delta) {
                    return Err(Error::validation("args.weight_delta", "weight_delta must be in [-1, 1]"));
                }
            }
        }
        IrArgs::Demote(a) => {
            if a.weight.is_none() && a.weight_delta.is_none() && !a.archive {
                return Err(Error::validation(
                    "args",
                    "Demote requires one of weight, weight_delta, or archive",
                ));
            }
        }
        IrArgs::Delete(a) => {
            if a.older_than.is_some() && a.time_range.is_some() {
                return Err(Error::validation(
                    "args",
                    "Delete accepts older_than or time_range, not both",
                ));
            }
            if let Some(tr) = &a.time_range {
                validate_time_range(tr, "args.time_range")?;
            }
        }
        IrArgs::Summarize(a) => {
            if a.max_tokens == 0 || a.max_tokens > 2000 {
                return Err(Error::validation("args.max_tokens", "max_tokens must be in 1..=2000"));
            }
        }
        IrArgs::Split(a) => {
            let ok = match a.strategy {
                SplitStrategyName::BySentences => a.params.by_sentences.is_some(),
                SplitStrategyName::ByChunks => a.params.by_chunks.is_some(),
                SplitStrategyName::Custom => a.params.custom.is_some(),
            };
            if !ok {
                return Err(Error::validation(
                    "args.params",
                    format!("missing params for strategy {:?}", a.strategy),
                ));
            }
        }
        IrArgs::Expire(a) => {
            if a.ttl.is_some() == a.until.is_some() {
                return Err(Error::validation(
                    "args",
                    "Expire requires exactly one of ttl or until",
                ));
            }
        }
        IrArgs::Merge(_) | IrArgs::Lock(_) | IrArgs::Retrieve(_) => {}
    }
    Ok(())
}

fn validate_timestamp(value: &str, field: &str) -> Result<()> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|_| ())
        .map_err(|_| Error::validation(field, format!("'{value}' is not a valid ISO-8601 timestamp")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::*;
    use serde_json::json;

    fn encode_ir() -> Ir {
        Ir::from_value(json!({
            "stage": "ENC",
            "op": "Encode",
            "args": {"payload": {"text": "hello"}}
        }))
        .unwrap()
    }

    #[test]
    fn encode_without_target_is_valid() {
        assert!(validate_ir(&encode_ir()).is_ok());
    }

    #[test]
    fn retrieve_without_target_is_rejected() {
        let ir = Ir::from_value(json!({
            "stage": "RET",
            "op": "Retrieve",
            "args": {}
        }))
        .unwrap();
        assert!(validate_ir(&ir).is_err());
    }

    #[test]
    fn all_true_without_confirmation_is_rejected() {
        let ir = Ir::from_value(json!({
            "stage": "STO",
            "op": "Delete",
            "target": {"all": true},
            "args": {}
        }))
        .unwrap();
        assert!(validate_ir(&ir).is_err());
    }

    #[test]
    fn all_true_with_dry_run_is_accepted() {
        let ir = Ir::from_value(json!({
            "stage": "STO",
            "op": "Delete",
            "target": {"all": true},
            "args": {},
            "meta": {"dry_run": true}
        }))
        .unwrap();
        assert!(validate_ir(&ir).is_ok());
    }

    #[test]
    fn update_embedding_write_is_a_safety_refusal() {
        let ir = Ir::from_value(json!({
            "stage": "STO",
            "op": "Update",
            "target": {"ids": 1},
            "args": {"set": {"embedding": [0.1, 0.2]}}
        }))
        .unwrap();
        match validate_ir(&ir) {
            Err(Error::SafetyRefusal(_)) => {}
            other => panic!("expected safety refusal, got {other:?}"),
        }
    }

    #[test]
    fn wrong_stage_is_rejected() {
        let ir = Ir::from_value(json!({
            "stage": "STO",
            "op": "Encode",
            "args": {"payload": {"text": "x"}}
        }));
        // Stage::Enc is the only literal accepted by serde for Encode's
        // required stage; passing STO still parses (stage is just an enum)
        // but validate_ir must reject the mismatch.
        let ir = ir.unwrap();
        assert!(validate_ir(&ir).is_err());
    }
}
