//! Compiles a declarative [`AssertionSpec`] into a parameterised count query
//! and evaluates it against a [`MemoryStore`] (spec.md §4.6 step 5, §8
//! scenario S4, grounded on `original_source/bench/core/runner.py`'s
//! assertion evaluation and `t2m_store::MemoryStore::run_count_query`, which
//! this module is the sole caller of).

use t2m_core::sample::AssertionSpec;
use t2m_store::MemoryStore;

use crate::error::Result;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AssertionOutcome {
    pub name: String,
    pub passed: bool,
    pub actual: f64,
    pub message: String,
}

pub struct AssertionCompiler;

impl AssertionCompiler {
    /// `SELECT {agg}(*) as actual FROM {from} WHERE {where_clauses joined by AND}`,
    /// each clause already containing any `:param` placeholders the spec
    /// supplies (spec.md §3 AssertionSpec.select).
    pub fn compile_sql(spec: &AssertionSpec) -> String {
        let agg_expr = match spec.select.agg.as_str() {
            "count" => "COUNT(*)".to_string(),
            other => format!("{}(*)", other.to_uppercase()),
        };
        if spec.select.where_clauses.is_empty() {
            format!("SELECT {agg_expr} as actual FROM {}", spec.select.from)
        } else {
            let conditions = spec
                .select
                .where_clauses
                .iter()
                .map(|c| format!("({c})"))
                .collect::<Vec<_>>()
                .join(" AND ");
            format!("SELECT {agg_expr} as actual FROM {} WHERE {}", spec.select.from, conditions)
        }
    }

    /// Runs the compiled SQL with `spec.params` bound by name, then compares
    /// the scalar `actual` to `spec.expect` via its operator.
    pub fn evaluate(store: &MemoryStore, spec: &AssertionSpec) -> Result<AssertionOutcome> {
        let sql = Self::compile_sql(spec);

        let mut owned_params: Vec<(String, Box<dyn rusqlite::ToSql>)> = Vec::new();
        for (key, value) in &spec.params {
            let boxed: Box<dyn rusqlite::ToSql> = match value {
                serde_json::Value::String(s) => Box::new(s.clone()),
                serde_json::Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Box::new(i)
                    } else {
                        Box::new(n.as_f64().unwrap_or(0.0))
                    }
                }
                serde_json::Value::Bool(b) => Box::new(*b as i64),
                serde_json::Value::Null => Box::new(Option::<String>::None),
                other => Box::new(other.to_string()),
            };
            owned_params.push((format!(":{key}"), boxed));
        }
        let bound: Vec<(&str, &dyn rusqlite::ToSql)> =
            owned_params.iter().map(|(k, v)| (k.as_str(), v.as_ref())).collect();

        let actual = store.run_count_query(&sql, &bound)?;
        let expected = spec.expect.value.as_f64().unwrap_or_else(|| {
            spec.expect
                .value
                .as_i64()
                .map(|i| i as f64)
                .unwrap_or(0.0)
        });
        let passed = spec.expect.op.compare(actual, expected);
        let message = if passed {
            format!("{}: {actual} {:?} {expected} passed", spec.name, spec.expect.op)
        } else {
            format!("{}: {actual} {:?} {expected} failed", spec.name, spec.expect.op)
        };
        Ok(AssertionOutcome {
            name: spec.name.clone(),
            passed,
            actual,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use t2m_core::ir::{Facets, MemoryType, PermissionFields};
    use t2m_core::sample::{AssertionExpect, AssertionSelect, CompareOp};
    use t2m_store::NewRecord;

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::open_in_memory().unwrap();
        store
            .insert(
                NewRecord {
                    text: "alpha project notes".into(),
                    type_: MemoryType::Note,
                    tags: vec!["proj".into()],
                    facets: Facets::default(),
                    weight: 0.5,
                    embedding: None,
                    subject: None,
                    location: None,
                    topic: None,
                    source: None,
                    time: None,
                    auto_frequency: None,
                    next_auto_update_at: None,
                    expire_at: None,
                    permissions: PermissionFields::default(),
                },
                "2024-01-01T00:00:00Z",
            )
            .unwrap();
        store
    }

    #[test]
    fn compiles_where_clauses_joined_by_and() {
        let spec = AssertionSpec {
            name: "has_proj".into(),
            select: AssertionSelect {
                from: "memory".into(),
                where_clauses: vec!["deleted=0".into(), "tags LIKE :t".into()],
                agg: "count".into(),
            },
            expect: AssertionExpect {
                op: CompareOp::Ge,
                value: serde_json::json!(1),
            },
            params: HashMap::from([("t".into(), serde_json::json!("%\"proj\"%"))]),
        };
        let sql = AssertionCompiler::compile_sql(&spec);
        assert_eq!(
            sql,
            "SELECT COUNT(*) as actual FROM memory WHERE (deleted=0) AND (tags LIKE :t)"
        );
    }

    #[test]
    fn evaluate_passes_when_comparison_holds() {
        let store = seeded_store();
        let spec = AssertionSpec {
            name: "has_proj".into(),
            select: AssertionSelect {
                from: "memory".into(),
                where_clauses: vec!["deleted=0".into(), "tags LIKE :t".into()],
                agg: "count".into(),
            },
            expect: AssertionExpect {
                op: CompareOp::Ge,
                value: serde_json::json!(1),
            },
            params: HashMap::from([("t".into(), serde_json::json!("%\"proj\"%"))]),
        };
        let outcome = AssertionCompiler::evaluate(&store, &spec).unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.actual, 1.0);
    }

    #[test]
    fn evaluate_fails_when_comparison_does_not_hold() {
        let store = seeded_store();
        let spec = AssertionSpec {
            name: "none_deleted".into(),
            select: AssertionSelect {
                from: "memory".into(),
                where_clauses: vec!["deleted=1".into()],
                agg: "count".into(),
            },
            expect: AssertionExpect {
                op: CompareOp::Ge,
                value: serde_json::json!(1),
            },
            params: HashMap::new(),
        };
        let outcome = AssertionCompiler::evaluate(&store, &spec).unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.actual, 0.0);
    }
}
