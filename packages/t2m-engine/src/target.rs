//! Translates a [`TargetSpec`] into a SQL WHERE clause (spec.md §4.5
//! Retrieve target kinds, grounded on `sqlite_adapter.py::_where_from_target`).

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use t2m_core::ir::{Filter, IdsSpec, Relative, TimeUnit};

pub fn unit_duration(unit: TimeUnit, amount: i64) -> chrono::Duration {
    match unit {
        TimeUnit::Minutes => chrono::Duration::minutes(amount),
        TimeUnit::Hours => chrono::Duration::hours(amount),
        TimeUnit::Days => chrono::Duration::days(amount),
        TimeUnit::Weeks => chrono::Duration::weeks(amount),
        TimeUnit::Months => chrono::Duration::days(amount * 30),
        TimeUnit::Years => chrono::Duration::days(amount * 365),
    }
}

/// WHERE clause for `target.ids`.
pub fn ids_where(ids: &IdsSpec) -> (String, Vec<SqlValue>) {
    match ids {
        IdsSpec::One(id) => ("id = ?".to_string(), vec![SqlValue::Integer(*id)]),
        IdsSpec::Many(ids) => {
            let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            (
                format!("id IN ({placeholders})"),
                ids.iter().map(|id| SqlValue::Integer(*id)).collect(),
            )
        }
    }
}

/// WHERE clause for `target.filter`, resolving relative time ranges against
/// `now` (spec.md §3 TargetSpec, §4.5).
pub fn filter_where(filter: &Filter, now: &DateTime<Utc>) -> (String, Vec<SqlValue>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();

    if let Some(tags) = &filter.has_tags {
        for tag in tags {
            clauses.push("tags LIKE ?".to_string());
            params.push(SqlValue::Text(format!("%\"{tag}\"%")));
        }
    }
    if let Some(tags) = &filter.not_tags {
        for tag in tags {
            clauses.push("(tags IS NULL OR tags NOT LIKE ?)".to_string());
            params.push(SqlValue::Text(format!("%\"{tag}\"%")));
        }
    }
    if let Some(t) = &filter.type_ {
        clauses.push("type = ?".to_string());
        params.push(SqlValue::Text(serde_json::to_value(t).unwrap().as_str().unwrap().to_string()));
    }
    if let Some(tr) = &filter.time_range {
        if let (Some(start), Some(end)) = (&tr.start, &tr.end) {
            clauses.push("time >= ? AND time <= ?".to_string());
            params.push(SqlValue::Text(start.clone()));
            params.push(SqlValue::Text(end.clone()));
        } else if let (Some(rel), Some(amount), Some(unit)) = (tr.relative, tr.amount, tr.unit) {
            let delta = unit_duration(unit, amount);
            let (start, end) = match rel {
                Relative::Last => (*now - delta, *now),
                Relative::Next => (*now, *now + delta),
            };
            clauses.push("time >= ? AND time <= ?".to_string());
            params.push(SqlValue::Text(start.to_rfc3339()));
            params.push(SqlValue::Text(end.to_rfc3339()));
        }
    }
    if let Some(subject) = &filter.subject {
        clauses.push("subject = ?".to_string());
        params.push(SqlValue::Text(subject.clone()));
    }
    if let Some(location) = &filter.location {
        clauses.push("location = ?".to_string());
        params.push(SqlValue::Text(location.clone()));
    }
    if let Some(topic) = &filter.topic {
        clauses.push("topic = ?".to_string());
        params.push(SqlValue::Text(topic.clone()));
    }
    if let Some(w) = filter.weight_gte {
        clauses.push("weight >= ?".to_string());
        params.push(SqlValue::Real(w));
    }
    if let Some(w) = filter.weight_lte {
        clauses.push("weight <= ?".to_string());
        params.push(SqlValue::Real(w));
    }
    if let Some(t) = &filter.expire_before {
        clauses.push("expire_at IS NOT NULL AND expire_at < ?".to_string());
        params.push(SqlValue::Text(t.clone()));
    }
    if let Some(t) = &filter.expire_after {
        clauses.push("expire_at IS NOT NULL AND expire_at > ?".to_string());
        params.push(SqlValue::Text(t.clone()));
    }

    if clauses.is_empty() {
        ("1=1".to_string(), Vec::new())
    } else {
        (clauses.join(" AND "), params)
    }
}

/// WHERE clause for the non-search parts of a target (`ids`, `filter`,
/// `all`), used both standalone and as the base constraint a resolved
/// search id set is intersected with.
pub fn base_where(
    ids: Option<&IdsSpec>,
    filter: Option<&Filter>,
    all: bool,
    now: &DateTime<Utc>,
) -> (String, Vec<SqlValue>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();

    if let Some(ids) = ids {
        let (sql, p) = ids_where(ids);
        clauses.push(sql);
        params.extend(p);
    }
    if let Some(filter) = filter {
        let (sql, p) = filter_where(filter, now);
        if sql != "1=1" {
            clauses.push(sql);
            params.extend(p);
        }
    }
    let _ = all; // `all` contributes no extra predicate; deleted=0 is applied by the caller.

    if clauses.is_empty() {
        ("1=1".to_string(), Vec::new())
    } else {
        (clauses.join(" AND "), params)
    }
}
