//! [`MemoryRecord`]: the row shape stored by `t2m-store` and returned by
//! Retrieve. Mirrors the reference SQLite schema's columns bit-for-bit
//! (spec.md §3, §6) rather than the wire IR shapes in [`crate::ir`].

use crate::ir::{Facets, MemoryType, PermissionFields};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    ReadOnly,
    AppendOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockState {
    pub mode: LockMode,
    pub reason: Option<String>,
    pub policy: Option<serde_json::Value>,
    pub expires: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpireAction {
    SoftDelete,
    HardDelete,
    Demote,
    Anonymize,
}

/// The `(vector, dimension, model, provider)` triple spec.md §3 requires to
/// be jointly present or jointly absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingInfo {
    pub vector: Vec<f32>,
    pub dimension: usize,
    pub model: String,
    pub provider: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Lineage {
    #[serde(default)]
    pub parents: Vec<i64>,
    #[serde(default)]
    pub children: Vec<i64>,
}

/// A single memory row. `embedding` is `None` only for records written with
/// `skip_embedding` or before an embedding provider has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: i64,
    pub text: String,
    #[serde(rename = "type")]
    pub type_: MemoryType,
    /// Duplicate-preserving in storage, set semantics at the engine layer
    /// (spec.md §3).
    pub tags: Vec<String>,
    pub facets: Facets,
    pub weight: f64,
    pub embedding: Option<EmbeddingInfo>,

    pub subject: Option<String>,
    pub location: Option<String>,
    pub topic: Option<String>,
    pub source: Option<String>,

    pub created_at: String,
    pub updated_at: String,
    pub time: Option<String>,
    pub auto_frequency: Option<String>,
    pub next_auto_update_at: Option<String>,

    pub expire_at: Option<String>,
    pub expire_action: Option<ExpireAction>,
    pub expire_reason: Option<String>,

    pub deleted: bool,

    pub lock: Option<LockState>,
    pub lineage: Lineage,

    pub permissions: PermissionFields,
}

impl MemoryRecord {
    /// A record's content as a single string for keyword matching and
    /// re-embedding, combining text with the facet fields the reference
    /// adapter also indexes (spec.md §4.5 hybrid ranking).
    pub fn searchable_text(&self) -> String {
        let mut parts = vec![self.text.clone()];
        if let Some(s) = &self.subject {
            parts.push(s.clone());
        }
        if let Some(l) = &self.location {
            parts.push(l.clone());
        }
        if let Some(t) = &self.topic {
            parts.push(t.clone());
        }
        parts.extend(self.tags.iter().cloned());
        parts.join(" ")
    }

    pub fn is_locked_against_write(&self) -> bool {
        matches!(
            self.lock,
            Some(LockState {
                mode: LockMode::ReadOnly,
                ..
            })
        )
    }

    /// True once an expiry has been scheduled and `now` has passed it;
    /// the engine never reaps on its own (spec.md §4.5 Expire), only
    /// trigger evaluation in the harness checks this.
    pub fn is_past_expiry(&self, now: &chrono::DateTime<chrono::Utc>) -> bool {
        match &self.expire_at {
            Some(at) => chrono::DateTime::parse_from_rfc3339(at)
                .map(|t| t.with_timezone(&chrono::Utc) < *now)
                .unwrap_or(false),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemoryRecord {
        MemoryRecord {
            id: 1,
            text: "met alice at the park".into(),
            type_: MemoryType::Event,
            tags: vec!["alice".into()],
            facets: Facets::default(),
            weight: 0.5,
            embedding: None,
            subject: Some("alice".into()),
            location: Some("park".into()),
            topic: None,
            source: None,
            created_at: "2024-01-01T00:00:00Z".into(),
            updated_at: "2024-01-01T00:00:00Z".into(),
            time: None,
            auto_frequency: None,
            next_auto_update_at: None,
            expire_at: None,
            expire_action: None,
            expire_reason: None,
            deleted: false,
            lock: None,
            lineage: Lineage::default(),
            permissions: PermissionFields::default(),
        }
    }

    #[test]
    fn searchable_text_includes_facets_and_tags() {
        let r = sample();
        let t = r.searchable_text();
        assert!(t.contains("alice"));
        assert!(t.contains("park"));
    }

    #[test]
    fn read_only_lock_blocks_writes() {
        let mut r = sample();
        r.lock = Some(LockState {
            mode: LockMode::ReadOnly,
            reason: None,
            policy: None,
            expires: None,
        });
        assert!(r.is_locked_against_write());
        r.lock = Some(LockState {
            mode: LockMode::AppendOnly,
            reason: None,
            policy: None,
            expires: None,
        });
        assert!(!r.is_locked_against_write());
    }

    #[test]
    fn expiry_check_compares_against_supplied_now() {
        let mut r = sample();
        r.expire_at = Some("2024-01-01T00:00:00Z".into());
        let before = chrono::DateTime::parse_from_rfc3339("2023-12-31T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let after = chrono::DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        assert!(!r.is_past_expiry(&before));
        assert!(r.is_past_expiry(&after));
    }
}
