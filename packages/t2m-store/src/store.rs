use std::path::Path;

use rusqlite::{params, params_from_iter, Connection};
use t2m_core::record::{EmbeddingInfo, MemoryRecord};

use crate::error::Result;
use crate::row::record_from_row;
use crate::schema::{ALL_COLUMNS, DDL};

/// The fields an Encode supplies; everything the store itself is
/// responsible for (`id`, `created_at`, `updated_at`) is filled in here.
pub struct NewRecord {
    pub text: String,
    pub type_: t2m_core::ir::MemoryType,
    pub tags: Vec<String>,
    pub facets: t2m_core::ir::Facets,
    pub weight: f64,
    pub embedding: Option<EmbeddingInfo>,
    pub subject: Option<String>,
    pub location: Option<String>,
    pub topic: Option<String>,
    pub source: Option<String>,
    pub time: Option<String>,
    pub auto_frequency: Option<String>,
    pub next_auto_update_at: Option<String>,
    pub expire_at: Option<String>,
    pub permissions: t2m_core::ir::PermissionFields,
}

/// A candidate row fetched for hybrid ranking: just enough to score without
/// paying for the full [`MemoryRecord`] deserialization (spec.md §4.5).
pub struct SearchCandidate {
    pub id: i64,
    pub text: String,
    pub vector: Vec<f32>,
    pub dimension: usize,
}

/// Relational store for memory records. Opens in-memory (sandbox/test use)
/// or file-backed (spec.md §2 "MemoryStore").
pub struct MemoryStore {
    conn: Connection,
}

impl MemoryStore {
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(DDL)?;
        Ok(Self { conn })
    }

    pub fn open_file(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(DDL)?;
        Ok(Self { conn })
    }

    /// Load a sandbox from a raw SQL script (an `init_db` `.sql` snapshot).
    pub fn open_in_memory_from_script(script: &str) -> Result<Self> {
        let store = Self::open_in_memory()?;
        store.conn.execute_batch(script)?;
        Ok(store)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn insert(&self, rec: NewRecord, now: &str) -> Result<i64> {
        let tags_json = serde_json::to_string(&rec.tags)?;
        let facets_json = serde_json::to_string(&rec.facets)?;
        let (embedding_json, dim, model, provider) = match &rec.embedding {
            Some(e) => (
                Some(serde_json::to_string(&e.vector)?),
                Some(e.dimension as i64),
                Some(e.model.clone()),
                Some(e.provider.clone()),
            ),
            None => (None, None, None, None),
        };
        let p = &rec.permissions;
        self.conn.execute(
            "INSERT INTO memory (text, type, subject, time, location, topic, tags, facets, weight, \
             embedding, embedding_dim, embedding_model, embedding_provider, source, auto_frequency, \
             next_auto_update_at, created_at, updated_at, expire_at, \
             read_perm_level, write_perm_level, read_whitelist, read_blacklist, write_whitelist, write_blacklist, \
             lineage_parents, lineage_children, deleted) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, \
             ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, 0)",
            params![
                rec.text,
                serde_json::to_value(rec.type_)?.as_str(),
                rec.subject,
                rec.time,
                rec.location,
                rec.topic,
                tags_json,
                facets_json,
                rec.weight,
                embedding_json,
                dim,
                model,
                provider,
                rec.source,
                rec.auto_frequency,
                rec.next_auto_update_at,
                now,
                now,
                rec.expire_at,
                p.read_perm_level.map(|v| serde_json::to_value(v).unwrap().as_str().unwrap().to_string()),
                p.write_perm_level.map(|v| serde_json::to_value(v).unwrap().as_str().unwrap().to_string()),
                serde_json::to_string(p.read_whitelist.as_deref().unwrap_or(&[]))?,
                serde_json::to_string(p.read_blacklist.as_deref().unwrap_or(&[]))?,
                serde_json::to_string(p.write_whitelist.as_deref().unwrap_or(&[]))?,
                serde_json::to_string(p.write_blacklist.as_deref().unwrap_or(&[]))?,
                "[]",
                "[]",
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get(&self, id: i64) -> Result<Option<MemoryRecord>> {
        let sql = format!("SELECT {ALL_COLUMNS} FROM memory WHERE id = ?1");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], record_from_row)?;
        match rows.next() {
            Some(r) => Ok(Some(r?)),
            None => Ok(None),
        }
    }

    pub fn get_many(&self, ids: &[i64]) -> Result<Vec<MemoryRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT {ALL_COLUMNS} FROM memory WHERE id IN ({placeholders})");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), record_from_row)?;
        rows.map(|r| r.map_err(Into::into)).collect()
    }

    /// Run a caller-built WHERE clause (already including `deleted=0` where
    /// relevant) against the full row set.
    pub fn query_where(&self, where_sql: &str, where_params: &[rusqlite::types::Value]) -> Result<Vec<MemoryRecord>> {
        let sql = format!("SELECT {ALL_COLUMNS} FROM memory WHERE {where_sql}");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(where_params.iter()), record_from_row)?;
        rows.map(|r| r.map_err(Into::into)).collect()
    }

    /// Candidates for hybrid ranking: rows with a non-null embedding
    /// matching the caller's base WHERE clause.
    pub fn search_candidates(
        &self,
        where_sql: &str,
        where_params: &[rusqlite::types::Value],
    ) -> Result<Vec<SearchCandidate>> {
        let sql = format!(
            "SELECT id, text, embedding, embedding_dim FROM memory WHERE ({where_sql}) AND embedding IS NOT NULL"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(where_params.iter()), |row| {
            let id: i64 = row.get(0)?;
            let text: Option<String> = row.get(1)?;
            let embedding_json: String = row.get(2)?;
            let dim: Option<i64> = row.get(3)?;
            Ok((id, text.unwrap_or_default(), embedding_json, dim))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, text, embedding_json, dim) = row?;
            let vector: Vec<f32> = serde_json::from_str(&embedding_json)?;
            let dimension = dim.map(|d| d as usize).unwrap_or(vector.len());
            out.push(SearchCandidate {
                id,
                text,
                vector,
                dimension,
            });
        }
        Ok(out)
    }

    /// Persist an in-memory-mutated [`MemoryRecord`] back over all columns.
    /// The engine reads, mutates, and writes back whole records rather than
    /// composing per-field `UPDATE` statements (spec.md Design Note:
    /// "adapter operations return result records", mirrored here as
    /// "the engine owns business logic, the store is dumb persistence").
    pub fn replace(&self, rec: &MemoryRecord, now: &str) -> Result<()> {
        let tags_json = serde_json::to_string(&rec.tags)?;
        let facets_json = serde_json::to_string(&rec.facets)?;
        let (embedding_json, dim, model, provider) = match &rec.embedding {
            Some(e) => (
                Some(serde_json::to_string(&e.vector)?),
                Some(e.dimension as i64),
                Some(e.model.clone()),
                Some(e.provider.clone()),
            ),
            None => (None, None, None, None),
        };
        let expire_action = rec
            .expire_action
            .map(|v| serde_json::to_value(v).unwrap().as_str().unwrap().to_string());
        let (lock_mode, lock_reason, lock_policy, lock_expires) = match &rec.lock {
            Some(l) => (
                Some(serde_json::to_value(l.mode)?.as_str().unwrap().to_string()),
                l.reason.clone(),
                match &l.policy {
                    Some(p) => Some(serde_json::to_string(p)?),
                    None => None,
                },
                l.expires.clone(),
            ),
            None => (None, None, None, None),
        };
        let p = &rec.permissions;
        self.conn.execute(
            "UPDATE memory SET text=?1, type=?2, subject=?3, time=?4, location=?5, topic=?6, tags=?7, \
             facets=?8, weight=?9, embedding=?10, embedding_dim=?11, embedding_model=?12, embedding_provider=?13, \
             source=?14, auto_frequency=?15, next_auto_update_at=?16, updated_at=?17, expire_at=?18, \
             expire_action=?19, expire_reason=?20, read_perm_level=?21, write_perm_level=?22, \
             read_whitelist=?23, read_blacklist=?24, write_whitelist=?25, write_blacklist=?26, \
             lineage_parents=?27, lineage_children=?28, lock_mode=?29, lock_reason=?30, lock_policy=?31, \
             lock_expires=?32, deleted=?33 WHERE id=?34",
            params![
                rec.text,
                serde_json::to_value(rec.type_)?.as_str(),
                rec.subject,
                rec.time,
                rec.location,
                rec.topic,
                tags_json,
                facets_json,
                rec.weight,
                embedding_json,
                dim,
                model,
                provider,
                rec.source,
                rec.auto_frequency,
                rec.next_auto_update_at,
                now,
                rec.expire_at,
                expire_action,
                rec.expire_reason,
                p.read_perm_level.map(|v| serde_json::to_value(v).unwrap().as_str().unwrap().to_string()),
                p.write_perm_level.map(|v| serde_json::to_value(v).unwrap().as_str().unwrap().to_string()),
                serde_json::to_string(p.read_whitelist.as_deref().unwrap_or(&[]))?,
                serde_json::to_string(p.read_blacklist.as_deref().unwrap_or(&[]))?,
                serde_json::to_string(p.write_whitelist.as_deref().unwrap_or(&[]))?,
                serde_json::to_string(p.write_blacklist.as_deref().unwrap_or(&[]))?,
                serde_json::to_string(&rec.lineage.parents)?,
                serde_json::to_string(&rec.lineage.children)?,
                lock_mode,
                lock_reason,
                lock_policy,
                lock_expires,
                rec.deleted as i64,
                rec.id,
            ],
        )?;
        Ok(())
    }

    pub fn soft_delete(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("UPDATE memory SET deleted=1 WHERE id IN ({placeholders})");
        self.conn.execute(&sql, params_from_iter(ids.iter()))?;
        Ok(())
    }

    pub fn hard_delete(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("DELETE FROM memory WHERE id IN ({placeholders})");
        self.conn.execute(&sql, params_from_iter(ids.iter()))?;
        Ok(())
    }

    /// Run a compiled assertion's count query and return the scalar result,
    /// for [`t2m_bench`]'s `AssertionCompiler` (spec.md §3 "AssertionSpec",
    /// §8 scenario S4).
    pub fn run_count_query(
        &self,
        sql: &str,
        named_params: &[(&str, &dyn rusqlite::ToSql)],
    ) -> Result<f64> {
        let value: f64 = self.conn.query_row(sql, named_params, |row| row.get(0))?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use t2m_core::ir::{Facets, MemoryType, PermissionFields};

    fn new_record(text: &str) -> NewRecord {
        NewRecord {
            text: text.into(),
            type_: MemoryType::Note,
            tags: vec!["t".into()],
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
        }
    }

    #[test]
    fn insert_and_get_round_trips() {
        let store = MemoryStore::open_in_memory().unwrap();
        let id = store.insert(new_record("hello"), "2024-01-01T00:00:00Z").unwrap();
        let rec = store.get(id).unwrap().unwrap();
        assert_eq!(rec.text, "hello");
        assert_eq!(rec.tags, vec!["t".to_string()]);
        assert!(!rec.deleted);
    }

    #[test]
    fn soft_delete_marks_row_but_keeps_it() {
        let store = MemoryStore::open_in_memory().unwrap();
        let id = store.insert(new_record("bye"), "2024-01-01T00:00:00Z").unwrap();
        store.soft_delete(&[id]).unwrap();
        let rec = store.get(id).unwrap().unwrap();
        assert!(rec.deleted);
    }

    #[test]
    fn hard_delete_removes_row() {
        let store = MemoryStore::open_in_memory().unwrap();
        let id = store.insert(new_record("bye"), "2024-01-01T00:00:00Z").unwrap();
        store.hard_delete(&[id]).unwrap();
        assert!(store.get(id).unwrap().is_none());
    }

    #[test]
    fn replace_persists_mutated_record() {
        let store = MemoryStore::open_in_memory().unwrap();
        let id = store.insert(new_record("before"), "2024-01-01T00:00:00Z").unwrap();
        let mut rec = store.get(id).unwrap().unwrap();
        rec.weight = 0.9;
        rec.text = "after".into();
        store.replace(&rec, "2024-01-02T00:00:00Z").unwrap();
        let reloaded = store.get(id).unwrap().unwrap();
        assert_eq!(reloaded.text, "after");
        assert!((reloaded.weight - 0.9).abs() < 1e-9);
        assert_eq!(reloaded.updated_at, "2024-01-02T00:00:00Z");
    }
}
