//! Converts between a `memory` table row and [`t2m_core::MemoryRecord`].

use rusqlite::Row;
use t2m_core::ir::{Facets, MemoryType, PermissionFields};
use t2m_core::record::{EmbeddingInfo, ExpireAction, Lineage, LockMode, LockState, MemoryRecord};

use crate::error::Result;

fn json_vec(s: Option<String>) -> Result<Vec<String>> {
    Ok(match s {
        Some(s) if !s.is_empty() => serde_json::from_str(&s)?,
        _ => Vec::new(),
    })
}

fn json_ids(s: Option<String>) -> Result<Vec<i64>> {
    Ok(match s {
        Some(s) if !s.is_empty() => serde_json::from_str(&s)?,
        _ => Vec::new(),
    })
}

pub fn record_from_row(row: &Row) -> rusqlite::Result<MemoryRecord> {
    let to_rusqlite = |e: crate::error::Error| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    };

    let type_str: String = row.get("type")?;
    let type_: MemoryType = serde_json::from_value(serde_json::Value::String(type_str))
        .map_err(crate::error::Error::from)
        .map_err(to_rusqlite)?;

    let facets_json: Option<String> = row.get("facets")?;
    let facets: Facets = match facets_json {
        Some(s) if !s.is_empty() => serde_json::from_str(&s)
            .map_err(crate::error::Error::from)
            .map_err(to_rusqlite)?,
        _ => Facets::default(),
    };

    let tags = json_vec(row.get("tags")?).map_err(to_rusqlite)?;

    let embedding_vec: Option<String> = row.get("embedding")?;
    let embedding_dim: Option<i64> = row.get("embedding_dim")?;
    let embedding_model: Option<String> = row.get("embedding_model")?;
    let embedding_provider: Option<String> = row.get("embedding_provider")?;
    let embedding = match embedding_vec {
        Some(s) if !s.is_empty() => {
            let vector: Vec<f32> = serde_json::from_str(&s)
                .map_err(crate::error::Error::from)
                .map_err(to_rusqlite)?;
            Some(EmbeddingInfo {
                dimension: embedding_dim.unwrap_or(vector.len() as i64) as usize,
                vector,
                model: embedding_model.unwrap_or_default(),
                provider: embedding_provider.unwrap_or_default(),
            })
        }
        _ => None,
    };

    let expire_action: Option<String> = row.get("expire_action")?;
    let expire_action: Option<ExpireAction> = match expire_action {
        Some(s) if !s.is_empty() => Some(
            serde_json::from_value(serde_json::Value::String(s))
                .map_err(crate::error::Error::from)
                .map_err(to_rusqlite)?,
        ),
        _ => None,
    };

    let lock_mode: Option<String> = row.get("lock_mode")?;
    let lock = match lock_mode {
        Some(s) if !s.is_empty() => {
            let mode: LockMode = serde_json::from_value(serde_json::Value::String(s))
                .map_err(crate::error::Error::from)
                .map_err(to_rusqlite)?;
            let policy_json: Option<String> = row.get("lock_policy")?;
            let policy = match policy_json {
                Some(p) if !p.is_empty() => Some(
                    serde_json::from_str(&p)
                        .map_err(crate::error::Error::from)
                        .map_err(to_rusqlite)?,
                ),
                _ => None,
            };
            Some(LockState {
                mode,
                reason: row.get("lock_reason")?,
                policy,
                expires: row.get("lock_expires")?,
            })
        }
        _ => None,
    };

    let permissions = PermissionFields {
        read_perm_level: match row.get::<_, Option<String>>("read_perm_level")? {
            Some(s) if !s.is_empty() => Some(
                serde_json::from_value(serde_json::Value::String(s))
                    .map_err(crate::error::Error::from)
                    .map_err(to_rusqlite)?,
            ),
            _ => None,
        },
        write_perm_level: match row.get::<_, Option<String>>("write_perm_level")? {
            Some(s) if !s.is_empty() => Some(
                serde_json::from_value(serde_json::Value::String(s))
                    .map_err(crate::error::Error::from)
                    .map_err(to_rusqlite)?,
            ),
            _ => None,
        },
        read_whitelist: Some(json_vec(row.get("read_whitelist")?).map_err(to_rusqlite)?),
        read_blacklist: Some(json_vec(row.get("read_blacklist")?).map_err(to_rusqlite)?),
        write_whitelist: Some(json_vec(row.get("write_whitelist")?).map_err(to_rusqlite)?),
        write_blacklist: Some(json_vec(row.get("write_blacklist")?).map_err(to_rusqlite)?),
    };

    let lineage = Lineage {
        parents: json_ids(row.get("lineage_parents")?).map_err(to_rusqlite)?,
        children: json_ids(row.get("lineage_children")?).map_err(to_rusqlite)?,
    };

    Ok(MemoryRecord {
        id: row.get("id")?,
        text: row.get::<_, Option<String>>("text")?.unwrap_or_default(),
        type_,
        tags,
        facets,
        weight: row.get::<_, Option<f64>>("weight")?.unwrap_or(0.0),
        embedding,
        subject: row.get("subject")?,
        location: row.get("location")?,
        topic: row.get("topic")?,
        source: row.get("source")?,
        created_at: row.get::<_, Option<String>>("created_at")?.unwrap_or_default(),
        updated_at: row.get::<_, Option<String>>("updated_at")?.unwrap_or_default(),
        time: row.get("time")?,
        auto_frequency: row.get("auto_frequency")?,
        next_auto_update_at: row.get("next_auto_update_at")?,
        expire_at: row.get("expire_at")?,
        expire_action,
        expire_reason: row.get("expire_reason")?,
        deleted: row.get::<_, i64>("deleted")? != 0,
        lock,
        lineage,
        permissions,
    })
}
