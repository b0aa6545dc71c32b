//! Bit-exact DDL for the `memory` table (spec.md §6 "MemoryStore schema").
//! JSON-array columns: `tags`, `read_whitelist`, `read_blacklist`,
//! `write_whitelist`, `write_blacklist`, `lineage_parents`,
//! `lineage_children`. JSON-object column: `facets`. `embedding` stores a
//! JSON array of floats; `embedding_dim` duplicates its length.

pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS memory (
    id INTEGER PRIMARY KEY AUTOINCREMENT,

    text TEXT,
    type TEXT,

    subject TEXT,
    time TEXT,
    location TEXT,
    topic TEXT,
    tags TEXT,
    facets TEXT,

    weight REAL,

    embedding TEXT,
    embedding_dim INTEGER,
    embedding_model TEXT,
    embedding_provider TEXT,

    source TEXT,
    auto_frequency TEXT,
    next_auto_update_at TEXT,
    created_at TEXT,
    updated_at TEXT,

    expire_at TEXT,
    expire_action TEXT,
    expire_reason TEXT,

    read_perm_level TEXT,
    write_perm_level TEXT,
    read_whitelist TEXT,
    read_blacklist TEXT,
    write_whitelist TEXT,
    write_blacklist TEXT,

    lineage_parents TEXT,
    lineage_children TEXT,

    lock_mode TEXT,
    lock_reason TEXT,
    lock_policy TEXT,
    lock_expires TEXT,

    deleted INTEGER DEFAULT 0
);
"#;

pub const ALL_COLUMNS: &str = "id, text, type, subject, time, location, topic, tags, facets, \
    weight, embedding, embedding_dim, embedding_model, embedding_provider, \
    source, auto_frequency, next_auto_update_at, created_at, updated_at, \
    expire_at, expire_action, expire_reason, \
    read_perm_level, write_perm_level, read_whitelist, read_blacklist, write_whitelist, write_blacklist, \
    lineage_parents, lineage_children, \
    lock_mode, lock_reason, lock_policy, lock_expires, deleted";
