//! SQL DDL for all Memoria tables.
//!
//! Defines `atoms`, `atom_tags`, `atom_connections`, `memory_log` and
//! `schema_meta`. All DDL uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

/// All schema DDL statements.
const SCHEMA_SQL: &str = r#"
-- Memory atoms (one per conversational exchange)
CREATE TABLE IF NOT EXISTS atoms (
    id TEXT PRIMARY KEY,
    user_input TEXT NOT NULL,
    response TEXT NOT NULL,
    emotion_label TEXT NOT NULL,
    emotion_code TEXT NOT NULL,
    emotion_score REAL NOT NULL CHECK(emotion_score >= 0.0 AND emotion_score <= 1.0),
    belief_vector TEXT NOT NULL,
    importance REAL NOT NULL,
    resonance_score REAL NOT NULL CHECK(resonance_score >= 0.0 AND resonance_score <= 100.0),
    embedding BLOB,
    timestamp TEXT NOT NULL,
    last_used TEXT,
    used_count INTEGER NOT NULL DEFAULT 0,
    session_id TEXT NOT NULL,
    topic TEXT NOT NULL DEFAULT '',
    sub_topic TEXT NOT NULL DEFAULT '',
    chain_id TEXT NOT NULL,
    user_id TEXT
);

CREATE INDEX IF NOT EXISTS idx_atoms_timestamp ON atoms(timestamp);
CREATE INDEX IF NOT EXISTS idx_atoms_rank ON atoms(resonance_score DESC, importance DESC, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_atoms_session ON atoms(session_id);
CREATE INDEX IF NOT EXISTS idx_atoms_topic ON atoms(topic);
CREATE INDEX IF NOT EXISTS idx_atoms_chain ON atoms(chain_id);
CREATE INDEX IF NOT EXISTS idx_atoms_user ON atoms(user_id);

-- Tag index
CREATE TABLE IF NOT EXISTS atom_tags (
    atom_id TEXT NOT NULL REFERENCES atoms(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    tag TEXT NOT NULL,
    PRIMARY KEY (atom_id, tag)
);

CREATE INDEX IF NOT EXISTS idx_atom_tags_tag ON atom_tags(tag);

-- Append-only chain links. target_id is deliberately not a foreign key:
-- dangling targets are filtered at read time.
CREATE TABLE IF NOT EXISTS atom_connections (
    atom_id TEXT NOT NULL REFERENCES atoms(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    target_id TEXT NOT NULL,
    reason TEXT NOT NULL,
    strength REAL NOT NULL CHECK(strength >= 0.0 AND strength <= 1.0),
    created_at TEXT NOT NULL,
    PRIMARY KEY (atom_id, position)
);

CREATE INDEX IF NOT EXISTS idx_connections_target ON atom_connections(target_id);

-- Audit log
CREATE TABLE IF NOT EXISTS memory_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL CHECK(operation IN ('create','importance','resonance','link','decay')),
    memory_id TEXT NOT NULL,
    details TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memory_log_memory ON memory_log(memory_id, operation);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
