use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;
use crate::memory::scorer::EMOTION_LEXICON;
use crate::memory::types::NEUTRAL_LABEL;

/// Response from memory_stats.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_atoms: u64,
    /// Atoms recalled at least once.
    pub used_atoms: u64,
    pub shared_atoms: u64,
    pub by_emotion: BTreeMap<String, u64>,
    pub connections: u64,
    pub avg_importance: f64,
    pub avg_resonance: f64,
    pub db_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_atom: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_atom: Option<String>,
}

/// Compute memory store statistics.
///
/// If `user_id` is provided, counts cover that user's atoms plus shared ones.
/// `db_path` is used for file size calculation; pass None for in-memory databases.
pub fn memory_stats(
    conn: &Connection,
    user_id: Option<&str>,
    db_path: Option<&Path>,
) -> Result<StatsResponse> {
    let (total, used, shared, avg_importance, avg_resonance, oldest, newest) = conn.query_row(
        "SELECT COUNT(*), \
                COALESCE(SUM(used_count > 0), 0), \
                COALESCE(SUM(user_id IS NULL), 0), \
                COALESCE(AVG(importance), 0.0), \
                COALESCE(AVG(resonance_score), 0.0), \
                MIN(timestamp), MAX(timestamp) \
         FROM atoms WHERE (?1 IS NULL OR user_id = ?1 OR user_id IS NULL)",
        params![user_id],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        },
    )?;

    let db_size_bytes = db_path
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(StatsResponse {
        total_atoms: total as u64,
        used_atoms: used as u64,
        shared_atoms: shared as u64,
        by_emotion: count_by_emotion(conn, user_id)?,
        connections: count_connections(conn, user_id)?,
        avg_importance,
        avg_resonance,
        db_size_bytes,
        oldest_atom: oldest,
        newest_atom: newest,
    })
}

/// Count by emotion label. Every lexicon label is present, zero or not.
fn count_by_emotion(conn: &Connection, user_id: Option<&str>) -> Result<BTreeMap<String, u64>> {
    let mut map: BTreeMap<String, u64> = EMOTION_LEXICON
        .iter()
        .map(|(label, _, _)| (label.to_string(), 0))
        .collect();
    map.insert(NEUTRAL_LABEL.to_string(), 0);

    let mut stmt = conn.prepare(
        "SELECT emotion_label, COUNT(*) FROM atoms \
         WHERE (?1 IS NULL OR user_id = ?1 OR user_id IS NULL) GROUP BY emotion_label",
    )?;
    let rows = stmt
        .query_map(params![user_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (label, count) in rows {
        map.insert(label, count as u64);
    }
    Ok(map)
}

/// Count chain links whose source is visible to `user_id`.
fn count_connections(conn: &Connection, user_id: Option<&str>) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM atom_connections c JOIN atoms a ON a.id = c.atom_id \
         WHERE (?1 IS NULL OR a.user_id = ?1 OR a.user_id IS NULL)",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}
