//! Memory Store: the durable, single source of truth for atoms.
//!
//! [`store_atom`] is the only way atoms are created. After creation only four
//! things may change: importance ([`update_importance`]), resonance
//! ([`update_resonance`]), usage ([`touch_usage`]) and the append-only
//! connection list ([`append_connection`]). Every other column is write-once.
//!
//! Rows are read as [`AtomRecord`]s (the raw column values) and turned into
//! [`MemoryAtom`]s by [`AtomRecord::into_atom`], which rejects malformed rows.
//! Batch readers hand back records so callers can skip a bad row instead of
//! failing the whole batch.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;

use crate::error::{MemoryError, Result};
use crate::memory::types::{ChainLink, MemoryAtom, NewAtom, SearchFilter, BELIEF_DIM};
use crate::memory::{bytes_to_embedding, embedding_to_bytes, format_timestamp, parse_timestamp};

const ATOM_COLUMNS: &str = "a.id, a.user_input, a.response, a.emotion_label, a.emotion_code, \
     a.emotion_score, a.belief_vector, a.importance, a.resonance_score, a.embedding, \
     a.timestamp, a.last_used, a.used_count, a.session_id, a.topic, a.sub_topic, \
     a.chain_id, a.user_id";

/// An atom as stored, before field validation.
#[derive(Debug, Clone)]
pub struct AtomRecord {
    pub id: String,
    pub user_input: String,
    pub response: String,
    pub tags: Vec<String>,
    pub emotion_label: String,
    pub emotion_code: String,
    pub emotion_score: f64,
    pub belief_vector: String,
    pub importance: f64,
    pub resonance_score: f64,
    pub embedding: Vec<f32>,
    pub connections: Vec<ChainLink>,
    pub timestamp: String,
    pub last_used: Option<String>,
    pub used_count: i64,
    pub session_id: String,
    pub topic: String,
    pub sub_topic: String,
    pub chain_id: String,
    pub user_id: Option<String>,
}

impl AtomRecord {
    /// Validate the raw columns and build a [`MemoryAtom`].
    pub fn into_atom(self) -> Result<MemoryAtom> {
        let timestamp = parse_timestamp(&self.timestamp).ok_or_else(|| {
            MemoryError::Validation(format!("atom {} has unparseable timestamp", self.id))
        })?;
        let last_used = match self.last_used.as_deref() {
            Some(raw) => Some(parse_timestamp(raw).ok_or_else(|| {
                MemoryError::Validation(format!("atom {} has unparseable last_used", self.id))
            })?),
            None => None,
        };
        let components: Vec<f32> = serde_json::from_str(&self.belief_vector)?;
        let belief_vector: [f32; BELIEF_DIM] = components.try_into().map_err(|v: Vec<f32>| {
            MemoryError::Validation(format!(
                "atom {} has belief vector of length {}",
                self.id,
                v.len()
            ))
        })?;

        Ok(MemoryAtom {
            id: self.id,
            user_input: self.user_input,
            response: self.response,
            tags: self.tags,
            emotion_label: self.emotion_label,
            emotion_code: self.emotion_code,
            emotion_score: self.emotion_score as f32,
            belief_vector,
            importance: self.importance,
            resonance_score: self.resonance_score,
            embedding: self.embedding,
            connections: self.connections,
            timestamp,
            last_used,
            used_count: u32::try_from(self.used_count.max(0)).unwrap_or(u32::MAX),
            session_id: self.session_id,
            topic: self.topic,
            sub_topic: self.sub_topic,
            chain_id: self.chain_id,
            user_id: self.user_id,
        })
    }
}

/// Entry in the `memory_log` audit table.
#[derive(Debug, Serialize)]
pub struct LogEntry {
    pub operation: String,
    pub details: Option<serde_json::Value>,
    pub created_at: String,
}

/// Persist a new atom with its tags and a `create` audit entry. Returns the atom id.
///
/// Importance is stored as given: the store knows no policy. Callers clip it
/// to the owner's range first, as [`MemoryEngine::store_exchange`] does.
///
/// [`MemoryEngine::store_exchange`]: crate::engine::MemoryEngine::store_exchange
pub fn store_atom(conn: &mut Connection, atom: &NewAtom) -> Result<String> {
    validate_new_atom(atom)?;

    let id = atom
        .id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
    let timestamp = format_timestamp(atom.timestamp.unwrap_or_else(Utc::now));
    let chain_id = atom
        .chain_id
        .clone()
        .unwrap_or_else(|| atom.derived_chain_id());
    let belief_json = serde_json::to_string(&atom.belief_vector.to_vec())?;
    let embedding = (!atom.embedding.is_empty()).then(|| embedding_to_bytes(&atom.embedding));

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if atom_exists(&tx, &id)? {
        return Err(MemoryError::Validation(format!("atom id already exists: {id}")));
    }

    tx.execute(
        "INSERT INTO atoms (id, user_input, response, emotion_label, emotion_code, emotion_score, \
         belief_vector, importance, resonance_score, embedding, timestamp, last_used, used_count, \
         session_id, topic, sub_topic, chain_id, user_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL, 0, ?12, ?13, ?14, ?15, ?16)",
        params![
            id,
            atom.user_input,
            atom.response,
            atom.emotion.label,
            atom.emotion.code,
            f64::from(atom.emotion.score),
            belief_json,
            atom.importance,
            atom.resonance_score,
            embedding,
            timestamp,
            atom.session_id,
            atom.topic,
            atom.sub_topic,
            chain_id,
            atom.user_id,
        ],
    )?;

    let mut position = 0i64;
    for tag in &atom.tags {
        let tag = tag.trim();
        if tag.is_empty() {
            continue;
        }
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO atom_tags (atom_id, position, tag) VALUES (?1, ?2, ?3)",
            params![id, position, tag],
        )?;
        position += inserted as i64;
    }

    write_audit_log(
        &tx,
        "create",
        &id,
        Some(&serde_json::json!({
            "importance": atom.importance,
            "resonance_score": atom.resonance_score,
        })),
    )?;
    tx.commit()?;

    tracing::debug!(atom_id = %id, tags = position, "atom stored");
    Ok(id)
}

fn validate_new_atom(atom: &NewAtom) -> Result<()> {
    if atom.user_input.trim().is_empty() && atom.response.trim().is_empty() {
        return Err(MemoryError::Validation(
            "user_input and response are both empty".into(),
        ));
    }
    if !(0.0..=1.0).contains(&atom.emotion.score) {
        return Err(MemoryError::Validation(format!(
            "emotion_score {} outside [0, 1]",
            atom.emotion.score
        )));
    }
    if !(0.0..=100.0).contains(&atom.resonance_score) {
        return Err(MemoryError::Validation(format!(
            "resonance_score {} outside [0, 100]",
            atom.resonance_score
        )));
    }
    if !atom.importance.is_finite() {
        return Err(MemoryError::Validation("importance must be finite".into()));
    }
    if atom.belief_vector.iter().any(|x| !(0.0..=1.0).contains(x)) {
        return Err(MemoryError::Validation(
            "belief vector components must be within [0, 1]".into(),
        ));
    }
    if atom.embedding.iter().any(|x| !x.is_finite()) {
        return Err(MemoryError::Validation("embedding must be finite".into()));
    }
    Ok(())
}

/// Fetch one atom by id.
pub fn get_atom(conn: &Connection, id: &str) -> Result<MemoryAtom> {
    get_record(conn, id)?
        .ok_or_else(|| MemoryError::NotFound(id.to_string()))?
        .into_atom()
}

pub fn get_record(conn: &Connection, id: &str) -> Result<Option<AtomRecord>> {
    let sql = format!("SELECT {ATOM_COLUMNS} FROM atoms a WHERE a.id = ?1");
    let record = conn
        .query_row(&sql, params![id], record_from_row)
        .optional()?;
    match record {
        Some(record) => Ok(Some(attach_children(conn, record)?)),
        None => Ok(None),
    }
}

/// Batch-fetch records, preserving the order of `ids`. Unknown ids are skipped.
pub fn fetch_records(conn: &Connection, ids: &[String]) -> Result<Vec<AtomRecord>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT {ATOM_COLUMNS} FROM atoms a WHERE a.id IN ({})",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt
        .query_map(params_from_iter(ids.iter()), record_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.sort_by_key(|r| ids.iter().position(|id| *id == r.id));
    rows.into_iter().map(|r| attach_children(conn, r)).collect()
}

/// Filtered search ordered by resonance, importance and recency, with id as the final tie-break.
pub fn search_records(
    conn: &Connection,
    filter: &SearchFilter,
    limit: usize,
) -> Result<Vec<AtomRecord>> {
    let mut sql = format!("SELECT {ATOM_COLUMNS} FROM atoms a WHERE 1 = 1");
    let mut args: Vec<Value> = Vec::new();

    let tags: Vec<&str> = filter
        .tags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    if !tags.is_empty() {
        let marks = vec!["?"; tags.len()].join(", ");
        sql.push_str(&format!(
            " AND EXISTS (SELECT 1 FROM atom_tags t WHERE t.atom_id = a.id AND t.tag IN ({marks}))"
        ));
        args.extend(tags.iter().map(|t| Value::Text(t.to_string())));
    }
    if let Some(text) = &filter.mentioned_in {
        sql.push_str(
            " AND EXISTS (SELECT 1 FROM atom_tags t WHERE t.atom_id = a.id \
             AND length(t.tag) >= 2 AND instr(?, t.tag) > 0)",
        );
        args.push(Value::Text(text.clone()));
    }
    if let Some(session) = &filter.session_id {
        sql.push_str(" AND a.session_id = ?");
        args.push(Value::Text(session.clone()));
    }
    if let Some(user) = &filter.visible_to {
        sql.push_str(" AND (a.user_id = ? OR a.user_id IS NULL)");
        args.push(Value::Text(user.clone()));
    }
    if let Some(range) = &filter.time_range {
        sql.push_str(" AND a.timestamp >= ? AND a.timestamp <= ?");
        args.push(Value::Text(format_timestamp(range.start)));
        args.push(Value::Text(format_timestamp(range.end)));
    }
    sql.push_str(
        " ORDER BY a.resonance_score DESC, a.importance DESC, a.timestamp DESC, a.id ASC LIMIT ?",
    );
    args.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(args), record_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(|r| attach_children(conn, r)).collect()
}

/// [`search_records`], validated. Malformed rows are logged and left out.
pub fn search_atoms(
    conn: &Connection,
    filter: &SearchFilter,
    limit: usize,
) -> Result<Vec<MemoryAtom>> {
    Ok(valid_atoms(search_records(conn, filter, limit)?))
}

/// The `window` most recent atoms, newest first.
pub fn recent_atoms(conn: &Connection, window: usize) -> Result<Vec<MemoryAtom>> {
    let sql = format!(
        "SELECT {ATOM_COLUMNS} FROM atoms a ORDER BY a.timestamp DESC, a.id DESC LIMIT ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![i64::try_from(window).unwrap_or(i64::MAX)], record_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let records = rows
        .into_iter()
        .map(|r| attach_children(conn, r))
        .collect::<Result<Vec<_>>>()?;
    Ok(valid_atoms(records))
}

/// Most recent atom whose topic equals `topic` (trimmed, case-insensitive).
pub fn latest_atom_by_topic(conn: &Connection, topic: &str) -> Result<Option<MemoryAtom>> {
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM atoms WHERE lower(trim(topic)) = lower(trim(?1)) \
             ORDER BY timestamp DESC, id DESC LIMIT 1",
            params![topic],
            |row| row.get(0),
        )
        .optional()?;
    id.map(|id| get_atom(conn, &id)).transpose()
}

/// Atoms sharing a `chain_id`, oldest first.
pub fn chain_atoms(conn: &Connection, chain_id: &str) -> Result<Vec<MemoryAtom>> {
    let sql = format!(
        "SELECT {ATOM_COLUMNS} FROM atoms a WHERE a.chain_id = ?1 ORDER BY a.timestamp ASC, a.id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![chain_id], record_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let records = rows
        .into_iter()
        .map(|r| attach_children(conn, r))
        .collect::<Result<Vec<_>>>()?;
    Ok(valid_atoms(records))
}

/// `(id, embedding, timestamp)` for every atom with a stored embedding.
pub fn index_entries(conn: &Connection) -> Result<Vec<(String, Vec<f32>, DateTime<Utc>)>> {
    let mut stmt = conn.prepare(
        "SELECT id, embedding, timestamp FROM atoms \
         WHERE embedding IS NOT NULL AND length(embedding) > 0",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .filter_map(|(id, bytes, ts)| match parse_timestamp(&ts) {
            Some(ts) => Some((id, bytes_to_embedding(&bytes), ts)),
            None => {
                tracing::warn!(
                    atom_id = %id,
                    stage = "index",
                    "skipping atom with unparseable timestamp"
                );
                None
            }
        })
        .collect())
}

/// Set importance. The caller is responsible for clipping to the policy range.
pub fn update_importance(conn: &Connection, id: &str, importance: f64) -> Result<()> {
    if !importance.is_finite() {
        return Err(MemoryError::Validation("importance must be finite".into()));
    }
    let previous: Option<f64> = conn
        .query_row(
            "SELECT importance FROM atoms WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(previous) = previous else {
        return Err(MemoryError::NotFound(id.to_string()));
    };
    conn.execute(
        "UPDATE atoms SET importance = ?1 WHERE id = ?2",
        params![importance, id],
    )?;
    write_audit_log(
        conn,
        "importance",
        id,
        Some(&serde_json::json!({"from": previous, "to": importance})),
    )?;
    Ok(())
}

/// Set resonance, clamped to `[0, 100]`.
pub fn update_resonance(conn: &Connection, id: &str, resonance: f64) -> Result<()> {
    if !resonance.is_finite() {
        return Err(MemoryError::Validation("resonance must be finite".into()));
    }
    let resonance = resonance.clamp(0.0, 100.0);
    let rows = conn.execute(
        "UPDATE atoms SET resonance_score = ?1 WHERE id = ?2",
        params![resonance, id],
    )?;
    if rows == 0 {
        return Err(MemoryError::NotFound(id.to_string()));
    }
    write_audit_log(
        conn,
        "resonance",
        id,
        Some(&serde_json::json!({"to": resonance})),
    )?;
    Ok(())
}

/// Record a recall hit: `used_count + 1`, `last_used = now`.
pub fn touch_usage(conn: &Connection, id: &str, now: DateTime<Utc>) -> Result<()> {
    let rows = conn.execute(
        "UPDATE atoms SET used_count = used_count + 1, last_used = ?1 WHERE id = ?2",
        params![format_timestamp(now), id],
    )?;
    if rows == 0 {
        return Err(MemoryError::NotFound(id.to_string()));
    }
    Ok(())
}

/// Append a connection unless the atom already holds `max` of them.
///
/// Returns `false` for the capped no-op. Both ends must exist at link time.
pub fn append_connection(
    conn: &mut Connection,
    id: &str,
    edge: &ChainLink,
    max: usize,
) -> Result<bool> {
    if !edge.strength.is_finite() {
        return Err(MemoryError::Validation("connection strength must be finite".into()));
    }
    let strength = edge.strength.clamp(0.0, 1.0);

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    if !atom_exists(&tx, id)? {
        return Err(MemoryError::NotFound(id.to_string()));
    }
    if !atom_exists(&tx, &edge.target_id)? {
        return Err(MemoryError::NotFound(edge.target_id.clone()));
    }

    let count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM atom_connections WHERE atom_id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    if count as usize >= max {
        return Ok(false);
    }

    tx.execute(
        "INSERT INTO atom_connections (atom_id, position, target_id, reason, strength, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            count,
            edge.target_id,
            edge.reason,
            strength,
            format_timestamp(Utc::now())
        ],
    )?;
    write_audit_log(
        &tx,
        "link",
        id,
        Some(&serde_json::json!({"target_id": edge.target_id, "strength": strength})),
    )?;
    tx.commit()?;
    Ok(true)
}

/// Whether a `decay` audit entry exists for `id` on the UTC day of `now`.
pub fn decay_applied_on(conn: &Connection, id: &str, now: DateTime<Utc>) -> Result<bool> {
    let day = now.format("%Y-%m-%d").to_string();
    let found: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM memory_log WHERE operation = 'decay' \
         AND memory_id = ?1 AND substr(created_at, 1, 10) = ?2)",
        params![id, day],
        |row| row.get(0),
    )?;
    Ok(found)
}

/// Audit entries for one atom, oldest first.
pub fn audit_log(conn: &Connection, id: &str) -> Result<Vec<LogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT operation, details, created_at FROM memory_log \
         WHERE memory_id = ?1 ORDER BY created_at, id",
    )?;
    let rows = stmt
        .query_map(params![id], |row| {
            let details: Option<String> = row.get(1)?;
            Ok(LogEntry {
                operation: row.get(0)?,
                details: details.and_then(|s| serde_json::from_str(&s).ok()),
                created_at: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Write an entry to the memory_log audit table.
pub fn write_audit_log(
    conn: &Connection,
    operation: &str,
    memory_id: &str,
    details: Option<&serde_json::Value>,
) -> Result<()> {
    write_audit_log_at(conn, operation, memory_id, details, Utc::now())
}

/// [`write_audit_log`] with an explicit timestamp (batch jobs stamp their cycle time).
pub fn write_audit_log_at(
    conn: &Connection,
    operation: &str,
    memory_id: &str,
    details: Option<&serde_json::Value>,
    at: DateTime<Utc>,
) -> Result<()> {
    let details_json = details.map(|d| d.to_string());
    conn.execute(
        "INSERT INTO memory_log (operation, memory_id, details, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![operation, memory_id, details_json, format_timestamp(at)],
    )?;
    Ok(())
}

fn atom_exists(conn: &Connection, id: &str) -> Result<bool> {
    let found: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM atoms WHERE id = ?1)",
        params![id],
        |row| row.get(0),
    )?;
    Ok(found)
}

fn valid_atoms(records: Vec<AtomRecord>) -> Vec<MemoryAtom> {
    records
        .into_iter()
        .filter_map(|record| {
            let id = record.id.clone();
            match record.into_atom() {
                Ok(atom) => Some(atom),
                Err(e) => {
                    tracing::warn!(atom_id = %id, error = %e, "skipping malformed atom");
                    None
                }
            }
        })
        .collect()
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AtomRecord> {
    let embedding: Option<Vec<u8>> = row.get(9)?;
    Ok(AtomRecord {
        id: row.get(0)?,
        user_input: row.get(1)?,
        response: row.get(2)?,
        tags: Vec::new(),
        emotion_label: row.get(3)?,
        emotion_code: row.get(4)?,
        emotion_score: row.get(5)?,
        belief_vector: row.get(6)?,
        importance: row.get(7)?,
        resonance_score: row.get(8)?,
        embedding: embedding.map(|b| bytes_to_embedding(&b)).unwrap_or_default(),
        connections: Vec::new(),
        timestamp: row.get(10)?,
        last_used: row.get(11)?,
        used_count: row.get(12)?,
        session_id: row.get(13)?,
        topic: row.get(14)?,
        sub_topic: row.get(15)?,
        chain_id: row.get(16)?,
        user_id: row.get(17)?,
    })
}

fn attach_children(conn: &Connection, mut record: AtomRecord) -> Result<AtomRecord> {
    let mut stmt = conn.prepare_cached(
        "SELECT tag FROM atom_tags WHERE atom_id = ?1 ORDER BY position",
    )?;
    record.tags = stmt
        .query_map(params![record.id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;

    let mut stmt = conn.prepare_cached(
        "SELECT target_id, reason, strength FROM atom_connections \
         WHERE atom_id = ?1 ORDER BY position",
    )?;
    record.connections = stmt
        .query_map(params![record.id], |row| {
            Ok(ChainLink {
                target_id: row.get(0)?,
                reason: row.get(1)?,
                strength: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::memory::types::EmotionReading;
    use chrono::Duration;

    fn test_db() -> Connection {
        db::open_memory_database().unwrap()
    }

    fn link(target: &str) -> ChainLink {
        ChainLink {
            target_id: target.to_string(),
            reason: "test".into(),
            strength: 0.5,
        }
    }

    #[test]
    fn test_store_and_get_roundtrip() {
        let mut conn = test_db();
        let mut atom = NewAtom::new("일본 여행 언제 가?", "다음달에 가요", "s1")
            .with_tags(["일정", "여행", "일본"])
            .with_topic("japan trip")
            .with_resonance(90.0)
            .with_importance(8000.0)
            .with_embedding(vec![0.6, 0.8])
            .with_user("alice");
        atom.emotion = EmotionReading {
            label: "joy".into(),
            code: "E101".into(),
            score: 0.6,
        };
        atom.belief_vector[0] = 0.1;

        let id = store_atom(&mut conn, &atom).unwrap();
        let got = get_atom(&conn, &id).unwrap();

        assert_eq!(got.user_input, atom.user_input);
        assert_eq!(got.response, atom.response);
        assert_eq!(got.tags, vec!["일정", "여행", "일본"]);
        assert_eq!(got.emotion_label, "joy");
        assert!((got.emotion_score - 0.6).abs() < 1e-6);
        assert_eq!(got.belief_vector, atom.belief_vector);
        assert_eq!(got.embedding, vec![0.6, 0.8]);
        assert_eq!(got.chain_id, "s1-japan_trip");
        assert_eq!(got.user_id.as_deref(), Some("alice"));
        assert_eq!(got.used_count, 0);
        assert!(got.last_used.is_none());
    }

    #[test]
    fn test_store_rejects_blank_exchange() {
        let mut conn = test_db();
        let err = store_atom(&mut conn, &NewAtom::new("  ", "", "s1")).unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));
    }

    #[test]
    fn test_store_rejects_out_of_range_resonance() {
        let mut conn = test_db();
        let err = store_atom(&mut conn, &NewAtom::new("q", "a", "s1").with_resonance(120.0))
            .unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));
    }

    #[test]
    fn test_store_rejects_duplicate_id() {
        let mut conn = test_db();
        let mut atom = NewAtom::new("q", "a", "s1");
        atom.id = Some("fixed".into());
        store_atom(&mut conn, &atom).unwrap();
        let err = store_atom(&mut conn, &atom).unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let conn = test_db();
        assert!(matches!(get_atom(&conn, "missing"), Err(MemoryError::NotFound(_))));
    }

    #[test]
    fn test_search_orders_and_filters() {
        let mut conn = test_db();
        let ranked = |text: &str, session: &str, tag: &str, resonance: f64, importance: f64| {
            NewAtom::new(text, text, session)
                .with_tags([tag])
                .with_resonance(resonance)
                .with_importance(importance)
        };
        let a = store_atom(&mut conn, &ranked("a", "s1", "x", 90.0, 8000.0)).unwrap();
        let b = store_atom(&mut conn, &ranked("b", "s1", "x", 90.0, 9000.0)).unwrap();
        let c = store_atom(&mut conn, &ranked("c", "s2", "y", 40.0, 5000.0)).unwrap();

        let all = search_atoms(&conn, &SearchFilter::default(), 10).unwrap();
        let ids: Vec<_> = all.iter().map(|a| a.id.clone()).collect();
        assert_eq!(ids, vec![b.clone(), a.clone(), c.clone()]);

        let filter = SearchFilter {
            tags: vec!["x".into()],
            ..Default::default()
        };
        assert_eq!(search_atoms(&conn, &filter, 10).unwrap().len(), 2);

        let filter = SearchFilter {
            session_id: Some("s2".into()),
            ..Default::default()
        };
        let got = search_atoms(&conn, &filter, 10).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, c);

        assert_eq!(search_atoms(&conn, &SearchFilter::default(), 1).unwrap()[0].id, b);
    }

    #[test]
    fn test_search_mentioned_in_matches_tag_inside_text() {
        let mut conn = test_db();
        let tagged = NewAtom::new("q", "a", "s1").with_tags(["일정", "x"]);
        let id = store_atom(&mut conn, &tagged).unwrap();
        store_atom(&mut conn, &NewAtom::new("q", "a", "s1").with_tags(["날씨"])).unwrap();

        let filter = SearchFilter {
            mentioned_in: Some("다음주 일정이 뭐에요? x".into()),
            ..Default::default()
        };
        let got = search_atoms(&conn, &filter, 10).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, id);
    }

    #[test]
    fn test_search_visible_to_includes_shared() {
        let mut conn = test_db();
        store_atom(&mut conn, &NewAtom::new("q", "a", "s1").with_user("alice")).unwrap();
        store_atom(&mut conn, &NewAtom::new("q", "a", "s1").with_user("bob")).unwrap();
        store_atom(&mut conn, &NewAtom::new("q", "a", "s1")).unwrap();

        let filter = SearchFilter {
            visible_to: Some("alice".into()),
            ..Default::default()
        };
        let got = search_atoms(&conn, &filter, 10).unwrap();
        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|a| a.user_id.as_deref() != Some("bob")));
    }

    #[test]
    fn test_search_time_range() {
        let mut conn = test_db();
        let now = Utc::now();
        let old = NewAtom::new("old", "a", "s1").with_timestamp(now - Duration::days(10));
        let new = NewAtom::new("new", "a", "s1").with_timestamp(now - Duration::hours(1));
        store_atom(&mut conn, &old).unwrap();
        let recent = store_atom(&mut conn, &new).unwrap();

        let filter = SearchFilter {
            time_range: Some(crate::memory::types::TimeRange {
                start: now - Duration::days(1),
                end: now,
            }),
            ..Default::default()
        };
        let got = search_atoms(&conn, &filter, 10).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, recent);
    }

    #[test]
    fn test_touch_usage_increments() {
        let mut conn = test_db();
        let id = store_atom(&mut conn, &NewAtom::new("q", "a", "s1")).unwrap();
        let now = Utc::now();
        touch_usage(&conn, &id, now).unwrap();
        touch_usage(&conn, &id, now).unwrap();
        let atom = get_atom(&conn, &id).unwrap();
        assert_eq!(atom.used_count, 2);
        assert!(atom.last_used.is_some());
        assert!(matches!(touch_usage(&conn, "missing", now), Err(MemoryError::NotFound(_))));
    }

    #[test]
    fn test_update_importance_and_resonance() {
        let mut conn = test_db();
        let id = store_atom(&mut conn, &NewAtom::new("q", "a", "s1")).unwrap();
        update_importance(&conn, &id, 4250.0).unwrap();
        update_resonance(&conn, &id, 140.0).unwrap();

        let atom = get_atom(&conn, &id).unwrap();
        assert_eq!(atom.importance, 4250.0);
        assert_eq!(atom.resonance_score, 100.0);

        assert!(matches!(update_importance(&conn, "missing", 1.0), Err(MemoryError::NotFound(_))));
        assert!(matches!(update_importance(&conn, &id, f64::NAN), Err(MemoryError::Validation(_))));

        let ops: Vec<String> = audit_log(&conn, &id)
            .unwrap()
            .into_iter()
            .map(|e| e.operation)
            .collect();
        assert_eq!(ops, vec!["create", "importance", "resonance"]);
    }

    #[test]
    fn test_append_connection_caps() {
        let mut conn = test_db();
        let a = store_atom(&mut conn, &NewAtom::new("a", "a", "s1")).unwrap();
        let b = store_atom(&mut conn, &NewAtom::new("b", "b", "s1")).unwrap();

        assert!(append_connection(&mut conn, &a, &link(&b), 2).unwrap());
        assert!(append_connection(&mut conn, &a, &link(&b), 2).unwrap());
        assert!(!append_connection(&mut conn, &a, &link(&b), 2).unwrap());
        assert_eq!(get_atom(&conn, &a).unwrap().connections.len(), 2);
    }

    #[test]
    fn test_append_connection_requires_both_ends() {
        let mut conn = test_db();
        let a = store_atom(&mut conn, &NewAtom::new("a", "a", "s1")).unwrap();
        assert!(matches!(
            append_connection(&mut conn, &a, &link("ghost"), 20),
            Err(MemoryError::NotFound(_))
        ));
        assert!(matches!(
            append_connection(&mut conn, "ghost", &link(&a), 20),
            Err(MemoryError::NotFound(_))
        ));
    }

    #[test]
    fn test_malformed_row_skipped_in_batch_reads() {
        let mut conn = test_db();
        let good = store_atom(&mut conn, &NewAtom::new("q", "a", "s1")).unwrap();
        let bad = store_atom(&mut conn, &NewAtom::new("q", "a", "s1")).unwrap();
        conn.execute("UPDATE atoms SET timestamp = 'not-a-date' WHERE id = ?1", params![bad])
            .unwrap();

        let atoms = search_atoms(&conn, &SearchFilter::default(), 10).unwrap();
        assert_eq!(atoms.len(), 1);
        assert_eq!(atoms[0].id, good);
        assert!(matches!(get_atom(&conn, &bad), Err(MemoryError::Validation(_))));
    }

    #[test]
    fn test_fetch_records_preserves_order() {
        let mut conn = test_db();
        let a = store_atom(&mut conn, &NewAtom::new("a", "a", "s1")).unwrap();
        let b = store_atom(&mut conn, &NewAtom::new("b", "b", "s1")).unwrap();
        let ids = vec![b.clone(), "missing".to_string(), a.clone()];
        let got: Vec<String> = fetch_records(&conn, &ids)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(got, vec![b, a]);
    }

    #[test]
    fn test_chain_atoms_oldest_first() {
        let mut conn = test_db();
        let now = Utc::now();
        let trip = |text: &str, minutes_ago: i64| {
            NewAtom::new(text, text, "s1")
                .with_topic("trip")
                .with_timestamp(now - Duration::minutes(minutes_ago))
        };
        let second = store_atom(&mut conn, &trip("2", 0)).unwrap();
        let first = store_atom(&mut conn, &trip("1", 5)).unwrap();
        store_atom(&mut conn, &NewAtom::new("3", "c", "s1").with_topic("food")).unwrap();

        let ids: Vec<String> = chain_atoms(&conn, "s1-trip")
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn test_index_entries_skip_missing_embeddings() {
        let mut conn = test_db();
        let embedded = NewAtom::new("q", "a", "s1").with_embedding(vec![1.0, 0.0]);
        let with = store_atom(&mut conn, &embedded).unwrap();
        store_atom(&mut conn, &NewAtom::new("q", "a", "s1")).unwrap();
        let entries = index_entries(&conn).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, with);
        assert_eq!(entries[0].1, vec![1.0, 0.0]);
    }
}
