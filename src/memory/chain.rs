//! Chain linking: directed, reasoned, weighted edges between atoms whose
//! topics are related, plus bounded traversal over those edges.

use std::collections::{HashMap, HashSet, VecDeque};

use rusqlite::Connection;
use serde::Serialize;

use super::store;
use super::vector::cosine_similarity;
use crate::config::ChainConfig;
use crate::db::{with_connection, SharedConnection};
use crate::error::{MemoryError, Result};
use crate::memory::types::{ChainLink, MemoryAtom};
use crate::oracle::{Oracle, OracleGate, Priority};

#[derive(Debug, Default, Clone, Serialize)]
pub struct LinkReport {
    pub atoms: usize,
    pub judged: usize,
    pub linked: usize,
    pub capped: usize,
    /// Pairs left for the next run because the oracle timed out or failed.
    pub deferred: usize,
    pub failed: usize,
}

fn normalize_topic(topic: &str) -> String {
    topic.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Atoms owned by two different users are never linked; shared atoms link with anyone.
fn same_audience(a: &MemoryAtom, b: &MemoryAtom) -> bool {
    match (a.user_id.as_deref(), b.user_id.as_deref()) {
        (Some(x), Some(y)) => x == y,
        _ => true,
    }
}

/// Unordered key so (a, b) and (b, a) share one judgment.
fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

pub fn link_reason(source_topic: &str, target_topic: &str) -> String {
    format!("topic '{source_topic}' relates to '{target_topic}'")
}

/// Half embedding similarity, half target resonance, clamped to `[0, 1]`.
pub fn link_strength(source: &MemoryAtom, target: &MemoryAtom) -> f64 {
    let similarity = f64::from(cosine_similarity(&source.embedding, &target.embedding)).max(0.0);
    (0.5 * similarity + 0.5 * target.resonance_score / 100.0).clamp(0.0, 1.0)
}

/// Scan the `window` most recent atoms and link related pairs.
///
/// The snapshot is read once; each oracle call runs with no store lock held
/// and each link is its own short write.
pub async fn link_recent(
    db: &SharedConnection,
    oracle: &dyn Oracle,
    gate: &OracleGate,
    config: &ChainConfig,
    window: usize,
) -> Result<LinkReport> {
    let snapshot = with_connection(db, move |conn| store::recent_atoms(conn, window)).await?;
    let mut report = LinkReport {
        atoms: snapshot.len(),
        ..Default::default()
    };

    let mut linked: HashMap<String, HashSet<String>> = snapshot
        .iter()
        .map(|a| {
            let targets = a.connections.iter().map(|c| c.target_id.clone()).collect();
            (a.id.clone(), targets)
        })
        .collect();
    let mut judgments: HashMap<(String, String), Option<bool>> = HashMap::new();

    for source in &snapshot {
        let source_topic = normalize_topic(&source.topic);
        if source_topic.is_empty() || source.resonance_score < config.min_link_resonance {
            continue;
        }

        for target in &snapshot {
            if target.id == source.id || !same_audience(source, target) {
                continue;
            }
            let source_links = linked.get(&source.id).map_or(0, HashSet::len);
            if source_links >= config.max_connections {
                break;
            }
            if linked
                .get(&source.id)
                .is_some_and(|t| t.contains(&target.id))
            {
                continue;
            }
            let target_topic = normalize_topic(&target.topic);
            if target_topic.is_empty() {
                continue;
            }

            let related = if source_topic == target_topic {
                Some(true)
            } else {
                let key = pair_key(&source_topic, &target_topic);
                match judgments.get(&key) {
                    Some(cached) => *cached,
                    None => {
                        report.judged += 1;
                        let verdict = gate
                            .run(
                                Priority::Background,
                                "judge_related",
                                oracle.judge_related(&source.topic, &target.topic),
                            )
                            .await;
                        let verdict = match verdict {
                            Ok(v) => Some(v),
                            Err(e) => {
                                tracing::warn!(
                                    atom_id = %source.id,
                                    target_id = %target.id,
                                    stage = "judge_related",
                                    error = %e,
                                    "relatedness judgment unavailable, deferring pair"
                                );
                                None
                            }
                        };
                        judgments.insert(key, verdict);
                        verdict
                    }
                }
            };

            match related {
                None => report.deferred += 1,
                Some(false) => {}
                Some(true) => {
                    let edge = ChainLink {
                        target_id: target.id.clone(),
                        reason: link_reason(source.topic.trim(), target.topic.trim()),
                        strength: link_strength(source, target),
                    };
                    let source_id = source.id.clone();
                    let max = config.max_connections;
                    let appended = with_connection(db, move |conn| {
                        store::append_connection(conn, &source_id, &edge, max)
                    })
                    .await;

                    match appended {
                        Ok(true) => {
                            report.linked += 1;
                            linked
                                .entry(source.id.clone())
                                .or_default()
                                .insert(target.id.clone());
                        }
                        Ok(false) => {
                            report.capped += 1;
                            break;
                        }
                        Err(e @ MemoryError::StoreUnavailable(_)) => return Err(e),
                        Err(e) => {
                            report.failed += 1;
                            tracing::warn!(
                                atom_id = %source.id,
                                target_id = %target.id,
                                stage = "append_connection",
                                error = %e,
                                "link failed, skipping pair"
                            );
                        }
                    }
                }
            }
        }
    }

    tracing::info!(
        atoms = report.atoms,
        judged = report.judged,
        linked = report.linked,
        deferred = report.deferred,
        "chain linking complete"
    );
    Ok(report)
}

/// Breadth-first walk from the most recent atom on `start_topic`, at most `depth` hops.
///
/// Never visits an id twice. Dangling or malformed targets are skipped.
pub fn recall_chain(conn: &Connection, start_topic: &str, depth: usize) -> Result<Vec<MemoryAtom>> {
    let Some(start) = store::latest_atom_by_topic(conn, start_topic)? else {
        return Ok(Vec::new());
    };

    let mut visited: HashSet<String> = HashSet::from([start.id.clone()]);
    let mut queue: VecDeque<(MemoryAtom, usize)> = VecDeque::from([(start, 0)]);
    let mut out = Vec::new();

    while let Some((atom, hops)) = queue.pop_front() {
        if hops < depth {
            for link in &atom.connections {
                if !visited.insert(link.target_id.clone()) {
                    continue;
                }
                match store::get_atom(conn, &link.target_id) {
                    Ok(next) => queue.push_back((next, hops + 1)),
                    Err(MemoryError::NotFound(_)) => {
                        tracing::debug!(
                            atom_id = %atom.id,
                            target_id = %link.target_id,
                            "dangling connection skipped"
                        );
                    }
                    Err(MemoryError::Validation(msg)) => {
                        tracing::warn!(
                            target_id = %link.target_id,
                            error = %msg,
                            "malformed atom skipped in chain"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        out.push(atom);
    }

    Ok(out)
}
