use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;

use super::store::{self, write_audit_log_at};
use crate::config::DecayPolicy;
use crate::error::Result;
use crate::memory::types::MemoryAtom;

// ── Decisions ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecayAction {
    Forget,
    Reinforce,
    None,
}

impl DecayAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forget => "forget",
            Self::Reinforce => "reinforce",
            Self::None => "none",
        }
    }
}

/// What one decay step would do to an atom.
#[derive(Debug, Clone, PartialEq)]
pub struct DecayDecision {
    pub action: DecayAction,
    pub days_idle: i64,
    pub importance: f64,
    pub resonance: f64,
}

/// Whole days since the atom was last used (or created). Never negative.
pub fn days_idle(atom: &MemoryAtom, now: DateTime<Utc>) -> i64 {
    (now - atom.last_activity()).num_days().max(0)
}

/// Pure decay rule. The returned importance is always inside the policy range.
pub fn decide(atom: &MemoryAtom, policy: &DecayPolicy, now: DateTime<Utc>) -> DecayDecision {
    let idle = days_idle(atom, now);

    let action = if idle >= policy.forget_threshold_days
        && atom.resonance_score < policy.forget_max_resonance
        && atom.used_count == 0
    {
        DecayAction::Forget
    } else if idle <= policy.reinforce_window_days
        && atom.resonance_score >= policy.reinforce_min_resonance
        && atom.used_count >= policy.reinforce_min_uses
    {
        DecayAction::Reinforce
    } else {
        DecayAction::None
    };

    let (importance, resonance) = match action {
        DecayAction::Forget => (atom.importance * policy.forget_factor, atom.resonance_score),
        DecayAction::Reinforce => (
            atom.importance * (1.0 + policy.strengthen_threshold),
            (atom.resonance_score + policy.resonance_step).min(100.0),
        ),
        DecayAction::None => (atom.importance, atom.resonance_score),
    };

    DecayDecision {
        action,
        days_idle: idle,
        importance: policy.clamp_importance(importance),
        resonance,
    }
}

// ── Applying ─────────────────────────────────────────────────────────────────

/// Result of one atom's decay step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecayOutcome {
    Applied(DecayAction),
    Unchanged,
    AlreadyApplied,
}

/// Decide and persist for one atom inside a single `IMMEDIATE` transaction.
///
/// Writes happen only when a value changes, and each write is stamped in the
/// audit log with `now`, so a second run on the same UTC day is a no-op.
pub fn apply_to_atom(
    conn: &mut Connection,
    id: &str,
    policy: &DecayPolicy,
    now: DateTime<Utc>,
) -> Result<DecayOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if store::decay_applied_on(&tx, id, now)? {
        return Ok(DecayOutcome::AlreadyApplied);
    }

    let atom = store::get_atom(&tx, id)?;
    let decision = decide(&atom, policy, now);

    let importance_changed = decision.importance != atom.importance;
    let resonance_changed = decision.resonance != atom.resonance_score;
    if !importance_changed && !resonance_changed {
        return Ok(DecayOutcome::Unchanged);
    }

    if importance_changed {
        store::update_importance(&tx, id, decision.importance)?;
    }
    if resonance_changed {
        store::update_resonance(&tx, id, decision.resonance)?;
    }
    write_audit_log_at(
        &tx,
        "decay",
        id,
        Some(&serde_json::json!({
            "action": decision.action.as_str(),
            "days_idle": decision.days_idle,
            "from": atom.importance,
            "to": decision.importance,
        })),
        now,
    )?;
    tx.commit()?;

    Ok(DecayOutcome::Applied(decision.action))
}

/// Ids the cycle will visit: every atom, or only those owned by `user_id`.
pub fn candidate_ids(conn: &Connection, user_id: Option<&str>) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM atoms WHERE (?1 IS NULL OR user_id = ?1) ORDER BY id",
    )?;
    let ids = stmt
        .query_map([user_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Every atom id with its owner, for cycles that pick a policy per owner.
pub fn candidate_owners(conn: &Connection) -> Result<Vec<(String, Option<String>)>> {
    let mut stmt = conn.prepare("SELECT id, user_id FROM atoms ORDER BY id")?;
    let owners = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(owners)
}

// ── Cycle ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Serialize)]
pub struct DecayReport {
    pub examined: usize,
    pub forgotten: usize,
    pub reinforced: usize,
    /// Clipped into range without a forget/reinforce action.
    pub clipped: usize,
    pub unchanged: usize,
    pub already_applied: usize,
    pub failed: usize,
}

impl DecayReport {
    pub fn record(&mut self, outcome: DecayOutcome) {
        self.examined += 1;
        match outcome {
            DecayOutcome::Applied(DecayAction::Forget) => self.forgotten += 1,
            DecayOutcome::Applied(DecayAction::Reinforce) => self.reinforced += 1,
            DecayOutcome::Applied(DecayAction::None) => self.clipped += 1,
            DecayOutcome::Unchanged => self.unchanged += 1,
            DecayOutcome::AlreadyApplied => self.already_applied += 1,
        }
    }

    pub fn record_failure(&mut self, id: &str, error: &dyn std::fmt::Display) {
        self.examined += 1;
        self.failed += 1;
        tracing::warn!(
            atom_id = %id,
            stage = "decay",
            error = %error,
            "decay step failed, skipping atom"
        );
    }
}
