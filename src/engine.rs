//! The memory engine: one handle over the store, the derived vector index
//! and recall cache, and the oracle.
//!
//! Exposes the ingest API ([`MemoryEngine::store_exchange`]), the recall API
//! ([`MemoryEngine::recall`]) and the maintenance API (decay, chain linking,
//! index rebuild). Every store call runs on the blocking pool through
//! [`with_connection`]; every oracle and embedder call goes through the
//! [`OracleGate`].

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;

use crate::config::{DecayPolicy, MemoriaConfig};
use crate::db::{self, migrations, with_connection, SharedConnection};
use crate::error::{MemoryError, Result};
use crate::memory::cache::{CacheKey, RecallCache};
use crate::memory::chain::{self, LinkReport};
use crate::memory::decay::{self, DecayReport};
use crate::memory::recall::{self, RecallOutcome, RecallStage, RecallTrace};
use crate::memory::stats::{self, StatsResponse};
use crate::memory::store::{self, AtomRecord, LogEntry};
use crate::memory::types::{
    AtomSummary, EmotionReading, Exchange, MemoryAtom, NewAtom, RecallRequest, SearchFilter,
};
use crate::memory::vector::VectorIndex;
use crate::memory::{scorer, trigger};
use crate::oracle::{self, Embedder, Oracle, OracleGate, Priority, SharedEmbedder, SharedOracle};

pub struct MemoryEngine {
    db: SharedConnection,
    db_path: Option<PathBuf>,
    embedder: SharedEmbedder,
    oracle: SharedOracle,
    gate: OracleGate,
    index: VectorIndex,
    cache: RecallCache,
    config: Arc<MemoriaConfig>,
}

impl MemoryEngine {
    /// Open the configured database and build the configured oracle and embedder.
    pub fn open(config: MemoriaConfig) -> anyhow::Result<Self> {
        let db_path = config.resolved_db_path();
        let conn = db::open_database(&db_path)?;
        let embedder = oracle::create_embedder(&config.embedding)?;
        let oracle = oracle::create_oracle(&config.oracle)?;

        let mut engine =
            Self::new(conn, embedder, oracle, config).context("failed to start memory engine")?;
        engine.db_path = Some(db_path);
        Ok(engine)
    }

    /// Wrap an already-initialized connection. Builds the vector index from the store.
    pub fn new(
        conn: Connection,
        embedder: SharedEmbedder,
        oracle: SharedOracle,
        config: MemoriaConfig,
    ) -> Result<Self> {
        check_embedding_signature(&conn, embedder.as_ref())?;

        let index = VectorIndex::new(embedder.dimensions());
        let indexed = index.rebuild(store::index_entries(&conn)?);
        tracing::info!(
            indexed,
            embedder = embedder.name(),
            oracle = oracle.name(),
            "memory engine ready"
        );

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            db_path: None,
            gate: OracleGate::from_config(&config.oracle),
            cache: RecallCache::from_config(&config.retrieval),
            index,
            embedder,
            oracle,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &MemoriaConfig {
        &self.config
    }

    pub fn connection(&self) -> &SharedConnection {
        &self.db
    }

    pub fn indexed_atoms(&self) -> usize {
        self.index.len()
    }

    pub fn cached_results(&self) -> usize {
        self.cache.len()
    }

    // ── Ingest ───────────────────────────────────────────────────────────────

    /// Score, embed and persist one exchange. Returns the new atom id.
    ///
    /// An unavailable embedder leaves the atom without an embedding; it is
    /// still found by tag search.
    pub async fn store_exchange(&self, exchange: Exchange) -> Result<String> {
        if exchange.user_input.trim().is_empty() && exchange.response.trim().is_empty() {
            return Err(MemoryError::Validation(
                "user_input and response are both empty".into(),
            ));
        }

        let tags = exchange
            .tags
            .unwrap_or_else(|| scorer::extract_tags(&exchange.user_input));
        let emotion = self.read_emotion(&exchange.user_input).await;
        let belief_vector = scorer::extract_belief_vector(&exchange.user_input);
        let event_score = scorer::compute_event_score(
            &exchange.user_input,
            &exchange.response,
            &emotion,
            &tags,
        );
        let policy = self.config.policy_for(exchange.user_id.as_deref());
        let embedding = self
            .embed(
                Priority::Background,
                &format!("{}\n{}", exchange.user_input, exchange.response),
            )
            .await
            .unwrap_or_default();
        let topic = exchange
            .topic
            .unwrap_or_else(|| tags.first().cloned().unwrap_or_default());
        let now = Utc::now();

        let atom = NewAtom {
            id: None,
            user_input: exchange.user_input,
            response: exchange.response,
            tags,
            emotion,
            belief_vector,
            importance: scorer::initial_importance(event_score, &policy),
            resonance_score: scorer::resonance_from_event_score(event_score),
            embedding,
            timestamp: Some(now),
            session_id: exchange.session_id,
            topic,
            sub_topic: exchange.sub_topic.unwrap_or_default(),
            chain_id: None,
            user_id: exchange.user_id,
        };
        let embedding = atom.embedding.clone();
        let owner = atom.user_id.clone();
        let resonance = atom.resonance_score;

        let id = with_connection(&self.db, move |conn| store::store_atom(conn, &atom)).await?;

        if !embedding.is_empty() {
            self.index.add(&id, &embedding, now);
        }
        match owner.as_deref() {
            Some(user) => {
                self.cache.invalidate_user(user);
            }
            // shared atoms are visible to every user
            None => self.cache.clear(),
        }

        tracing::info!(
            atom_id = %id,
            user_id = owner.as_deref().unwrap_or("-"),
            event_score,
            resonance,
            indexed = !embedding.is_empty(),
            "exchange stored"
        );
        Ok(id)
    }

    async fn read_emotion(&self, text: &str) -> EmotionReading {
        let reading = scorer::estimate_emotion(text);
        if !reading.is_neutral() || !self.config.oracle.classify_emotion_fallback {
            return reading;
        }

        let verdict = self
            .gate
            .run(
                Priority::Background,
                "classify_emotion",
                self.oracle.classify_emotion(text),
            )
            .await;
        match verdict {
            Ok(Some(label)) => match scorer::emotion_code_for(&label) {
                Some(code) => EmotionReading {
                    code: code.to_string(),
                    label,
                    score: 0.5,
                },
                None => {
                    tracing::debug!(label = %label, "oracle returned an unknown emotion label");
                    reading
                }
            },
            Ok(None) => reading,
            Err(e) => {
                tracing::warn!(
                    stage = "classify_emotion",
                    error = %e,
                    "emotion fallback unavailable"
                );
                reading
            }
        }
    }

    async fn embed(&self, priority: Priority, text: &str) -> Option<Vec<f32>> {
        match self.gate.run(priority, "embed", self.embedder.embed(text)).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!(stage = "embed", error = %e, "embedding unavailable");
                None
            }
        }
    }

    // ── Recall ───────────────────────────────────────────────────────────────

    /// A request with the configured default budgets.
    pub fn request(&self, query: impl Into<String>, user_id: impl Into<String>) -> RecallRequest {
        RecallRequest {
            query: query.into(),
            user_id: user_id.into(),
            result_limit: self.config.retrieval.default_result_limit,
            char_budget: self.config.retrieval.default_char_budget,
        }
    }

    /// Recall memories relevant to `request.query`. Never fails: every
    /// problem degrades to fewer (or no) results.
    pub async fn recall(
        &self,
        request: &RecallRequest,
        cancel: &CancellationToken,
    ) -> Vec<AtomSummary> {
        self.recall_detailed(request, cancel).await.results
    }

    /// [`recall`](Self::recall) plus a trace of what each stage did.
    pub async fn recall_detailed(
        &self,
        request: &RecallRequest,
        cancel: &CancellationToken,
    ) -> RecallOutcome {
        let user = request.user_id.as_str();
        if cancel.is_cancelled() {
            return cancelled_outcome();
        }

        match trigger::detect(&request.query) {
            Some(found) => {
                tracing::debug!(
                    user_id = %user,
                    stage = RecallStage::TriggerCheck.as_str(),
                    trigger = ?found
                );
            }
            None => {
                tracing::debug!(
                    user_id = %user,
                    stage = RecallStage::Suppressed.as_str(),
                    "no recall trigger"
                );
                return RecallOutcome {
                    results: Vec::new(),
                    trace: RecallTrace {
                        suppressed: true,
                        ..RecallTrace::default()
                    },
                };
            }
        }

        let key = CacheKey::new(user, &request.query, request.result_limit, request.char_budget);
        if let Some(results) = self.cache.get(&key) {
            self.record_usage(&results).await;
            tracing::debug!(user_id = %user, returned = results.len(), "recall served from cache");
            return RecallOutcome {
                results,
                trace: RecallTrace {
                    cache_hit: true,
                    ..RecallTrace::default()
                },
            };
        }

        let gathered = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            gathered = self.gather(request) => Some(gathered),
        };
        let (ranked, trace) = match gathered {
            None => {
                tracing::info!(user_id = %user, "recall cancelled");
                return cancelled_outcome();
            }
            Some(Ok(gathered)) => gathered,
            Some(Err(e)) => {
                tracing::warn!(user_id = %user, error = %e, "recall degraded to an empty result");
                return RecallOutcome {
                    results: Vec::new(),
                    trace: RecallTrace {
                        degraded: true,
                        ..RecallTrace::default()
                    },
                };
            }
        };

        let results = recall::format_results(
            &ranked,
            request.result_limit,
            request.char_budget,
            self.config.retrieval.summary_chars,
        );
        tracing::debug!(
            user_id = %user,
            stage = RecallStage::Format.as_str(),
            returned = results.len()
        );

        if cancel.is_cancelled() {
            tracing::info!(user_id = %user, "recall cancelled");
            return cancelled_outcome();
        }
        self.record_usage(&results).await;
        self.cache.set(key, results.clone());

        tracing::info!(
            user_id = %user,
            stage = RecallStage::Done.as_str(),
            tag_candidates = trace.tag_candidates,
            vector_candidates = trace.vector_candidates,
            rejected = trace.rejected,
            returned = results.len(),
            "recall complete"
        );
        RecallOutcome { results, trace }
    }

    /// Candidate generation, filtering, validation and ranking.
    async fn gather(&self, request: &RecallRequest) -> Result<(Vec<MemoryAtom>, RecallTrace)> {
        let retrieval = &self.config.retrieval;
        let mut trace = RecallTrace::default();

        let filter = SearchFilter {
            mentioned_in: Some(request.query.clone()),
            visible_to: Some(request.user_id.clone()),
            ..SearchFilter::default()
        };
        let limit = retrieval.tag_candidate_limit;
        let tag_ids: Vec<String> = with_connection(&self.db, move |conn| {
            store::search_records(conn, &filter, limit)
        })
        .await?
        .into_iter()
        .map(|record| record.id)
        .collect();
        trace.tag_candidates = tag_ids.len();

        let vector_ids: Vec<String> = match self.embed(Priority::Recall, &request.query).await {
            Some(query) => self
                .index
                .search(&query, retrieval.vector_k)
                .into_iter()
                .filter(|(_, distance)| *distance <= retrieval.max_vector_distance)
                .map(|(id, _)| id)
                .collect(),
            None => Vec::new(),
        };
        trace.vector_candidates = vector_ids.len();

        let merged = recall::merge_candidate_ids(tag_ids, vector_ids);
        tracing::debug!(stage = RecallStage::CandidateGen.as_str(), candidates = merged.len());
        let user = request.user_id.clone();
        let records: Vec<AtomRecord> =
            with_connection(&self.db, move |conn| store::fetch_records(conn, &merged))
                .await?
                .into_iter()
                .filter(|record| record.user_id.as_deref().is_none_or(|owner| owner == user))
                .collect();

        let (atoms, dropped) = recall::filter_candidates(records);
        trace.filtered_out = dropped;

        let summary_chars = retrieval.summary_chars;
        let verdicts = join_all(atoms.iter().map(|atom| {
            let summary = recall::summarize(atom, summary_chars);
            async move {
                self.gate
                    .run(
                        Priority::Recall,
                        "validate_context",
                        self.oracle.validate_context(&request.query, &summary),
                    )
                    .await
            }
        }))
        .await;

        let mut validated = Vec::with_capacity(atoms.len());
        for (atom, verdict) in atoms.into_iter().zip(verdicts) {
            match verdict {
                Ok(true) => validated.push(atom),
                Ok(false) => {
                    trace.rejected += 1;
                    tracing::debug!(
                        atom_id = %atom.id,
                        stage = RecallStage::Validate.as_str(),
                        "candidate rejected"
                    );
                }
                Err(e) => {
                    trace.unvalidated += 1;
                    tracing::warn!(
                        atom_id = %atom.id,
                        stage = RecallStage::Validate.as_str(),
                        error = %e,
                        "validation unavailable, keeping candidate"
                    );
                    validated.push(atom);
                }
            }
        }

        recall::rank(&mut validated);
        Ok((validated, trace))
    }

    /// `touch_usage` on every returned atom, in one transaction.
    async fn record_usage(&self, results: &[AtomSummary]) {
        if results.is_empty() {
            return;
        }
        let ids: Vec<String> = results.iter().map(|r| r.id.clone()).collect();
        let now = Utc::now();
        let touched = with_connection(&self.db, move |conn| {
            let tx = conn.transaction()?;
            for id in &ids {
                match store::touch_usage(&tx, id, now) {
                    Ok(()) | Err(MemoryError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await;
        if let Err(e) = touched {
            tracing::warn!(stage = "touch_usage", error = %e, "usage not recorded");
        }
    }

    // ── Maintenance ──────────────────────────────────────────────────────────

    /// One decay cycle under `policy`, over every atom or only `user_id`'s.
    pub async fn run_decay_cycle(
        &self,
        policy: &DecayPolicy,
        user_id: Option<&str>,
    ) -> Result<DecayReport> {
        self.run_decay_cycle_at(policy, user_id, Utc::now()).await
    }

    /// [`run_decay_cycle`](Self::run_decay_cycle) with an explicit clock.
    pub async fn run_decay_cycle_at(
        &self,
        policy: &DecayPolicy,
        user_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<DecayReport> {
        let user = user_id.map(str::to_string);
        let ids = with_connection(&self.db, move |conn| decay::candidate_ids(conn, user.as_deref()))
            .await?;
        let work = ids.into_iter().map(|id| (id, policy.clone())).collect();
        self.decay_each(work, now).await
    }

    /// Decay cycle where each atom follows its owner's configured policy.
    pub async fn run_configured_decay(&self, now: DateTime<Utc>) -> Result<DecayReport> {
        let owners = with_connection(&self.db, |conn| decay::candidate_owners(conn)).await?;
        let work = owners
            .into_iter()
            .map(|(id, owner)| {
                let policy = self.config.policy_for(owner.as_deref());
                (id, policy)
            })
            .collect();
        self.decay_each(work, now).await
    }

    /// One short write per atom so recall never waits behind a whole cycle.
    async fn decay_each(
        &self,
        work: Vec<(String, DecayPolicy)>,
        now: DateTime<Utc>,
    ) -> Result<DecayReport> {
        let mut report = DecayReport::default();
        for (id, policy) in work {
            let step_id = id.clone();
            let outcome = with_connection(&self.db, move |conn| {
                decay::apply_to_atom(conn, &step_id, &policy, now)
            })
            .await;
            match outcome {
                Ok(outcome) => report.record(outcome),
                Err(e @ MemoryError::StoreUnavailable(_)) => return Err(e),
                Err(e) => report.record_failure(&id, &e),
            }
        }

        if report.forgotten + report.reinforced + report.clipped > 0 {
            self.cache.clear();
        }
        tracing::info!(
            examined = report.examined,
            forgotten = report.forgotten,
            reinforced = report.reinforced,
            already_applied = report.already_applied,
            failed = report.failed,
            "decay cycle complete"
        );
        Ok(report)
    }

    /// Link related atoms among the `window` most recent.
    pub async fn run_chain_linking(&self, window: usize) -> Result<LinkReport> {
        chain::link_recent(
            &self.db,
            self.oracle.as_ref(),
            &self.gate,
            &self.config.chain,
            window,
        )
        .await
    }

    /// Rebuild the vector index from the store. Returns the number of atoms indexed.
    ///
    /// Atoms ingested while the store is being read are kept.
    pub async fn rebuild_vector_index(&self) -> Result<usize> {
        let ticket = self.index.start_rebuild();
        let entries = with_connection(&self.db, |conn| store::index_entries(conn)).await?;
        let indexed = self.index.finish_rebuild(ticket, entries);
        tracing::info!(indexed, "vector index rebuilt");
        Ok(indexed)
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub async fn get_atom(&self, id: &str) -> Result<MemoryAtom> {
        let id = id.to_string();
        with_connection(&self.db, move |conn| store::get_atom(conn, &id)).await
    }

    pub async fn audit_log(&self, id: &str) -> Result<Vec<LogEntry>> {
        let id = id.to_string();
        with_connection(&self.db, move |conn| store::audit_log(conn, &id)).await
    }

    pub async fn recall_chain(&self, topic: &str, depth: usize) -> Result<Vec<MemoryAtom>> {
        let topic = topic.to_string();
        with_connection(&self.db, move |conn| chain::recall_chain(conn, &topic, depth)).await
    }

    pub async fn chain_atoms(&self, chain_id: &str) -> Result<Vec<MemoryAtom>> {
        let chain_id = chain_id.to_string();
        with_connection(&self.db, move |conn| store::chain_atoms(conn, &chain_id)).await
    }

    pub async fn stats(&self, user_id: Option<&str>) -> Result<StatsResponse> {
        let user = user_id.map(str::to_string);
        let path = self.db_path.clone();
        with_connection(&self.db, move |conn| {
            stats::memory_stats(conn, user.as_deref(), path.as_deref())
        })
        .await
    }
}

fn cancelled_outcome() -> RecallOutcome {
    RecallOutcome {
        results: Vec::new(),
        trace: RecallTrace {
            cancelled: true,
            ..RecallTrace::default()
        },
    }
}

/// Record the embedder signature on first use; warn when it changed since.
fn check_embedding_signature(conn: &Connection, embedder: &dyn Embedder) -> Result<()> {
    let current = embedder.signature();
    match migrations::get_embedding_signature(conn)? {
        Some(stored) if stored == current => {}
        Some(stored) => {
            tracing::warn!(
                stored = %stored,
                configured = %current,
                "embedding model changed; vectors of the old shape are not indexed, \
                 and same-shape vectors may rank poorly until atoms are re-ingested"
            );
        }
        None => migrations::set_embedding_signature(conn, &current)?,
    }
    Ok(())
}
