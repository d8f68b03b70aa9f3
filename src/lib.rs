//! Conversational memory engine: persistent, scored, cross-session memory
//! for a conversational assistant.
//!
//! Every exchange becomes a memory *atom* carrying an emotion reading, a
//! belief vector, an importance and a resonance score. Atoms are recalled by
//! tag mention and vector similarity, validated by a pluggable oracle, ranked
//! and trimmed to a character budget. Background workers decay or reinforce
//! importance over time and link atoms whose topics are related.
//!
//! # Architecture
//!
//! - **Storage**: SQLite (the single source of truth) with an audit log
//! - **Vector index**: in-memory cosine search, rebuilt from the store
//! - **Oracle**: emotion fallback, topic relatedness and recall validation,
//!   behind a trait with an offline keyword implementation and an
//!   OpenAI-compatible HTTP one
//! - **Cache**: TTL + LRU cache of recall results, keyed per user
//!
//! # Modules
//!
//! - [`config`] — Configuration loading from TOML files and environment variables
//! - [`db`] — SQLite database initialization, schema, migrations, and health checks
//! - [`engine`] — The [`engine::MemoryEngine`] handle: ingest, recall, maintenance
//! - [`error`] — The [`error::MemoryError`] taxonomy
//! - [`memory`] — Atom types, store, scorer, index, cache, recall stages, decay and chains
//! - [`oracle`] — Oracle and embedder traits, providers, and the concurrency gate
//! - [`scheduler`] — Background maintenance workers

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod memory;
pub mod oracle;
pub mod scheduler;
