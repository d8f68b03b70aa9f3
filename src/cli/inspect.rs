//! CLI `inspect` command — display full details for a single atom.

use anyhow::Result;

use memoria::config::MemoriaConfig;
use memoria::memory::store;

/// Inspect a single atom by ID and display full details.
pub fn inspect(config: &MemoriaConfig, id: &str) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = memoria::db::open_database(&db_path)?;

    let a = store::get_atom(&conn, id)?;
    println!("Atom: {}", a.id);
    println!("{}", "=".repeat(50));
    println!("  Emotion:        {} ({}, {:.2})", a.emotion_label, a.emotion_code, a.emotion_score);
    println!("  Importance:     {:.0}", a.importance);
    println!("  Resonance:      {:.1}", a.resonance_score);
    println!("  Used:           {} time(s)", a.used_count);
    if let Some(last_used) = a.last_used {
        println!("  Last used:      {last_used}");
    }
    println!("  Created:        {}", a.timestamp);
    println!("  Session:        {}", a.session_id);
    println!("  Topic:          {} / {}", a.topic, a.sub_topic);
    println!("  Chain:          {}", a.chain_id);
    println!("  Owner:          {}", a.user_id.as_deref().unwrap_or("(shared)"));
    println!("  Tags:           {}", a.tags.join(", "));
    println!("  Embedding:      {} dims", a.embedding.len());
    println!();
    println!("User:");
    println!("  {}", a.user_input);
    println!("Response:");
    println!("  {}", a.response);

    if !a.connections.is_empty() {
        println!();
        println!("Connections:");
        for link in &a.connections {
            println!("  --[{:.2}]--> {} ({})", link.strength, link.target_id, link.reason);
        }
    }

    let log = store::audit_log(&conn, id)?;
    if !log.is_empty() {
        println!();
        println!("Audit Log:");
        for entry in log {
            let details = entry
                .details
                .as_ref()
                .map(|d| d.to_string())
                .unwrap_or_default();
            println!("  {} [{}] {}", entry.created_at, entry.operation, details);
        }
    }

    Ok(())
}
