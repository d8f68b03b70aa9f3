use anyhow::Result;

use memoria::config::MemoriaConfig;

/// Display memory statistics in the terminal.
pub fn stats(config: &MemoriaConfig, user: Option<&str>, json: bool) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = memoria::db::open_database(&db_path)?;

    let response = memoria::memory::stats::memory_stats(&conn, user, Some(&db_path))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("Memory Statistics");
    println!("{}", "=".repeat(40));
    println!("  Total atoms:         {}", response.total_atoms);
    println!("  Recalled at least once: {}", response.used_atoms);
    println!("  Shared:              {}", response.shared_atoms);
    println!("  Avg importance:      {:.0}", response.avg_importance);
    println!("  Avg resonance:       {:.1}", response.avg_resonance);
    println!();

    println!("By Emotion:");
    for (label, count) in &response.by_emotion {
        println!("  {:<12} {}", label, count);
    }
    println!();

    println!("Chain links:           {}", response.connections);
    println!("Database size:         {} bytes", response.db_size_bytes);

    if let Some(ref oldest) = response.oldest_atom {
        println!("Oldest atom:           {oldest}");
    }
    if let Some(ref newest) = response.newest_atom {
        println!("Newest atom:           {newest}");
    }

    Ok(())
}
