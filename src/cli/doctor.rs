//! CLI `doctor` command — run database diagnostics and print a health report.

use anyhow::{Context, Result};

use memoria::config::MemoriaConfig;
use memoria::db;
use memoria::oracle::{self, Embedder};

/// Run database diagnostics and print a health report.
pub fn doctor(config: &MemoriaConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `memoria ingest` or `memoria serve` to initialize.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path)
        .map(|m| m.len())
        .unwrap_or(0);

    let conn = db::open_database(&db_path)
        .context("failed to open database (may be corrupt)")?;

    let report = db::check_database_health(&conn)
        .context("failed to run health check")?;
    let stored = db::migrations::get_embedding_signature(&conn)?;
    let configured = oracle::create_embedder(&config.embedding)?.signature();

    println!("Memoria Health Report");
    println!("=====================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!();
    println!("Embedding:");
    println!("  Stored:          {}", stored.as_deref().unwrap_or("(not set)"));
    println!("  Configured:      {configured}");
    if let Some(ref stored) = stored {
        if stored != &configured {
            println!("  WARNING: embedder changed! Atoms embedded with the old model rank poorly.");
        } else {
            println!("  Status:          OK (match)");
        }
    }
    println!("Oracle:            {}", config.oracle.provider);
    println!();
    println!("Row counts:");
    println!("  Atoms:           {}", report.atom_count);
    println!("  Connections:     {}", report.connection_count);
    println!("  Audit log:       {}", report.log_count);
    if report.dangling_connections > 0 {
        println!("  Dangling links:  {} (skipped at read time)", report.dangling_connections);
    }
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED");
        println!();
        println!("Recovery steps:");
        println!("  1. Restore from a backup: cp backup.db ~/.memoria/memory.db");
        println!("  2. The vector index and recall cache are rebuilt from the store on start.");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
