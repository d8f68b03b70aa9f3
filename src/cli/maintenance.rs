//! CLI maintenance commands: `decay`, `link` and `rebuild-index`.

use anyhow::Result;

use memoria::config::MemoriaConfig;
use memoria::engine::MemoryEngine;

/// Run one decay cycle. With a user, only their atoms under their policy;
/// otherwise every atom under its owner's policy.
pub async fn decay(config: MemoriaConfig, user: Option<&str>) -> Result<()> {
    let engine = MemoryEngine::open(config)?;
    let report = match user {
        Some(user) => {
            let policy = engine.config().policy_for(Some(user));
            engine.run_decay_cycle(&policy, Some(user)).await?
        }
        None => engine.run_configured_decay(chrono::Utc::now()).await?,
    };

    println!("Decay cycle complete.");
    println!("  Examined:         {}", report.examined);
    println!("  Forgotten:        {}", report.forgotten);
    println!("  Reinforced:       {}", report.reinforced);
    println!("  Clipped:          {}", report.clipped);
    println!("  Already applied:  {}", report.already_applied);
    if report.failed > 0 {
        println!("  Failed:           {} (see log)", report.failed);
    }
    Ok(())
}

/// Run the chain linker over the most recent atoms.
pub async fn link(config: MemoriaConfig, window: Option<usize>) -> Result<()> {
    let engine = MemoryEngine::open(config)?;
    let window = window.unwrap_or(engine.config().chain.window_size);
    let report = engine.run_chain_linking(window).await?;

    println!(
        "Scanned {} atoms, {} judgments, {} new links.",
        report.atoms, report.judged, report.linked
    );
    if report.deferred > 0 {
        println!("  {} pair(s) deferred: oracle unavailable.", report.deferred);
    }
    if report.capped > 0 {
        println!("  {} atom(s) at the connection cap.", report.capped);
    }
    Ok(())
}

pub async fn rebuild_index(config: MemoriaConfig) -> Result<()> {
    let engine = MemoryEngine::open(config)?;
    let indexed = engine.rebuild_vector_index().await?;
    println!("Indexed {indexed} atom(s).");
    Ok(())
}
