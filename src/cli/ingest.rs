use anyhow::Result;

use memoria::config::MemoriaConfig;
use memoria::engine::MemoryEngine;
use memoria::memory::types::Exchange;

/// Store one exchange and print the new atom's id.
pub async fn ingest(config: MemoriaConfig, exchange: Exchange) -> Result<()> {
    let engine = MemoryEngine::open(config)?;
    let id = engine.store_exchange(exchange).await?;
    let atom = engine.get_atom(&id).await?;

    println!("{id}");
    eprintln!(
        "  emotion {} ({}), resonance {:.1}, importance {:.0}, tags [{}]",
        atom.emotion_label,
        atom.emotion_code,
        atom.resonance_score,
        atom.importance,
        atom.tags.join(", ")
    );
    Ok(())
}
