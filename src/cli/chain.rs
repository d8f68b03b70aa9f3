use anyhow::Result;

use memoria::config::MemoriaConfig;
use memoria::engine::MemoryEngine;

/// Print a topic's chain, either by following links or by shared chain id.
pub async fn chain(
    config: MemoriaConfig,
    topic: &str,
    depth: usize,
    by_chain_id: bool,
) -> Result<()> {
    let engine = MemoryEngine::open(config)?;

    let atoms = if by_chain_id {
        engine.chain_atoms(topic).await?
    } else {
        engine.recall_chain(topic, depth).await?
    };

    if atoms.is_empty() {
        println!("No atoms found for '{topic}'.");
        return Ok(());
    }
    for atom in &atoms {
        println!("{}  {}", atom.id, super::atom_line(atom));
    }
    Ok(())
}
