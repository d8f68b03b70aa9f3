//! CLI `serve` command: keep the engine open and run background maintenance until shutdown.

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use memoria::config::MemoriaConfig;
use memoria::engine::MemoryEngine;
use memoria::scheduler;

pub async fn serve(config: MemoriaConfig) -> Result<()> {
    let engine = Arc::new(MemoryEngine::open(config)?);
    let cancel = CancellationToken::new();
    let handles = scheduler::spawn_workers(Arc::clone(&engine), cancel.clone());

    tracing::info!("memoria running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("received Ctrl-C, shutting down");

    cancel.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "maintenance worker ended abnormally");
        }
    }
    Ok(())
}
