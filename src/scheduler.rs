//! Background maintenance workers: decay, chain linking and index rebuild,
//! each on its own interval, all stopped by one [`CancellationToken`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::MemoryEngine;
use crate::error::Result;

/// Spawn every enabled worker. An interval of zero disables that worker.
pub fn spawn_workers(engine: Arc<MemoryEngine>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
    let maintenance = engine.config().maintenance.clone();
    if !maintenance.enabled {
        info!("background maintenance disabled");
        return Vec::new();
    }

    let mut handles = Vec::new();

    if let Some(every) = interval(maintenance.decay_interval_hours * 3600) {
        handles.push(spawn_periodic(
            "decay",
            every,
            engine.clone(),
            cancel.clone(),
            |engine| async move { engine.run_configured_decay(Utc::now()).await.map(drop) },
        ));
    }

    if let Some(every) = interval(maintenance.chain_interval_minutes * 60) {
        handles.push(spawn_periodic(
            "chain",
            every,
            engine.clone(),
            cancel.clone(),
            |engine| async move {
                let window = engine.config().chain.window_size;
                engine.run_chain_linking(window).await.map(drop)
            },
        ));
    }

    if let Some(every) = interval(maintenance.index_rebuild_interval_minutes * 60) {
        handles.push(spawn_periodic("index", every, engine, cancel, |engine| async move {
            engine.rebuild_vector_index().await.map(drop)
        }));
    }

    info!(workers = handles.len(), "background maintenance started");
    handles
}

fn interval(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    every: Duration,
    engine: Arc<MemoryEngine>,
    cancel: CancellationToken,
    job: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<MemoryEngine>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the first immediate tick.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    debug!(worker = name, "maintenance run starting");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        outcome = job(Arc::clone(&engine)) => {
                            if let Err(e) = outcome {
                                warn!(
                                    worker = name,
                                    error = %e,
                                    "maintenance run failed (non-fatal)"
                                );
                            }
                        }
                    }
                }
            }
        }
        info!(worker = name, "maintenance worker shutting down");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoriaConfig;
    use crate::db;
    use crate::oracle::local::{HashEmbedder, KeywordOracle};

    fn engine(config: MemoriaConfig) -> Arc<MemoryEngine> {
        let conn = db::open_memory_database().unwrap();
        Arc::new(
            MemoryEngine::new(
                conn,
                Arc::new(HashEmbedder::new(16)),
                Arc::new(KeywordOracle),
                config,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn workers_stop_on_cancel() {
        let cancel = CancellationToken::new();
        let handles = spawn_workers(engine(MemoriaConfig::default()), cancel.clone());
        assert_eq!(handles.len(), 3);

        cancel.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("worker did not stop")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn disabled_and_zero_intervals_spawn_nothing() {
        let mut config = MemoriaConfig::default();
        config.maintenance.enabled = false;
        assert!(spawn_workers(engine(config), CancellationToken::new()).is_empty());

        let mut config = MemoriaConfig::default();
        config.maintenance.chain_interval_minutes = 0;
        let cancel = CancellationToken::new();
        let handles = spawn_workers(engine(config), cancel.clone());
        assert_eq!(handles.len(), 2);
        cancel.cancel();
    }
}
