use anyhow::Result;
use tokio_util::sync::CancellationToken;

use memoria::config::MemoriaConfig;
use memoria::engine::MemoryEngine;

/// Run one recall from the terminal. Ctrl-C cancels it.
pub async fn recall(
    config: MemoriaConfig,
    query: &str,
    user: &str,
    limit: Option<usize>,
    budget: Option<usize>,
    show_trace: bool,
) -> Result<()> {
    let engine = MemoryEngine::open(config)?;

    let mut request = engine.request(query, user);
    if let Some(limit) = limit {
        request.result_limit = limit;
    }
    if let Some(budget) = budget {
        request.char_budget = budget;
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let outcome = engine.recall_detailed(&request, &cancel).await;

    if show_trace {
        println!("{}", serde_json::to_string_pretty(&outcome.trace)?);
    }
    if outcome.trace.suppressed {
        println!("No recall trigger in query; nothing recalled.");
        return Ok(());
    }
    if outcome.results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} result(s)\n", outcome.results.len());
    for (i, result) in outcome.results.iter().enumerate() {
        println!(
            "  {}. {} [{}] (resonance: {:.1}, importance: {:.0}, emotion: {})",
            i + 1,
            result.id,
            result.topic,
            result.resonance_score,
            result.importance,
            result.emotion_label,
        );
        println!("     {}", result.summary);
        println!();
    }

    Ok(())
}
