mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use memoria::config::MemoriaConfig;

#[derive(Parser)]
#[command(name = "memoria", version, about = "Conversational memory engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run background maintenance (decay, chain linking, index rebuild) until Ctrl-C
    Serve,
    /// Store one conversational exchange
    Ingest {
        /// What the user said
        #[arg(long)]
        user_input: String,
        /// What the assistant answered
        #[arg(long)]
        response: String,
        #[arg(long, default_value = "cli")]
        session: String,
        #[arg(long)]
        topic: Option<String>,
        #[arg(long)]
        sub_topic: Option<String>,
        /// Owner of the atom; omit for a shared atom
        #[arg(long)]
        user: Option<String>,
        /// Comma-separated tags; extracted from the user input when omitted
        #[arg(long, value_delimiter = ',')]
        tags: Option<Vec<String>>,
    },
    /// Recall memories relevant to an utterance
    Recall {
        query: String,
        #[arg(long, default_value = "cli")]
        user: String,
        #[arg(long)]
        limit: Option<usize>,
        /// Character budget for all summaries together
        #[arg(long)]
        budget: Option<usize>,
        /// Also print what each pipeline stage did
        #[arg(long)]
        trace: bool,
    },
    /// Run one decay/reinforcement cycle now
    Decay {
        /// Only this user's atoms, under their policy
        #[arg(long)]
        user: Option<String>,
    },
    /// Link related atoms among the most recent ones
    Link {
        #[arg(long)]
        window: Option<usize>,
    },
    /// Rebuild the vector index from the store and report its size
    RebuildIndex,
    /// Follow chain links from the latest atom on a topic
    Chain {
        topic: String,
        #[arg(long, default_value_t = 3)]
        depth: usize,
        /// List atoms sharing this chain id instead of following links
        #[arg(long)]
        chain_id: bool,
    },
    /// Show one atom with its connections and audit log
    Inspect { id: String },
    /// Show store statistics
    Stats {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Check database health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config (for log level)
    let config = MemoriaConfig::load()?;

    // Log to stderr so stdout stays clean for command output.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => cli::serve::serve(config).await?,
        Command::Ingest {
            user_input,
            response,
            session,
            topic,
            sub_topic,
            user,
            tags,
        } => {
            let exchange = memoria::memory::types::Exchange {
                user_input,
                response,
                session_id: session,
                tags,
                topic,
                sub_topic,
                user_id: user,
            };
            cli::ingest::ingest(config, exchange).await?;
        }
        Command::Recall {
            query,
            user,
            limit,
            budget,
            trace,
        } => cli::recall::recall(config, &query, &user, limit, budget, trace).await?,
        Command::Decay { user } => cli::maintenance::decay(config, user.as_deref()).await?,
        Command::Link { window } => cli::maintenance::link(config, window).await?,
        Command::RebuildIndex => cli::maintenance::rebuild_index(config).await?,
        Command::Chain {
            topic,
            depth,
            chain_id,
        } => cli::chain::chain(config, &topic, depth, chain_id).await?,
        Command::Inspect { id } => cli::inspect::inspect(&config, &id)?,
        Command::Stats { user, json } => cli::stats::stats(&config, user.as_deref(), json)?,
        Command::Doctor => cli::doctor::doctor(&config)?,
    }

    Ok(())
}
