/// Multi-feed ingestion benchmark
///
/// Aggregates several feeds through per-feed workers into the shared
/// fan-in ring, with health monitoring and failover marking.

use anyhow::{bail, Context, Result};
use clap::Parser;
use feed_ingest::{MultiFeedConfig, MultiFeedIngestor};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "multi_feed_bench", version, about = "Multi-feed ingestion benchmark")]
struct Cli {
    /// YAML configuration file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Feed specification (host:port), can be repeated
    #[arg(long, short = 'f')]
    feed: Vec<String>,

    /// Maximum runtime in seconds (0 = infinite)
    #[arg(long, short = 't', default_value_t = 0)]
    time: u32,

    /// Maximum messages to process (0 = infinite)
    #[arg(long, short = 'm', default_value_t = 0)]
    messages: u64,

    /// Global buffer capacity (power of 2)
    #[arg(long, short = 'b')]
    buffer: Option<u32>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let mut config = if let Some(path) = &cli.config {
        MultiFeedConfig::from_yaml(path)
            .with_context(|| format!("loading config from {}", path.display()))?
    } else if !cli.feed.is_empty() {
        MultiFeedConfig::from_cli_feeds(&cli.feed).context("parsing --feed specs")?
    } else {
        bail!("either --config or --feed is required");
    };

    if cli.time > 0 {
        config.max_seconds = cli.time;
    }
    if cli.messages > 0 {
        config.max_messages = cli.messages;
    }
    if let Some(buffer) = cli.buffer {
        config.global_buffer_capacity = buffer;
    }
    config.validate().context("invalid configuration")?;

    println!(
        "Multi-feed ingestion: {} feeds, fan-in capacity {}",
        config.feeds.len(),
        config.global_buffer_capacity
    );
    for feed in &config.feeds {
        println!(
            "  {} [{}:{}] origin {} {}",
            feed.name,
            feed.host,
            feed.port,
            feed.origin_id,
            if feed.is_primary { "(primary)" } else { "(backup)" }
        );
    }

    let mut ingestor = MultiFeedIngestor::new(config).context("invalid configuration")?;
    ingestor.run();
    Ok(())
}
