/// Single-feed ingestion benchmark
///
/// Connects to a feed server, parses the record stream through the
/// lock-free ring, and reports throughput and latency percentiles.

use anyhow::{Context, Result};
use clap::Parser;
use feed_ingest::{DriverConfig, IngestConfig, Ingestor};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ingest_bench", version, about = "Market data feed ingestion benchmark")]
struct Cli {
    /// Feed server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Feed server port
    #[arg(long, short = 'p', default_value_t = 9001)]
    port: u16,

    /// Ring buffer capacity in slots (power of 2)
    #[arg(long, default_value_t = 65536)]
    buffer_capacity: u64,

    /// Run for the given seconds then exit (0 = infinite)
    #[arg(long, short = 't', default_value_t = 0)]
    max_seconds: u32,

    /// Process the given number of messages then exit (0 = infinite)
    #[arg(long, short = 'm', default_value_t = 0)]
    max_messages: u64,

    /// Reception polling timeout in microseconds
    #[arg(long, default_value_t = 100)]
    poll_timeout: u32,

    /// CPU core for the reception thread (0 = unpinned)
    #[arg(long, default_value_t = 0)]
    cpu_core: u32,

    /// Disable zero-copy packet processing
    #[arg(long)]
    no_zero_copy: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let config = IngestConfig {
        driver: DriverConfig {
            host: cli.host,
            port: cli.port,
            poll_timeout_us: cli.poll_timeout,
            cpu_core: cli.cpu_core,
            enable_zero_copy: !cli.no_zero_copy,
            ..Default::default()
        },
        buffer_capacity: cli.buffer_capacity,
        max_seconds: cli.max_seconds,
        max_messages: cli.max_messages,
    };

    println!("Ingestion Benchmark Configuration:");
    println!("  Endpoint: {}:{}", config.driver.host, config.driver.port);
    println!("  Buffer capacity: {} slots", config.buffer_capacity);
    if config.max_seconds > 0 {
        println!("  Max duration: {} seconds", config.max_seconds);
    }
    if config.max_messages > 0 {
        println!("  Max messages: {}", config.max_messages);
    }

    let mut ingestor = Ingestor::new(config).context("invalid configuration")?;
    ingestor.run().context("ingestion failed")?;
    Ok(())
}
