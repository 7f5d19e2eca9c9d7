/// Synthetic market data server
///
/// Generates a seeded random-walk feed and streams it to ingestion clients
/// over TCP or UDP multicast, paced to a target message rate.

use anyhow::{Context, Result};
use clap::Parser;
use feed_ingest::{
    EncodingConfig, EncodingType, Simulator, SimulatorConfig, TcpTransport, TransportType,
    UdpMulticastTransport,
};
use std::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "feed_sim", version, about = "Synthetic market data server for ingestion benchmarking")]
struct Cli {
    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(long, short = 'p', default_value_t = 9001)]
    port: u16,

    /// Transport: tcp or udp-multicast
    #[arg(long, default_value = "tcp")]
    transport: TransportType,

    /// Encoding: binary, fix, or itch
    #[arg(long, default_value = "binary")]
    encoding: EncodingType,

    /// Multicast group address (udp transport only)
    #[arg(long, default_value = "239.255.1.1")]
    mcast_addr: String,

    /// Message rate (msgs/sec)
    #[arg(long, short = 'r', default_value_t = 100_000)]
    rate: u32,

    /// Messages per batch
    #[arg(long, short = 'b', default_value_t = 100)]
    batch_size: u32,

    /// RNG seed for reproducible runs
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Base price for generated messages
    #[arg(long, default_value_t = 100.0)]
    base_price: f64,

    /// Max price movement per tick, either direction
    #[arg(long, default_value_t = 0.05)]
    price_jitter: f64,

    /// Maximum quantity per message
    #[arg(long, default_value_t = 100)]
    max_quantity: i32,

    /// Max duration in seconds (0 = infinite)
    #[arg(long, short = 't', default_value_t = 0)]
    max_seconds: u32,

    /// Max messages (0 = infinite)
    #[arg(long, short = 'm', default_value_t = 0)]
    max_messages: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let config = SimulatorConfig {
        host: cli.host,
        port: cli.port,
        mcast_addr: cli.mcast_addr,
        transport: cli.transport,
        encoding: cli.encoding,
        rate: cli.rate,
        batch_size: cli.batch_size,
        seed: cli.seed,
        base_price: cli.base_price,
        price_jitter: cli.price_jitter,
        max_quantity: cli.max_quantity,
        encoding_config: EncodingConfig::default(),
        max_seconds: cli.max_seconds,
        max_messages: cli.max_messages,
    };

    println!("Market Data Simulator Configuration:");
    println!("  Transport: {:?}", config.transport);
    println!("  Encoding: {}", config.encoding);
    println!("  Rate: {} msgs/sec, batch {}", config.rate, config.batch_size);
    println!("  Base price: ${}, jitter ±${}", config.base_price, config.price_jitter);

    match config.transport {
        TransportType::Tcp => {
            let listener = TcpListener::bind((config.host.as_str(), config.port))
                .with_context(|| format!("bind {}:{}", config.host, config.port))?;
            info!("listening on {}:{}", config.host, config.port);
            loop {
                let (stream, peer) = listener.accept().context("accept client")?;
                info!("client connected from {peer}");
                let mut sim = Simulator::new(config.clone());
                sim.set_transport(Box::new(TcpTransport::new(stream)?));
                let sent = sim.run()?;
                println!("Sent {sent} messages");
                // Exit criteria apply per run; an open-ended server keeps
                // accepting clients.
                if config.max_seconds > 0 || config.max_messages > 0 {
                    break;
                }
            }
        }
        TransportType::UdpMulticast => {
            let mut sim = Simulator::new(config.clone());
            sim.set_transport(Box::new(UdpMulticastTransport::new(&config)?));
            let sent = sim.run()?;
            println!("Sent {sent} messages");
        }
    }
    Ok(())
}
