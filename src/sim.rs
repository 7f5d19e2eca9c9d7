/// Synthetic market data feed
///
/// Seeded random-walk generator plus TCP/UDP-multicast transports, paced
/// by the busy-spin rate limiter. Used by the feed_sim binary and by the
/// end-to-end tests.

use crate::encode::{create_encoder, Encoder, EncodingConfig, EncodingType};
use crate::record::Record;
use crate::timing::{RateLimiter, Timer};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Write;
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    Tcp,
    UdpMulticast,
}

impl std::str::FromStr for TransportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(TransportType::Tcp),
            "udp" | "udp-multicast" | "multicast" => Ok(TransportType::UdpMulticast),
            other => Err(format!("unknown transport: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub host: String,
    pub port: u16,
    pub mcast_addr: String,
    pub transport: TransportType,
    pub encoding: EncodingType,
    /// Target messages per second
    pub rate: u32,
    /// Messages per batch
    pub batch_size: u32,
    /// RNG seed for reproducible runs
    pub seed: u64,
    pub base_price: f64,
    /// Max price movement per tick, either direction
    pub price_jitter: f64,
    pub max_quantity: i32,
    pub encoding_config: EncodingConfig,
    pub max_seconds: u32,
    pub max_messages: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            host: "0.0.0.0".to_string(),
            port: 9001,
            mcast_addr: "239.255.1.1".to_string(),
            transport: TransportType::Tcp,
            encoding: EncodingType::Binary,
            rate: 100_000,
            batch_size: 100,
            seed: 42,
            base_price: 100.0,
            price_jitter: 0.05,
            max_quantity: 100,
            encoding_config: EncodingConfig::default(),
            max_seconds: 0,
            max_messages: 0,
        }
    }
}

/// Random-walk price series with alternating-sign quantities and a
/// strictly monotonic sequence starting at 1.
pub struct MarketDataGenerator {
    rng: StdRng,
    price: f64,
    sequence: u64,
    jitter: f64,
    max_quantity: i32,
}

impl MarketDataGenerator {
    pub fn new(config: &SimulatorConfig) -> Self {
        MarketDataGenerator {
            rng: StdRng::seed_from_u64(config.seed),
            price: config.base_price,
            sequence: 0,
            jitter: config.price_jitter,
            max_quantity: config.max_quantity.max(1),
        }
    }

    /// Refill `batch` with `count` fresh records.
    pub fn generate_batch(&mut self, batch: &mut Vec<Record>, count: usize) {
        batch.clear();
        batch.reserve(count);
        for _ in 0..count {
            self.price += self.rng.gen_range(-self.jitter..=self.jitter);
            if self.price < 0.01 {
                self.price = 0.01;
            }
            let mut quantity = self.rng.gen_range(1..=self.max_quantity);
            if self.rng.gen::<bool>() {
                quantity = -quantity;
            }
            self.sequence += 1;
            batch.push(Record::new(self.sequence, self.price, quantity));
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

pub trait Transport: Send {
    fn send(&mut self, data: &[u8]) -> std::io::Result<()>;
    fn is_connected(&self) -> bool;
}

pub struct TcpTransport {
    stream: TcpStream,
    connected: bool,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> std::io::Result<Self> {
        stream.set_nodelay(true)?;
        Ok(TcpTransport { stream, connected: true })
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self.stream.write_all(data) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.connected = false;
                Err(e)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Datagram sender to a multicast group, one batch per datagram.
pub struct UdpMulticastTransport {
    socket: UdpSocket,
    dest: SocketAddr,
}

impl UdpMulticastTransport {
    pub fn new(config: &SimulatorConfig) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        let dest: SocketAddr = format!("{}:{}", config.mcast_addr, config.port)
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        Ok(UdpMulticastTransport { socket, dest })
    }
}

impl Transport for UdpMulticastTransport {
    fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.socket.send_to(data, self.dest)?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

/// Generates, encodes, and transmits batches at the configured rate until
/// an exit criterion or client disconnect.
pub struct Simulator {
    config: SimulatorConfig,
    generator: MarketDataGenerator,
    encoder: Box<dyn Encoder>,
    transport: Option<Box<dyn Transport>>,
    messages_sent: u64,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let generator = MarketDataGenerator::new(&config);
        let encoder = create_encoder(config.encoding, config.encoding_config.clone());
        Simulator {
            config,
            generator,
            encoder,
            transport: None,
            messages_sent: 0,
        }
    }

    pub fn set_transport(&mut self, transport: Box<dyn Transport>) {
        self.transport = Some(transport);
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    /// Stream batches until max_seconds/max_messages or the transport
    /// drops. Returns the number of messages sent.
    pub fn run(&mut self) -> std::io::Result<u64> {
        let transport = self.transport.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotConnected, "transport not set")
        })?;

        let batch_size = self.config.batch_size.max(1) as usize;
        let mut limiter = RateLimiter::new(self.config.rate, batch_size as u32);
        let mut batch = Vec::with_capacity(batch_size);
        let mut encoded = Vec::with_capacity(batch_size * Record::SIZE * 2);
        let timer = Timer::start();

        loop {
            if self.config.max_seconds > 0
                && timer.elapsed() >= Duration::from_secs(self.config.max_seconds as u64)
            {
                break;
            }
            if self.config.max_messages > 0 && self.messages_sent >= self.config.max_messages {
                break;
            }
            if !transport.is_connected() {
                break;
            }

            limiter.wait_for_next_tick();
            self.generator.generate_batch(&mut batch, batch_size);
            self.encoder.encode_into(&batch, &mut encoded);
            if let Err(e) = transport.send(&encoded) {
                info!("client disconnected: {e}");
                break;
            }
            self.messages_sent += batch_size as u64;
        }

        info!(
            "simulation complete: {} messages in {:.2}s",
            self.messages_sent,
            timer.elapsed_seconds()
        );
        Ok(self.messages_sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_is_deterministic() {
        let config = SimulatorConfig { seed: 7, ..Default::default() };
        let mut a = MarketDataGenerator::new(&config);
        let mut b = MarketDataGenerator::new(&config);

        let mut batch_a = Vec::new();
        let mut batch_b = Vec::new();
        a.generate_batch(&mut batch_a, 50);
        b.generate_batch(&mut batch_b, 50);

        for (x, y) in batch_a.iter().zip(&batch_b) {
            assert_eq!(x.seq(), y.seq());
            assert_eq!(x.price(), y.price());
            assert_eq!(x.quantity(), y.quantity());
        }
    }

    #[test]
    fn test_generator_invariants() {
        let config = SimulatorConfig::default();
        let mut generator = MarketDataGenerator::new(&config);
        let mut batch = Vec::new();
        generator.generate_batch(&mut batch, 1000);

        for (i, record) in batch.iter().enumerate() {
            assert_eq!(record.seq(), i as u64 + 1);
            let (price, quantity) = (record.price(), record.quantity());
            assert!(price >= 0.01);
            assert!(quantity != 0);
            assert!(quantity.unsigned_abs() <= config.max_quantity as u32);
        }
        assert_eq!(generator.sequence(), 1000);
    }

    #[test]
    fn test_batches_continue_the_walk() {
        let config = SimulatorConfig::default();
        let mut generator = MarketDataGenerator::new(&config);
        let mut batch = Vec::new();
        generator.generate_batch(&mut batch, 10);
        let last = batch.last().unwrap().seq();
        generator.generate_batch(&mut batch, 10);
        assert_eq!(batch.first().unwrap().seq(), last + 1);
    }

    #[test]
    fn test_simulator_requires_transport() {
        let mut sim = Simulator::new(SimulatorConfig::default());
        assert!(sim.run().is_err());
    }
}
