/// Single-feed ingestion
///
/// Wires one driver, one parser, one ring, and one stats engine. The
/// driver's reception thread parses chunks straight into the ring; the
/// consumer loop on the calling thread pops slots, updates statistics, and
/// reclaims zero-copy tokens until a termination condition is met.

use crate::config::ConfigError;
use crate::driver::{create_driver, Driver, DriverBackend, DriverConfig, DriverError, PacketDesc};
use crate::parser::Parser;
use crate::pool::PacketPool;
use crate::record::Slot;
use crate::ring::SpscRing;
use crate::stats::IngestionStats;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Tight spins on an empty ring before yielding the CPU.
const SPIN_LIMIT: u32 = 1000;
const IDLE_SLEEP: Duration = Duration::from_micros(10);

/// How long the driver may stay disconnected (reconnecting at its own
/// backoff) before the run gives up.
const RECONNECT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub driver: DriverConfig,
    /// Ring capacity in slots (power of two)
    pub buffer_capacity: u64,
    /// Run duration limit in seconds (0 = infinite)
    pub max_seconds: u32,
    /// Processed-message limit (0 = infinite)
    pub max_messages: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            driver: DriverConfig::default(),
            buffer_capacity: 65536,
            max_seconds: 0,
            max_messages: 0,
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.buffer_capacity.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                field: "buffer_capacity",
                value: self.buffer_capacity,
            });
        }
        Ok(())
    }
}

pub struct Ingestor {
    config: IngestConfig,
    driver: Box<dyn Driver>,
    ring: Arc<SpscRing<Slot>>,
    pool: Arc<PacketPool>,
    stats: IngestionStats,
    stop: Arc<AtomicBool>,
}

impl Ingestor {
    pub fn new(config: IngestConfig) -> Result<Self, ConfigError> {
        Self::with_driver(config, create_driver(DriverBackend::Socket))
    }

    /// Inject a driver backend; used by tests and by callers wiring a
    /// vendor driver behind the same trait.
    pub fn with_driver(config: IngestConfig, driver: Box<dyn Driver>) -> Result<Self, ConfigError> {
        config.validate()?;
        let ring = Arc::new(SpscRing::new(config.buffer_capacity));
        Ok(Ingestor {
            config,
            driver,
            ring,
            pool: Arc::new(PacketPool::default()),
            stats: IngestionStats::new(),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag observed at every loop head; set it from a signal handler for
    /// cooperative shutdown.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn stats(&self) -> &IngestionStats {
        &self.stats
    }

    /// Run until `max_seconds`, `max_messages`, the stop flag, or a driver
    /// that stays disconnected past the reconnect grace window. Drains the
    /// ring and the token pool before printing final statistics.
    pub fn run(&mut self) -> Result<(), DriverError> {
        self.driver.initialize(&self.config.driver)?;
        self.driver.connect()?;
        info!("ingesting from {}", self.driver.backend_info());

        let counters = self.stats.counters();
        let ring = Arc::clone(&self.ring);
        let pool = Arc::clone(&self.pool);
        let releaser = self.driver.releaser();
        let fault = Arc::clone(&self.stop);
        let mut parser = Parser::new();

        self.driver.start_reception(Box::new(move |desc: PacketDesc<'_>| {
            counters.record_bytes_received(desc.data.len() as u64);
            if let Err(e) = parser.feed(desc.data, &ring, counters.as_ref()) {
                error!("parser fault, stopping feed: {e}");
                fault.store(true, Ordering::Release);
            }
            if let Some(token) = desc.token {
                if !pool.try_retain(token) {
                    // Pool full: the pool is an optimization, never a
                    // correctness requirement.
                    releaser.release(token);
                }
            }
        }));

        self.consumer_loop();

        self.driver.stop_reception();
        let counters = self.stats.counters();
        while let Some(slot) = self.ring.try_pop() {
            // Records past an exact message limit are discarded, not
            // counted as processed.
            if self.config.max_messages == 0 || counters.processed() < self.config.max_messages {
                self.stats.record_processed(&slot);
            }
        }
        let releaser = self.driver.releaser();
        self.pool.release_all(&releaser);
        self.driver.disconnect();
        self.stats.print_final();
        Ok(())
    }

    fn consumer_loop(&mut self) {
        let counters = self.stats.counters();
        let releaser = self.driver.releaser();
        let mut spins = 0u32;
        let mut disconnected_since: Option<Instant> = None;

        loop {
            if self.stop.load(Ordering::Acquire) {
                info!("stop requested");
                break;
            }
            if self.config.max_seconds > 0
                && self.stats.elapsed_seconds() >= self.config.max_seconds as f64
            {
                info!("run duration reached");
                break;
            }
            if self.config.max_messages > 0 && counters.processed() >= self.config.max_messages {
                info!("message limit reached");
                break;
            }
            if self.driver.is_connected() {
                disconnected_since = None;
            } else {
                let since = disconnected_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= RECONNECT_GRACE {
                    info!("driver disconnected and could not reconnect, stopping");
                    break;
                }
            }

            match self.ring.try_pop() {
                Some(slot) => {
                    self.stats.record_processed(&slot);
                    spins = 0;
                }
                None => {
                    spins += 1;
                    if spins >= SPIN_LIMIT {
                        std::thread::sleep(IDLE_SLEEP);
                        spins = 0;
                    } else {
                        std::hint::spin_loop();
                    }
                }
            }

            while let Some(token) = self.pool.try_reclaim() {
                releaser.release(token);
            }
            self.stats.check_periodic_flush();
        }
    }
}
