/// Fan-in dispatcher
///
/// Hosts the per-feed workers and the shared MPSC ring, runs the health
/// monitor (staleness checks, backup promotion, observer hook), and exposes
/// the consumer side of the aggregated stream. `MultiFeedIngestor` is the
/// top-level multi-feed run loop.

use crate::config::{ConfigError, MultiFeedConfig};
use crate::feed::{FeedStatus, FeedState, FeedWorker};
use crate::record::FeedSlot;
use crate::ring::MpscRing;
use crate::stats::IngestionStats;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::info;

/// Consumer idle strategy, same shape as the single-feed ingestor.
const SPIN_LIMIT: u32 = 1000;
const IDLE_SLEEP: Duration = Duration::from_micros(10);

/// Cadence of the human-readable health summary in the run loop.
const HEALTH_PRINT_INTERVAL: Duration = Duration::from_secs(5);

/// Snapshot of one feed's health for the observer hook.
#[derive(Debug, Clone)]
pub struct FeedHealth {
    pub name: String,
    pub origin_id: u32,
    pub status: FeedStatus,
    pub is_primary: bool,
    pub effective_primary: bool,
    pub records: u64,
    pub gaps: u64,
    pub drops: u64,
    pub last_sequence: u64,
}

pub type HealthObserver = Box<dyn Fn(&[FeedHealth]) + Send>;

pub struct Dispatcher {
    config: MultiFeedConfig,
    global: Arc<MpscRing<FeedSlot>>,
    workers: Vec<FeedWorker>,
    stop: Arc<AtomicBool>,
    monitor: Option<JoinHandle<()>>,
    observer: Option<HealthObserver>,
}

impl Dispatcher {
    pub fn new(config: MultiFeedConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let global = Arc::new(MpscRing::new(config.global_buffer_capacity as u64));
        let workers = config.feeds.iter().cloned().map(FeedWorker::new).collect();
        Ok(Dispatcher {
            config,
            global,
            workers,
            stop: Arc::new(AtomicBool::new(false)),
            monitor: None,
            observer: None,
        })
    }

    /// Install a hook invoked with a health snapshot on every monitor wake.
    /// Must be called before `start`.
    pub fn set_health_observer(&mut self, observer: HealthObserver) {
        self.observer = Some(observer);
    }

    /// Bring up all workers and the health monitor.
    pub fn start(&mut self) {
        if self.monitor.is_some() {
            return;
        }
        self.stop.store(false, Ordering::Release);

        for worker in &mut self.workers {
            worker.start(Arc::clone(&self.global));
        }
        info!("started {} feed workers", self.workers.len());

        let states: Vec<Arc<FeedState>> = self.workers.iter().map(|w| w.state()).collect();
        let interval = Duration::from_millis(self.config.health_check_interval_ms as u64);
        let stop = Arc::clone(&self.stop);
        let observer = self.observer.take();

        let handle = std::thread::Builder::new()
            .name("feed-monitor".to_string())
            .spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    std::thread::sleep(interval);
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    for state in &states {
                        state.check_health();
                    }
                    promote_backups(&states);
                    if let Some(observer) = &observer {
                        observer(&snapshot(&states));
                    }
                }
            })
            .expect("spawn health monitor thread");
        self.monitor = Some(handle);
    }

    /// Signal every worker, then join them and the monitor.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        for worker in &mut self.workers {
            worker.stop();
        }
        if let Some(handle) = self.monitor.take() {
            let _ = handle.join();
        }
    }

    /// Consumer side of the aggregated stream.
    pub fn try_consume(&self) -> Option<FeedSlot> {
        self.global.try_pop()
    }

    pub fn health_snapshot(&self) -> Vec<FeedHealth> {
        let states: Vec<Arc<FeedState>> = self.workers.iter().map(|w| w.state()).collect();
        snapshot(&states)
    }

    pub fn total_records_received(&self) -> u64 {
        self.workers
            .iter()
            .map(|w| w.state().records_received())
            .sum()
    }

    /// A failed feed never terminates the run on its own; losing every
    /// configured feed does.
    pub fn all_feeds_failed(&self) -> bool {
        !self.workers.is_empty()
            && self
                .workers
                .iter()
                .all(|w| w.state().status() == FeedStatus::Failed)
    }

    pub fn print_health_summary(&self) {
        println!("\n=== Feed Health Summary ===");
        for worker in &self.workers {
            let state = worker.state();
            let mark = if state.is_effective_primary() { " (effective primary)" } else { "" };
            println!("{}{}", state.summary(), mark);
        }
        println!(
            "Fan-in buffer: {}/{}",
            self.global.size(),
            self.global.capacity()
        );
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn snapshot(states: &[Arc<FeedState>]) -> Vec<FeedHealth> {
    states
        .iter()
        .map(|state| FeedHealth {
            name: state.config().name.clone(),
            origin_id: state.config().origin_id,
            status: state.status(),
            is_primary: state.config().is_primary,
            effective_primary: state.is_effective_primary(),
            records: state.records_received(),
            gaps: state.gaps(),
            drops: state.drops(),
            last_sequence: state.last_sequence(),
        })
        .collect()
}

/// Failover marking: when no configured primary is delivering, the first
/// healthy backup gets the effective-primary mark. The mark is an
/// observable annotation only; the data plane keeps aggregating all feeds.
pub(crate) fn promote_backups(states: &[Arc<FeedState>]) {
    let primary_ok = states
        .iter()
        .any(|s| s.config().is_primary && s.is_healthy());
    if primary_ok {
        for state in states {
            if state.is_effective_primary() {
                info!(feed = %state.config().name, "configured primary recovered, clearing promotion");
                state.mark_effective_primary(false);
            }
        }
        return;
    }
    // Keep an existing promotion while it is still healthy
    if states
        .iter()
        .any(|s| s.is_effective_primary() && s.is_healthy())
    {
        return;
    }
    for state in states {
        if state.is_effective_primary() {
            state.mark_effective_primary(false);
        }
    }
    if let Some(backup) = states
        .iter()
        .find(|s| !s.config().is_primary && s.is_healthy())
    {
        info!(feed = %backup.config().name, "promoting backup feed to effective primary");
        backup.mark_effective_primary(true);
    }
}

/// Top-level multi-feed run loop: consumes the aggregated stream, updates
/// statistics, and prints periodic health summaries until a termination
/// condition is met.
pub struct MultiFeedIngestor {
    config: MultiFeedConfig,
    dispatcher: Dispatcher,
    stats: IngestionStats,
    stop: Arc<AtomicBool>,
}

impl MultiFeedIngestor {
    pub fn new(config: MultiFeedConfig) -> Result<Self, ConfigError> {
        let dispatcher = Dispatcher::new(config.clone())?;
        Ok(MultiFeedIngestor {
            config,
            dispatcher,
            stats: IngestionStats::new(),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn stats(&self) -> &IngestionStats {
        &self.stats
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn run(&mut self) {
        info!(
            "starting multi-feed ingestion with {} feeds",
            self.config.feeds.len()
        );
        self.dispatcher.start();

        let counters = self.stats.counters();
        let mut spins = 0u32;
        let mut last_health_print = Instant::now();
        let mut last_liveness_check = Instant::now();

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

            match self.dispatcher.try_consume() {
                Some(feed_slot) => {
                    self.stats.record_processed_no_gap(&feed_slot.slot);
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

            self.stats.check_periodic_flush();
            if last_liveness_check.elapsed() >= Duration::from_secs(1) {
                last_liveness_check = Instant::now();
                if self.dispatcher.all_feeds_failed() {
                    info!("all feeds failed, stopping");
                    break;
                }
            }
            if last_health_print.elapsed() >= HEALTH_PRINT_INTERVAL {
                self.dispatcher.print_health_summary();
                last_health_print = Instant::now();
            }
        }

        self.dispatcher.stop();
        while let Some(feed_slot) = self.dispatcher.try_consume() {
            if self.config.max_messages == 0 || counters.processed() < self.config.max_messages {
                self.stats.record_processed_no_gap(&feed_slot.slot);
            }
        }
        self.stats.print_final();
        self.dispatcher.print_health_summary();
    }
}
