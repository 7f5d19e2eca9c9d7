/// Per-feed state and worker
///
/// `FeedState` is the shared health/statistics block for one feed: the
/// worker mutates it, the health monitor and reporters only read. The
/// worker owns a driver, a parser, and a local SPSC ring, and drains that
/// ring into the shared fan-in ring.

use crate::config::FeedConfig;
use crate::driver::{create_driver, Driver, DriverBackend, DriverConfig, PacketDesc};
use crate::parser::{Parser, RecordSink};
use crate::record::{FeedSlot, Record, Slot};
use crate::ring::{MpscRing, SpscRing};
use crate::stats::GapTracker;
use crate::timing::monotonic_ns;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

/// Drain thread sleep when the local ring is empty.
const DRAIN_IDLE_SLEEP: Duration = Duration::from_micros(100);

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Connecting = 0,
    Healthy = 1,
    /// Receiving data but stale beyond two heartbeat intervals
    Degraded = 2,
    /// No data within heartbeat * timeout_multiplier
    Dead = 3,
    /// Connection or parser failure
    Failed = 4,
}

impl FeedStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => FeedStatus::Connecting,
            1 => FeedStatus::Healthy,
            2 => FeedStatus::Degraded,
            3 => FeedStatus::Dead,
            _ => FeedStatus::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedStatus::Connecting => "CONNECTING",
            FeedStatus::Healthy => "HEALTHY",
            FeedStatus::Degraded => "DEGRADED",
            FeedStatus::Dead => "DEAD",
            FeedStatus::Failed => "FAILED",
        }
    }
}

/// Shared per-feed health and counters. All fields are atomic: the worker's
/// two threads write, the monitor thread reads. Gap-tracking state itself
/// lives in the drain thread's `GapTracker`; only the accumulated total is
/// published here.
pub struct FeedState {
    config: FeedConfig,
    status: AtomicU8,
    records_received: AtomicU64,
    bytes_received: AtomicU64,
    gaps: AtomicU64,
    drops: AtomicU64,
    last_sequence: AtomicU64,
    last_message_ns: AtomicU64,
    effective_primary: AtomicBool,
}

impl FeedState {
    pub fn new(config: FeedConfig) -> Self {
        FeedState {
            config,
            status: AtomicU8::new(FeedStatus::Connecting as u8),
            records_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            gaps: AtomicU64::new(0),
            drops: AtomicU64::new(0),
            last_sequence: AtomicU64::new(0),
            last_message_ns: AtomicU64::new(monotonic_ns()),
            effective_primary: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn status(&self) -> FeedStatus {
        FeedStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: FeedStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status(), FeedStatus::Healthy | FeedStatus::Degraded)
    }

    pub fn is_dead(&self) -> bool {
        matches!(self.status(), FeedStatus::Dead | FeedStatus::Failed)
    }

    pub fn record_connection_failed(&self) {
        self.set_status(FeedStatus::Failed);
    }

    /// Called by the drain thread for every record leaving the local ring:
    /// gap detection, last-message bookkeeping, and the Connecting->Healthy
    /// transition on the first record.
    pub fn record_drained(&self, seq: u64, tracker: &mut GapTracker) {
        let gap = tracker.observe(seq);
        if gap > 0 {
            self.gaps.fetch_add(gap, Ordering::Relaxed);
        }
        self.last_sequence.store(seq, Ordering::Relaxed);
        self.last_message_ns.store(monotonic_ns(), Ordering::Release);
        if self.status() == FeedStatus::Connecting {
            self.set_status(FeedStatus::Healthy);
        }
    }

    /// The shared fan-in ring rejected a push.
    pub fn record_fanin_drop(&self) {
        self.drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Monitor-side staleness check. Only a feed that has been delivering
    /// (Healthy or Degraded) is downgraded; Connecting and Failed feeds
    /// keep their status.
    pub fn check_health(&self) {
        let status = self.status();
        if !matches!(status, FeedStatus::Healthy | FeedStatus::Degraded) {
            return;
        }
        let age_ms =
            monotonic_ns().saturating_sub(self.last_message_ns.load(Ordering::Acquire)) / 1_000_000;
        if age_ms > self.config.timeout_ms() {
            self.set_status(FeedStatus::Dead);
        } else if age_ms > self.config.heartbeat_interval_ms as u64 * 2 {
            self.set_status(FeedStatus::Degraded);
        } else if status == FeedStatus::Degraded
            && age_ms <= self.config.heartbeat_interval_ms as u64
        {
            self.set_status(FeedStatus::Healthy);
        }
    }

    pub fn mark_effective_primary(&self, mark: bool) {
        self.effective_primary.store(mark, Ordering::Release);
    }

    pub fn is_effective_primary(&self) -> bool {
        self.effective_primary.load(Ordering::Acquire)
    }

    pub fn records_received(&self) -> u64 {
        self.records_received.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn gaps(&self) -> u64 {
        self.gaps.load(Ordering::Relaxed)
    }

    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::Relaxed)
    }

    /// One health line, as printed in the periodic summary.
    pub fn summary(&self) -> String {
        format!(
            "Feed {} [{}:{}] Status: {} | Messages: {} | Gaps: {} | Drops: {} | Last Seq: {}",
            self.config.name,
            self.config.host,
            self.config.port,
            self.status().as_str(),
            self.records_received(),
            self.gaps(),
            self.drops(),
            self.last_sequence(),
        )
    }

    #[cfg(test)]
    pub(crate) fn set_last_message_ns(&self, ns: u64) {
        self.last_message_ns.store(ns, Ordering::Release);
    }
}

impl RecordSink for FeedState {
    fn on_received(&self, _record: &Record) {
        self.records_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(Record::SIZE as u64, Ordering::Relaxed);
    }

    fn on_dropped(&self) {
        self.drops.fetch_add(1, Ordering::Relaxed);
    }
}

/// One worker per feed. The worker thread connects the driver, starts
/// reception (parser -> local ring), and drains the local ring into the
/// shared fan-in ring until stopped or faulted.
pub struct FeedWorker {
    config: FeedConfig,
    state: Arc<FeedState>,
    driver: Option<Box<dyn Driver>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FeedWorker {
    pub fn new(config: FeedConfig) -> Self {
        Self::with_driver(config, create_driver(DriverBackend::Socket))
    }

    pub fn with_driver(config: FeedConfig, driver: Box<dyn Driver>) -> Self {
        let state = Arc::new(FeedState::new(config.clone()));
        FeedWorker {
            config,
            state,
            driver: Some(driver),
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    pub fn state(&self) -> Arc<FeedState> {
        Arc::clone(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some() && !self.stop.load(Ordering::Acquire)
    }

    /// Spawn the worker thread. A worker runs once; starting a stopped
    /// worker again is a no-op.
    pub fn start(&mut self, global: Arc<MpscRing<FeedSlot>>) {
        if self.thread.is_some() {
            return;
        }
        let Some(driver) = self.driver.take() else {
            warn!(feed = %self.config.name, "worker already consumed, not restarting");
            return;
        };
        self.stop.store(false, Ordering::Release);

        let config = self.config.clone();
        let state = Arc::clone(&self.state);
        let stop = Arc::clone(&self.stop);
        let name = format!("feed-{}", config.name);
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || Self::worker_loop(driver, config, state, global, stop))
            .expect("spawn feed worker thread");
        self.thread = Some(handle);
    }

    /// Deterministic teardown: flag, then join (the worker stops its own
    /// driver on the way out).
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    fn worker_loop(
        mut driver: Box<dyn Driver>,
        config: FeedConfig,
        state: Arc<FeedState>,
        global: Arc<MpscRing<FeedSlot>>,
        stop: Arc<AtomicBool>,
    ) {
        let driver_config = DriverConfig {
            host: config.host.clone(),
            port: config.port,
            ..Default::default()
        };
        let connected = driver
            .initialize(&driver_config)
            .and_then(|_| driver.connect());
        if let Err(e) = connected {
            error!(feed = %config.name, "connection failed: {e}");
            state.record_connection_failed();
            return;
        }
        info!(feed = %config.name, "connected to {}:{}", config.host, config.port);

        let local = Arc::new(SpscRing::<Slot>::new(config.buffer_capacity as u64));
        let fault = Arc::new(AtomicBool::new(false));

        let handler = {
            let local = Arc::clone(&local);
            let state = Arc::clone(&state);
            let fault = Arc::clone(&fault);
            let releaser = driver.releaser();
            let feed_name = config.name.clone();
            let mut parser = Parser::new();
            Box::new(move |desc: PacketDesc<'_>| {
                if let Err(e) = parser.feed(desc.data, &local, state.as_ref()) {
                    error!(feed = %feed_name, "parser fault: {e}");
                    fault.store(true, Ordering::Release);
                }
                // Workers copy into their local ring, so a zero-copy loan
                // is returned as soon as the chunk is parsed.
                if let Some(token) = desc.token {
                    releaser.release(token);
                }
            })
        };
        driver.start_reception(handler);

        let mut tracker = GapTracker::new();
        while !stop.load(Ordering::Acquire) && !fault.load(Ordering::Acquire) {
            let mut drained = false;
            while let Some(slot) = local.try_pop() {
                drained = true;
                state.record_drained(slot.record.seq(), &mut tracker);
                let feed_slot = FeedSlot {
                    slot,
                    origin_id: config.origin_id,
                    arrival_ns: monotonic_ns(),
                };
                if !global.try_push(feed_slot) {
                    state.record_fanin_drop();
                }
            }
            if !drained {
                std::thread::sleep(DRAIN_IDLE_SLEEP);
            }
        }

        driver.stop_reception();
        driver.disconnect();
        if fault.load(Ordering::Acquire) {
            state.set_status(FeedStatus::Failed);
        }
        info!(feed = %config.name, "worker stopped");
    }
}

impl Drop for FeedWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> FeedConfig {
        FeedConfig {
            name: "test".to_string(),
            heartbeat_interval_ms: 100,
            timeout_multiplier: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_first_record_marks_healthy() {
        let state = FeedState::new(test_config());
        assert_eq!(state.status(), FeedStatus::Connecting);

        let mut tracker = GapTracker::new();
        state.record_drained(1, &mut tracker);
        assert_eq!(state.status(), FeedStatus::Healthy);
        assert_eq!(state.last_sequence(), 1);
    }

    #[test]
    fn test_gap_counter_published() {
        let state = FeedState::new(test_config());
        let mut tracker = GapTracker::new();
        for seq in [1, 2, 3, 5, 6] {
            state.record_drained(seq, &mut tracker);
        }
        assert_eq!(state.gaps(), 1);
        assert_eq!(tracker.next_expected(), 7);
    }

    #[test]
    fn test_health_transitions() {
        let state = FeedState::new(test_config());
        state.set_status(FeedStatus::Healthy);

        // Fresh message: stays healthy
        state.set_last_message_ns(monotonic_ns());
        state.check_health();
        assert_eq!(state.status(), FeedStatus::Healthy);

        // Stale past heartbeat * 2 (200ms): degraded
        state.set_last_message_ns(monotonic_ns() - 250_000_000);
        state.check_health();
        assert_eq!(state.status(), FeedStatus::Degraded);

        // Stale past heartbeat * multiplier (300ms): dead
        state.set_last_message_ns(monotonic_ns() - 400_000_000);
        state.check_health();
        assert_eq!(state.status(), FeedStatus::Dead);
    }

    #[test]
    fn test_degraded_recovers_when_fresh() {
        let state = FeedState::new(test_config());
        state.set_status(FeedStatus::Degraded);
        state.set_last_message_ns(monotonic_ns());
        state.check_health();
        assert_eq!(state.status(), FeedStatus::Healthy);
    }

    #[test]
    fn test_connecting_feed_not_downgraded() {
        let state = FeedState::new(test_config());
        state.set_last_message_ns(monotonic_ns() - 10_000_000_000);
        state.check_health();
        assert_eq!(state.status(), FeedStatus::Connecting);
    }

    #[test]
    fn test_sink_counters() {
        let state = FeedState::new(test_config());
        let rec = Record::new(1, 100.0, 1);
        state.on_received(&rec);
        state.on_received(&rec);
        state.on_dropped();

        assert_eq!(state.records_received(), 2);
        assert_eq!(state.bytes_received(), 2 * Record::SIZE as u64);
        assert_eq!(state.drops(), 1);
    }

    #[test]
    fn test_worker_fails_fast_on_refused_connection() {
        let config = FeedConfig {
            name: "refused".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1,
            buffer_capacity: 256,
            ..Default::default()
        };
        let mut worker = FeedWorker::new(config);
        let global = Arc::new(MpscRing::new(1024));
        worker.start(global);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while worker.state().status() != FeedStatus::Failed
            && std::time::Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(worker.state().status(), FeedStatus::Failed);
        worker.stop();
    }
}
