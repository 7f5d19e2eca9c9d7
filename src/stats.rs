/// Ingestion statistics
///
/// Atomic counters shared with the reception thread, per-feed sequence gap
/// tracking, a fixed-size latency histogram, and the periodic flush that
/// prints the once-per-second report line.

use crate::parser::RecordSink;
use crate::record::{Record, Slot};
use crate::timing::{monotonic_ns, Timer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic event counters. Shared by the reception and consumer threads;
/// values read without a snapshot are not mutually consistent, which is
/// acceptable for observation.
#[derive(Debug, Default)]
pub struct StatCounters {
    received: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
    bytes: AtomicU64,
}

impl StatCounters {
    pub fn record_bytes_received(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_message_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl RecordSink for StatCounters {
    fn on_received(&self, _record: &Record) {
        self.record_message_received();
    }

    fn on_dropped(&self) {
        self.record_message_dropped();
    }
}

/// Sequence gap tracking for a single feed. Single-threaded: only the
/// thread processing that feed's records may call `observe`.
#[derive(Debug, Clone, Default)]
pub struct GapTracker {
    next_expected: u64,
    seen_first: bool,
    total_gaps: u64,
}

impl GapTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one sequence number; returns the gap contribution of this
    /// record (distance from the expected sequence). The tracker always
    /// re-arms to `seq + 1`; no recovery is attempted.
    pub fn observe(&mut self, seq: u64) -> u64 {
        if !self.seen_first {
            self.seen_first = true;
            self.next_expected = seq + 1;
            return 0;
        }
        let delta = if seq != self.next_expected {
            seq.abs_diff(self.next_expected)
        } else {
            0
        };
        self.next_expected = seq + 1;
        self.total_gaps += delta;
        delta
    }

    /// Total missing (or replayed) sequence distance observed so far.
    pub fn total_gaps(&self) -> u64 {
        self.total_gaps
    }

    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

pub const LATENCY_BUCKETS: usize = 1001;

/// Latency histogram with one-microsecond bins: bin i counts samples with
/// floor(ns / 1000) == i for i in 0..1000, bin 1000 is the >= 1ms overflow.
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    buckets: Box<[u64; LATENCY_BUCKETS]>,
    total: u64,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        LatencyHistogram { buckets: Box::new([0u64; LATENCY_BUCKETS]), total: 0 }
    }

    #[inline]
    pub fn record(&mut self, latency_ns: u64) {
        let bucket = ((latency_ns / 1000) as usize).min(LATENCY_BUCKETS - 1);
        self.buckets[bucket] += 1;
        self.total += 1;
    }

    /// First bin whose cumulative count reaches ceil(total * p), in
    /// microseconds; the overflow bin reports as 1000. Returns 0 for an
    /// empty histogram.
    pub fn percentile(&self, p: f64) -> u64 {
        if self.total == 0 {
            return 0;
        }
        let target = ((self.total as f64) * p).ceil() as u64;
        let mut cumulative = 0u64;
        for (bucket, count) in self.buckets.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                return bucket as u64;
            }
        }
        (LATENCY_BUCKETS - 1) as u64
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn overflow(&self) -> u64 {
        self.buckets[LATENCY_BUCKETS - 1]
    }

    pub fn reset(&mut self) {
        self.buckets.fill(0);
        self.total = 0;
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer-side statistics engine: owns the latency window, gap tracker,
/// and flush timing; shares the atomic counter block with the reception
/// side via `counters()`.
pub struct IngestionStats {
    counters: Arc<StatCounters>,
    gap: GapTracker,
    window: LatencyHistogram,
    lifetime: LatencyHistogram,
    timer: Timer,
    last_flush: Instant,
    flush_interval: Duration,
    last_received: u64,
    last_bytes: u64,
}

impl IngestionStats {
    pub fn new() -> Self {
        IngestionStats {
            counters: Arc::new(StatCounters::default()),
            gap: GapTracker::new(),
            window: LatencyHistogram::new(),
            lifetime: LatencyHistogram::new(),
            timer: Timer::start(),
            last_flush: Instant::now(),
            flush_interval: Duration::from_secs(1),
            last_received: 0,
            last_bytes: 0,
        }
    }

    /// Handle for the reception side (parser sink, byte accounting).
    pub fn counters(&self) -> Arc<StatCounters> {
        Arc::clone(&self.counters)
    }

    /// Record a popped slot: processed count, gap tracking, latency.
    pub fn record_processed(&mut self, slot: &Slot) {
        self.counters.record_message_processed();
        self.gap.observe(slot.record.seq());
        self.record_latency(slot);
    }

    /// Record a popped fan-in slot. No gap tracking here: sequence spaces
    /// interleave across origins and per-feed gaps are tracked in the
    /// workers.
    pub fn record_processed_no_gap(&mut self, slot: &Slot) {
        self.counters.record_message_processed();
        self.record_latency(slot);
    }

    #[inline]
    fn record_latency(&mut self, slot: &Slot) {
        let latency_ns = monotonic_ns().saturating_sub(slot.rx_ts);
        self.window.record(latency_ns);
        self.lifetime.record(latency_ns);
    }

    pub fn gap_count(&self) -> u64 {
        self.gap.total_gaps()
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.timer.elapsed_seconds()
    }

    /// Emit the report line once per second and zero the window histogram.
    pub fn check_periodic_flush(&mut self) {
        if self.last_flush.elapsed() < self.flush_interval {
            return;
        }
        let interval = self.last_flush.elapsed().as_secs_f64();
        self.last_flush = Instant::now();

        let received = self.counters.received();
        let processed = self.counters.processed();
        let dropped = self.counters.dropped();
        let bytes = self.counters.bytes_received();

        let msg_rate = (received - self.last_received) as f64 / interval;
        let bandwidth = (bytes - self.last_bytes) as f64 / interval / 1024.0 / 1024.0;
        self.last_received = received;
        self.last_bytes = bytes;

        println!(
            "T+{:7.1}s | recv {:>10} | proc {:>10} | drop {:>6} | gaps {:>5} | {:>9.0} msg/s | {:>7.2} MB/s | p50/p95/p99 {}/{}/{} us",
            self.timer.elapsed_seconds(),
            received,
            processed,
            dropped,
            self.gap.total_gaps(),
            msg_rate,
            bandwidth,
            self.window.percentile(0.50),
            self.window.percentile(0.95),
            self.window.percentile(0.99),
        );
        self.window.reset();
    }

    /// Final report: lifetime totals, rates, and full-run percentiles.
    pub fn print_final(&self) {
        let elapsed = self.timer.elapsed_seconds();
        let received = self.counters.received();
        let processed = self.counters.processed();
        let dropped = self.counters.dropped();
        let bytes = self.counters.bytes_received();

        println!("\n=== Final Statistics ===");
        println!("Duration: {elapsed:.2} seconds");
        println!("Messages received: {received}");
        println!("Messages processed: {processed}");
        println!("Messages dropped: {dropped}");
        println!("Sequence gaps: {}", self.gap.total_gaps());
        println!(
            "Bytes received: {bytes} ({:.2} MB)",
            bytes as f64 / 1024.0 / 1024.0
        );
        if elapsed > 0.0 {
            println!("Average rate: {:.0} msg/s", received as f64 / elapsed);
            println!(
                "Average bandwidth: {:.2} MB/s",
                bytes as f64 / elapsed / 1024.0 / 1024.0
            );
        }
        if self.lifetime.total() > 0 {
            println!("\nLatency percentiles (microseconds):");
            for (label, p) in [
                ("50th", 0.50),
                ("90th", 0.90),
                ("95th", 0.95),
                ("99th", 0.99),
                ("99.9th", 0.999),
            ] {
                println!("  {label}: {}us", self.lifetime.percentile(p));
            }
        }
    }
}

impl Default for IngestionStats {
    fn default() -> Self {
        Self::new()
    }
}
