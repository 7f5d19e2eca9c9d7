/// High-resolution timing utilities
///
/// Monotonic raw timestamps for latency measurement, an elapsed-time timer,
/// and a busy-spin rate limiter for the synthetic feed.

use std::time::{Duration, Instant};

/// Nanoseconds from a monotonic clock, unaffected by NTP slew where the
/// platform supports it.
#[cfg(any(target_os = "linux", target_os = "macos"))]
pub fn monotonic_ns() -> u64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // CLOCK_MONOTONIC_RAW cannot fail with a valid timespec pointer
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut ts);
    }
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn monotonic_ns() -> u64 {
    use std::sync::OnceLock;
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}

/// Simple timer for measuring elapsed time.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Timer { start: Instant::now() }
    }

    pub fn reset(&mut self) {
        self.start = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}

/// Paces batch transmission to a target message rate by busy-spinning to
/// the next tick for maximum precision.
#[derive(Debug)]
pub struct RateLimiter {
    next_tick: Instant,
    interval: Duration,
}

impl RateLimiter {
    pub fn new(rate_per_second: u32, batch_size: u32) -> Self {
        let interval_ns = 1_000_000_000u64 * batch_size as u64 / rate_per_second.max(1) as u64;
        RateLimiter {
            next_tick: Instant::now(),
            interval: Duration::from_nanos(interval_ns),
        }
    }

    /// Block until it is time for the next batch. If we are behind,
    /// advance to the next aligned tick instead of bursting to catch up.
    pub fn wait_for_next_tick(&mut self) {
        let now = Instant::now();
        while self.next_tick <= now {
            self.next_tick += self.interval;
        }
        while Instant::now() < self.next_tick {
            std::hint::spin_loop();
        }
    }
}
