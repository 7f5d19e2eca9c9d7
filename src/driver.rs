/// Network driver abstraction
///
/// Reception sources are modeled as a capability set over an object-safe
/// trait: lifecycle control, a packet-handler reception loop, zero-copy
/// buffer release, and monotonic counters. A factory returns an owning
/// handle erased to the trait so the ingestion core never depends on a
/// concrete backend.

use crate::timing::monotonic_ns;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("invalid driver configuration: {0}")]
    Config(String),

    #[error("driver is not initialized")]
    NotInitialized,

    #[error("connect to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// Opaque handle to a driver-owned receive buffer. Never dereferenced by
/// core code; destroyed by passing it back to the driver's `release`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingToken(usize);

impl PendingToken {
    pub fn from_raw(raw: usize) -> Self {
        PendingToken(raw)
    }

    pub fn into_raw(self) -> usize {
        self.0
    }
}

/// Borrowed view of a received chunk, valid only for the duration of the
/// handler invocation. A holder that needs the bytes longer must copy
/// them; a holder that needs the buffer must record the token and release
/// it later.
#[derive(Debug)]
pub struct PacketDesc<'a> {
    pub data: &'a [u8],
    /// Hardware timestamp when the backend provides one, software time
    /// otherwise. Never zero; a backend without a clock source passes 0 to
    /// [`PacketDesc::new`] and software time is substituted there.
    pub timestamp_ns: u64,
    /// Present only when the chunk is a zero-copy loan from the driver
    pub token: Option<PendingToken>,
}

impl<'a> PacketDesc<'a> {
    pub fn new(data: &'a [u8], timestamp_ns: u64, token: Option<PendingToken>) -> Self {
        let timestamp_ns = if timestamp_ns == 0 { monotonic_ns() } else { timestamp_ns };
        PacketDesc { data, timestamp_ns, token }
    }
}

/// Per-chunk callback invoked on the driver's reception thread. The
/// handler must not block indefinitely.
pub type PacketHandler = Box<dyn for<'a> FnMut(PacketDesc<'a>) + Send>;

/// Cloneable handle that returns zero-copy tokens to their driver without
/// borrowing the driver itself, so the packet handler and the consumer
/// thread's cleanup step can both hold one.
#[derive(Clone)]
pub struct Releaser {
    release: Arc<dyn Fn(PendingToken) + Send + Sync>,
}

impl Releaser {
    pub fn new<F>(release: F) -> Self
    where
        F: Fn(PendingToken) + Send + Sync + 'static,
    {
        Releaser { release: Arc::new(release) }
    }

    /// For backends that copy into caller memory and issue no tokens.
    pub fn noop() -> Self {
        Releaser::new(|_| {})
    }

    pub fn release(&self, token: PendingToken) {
        (self.release)(token)
    }
}

impl std::fmt::Debug for Releaser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Releaser")
    }
}

/// Configuration shared by all driver backends.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub host: String,
    pub port: u16,
    /// Sleep between empty polls, microseconds
    pub poll_timeout_us: u32,
    /// CPU core to pin the reception thread to (0 = unpinned)
    pub cpu_core: u32,
    pub enable_zero_copy: bool,
    /// Minimum chunk size for the zero-copy path
    pub zero_copy_threshold: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            host: "127.0.0.1".to_string(),
            port: 9001,
            poll_timeout_us: 100,
            cpu_core: 0,
            enable_zero_copy: true,
            zero_copy_threshold: 64,
        }
    }
}

impl DriverConfig {
    pub fn validate(&self) -> Result<(), DriverError> {
        if self.host.is_empty() {
            return Err(DriverError::Config("host cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(DriverError::Config("port cannot be zero".to_string()));
        }
        if self.poll_timeout_us > 1_000_000 {
            return Err(DriverError::Config(format!(
                "poll_timeout_us {} too large (max 1s)",
                self.poll_timeout_us
            )));
        }
        if self.zero_copy_threshold > 65536 {
            return Err(DriverError::Config(format!(
                "zero_copy_threshold {} too large (max 64KiB)",
                self.zero_copy_threshold
            )));
        }
        if self.cpu_core > 256 {
            return Err(DriverError::Config(format!(
                "cpu_core {} too large",
                self.cpu_core
            )));
        }
        Ok(())
    }
}

/// Reception source capability.
///
/// Lifecycle: `initialize` reserves resources, `connect` establishes the
/// endpoint, `start_reception` spawns a reception context that invokes the
/// handler for every received chunk until `stop_reception`. `start` and
/// `stop` are idempotent; calling either twice is a no-op.
pub trait Driver: Send {
    fn initialize(&mut self, config: &DriverConfig) -> Result<(), DriverError>;

    fn connect(&mut self) -> Result<(), DriverError>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn start_reception(&mut self, handler: PacketHandler);

    fn stop_reception(&mut self);

    /// Return a zero-copy buffer to the driver.
    fn release(&self, token: PendingToken);

    /// Cloneable release handle usable from the handler and the consumer.
    fn releaser(&self) -> Releaser;

    fn packets_received(&self) -> u64;

    fn bytes_received(&self) -> u64;

    fn packets_dropped(&self) -> u64;

    /// Fraction of polls that returned data; 0.0 when idle or unknown.
    fn cpu_utilization(&self) -> f64;

    fn backend_info(&self) -> String;
}

/// Available reception backends. Kernel-bypass backends (DPDK, Solarflare)
/// plug in behind the same trait but are not part of this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverBackend {
    /// Portable blocking-socket reference implementation
    Socket,
}

impl std::str::FromStr for DriverBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "socket" | "tcp" => Ok(DriverBackend::Socket),
            other => Err(format!("unknown driver backend: {other}")),
        }
    }
}

/// Factory: an owning handle erased to the capability set.
pub fn create_driver(backend: DriverBackend) -> Box<dyn Driver> {
    match backend {
        DriverBackend::Socket => Box::new(crate::socket::SocketDriver::new()),
    }
}
