/// Reference socket driver
///
/// Portable reception backend over kernel TCP. Reads happen on a dedicated
/// reception thread with a non-blocking socket and a short poll sleep, so
/// the stop flag is observed within one poll interval. On connection loss
/// the thread reconnects at a one-second backoff until stopped.

use crate::driver::{
    Driver, DriverConfig, DriverError, PacketDesc, PacketHandler, PendingToken, Releaser,
};
use crate::timing::monotonic_ns;
use std::io::{ErrorKind, Read};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Fixed receive buffer, allocated once per reception thread.
const RECV_BUFFER_SIZE: usize = 64 * 1024;

const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverState {
    Uninit,
    Ready,
    Connected,
    Receiving,
}

#[derive(Debug, Default)]
struct Shared {
    running: AtomicBool,
    connected: AtomicBool,
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    packets_dropped: AtomicU64,
    busy_polls: AtomicU64,
    total_polls: AtomicU64,
}

pub struct SocketDriver {
    config: DriverConfig,
    state: DriverState,
    shared: Arc<Shared>,
    stream: Option<TcpStream>,
    rx_thread: Option<JoinHandle<()>>,
}

impl SocketDriver {
    pub fn new() -> Self {
        SocketDriver {
            config: DriverConfig::default(),
            state: DriverState::Uninit,
            shared: Arc::new(Shared::default()),
            stream: None,
            rx_thread: None,
        }
    }

    fn open_stream(config: &DriverConfig) -> std::io::Result<TcpStream> {
        let stream = TcpStream::connect((config.host.as_str(), config.port))?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        Ok(stream)
    }

    fn pin_to_core(core: u32) {
        if let Some(core_ids) = core_affinity::get_core_ids() {
            match core_ids.into_iter().find(|c| c.id == core as usize) {
                Some(id) => {
                    if !core_affinity::set_for_current(id) {
                        warn!("failed to pin reception thread to core {core}");
                    }
                }
                None => warn!("cpu core {core} not available for pinning"),
            }
        }
    }

    fn reception_loop(
        mut stream: Option<TcpStream>,
        shared: Arc<Shared>,
        config: DriverConfig,
        mut handler: PacketHandler,
    ) {
        if config.cpu_core > 0 {
            Self::pin_to_core(config.cpu_core);
        }

        let mut buf = vec![0u8; RECV_BUFFER_SIZE].into_boxed_slice();
        let poll_sleep = Duration::from_micros(config.poll_timeout_us as u64);
        let mut last_attempt = Instant::now();

        while shared.running.load(Ordering::Acquire) {
            let Some(sock) = stream.as_mut() else {
                if last_attempt.elapsed() >= RECONNECT_INTERVAL {
                    last_attempt = Instant::now();
                    match Self::open_stream(&config) {
                        Ok(s) => {
                            info!("reconnected to {}:{}", config.host, config.port);
                            shared.connected.store(true, Ordering::Release);
                            stream = Some(s);
                        }
                        Err(e) => debug!("reconnect attempt failed: {e}"),
                    }
                } else {
                    std::thread::sleep(Duration::from_millis(10));
                }
                continue;
            };

            shared.total_polls.fetch_add(1, Ordering::Relaxed);
            match sock.read(&mut buf[..]) {
                Ok(0) => {
                    info!("server closed connection, will reconnect");
                    shared.connected.store(false, Ordering::Release);
                    stream = None;
                }
                Ok(n) => {
                    shared.busy_polls.fetch_add(1, Ordering::Relaxed);
                    shared.packets_received.fetch_add(1, Ordering::Relaxed);
                    shared.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                    handler(PacketDesc::new(&buf[..n], monotonic_ns(), None));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(poll_sleep);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("read error: {e}");
                    shared.connected.store(false, Ordering::Release);
                    stream = None;
                }
            }
        }
        debug!("reception loop stopped");
    }
}

impl Default for SocketDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for SocketDriver {
    fn initialize(&mut self, config: &DriverConfig) -> Result<(), DriverError> {
        config.validate()?;
        self.config = config.clone();
        if self.state == DriverState::Uninit {
            self.state = DriverState::Ready;
        }
        Ok(())
    }

    fn connect(&mut self) -> Result<(), DriverError> {
        match self.state {
            DriverState::Uninit => return Err(DriverError::NotInitialized),
            DriverState::Connected | DriverState::Receiving => return Ok(()),
            DriverState::Ready => {}
        }
        let stream = Self::open_stream(&self.config).map_err(|source| DriverError::Connect {
            host: self.config.host.clone(),
            port: self.config.port,
            source,
        })?;
        info!("connected to {}:{}", self.config.host, self.config.port);
        self.stream = Some(stream);
        self.shared.connected.store(true, Ordering::Release);
        self.state = DriverState::Connected;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.stop_reception();
        self.stream = None;
        self.shared.connected.store(false, Ordering::Release);
        if self.state != DriverState::Uninit {
            self.state = DriverState::Ready;
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    fn start_reception(&mut self, handler: PacketHandler) {
        if self.state != DriverState::Connected || self.rx_thread.is_some() {
            return;
        }
        self.shared.running.store(true, Ordering::Release);

        let stream = self.stream.take();
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let handle = std::thread::Builder::new()
            .name("feed-rx".to_string())
            .spawn(move || Self::reception_loop(stream, shared, config, handler))
            .expect("spawn reception thread");
        self.rx_thread = Some(handle);
        self.state = DriverState::Receiving;
    }

    fn stop_reception(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.rx_thread.take() {
            let _ = handle.join();
        }
        // The reception thread owned the stream; a fresh connect is needed
        // before receiving again.
        if self.state == DriverState::Receiving {
            self.shared.connected.store(false, Ordering::Release);
            self.state = DriverState::Ready;
        }
    }

    fn release(&self, _token: PendingToken) {
        // Chunks are copied out of the receive buffer; no tokens issued.
    }

    fn releaser(&self) -> Releaser {
        Releaser::noop()
    }

    fn packets_received(&self) -> u64 {
        self.shared.packets_received.load(Ordering::Relaxed)
    }

    fn bytes_received(&self) -> u64 {
        self.shared.bytes_received.load(Ordering::Relaxed)
    }

    fn packets_dropped(&self) -> u64 {
        self.shared.packets_dropped.load(Ordering::Relaxed)
    }

    fn cpu_utilization(&self) -> f64 {
        let total = self.shared.total_polls.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.shared.busy_polls.load(Ordering::Relaxed) as f64 / total as f64
    }

    fn backend_info(&self) -> String {
        format!("socket (kernel networking) {}:{}", self.config.host, self.config.port)
    }
}

impl Drop for SocketDriver {
    fn drop(&mut self) {
        self.disconnect();
        self.state = DriverState::Uninit;
    }
}
