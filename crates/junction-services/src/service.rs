//! Rendezvous service façade.
//!
//! Binds one UDP socket and one TCP listener on the same port, then runs
//! three tasks against the shared registry and pool:
//!
//!   - signal channel: reacts to SYN / ACK / HEARTBEAT / directive datagrams
//!   - acceptor: hands inbound TCP connections to the handoff
//!   - scheduler: expires sessions, resends SYNs, evicts silent hosts
//!
//! Every task selects on one broadcast shutdown channel; `stop` fires it
//! and waits for all three.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use junction_core::config::JunctionConfig;
use junction_core::crypto::PayloadCipher;
use junction_core::wire::{HOST_TTL_SECS, SESSION_TIMEOUT_MS, TICK_MS};
use junction_core::{HostInfo, SessionToken, Signal};

use crate::acceptor;
use crate::events::{RendezvousEvent, EVENT_CAPACITY};
use crate::pool::HostPool;
use crate::registry::SessionRegistry;
use crate::scheduler::Scheduler;
use crate::session::SessionHandler;
use crate::signal::{self, SignalChannel};

// ── Options ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Address both sockets bind to.
    pub bind: IpAddr,
    /// Initial session timeout. Adjustable later with `set_timeout`.
    pub timeout: Duration,
    /// Scheduler period.
    pub tick: Duration,
    /// Hosts silent this long leave the pool.
    pub host_ttl: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            timeout: Duration::from_millis(SESSION_TIMEOUT_MS),
            tick: Duration::from_millis(TICK_MS),
            host_ttl: Duration::from_secs(HOST_TTL_SECS),
        }
    }
}

impl From<&JunctionConfig> for ServiceOptions {
    fn from(config: &JunctionConfig) -> Self {
        Self {
            bind: config.network.bind,
            timeout: config.session.timeout(),
            tick: config.session.tick(),
            host_ttl: config.pool.host_ttl(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("service already started")]
    AlreadyStarted,
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
}

// ── Shared state ──────────────────────────────────────────────────────────────

/// Everything the tasks share. Registry and pool are only touched through
/// their own methods.
pub(crate) struct Shared {
    pub(crate) registry: SessionRegistry,
    pub(crate) pool: HostPool,
    pub(crate) cipher: Arc<dyn PayloadCipher>,
    pub(crate) handler: Arc<dyn SessionHandler>,
    pub(crate) host_ttl: Duration,
    events: broadcast::Sender<RendezvousEvent>,
    timeout_ms: AtomicU64,
}

impl Shared {
    pub(crate) fn new(
        options: &ServiceOptions,
        cipher: Arc<dyn PayloadCipher>,
        handler: Arc<dyn SessionHandler>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry: SessionRegistry::new(),
            pool: HostPool::new(),
            cipher,
            handler,
            host_ttl: options.host_ttl,
            events,
            timeout_ms: AtomicU64::new(duration_ms(options.timeout)),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<RendezvousEvent> {
        self.events.subscribe()
    }

    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    pub(crate) fn emit(&self, event: RendezvousEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Record a host learned from a heartbeat and announce membership changes.
    pub(crate) fn receive_host(&self, host: HostInfo) {
        if self.pool.put(host.clone()) {
            let size = self.pool.len();
            tracing::info!(host = %host.addr, pool = size, "new host in pool");
            self.emit(RendezvousEvent::HostPoolChanged { size });
            self.emit(RendezvousEvent::HostArrived(host));
        } else {
            tracing::trace!(host = %host.addr, "host refreshed");
        }
    }
}

// ── Service ───────────────────────────────────────────────────────────────────

struct Running {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct RendezvousService {
    shared: Arc<Shared>,
    bind: IpAddr,
    tick: Duration,
    running: Mutex<Option<Running>>,
}

impl RendezvousService {
    pub fn new(
        options: ServiceOptions,
        cipher: Arc<dyn PayloadCipher>,
        handler: Arc<dyn SessionHandler>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::new(&options, cipher, handler)),
            bind: options.bind,
            tick: options.tick,
            running: Mutex::new(None),
        }
    }

    /// Bind UDP and TCP on `port` and start the tasks.
    ///
    /// Port 0 lets the OS pick the UDP port; TCP then binds the same number.
    /// On any bind failure both sockets are released.
    pub async fn start(&self, port: u16) -> Result<SocketAddr, StartError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(StartError::AlreadyStarted);
        }

        let (socket, listener) = bind_pair(self.bind, port)
            .await
            .map_err(|source| StartError::Bind { port, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| StartError::Bind { port, source })?;
        let socket = Arc::new(socket);

        let (shutdown, _) = broadcast::channel::<()>(1);

        let channel = SignalChannel::new(
            socket.clone(),
            self.shared.clone(),
            local_addr.port(),
            shutdown.subscribe(),
        );
        let scheduler = Scheduler::new(
            socket.clone(),
            self.shared.clone(),
            self.tick,
            shutdown.subscribe(),
        );

        let tasks = vec![
            tokio::spawn(channel.run()),
            tokio::spawn(acceptor::accept_loop(
                listener,
                self.shared.clone(),
                shutdown.subscribe(),
            )),
            tokio::spawn(scheduler.run()),
        ];

        tracing::info!(
            addr = %local_addr,
            timeout_ms = self.shared.timeout_ms.load(Ordering::Relaxed),
            "rendezvous service started"
        );

        *running = Some(Running {
            socket,
            local_addr,
            shutdown,
            tasks,
        });
        Ok(local_addr)
    }

    /// Stop the tasks, release both sockets and drop every pending session
    /// without reporting it as failed. Does nothing if not started.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        let _ = running.shutdown.send(());
        for task in running.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "service task ended abnormally");
            }
        }

        let dropped = self.shared.registry.clear();
        tracing::info!(addr = %running.local_addr, dropped, "rendezvous service stopped");
    }

    pub async fn is_started(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Local address of the UDP socket (the TCP listener shares the port).
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Begin a rendezvous with `host`. Registers the session and sends the
    /// first SYN; the scheduler resends it until the host ACKs or the
    /// session times out.
    ///
    /// Returns `None` without doing anything when the service is not
    /// started or the host's mode cannot be reflected.
    pub async fn start_session(
        &self,
        host: HostInfo,
        name: impl Into<String>,
        data: Bytes,
    ) -> Option<SessionToken> {
        if !host.mode.is_reflective() {
            tracing::warn!(host = %host.addr, mode = ?host.mode, "host mode cannot be reflected, ignoring");
            return None;
        }

        // Held until the SYN is out so a concurrent `stop` cannot clear the
        // registry between the started check and `create`.
        let running = self.running.lock().await;
        let Some(running) = running.as_ref() else {
            tracing::warn!(host = %host.addr, "service not started, ignoring session request");
            return None;
        };

        let name = name.into();
        let addr = host.addr;
        let token = self.shared.registry.create(host, name.clone(), data);
        tracing::debug!(%token, %name, host = %addr, "session requested");

        signal::send_signal(&running.socket, &Signal::Syn(token), addr).await;
        Some(token)
    }

    /// Abandon a pending session. No failure is reported, and a late ACK or
    /// connection for the token is ignored. Returns false if the token was
    /// not pending.
    pub fn cancel_session(&self, token: &SessionToken) -> bool {
        let cancelled = self.shared.registry.cancel(token);
        if cancelled {
            tracing::debug!(%token, "session cancelled");
        }
        cancelled
    }

    pub fn timeout(&self) -> Duration {
        self.shared.timeout()
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.shared
            .timeout_ms
            .store(duration_ms(timeout), Ordering::Relaxed);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RendezvousEvent> {
        self.shared.subscribe()
    }

    pub fn hosts(&self) -> Vec<HostInfo> {
        self.shared.pool.snapshot()
    }

    pub fn pending_sessions(&self) -> usize {
        self.shared.registry.len()
    }
}

impl Drop for RendezvousService {
    fn drop(&mut self) {
        // Tasks exit on their own once signalled.
        if let Ok(mut running) = self.running.try_lock() {
            if let Some(running) = running.take() {
                let _ = running.shutdown.send(());
            }
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

async fn bind_pair(ip: IpAddr, port: u16) -> io::Result<(UdpSocket, TcpListener)> {
    let socket = UdpSocket::bind(SocketAddr::new(ip, port)).await?;
    let port = socket.local_addr()?.port();
    // Dropping `socket` on error releases the UDP half.
    let listener = tcp_listener(SocketAddr::new(ip, port))?;
    Ok((socket, listener))
}

fn tcp_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into())
}
