//! Reflector: the agent an endpoint behind NAT runs so a rendezvous service
//! can set up TCP sessions with it.
//!
//! The reflector keeps its NAT mapping warm with encrypted heartbeats,
//! answers SYNs, and follows directives:
//!
//!   - CONNECT_HOST: dial the service's advertised port and present the token
//!   - LISTEN_HOST:  open a listener, report its port back with CONNECT_HOST,
//!     then present the token on the connection the service makes
//!
//! Either way the service answers the token frame with the session name and
//! the framed stream is delivered as a [`ReflectedSession`].

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, MissedTickBehavior};

use junction_core::config::JunctionConfig;
use junction_core::crypto::PayloadCipher;
use junction_core::frame::{self, FramedStream};
use junction_core::wire::{HEARTBEAT_INTERVAL_SECS, MAX_DATAGRAM, SESSION_TIMEOUT_MS};
use junction_core::{DirectiveKind, SessionToken, Signal};

use crate::signal::send_signal;

#[derive(Debug, Clone)]
pub struct ReflectorOptions {
    /// Rendezvous services to send heartbeats to.
    pub services: Vec<SocketAddr>,
    /// Info blob announced in every heartbeat.
    pub info: Bytes,
    pub heartbeat_interval: Duration,
    /// Bound on each TCP step of a directive: connect, accept, name reply.
    pub handshake_timeout: Duration,
}

impl Default for ReflectorOptions {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            info: Bytes::new(),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            handshake_timeout: Duration::from_millis(SESSION_TIMEOUT_MS),
        }
    }
}

impl ReflectorOptions {
    /// Options from config, with `services` already resolved by the caller.
    pub fn from_config(config: &JunctionConfig, services: Vec<SocketAddr>) -> Self {
        Self {
            services,
            info: Bytes::from(config.heartbeat.info.clone()),
            heartbeat_interval: config.heartbeat.interval(),
            handshake_timeout: config.session.timeout(),
        }
    }
}

/// A session brokered by a rendezvous service, seen from the endpoint side.
#[derive(Debug)]
pub struct ReflectedSession {
    pub token: SessionToken,
    /// Name the service registered the session under.
    pub name: String,
    /// Signaling address of the service that brokered it.
    pub service: SocketAddr,
    pub stream: FramedStream<TcpStream>,
}

pub struct Reflector {
    socket: Arc<UdpSocket>,
    cipher: Arc<dyn PayloadCipher>,
    options: ReflectorOptions,
    sessions: mpsc::UnboundedSender<ReflectedSession>,
}

impl Reflector {
    pub async fn bind(
        addr: SocketAddr,
        options: ReflectorOptions,
        cipher: Arc<dyn PayloadCipher>,
        sessions: mpsc::UnboundedSender<ReflectedSession>,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
            cipher,
            options,
            sessions,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Run until shutdown. The first heartbeat goes out immediately.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let mut heartbeat = tokio::time::interval(self.options.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; MAX_DATAGRAM];

        tracing::info!(
            addr = %self.socket.local_addr()?,
            services = self.options.services.len(),
            "reflector running"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::debug!("reflector shutting down");
                    return Ok(());
                }
                _ = heartbeat.tick() => self.send_heartbeats().await,
                received = self.socket.recv_from(&mut buf) => {
                    let (len, from) = match received {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };
                    self.handle_datagram(&buf[..len], from).await;
                }
            }
        }
    }

    async fn send_heartbeats(&self) {
        for service in &self.options.services {
            let blob = self.cipher.encrypt(&self.options.info);
            send_signal(&self.socket, &Signal::Heartbeat(Bytes::from(blob)), *service).await;
        }
    }

    async fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) {
        let signal = match Signal::decode(datagram) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::trace!(%from, error = %e, "dropping datagram");
                return;
            }
        };

        match signal {
            Signal::Syn(token) => {
                tracing::debug!(%token, service = %from, "SYN, acknowledging");
                send_signal(&self.socket, &Signal::Ack(token), from).await;
            }
            Signal::Directive {
                kind: DirectiveKind::Connect,
                listen_port,
                token,
            } => {
                if listen_port == 0 {
                    tracing::trace!(%token, service = %from, "CONNECT_HOST without a port");
                    return;
                }
                let target = SocketAddr::new(from.ip(), listen_port);
                self.spawn_session(token, from, connect_back(target, token, self.options.handshake_timeout));
            }
            Signal::Directive {
                kind: DirectiveKind::Listen,
                token,
                ..
            } => {
                let bind_ip = self.socket.local_addr().map(|a| a.ip()).unwrap_or(from.ip());
                let fut = listen_back(
                    self.socket.clone(),
                    bind_ip,
                    from,
                    token,
                    self.options.handshake_timeout,
                );
                self.spawn_session(token, from, fut);
            }
            other => {
                tracing::trace!(opcode = ?other.opcode(), %from, "ignoring signal");
            }
        }
    }

    fn spawn_session<F>(&self, token: SessionToken, service: SocketAddr, handshake: F)
    where
        F: std::future::Future<Output = anyhow::Result<(String, FramedStream<TcpStream>)>>
            + Send
            + 'static,
    {
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            match handshake.await {
                Ok((name, stream)) => {
                    tracing::info!(%token, %name, %service, "reflected session established");
                    let session = ReflectedSession {
                        token,
                        name,
                        service,
                        stream,
                    };
                    if sessions.send(session).is_err() {
                        tracing::debug!(%token, "session receiver gone, closing session");
                    }
                }
                Err(e) => {
                    tracing::warn!(%token, %service, error = %format!("{e:#}"), "reflected session failed");
                }
            }
        });
    }
}

async fn connect_back(
    target: SocketAddr,
    token: SessionToken,
    deadline: Duration,
) -> anyhow::Result<(String, FramedStream<TcpStream>)> {
    let stream = timeout(deadline, TcpStream::connect(target))
        .await
        .context("connect timed out")?
        .with_context(|| format!("failed to connect to {target}"))?;
    present_token(stream, token, deadline).await
}

async fn listen_back(
    socket: Arc<UdpSocket>,
    bind_ip: IpAddr,
    service: SocketAddr,
    token: SessionToken,
    deadline: Duration,
) -> anyhow::Result<(String, FramedStream<TcpStream>)> {
    let listener = TcpListener::bind(SocketAddr::new(bind_ip, 0))
        .await
        .context("failed to bind reflect listener")?;
    let listen_port = listener.local_addr()?.port();

    tracing::debug!(%token, %service, listen_port, "LISTEN_HOST, asking service to connect");
    let reply = Signal::Directive {
        kind: DirectiveKind::Connect,
        listen_port,
        token,
    };
    send_signal(&socket, &reply, service).await;

    // Strangers that find the port are dropped; the deadline covers the
    // whole wait for the service.
    let stream = timeout(deadline, async {
        loop {
            let (stream, peer) = listener.accept().await.context("accept failed")?;
            if peer.ip() == service.ip() {
                return anyhow::Ok(stream);
            }
            tracing::debug!(%token, %peer, "dropping foreign connection on reflect listener");
        }
    })
    .await
    .context("service never connected")??;
    present_token(stream, token, deadline).await
}

/// Send the token as the first frame and wait for the session name.
async fn present_token(
    stream: TcpStream,
    token: SessionToken,
    deadline: Duration,
) -> anyhow::Result<(String, FramedStream<TcpStream>)> {
    let mut stream = frame::framed(stream);
    frame::write_frame(&mut stream, token.as_bytes().to_vec())
        .await
        .context("failed to send token")?;
    let name = timeout(deadline, frame::read_frame(&mut stream))
        .await
        .context("no session name from service")?
        .context("failed to read session name")?;
    let name = String::from_utf8(name.to_vec()).context("session name is not UTF-8")?;
    Ok((name, stream))
}
