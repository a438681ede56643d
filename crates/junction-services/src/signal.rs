//! Signal channel: the service's UDP responder.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use junction_core::wire::{DirectiveKind, MAX_DATAGRAM};
use junction_core::{HostInfo, Mode, SessionToken, Signal};

use crate::handoff;
use crate::service::Shared;

pub(crate) struct SignalChannel {
    socket: Arc<UdpSocket>,
    shared: Arc<Shared>,
    /// TCP port advertised in CONNECT_HOST directives.
    listen_port: u16,
    shutdown: broadcast::Receiver<()>,
}

impl SignalChannel {
    pub(crate) fn new(
        socket: Arc<UdpSocket>,
        shared: Arc<Shared>,
        listen_port: u16,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            socket,
            shared,
            listen_port,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::debug!("signal channel shutting down");
                    return;
                }
                received = self.socket.recv_from(&mut buf) => {
                    // Receive errors (ICMP unreachable from an earlier send,
                    // transient buffer exhaustion) leave the socket usable.
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
                tracing::debug!(%token, %from, "SYN");
                send_signal(&self.socket, &Signal::Ack(token), from).await;
            }
            Signal::Ack(token) => self.on_ack(token, from).await,
            Signal::Heartbeat(blob) => self.on_heartbeat(&blob, from),
            Signal::Directive {
                kind,
                listen_port,
                token,
            } => self.on_directive(kind, listen_port, token, from),
        }
    }

    async fn on_ack(&self, token: SessionToken, from: SocketAddr) {
        // `advance` only answers once per session, so duplicate ACKs
        // never produce a second directive.
        let Some(host) = self.shared.registry.advance(&token) else {
            tracing::trace!(%token, %from, "ACK for unknown or already acked session");
            return;
        };
        let Some(kind) = host.mode.directive() else {
            return;
        };

        tracing::debug!(%token, host = %host.addr, ?kind, "ACK, sending directive");
        let directive = Signal::Directive {
            kind,
            listen_port: self.listen_port,
            token,
        };
        send_signal(&self.socket, &directive, host.addr).await;
    }

    fn on_heartbeat(&self, blob: &[u8], from: SocketAddr) {
        let info = match self.shared.cipher.decrypt(blob) {
            Ok(info) => info,
            Err(e) => {
                tracing::trace!(%from, error = %e, "dropping heartbeat");
                return;
            }
        };
        let host = HostInfo::new(from, Mode::ReflectConnect).with_info(Bytes::from(info));
        self.shared.receive_host(host);
    }

    fn on_directive(&self, kind: DirectiveKind, listen_port: u16, token: SessionToken, from: SocketAddr) {
        if listen_port == 0 {
            tracing::trace!(%token, %from, "directive without a port");
            return;
        }
        if self.shared.registry.lookup(&token).is_none() {
            tracing::trace!(%token, %from, "directive for unknown session");
            return;
        }

        let addr = SocketAddr::new(from.ip(), listen_port);
        tracing::debug!(%token, peer = %addr, ?kind, "host is listening, connecting");
        handoff::spawn_connect(addr, token, self.shared.clone());
    }
}

/// Send one control datagram. Failures are logged, never fatal.
pub(crate) async fn send_signal(socket: &UdpSocket, signal: &Signal, to: SocketAddr) {
    if let Err(e) = socket.send_to(&signal.encode(), to).await {
        tracing::warn!(opcode = ?signal.opcode(), peer = %to, error = %e, "signal send failed");
    }
}
