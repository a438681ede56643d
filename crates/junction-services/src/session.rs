//! Established sessions and the consumer that takes them over.

use std::io;
use std::net::SocketAddr;

use bytes::Bytes;
use junction_core::frame::FramedStream;
use junction_core::{HostInfo, SessionToken};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// A fully negotiated connection together with the metadata its
/// `start_session` call registered.
///
/// The stream stays wrapped in the frame codec so nothing the peer sent
/// after its token frame is lost.
#[derive(Debug)]
pub struct Session<S = TcpStream> {
    pub token: SessionToken,
    pub host: HostInfo,
    pub name: String,
    pub data: Bytes,
    pub stream: FramedStream<S>,
}

impl Session<TcpStream> {
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.get_ref().peer_addr()
    }
}

/// Receives every session the service establishes and owns it from then on.
pub trait SessionHandler: Send + Sync + 'static {
    fn handle_session(&self, session: Session);
}

impl SessionHandler for mpsc::UnboundedSender<Session> {
    fn handle_session(&self, session: Session) {
        if let Err(e) = self.send(session) {
            tracing::debug!(name = %e.0.name, "session receiver gone, closing session");
        }
    }
}
