//! TCP acceptor for the rendezvous listener.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::handoff::{self, PendingConnection};
use crate::service::Shared;

/// Accept inbound TCP connections until shutdown and give each its own
/// handoff task.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("acceptor shutting down");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "connection accepted");
                    handoff::spawn(PendingConnection::new(stream, peer, None), shared.clone());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                }
            }
        }
    }
}
