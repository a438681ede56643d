//! TCP handoff: matching a fresh connection to a pending session.
//!
//! Every connection that reaches the service (accepted on the listener, or
//! dialled out after a LISTEN_HOST exchange) goes through one
//! `PendingConnection`. The first frame must be a session token; a match
//! consumes the registry entry, answers with the session name and yields a
//! `Session`. Anything else drops the stream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use junction_core::frame::{self, FrameError, FramedStream};
use junction_core::{SessionToken, TOKEN_LEN};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::events::RendezvousEvent;
use crate::registry::{SessionEntry, SessionRegistry};
use crate::service::Shared;
use crate::session::Session;

/// Lifecycle of one connection.
///
/// A live `PendingConnection` is always `AwaitingFirstFrame`;
/// `complete(self)` consumes it and the returned outcome is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffState {
    /// Connected, waiting for the token frame.
    AwaitingFirstFrame,
    /// Token matched and the stream went to the session consumer.
    Matched,
    /// Stream dropped.
    Disposed,
}

/// Why a connection was dropped instead of becoming a session.
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("no token frame within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("first frame is {0} bytes, expected a {len}-byte token", len = TOKEN_LEN)]
    NotAToken(usize),
    #[error("expected token {expected}, peer sent {got}")]
    UnexpectedToken {
        expected: SessionToken,
        got: SessionToken,
    },
    #[error("token {0} is not pending")]
    UnknownToken(SessionToken),
}

#[derive(Debug)]
pub enum HandoffOutcome<S = TcpStream> {
    Matched(Session<S>),
    /// The entry was consumed but the name frame could not be written.
    /// The session is over and counts as failed.
    ReplyFailed {
        entry: SessionEntry,
        error: FrameError,
    },
    Disposed(HandoffError),
}

impl<S> HandoffOutcome<S> {
    pub fn state(&self) -> HandoffState {
        match self {
            HandoffOutcome::Matched(_) => HandoffState::Matched,
            HandoffOutcome::ReplyFailed { .. } | HandoffOutcome::Disposed(_) => {
                HandoffState::Disposed
            }
        }
    }
}

#[derive(Debug)]
pub struct PendingConnection<S = TcpStream> {
    stream: FramedStream<S>,
    peer: SocketAddr,
    expected: Option<SessionToken>,
}

impl<S> PendingConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// `expected` is set for outbound connections, where the service already
    /// knows which token the peer must present.
    pub fn new(stream: S, peer: SocketAddr, expected: Option<SessionToken>) -> Self {
        Self {
            stream: frame::framed(stream),
            peer,
            expected,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Drive the handoff to a terminal state. Unless the outcome is
    /// `Matched`, the stream is dropped on return.
    pub async fn complete(mut self, registry: &SessionRegistry, deadline: Duration) -> HandoffOutcome<S> {
        let first = match tokio::time::timeout(deadline, frame::read_frame(&mut self.stream)).await {
            Ok(Ok(first)) => first,
            Ok(Err(e)) => return HandoffOutcome::Disposed(e.into()),
            Err(_) => return HandoffOutcome::Disposed(HandoffError::Timeout(deadline)),
        };

        let Some(token) = SessionToken::from_slice(&first) else {
            return HandoffOutcome::Disposed(HandoffError::NotAToken(first.len()));
        };

        if let Some(expected) = self.expected {
            if expected != token {
                return HandoffOutcome::Disposed(HandoffError::UnexpectedToken {
                    expected,
                    got: token,
                });
            }
        }

        let Some(entry) = registry.consume(&token) else {
            return HandoffOutcome::Disposed(HandoffError::UnknownToken(token));
        };

        if let Err(error) = frame::write_frame(&mut self.stream, entry.name.clone().into_bytes()).await
        {
            return HandoffOutcome::ReplyFailed { entry, error };
        }

        HandoffOutcome::Matched(Session {
            token,
            host: entry.host,
            name: entry.name,
            data: entry.data,
            stream: self.stream,
        })
    }
}

/// Run a handoff in its own task and publish its outcome.
pub(crate) fn spawn(pending: PendingConnection, shared: Arc<Shared>) {
    tokio::spawn(async move {
        let peer = pending.peer();
        let deadline = shared.timeout();
        let outcome = pending.complete(&shared.registry, deadline).await;
        if let Some(session) = finish(outcome, peer, &shared) {
            shared.handler.handle_session(session);
        }
    });
}

/// Dial a host that asked to be connected to, then run the handoff expecting
/// `token`. A failed dial leaves the entry to expire.
pub(crate) fn spawn_connect(addr: SocketAddr, token: SessionToken, shared: Arc<Shared>) {
    tokio::spawn(async move {
        let deadline = shared.timeout();
        let stream = match tokio::time::timeout(deadline, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::warn!(%token, peer = %addr, error = %e, "reflect connect failed");
                return;
            }
            Err(_) => {
                tracing::warn!(%token, peer = %addr, "reflect connect timed out");
                return;
            }
        };

        let outcome = PendingConnection::new(stream, addr, Some(token))
            .complete(&shared.registry, deadline)
            .await;
        if let Some(session) = finish(outcome, addr, &shared) {
            shared.handler.handle_session(session);
        }
    });
}

/// Publish the terminal event for an outcome. A matched session is
/// returned for the caller to hand over after `SessionStarted` is out.
fn finish<S>(outcome: HandoffOutcome<S>, peer: SocketAddr, shared: &Shared) -> Option<Session<S>> {
    match outcome {
        HandoffOutcome::Matched(session) => {
            tracing::info!(
                token = %session.token,
                name = %session.name,
                %peer,
                "session established"
            );
            shared.emit(RendezvousEvent::SessionStarted {
                name: session.name.clone(),
                host: session.host.clone(),
            });
            Some(session)
        }
        HandoffOutcome::ReplyFailed { entry, error } => {
            tracing::warn!(token = %entry.token, name = %entry.name, %peer, %error, "session reply failed");
            shared.emit(RendezvousEvent::SessionFailed {
                name: entry.name,
                host: entry.host,
            });
            None
        }
        HandoffOutcome::Disposed(reason) => {
            tracing::debug!(%peer, %reason, "connection disposed");
            None
        }
    }
}
