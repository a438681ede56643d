//! Length-prefixed framing for established TCP streams.
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes.
//! The handoff reads exactly one frame (the token) and writes exactly one
//! frame (the session name); after that the framed stream belongs to the
//! session consumer, including anything the peer already sent.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Largest frame accepted on a stream. Handshake frames are tiny;
/// anything bigger is a protocol violation.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

pub type FramedStream<S> = Framed<S, LengthDelimitedCodec>;

/// Wrap a raw stream in the junction frame codec.
pub fn framed<S: AsyncRead + AsyncWrite>(io: S) -> FramedStream<S> {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_framed(io)
}

/// Read one discrete message.
pub async fn read_frame<S>(stream: &mut FramedStream<S>) -> Result<Bytes, FrameError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match stream.next().await {
        Some(Ok(frame)) => Ok(frame.freeze()),
        Some(Err(e)) => Err(FrameError::Io(e)),
        None => Err(FrameError::Closed),
    }
}

/// Write one discrete message and flush it.
pub async fn write_frame<S>(
    stream: &mut FramedStream<S>,
    frame: impl Into<Bytes>,
) -> Result<(), FrameError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.send(frame.into()).await.map_err(FrameError::Io)
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("stream closed before a frame arrived")]
    Closed,
    #[error("frame i/o failed: {0}")]
    Io(#[from] std::io::Error),
}
