use crate::*;

use bytes::Bytes;
use junction_core::frame::{self, FrameError};
use junction_core::{DirectiveKind, HostInfo, Mode};
use junction_services::StartError;
use tokio::net::TcpStream;

// ══════════════════════════════════════════════════════════════════════════════
//  Expiry, bad input and cancellation
// ══════════════════════════════════════════════════════════════════════════════

fn fast_options(timeout_ms: u64) -> ServiceOptions {
    ServiceOptions {
        timeout: Duration::from_millis(timeout_ms),
        tick: Duration::from_millis(20),
        ..options()
    }
}

/// A host that never answers: SYN is retransmitted, then the session fails
/// exactly once and leaves the registry.
#[tokio::test]
async fn silent_host_times_out() -> Result<()> {
    let mut h = start_service(fast_options(150)).await?;
    let host_socket = fake_host().await?;
    let host = HostInfo::new(host_socket.local_addr()?, Mode::ReflectConnect);

    let token = h
        .service
        .start_session(host.clone(), "beta", Bytes::new())
        .await
        .context("session not started")?;

    assert_eq!(expect_syn(&host_socket).await?, token);
    assert_eq!(expect_syn(&host_socket).await?, token);

    assert_eq!(
        next_event(&mut h.events).await?,
        RendezvousEvent::SessionFailed {
            name: "beta".into(),
            host,
        }
    );
    assert_eq!(h.service.pending_sessions(), 0);
    assert_no_event(&mut h.events).await;

    h.service.stop().await;
    Ok(())
}

/// A host that ACKs but never connects still times out.
#[tokio::test]
async fn acked_session_without_connection_times_out() -> Result<()> {
    let mut h = start_service(fast_options(200)).await?;
    let host_socket = fake_host().await?;
    let host = HostInfo::new(host_socket.local_addr()?, Mode::ReflectConnect);

    let token = h
        .service
        .start_session(host, "zeta", Bytes::new())
        .await
        .context("session not started")?;
    expect_syn(&host_socket).await?;
    send(&host_socket, &Signal::Ack(token), h.addr).await?;

    let event = next_event(&mut h.events).await?;
    assert!(matches!(event, RendezvousEvent::SessionFailed { ref name, .. } if name == "zeta"));
    assert_eq!(h.service.pending_sessions(), 0);

    h.service.stop().await;
    Ok(())
}

/// Connecting with a token nobody registered: socket closed, nothing reported.
#[tokio::test]
async fn unknown_token_connection_is_closed_silently() -> Result<()> {
    let mut h = start_service(options()).await?;
    let host_socket = fake_host().await?;
    let host = HostInfo::new(host_socket.local_addr()?, Mode::ReflectConnect);
    h.service
        .start_session(host, "pending", Bytes::new())
        .await
        .context("session not started")?;

    let stream = TcpStream::connect(h.addr).await?;
    let mut stream = frame::framed(stream);
    frame::write_frame(&mut stream, SessionToken::generate().as_bytes().to_vec()).await?;

    let reply = tokio::time::timeout(WAIT, frame::read_frame(&mut stream)).await?;
    assert!(matches!(reply, Err(FrameError::Closed) | Err(FrameError::Io(_))));

    assert_no_event(&mut h.events).await;
    assert_eq!(h.service.pending_sessions(), 1);

    h.service.stop().await;
    Ok(())
}

/// Garbage instead of a token frame is disposed the same way.
#[tokio::test]
async fn non_token_first_frame_is_closed() -> Result<()> {
    let mut h = start_service(options()).await?;

    let stream = TcpStream::connect(h.addr).await?;
    let mut stream = frame::framed(stream);
    frame::write_frame(&mut stream, Bytes::from_static(b"GET / HTTP/1.1")).await?;

    let reply = tokio::time::timeout(WAIT, frame::read_frame(&mut stream)).await?;
    assert!(reply.is_err());
    assert_no_event(&mut h.events).await;

    h.service.stop().await;
    Ok(())
}

/// A repeated ACK must not produce a second directive.
#[tokio::test]
async fn duplicate_ack_sends_one_directive() -> Result<()> {
    let h = start_service(options()).await?;
    let host_socket = fake_host().await?;
    let host = HostInfo::new(host_socket.local_addr()?, Mode::ReflectConnect);

    let token = h
        .service
        .start_session(host, "once", Bytes::new())
        .await
        .context("session not started")?;
    expect_syn(&host_socket).await?;

    send(&host_socket, &Signal::Ack(token), h.addr).await?;
    send(&host_socket, &Signal::Ack(token), h.addr).await?;

    let first = recv_non_syn(&host_socket, WAIT).await?;
    assert!(matches!(first, Signal::Directive { kind: DirectiveKind::Connect, .. }));
    assert!(recv_non_syn(&host_socket, QUIET).await.is_err());

    h.service.stop().await;
    Ok(())
}

/// A directive with port 0 or an unknown token is ignored; the session
/// stays pending.
#[tokio::test]
async fn invalid_directives_are_ignored() -> Result<()> {
    let mut h = start_service(options()).await?;
    let host_socket = fake_host().await?;
    let host = HostInfo::new(host_socket.local_addr()?, Mode::ReflectListen);

    let token = h
        .service
        .start_session(host, "waiting", Bytes::new())
        .await
        .context("session not started")?;
    expect_syn(&host_socket).await?;

    let zero_port = Signal::Directive {
        kind: DirectiveKind::Connect,
        listen_port: 0,
        token,
    };
    send(&host_socket, &zero_port, h.addr).await?;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let stranger = Signal::Directive {
        kind: DirectiveKind::Connect,
        listen_port: listener.local_addr()?.port(),
        token: SessionToken::generate(),
    };
    send(&host_socket, &stranger, h.addr).await?;

    assert!(tokio::time::timeout(QUIET, listener.accept()).await.is_err());
    assert_no_event(&mut h.events).await;
    assert_eq!(h.service.pending_sessions(), 1);

    h.service.stop().await;
    Ok(())
}

/// Malformed datagrams never get an answer.
#[tokio::test]
async fn malformed_datagrams_are_dropped() -> Result<()> {
    let h = start_service(options()).await?;
    let host_socket = fake_host().await?;

    host_socket.send_to(&[0xde, 0xad], h.addr).await?;
    let mut bad_signature = Signal::Syn(SessionToken::generate()).encode();
    bad_signature[0] = 0;
    host_socket.send_to(&bad_signature, h.addr).await?;

    assert!(recv_signal(&host_socket, QUIET).await.is_err());

    // The channel is still serving.
    let token = SessionToken::generate();
    send(&host_socket, &Signal::Syn(token), h.addr).await?;
    let (reply, _) = recv_signal(&host_socket, WAIT).await?;
    assert_eq!(reply, Signal::Ack(token));

    h.service.stop().await;
    Ok(())
}

/// Cancelled sessions report nothing and ignore a late ACK.
#[tokio::test]
async fn cancelled_session_is_silent() -> Result<()> {
    let mut h = start_service(fast_options(150)).await?;
    let host_socket = fake_host().await?;
    let host = HostInfo::new(host_socket.local_addr()?, Mode::ReflectConnect);

    let token = h
        .service
        .start_session(host, "cancelled", Bytes::new())
        .await
        .context("session not started")?;
    expect_syn(&host_socket).await?;
    assert!(h.service.cancel_session(&token));

    send(&host_socket, &Signal::Ack(token), h.addr).await?;
    assert!(recv_non_syn(&host_socket, QUIET).await.is_err());
    assert_no_event(&mut h.events).await;
    assert_eq!(h.service.pending_sessions(), 0);

    h.service.stop().await;
    Ok(())
}

#[tokio::test]
async fn second_start_is_rejected() -> Result<()> {
    let h = start_service(options()).await?;
    assert!(matches!(
        h.service.start(0).await,
        Err(StartError::AlreadyStarted)
    ));
    assert_eq!(h.service.local_addr().await, Some(h.addr));

    h.service.stop().await;
    h.service.stop().await;
    assert!(!h.service.is_started().await);
    Ok(())
}
