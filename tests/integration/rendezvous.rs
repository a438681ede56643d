use crate::*;

use bytes::Bytes;
use junction_core::frame;
use junction_core::{DirectiveKind, HostInfo, Mode};
use tokio::net::TcpStream;

// ══════════════════════════════════════════════════════════════════════════════
//  Successful rendezvous
// ══════════════════════════════════════════════════════════════════════════════

/// SYN → ACK → CONNECT_HOST → TCP token frame → name reply, played with raw
/// sockets so every message on the wire is checked.
#[tokio::test]
async fn connect_mode_handshake_on_the_wire() -> Result<()> {
    let mut h = start_service(options()).await?;
    let host_socket = fake_host().await?;
    let host = HostInfo::new(host_socket.local_addr()?, Mode::ReflectConnect);

    let token = h
        .service
        .start_session(host.clone(), "alpha", Bytes::from_static(b"app-data"))
        .await
        .context("session not started")?;
    assert_eq!(h.service.pending_sessions(), 1);

    let (signal, from) = recv_signal(&host_socket, WAIT).await?;
    assert_eq!(signal, Signal::Syn(token));
    assert_eq!(from, h.addr);

    send(&host_socket, &Signal::Ack(token), h.addr).await?;
    let directive = recv_non_syn(&host_socket, WAIT).await?;
    assert_eq!(
        directive,
        Signal::Directive {
            kind: DirectiveKind::Connect,
            listen_port: h.addr.port(),
            token,
        }
    );

    let stream = TcpStream::connect(h.addr).await?;
    let mut stream = frame::framed(stream);
    frame::write_frame(&mut stream, token.as_bytes().to_vec()).await?;
    assert_eq!(frame::read_frame(&mut stream).await?, "alpha");

    assert_eq!(
        next_event(&mut h.events).await?,
        RendezvousEvent::SessionStarted {
            name: "alpha".into(),
            host: host.clone(),
        }
    );

    let mut session = tokio::time::timeout(WAIT, h.sessions.recv())
        .await?
        .context("no session delivered")?;
    assert_eq!(session.token, token);
    assert_eq!(session.data, Bytes::from_static(b"app-data"));
    assert_eq!(h.service.pending_sessions(), 0);

    // The delivered stream is live in both directions.
    frame::write_frame(&mut stream, Bytes::from_static(b"hello")).await?;
    assert_eq!(frame::read_frame(&mut session.stream).await?, "hello");

    h.service.stop().await;
    Ok(())
}

/// Full rendezvous through a reflector that announced itself by heartbeat.
#[tokio::test]
async fn reflector_connects_back_after_heartbeat() -> Result<()> {
    let mut h = start_service(options()).await?;
    let mut reflector = spawn_reflector(vec![h.addr], b"camera-7").await?;

    assert_eq!(
        next_event(&mut h.events).await?,
        RendezvousEvent::HostPoolChanged { size: 1 }
    );
    let RendezvousEvent::HostArrived(host) = next_event(&mut h.events).await? else {
        bail!("expected HostArrived");
    };
    assert_eq!(host.addr, reflector.addr);
    assert_eq!(host.info, Bytes::from_static(b"camera-7"));

    h.service
        .start_session(host.clone(), "gamma", Bytes::new())
        .await
        .context("session not started")?;

    assert_eq!(
        next_event(&mut h.events).await?,
        RendezvousEvent::SessionStarted {
            name: "gamma".into(),
            host,
        }
    );

    let mut service_side = tokio::time::timeout(WAIT, h.sessions.recv())
        .await?
        .context("no session on the service side")?;
    let mut host_side = tokio::time::timeout(WAIT, reflector.sessions.recv())
        .await?
        .context("no session on the host side")?;
    assert_eq!(host_side.name, "gamma");
    assert_eq!(host_side.token, service_side.token);
    assert_eq!(host_side.service, h.addr);

    frame::write_frame(&mut service_side.stream, Bytes::from_static(b"ping")).await?;
    assert_eq!(frame::read_frame(&mut host_side.stream).await?, "ping");

    h.service.stop().await;
    Ok(())
}

/// LISTEN_HOST: the host opens a listener, reports its port, and the service
/// dials it.
#[tokio::test]
async fn listen_mode_service_dials_the_host() -> Result<()> {
    let mut h = start_service(options()).await?;
    let mut reflector = spawn_reflector(Vec::new(), b"").await?;
    let host = HostInfo::new(reflector.addr, Mode::ReflectListen);

    h.service
        .start_session(host.clone(), "delta", Bytes::from_static(b"x"))
        .await
        .context("session not started")?;

    assert_eq!(
        next_event(&mut h.events).await?,
        RendezvousEvent::SessionStarted {
            name: "delta".into(),
            host,
        }
    );

    let mut service_side = tokio::time::timeout(WAIT, h.sessions.recv())
        .await?
        .context("no session on the service side")?;
    let mut host_side = tokio::time::timeout(WAIT, reflector.sessions.recv())
        .await?
        .context("no session on the host side")?;
    assert_eq!(host_side.name, "delta");
    assert_eq!(service_side.data, Bytes::from_static(b"x"));

    frame::write_frame(&mut host_side.stream, Bytes::from_static(b"pong")).await?;
    assert_eq!(frame::read_frame(&mut service_side.stream).await?, "pong");
    assert_eq!(h.service.pending_sessions(), 0);

    h.service.stop().await;
    Ok(())
}

/// LISTEN_HOST on the wire, with the host side played by raw sockets.
#[tokio::test]
async fn listen_mode_directive_on_the_wire() -> Result<()> {
    let mut h = start_service(options()).await?;
    let host_socket = fake_host().await?;
    let host = HostInfo::new(host_socket.local_addr()?, Mode::ReflectListen);

    let token = h
        .service
        .start_session(host.clone(), "epsilon", Bytes::new())
        .await
        .context("session not started")?;
    assert_eq!(expect_syn(&host_socket).await?, token);
    send(&host_socket, &Signal::Ack(token), h.addr).await?;

    let Signal::Directive {
        kind: DirectiveKind::Listen,
        token: got,
        ..
    } = recv_non_syn(&host_socket, WAIT).await?
    else {
        bail!("expected LISTEN_HOST");
    };
    assert_eq!(got, token);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let reply = Signal::Directive {
        kind: DirectiveKind::Connect,
        listen_port: listener.local_addr()?.port(),
        token,
    };
    send(&host_socket, &reply, h.addr).await?;

    let (stream, _) = tokio::time::timeout(WAIT, listener.accept()).await??;
    let mut stream = frame::framed(stream);
    frame::write_frame(&mut stream, token.as_bytes().to_vec()).await?;
    assert_eq!(frame::read_frame(&mut stream).await?, "epsilon");

    assert_eq!(
        next_event(&mut h.events).await?,
        RendezvousEvent::SessionStarted {
            name: "epsilon".into(),
            host,
        }
    );

    h.service.stop().await;
    Ok(())
}

/// Several sessions to one host run independently.
#[tokio::test]
async fn concurrent_sessions_get_their_own_names() -> Result<()> {
    let mut h = start_service(options()).await?;
    let mut reflector = spawn_reflector(Vec::new(), b"").await?;
    let host = HostInfo::new(reflector.addr, Mode::ReflectConnect);

    for name in ["one", "two", "three"] {
        h.service
            .start_session(host.clone(), name, Bytes::new())
            .await
            .context("session not started")?;
    }

    let mut names = Vec::new();
    for _ in 0..3 {
        let session = tokio::time::timeout(WAIT, reflector.sessions.recv())
            .await?
            .context("missing session")?;
        names.push(session.name);
    }
    names.sort();
    assert_eq!(names, ["one", "three", "two"]);

    for _ in 0..3 {
        assert!(matches!(
            next_event(&mut h.events).await?,
            RendezvousEvent::SessionStarted { .. }
        ));
    }
    assert_eq!(h.service.pending_sessions(), 0);

    h.service.stop().await;
    Ok(())
}
