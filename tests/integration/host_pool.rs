use crate::*;

use bytes::Bytes;
use junction_core::crypto::PayloadCipher;
use junction_core::{HostInfo, Mode};

// ══════════════════════════════════════════════════════════════════════════════
//  Heartbeats and the host pool
// ══════════════════════════════════════════════════════════════════════════════

fn heartbeat(key: &str, info: &[u8]) -> Signal {
    let blob = HeartbeatCipher::from_passphrase(key).encrypt(info);
    Signal::Heartbeat(Bytes::from(blob))
}

/// First heartbeat adds the host and announces it; a repeat only refreshes.
#[tokio::test]
async fn heartbeat_adds_host_once() -> Result<()> {
    let mut h = start_service(options()).await?;
    let host_socket = fake_host().await?;

    send(&host_socket, &heartbeat(KEY, b"nas"), h.addr).await?;

    assert_eq!(
        next_event(&mut h.events).await?,
        RendezvousEvent::HostPoolChanged { size: 1 }
    );
    let expected = HostInfo::new(host_socket.local_addr()?, Mode::ReflectConnect)
        .with_info(Bytes::from_static(b"nas"));
    assert_eq!(
        next_event(&mut h.events).await?,
        RendezvousEvent::HostArrived(expected.clone())
    );

    send(&host_socket, &heartbeat(KEY, b"nas"), h.addr).await?;
    assert_no_event(&mut h.events).await;
    assert_eq!(h.service.hosts(), vec![expected]);

    h.service.stop().await;
    Ok(())
}

/// Heartbeats sealed with another key are dropped.
#[tokio::test]
async fn heartbeat_with_wrong_key_is_dropped() -> Result<()> {
    let mut h = start_service(options()).await?;
    let host_socket = fake_host().await?;

    send(&host_socket, &heartbeat("some-other-key", b"intruder"), h.addr).await?;
    send(&host_socket, &Signal::Heartbeat(Bytes::from_static(b"short")), h.addr).await?;

    assert_no_event(&mut h.events).await;
    assert!(h.service.hosts().is_empty());

    h.service.stop().await;
    Ok(())
}

/// Two sockets on one machine are two hosts.
#[tokio::test]
async fn hosts_are_keyed_by_source_address() -> Result<()> {
    let mut h = start_service(options()).await?;
    let a = fake_host().await?;
    let b = fake_host().await?;

    send(&a, &heartbeat(KEY, b"a"), h.addr).await?;
    assert_eq!(
        next_event(&mut h.events).await?,
        RendezvousEvent::HostPoolChanged { size: 1 }
    );
    next_event(&mut h.events).await?;

    send(&b, &heartbeat(KEY, b"b"), h.addr).await?;
    assert_eq!(
        next_event(&mut h.events).await?,
        RendezvousEvent::HostPoolChanged { size: 2 }
    );
    assert_eq!(h.service.hosts().len(), 2);

    h.service.stop().await;
    Ok(())
}

/// A host that stops sending heartbeats is evicted after the TTL.
#[tokio::test]
async fn silent_host_is_evicted() -> Result<()> {
    let mut h = start_service(ServiceOptions {
        tick: Duration::from_millis(20),
        host_ttl: Duration::from_millis(150),
        ..options()
    })
    .await?;
    let host_socket = fake_host().await?;

    send(&host_socket, &heartbeat(KEY, b""), h.addr).await?;
    assert_eq!(
        next_event(&mut h.events).await?,
        RendezvousEvent::HostPoolChanged { size: 1 }
    );
    assert!(matches!(
        next_event(&mut h.events).await?,
        RendezvousEvent::HostArrived(_)
    ));

    assert_eq!(
        next_event(&mut h.events).await?,
        RendezvousEvent::HostPoolChanged { size: 0 }
    );
    assert!(h.service.hosts().is_empty());

    h.service.stop().await;
    Ok(())
}
