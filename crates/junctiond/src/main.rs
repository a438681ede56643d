//! junctiond: Junction rendezvous daemon.
//!
//! `junctiond serve` runs the rendezvous service; `junctiond reflect` runs
//! the endpoint-side reflector against the configured services.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::{broadcast, mpsc};

use junction_core::config::JunctionConfig;
use junction_core::crypto::{HeartbeatCipher, PayloadCipher};
use junction_services::{
    ReflectedSession, Reflector, ReflectorOptions, RendezvousEvent, RendezvousService,
    ServiceOptions, Session,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = JunctionConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = JunctionConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        JunctionConfig::default()
    });

    if config.heartbeat.uses_default_key() {
        tracing::warn!("heartbeat key is the built-in default; set [heartbeat] key for real deployments");
    }
    let cipher: Arc<dyn PayloadCipher> = Arc::new(HeartbeatCipher::from_passphrase(&config.heartbeat.key));

    let role = std::env::args().nth(1).unwrap_or_else(|| "serve".to_string());
    tracing::info!(role, "junctiond starting");

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    match role.as_str() {
        "serve" => serve(config, cipher, shutdown_tx).await,
        "reflect" => reflect(config, cipher, shutdown_tx).await,
        other => bail!("unknown role {other:?}, expected \"serve\" or \"reflect\""),
    }
}

async fn serve(
    config: JunctionConfig,
    cipher: Arc<dyn PayloadCipher>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<()> {
    let (session_tx, mut session_rx) = mpsc::unbounded_channel::<Session>();
    let service = Arc::new(RendezvousService::new(
        ServiceOptions::from(&config),
        cipher,
        Arc::new(session_tx),
    ));

    let mut events = service.subscribe();
    let addr = service
        .start(config.network.port)
        .await
        .context("failed to start rendezvous service")?;
    tracing::info!(%addr, "listening");

    let event_logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });

    // No application protocol lives here; sessions are logged and closed.
    let session_sink = tokio::spawn(async move {
        while let Some(session) = session_rx.recv().await {
            tracing::info!(
                token = %session.token,
                name = %session.name,
                host = %session.host.addr,
                peer = ?session.peer_addr().ok(),
                "session delivered, closing"
            );
        }
    });

    let pool_printer = {
        let service = service.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                let hosts = service.hosts();
                tracing::info!(
                    hosts = hosts.len(),
                    pending = service.pending_sessions(),
                    "host pool snapshot"
                );
                for host in hosts {
                    tracing::info!(addr = %host.addr, info = %String::from_utf8_lossy(&host.info), "  host");
                }
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = event_logger        => tracing::error!("event logger exited: {:?}", r),
        r = session_sink        => tracing::error!("session sink exited: {:?}", r),
        r = pool_printer        => tracing::error!("pool printer exited: {:?}", r),
    }

    service.stop().await;
    Ok(())
}

async fn reflect(
    config: JunctionConfig,
    cipher: Arc<dyn PayloadCipher>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<()> {
    let mut services = Vec::new();
    for service in &config.heartbeat.services {
        let resolved: Vec<SocketAddr> = tokio::net::lookup_host(service.as_str())
            .await
            .with_context(|| format!("failed to resolve service {service:?}"))?
            .collect();
        match resolved.first() {
            Some(addr) => services.push(*addr),
            None => bail!("service {service:?} resolved to no addresses"),
        }
    }
    if services.is_empty() {
        tracing::warn!("no [heartbeat] services configured; reflector will only answer directives");
    }

    let (session_tx, mut session_rx) = mpsc::unbounded_channel::<ReflectedSession>();
    let bind = SocketAddr::new(config.network.bind, 0);
    let reflector = Reflector::bind(
        bind,
        ReflectorOptions::from_config(&config, services),
        cipher,
        session_tx,
    )
    .await
    .with_context(|| format!("failed to bind reflector socket on {bind}"))?;

    let session_sink = tokio::spawn(async move {
        while let Some(session) = session_rx.recv().await {
            tracing::info!(
                token = %session.token,
                name = %session.name,
                service = %session.service,
                "reflected session delivered, closing"
            );
        }
    });

    let reflector_task = tokio::spawn(reflector.run(shutdown_tx.subscribe()));

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = reflector_task      => match r {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %format!("{e:#}"), "reflector failed"),
            Err(e) => tracing::error!(error = %e, "reflector task panicked"),
        },
        r = session_sink        => tracing::error!("session sink exited: {:?}", r),
    }

    Ok(())
}

fn log_event(event: &RendezvousEvent) {
    match event {
        RendezvousEvent::SessionStarted { name, host } => {
            tracing::info!(%name, host = %host.addr, "session started");
        }
        RendezvousEvent::SessionFailed { name, host } => {
            tracing::warn!(%name, host = %host.addr, "session failed");
        }
        RendezvousEvent::HostPoolChanged { size } => {
            tracing::info!(size, "host pool changed");
        }
        RendezvousEvent::HostArrived(host) => {
            tracing::info!(addr = %host.addr, info_len = host.info.len(), "host arrived");
        }
    }
}
