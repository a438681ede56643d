//! Periodic housekeeping: session expiry, SYN retransmission and host pool
//! eviction, all on one timer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use junction_core::Signal;

use crate::events::RendezvousEvent;
use crate::service::Shared;
use crate::signal::send_signal;

pub(crate) struct Scheduler {
    socket: Arc<UdpSocket>,
    shared: Arc<Shared>,
    period: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl Scheduler {
    pub(crate) fn new(
        socket: Arc<UdpSocket>,
        shared: Arc<Shared>,
        period: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            socket,
            shared,
            period,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the SYN was just sent.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::debug!("scheduler shutting down");
                    return;
                }
                _ = interval.tick() => self.tick().await,
            }
        }
    }

    async fn tick(&self) {
        let sweep = self
            .shared
            .registry
            .sweep(Instant::now(), self.shared.timeout());

        for entry in sweep.expired {
            tracing::info!(token = %entry.token, name = %entry.name, host = %entry.host.addr, "session timed out");
            self.shared.emit(RendezvousEvent::SessionFailed {
                name: entry.name,
                host: entry.host,
            });
        }

        for (token, host) in sweep.pending {
            tracing::trace!(%token, host = %host.addr, "resending SYN");
            send_signal(&self.socket, &Signal::Syn(token), host.addr).await;
        }

        let evicted = self
            .shared
            .pool
            .clean_expired(Instant::now(), self.shared.host_ttl);
        if evicted > 0 {
            let size = self.shared.pool.len();
            tracing::info!(evicted, pool = size, "evicted silent hosts");
            self.shared.emit(RendezvousEvent::HostPoolChanged { size });
        }
    }
}
