use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::remote::LockerService;

use super::link::LinkLayer;
use super::probe::UpstreamProbe;
use super::state::{ConnectivityState, ProbeOutcomes};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Sole writer of [`ConnectivityState`]. Re-evaluates from scratch on every poll.
pub struct ConnectivityMonitor {
    link: Arc<dyn LinkLayer>,
    upstream: Arc<dyn UpstreamProbe>,
    service: Arc<dyn LockerService>,
    state_tx: watch::Sender<ConnectivityState>,
    refresh: Notify,
    poll_interval: Duration,
}

impl ConnectivityMonitor {
    pub fn new(
        link: Arc<dyn LinkLayer>,
        upstream: Arc<dyn UpstreamProbe>,
        service: Arc<dyn LockerService>,
        poll_interval: Duration,
    ) -> Self {
        // Nothing has been verified yet.
        let (state_tx, _) = watch::channel(ConnectivityState::OfflineLink);

        Self {
            link,
            upstream,
            service,
            state_tx,
            refresh: Notify::new(),
            poll_interval,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }

    pub fn current(&self) -> ConnectivityState {
        *self.state_tx.borrow()
    }

    /// Asks the loop to re-evaluate now instead of waiting for the next poll.
    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }

    /// Link and reachability only; the part provisioning re-checks after reassociating.
    pub async fn probe_link(&self) -> bool {
        self.link.is_associated().await && self.upstream.reachable().await
    }

    pub async fn evaluate(&self) -> ConnectivityState {
        let link_associated = self.link.is_associated().await;
        let upstream_reachable = link_associated && self.upstream.reachable().await;
        let service_alive = upstream_reachable && self.service.health_check().await;

        ConnectivityState::from_probes(ProbeOutcomes {
            link_associated,
            upstream_reachable,
            service_alive,
        })
    }

    /// Evaluates and publishes. Subscribers are notified on every evaluation, changed or not.
    pub async fn refresh(&self) -> ConnectivityState {
        let state = self.evaluate().await;
        let previous = self.state_tx.send_replace(state);

        if previous != state {
            if state.is_online() {
                log_info!("connectivity {previous:?} -> {state:?}");
            } else {
                log_warn!("connectivity {previous:?} -> {state:?}");
            }
        }
        state
    }

    pub async fn run(self: Arc<Self>, cancel_token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh().await;
                }
                _ = self.refresh.notified() => {
                    self.refresh().await;
                    ticker.reset();
                }
                _ = cancel_token.cancelled() => {
                    log_info!("connectivity monitor shutting down");
                    break;
                }
            }
        }
    }
}
