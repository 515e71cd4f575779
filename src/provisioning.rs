use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::connectivity::{ConnectivityMonitor, LinkLayer, NetworkCredential};
use crate::error::ProvisioningError;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "result", content = "reason")]
pub enum ProvisioningOutcome {
    Connected,
    Failed(String),
}

impl From<ProvisioningError> for ProvisioningOutcome {
    fn from(err: ProvisioningError) -> Self {
        ProvisioningOutcome::Failed(err.to_string())
    }
}

/// Wifi repair: scan, take credentials, reassociate, re-verify. One attempt at a time.
pub struct ProvisioningFlow {
    link: Arc<dyn LinkLayer>,
    monitor: Arc<ConnectivityMonitor>,
    settle: Duration,
    in_flight: Mutex<()>,
}

impl ProvisioningFlow {
    pub fn new(link: Arc<dyn LinkLayer>, monitor: Arc<ConnectivityMonitor>, settle: Duration) -> Self {
        Self {
            link,
            monitor,
            settle,
            in_flight: Mutex::new(()),
        }
    }

    /// Nearby network names. A failed scan is logged and reads as no networks.
    pub async fn scan(&self) -> Vec<String> {
        match self.link.scan_networks().await {
            Ok(names) => {
                let mut seen = HashSet::new();
                let names: Vec<String> = names
                    .into_iter()
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty() && seen.insert(name.clone()))
                    .collect();
                log_info!("network scan found {} networks", names.len());
                names
            }
            Err(err) => {
                log_warn!("network scan failed: {err:#}");
                Vec::new()
            }
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    /// Applies `credential`, waits for the link to settle and re-checks link and reachability.
    /// On success the monitor is asked to re-verify; the flow never declares the kiosk online.
    pub async fn connect(&self, credential: NetworkCredential) -> ProvisioningOutcome {
        let Ok(_attempt) = self.in_flight.try_lock() else {
            log_warn!("rejecting connection to {:?}: attempt already running", credential.ssid);
            return ProvisioningError::AlreadyInProgress.into();
        };

        let ssid = credential.ssid.clone();
        log_info!("connecting to network {ssid:?}");

        if let Err(err) = self.link.apply_credential(credential).await {
            log_warn!("could not apply credentials for {ssid:?}: {err}");
            return err.into();
        }

        tokio::time::sleep(self.settle).await;

        if self.monitor.probe_link().await {
            log_info!("network {ssid:?} is up; handing back to the connectivity monitor");
            self.monitor.request_refresh();
            ProvisioningOutcome::Connected
        } else {
            log_warn!("network {ssid:?} did not come up");
            ProvisioningError::NotConnected.into()
        }
    }
}
