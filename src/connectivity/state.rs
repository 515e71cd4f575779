use serde::Serialize;

use crate::error::ConnectivityError;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConnectivityState {
    Online,
    /// Not associated, or associated but the outside world is unreachable.
    OfflineLink,
    /// Network is fine; the locker service is not answering.
    OfflineService,
}

/// Latest result of each probe. Probes after a failing one are not run and read `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcomes {
    pub link_associated: bool,
    pub upstream_reachable: bool,
    pub service_alive: bool,
}

impl ConnectivityState {
    /// A fresh evaluation from the probes alone; there is no memory of earlier states.
    pub fn from_probes(outcomes: ProbeOutcomes) -> Self {
        if !outcomes.link_associated || !outcomes.upstream_reachable {
            ConnectivityState::OfflineLink
        } else if !outcomes.service_alive {
            ConnectivityState::OfflineService
        } else {
            ConnectivityState::Online
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, ConnectivityState::Online)
    }

    /// Why redemption is blocked in this state, if it is.
    pub fn blocking_error(&self) -> Option<ConnectivityError> {
        match self {
            ConnectivityState::Online => None,
            ConnectivityState::OfflineLink => Some(ConnectivityError::NoNetwork),
            ConnectivityState::OfflineService => Some(ConnectivityError::ServerUnreachable),
        }
    }
}
