use serde::Serialize;

use crate::connectivity::{ConnectivityState, NetworkCredential};
use crate::provisioning::ProvisioningOutcome;
use crate::redemption::StatusTone;

/// What the kiosk is currently presenting. The controller holds exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Screen {
    /// Code entry.
    Main,
    /// Network picker and credential entry.
    Provisioning,
    ShuttingDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub text: String,
    pub tone: StatusTone,
    pub generation: u64,
    /// Set for connectivity advisories, which clear themselves once the kiosk is back online.
    pub advisory: bool,
}

#[derive(Debug)]
pub enum KioskCommand {
    Submit(String),
    ScanNetworks,
    Connect(NetworkCredential),
    DismissProvisioning,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum KioskEvent {
    ScreenChanged {
        screen: Screen,
    },
    Status {
        text: String,
        tone: StatusTone,
        generation: u64,
    },
    StatusCleared {
        generation: u64,
    },
    /// The code input is empty, focused and accepting input again.
    InputReset,
    NetworksFound {
        networks: Vec<String>,
    },
    ProvisioningResult {
        outcome: ProvisioningOutcome,
    },
    Connectivity {
        state: ConnectivityState,
    },
}

impl From<&StatusLine> for KioskEvent {
    fn from(line: &StatusLine) -> Self {
        KioskEvent::Status {
            text: line.text.clone(),
            tone: line.tone,
            generation: line.generation,
        }
    }
}
