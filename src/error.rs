//! Fault taxonomy shared by the controller components.
//!
//! Component errors (`HardwareError`, `RemoteError`, `ProvisioningError`) carry what went wrong;
//! `KioskError` is what the operator sees, and its `Display` is the status-line text.

use thiserror::Error;

use crate::hardware::{LockerId, Pin};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HardwareError {
    #[error("locker {0} is not registered")]
    NotFound(LockerId),
    #[error("channel {0} is not registered")]
    UnknownChannel(Pin),
    #[error("hardware fault on channel {pin}: {reason}")]
    Fault { pin: Pin, reason: String },
}

impl HardwareError {
    pub fn fault(pin: Pin, reason: impl Into<String>) -> Self {
        HardwareError::Fault {
            pin,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("code not found")]
    NotFound,
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("malformed response body: {0}")]
    InvalidResponse(String),
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProvisioningError {
    #[error("a network connection attempt is already in progress")]
    AlreadyInProgress,
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    #[error("could not apply network configuration: {0}")]
    Apply(String),
    #[error("network did not come up after reconfiguration")]
    NotConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputError {
    EmptyCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityError {
    NoNetwork,
    ServerUnreachable,
}

/// Operator-facing failure of a single redemption.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KioskError {
    #[error("Please enter your code")]
    Input(InputError),
    #[error("{}", connectivity_message(.0))]
    Connectivity(ConnectivityError),
    #[error("{0}")]
    RemoteRejection(String),
    #[error("{}", remote_message(.0))]
    Remote(RemoteError),
    #[error("Invalid locker number: {0}")]
    InvalidLocker(String),
    #[error("Failed to operate locker. Please try again.")]
    Hardware(HardwareError),
}

impl From<RemoteError> for KioskError {
    fn from(err: RemoteError) -> Self {
        KioskError::Remote(err)
    }
}

impl From<HardwareError> for KioskError {
    fn from(err: HardwareError) -> Self {
        KioskError::Hardware(err)
    }
}

pub const INVALID_CODE_MESSAGE: &str = "Invalid OTP code";

fn connectivity_message(err: &ConnectivityError) -> &'static str {
    match err {
        ConnectivityError::NoNetwork => "No internet connection. Please check your WiFi settings.",
        ConnectivityError::ServerUnreachable => "Cannot connect to server. Please try again later.",
    }
}

fn remote_message(err: &RemoteError) -> String {
    match err {
        RemoteError::Timeout => "Server not responding. Please try again.".to_string(),
        RemoteError::Connect(_) | RemoteError::Transport(_) => {
            "Cannot connect to server. Please check your internet connection.".to_string()
        }
        RemoteError::NotFound => INVALID_CODE_MESSAGE.to_string(),
        RemoteError::Status(status) => {
            format!("Server error ({status}). Please try again later.")
        }
        RemoteError::InvalidResponse(_) => "Invalid server response. Please try again.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_failures_map_to_operator_messages() {
        assert_eq!(
            KioskError::from(RemoteError::Timeout).to_string(),
            "Server not responding. Please try again."
        );
        assert_eq!(
            KioskError::from(RemoteError::NotFound).to_string(),
            INVALID_CODE_MESSAGE
        );
        assert_eq!(
            KioskError::from(RemoteError::Status(502)).to_string(),
            "Server error (502). Please try again later."
        );
        assert_eq!(
            KioskError::from(RemoteError::InvalidResponse("eof".into())).to_string(),
            "Invalid server response. Please try again."
        );
    }

    #[test]
    fn connectivity_messages_are_state_specific() {
        assert!(KioskError::Connectivity(ConnectivityError::NoNetwork)
            .to_string()
            .starts_with("No internet connection"));
        assert!(KioskError::Connectivity(ConnectivityError::ServerUnreachable)
            .to_string()
            .starts_with("Cannot connect to server"));
    }

    #[test]
    fn hardware_faults_surface_generically() {
        let err = KioskError::from(HardwareError::fault(Pin(17), "write failed"));
        assert_eq!(err.to_string(), "Failed to operate locker. Please try again.");
    }
}
