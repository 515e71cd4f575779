use serde::Serialize;

use crate::error::KioskError;
use crate::hardware::LockerId;

/// Progress of the redemption currently in flight. Terminal results are reported as a
/// [`RedemptionOutcome`]; the status itself always settles back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum RedemptionStatus {
    #[default]
    Idle,
    Submitted,
    Validating,
    #[serde(rename_all = "camelCase")]
    Actuating { locker_id: LockerId },
}

impl RedemptionStatus {
    pub fn is_idle(&self) -> bool {
        matches!(self, RedemptionStatus::Idle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusTone {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedemptionOutcome {
    Opened { locker_id: LockerId },
    Failed(KioskError),
    /// Another redemption was still in flight; nothing was done.
    Busy,
    /// The reserved exit code was entered.
    ShutdownRequested,
}

pub const BUSY_MESSAGE: &str = "Please wait, your previous code is still being processed.";

pub fn opening_message(locker_id: LockerId) -> String {
    format!("Opening locker {locker_id}!")
}

impl RedemptionOutcome {
    /// Status line for this outcome, if it has one.
    pub fn status_line(&self) -> Option<(String, StatusTone)> {
        match self {
            RedemptionOutcome::Opened { locker_id } => {
                Some((opening_message(*locker_id), StatusTone::Success))
            }
            RedemptionOutcome::Failed(err) => Some((err.to_string(), StatusTone::Error)),
            RedemptionOutcome::Busy => Some((BUSY_MESSAGE.to_string(), StatusTone::Info)),
            RedemptionOutcome::ShutdownRequested => None,
        }
    }

    /// Whether the input box goes back to an empty, submittable state.
    pub fn resets_input(&self) -> bool {
        matches!(
            self,
            RedemptionOutcome::Opened { .. } | RedemptionOutcome::Failed(_)
        )
    }
}
