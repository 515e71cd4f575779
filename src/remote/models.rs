use serde::Deserialize;

use crate::error::RemoteError;

/// Body of `GET /{code}`. Older deployments nest the locker under `data` and report failures
/// under `Error`; every spelling is accepted, and a body may carry several at once.
#[derive(Debug, Clone, Deserialize)]
pub struct RedeemBody {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub locker: Option<LockerRef>,
    #[serde(default)]
    pub data: Option<LockerRef>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "Error")]
    pub error_legacy: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockerRef {
    pub number: LockerNumber,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LockerNumber {
    Text(String),
    Number(u64),
}

impl LockerNumber {
    pub fn label(&self) -> String {
        match self {
            LockerNumber::Text(text) => text.trim().to_string(),
            LockerNumber::Number(number) => number.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redemption {
    /// The code is valid; `locker_number` is still unverified against the hardware table.
    Accepted { locker_number: String },
    Rejected { message: Option<String> },
}

impl RedeemBody {
    pub fn into_redemption(self) -> Result<Redemption, RemoteError> {
        if !self.success {
            let message = [self.message, self.error_legacy, self.error]
                .into_iter()
                .flatten()
                .find(|message| !message.trim().is_empty());
            return Ok(Redemption::Rejected { message });
        }

        match self.locker.or(self.data) {
            Some(locker) => Ok(Redemption::Accepted {
                locker_number: locker.number.label(),
            }),
            None => Err(RemoteError::InvalidResponse(
                "success without a locker number".into(),
            )),
        }
    }
}
