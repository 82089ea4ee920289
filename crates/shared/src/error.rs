use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ActionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Sdk,
    Busy,
    Timeout,
    Disconnected,
    NotConfigured,
    Validation,
    Serialization,
    UnknownAction,
    Unsupported,
    Unavailable,
    Internal,
}

/// Failure as handed to the caller: a stable code plus the human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailurePayload {
    pub code: ErrorCode,
    pub message: String,
}

impl FailurePayload {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("Save Key Failed, message: {code} {description}")]
    SaveKey { code: i32, description: String },
    #[error("Failed to connect, Error Code: {code} Message: {description}")]
    Connect { code: i32, description: String },
    #[error("Action Failed, message: [{action_code}] [{kind}] Failed. Reason: [{code}]{description}")]
    Action {
        kind: ActionKind,
        action_code: i32,
        code: i32,
        description: String,
    },
    #[error("Action Failed, [{action_code}] get vehicle stats Failed. Reason: [{code}] {description}")]
    VehicleStats {
        action_code: i32,
        code: i32,
        description: String,
    },
    #[error("Error: Get vehicle stats Failed. Reason: terminal returned no vehicle stats snapshot")]
    StatsMissing,
    #[error("Error: Get vehicle stats Failed. Reason: failed to structure vehicle stats: {0}")]
    StatsSerialization(String),
    #[error("Terminal error, Error Code: {code} Message: {description}")]
    Terminal { code: i32, description: String },
    #[error("{0} request already pending")]
    Busy(ActionKind),
    #[error("{kind} timed out after {elapsed_ms} ms")]
    Timeout { kind: ActionKind, elapsed_ms: u64 },
    #[error("{0} aborted: terminal disconnected")]
    Aborted(ActionKind),
    #[error("{0} aborted: terminal binding replaced")]
    Superseded(ActionKind),
    #[error("Disconnected")]
    UnsolicitedDisconnect,
    #[error("Terminal not configured")]
    NotConfigured,
    #[error("Terminal ID must not be empty")]
    InvalidTerminalId,
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("Action not available: {0}")]
    Unsupported(String),
    #[error("{0} is not a request kind")]
    NotIssuable(ActionKind),
    #[error("unknown")]
    LockStateUnknown,
    #[error("No auth key stored on terminal")]
    NoAuthKey,
    #[error("Remove Key failed")]
    KeyRemoval,
    #[error("bridge unavailable: {0}")]
    Internal(String),
}

impl BridgeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::SaveKey { .. }
            | BridgeError::Connect { .. }
            | BridgeError::Action { .. }
            | BridgeError::VehicleStats { .. }
            | BridgeError::Terminal { .. }
            | BridgeError::KeyRemoval => ErrorCode::Sdk,
            BridgeError::StatsMissing | BridgeError::StatsSerialization(_) => {
                ErrorCode::Serialization
            }
            BridgeError::Busy(_) => ErrorCode::Busy,
            BridgeError::Timeout { .. } => ErrorCode::Timeout,
            BridgeError::Aborted(_)
            | BridgeError::Superseded(_)
            | BridgeError::UnsolicitedDisconnect => ErrorCode::Disconnected,
            BridgeError::NotConfigured => ErrorCode::NotConfigured,
            BridgeError::InvalidTerminalId | BridgeError::NotIssuable(_) => ErrorCode::Validation,
            BridgeError::UnknownAction(_) => ErrorCode::UnknownAction,
            BridgeError::Unsupported(_) => ErrorCode::Unsupported,
            BridgeError::LockStateUnknown | BridgeError::NoAuthKey => ErrorCode::Unavailable,
            BridgeError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn to_payload(&self) -> FailurePayload {
        FailurePayload::new(self.code(), self.to_string())
    }
}

impl From<BridgeError> for FailurePayload {
    fn from(value: BridgeError) -> Self {
        value.to_payload()
    }
}
