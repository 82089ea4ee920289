use serde::{Deserialize, Serialize};

use crate::{
    domain::ActionKind,
    error::{BridgeError, FailurePayload},
};

/// Action names accepted by `sendAction` but not supported by this terminal family.
const UNSUPPORTED_ACTIONS: &[&str] = &["VEHICLE_GET_CONFIG"];

/// Commands issued by the hybrid-app layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "camelCase")]
pub enum BridgeCommand {
    #[serde(rename_all = "camelCase")]
    Configure {
        terminal_id: String,
    },
    #[serde(rename_all = "camelCase")]
    SaveAuthKey {
        auth_key: String,
    },
    GetAuthKey,
    #[serde(rename_all = "camelCase")]
    ScanAndConnectToPeripheral {
        #[serde(default)]
        timeout_seconds: Option<u64>,
    },
    Disconnect,
    RemoveAuthKey,
    #[serde(rename_all = "camelCase")]
    SendAction {
        action: String,
    },
    InitErrorHandler,
    GetLockState,
}

impl BridgeCommand {
    pub fn name(&self) -> &'static str {
        match self {
            BridgeCommand::Configure { .. } => "configure",
            BridgeCommand::SaveAuthKey { .. } => "saveAuthKey",
            BridgeCommand::GetAuthKey => "getAuthKey",
            BridgeCommand::ScanAndConnectToPeripheral { .. } => "scanAndConnectToPeripheral",
            BridgeCommand::Disconnect => "disconnect",
            BridgeCommand::RemoveAuthKey => "removeAuthKey",
            BridgeCommand::SendAction { .. } => "sendAction",
            BridgeCommand::InitErrorHandler => "initErrorHandler",
            BridgeCommand::GetLockState => "getLockState",
        }
    }
}

/// Maps a `sendAction` argument onto the closed set of device action kinds.
pub fn parse_device_action(raw: &str) -> Result<ActionKind, BridgeError> {
    let kind = match raw.trim() {
        "LOCK" => ActionKind::Lock,
        "UNLOCK" => ActionKind::Unlock,
        "HORN" => ActionKind::Horn,
        "GET_LOCK_STATE" => ActionKind::LockState,
        "HEADLIGHT" => ActionKind::Headlight,
        "UNLOCK_NOKEYFOB" => ActionKind::UnlockNoKeyFob,
        "IGNITION_STATE" => ActionKind::IgnitionState,
        "VEHICLE_GET_STATUS" => ActionKind::GetVehicleStats,
        other if UNSUPPORTED_ACTIONS.contains(&other) => {
            return Err(BridgeError::Unsupported(other.to_string()))
        }
        other => return Err(BridgeError::UnknownAction(other.to_string())),
    };
    Ok(kind)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ReplyPayload {
    Text(String),
    Telemetry(serde_json::Value),
}

impl ReplyPayload {
    pub fn text(value: impl Into<String>) -> Self {
        ReplyPayload::Text(value.into())
    }
}

/// The single eventual result of one caller command.
pub type CommandReply = Result<ReplyPayload, BridgeError>;

/// Serializable rendering of a [`CommandReply`] for line-oriented transports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub command: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<ReplyPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailurePayload>,
}

impl ReplyEnvelope {
    pub fn new(command: impl Into<String>, reply: &CommandReply) -> Self {
        let command = command.into();
        match reply {
            Ok(payload) => Self {
                command,
                ok: true,
                payload: Some(payload.clone()),
                error: None,
            },
            Err(err) => Self {
                command,
                ok: false,
                payload: None,
                error: Some(err.to_payload()),
            },
        }
    }
}
