use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Identifier of the physical lock terminal a bridge is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TerminalId(String);

impl TerminalId {
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(BridgeError::InvalidTerminalId);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TerminalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which correlation table holds requests of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationTable {
    Lifecycle,
    Command,
    ErrorSink,
}

/// Closed set of operations whose results arrive through terminal callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    #[serde(rename = "SAVE_AUTH_KEY")]
    SaveAuthKey,
    #[serde(rename = "SCAN_AND_CONNECT_TO_PERIPHERAL")]
    ScanAndConnect,
    #[serde(rename = "DISCONNECT")]
    Disconnect,
    #[serde(rename = "LOCK")]
    Lock,
    #[serde(rename = "UNLOCK")]
    Unlock,
    #[serde(rename = "UNLOCK_NOKEYFOB")]
    UnlockNoKeyFob,
    #[serde(rename = "HORN")]
    Horn,
    #[serde(rename = "HEADLIGHT")]
    Headlight,
    #[serde(rename = "GET_LOCK_STATE")]
    LockState,
    #[serde(rename = "IGNITION_STATE")]
    IgnitionState,
    #[serde(rename = "VEHICLE_GET_STATUS")]
    GetVehicleStats,
    #[serde(rename = "ON_ERROR")]
    OnError,
}

impl ActionKind {
    pub const ALL: [ActionKind; 12] = [
        ActionKind::SaveAuthKey,
        ActionKind::ScanAndConnect,
        ActionKind::Disconnect,
        ActionKind::Lock,
        ActionKind::Unlock,
        ActionKind::UnlockNoKeyFob,
        ActionKind::Horn,
        ActionKind::Headlight,
        ActionKind::LockState,
        ActionKind::IgnitionState,
        ActionKind::GetVehicleStats,
        ActionKind::OnError,
    ];

    pub fn table(self) -> CorrelationTable {
        match self {
            ActionKind::SaveAuthKey | ActionKind::ScanAndConnect | ActionKind::Disconnect => {
                CorrelationTable::Lifecycle
            }
            ActionKind::Lock
            | ActionKind::Unlock
            | ActionKind::UnlockNoKeyFob
            | ActionKind::Horn
            | ActionKind::Headlight
            | ActionKind::LockState
            | ActionKind::IgnitionState
            | ActionKind::GetVehicleStats => CorrelationTable::Command,
            ActionKind::OnError => CorrelationTable::ErrorSink,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::SaveAuthKey => "SAVE_AUTH_KEY",
            ActionKind::ScanAndConnect => "SCAN_AND_CONNECT_TO_PERIPHERAL",
            ActionKind::Disconnect => "DISCONNECT",
            ActionKind::Lock => "LOCK",
            ActionKind::Unlock => "UNLOCK",
            ActionKind::UnlockNoKeyFob => "UNLOCK_NOKEYFOB",
            ActionKind::Horn => "HORN",
            ActionKind::Headlight => "HEADLIGHT",
            ActionKind::LockState => "GET_LOCK_STATE",
            ActionKind::IgnitionState => "IGNITION_STATE",
            ActionKind::GetVehicleStats => "VEHICLE_GET_STATUS",
            ActionKind::OnError => "ON_ERROR",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LockState {
    Locked,
    Unlocked,
    #[default]
    Unknown,
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LockState::Locked => "Locked",
            LockState::Unlocked => "Unlocked",
            LockState::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

/// Ignition state exactly as the terminal prints it; never interpreted here.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IgnitionState(pub String);

impl fmt::Display for IgnitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw indicator bit set reported by the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Indicators(pub u8);

/// Telemetry captured by the terminal for one `VEHICLE_GET_STATUS` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleStats {
    pub odometer: f64,
    pub engine_hours: i64,
    #[serde(rename = "engineRPM")]
    pub engine_rpm: i64,
    pub fuel_level: i64,
    pub hazards_is_on: bool,
    pub indicators: Indicators,
    pub brakes_is_active: bool,
    pub hand_brake_is_active: bool,
    pub lights_is_on: bool,
    pub driver_door_is_open: bool,
    pub passenger_door_is_open: bool,
    pub driver_seatbelt_is_engage: bool,
    pub passenger_seatbelt_is_engage: bool,
    pub horn_is_active: bool,
}

impl VehicleStats {
    /// Structured, caller-visible form of the snapshot.
    ///
    /// Non-finite readings cannot be represented in JSON and are reported as
    /// a serialization failure rather than silently turned into `null`.
    pub fn to_structured(&self) -> Result<serde_json::Value, BridgeError> {
        if !self.odometer.is_finite() {
            return Err(BridgeError::StatsSerialization(format!(
                "odometer reading {} is not a finite number",
                self.odometer
            )));
        }
        serde_json::to_value(self).map_err(|err| BridgeError::StatsSerialization(err.to_string()))
    }
}
