//! Boundary to the BLE lock terminal SDK.
//!
//! The SDK is callback driven: outbound calls return immediately and the
//! outcome is reported later, on a thread the SDK owns, through the single
//! [`TerminalDelegate`] registered on the terminal.

use std::{fmt, sync::Arc, time::Duration};

use shared::domain::{IgnitionState, Indicators, LockState, TerminalId, VehicleStats};
use thiserror::Error;

pub mod sim;

pub use sim::{SimulatedService, SimulatedTerminal};

/// Error reported by the SDK alongside a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkError {
    pub code: i32,
    pub action_code: i32,
    pub description: String,
}

impl SdkError {
    pub fn new(code: i32, action_code: i32, description: impl Into<String>) -> Self {
        Self {
            code,
            action_code,
            description: description.into(),
        }
    }
}

impl fmt::Display for SdkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.description)
    }
}

/// Device commands accepted by [`BleTerminal::send_action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceAction {
    Lock,
    Unlock,
    UnlockNoKeyFob,
    Horn,
    Headlight,
    LockState,
    IgnitionState,
}

/// Action identifier carried by an action callback.
///
/// Newer SDK builds may report actions this layer does not know about; those
/// arrive as `Unrecognized` with the SDK's own name for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportedAction {
    Known(DeviceAction),
    Unrecognized(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalStrength {
    Excellent,
    Good,
    Fair,
    Weak,
    Unknown,
}

impl SignalStrength {
    pub fn from_rssi(rssi: i32) -> Self {
        match rssi {
            r if r >= -60 => SignalStrength::Excellent,
            r if r >= -75 => SignalStrength::Good,
            r if r >= -90 => SignalStrength::Fair,
            r if r > -127 => SignalStrength::Weak,
            _ => SignalStrength::Unknown,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("missing field `{0}`")]
pub struct MissingStatsField(pub &'static str);

/// Vehicle telemetry as delivered by the SDK; any field may be absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawVehicleStats {
    pub odometer: Option<f64>,
    pub engine_hours: Option<i64>,
    pub engine_rpm: Option<i64>,
    pub fuel_level: Option<i64>,
    pub hazards_is_on: Option<bool>,
    pub indicators: Option<u8>,
    pub brakes_is_active: Option<bool>,
    pub hand_brake_is_active: Option<bool>,
    pub lights_is_on: Option<bool>,
    pub driver_door_is_open: Option<bool>,
    pub passenger_door_is_open: Option<bool>,
    pub driver_seatbelt_is_engage: Option<bool>,
    pub passenger_seatbelt_is_engage: Option<bool>,
    pub horn_is_active: Option<bool>,
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, MissingStatsField> {
    value.ok_or(MissingStatsField(field))
}

impl RawVehicleStats {
    pub fn into_stats(self) -> Result<VehicleStats, MissingStatsField> {
        Ok(VehicleStats {
            odometer: required(self.odometer, "odometer")?,
            engine_hours: required(self.engine_hours, "engineHours")?,
            engine_rpm: required(self.engine_rpm, "engineRPM")?,
            fuel_level: required(self.fuel_level, "fuelLevel")?,
            hazards_is_on: required(self.hazards_is_on, "hazardsIsOn")?,
            indicators: Indicators(required(self.indicators, "indicators")?),
            brakes_is_active: required(self.brakes_is_active, "brakesIsActive")?,
            hand_brake_is_active: required(self.hand_brake_is_active, "handBrakeIsActive")?,
            lights_is_on: required(self.lights_is_on, "lightsIsOn")?,
            driver_door_is_open: required(self.driver_door_is_open, "driverDoorIsOpen")?,
            passenger_door_is_open: required(self.passenger_door_is_open, "passengerDoorIsOpen")?,
            driver_seatbelt_is_engage: required(
                self.driver_seatbelt_is_engage,
                "driverSeatbeltIsEngage",
            )?,
            passenger_seatbelt_is_engage: required(
                self.passenger_seatbelt_is_engage,
                "passengerSeatbeltIsEngage",
            )?,
            horn_is_active: required(self.horn_is_active, "hornIsActive")?,
        })
    }
}

impl From<&VehicleStats> for RawVehicleStats {
    fn from(stats: &VehicleStats) -> Self {
        Self {
            odometer: Some(stats.odometer),
            engine_hours: Some(stats.engine_hours),
            engine_rpm: Some(stats.engine_rpm),
            fuel_level: Some(stats.fuel_level),
            hazards_is_on: Some(stats.hazards_is_on),
            indicators: Some(stats.indicators.0),
            brakes_is_active: Some(stats.brakes_is_active),
            hand_brake_is_active: Some(stats.hand_brake_is_active),
            lights_is_on: Some(stats.lights_is_on),
            driver_door_is_open: Some(stats.driver_door_is_open),
            passenger_door_is_open: Some(stats.passenger_door_is_open),
            driver_seatbelt_is_engage: Some(stats.driver_seatbelt_is_engage),
            passenger_seatbelt_is_engage: Some(stats.passenger_seatbelt_is_engage),
            horn_is_active: Some(stats.horn_is_active),
        }
    }
}

/// Callbacks invoked by the SDK on its own execution context.
pub trait TerminalDelegate: Send + Sync {
    fn on_saved_key(&self, error: Option<SdkError>);
    fn on_connect(&self, error: Option<SdkError>);
    fn on_action(&self, action: ReportedAction, error: Option<SdkError>);
    fn on_vehicle_stats(&self, stats: Option<RawVehicleStats>, error: Option<SdkError>);
    fn on_disconnected(&self);
    fn on_signal_update(&self, rssi: i32, strength: SignalStrength);
    /// Terminal-level failure not tied to any outbound call.
    fn on_error(&self, error: SdkError);
}

/// Outbound capabilities of one bound terminal. Every call returns
/// immediately; asynchronous outcomes arrive through the delegate.
pub trait BleTerminal: Send + Sync {
    fn terminal_id(&self) -> &TerminalId;
    fn set_delegate(&self, delegate: Arc<dyn TerminalDelegate>);
    fn connect(&self, scan_timeout: Option<Duration>);
    fn disconnect(&self);
    fn save_auth_key(&self, auth_key: &str);
    fn auth_key(&self) -> Option<String>;
    fn has_key(&self) -> bool;
    fn remove_auth_key(&self);
    fn send_action(&self, action: DeviceAction);
    fn get_vehicle_stats(&self);
    fn lock_state(&self) -> LockState;
    fn ignition_state(&self) -> IgnitionState;
}

/// Resolves a terminal identifier to the SDK's terminal instance.
pub trait TerminalService: Send + Sync {
    fn terminal(&self, terminal_id: &TerminalId) -> anyhow::Result<Arc<dyn BleTerminal>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_raw() -> RawVehicleStats {
        RawVehicleStats {
            odometer: Some(1200.0),
            engine_hours: Some(40),
            engine_rpm: Some(0),
            fuel_level: Some(80),
            hazards_is_on: Some(false),
            indicators: Some(0),
            brakes_is_active: Some(false),
            hand_brake_is_active: Some(true),
            lights_is_on: Some(false),
            driver_door_is_open: Some(false),
            passenger_door_is_open: Some(false),
            driver_seatbelt_is_engage: Some(false),
            passenger_seatbelt_is_engage: Some(false),
            horn_is_active: Some(false),
        }
    }

    #[test]
    fn complete_raw_stats_convert() {
        let stats = full_raw().into_stats().expect("complete");
        assert_eq!(stats.fuel_level, 80);
        assert!(stats.hand_brake_is_active);
        assert_eq!(RawVehicleStats::from(&stats), full_raw());
    }

    #[test]
    fn missing_field_is_named() {
        let mut raw = full_raw();
        raw.fuel_level = None;
        assert_eq!(raw.into_stats(), Err(MissingStatsField("fuelLevel")));
    }

    #[test]
    fn rssi_buckets() {
        assert_eq!(SignalStrength::from_rssi(-50), SignalStrength::Excellent);
        assert_eq!(SignalStrength::from_rssi(-80), SignalStrength::Fair);
        assert_eq!(SignalStrength::from_rssi(-100), SignalStrength::Weak);
        assert_eq!(SignalStrength::from_rssi(-127), SignalStrength::Unknown);
    }
}
