//! Total mapping from terminal callbacks to caller-visible replies.

use shared::{
    domain::ActionKind,
    error::BridgeError,
    protocol::{CommandReply, ReplyPayload},
};
use terminal::{
    BleTerminal, DeviceAction, RawVehicleStats, ReportedAction, SdkError, SignalStrength,
};

use crate::delegate::TerminalEvent;

pub const SAVED_KEY_MARKER: &str = "OK";
pub const CONNECTED_MARKER: &str = "Connected";
pub const DISCONNECTED_MARKER: &str = "Disconnected";
pub const HORN_MARKER: &str = "horn ok";
pub const HEADLIGHT_MARKER: &str = "headlight ok";
pub const CONFIGURED_MARKER: &str = "Set Terminal ID successful";
pub const KEY_REMOVED_MARKER: &str = "Remove Key Successful";
pub const ERROR_HANDLER_MARKER: &str = "Error handler registered";

pub fn action_kind(action: DeviceAction) -> ActionKind {
    match action {
        DeviceAction::Lock => ActionKind::Lock,
        DeviceAction::Unlock => ActionKind::Unlock,
        DeviceAction::UnlockNoKeyFob => ActionKind::UnlockNoKeyFob,
        DeviceAction::Horn => ActionKind::Horn,
        DeviceAction::Headlight => ActionKind::Headlight,
        DeviceAction::LockState => ActionKind::LockState,
        DeviceAction::IgnitionState => ActionKind::IgnitionState,
    }
}

/// The terminal action that answers `kind` through `on_action`, if any.
pub fn device_action(kind: ActionKind) -> Option<DeviceAction> {
    match kind {
        ActionKind::Lock => Some(DeviceAction::Lock),
        ActionKind::Unlock => Some(DeviceAction::Unlock),
        ActionKind::UnlockNoKeyFob => Some(DeviceAction::UnlockNoKeyFob),
        ActionKind::Horn => Some(DeviceAction::Horn),
        ActionKind::Headlight => Some(DeviceAction::Headlight),
        ActionKind::LockState => Some(DeviceAction::LockState),
        ActionKind::IgnitionState => Some(DeviceAction::IgnitionState),
        ActionKind::SaveAuthKey
        | ActionKind::ScanAndConnect
        | ActionKind::Disconnect
        | ActionKind::GetVehicleStats
        | ActionKind::OnError => None,
    }
}

pub fn saved_key_reply(error: Option<SdkError>) -> CommandReply {
    match error {
        None => Ok(ReplyPayload::text(SAVED_KEY_MARKER)),
        Some(err) => Err(BridgeError::SaveKey {
            code: err.code,
            description: err.description,
        }),
    }
}

pub fn connect_reply(error: Option<SdkError>) -> CommandReply {
    match error {
        None => Ok(ReplyPayload::text(CONNECTED_MARKER)),
        Some(err) => Err(BridgeError::Connect {
            code: err.code,
            description: err.description,
        }),
    }
}

/// Lock and ignition values are read from the terminal after the action completed.
pub fn action_reply(
    action: DeviceAction,
    error: Option<SdkError>,
    terminal: &dyn BleTerminal,
) -> CommandReply {
    if let Some(err) = error {
        return Err(BridgeError::Action {
            kind: action_kind(action),
            action_code: err.action_code,
            code: err.code,
            description: err.description,
        });
    }

    let text = match action {
        DeviceAction::Lock
        | DeviceAction::Unlock
        | DeviceAction::UnlockNoKeyFob
        | DeviceAction::LockState => terminal.lock_state().to_string(),
        DeviceAction::Horn => HORN_MARKER.to_string(),
        DeviceAction::Headlight => HEADLIGHT_MARKER.to_string(),
        DeviceAction::IgnitionState => terminal.ignition_state().to_string(),
    };
    Ok(ReplyPayload::Text(text))
}

pub fn vehicle_stats_reply(
    stats: Option<RawVehicleStats>,
    error: Option<SdkError>,
) -> CommandReply {
    if let Some(err) = error {
        return Err(BridgeError::VehicleStats {
            action_code: err.action_code,
            code: err.code,
            description: err.description,
        });
    }
    let raw = stats.ok_or(BridgeError::StatsMissing)?;
    let snapshot = raw
        .into_stats()
        .map_err(|missing| BridgeError::StatsSerialization(missing.to_string()))?;
    Ok(ReplyPayload::Telemetry(snapshot.to_structured()?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalReading {
    pub rssi: i32,
    pub strength: SignalStrength,
}

/// What the event pump does with one terminal event.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Resolve { kind: ActionKind, reply: CommandReply },
    Disconnected,
    Report(BridgeError),
    Signal(SignalReading),
}

pub fn dispatch(event: TerminalEvent, terminal: &dyn BleTerminal) -> Dispatch {
    match event {
        TerminalEvent::SavedKey(error) => Dispatch::Resolve {
            kind: ActionKind::SaveAuthKey,
            reply: saved_key_reply(error),
        },
        TerminalEvent::Connected(error) => Dispatch::Resolve {
            kind: ActionKind::ScanAndConnect,
            reply: connect_reply(error),
        },
        TerminalEvent::Action {
            action: ReportedAction::Known(action),
            error,
        } => Dispatch::Resolve {
            kind: action_kind(action),
            reply: action_reply(action, error, terminal),
        },
        TerminalEvent::Action {
            action: ReportedAction::Unrecognized(name),
            ..
        } => Dispatch::Report(BridgeError::UnknownAction(name)),
        TerminalEvent::VehicleStats { stats, error } => Dispatch::Resolve {
            kind: ActionKind::GetVehicleStats,
            reply: vehicle_stats_reply(stats, error),
        },
        TerminalEvent::Disconnected => Dispatch::Disconnected,
        TerminalEvent::Signal { rssi, strength } => {
            Dispatch::Signal(SignalReading { rssi, strength })
        }
        TerminalEvent::Fault(err) => Dispatch::Report(BridgeError::Terminal {
            code: err.code,
            description: err.description,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use shared::{
        domain::{IgnitionState, LockState, TerminalId},
        error::ErrorCode,
    };
    use terminal::TerminalDelegate;

    use super::*;

    struct FixedTerminal {
        id: TerminalId,
        lock_state: LockState,
        ignition: &'static str,
    }

    impl FixedTerminal {
        fn new(lock_state: LockState) -> Self {
            Self {
                id: TerminalId::parse("T-1").expect("id"),
                lock_state,
                ignition: "on",
            }
        }
    }

    impl BleTerminal for FixedTerminal {
        fn terminal_id(&self) -> &TerminalId {
            &self.id
        }
        fn set_delegate(&self, _delegate: Arc<dyn TerminalDelegate>) {}
        fn connect(&self, _scan_timeout: Option<Duration>) {}
        fn disconnect(&self) {}
        fn save_auth_key(&self, _auth_key: &str) {}
        fn auth_key(&self) -> Option<String> {
            None
        }
        fn has_key(&self) -> bool {
            false
        }
        fn remove_auth_key(&self) {}
        fn send_action(&self, _action: DeviceAction) {}
        fn get_vehicle_stats(&self) {}
        fn lock_state(&self) -> LockState {
            self.lock_state
        }
        fn ignition_state(&self) -> IgnitionState {
            IgnitionState(self.ignition.to_string())
        }
    }

    fn complete_stats() -> RawVehicleStats {
        RawVehicleStats {
            odometer: Some(10.5),
            engine_hours: Some(3),
            engine_rpm: Some(900),
            fuel_level: Some(44),
            hazards_is_on: Some(false),
            indicators: Some(1),
            brakes_is_active: Some(false),
            hand_brake_is_active: Some(true),
            lights_is_on: Some(true),
            driver_door_is_open: Some(false),
            passenger_door_is_open: Some(false),
            driver_seatbelt_is_engage: Some(true),
            passenger_seatbelt_is_engage: Some(false),
            horn_is_active: Some(false),
        }
    }

    #[test]
    fn kinds_and_device_actions_agree() {
        for kind in ActionKind::ALL {
            if let Some(action) = device_action(kind) {
                assert_eq!(action_kind(action), kind);
            }
        }
        assert_eq!(device_action(ActionKind::GetVehicleStats), None);
    }

    #[test]
    fn lock_reply_reads_state_after_completion() {
        let terminal = FixedTerminal::new(LockState::Locked);
        assert_eq!(
            action_reply(DeviceAction::Lock, None, &terminal),
            Ok(ReplyPayload::text("Locked"))
        );
        assert_eq!(
            action_reply(DeviceAction::IgnitionState, None, &terminal),
            Ok(ReplyPayload::text("on"))
        );
        assert_eq!(
            action_reply(DeviceAction::Horn, None, &terminal),
            Ok(ReplyPayload::text(HORN_MARKER))
        );
    }

    #[test]
    fn action_failure_message_embeds_codes() {
        let terminal = FixedTerminal::new(LockState::Unknown);
        let reply = action_reply(
            DeviceAction::Unlock,
            Some(SdkError::new(12, 2, "timeout on link")),
            &terminal,
        );
        let err = reply.expect_err("sdk failure");
        assert_eq!(err.code(), ErrorCode::Sdk);
        assert_eq!(
            err.to_string(),
            "Action Failed, message: [2] [UNLOCK] Failed. Reason: [12]timeout on link"
        );
    }

    #[test]
    fn stats_failures_are_distinguishable() {
        let sdk = vehicle_stats_reply(None, Some(SdkError::new(5, 8, "busy")))
            .expect_err("sdk error");
        let absent = vehicle_stats_reply(None, None).expect_err("absent");
        let mut partial = complete_stats();
        partial.engine_rpm = None;
        let malformed = vehicle_stats_reply(Some(partial), None).expect_err("malformed");

        assert_eq!(sdk.code(), ErrorCode::Sdk);
        assert_eq!(absent, BridgeError::StatsMissing);
        assert_eq!(
            malformed,
            BridgeError::StatsSerialization("missing field `engineRPM`".into())
        );
        let messages = [sdk.to_string(), absent.to_string(), malformed.to_string()];
        assert_ne!(messages[0], messages[1]);
        assert_ne!(messages[1], messages[2]);
        assert_ne!(messages[0], messages[2]);
    }

    #[test]
    fn complete_stats_become_telemetry() {
        let reply = vehicle_stats_reply(Some(complete_stats()), None).expect("telemetry");
        let ReplyPayload::Telemetry(value) = reply else {
            panic!("expected telemetry");
        };
        assert_eq!(value["engineRPM"], 900);
        assert_eq!(value["fuelLevel"], 44);
        assert_eq!(value["handBrakeIsActive"], true);

        let again = vehicle_stats_reply(Some(complete_stats()), None).expect("telemetry");
        assert_eq!(again, ReplyPayload::Telemetry(value));
    }

    #[test]
    fn unrecognized_actions_and_faults_go_to_the_sink() {
        let terminal = FixedTerminal::new(LockState::Unknown);
        assert_eq!(
            dispatch(
                TerminalEvent::Action {
                    action: ReportedAction::Unrecognized("TRUNK".into()),
                    error: None,
                },
                &terminal
            ),
            Dispatch::Report(BridgeError::UnknownAction("TRUNK".into()))
        );
        assert_eq!(
            dispatch(
                TerminalEvent::Fault(SdkError::new(40, 0, "bluetooth powered off")),
                &terminal
            ),
            Dispatch::Report(BridgeError::Terminal {
                code: 40,
                description: "bluetooth powered off".into(),
            })
        );
    }

    #[test]
    fn lifecycle_events_resolve_their_kinds() {
        let terminal = FixedTerminal::new(LockState::Unknown);
        assert_eq!(
            dispatch(TerminalEvent::SavedKey(None), &terminal),
            Dispatch::Resolve {
                kind: ActionKind::SaveAuthKey,
                reply: Ok(ReplyPayload::text(SAVED_KEY_MARKER)),
            }
        );
        assert_eq!(
            dispatch(
                TerminalEvent::Connected(Some(SdkError::new(3, 0, "auth key missing"))),
                &terminal
            ),
            Dispatch::Resolve {
                kind: ActionKind::ScanAndConnect,
                reply: Err(BridgeError::Connect {
                    code: 3,
                    description: "auth key missing".into(),
                }),
            }
        );
        assert_eq!(
            dispatch(TerminalEvent::Disconnected, &terminal),
            Dispatch::Disconnected
        );
    }
}
