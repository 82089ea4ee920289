//! In-process terminal that behaves like the SDK: each outbound call is
//! answered from a separate OS thread after a configurable latency.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};

use shared::domain::{IgnitionState, LockState, TerminalId};
use tracing::debug;

use crate::{
    BleTerminal, DeviceAction, RawVehicleStats, ReportedAction, SdkError, SignalStrength,
    TerminalDelegate, TerminalService,
};

pub const NOT_CONNECTED: i32 = 1;
pub const AUTH_KEY_MISSING: i32 = 3;

const DEFAULT_LATENCY: Duration = Duration::from_millis(20);
const STATS_ACTION_CODE: i32 = 8;

/// Operation whose callback can be scripted to fail or stall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    SaveKey,
    Connect,
    Action(DeviceAction),
    VehicleStats,
}

fn action_code(action: DeviceAction) -> i32 {
    match action {
        DeviceAction::Lock => 1,
        DeviceAction::Unlock => 2,
        DeviceAction::Horn => 3,
        DeviceAction::Headlight => 4,
        DeviceAction::LockState => 5,
        DeviceAction::UnlockNoKeyFob => 6,
        DeviceAction::IgnitionState => 7,
    }
}

struct SimState {
    connected: bool,
    auth_key: Option<String>,
    lock_state: LockState,
    ignition: IgnitionState,
    stats: Option<RawVehicleStats>,
    rssi: i32,
    scripted_failures: HashMap<SimOp, SdkError>,
    stalled: HashSet<SimOp>,
    held: Vec<(SimOp, Job)>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            connected: false,
            auth_key: None,
            lock_state: LockState::Unknown,
            ignition: IgnitionState("off".to_string()),
            stats: Some(sample_stats()),
            rssi: -64,
            scripted_failures: HashMap::new(),
            stalled: HashSet::new(),
            held: Vec::new(),
        }
    }
}

fn sample_stats() -> RawVehicleStats {
    RawVehicleStats {
        odometer: Some(48213.7),
        engine_hours: Some(1290),
        engine_rpm: Some(0),
        fuel_level: Some(57),
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

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type DelegateSlot = Arc<Mutex<Option<Arc<dyn TerminalDelegate>>>>;
type Job = Box<dyn FnOnce() + Send>;

pub struct SimulatedTerminal {
    terminal_id: TerminalId,
    latency: Duration,
    state: Arc<Mutex<SimState>>,
    delegate: DelegateSlot,
}

impl SimulatedTerminal {
    pub fn new(terminal_id: TerminalId) -> Self {
        Self::with_latency(terminal_id, DEFAULT_LATENCY)
    }

    pub fn with_latency(terminal_id: TerminalId, latency: Duration) -> Self {
        Self {
            terminal_id,
            latency,
            state: Arc::new(Mutex::new(SimState::default())),
            delegate: Arc::new(Mutex::new(None)),
        }
    }

    /// The next callback for `op` reports `error` instead of succeeding.
    pub fn fail_next(&self, op: SimOp, error: SdkError) {
        lock(&self.state).scripted_failures.insert(op, error);
    }

    /// Calls for `op` are accepted but held unanswered until [`Self::resume`].
    pub fn stall(&self, op: SimOp) {
        lock(&self.state).stalled.insert(op);
    }

    /// Releases held calls for `op`; each is answered after the usual latency.
    pub fn resume(&self, op: SimOp) {
        let released: Vec<Job> = {
            let mut state = lock(&self.state);
            state.stalled.remove(&op);
            let (released, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.held)
                .into_iter()
                .partition(|(held_op, _)| *held_op == op);
            state.held = kept;
            released.into_iter().map(|(_, job)| job).collect()
        };
        debug!(
            terminal_id = %self.terminal_id,
            ?op,
            released = released.len(),
            "simulated terminal resumed"
        );
        for job in released {
            thread::spawn(job);
        }
    }

    pub fn set_vehicle_stats(&self, stats: Option<RawVehicleStats>) {
        lock(&self.state).stats = stats;
    }

    pub fn set_ignition_state(&self, ignition: impl Into<String>) {
        lock(&self.state).ignition = IgnitionState(ignition.into());
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    /// Link loss initiated by the vehicle side.
    pub fn drop_link(&self) {
        self.fire(None, |delegate, state| {
            state.connected = false;
            Box::new(move || delegate.on_disconnected())
        });
    }

    pub fn raise_error(&self, error: SdkError) {
        self.fire(None, move |delegate, _| Box::new(move || delegate.on_error(error)));
    }

    /// Reports an action this SDK build does not know how to name.
    pub fn report_unrecognized_action(&self, name: impl Into<String>) {
        let name = name.into();
        self.fire(None, move |delegate, _| {
            Box::new(move || delegate.on_action(ReportedAction::Unrecognized(name), None))
        });
    }

    pub fn emit_signal(&self, rssi: i32) {
        self.fire(None, move |delegate, state| {
            state.rssi = rssi;
            Box::new(move || delegate.on_signal_update(rssi, SignalStrength::from_rssi(rssi)))
        });
    }

    /// Runs `apply` on the SDK thread after the configured latency. `apply`
    /// mutates the terminal state and returns the callback to invoke once the
    /// state lock has been released.
    fn fire<F>(&self, op: Option<SimOp>, apply: F)
    where
        F: FnOnce(Arc<dyn TerminalDelegate>, &mut SimState) -> Box<dyn FnOnce() + Send>
            + Send
            + 'static,
    {
        let state = Arc::clone(&self.state);
        let delegate = Arc::clone(&self.delegate);
        let latency = self.latency;
        let job: Job = Box::new(move || {
            thread::sleep(latency);
            let Some(delegate) = lock(&delegate).clone() else {
                return;
            };
            let callback = {
                let mut guard = lock(&state);
                apply(delegate, &mut guard)
            };
            callback();
        });

        if let Some(op) = op {
            let mut state = lock(&self.state);
            if state.stalled.contains(&op) {
                debug!(terminal_id = %self.terminal_id, ?op, "simulated terminal holding call");
                state.held.push((op, job));
                return;
            }
        }
        thread::spawn(job);
    }
}

impl BleTerminal for SimulatedTerminal {
    fn terminal_id(&self) -> &TerminalId {
        &self.terminal_id
    }

    fn set_delegate(&self, delegate: Arc<dyn TerminalDelegate>) {
        *lock(&self.delegate) = Some(delegate);
    }

    fn connect(&self, scan_timeout: Option<Duration>) {
        debug!(terminal_id = %self.terminal_id, ?scan_timeout, "simulated scan started");
        self.fire(Some(SimOp::Connect), |delegate, state| {
            let error = state
                .scripted_failures
                .remove(&SimOp::Connect)
                .or_else(|| {
                    state
                        .auth_key
                        .is_none()
                        .then(|| SdkError::new(AUTH_KEY_MISSING, 0, "auth key missing"))
                });
            if error.is_none() {
                state.connected = true;
            }
            let rssi = state.rssi;
            Box::new(move || {
                let connected = error.is_none();
                delegate.on_connect(error);
                if connected {
                    delegate.on_signal_update(rssi, SignalStrength::from_rssi(rssi));
                }
            })
        });
    }

    fn disconnect(&self) {
        self.fire(None, |delegate, state| {
            state.connected = false;
            Box::new(move || delegate.on_disconnected())
        });
    }

    fn save_auth_key(&self, auth_key: &str) {
        let auth_key = auth_key.to_string();
        self.fire(Some(SimOp::SaveKey), move |delegate, state| {
            let error = state.scripted_failures.remove(&SimOp::SaveKey);
            if error.is_none() {
                state.auth_key = Some(auth_key);
            }
            Box::new(move || delegate.on_saved_key(error))
        });
    }

    fn auth_key(&self) -> Option<String> {
        lock(&self.state).auth_key.clone()
    }

    fn has_key(&self) -> bool {
        lock(&self.state).auth_key.is_some()
    }

    fn remove_auth_key(&self) {
        lock(&self.state).auth_key = None;
    }

    fn send_action(&self, action: DeviceAction) {
        let op = SimOp::Action(action);
        self.fire(Some(op), move |delegate, state| {
            let error = state.scripted_failures.remove(&op).or_else(|| {
                (!state.connected).then(|| {
                    SdkError::new(NOT_CONNECTED, action_code(action), "terminal not connected")
                })
            });
            if error.is_none() {
                match action {
                    DeviceAction::Lock => state.lock_state = LockState::Locked,
                    DeviceAction::Unlock | DeviceAction::UnlockNoKeyFob => {
                        state.lock_state = LockState::Unlocked
                    }
                    DeviceAction::LockState
                    | DeviceAction::IgnitionState
                    | DeviceAction::Horn
                    | DeviceAction::Headlight => {}
                }
            }
            Box::new(move || delegate.on_action(ReportedAction::Known(action), error))
        });
    }

    fn get_vehicle_stats(&self) {
        self.fire(Some(SimOp::VehicleStats), |delegate, state| {
            let error = state
                .scripted_failures
                .remove(&SimOp::VehicleStats)
                .or_else(|| {
                    (!state.connected).then(|| {
                        SdkError::new(NOT_CONNECTED, STATS_ACTION_CODE, "terminal not connected")
                    })
                });
            let stats = if error.is_none() {
                state.stats.clone()
            } else {
                None
            };
            Box::new(move || delegate.on_vehicle_stats(stats, error))
        });
    }

    fn lock_state(&self) -> LockState {
        lock(&self.state).lock_state
    }

    fn ignition_state(&self) -> IgnitionState {
        lock(&self.state).ignition.clone()
    }
}

/// Hands out one shared [`SimulatedTerminal`] per terminal identifier.
pub struct SimulatedService {
    latency: Duration,
    terminals: Mutex<HashMap<TerminalId, Arc<SimulatedTerminal>>>,
}

impl SimulatedService {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            terminals: Mutex::new(HashMap::new()),
        }
    }

    pub fn simulated(&self, terminal_id: &TerminalId) -> Arc<SimulatedTerminal> {
        let mut terminals = lock(&self.terminals);
        Arc::clone(terminals.entry(terminal_id.clone()).or_insert_with(|| {
            Arc::new(SimulatedTerminal::with_latency(
                terminal_id.clone(),
                self.latency,
            ))
        }))
    }
}

impl Default for SimulatedService {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY)
    }
}

impl TerminalService for SimulatedService {
    fn terminal(&self, terminal_id: &TerminalId) -> anyhow::Result<Arc<dyn BleTerminal>> {
        let terminal: Arc<dyn BleTerminal> = self.simulated(terminal_id);
        Ok(terminal)
    }
}
