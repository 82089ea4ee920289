use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use shared::domain::{IgnitionState, LockState, TerminalId};
use terminal::{BleTerminal, DeviceAction, TerminalDelegate, TerminalService};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SaveAuthKey(String),
    Connect(Option<Duration>),
    Disconnect,
    SendAction(DeviceAction),
    GetVehicleStats,
    RemoveAuthKey,
}

/// Records outbound calls; callbacks are fired by the test from an OS thread.
pub struct RecordingTerminal {
    id: TerminalId,
    calls: Mutex<Vec<Call>>,
    delegate: Mutex<Option<Arc<dyn TerminalDelegate>>>,
    lock_state: Mutex<LockState>,
    auth_key: Mutex<Option<String>>,
    sticky_key: bool,
}

impl RecordingTerminal {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self::build(id, false))
    }

    /// A terminal whose key survives `remove_auth_key`.
    pub fn with_sticky_key(id: &str) -> Arc<Self> {
        let terminal = Self::build(id, true);
        *terminal.auth_key.lock().unwrap() = Some("sticky".into());
        Arc::new(terminal)
    }

    fn build(id: &str, sticky_key: bool) -> Self {
        Self {
            id: TerminalId::parse(id).unwrap(),
            calls: Mutex::new(Vec::new()),
            delegate: Mutex::new(None),
            lock_state: Mutex::new(LockState::Unknown),
            auth_key: Mutex::new(None),
            sticky_key,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_lock_state(&self, state: LockState) {
        *self.lock_state.lock().unwrap() = state;
    }

    pub fn set_auth_key(&self, key: &str) {
        *self.auth_key.lock().unwrap() = Some(key.to_string());
    }

    pub fn has_delegate(&self) -> bool {
        self.delegate.lock().unwrap().is_some()
    }

    /// Invokes the registered delegate on a separate thread, as the SDK does.
    pub fn fire(&self, callback: impl FnOnce(&dyn TerminalDelegate) + Send + 'static) {
        let delegate = self
            .delegate
            .lock()
            .unwrap()
            .clone()
            .expect("delegate registered");
        thread::spawn(move || callback(delegate.as_ref()))
            .join()
            .expect("sdk thread");
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl BleTerminal for RecordingTerminal {
    fn terminal_id(&self) -> &TerminalId {
        &self.id
    }

    fn set_delegate(&self, delegate: Arc<dyn TerminalDelegate>) {
        *self.delegate.lock().unwrap() = Some(delegate);
    }

    fn connect(&self, scan_timeout: Option<Duration>) {
        self.record(Call::Connect(scan_timeout));
    }

    fn disconnect(&self) {
        self.record(Call::Disconnect);
    }

    fn save_auth_key(&self, auth_key: &str) {
        self.record(Call::SaveAuthKey(auth_key.to_string()));
    }

    fn auth_key(&self) -> Option<String> {
        self.auth_key.lock().unwrap().clone()
    }

    fn has_key(&self) -> bool {
        self.auth_key.lock().unwrap().is_some()
    }

    fn remove_auth_key(&self) {
        self.record(Call::RemoveAuthKey);
        if !self.sticky_key {
            *self.auth_key.lock().unwrap() = None;
        }
    }

    fn send_action(&self, action: DeviceAction) {
        self.record(Call::SendAction(action));
    }

    fn get_vehicle_stats(&self) {
        self.record(Call::GetVehicleStats);
    }

    fn lock_state(&self) -> LockState {
        *self.lock_state.lock().unwrap()
    }

    fn ignition_state(&self) -> IgnitionState {
        IgnitionState("accessory".into())
    }
}

/// Hands out pre-registered recording terminals.
#[derive(Default)]
pub struct RecordingService {
    terminals: Mutex<HashMap<String, Arc<RecordingTerminal>>>,
}

impl RecordingService {
    pub fn with(terminals: &[&Arc<RecordingTerminal>]) -> Arc<Self> {
        let service = Self::default();
        for terminal in terminals {
            service
                .terminals
                .lock()
                .unwrap()
                .insert(terminal.terminal_id().to_string(), Arc::clone(*terminal));
        }
        Arc::new(service)
    }
}

impl TerminalService for RecordingService {
    fn terminal(&self, terminal_id: &TerminalId) -> anyhow::Result<Arc<dyn BleTerminal>> {
        let terminals = self.terminals.lock().unwrap();
        let terminal = terminals
            .get(terminal_id.as_str())
            .ok_or_else(|| anyhow::anyhow!("no terminal {terminal_id} in range"))?;
        Ok(Arc::clone(terminal) as Arc<dyn BleTerminal>)
    }
}

/// Polls `check` until it holds or a second has passed.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
