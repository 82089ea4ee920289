use std::{sync::Arc, time::Duration};

use shared::{
    domain::{ActionKind, IgnitionState, LockState, TerminalId},
    error::BridgeError,
    protocol::{CommandReply, ReplyPayload},
};
use terminal::BleTerminal;
use tokio::{
    sync::{mpsc, RwLock},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    correlator::{sweep_task, Correlator, CorrelatorConfig, ReplyHandle},
    delegate::{MailboxDelegate, TerminalEvent},
    outcome::{self, Dispatch, SignalReading, DISCONNECTED_MARKER, KEY_REMOVED_MARKER},
};

/// Extra time granted to a connect request beyond the caller's scan timeout.
const CONNECT_GRACE: Duration = Duration::from_secs(5);

/// One terminal binding: the terminal, its correlator and the tasks that
/// feed the correlator.
pub struct TerminalFacade {
    terminal: Arc<dyn BleTerminal>,
    correlator: Arc<Correlator>,
    signal: Arc<RwLock<Option<SignalReading>>>,
    pump: JoinHandle<()>,
    sweep: JoinHandle<()>,
}

impl TerminalFacade {
    /// Registers a fresh delegate on `terminal` and starts the event pump
    /// and timeout sweep. Must be called from within a tokio runtime.
    pub fn bind(terminal: Arc<dyn BleTerminal>, config: CorrelatorConfig) -> Self {
        let correlator = Arc::new(Correlator::new(config));
        let signal = Arc::new(RwLock::new(None));
        let (delegate, events) = MailboxDelegate::channel();
        terminal.set_delegate(delegate);

        let pump = tokio::spawn(pump_events(
            Arc::clone(&terminal),
            Arc::clone(&correlator),
            Arc::clone(&signal),
            events,
        ));
        let sweep = tokio::spawn(sweep_task(Arc::clone(&correlator)));

        info!(terminal_id = %terminal.terminal_id(), "terminal bound");
        Self {
            terminal,
            correlator,
            signal,
            pump,
            sweep,
        }
    }

    pub fn terminal_id(&self) -> &TerminalId {
        self.terminal.terminal_id()
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    pub async fn last_signal(&self) -> Option<SignalReading> {
        *self.signal.read().await
    }

    pub async fn save_auth_key(&self, auth_key: &str, handle: ReplyHandle) -> Result<(), BridgeError> {
        self.correlator.issue(ActionKind::SaveAuthKey, handle).await?;
        self.terminal.save_auth_key(auth_key);
        Ok(())
    }

    /// A scan timeout also bounds the correlation deadline, plus a short grace.
    pub async fn connect(
        &self,
        scan_timeout: Option<Duration>,
        handle: ReplyHandle,
    ) -> Result<(), BridgeError> {
        let deadline = scan_timeout.map(|timeout| timeout.saturating_add(CONNECT_GRACE));
        self.correlator
            .issue_with_timeout(ActionKind::ScanAndConnect, handle, deadline)
            .await?;
        self.terminal.connect(scan_timeout);
        Ok(())
    }

    pub async fn disconnect(&self, handle: ReplyHandle) -> Result<(), BridgeError> {
        self.correlator.issue(ActionKind::Disconnect, handle).await?;
        self.terminal.disconnect();
        Ok(())
    }

    /// Issues one of the device commands; the terminal call is made only
    /// once the request owns its slot.
    pub async fn send_action(&self, kind: ActionKind, handle: ReplyHandle) -> Result<(), BridgeError> {
        if kind == ActionKind::GetVehicleStats {
            self.correlator.issue(kind, handle).await?;
            self.terminal.get_vehicle_stats();
            return Ok(());
        }

        let Some(action) = outcome::device_action(kind) else {
            let err = BridgeError::NotIssuable(kind);
            handle.deliver(Err(err.clone()));
            return Err(err);
        };
        self.correlator.issue(kind, handle).await?;
        self.terminal.send_action(action);
        Ok(())
    }

    pub fn auth_key(&self) -> CommandReply {
        self.terminal
            .auth_key()
            .map(ReplyPayload::Text)
            .ok_or(BridgeError::NoAuthKey)
    }

    pub fn remove_auth_key(&self) -> CommandReply {
        self.terminal.remove_auth_key();
        if self.terminal.has_key() {
            warn!(terminal_id = %self.terminal_id(), "auth key still present after removal");
            return Err(BridgeError::KeyRemoval);
        }
        Ok(ReplyPayload::text(KEY_REMOVED_MARKER))
    }

    pub fn lock_state(&self) -> LockState {
        self.terminal.lock_state()
    }

    pub fn ignition_state(&self) -> IgnitionState {
        self.terminal.ignition_state()
    }

    /// Ends the binding; requests still pending fail with `Superseded`.
    pub async fn release(self) -> usize {
        let released = self
            .correlator
            .abort_pending(None, BridgeError::Superseded)
            .await;
        info!(terminal_id = %self.terminal_id(), released, "terminal binding released");
        released
    }
}

impl Drop for TerminalFacade {
    fn drop(&mut self) {
        self.pump.abort();
        self.sweep.abort();
    }
}

async fn pump_events(
    terminal: Arc<dyn BleTerminal>,
    correlator: Arc<Correlator>,
    signal: Arc<RwLock<Option<SignalReading>>>,
    mut events: mpsc::UnboundedReceiver<TerminalEvent>,
) {
    while let Some(event) = events.recv().await {
        match outcome::dispatch(event, terminal.as_ref()) {
            Dispatch::Resolve { kind, reply } => {
                correlator.resolve(kind, reply).await;
            }
            Dispatch::Disconnected => {
                on_disconnected(&correlator).await;
            }
            Dispatch::Report(error) => {
                warn!(terminal_id = %terminal.terminal_id(), error = %error, "terminal reported failure");
                correlator.report(error).await;
            }
            Dispatch::Signal(reading) => {
                debug!(rssi = reading.rssi, strength = ?reading.strength, "signal update");
                *signal.write().await = Some(reading);
            }
        }
    }
    debug!(terminal_id = %terminal.terminal_id(), "terminal event pump finished");
}

/// No device responses can follow a disconnect, so every other pending
/// entry is failed before the disconnect itself is answered.
async fn on_disconnected(correlator: &Correlator) {
    correlator
        .abort_pending(Some(ActionKind::Disconnect), BridgeError::Aborted)
        .await;

    if correlator.is_pending(ActionKind::Disconnect).await {
        correlator
            .resolve(
                ActionKind::Disconnect,
                Ok(ReplyPayload::text(DISCONNECTED_MARKER)),
            )
            .await;
    } else {
        info!("terminal disconnected without a pending request");
        correlator.report(BridgeError::UnsolicitedDisconnect).await;
    }
}

#[cfg(test)]
#[path = "tests/facade_tests.rs"]
mod tests;
