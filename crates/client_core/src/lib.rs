use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use shared::{
    domain::{LockState, TerminalId},
    error::{BridgeError, FailurePayload},
    protocol::{parse_device_action, BridgeCommand, CommandReply, ReplyPayload},
};
use storage::TerminalBindingStore;
use terminal::TerminalService;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};

pub mod correlator;
pub mod delegate;
pub mod facade;
pub mod outcome;

pub use correlator::{
    Correlator, CorrelatorConfig, ErrorSink, ReplyHandle, ReplyTarget, StatsSnapshot,
};
pub use facade::TerminalFacade;
pub use outcome::SignalReading;

/// Caller side of one correlated command.
pub struct PendingReply {
    rx: oneshot::Receiver<CommandReply>,
}

impl PendingReply {
    pub fn channel() -> (ReplyHandle, Self) {
        let (tx, rx) = oneshot::channel();
        (Box::new(tx), Self { rx })
    }

    /// A reply that is known before anything is issued.
    pub fn ready(reply: CommandReply) -> Self {
        let (handle, pending) = Self::channel();
        handle.deliver(reply);
        pending
    }

    pub async fn wait(self) -> CommandReply {
        self.rx.await.unwrap_or_else(|_| {
            Err(BridgeError::Internal(
                "request dropped without a result".to_string(),
            ))
        })
    }
}

/// Stream of terminal-level failures handed out by `initErrorHandler`.
pub struct ErrorReports {
    rx: mpsc::UnboundedReceiver<BridgeError>,
}

impl ErrorReports {
    pub async fn next(&mut self) -> Option<FailurePayload> {
        self.rx.recv().await.map(FailurePayload::from)
    }

    pub fn try_next(&mut self) -> Option<FailurePayload> {
        self.rx.try_recv().ok().map(FailurePayload::from)
    }
}

pub enum BridgeResponse {
    Reply(PendingReply),
    ErrorReports(ErrorReports),
}

/// Caller-facing entry point: owns the terminal binding and routes every
/// command either to the bound facade or to an immediate reply.
pub struct LockBridge {
    service: Arc<dyn TerminalService>,
    store: Arc<dyn TerminalBindingStore>,
    config: CorrelatorConfig,
    binding: RwLock<Option<TerminalFacade>>,
    error_sink: Mutex<Option<ErrorSink>>,
}

impl LockBridge {
    pub fn new(
        service: Arc<dyn TerminalService>,
        store: Arc<dyn TerminalBindingStore>,
        config: CorrelatorConfig,
    ) -> Self {
        Self {
            service,
            store,
            config,
            binding: RwLock::new(None),
            error_sink: Mutex::new(None),
        }
    }

    /// Rebinds the persisted terminal, if one was configured earlier.
    pub async fn restore(&self) -> Result<Option<TerminalId>> {
        let Some(terminal_id) = self
            .store
            .load_terminal_id()
            .await
            .context("failed to load persisted terminal id")?
        else {
            debug!("no persisted terminal binding");
            return Ok(None);
        };

        self.bind(&terminal_id)
            .await
            .with_context(|| format!("failed to restore terminal {terminal_id}"))?;
        info!(terminal_id = %terminal_id, "restored terminal binding");
        Ok(Some(terminal_id))
    }

    pub async fn configure(&self, raw_terminal_id: &str) -> CommandReply {
        let terminal_id = TerminalId::parse(raw_terminal_id)?;
        self.bind(&terminal_id)
            .await
            .map_err(|err| BridgeError::Internal(format!("{err:#}")))?;
        self.store
            .save_terminal_id(&terminal_id)
            .await
            .map_err(|err| BridgeError::Internal(format!("{err:#}")))?;
        info!(terminal_id = %terminal_id, "terminal configured");
        Ok(ReplyPayload::text(outcome::CONFIGURED_MARKER))
    }

    async fn bind(&self, terminal_id: &TerminalId) -> Result<()> {
        let terminal = self
            .service
            .terminal(terminal_id)
            .with_context(|| format!("terminal {terminal_id} unavailable"))?;
        let facade = TerminalFacade::bind(terminal, self.config.clone());

        // Held until the facade is published so a concurrent error handler
        // registration lands on either the old or the new binding's sink.
        let sink = self.error_sink.lock().await;
        if let Some(sink) = sink.clone() {
            facade.correlator().register_error_sink(sink).await;
        }
        let previous = self.binding.write().await.replace(facade);
        drop(sink);

        if let Some(previous) = previous {
            let released = previous.release().await;
            if released > 0 {
                warn!(released, "pending requests superseded by new terminal binding");
            }
        }
        Ok(())
    }

    pub async fn terminal_id(&self) -> Option<TerminalId> {
        self.binding
            .read()
            .await
            .as_ref()
            .map(|facade| facade.terminal_id().clone())
    }

    pub async fn save_auth_key(&self, auth_key: &str) -> PendingReply {
        let (handle, pending) = PendingReply::channel();
        let binding = self.binding.read().await;
        match binding.as_ref() {
            Some(facade) => log_rejection(facade.save_auth_key(auth_key, handle).await),
            None => {
                handle.deliver(Err(BridgeError::NotConfigured));
            }
        }
        pending
    }

    pub async fn get_auth_key(&self) -> CommandReply {
        let binding = self.binding.read().await;
        binding
            .as_ref()
            .ok_or(BridgeError::NotConfigured)?
            .auth_key()
    }

    pub async fn scan_and_connect(&self, scan_timeout: Option<Duration>) -> PendingReply {
        let (handle, pending) = PendingReply::channel();
        let binding = self.binding.read().await;
        match binding.as_ref() {
            Some(facade) => log_rejection(facade.connect(scan_timeout, handle).await),
            None => {
                handle.deliver(Err(BridgeError::NotConfigured));
            }
        }
        pending
    }

    pub async fn disconnect(&self) -> PendingReply {
        let (handle, pending) = PendingReply::channel();
        let binding = self.binding.read().await;
        match binding.as_ref() {
            Some(facade) => log_rejection(facade.disconnect(handle).await),
            None => {
                handle.deliver(Err(BridgeError::NotConfigured));
            }
        }
        pending
    }

    pub async fn remove_auth_key(&self) -> CommandReply {
        let binding = self.binding.read().await;
        binding
            .as_ref()
            .ok_or(BridgeError::NotConfigured)?
            .remove_auth_key()
    }

    /// `action` is one of the caller-facing wire names (`LOCK`, `HORN`, ...).
    pub async fn send_action(&self, action: &str) -> PendingReply {
        let kind = match parse_device_action(action) {
            Ok(kind) => kind,
            Err(err) => {
                warn!(action, error = %err, "rejecting device action");
                return PendingReply::ready(Err(err));
            }
        };

        let (handle, pending) = PendingReply::channel();
        let binding = self.binding.read().await;
        match binding.as_ref() {
            Some(facade) => log_rejection(facade.send_action(kind, handle).await),
            None => {
                handle.deliver(Err(BridgeError::NotConfigured));
            }
        }
        pending
    }

    /// Replaces any earlier error handler; the new one also follows later
    /// terminal bindings.
    pub async fn init_error_handler(&self) -> ErrorReports {
        let (sink, rx) = mpsc::unbounded_channel();
        let mut current = self.error_sink.lock().await;
        let replaced = current.replace(sink.clone()).is_some();
        if let Some(facade) = self.binding.read().await.as_ref() {
            facade.correlator().register_error_sink(sink).await;
        }
        drop(current);
        debug!(replaced, "error handler registered");
        ErrorReports { rx }
    }

    /// Point read of the cached lock state; no terminal round trip.
    pub async fn get_lock_state(&self) -> CommandReply {
        let state = self
            .binding
            .read()
            .await
            .as_ref()
            .map(TerminalFacade::lock_state)
            .unwrap_or_default();
        match state {
            LockState::Locked | LockState::Unlocked => Ok(ReplyPayload::Text(state.to_string())),
            LockState::Unknown => Err(BridgeError::LockStateUnknown),
        }
    }

    pub async fn execute(&self, command: BridgeCommand) -> BridgeResponse {
        debug!(command = command.name(), "executing bridge command");
        let pending = match command {
            BridgeCommand::Configure { terminal_id } => {
                PendingReply::ready(self.configure(&terminal_id).await)
            }
            BridgeCommand::SaveAuthKey { auth_key } => self.save_auth_key(&auth_key).await,
            BridgeCommand::GetAuthKey => PendingReply::ready(self.get_auth_key().await),
            BridgeCommand::ScanAndConnectToPeripheral { timeout_seconds } => {
                self.scan_and_connect(timeout_seconds.map(Duration::from_secs))
                    .await
            }
            BridgeCommand::Disconnect => self.disconnect().await,
            BridgeCommand::RemoveAuthKey => PendingReply::ready(self.remove_auth_key().await),
            BridgeCommand::SendAction { action } => self.send_action(&action).await,
            BridgeCommand::InitErrorHandler => {
                return BridgeResponse::ErrorReports(self.init_error_handler().await)
            }
            BridgeCommand::GetLockState => PendingReply::ready(self.get_lock_state().await),
        };
        BridgeResponse::Reply(pending)
    }

    pub async fn stats(&self) -> Option<StatsSnapshot> {
        self.binding
            .read()
            .await
            .as_ref()
            .map(|facade| facade.correlator().stats())
    }

    pub async fn last_signal(&self) -> Option<SignalReading> {
        match self.binding.read().await.as_ref() {
            Some(facade) => facade.last_signal().await,
            None => None,
        }
    }
}

/// The rejection has already been delivered on the caller's handle.
fn log_rejection(result: Result<(), BridgeError>) {
    if let Err(err) = result {
        debug!(error = %err, "request rejected before reaching terminal");
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
