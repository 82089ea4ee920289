use std::sync::Arc;

use terminal::{RawVehicleStats, ReportedAction, SdkError, SignalStrength, TerminalDelegate};
use tokio::sync::mpsc;
use tracing::warn;

/// A delegate callback captured on the SDK thread.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalEvent {
    SavedKey(Option<SdkError>),
    Connected(Option<SdkError>),
    Action {
        action: ReportedAction,
        error: Option<SdkError>,
    },
    VehicleStats {
        stats: Option<RawVehicleStats>,
        error: Option<SdkError>,
    },
    Disconnected,
    Signal {
        rssi: i32,
        strength: SignalStrength,
    },
    Fault(SdkError),
}

/// Forwards every callback into a channel drained by the facade's event pump.
/// Posting never blocks the calling SDK thread.
pub struct MailboxDelegate {
    tx: mpsc::UnboundedSender<TerminalEvent>,
}

impl MailboxDelegate {
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<TerminalEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn post(&self, event: TerminalEvent) {
        if let Err(err) = self.tx.send(event) {
            warn!(event = ?err.0, "terminal event pump stopped; dropping callback");
        }
    }
}

impl TerminalDelegate for MailboxDelegate {
    fn on_saved_key(&self, error: Option<SdkError>) {
        self.post(TerminalEvent::SavedKey(error));
    }

    fn on_connect(&self, error: Option<SdkError>) {
        self.post(TerminalEvent::Connected(error));
    }

    fn on_action(&self, action: ReportedAction, error: Option<SdkError>) {
        self.post(TerminalEvent::Action { action, error });
    }

    fn on_vehicle_stats(&self, stats: Option<RawVehicleStats>, error: Option<SdkError>) {
        self.post(TerminalEvent::VehicleStats { stats, error });
    }

    fn on_disconnected(&self) {
        self.post(TerminalEvent::Disconnected);
    }

    fn on_signal_update(&self, rssi: i32, strength: SignalStrength) {
        self.post(TerminalEvent::Signal { rssi, strength });
    }

    fn on_error(&self, error: SdkError) {
        self.post(TerminalEvent::Fault(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terminal::DeviceAction;

    #[tokio::test]
    async fn callbacks_from_another_thread_arrive_in_order() {
        let (delegate, mut rx) = MailboxDelegate::channel();
        let sdk_side: Arc<dyn TerminalDelegate> = delegate;

        std::thread::spawn(move || {
            sdk_side.on_connect(None);
            sdk_side.on_action(ReportedAction::Known(DeviceAction::Lock), None);
            sdk_side.on_disconnected();
        })
        .join()
        .expect("sdk thread");

        assert_eq!(rx.recv().await, Some(TerminalEvent::Connected(None)));
        assert_eq!(
            rx.recv().await,
            Some(TerminalEvent::Action {
                action: ReportedAction::Known(DeviceAction::Lock),
                error: None,
            })
        );
        assert_eq!(rx.recv().await, Some(TerminalEvent::Disconnected));
    }

    #[test]
    fn posting_after_pump_exit_is_harmless() {
        let (delegate, rx) = MailboxDelegate::channel();
        drop(rx);
        delegate.on_error(SdkError::new(9, 0, "radio off"));
    }
}
