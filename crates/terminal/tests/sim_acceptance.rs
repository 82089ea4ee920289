use std::{
    sync::{mpsc, Arc, Mutex},
    thread::{self, ThreadId},
    time::Duration,
};

use shared::domain::{LockState, TerminalId};
use terminal::{
    sim::{SimOp, NOT_CONNECTED},
    BleTerminal, DeviceAction, RawVehicleStats, ReportedAction, SdkError, SignalStrength,
    SimulatedService, SimulatedTerminal, TerminalDelegate, TerminalService,
};

const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, PartialEq)]
enum Seen {
    SavedKey(Option<SdkError>),
    Connect(Option<SdkError>),
    Action(ReportedAction, Option<SdkError>),
    Stats(bool, Option<SdkError>),
    Disconnected,
    Signal(i32, SignalStrength),
    Error(SdkError),
}

struct Recorder {
    tx: Mutex<mpsc::Sender<(ThreadId, Seen)>>,
}

impl Recorder {
    fn attach(terminal: &dyn BleTerminal) -> mpsc::Receiver<(ThreadId, Seen)> {
        let (tx, rx) = mpsc::channel();
        terminal.set_delegate(Arc::new(Recorder { tx: Mutex::new(tx) }));
        rx
    }

    fn push(&self, seen: Seen) {
        let _ = self
            .tx
            .lock()
            .unwrap()
            .send((thread::current().id(), seen));
    }
}

impl TerminalDelegate for Recorder {
    fn on_saved_key(&self, error: Option<SdkError>) {
        self.push(Seen::SavedKey(error));
    }
    fn on_connect(&self, error: Option<SdkError>) {
        self.push(Seen::Connect(error));
    }
    fn on_action(&self, action: ReportedAction, error: Option<SdkError>) {
        self.push(Seen::Action(action, error));
    }
    fn on_vehicle_stats(&self, stats: Option<RawVehicleStats>, error: Option<SdkError>) {
        self.push(Seen::Stats(stats.is_some(), error));
    }
    fn on_disconnected(&self) {
        self.push(Seen::Disconnected);
    }
    fn on_signal_update(&self, rssi: i32, strength: SignalStrength) {
        self.push(Seen::Signal(rssi, strength));
    }
    fn on_error(&self, error: SdkError) {
        self.push(Seen::Error(error));
    }
}

fn next(rx: &mpsc::Receiver<(ThreadId, Seen)>) -> Seen {
    rx.recv_timeout(WAIT).expect("callback").1
}

fn terminal() -> SimulatedTerminal {
    SimulatedTerminal::with_latency(TerminalId::parse("SIM-1").unwrap(), Duration::from_millis(1))
}

fn connect(terminal: &SimulatedTerminal, rx: &mpsc::Receiver<(ThreadId, Seen)>) {
    terminal.save_auth_key("key");
    assert_eq!(next(rx), Seen::SavedKey(None));
    terminal.connect(None);
    assert_eq!(next(rx), Seen::Connect(None));
    assert!(matches!(next(rx), Seen::Signal(-64, SignalStrength::Good)));
}

#[test]
fn callbacks_run_off_the_calling_thread() {
    let terminal = terminal();
    let rx = Recorder::attach(&terminal);

    terminal.save_auth_key("key");
    let (thread_id, seen) = rx.recv_timeout(WAIT).expect("callback");
    assert_eq!(seen, Seen::SavedKey(None));
    assert_ne!(thread_id, thread::current().id());
    assert!(terminal.has_key());
}

#[test]
fn connect_requires_a_key() {
    let terminal = terminal();
    let rx = Recorder::attach(&terminal);

    terminal.connect(Some(Duration::from_secs(1)));
    match next(&rx) {
        Seen::Connect(Some(err)) => assert_eq!(err.code, terminal::sim::AUTH_KEY_MISSING),
        other => panic!("unexpected callback {other:?}"),
    }
    assert!(!terminal.is_connected());
}

#[test]
fn actions_update_lock_state_only_when_connected() {
    let terminal = terminal();
    let rx = Recorder::attach(&terminal);

    terminal.send_action(DeviceAction::Lock);
    match next(&rx) {
        Seen::Action(ReportedAction::Known(DeviceAction::Lock), Some(err)) => {
            assert_eq!(err.code, NOT_CONNECTED)
        }
        other => panic!("unexpected callback {other:?}"),
    }
    assert_eq!(terminal.lock_state(), LockState::Unknown);

    connect(&terminal, &rx);
    terminal.send_action(DeviceAction::Lock);
    assert_eq!(
        next(&rx),
        Seen::Action(ReportedAction::Known(DeviceAction::Lock), None)
    );
    assert_eq!(terminal.lock_state(), LockState::Locked);
}

#[test]
fn scripted_failure_applies_once() {
    let terminal = terminal();
    let rx = Recorder::attach(&terminal);
    connect(&terminal, &rx);

    terminal.fail_next(SimOp::VehicleStats, SdkError::new(9, 8, "bus error"));
    terminal.get_vehicle_stats();
    assert_eq!(
        next(&rx),
        Seen::Stats(false, Some(SdkError::new(9, 8, "bus error")))
    );

    terminal.get_vehicle_stats();
    assert_eq!(next(&rx), Seen::Stats(true, None));
}

#[test]
fn stalled_calls_are_answered_after_resume() {
    let terminal = terminal();
    let rx = Recorder::attach(&terminal);
    connect(&terminal, &rx);

    terminal.stall(SimOp::Action(DeviceAction::Horn));
    terminal.send_action(DeviceAction::Horn);
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    terminal.resume(SimOp::Action(DeviceAction::Horn));
    assert_eq!(
        next(&rx),
        Seen::Action(ReportedAction::Known(DeviceAction::Horn), None)
    );
}

#[test]
fn unsolicited_events_reach_the_delegate() {
    let terminal = terminal();
    let rx = Recorder::attach(&terminal);
    connect(&terminal, &rx);

    terminal.report_unrecognized_action("TRUNK");
    assert_eq!(
        next(&rx),
        Seen::Action(ReportedAction::Unrecognized("TRUNK".into()), None)
    );
    terminal.raise_error(SdkError::new(40, 0, "adapter reset"));
    assert_eq!(next(&rx), Seen::Error(SdkError::new(40, 0, "adapter reset")));
    terminal.drop_link();
    assert_eq!(next(&rx), Seen::Disconnected);
    assert!(!terminal.is_connected());
}

#[test]
fn service_shares_one_terminal_per_id() {
    let service = SimulatedService::default();
    let id = TerminalId::parse("SIM-9").unwrap();

    let first = service.terminal(&id).expect("terminal");
    let second = service.terminal(&id).expect("terminal");
    assert_eq!(first.terminal_id(), second.terminal_id());

    service.simulated(&id).set_ignition_state("run");
    assert_eq!(second.ignition_state().to_string(), "run");
}
