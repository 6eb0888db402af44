//! Engine integration tests against the simulated controller.
//!
//! Each test runs a real worker thread with a short cycle time and drives
//! firmware behavior (echo withholding, dropped or corrupted responses,
//! scripted inputs) through the simulator handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use parking_lot::Mutex;
use txt_common::transfer_area::IrState;
use txt_link::prelude::*;

const IF: InterfaceId = InterfaceId::LocalIo;
const MISS_THRESHOLD: u32 = 5;
const POLL: Duration = Duration::from_millis(1);
const LONG: Option<Duration> = Some(Duration::from_secs(5));

fn fast_config(interfaces: usize) -> LinkConfig {
    let mut config = LinkConfig::new(interfaces, "simulation", 0);
    config.cycle_time_ms = 2;
    config.response_timeout_ms = 5;
    config.miss_threshold = MISS_THRESHOLD;
    config
}

fn engine_with_sim(interfaces: usize) -> (TxtEngine, SimulatedController, SimHandle) {
    let engine = TxtEngine::new(fast_config(interfaces)).unwrap();
    let (sim, handle) = SimulatedController::new(interfaces);
    (engine, sim, handle)
}

fn started(interfaces: usize) -> (TxtEngine, SimHandle) {
    let (mut engine, sim, handle) = engine_with_sim(interfaces);
    engine.start_with_transport(Box::new(sim)).unwrap();
    (engine, handle)
}

fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(POLL);
    }
    cond()
}

/// Let at least `n` more exchanges reach the simulator.
fn settle(handle: &SimHandle, n: u64) {
    let target = handle.exchange_count() + n;
    assert!(wait_for(Duration::from_secs(5), || handle.exchange_count() >= target));
}

fn counting_callback() -> (Callback, Arc<Mutex<Vec<TaEvent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let cb = callback(move |event| sink.lock().push(*event));
    (cb, seen)
}

// ─── Lifecycle ──────────────────────────────────────────────────────

#[test]
fn start_pushes_config_and_runs() {
    let (mut engine, sim, handle) = engine_with_sim(1);
    engine
        .set_input_mode(IF, Input::I1, InputMode::Voltage, false, None)
        .unwrap();
    engine.start_with_transport(Box::new(sim)).unwrap();

    assert_eq!(engine.state(), EngineState::Running);
    assert!(engine.is_config_committed(IF).unwrap());
    let first = &handle.requests()[0];
    assert_eq!(first.interfaces[0].config_id, 1);
    assert!(first.interfaces[0].config.is_some());

    engine.stop().unwrap();
    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(!handle.is_connected());
}

#[test]
fn unacknowledged_config_fails_start() {
    let (mut engine, sim, handle) = engine_with_sim(1);
    engine
        .set_motor_mode(IF, Motor::M2, MotorMode::HalfBridges, None)
        .unwrap();
    handle.withhold_config_echo(IF, true);

    let result = engine.start_with_transport(Box::new(sim));
    assert!(matches!(result, Err(TxtError::Connect { .. })));
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(handle.exchange_count(), MISS_THRESHOLD as u64);
}

#[test]
fn refused_connect_leaves_engine_idle() {
    let (mut engine, sim, handle) = engine_with_sim(1);
    handle.refuse_connect(true);
    assert!(matches!(
        engine.start_with_transport(Box::new(sim)),
        Err(TxtError::Connect { .. })
    ));
    assert_eq!(engine.state(), EngineState::Idle);
}

#[test]
fn start_twice_is_rejected() {
    let (mut engine, _handle) = started(1);
    let (sim, _other) = SimulatedController::new(1);
    assert!(matches!(
        engine.start_with_transport(Box::new(sim)),
        Err(TxtError::InvalidState(_))
    ));
    engine.stop().unwrap();
}

#[test]
fn stopped_engine_restarts() {
    let (mut engine, _handle) = started(1);
    engine.stop().unwrap();

    let (sim, handle) = SimulatedController::new(1);
    engine.start_with_transport(Box::new(sim)).unwrap();
    settle(&handle, 3);
    assert_eq!(engine.state(), EngineState::Running);
    engine.stop().unwrap();
}

// ─── Command-id handshake ───────────────────────────────────────────

#[test]
fn completion_never_flaps() {
    let (mut engine, handle) = started(1);
    handle.hold_completions(IF, true);

    let id = engine.request_counter_reset(IF, Counter::C1).unwrap();
    assert_eq!(id, CommandId(1));
    for _ in 0..5 {
        settle(&handle, 1);
        assert!(!engine
            .is_action_complete(IF, ActionKind::CounterReset, 0)
            .unwrap());
    }

    handle.hold_completions(IF, false);
    engine
        .wait_action_complete(IF, ActionKind::CounterReset, 0, POLL, LONG)
        .unwrap();
    for _ in 0..5 {
        settle(&handle, 1);
        assert!(engine
            .is_action_complete(IF, ActionKind::CounterReset, 0)
            .unwrap());
    }
    engine.stop().unwrap();
}

#[test]
fn command_id_wraps_past_max() {
    let (mut engine, sim, _handle) = engine_with_sim(1);
    engine
        .area()
        .write(IF, |out| out.cnt_reset_cmd_id[2] = u16::MAX)
        .unwrap();
    engine.start_with_transport(Box::new(sim)).unwrap();
    engine
        .wait_action_complete(IF, ActionKind::CounterReset, 2, POLL, LONG)
        .unwrap();

    let id = engine.request_counter_reset(IF, Counter::C3).unwrap();
    assert_eq!(id, CommandId(0));
    engine
        .wait_action_complete(IF, ActionKind::CounterReset, 2, POLL, LONG)
        .unwrap();
    let snapshot = engine.area().snapshot(IF).unwrap();
    assert_eq!(snapshot.input.cnt_reset_cmd_id[2], 0);
    engine.stop().unwrap();
}

#[test]
fn config_change_while_running_is_staged() {
    let (mut engine, handle) = started(1);
    handle.withhold_config_echo(IF, true);

    let config_id = engine
        .set_motor_mode(IF, Motor::M1, MotorMode::FullBridge, None)
        .unwrap();
    assert!(matches!(
        engine.request_motor_distance(IF, Motor::M1, 100, Direction::Cw, 512),
        Err(TxtError::UncommittedConfig { .. })
    ));
    assert!(wait_for(Duration::from_secs(2), || {
        handle.last_request().is_some_and(|r| {
            r.interfaces[0].config_id == config_id && r.interfaces[0].config.is_some()
        })
    }));

    handle.withhold_config_echo(IF, false);
    engine
        .wait_config_committed(IF, POLL, LONG)
        .unwrap();
    engine
        .request_motor_distance(IF, Motor::M1, 100, Direction::Cw, 512)
        .unwrap();

    // Once committed the configuration image is no longer sent.
    settle(&handle, 2);
    assert!(handle.last_request().unwrap().interfaces[0].config.is_none());
    engine.stop().unwrap();
}

// ─── Miss tolerance ─────────────────────────────────────────────────

#[test]
fn misses_below_threshold_keep_running() {
    let (mut engine, handle) = started(1);
    handle.drop_responses(MISS_THRESHOLD - 1);
    settle(&handle, MISS_THRESHOLD as u64 + 3);
    assert_eq!(engine.state(), EngineState::Running);

    handle.corrupt_responses(MISS_THRESHOLD - 1);
    settle(&handle, MISS_THRESHOLD as u64 + 3);
    let status = engine.status();
    assert_eq!(status.state, EngineState::Running);
    assert_eq!(status.total_misses, 2 * (MISS_THRESHOLD as u64 - 1));
    assert_eq!(status.malformed_frames, MISS_THRESHOLD as u64 - 1);
    assert!(status.fault.is_none());
    engine.stop().unwrap();
}

#[test]
fn threshold_misses_lose_link() {
    let (mut engine, handle) = started(1);
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = Arc::clone(&calls);
        engine.set_link_lost_handler(move |misses| {
            assert_eq!(misses, MISS_THRESHOLD);
            calls.fetch_add(1, Ordering::SeqCst);
        });
    }

    handle.set_link_down(true);
    assert!(wait_for(Duration::from_secs(5), || {
        engine.state() == EngineState::Stopped
    }));
    let status = engine.status();
    assert_eq!(status.fault, Some(LinkFault::LinkLost { misses: MISS_THRESHOLD }));
    assert!(wait_for(Duration::from_secs(1), || calls.load(Ordering::SeqCst) == 1));
    assert!(!handle.is_connected());
    engine.stop().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn waiting_caller_sees_link_loss() {
    let (mut engine, handle) = started(1);
    handle.hold_completions(IF, true);
    engine.request_counter_reset(IF, Counter::C1).unwrap();
    handle.set_link_down(true);

    let result = engine.wait_action_complete(IF, ActionKind::CounterReset, 0, POLL, LONG);
    assert!(matches!(result, Err(TxtError::LinkLost { .. })));
    engine.stop().unwrap();
}

/// Simulator transport that panics on the first send after being armed.
struct FaultyTransport {
    inner: SimulatedController,
    armed: Arc<AtomicBool>,
}

impl Transport for FaultyTransport {
    fn name(&self) -> &'static str {
        "faulty"
    }

    fn connect(&mut self, timeout: Duration) -> TxtResult<()> {
        self.inner.connect(timeout)
    }

    fn send_frame(&mut self, frame: &[u8]) -> TxtResult<()> {
        if self.armed.load(Ordering::SeqCst) {
            panic!("transport fault");
        }
        self.inner.send_frame(frame)
    }

    fn recv_frame(&mut self, timeout: Duration) -> TxtResult<Option<Vec<u8>>> {
        self.inner.recv_frame(timeout)
    }

    fn disconnect(&mut self) -> TxtResult<()> {
        self.inner.disconnect()
    }
}

#[test]
fn worker_panic_stops_engine_with_fault() {
    let (mut engine, sim, handle) = engine_with_sim(1);
    let armed = Arc::new(AtomicBool::new(false));
    engine
        .start_with_transport(Box::new(FaultyTransport {
            inner: sim,
            armed: Arc::clone(&armed),
        }))
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = Arc::clone(&calls);
        engine.set_link_lost_handler(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
    }
    handle.hold_completions(IF, true);
    engine.request_counter_reset(IF, Counter::C1).unwrap();
    settle(&handle, 2);

    armed.store(true, Ordering::SeqCst);
    let result = engine.wait_action_complete(IF, ActionKind::CounterReset, 0, POLL, None);
    assert!(matches!(result, Err(TxtError::InvalidState(_))));

    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(engine.status().fault, Some(LinkFault::WorkerPanicked));
    assert!(wait_for(Duration::from_secs(1), || calls.load(Ordering::SeqCst) == 1));
    assert!(!handle.is_connected());
    engine.stop().unwrap();
}

#[test]
fn out_of_range_duties_are_clamped_on_the_wire() {
    let (mut engine, handle) = started(1);
    engine
        .area()
        .write(IF, |out| {
            out.duty[0] = 512;
            out.duty[1] = i16::MIN;
            out.duty[2] = 900;
        })
        .unwrap();
    settle(&handle, 2);

    let request = handle.last_request().unwrap();
    assert_eq!(request.interfaces[0].output.duty[..3], [512, 0, 512]);
    assert_eq!(engine.area().output(IF).unwrap().duty[1], i16::MIN);
    settle(&handle, 2);
    assert_eq!(engine.state(), EngineState::Running);
    assert!(engine.status().fault.is_none());
    engine.stop().unwrap();
}

#[test]
fn stale_responses_are_discarded() {
    let (mut engine, handle) = started(1);
    handle.inject_stale_responses(3);
    settle(&handle, 6);
    let status = engine.status();
    assert_eq!(status.total_misses, 0);
    assert_eq!(status.state, EngineState::Running);
    engine.stop().unwrap();
}

#[test]
fn wait_times_out_when_firmware_holds_completion() {
    let (mut engine, handle) = started(1);
    handle.hold_completions(IF, true);
    engine.request_counter_reset(IF, Counter::C4).unwrap();
    let result = engine.wait_action_complete(
        IF,
        ActionKind::CounterReset,
        3,
        POLL,
        Some(Duration::from_millis(30)),
    );
    assert!(matches!(result, Err(TxtError::Timeout(_))));
    engine.stop().unwrap();
}

// ─── Callbacks ──────────────────────────────────────────────────────

#[test]
fn rising_edge_fires_exactly_once() {
    let (mut engine, sim, handle) = engine_with_sim(1);
    let (cb, seen) = counting_callback();
    engine
        .set_input_mode(IF, Input::I1, InputMode::Resistance, true, Some(cb))
        .unwrap();
    engine.start_with_transport(Box::new(sim)).unwrap();

    handle.script_input(IF, Input::I1, &[0, 0, 1, 1]);
    settle(&handle, 10);

    let events = seen.lock().clone();
    assert_eq!(
        events,
        vec![TaEvent::InputChanged {
            interface: IF,
            input: Input::I1,
            value: 1,
            state: true,
        }]
    );
    assert!(engine.input_binary(IF, Input::I1).unwrap());
    engine.stop().unwrap();
}

#[test]
fn panicking_callback_does_not_stop_worker() {
    let (mut engine, handle) = started(1);
    engine
        .register_callback(
            IF,
            CallbackCategory::InputChange,
            Input::I2 as u8,
            callback(|_| panic!("callback failure")),
        )
        .unwrap();
    let (cb, seen) = counting_callback();
    engine
        .register_callback(IF, CallbackCategory::InputChange, Input::I3 as u8, cb)
        .unwrap();

    handle.set_input(IF, Input::I2, 1);
    handle.set_input(IF, Input::I3, 700);
    assert!(wait_for(Duration::from_secs(2), || seen.lock().len() == 1));
    settle(&handle, 3);
    assert_eq!(engine.state(), EngineState::Running);
    engine.stop().unwrap();
}

#[test]
fn unregistered_callback_stays_silent() {
    let (mut engine, handle) = started(1);
    let (cb, seen) = counting_callback();
    engine
        .register_callback(IF, CallbackCategory::InputChange, 0, cb)
        .unwrap();
    assert!(engine
        .unregister_callback(IF, CallbackCategory::InputChange, 0)
        .unwrap());

    handle.set_input(IF, Input::I1, 1);
    settle(&handle, 5);
    assert!(seen.lock().is_empty());
    engine.stop().unwrap();
}

// ─── Motors ─────────────────────────────────────────────────────────

#[test]
fn master_slave_move_completes_and_stops() {
    let (mut engine, handle) = started(1);
    let (cb, reached) = counting_callback();
    engine
        .register_callback(IF, CallbackCategory::MotorReached, 0, Arc::clone(&cb))
        .unwrap();
    engine
        .register_callback(IF, CallbackCategory::MotorReached, 1, cb)
        .unwrap();

    engine
        .request_motor_sync(IF, Motor::M1, 400, Direction::Cw, Motor::M2, Direction::Cw, 256)
        .unwrap();
    engine
        .wait_action_complete(IF, ActionKind::MotorEx, 0, POLL, LONG)
        .unwrap();
    engine
        .wait_action_complete(IF, ActionKind::MotorEx, 1, POLL, LONG)
        .unwrap();
    assert_eq!(engine.counter_value(IF, Counter::C1).unwrap(), 400);
    assert_eq!(engine.counter_value(IF, Counter::C2).unwrap(), 400);
    settle(&handle, 3);
    {
        let events = reached.lock();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(
            e,
            TaEvent::MotorReached { position: 400, cmd_id: CommandId(1), .. }
        )));
    }

    engine.request_motor_stop(IF, Motor::M1).unwrap();
    let out = engine.area().output(IF).unwrap();
    assert_eq!(out.duty[..4], [0, 0, 0, 0]);
    assert_eq!(out.master[1], 0);
    engine
        .wait_action_complete(IF, ActionKind::MotorEx, 0, POLL, LONG)
        .unwrap();
    engine
        .wait_action_complete(IF, ActionKind::MotorEx, 1, POLL, LONG)
        .unwrap();
    engine.stop().unwrap();
}

#[test]
fn single_motor_distance_move() {
    let (mut engine, _handle) = started(1);
    let id = engine
        .request_motor_distance(IF, Motor::M3, 100, Direction::Ccw, 512)
        .unwrap();
    assert_eq!(id, CommandId(1));
    engine
        .wait_action_complete(IF, ActionKind::MotorEx, 2, POLL, LONG)
        .unwrap();
    assert_eq!(engine.counter_value(IF, Counter::C3).unwrap(), 100);
    engine.stop().unwrap();
}

// ─── Extensions and IR ──────────────────────────────────────────────

#[test]
fn extension_inputs_and_joystick_are_mirrored() {
    let (mut engine, handle) = started(2);
    let ext = InterfaceId::RemoteIo1;
    handle.set_input(ext, Input::I3, 1234);
    handle.set_ir(
        IF,
        IrDevice::Switch2,
        IrState {
            left_x: -15,
            right_y: 7,
            ..IrState::default()
        },
    );

    assert!(wait_for(Duration::from_secs(2), || {
        engine.input_value(ext, Input::I3).unwrap() == 1234
    }));
    assert!(wait_for(Duration::from_secs(2), || {
        engine.joystick(IF, IrDevice::Switch2, IrAxis::JoyLeftX).unwrap() == -15
    }));
    assert_eq!(engine.joystick(IF, IrDevice::Switch2, IrAxis::JoyRightY).unwrap(), 7);
    assert_eq!(engine.input_value(IF, Input::I3).unwrap(), 0);
    engine.stop().unwrap();
}

// ─── Frame log ──────────────────────────────────────────────────────

#[test]
fn frame_log_records_exchanges() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config(1);
    config.log_dir = Some(dir.path().to_path_buf());
    config.log_level = LogLevel::Debug;

    let mut engine = TxtEngine::new(config).unwrap();
    let (sim, handle) = SimulatedController::new(1);
    engine.start_with_transport(Box::new(sim)).unwrap();
    settle(&handle, 5);
    engine.stop().unwrap();

    let content =
        std::fs::read_to_string(dir.path().join(txt_link::frame_log::FRAME_LOG_FILE)).unwrap();
    let kinds: Vec<String> = content
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["kind"].to_string())
        .collect();
    assert!(kinds.iter().filter(|k| k.contains("frame")).count() >= 10);
    assert!(kinds.iter().any(|k| k.contains("lifecycle")));
}
