//! Caller-facing engine handle.
//!
//! [`TxtEngine`] owns the shared transfer areas, the callback registry and
//! the worker thread. All operations take `&self` except the lifecycle
//! calls, so a started engine can be shared by reference with any thread
//! that issues commands.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use txt_common::command_id::CommandId;
use txt_common::config::{LinkConfig, SlotSetup};
use txt_common::error::{TxtError, TxtResult};
use txt_common::ids::{
    ActionKind, Counter, CounterMode, Direction, Input, InputMode, InterfaceId, IrAxis, IrDevice,
    Motor, MotorMode, Output,
};
use txt_common::consts::{DUTY_MAX, NUM_COUNTERS, NUM_MOTORS};
use txt_common::transfer_area::TransferArea;

use crate::area::TransferAreaView;
use crate::config_manager::{
    ensure_committed, ensure_full_bridge, ensure_half_bridge, stage_counter_mode, stage_input_mode,
    stage_motor_mode,
};
use crate::dispatch::{Callback, CallbackCategory, CallbackKey};
use crate::frame_log::FrameLog;
use crate::lifecycle::{EngineState, LinkEvent, LinkFault, LinkStatus, TransitionResult};
use crate::transport::{TcpTransport, Transport};
use crate::worker::{LinkShared, Worker, poll_sleep};

/// Transfer-area link to one TXT controller and its extensions.
///
/// ```rust,no_run
/// use txt_link::prelude::*;
///
/// let mut engine = TxtEngine::new(LinkConfig::new(1, "192.168.7.2", 65000))?;
/// engine.set_motor_mode(InterfaceId::LocalIo, Motor::M1, MotorMode::FullBridge, None)?;
/// engine.start()?;
/// engine.set_motor_speed(InterfaceId::LocalIo, Motor::M1, 256)?;
/// engine.stop()?;
/// # Ok::<(), TxtError>(())
/// ```
pub struct TxtEngine {
    config: LinkConfig,
    shared: Arc<LinkShared>,
    worker: Option<JoinHandle<()>>,
}

impl TxtEngine {
    /// Create an idle engine.
    ///
    /// # Errors
    /// `Config` if the link configuration does not validate.
    pub fn new(config: LinkConfig) -> TxtResult<Self> {
        config.validate()?;
        info!(
            "TxtEngine created for {}:{} with {} interface(s)",
            config.host, config.port, config.interface_count
        );
        let shared = Arc::new(LinkShared::new(config.interface_count));
        Ok(Self {
            config,
            shared,
            worker: None,
        })
    }

    /// Link configuration.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    // ─── Lifecycle ──────────────────────────────────────────────────

    /// Connect over TCP to the configured host and start the worker.
    pub fn start(&mut self) -> TxtResult<()> {
        let transport = TcpTransport::new(self.config.host.clone(), self.config.port);
        self.start_with_transport(Box::new(transport))
    }

    /// Start the worker on a caller-supplied transport.
    ///
    /// Blocks while connecting and while the initial configuration is pushed.
    /// On failure the engine is back in `Idle` and the error is returned
    /// (`Connect` for an unreachable peer or an unacknowledged
    /// configuration).
    pub fn start_with_transport(&mut self, transport: Box<dyn Transport>) -> TxtResult<()> {
        {
            let mut control = self.shared.control.lock();
            if let TransitionResult::Rejected(reason) = control.transition(LinkEvent::Start) {
                return Err(TxtError::InvalidState(reason.to_string()));
            }
            control.status = LinkStatus {
                state: EngineState::Starting,
                ..LinkStatus::default()
            };
        }
        // A worker that ended on link loss is still joinable.
        self.join_worker();

        let frame_log = match &self.config.log_dir {
            Some(dir) => match FrameLog::open(dir, self.config.log_level) {
                Ok(log) => Some(log),
                Err(e) => {
                    self.shared.control.lock().transition(LinkEvent::ConnectFailed);
                    return Err(e);
                }
            },
            None => None,
        };
        self.shared
            .stop
            .store(false, std::sync::atomic::Ordering::SeqCst);

        info!(
            "Starting link to {}:{} via {} transport",
            self.config.host,
            self.config.port,
            transport.name()
        );
        let mut worker = Worker::new(
            Arc::clone(&self.shared),
            transport,
            self.config.clone(),
            frame_log,
        );
        if let Err(e) = worker.handshake() {
            error!("Link start failed: {}", e);
            self.shared.control.lock().transition(LinkEvent::ConnectFailed);
            return Err(e);
        }
        self.shared.control.lock().transition(LinkEvent::Connected);

        let spawned = std::thread::Builder::new()
            .name("txt-link".to_string())
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                info!("Link running");
                Ok(())
            }
            Err(e) => {
                let mut control = self.shared.control.lock();
                control.transition(LinkEvent::StopRequested);
                control.transition(LinkEvent::Drained);
                Err(e.into())
            }
        }
    }

    /// Request the worker to stop and wait until it has disconnected.
    ///
    /// Stopping an engine that is not running is a no-op. Must not be
    /// called from a callback.
    pub fn stop(&mut self) -> TxtResult<()> {
        if let Some(handle) = &self.worker {
            if handle.thread().id() == std::thread::current().id() {
                return Err(TxtError::InvalidState(
                    "stop() called from a link callback".to_string(),
                ));
            }
        }

        let requested = {
            let mut control = self.shared.control.lock();
            matches!(
                control.transition(LinkEvent::StopRequested),
                TransitionResult::Ok(_)
            )
        };
        if requested {
            info!("Stop requested");
            self.shared
                .stop
                .store(true, std::sync::atomic::Ordering::SeqCst);
        }
        self.join_worker();
        Ok(())
    }

    fn join_worker(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        if handle.join().is_err() {
            error!("Link worker panicked");
        }
        // A worker that died without reporting leaves the machine in Stopping.
        let mut control = self.shared.control.lock();
        if control.machine.state() == EngineState::Stopping {
            control.transition(LinkEvent::Drained);
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.shared.control.lock().machine.state()
    }

    /// Lifecycle state, fault and link counters.
    pub fn status(&self) -> LinkStatus {
        self.shared.control.lock().snapshot()
    }

    /// Accessor for the per-interface transfer areas.
    pub fn area(&self) -> TransferAreaView {
        TransferAreaView::new(Arc::clone(&self.shared.area))
    }

    /// Install the handler called once when the link is lost or the worker dies.
    pub fn set_link_lost_handler(&self, handler: impl Fn(u32) + Send + Sync + 'static) {
        *self.shared.link_lost.write() = Some(Arc::new(handler));
    }

    // ─── Configuration ──────────────────────────────────────────────

    /// Stage the mode of a universal input, optionally registering its
    /// change callback. Returns the new configuration id.
    pub fn set_input_mode(
        &self,
        interface: InterfaceId,
        input: Input,
        mode: InputMode,
        digital: bool,
        on_change: Option<Callback>,
    ) -> TxtResult<u16> {
        let id = self.with_area(interface, |area| stage_input_mode(area, input, mode, digital))?;
        if let Some(handler) = on_change {
            self.register_callback(interface, CallbackCategory::InputChange, input as u8, handler)?;
        }
        Ok(id)
    }

    /// Stage the bridge mode of a motor, optionally registering its
    /// reached callback.
    pub fn set_motor_mode(
        &self,
        interface: InterfaceId,
        motor: Motor,
        mode: MotorMode,
        on_reached: Option<Callback>,
    ) -> TxtResult<u16> {
        let id = self.with_area(interface, |area| stage_motor_mode(area, motor, mode))?;
        if let Some(handler) = on_reached {
            self.register_callback(interface, CallbackCategory::MotorReached, motor as u8, handler)?;
        }
        Ok(id)
    }

    /// Stage the counting mode of a counter, optionally registering its
    /// value and reset-ready callbacks.
    pub fn set_counter_mode(
        &self,
        interface: InterfaceId,
        counter: Counter,
        mode: CounterMode,
        on_count: Option<Callback>,
        on_reset_ready: Option<Callback>,
    ) -> TxtResult<u16> {
        let id = self.with_area(interface, |area| Ok(stage_counter_mode(area, counter, mode)))?;
        if let Some(handler) = on_count {
            self.register_callback(interface, CallbackCategory::CounterValue, counter as u8, handler)?;
        }
        if let Some(handler) = on_reset_ready {
            self.register_callback(
                interface,
                CallbackCategory::CounterResetReady,
                counter as u8,
                handler,
            )?;
        }
        Ok(id)
    }

    /// Stage every mode listed in a setup section.
    pub fn apply_setup(&self, setup: &SlotSetup) -> TxtResult<()> {
        for s in &setup.inputs {
            self.set_input_mode(s.interface, s.input, s.mode, s.digital, None)?;
        }
        for s in &setup.motors {
            self.set_motor_mode(s.interface, s.motor, s.mode, None)?;
        }
        for s in &setup.counters {
            self.set_counter_mode(s.interface, s.counter, s.mode, None, None)?;
        }
        debug!(
            "Applied setup: {} inputs, {} motors, {} counters",
            setup.inputs.len(),
            setup.motors.len(),
            setup.counters.len()
        );
        Ok(())
    }

    /// True once firmware has echoed the latest staged configuration.
    pub fn is_config_committed(&self, interface: InterfaceId) -> TxtResult<bool> {
        self.with_area(interface, |area| Ok(area.state.is_config_committed()))
    }

    /// Block until the staged configuration is echoed.
    pub fn wait_config_committed(
        &self,
        interface: InterfaceId,
        poll: Duration,
        timeout: Option<Duration>,
    ) -> TxtResult<()> {
        self.wait_until(poll, timeout, "configuration echo", || {
            self.is_config_committed(interface)
        })
    }

    // ─── Callbacks ──────────────────────────────────────────────────

    /// Install `handler` for `(interface, category, slot)`, replacing any
    /// previous one. `slot` is zero-based.
    pub fn register_callback(
        &self,
        interface: InterfaceId,
        category: CallbackCategory,
        slot: u8,
        handler: Callback,
    ) -> TxtResult<()> {
        self.shared.area.slot(interface)?;
        let key = CallbackKey::new(interface, category, slot);
        if self.shared.callbacks.write().register(key, handler)?.is_some() {
            debug!("Replaced callback {:?}", key);
        }
        Ok(())
    }

    /// Remove the handler for `(interface, category, slot)`. Returns whether
    /// one was installed.
    pub fn unregister_callback(
        &self,
        interface: InterfaceId,
        category: CallbackCategory,
        slot: u8,
    ) -> TxtResult<bool> {
        self.shared.area.slot(interface)?;
        category.check_slot(slot)?;
        let key = CallbackKey::new(interface, category, slot);
        Ok(self.shared.callbacks.write().unregister(&key).is_some())
    }

    // ─── Acknowledged actions ───────────────────────────────────────

    /// Request an acknowledged action by bumping its command id.
    ///
    /// # Errors
    /// - `InvalidInterface` / `InvalidActuator` for out-of-range ids
    /// - `UncommittedConfig` while the configuration is not echoed
    /// - `InvalidMode` for a motor action on a half-bridge motor
    pub fn request_action(
        &self,
        interface: InterfaceId,
        kind: ActionKind,
        slot: u8,
    ) -> TxtResult<CommandId> {
        let slot = check_action_slot(kind, slot)?;
        self.with_area(interface, |area| {
            ensure_committed(interface, area)?;
            match kind {
                ActionKind::MotorEx => {
                    let motor = motor_at(slot)?;
                    ensure_full_bridge(area, motor)?;
                    Ok(bump(&mut area.output.motor_ex_cmd_id, slot))
                }
                ActionKind::CounterReset => Ok(bump(&mut area.output.cnt_reset_cmd_id, slot)),
            }
        })
    }

    /// True when firmware has echoed the latest request of this slot.
    pub fn is_action_complete(
        &self,
        interface: InterfaceId,
        kind: ActionKind,
        slot: u8,
    ) -> TxtResult<bool> {
        let slot = check_action_slot(kind, slot)?;
        self.with_area(interface, |area| Ok(area.record(kind, slot).is_ready()))
    }

    /// Poll until the action completes.
    ///
    /// Returns `LinkLost` if the link drops while waiting, `InvalidState` if
    /// the worker has ended, and `Timeout` when `timeout` elapses first. Without a timeout the wait only ends on
    /// completion or engine shutdown.
    pub fn wait_action_complete(
        &self,
        interface: InterfaceId,
        kind: ActionKind,
        slot: u8,
        poll: Duration,
        timeout: Option<Duration>,
    ) -> TxtResult<()> {
        self.wait_until(poll, timeout, "action completion", || {
            self.is_action_complete(interface, kind, slot)
        })
    }

    /// Reset a counter.
    pub fn request_counter_reset(
        &self,
        interface: InterfaceId,
        counter: Counter,
    ) -> TxtResult<CommandId> {
        self.request_action(interface, ActionKind::CounterReset, counter as u8)
    }

    /// Move one motor `distance` encoder steps.
    ///
    /// Drops any master relation the motor had as a slave.
    pub fn request_motor_distance(
        &self,
        interface: InterfaceId,
        motor: Motor,
        distance: u16,
        direction: Direction,
        speed: u16,
    ) -> TxtResult<CommandId> {
        self.with_area(interface, |area| {
            ensure_committed(interface, area)?;
            ensure_full_bridge(area, motor)?;
            let out = &mut area.output;
            out.master[motor.index()] = 0;
            out.set_motor_direction(motor, speed, direction);
            out.distance[motor.index()] = distance;
            Ok(bump(&mut out.motor_ex_cmd_id, motor.index()))
        })
    }

    /// Synchronized distance move of `slave` following `master`.
    ///
    /// Both motors run `distance` steps at `speed`, each in its own
    /// direction. Returns the command ids of master and slave.
    #[allow(clippy::too_many_arguments)]
    pub fn request_motor_sync(
        &self,
        interface: InterfaceId,
        master: Motor,
        distance: u16,
        master_direction: Direction,
        slave: Motor,
        slave_direction: Direction,
        speed: u16,
    ) -> TxtResult<(CommandId, CommandId)> {
        if master == slave {
            return Err(TxtError::InvalidMode(format!(
                "motor {master} cannot follow itself"
            )));
        }
        self.with_area(interface, |area| {
            ensure_committed(interface, area)?;
            ensure_full_bridge(area, master)?;
            ensure_full_bridge(area, slave)?;
            let out = &mut area.output;
            if let Some(upstream) = out.master_of(master) {
                return Err(TxtError::InvalidMode(format!(
                    "motor {master} already follows {upstream}"
                )));
            }
            if Motor::ALL.iter().any(|m| out.master_of(*m) == Some(slave)) {
                return Err(TxtError::InvalidMode(format!(
                    "motor {slave} is itself a master"
                )));
            }

            out.set_motor_direction(master, speed, master_direction);
            out.set_motor_direction(slave, speed, slave_direction);
            out.distance[master.index()] = distance;
            out.distance[slave.index()] = distance;
            out.master[slave.index()] = master as u8 + 1;
            let master_id = bump(&mut out.motor_ex_cmd_id, master.index());
            let slave_id = bump(&mut out.motor_ex_cmd_id, slave.index());
            Ok((master_id, slave_id))
        })
    }

    /// Stop a motor, ending any enhanced move.
    ///
    /// Zeroes duties and distance, drops its master relation and bumps its
    /// command id so firmware reports the stop. Stopping a master stops its
    /// slaves too. Allowed while the configuration is uncommitted.
    pub fn request_motor_stop(&self, interface: InterfaceId, motor: Motor) -> TxtResult<CommandId> {
        self.with_area(interface, |area| {
            let out = &mut area.output;
            for slave in Motor::ALL {
                if out.master_of(*slave) == Some(motor) {
                    out.clear_motor(*slave);
                    bump(&mut out.motor_ex_cmd_id, slave.index());
                }
            }
            out.clear_motor(motor);
            Ok(bump(&mut out.motor_ex_cmd_id, motor.index()))
        })
    }

    // ─── Plain outputs ──────────────────────────────────────────────

    /// Drive a full-bridge motor with a signed speed (clamped to ±512).
    pub fn set_motor_speed(&self, interface: InterfaceId, motor: Motor, speed: i16) -> TxtResult<()> {
        self.with_area(interface, |area| {
            ensure_full_bridge(area, motor)?;
            area.output.set_motor_speed(motor, speed);
            Ok(())
        })
    }

    /// Drive one half-bridge output (clamped to 0..=512).
    pub fn set_output_duty(&self, interface: InterfaceId, output: Output, duty: u16) -> TxtResult<()> {
        self.with_area(interface, |area| {
            ensure_half_bridge(area, output)?;
            area.output.duty[output.index()] = duty.min(DUTY_MAX as u16) as i16;
            Ok(())
        })
    }

    // ─── Input readout ──────────────────────────────────────────────

    /// Raw universal input value.
    pub fn input_value(&self, interface: InterfaceId, input: Input) -> TxtResult<i16> {
        self.with_area(interface, |area| Ok(area.input.uni[input.index()]))
    }

    /// Universal input as on/off.
    pub fn input_binary(&self, interface: InterfaceId, input: Input) -> TxtResult<bool> {
        self.with_area(interface, |area| Ok(area.input.binary(input)))
    }

    /// Counter value.
    pub fn counter_value(&self, interface: InterfaceId, counter: Counter) -> TxtResult<u16> {
        self.with_area(interface, |area| Ok(area.input.counter[counter.index()]))
    }

    /// IR remote joystick axis (-15..=15).
    pub fn joystick(
        &self,
        interface: InterfaceId,
        device: IrDevice,
        axis: IrAxis,
    ) -> TxtResult<i8> {
        self.with_area(interface, |area| Ok(area.input.joystick(device, axis)))
    }

    // ─── Helpers ────────────────────────────────────────────────────

    fn with_area<R>(
        &self,
        interface: InterfaceId,
        f: impl FnOnce(&mut TransferArea) -> TxtResult<R>,
    ) -> TxtResult<R> {
        self.shared.area.with(interface, f)?
    }

    fn wait_until(
        &self,
        poll: Duration,
        timeout: Option<Duration>,
        what: &str,
        mut done: impl FnMut() -> TxtResult<bool>,
    ) -> TxtResult<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if done()? {
                return Ok(());
            }
            let status = self.status();
            match status.fault {
                Some(LinkFault::LinkLost { misses }) => return Err(TxtError::LinkLost { misses }),
                Some(LinkFault::WorkerPanicked) => {
                    return Err(TxtError::InvalidState(format!(
                        "link worker panicked while waiting for {what}"
                    )));
                }
                None => {}
            }
            if self.worker.as_ref().is_some_and(|handle| handle.is_finished())
                && !done()?
            {
                return Err(TxtError::InvalidState(format!(
                    "link worker exited while waiting for {what}"
                )));
            }
            if matches!(status.state, EngineState::Idle | EngineState::Stopped) {
                return Err(TxtError::InvalidState(format!(
                    "engine {:?} while waiting for {what}",
                    status.state
                )));
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(TxtError::Timeout(what.to_string()));
            }
            poll_sleep(poll);
        }
    }
}

impl Drop for TxtEngine {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.stop() {
                warn!("Stop on drop failed: {}", e);
            }
        }
    }
}

fn check_action_slot(kind: ActionKind, slot: u8) -> TxtResult<usize> {
    let (count, category) = match kind {
        ActionKind::MotorEx => (NUM_MOTORS, "motor"),
        ActionKind::CounterReset => (NUM_COUNTERS, "counter"),
    };
    if (slot as usize) < count {
        Ok(slot as usize)
    } else {
        Err(TxtError::InvalidActuator { category, id: slot })
    }
}

fn motor_at(slot: usize) -> TxtResult<Motor> {
    Motor::from_u8(slot as u8).ok_or(TxtError::InvalidActuator {
        category: "motor",
        id: slot as u8,
    })
}

fn bump(ids: &mut [u16], slot: usize) -> CommandId {
    let next = CommandId(ids[slot]).next();
    ids[slot] = next.get();
    next
}
