//! Firmware model behind the simulated controller.
//!
//! Answers each request frame the way controller firmware does:
//! - configuration images are adopted and their id echoed
//! - a changed counter-reset id zeroes the counter and echoes the id
//! - a changed motor command id starts an enhanced move over `distance`
//!   encoder steps (zero distance stops the motor and completes at once)
//! - running moves advance `speed / 16` steps per exchange; slaves move with
//!   their master's speed
//! - finished moves hold position while their distance stays set
//! - plainly driven full-bridge motors tick their counter with the duty

use std::collections::VecDeque;
use tracing::{debug, trace};
use txt_common::consts::{NUM_COUNTERS, NUM_INPUTS, NUM_MOTORS};
use txt_common::ids::{Input, InterfaceId, Motor, MotorMode};
use txt_common::transfer_area::{IrState, TaConfig, TaInput, TaOutput};

use crate::codec::{InterfaceRequest, InterfaceResponse, RequestFrame, ResponseFrame};

/// Encoder steps advanced per exchange for every 16 units of duty.
const STEP_DIVISOR: u16 = 16;

/// Duty needed per counter tick when a motor runs without a target.
const FREE_RUN_DIVISOR: u16 = 64;

/// Enhanced move in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActiveMove {
    cmd_id: u16,
    target: u16,
}

/// Emulated firmware state of one interface.
#[derive(Debug, Clone, Default)]
pub struct SimInterface {
    /// Input image reported on the next response.
    pub input: TaInput,
    /// Configuration firmware runs with.
    pub config: TaConfig,
    /// Do not echo configuration ids.
    pub withhold_config_echo: bool,
    /// Run moves and resets but never report them finished.
    pub hold_completions: bool,
    scripts: [VecDeque<i16>; NUM_INPUTS],
    moves: [Option<ActiveMove>; NUM_MOTORS],
    seen_motor_cmd: [u16; NUM_MOTORS],
    seen_reset_cmd: [u16; NUM_COUNTERS],
    held_motor_cmd: [Option<u16>; NUM_MOTORS],
    held_reset_cmd: [Option<u16>; NUM_COUNTERS],
}

impl SimInterface {
    /// Set a universal input value as the sensor would report it.
    pub fn set_input(&mut self, input: Input, value: i16) {
        self.input.uni[input.index()] = self.evaluate(input, value);
    }

    /// Queue values applied to `input`, one per exchange.
    pub fn script_input(&mut self, input: Input, values: impl IntoIterator<Item = i16>) {
        self.scripts[input.index()].extend(values);
    }

    /// Set the state of an IR receiver channel.
    pub fn set_ir(&mut self, channel: usize, state: IrState) {
        if let Some(slot) = self.input.ir.get_mut(channel) {
            *slot = state;
        }
    }

    /// Publish completions held back while `hold_completions` was set.
    pub fn release_completions(&mut self) {
        for i in 0..NUM_MOTORS {
            if let Some(id) = self.held_motor_cmd[i].take() {
                self.input.motor_ex_reached[i] = true;
                self.input.motor_ex_cmd_id[i] = id;
            }
        }
        for i in 0..NUM_COUNTERS {
            if let Some(id) = self.held_reset_cmd[i].take() {
                self.input.cnt_resetted[i] = true;
                self.input.cnt_reset_cmd_id[i] = id;
            }
        }
    }

    fn evaluate(&self, input: Input, value: i16) -> i16 {
        if self.config.uni[input.index()].digital {
            i16::from(value != 0)
        } else {
            value
        }
    }

    /// Process one request entry and produce the next input image.
    fn step(&mut self, request: &InterfaceRequest) -> TaInput {
        if let Some(config) = request.config {
            self.config = config;
        }
        if !self.withhold_config_echo {
            self.input.config_id = request.config_id;
        }

        for input in Input::ALL {
            if let Some(value) = self.scripts[input.index()].pop_front() {
                self.input.uni[input.index()] = self.evaluate(*input, value);
            }
        }

        let output = &request.output;
        self.handle_counter_resets(output);
        self.handle_motor_commands(output);
        self.advance(output);
        self.input
    }

    fn handle_counter_resets(&mut self, output: &TaOutput) {
        for i in 0..NUM_COUNTERS {
            let id = output.cnt_reset_cmd_id[i];
            if id == self.seen_reset_cmd[i] {
                continue;
            }
            self.seen_reset_cmd[i] = id;
            self.input.counter[i] = 0;
            if self.hold_completions {
                self.input.cnt_resetted[i] = false;
                self.held_reset_cmd[i] = Some(id);
            } else {
                self.input.cnt_resetted[i] = true;
                self.input.cnt_reset_cmd_id[i] = id;
            }
            debug!("Sim: counter C{} reset (cmd {})", i + 1, id);
        }
    }

    fn handle_motor_commands(&mut self, output: &TaOutput) {
        for motor in Motor::ALL {
            let i = motor.index();
            let id = output.motor_ex_cmd_id[i];
            if id == self.seen_motor_cmd[i] {
                continue;
            }
            self.seen_motor_cmd[i] = id;
            self.input.motor_ex_reached[i] = false;
            let target = output.distance[i];
            if target == 0 {
                self.moves[i] = None;
                self.complete_move(*motor, id);
                debug!("Sim: {} stopped (cmd {})", motor, id);
            } else {
                // The encoder counter restarts with every enhanced move.
                self.input.counter[motor.counter().index()] = 0;
                self.moves[i] = Some(ActiveMove { cmd_id: id, target });
                debug!("Sim: {} moving {} steps (cmd {})", motor, target, id);
            }
        }
    }

    fn advance(&mut self, output: &TaOutput) {
        for motor in Motor::ALL {
            let i = motor.index();
            let counter = motor.counter().index();
            let speed = match output.master_of(*motor) {
                Some(master) => output.motor_speed(master),
                None => output.motor_speed(*motor),
            }
            .unsigned_abs();

            match self.moves[i] {
                Some(active) => {
                    let step = (speed / STEP_DIVISOR).max(u16::from(speed > 0));
                    let position = self.input.counter[counter].saturating_add(step).min(active.target);
                    self.input.counter[counter] = position;
                    trace!("Sim: {} at {}/{}", motor, position, active.target);
                    if position >= active.target {
                        self.moves[i] = None;
                        self.complete_move(*motor, active.cmd_id);
                    }
                }
                None if self.config.motor[i] == MotorMode::FullBridge
                    && output.distance[i] == 0 =>
                {
                    let ticks = speed / FREE_RUN_DIVISOR;
                    self.input.counter[counter] = self.input.counter[counter].wrapping_add(ticks);
                }
                None => {}
            }
        }
    }

    fn complete_move(&mut self, motor: Motor, cmd_id: u16) {
        let i = motor.index();
        if self.hold_completions {
            self.held_motor_cmd[i] = Some(cmd_id);
        } else {
            self.input.motor_ex_reached[i] = true;
            self.input.motor_ex_cmd_id[i] = cmd_id;
        }
    }
}

/// Firmware model for the local controller and its extensions.
#[derive(Debug, Clone)]
pub struct SimFirmware {
    interfaces: Vec<SimInterface>,
}

impl SimFirmware {
    /// Model with `count` interfaces.
    pub fn new(count: usize) -> Self {
        Self {
            interfaces: vec![SimInterface::default(); count],
        }
    }

    /// Number of emulated interfaces.
    pub fn count(&self) -> usize {
        self.interfaces.len()
    }

    /// Emulated state of one interface.
    pub fn interface(&self, id: InterfaceId) -> Option<&SimInterface> {
        self.interfaces.get(id.index())
    }

    /// Mutable emulated state of one interface.
    pub fn interface_mut(&mut self, id: InterfaceId) -> Option<&mut SimInterface> {
        self.interfaces.get_mut(id.index())
    }

    /// All emulated interfaces.
    pub fn interfaces_mut(&mut self) -> impl Iterator<Item = &mut SimInterface> {
        self.interfaces.iter_mut()
    }

    /// Answer one request. Entries for unknown interfaces are left out.
    pub fn handle(&mut self, request: &RequestFrame) -> ResponseFrame {
        let mut response = ResponseFrame::new(request.seq);
        for entry in &request.interfaces {
            let Some(sim) = self.interfaces.get_mut(entry.interface as usize) else {
                continue;
            };
            let input = sim.step(entry);
            // Capacity matches the request list; push cannot overflow.
            let _ = response.push(InterfaceResponse {
                interface: entry.interface,
                input,
            });
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txt_common::ids::Direction;

    fn request(output: TaOutput, config_id: u16) -> RequestFrame {
        let mut frame = RequestFrame::new(1);
        frame
            .push(InterfaceRequest {
                interface: 0,
                config_id,
                config: Some(TaConfig::default()),
                output,
            })
            .unwrap();
        frame
    }

    #[test]
    fn config_id_is_echoed() {
        let mut fw = SimFirmware::new(1);
        let response = fw.handle(&request(TaOutput::default(), 7));
        assert_eq!(response.input_for(0).unwrap().config_id, 7);
    }

    #[test]
    fn withheld_echo_keeps_old_id() {
        let mut fw = SimFirmware::new(1);
        fw.interface_mut(InterfaceId::LocalIo).unwrap().withhold_config_echo = true;
        let response = fw.handle(&request(TaOutput::default(), 7));
        assert_eq!(response.input_for(0).unwrap().config_id, 0);
    }

    #[test]
    fn distance_move_completes_at_target() {
        let mut fw = SimFirmware::new(1);
        let mut out = TaOutput::default();
        out.set_motor_direction(Motor::M1, 256, Direction::Cw);
        out.distance[0] = 40;
        out.motor_ex_cmd_id[0] = 1;

        let first = *fw.handle(&request(out, 0)).input_for(0).unwrap();
        assert_eq!(first.counter[0], 16);
        assert!(!first.motor_ex_reached[0]);

        fw.handle(&request(out, 0));
        let done = *fw.handle(&request(out, 0)).input_for(0).unwrap();
        assert_eq!(done.counter[0], 40);
        assert!(done.motor_ex_reached[0]);
        assert_eq!(done.motor_ex_cmd_id[0], 1);
    }

    #[test]
    fn finished_move_holds_until_distance_cleared() {
        let mut fw = SimFirmware::new(1);
        let mut out = TaOutput::default();
        out.set_motor_speed(Motor::M2, 512);
        out.distance[1] = 32;
        out.motor_ex_cmd_id[1] = 1;
        for _ in 0..4 {
            fw.handle(&request(out, 0));
        }
        assert_eq!(fw.handle(&request(out, 0)).input_for(0).unwrap().counter[1], 32);

        out.distance[1] = 0;
        let input = *fw.handle(&request(out, 0)).input_for(0).unwrap();
        assert_eq!(input.counter[1], 32 + 512 / FREE_RUN_DIVISOR);
    }

    #[test]
    fn slave_follows_master_speed() {
        let mut fw = SimFirmware::new(1);
        let mut out = TaOutput::default();
        out.set_motor_speed(Motor::M1, 256);
        out.set_motor_speed(Motor::M2, 16);
        out.master[1] = 1;
        out.distance = [100, 100, 0, 0];
        out.motor_ex_cmd_id[0] = 1;
        out.motor_ex_cmd_id[1] = 1;

        let input = *fw.handle(&request(out, 0)).input_for(0).unwrap();
        assert_eq!(input.counter[0], input.counter[1]);
    }

    #[test]
    fn counter_reset_and_held_completion() {
        let mut fw = SimFirmware::new(1);
        let sim = fw.interface_mut(InterfaceId::LocalIo).unwrap();
        sim.input.counter[2] = 99;
        sim.hold_completions = true;

        let mut out = TaOutput::default();
        out.cnt_reset_cmd_id[2] = 1;
        let input = *fw.handle(&request(out, 0)).input_for(0).unwrap();
        assert_eq!(input.counter[2], 0);
        assert_eq!(input.cnt_reset_cmd_id[2], 0);

        fw.interface_mut(InterfaceId::LocalIo).unwrap().release_completions();
        let input = *fw.handle(&request(out, 0)).input_for(0).unwrap();
        assert!(input.cnt_resetted[2]);
        assert_eq!(input.cnt_reset_cmd_id[2], 1);
    }

    #[test]
    fn scripted_values_apply_one_per_exchange() {
        let mut fw = SimFirmware::new(1);
        fw.interface_mut(InterfaceId::LocalIo)
            .unwrap()
            .script_input(Input::I4, [0, 1]);
        let out = TaOutput::default();
        assert_eq!(fw.handle(&request(out, 0)).input_for(0).unwrap().uni[3], 0);
        assert_eq!(fw.handle(&request(out, 0)).input_for(0).unwrap().uni[3], 1);
        assert_eq!(fw.handle(&request(out, 0)).input_for(0).unwrap().uni[3], 1);
    }

    #[test]
    fn unknown_interface_left_out() {
        let mut fw = SimFirmware::new(1);
        let mut frame = RequestFrame::new(3);
        frame
            .push(InterfaceRequest {
                interface: 1,
                config_id: 0,
                config: None,
                output: TaOutput::default(),
            })
            .unwrap();
        assert!(fw.handle(&frame).interfaces.is_empty());
    }
}
