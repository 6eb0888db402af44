//! Transfer-area layout.
//!
//! One [`TransferArea`] exists per logical interface. It mirrors the
//! controller's I/O image:
//! - [`TaInput`] - firmware-reported state, written only by the link worker
//! - [`TaOutput`] - desired actuator state, written only by the caller
//! - [`TaConfig`] - sensor/motor/counter modes, written only by the caller
//! - [`TaState`] - configuration version and link bookkeeping
//!
//! The layout is the schema of wire protocol version
//! [`PROTOCOL_VERSION`](crate::consts::PROTOCOL_VERSION).

use crate::command_id::CommandRecord;
use crate::consts::{DUTY_MAX, NUM_COUNTERS, NUM_INPUTS, NUM_IR_DEVICES, NUM_MOTORS, NUM_OUTPUTS};
use crate::ids::{
    ActionKind, Counter, CounterMode, Direction, Input, InputMode, IrAxis, IrDevice, Motor,
    MotorMode,
};
use serde::{Deserialize, Serialize};

/// State of one IR receiver channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IrState {
    /// Left joystick horizontal, -15..=15.
    pub left_x: i8,
    /// Left joystick vertical, -15..=15.
    pub left_y: i8,
    /// Right joystick horizontal, -15..=15.
    pub right_x: i8,
    /// Right joystick vertical, -15..=15.
    pub right_y: i8,
    /// Button bitmap (bit 0 = on, bit 1 = off).
    pub buttons: u8,
}

impl IrState {
    /// Value of one joystick axis.
    pub const fn axis(&self, axis: IrAxis) -> i8 {
        match axis {
            IrAxis::JoyLeftX => self.left_x,
            IrAxis::JoyLeftY => self.left_y,
            IrAxis::JoyRightX => self.right_x,
            IrAxis::JoyRightY => self.right_y,
        }
    }
}

/// Firmware-reported input image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaInput {
    /// Universal input values (digital 0/1, or analog in the configured unit).
    pub uni: [i16; NUM_INPUTS],
    /// Raw counter input bits.
    pub cnt_in: [bool; NUM_COUNTERS],
    /// Counter values.
    pub counter: [u16; NUM_COUNTERS],
    /// Enhanced motor command finished.
    pub motor_ex_reached: [bool; NUM_MOTORS],
    /// Echo of the last completed enhanced motor command id.
    pub motor_ex_cmd_id: [u16; NUM_MOTORS],
    /// Counter reset finished.
    pub cnt_resetted: [bool; NUM_COUNTERS],
    /// Echo of the last completed counter reset command id.
    pub cnt_reset_cmd_id: [u16; NUM_COUNTERS],
    /// IR receiver channels.
    pub ir: [IrState; NUM_IR_DEVICES],
    /// Echo of the configuration version firmware is running with.
    pub config_id: u16,
}

impl TaInput {
    /// Input value as a boolean (non-zero = set).
    #[inline]
    pub const fn binary(&self, input: Input) -> bool {
        self.uni[input.index()] != 0
    }

    /// Joystick axis of one IR channel.
    #[inline]
    pub const fn joystick(&self, device: IrDevice, axis: IrAxis) -> i8 {
        self.ir[device as usize].axis(axis)
    }
}

/// Caller-controlled output image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaOutput {
    /// Half-bridge duties, two per motor (0..=512).
    pub duty: [i16; NUM_OUTPUTS],
    /// Target distance for enhanced motor commands, in counter steps.
    pub distance: [u16; NUM_MOTORS],
    /// Master relation: 0 = none, otherwise master motor index + 1.
    pub master: [u8; NUM_MOTORS],
    /// Enhanced motor command ids (caller-incremented).
    pub motor_ex_cmd_id: [u16; NUM_MOTORS],
    /// Counter reset command ids (caller-incremented).
    pub cnt_reset_cmd_id: [u16; NUM_COUNTERS],
}

impl TaOutput {
    /// Drive a full-bridge motor with a signed speed (-512..=512, clamped).
    ///
    /// Positive values drive the first duty slot (clockwise), negative values
    /// the second.
    pub fn set_motor_speed(&mut self, motor: Motor, speed: i16) {
        let speed = speed.clamp(-DUTY_MAX, DUTY_MAX);
        let base = motor.duty_index();
        if speed >= 0 {
            self.duty[base] = speed;
            self.duty[base + 1] = 0;
        } else {
            self.duty[base] = 0;
            self.duty[base + 1] = -speed;
        }
    }

    /// Drive a motor with an unsigned speed in a direction.
    pub fn set_motor_direction(&mut self, motor: Motor, speed: u16, direction: Direction) {
        let speed = speed.min(DUTY_MAX as u16) as i16;
        match direction {
            Direction::Cw => self.set_motor_speed(motor, speed),
            Direction::Ccw => self.set_motor_speed(motor, -speed),
        }
    }

    /// Signed speed currently commanded for a motor.
    pub const fn motor_speed(&self, motor: Motor) -> i16 {
        let base = motor.duty_index();
        self.duty[base].saturating_sub(self.duty[base + 1])
    }

    /// Copy with every duty clamped to `0..=DUTY_MAX`.
    ///
    /// Raw writes through the area accessor may leave any value in `duty`;
    /// this is the image that goes on the wire.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        for duty in &mut self.duty {
            *duty = (*duty).clamp(0, DUTY_MAX);
        }
        self
    }

    /// Zero duties and distance and drop any master relation of `motor`.
    pub fn clear_motor(&mut self, motor: Motor) {
        let base = motor.duty_index();
        self.duty[base] = 0;
        self.duty[base + 1] = 0;
        self.distance[motor.index()] = 0;
        self.master[motor.index()] = 0;
    }

    /// Master of `motor`, if it is a slave.
    pub const fn master_of(&self, motor: Motor) -> Option<Motor> {
        match self.master[motor.index()] {
            0 => None,
            n => Motor::from_u8(n - 1),
        }
    }
}

/// Configuration of one universal input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UniConfig {
    /// Measurement mode.
    pub mode: InputMode,
    /// Evaluate as digital on/off.
    pub digital: bool,
}

/// Slot configuration image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaConfig {
    /// Universal input configuration.
    pub uni: [UniConfig; NUM_INPUTS],
    /// Counter configuration.
    pub cnt: [CounterMode; NUM_COUNTERS],
    /// Motor bridge configuration.
    pub motor: [MotorMode; NUM_MOTORS],
}

/// Configuration version and link bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaState {
    /// Configuration version requested by the caller.
    pub config_id: u16,
    /// Configuration version last echoed by firmware.
    pub config_id_ack: u16,
    /// Successful exchanges on this interface.
    pub exchange_count: u64,
    /// Missed exchanges (timeouts, malformed frames).
    pub miss_count: u64,
}

impl TaState {
    /// True once firmware runs with the latest staged configuration.
    #[inline]
    pub const fn is_config_committed(&self) -> bool {
        self.config_id == self.config_id_ack
    }
}

/// Complete transfer area of one logical interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransferArea {
    /// Firmware-reported state.
    pub input: TaInput,
    /// Caller-requested state.
    pub output: TaOutput,
    /// Slot configuration.
    pub config: TaConfig,
    /// Version bookkeeping.
    pub state: TaState,
}

impl TransferArea {
    /// Command record for an enhanced motor command.
    pub const fn motor_record(&self, motor: Motor) -> CommandRecord {
        let i = motor.index();
        CommandRecord::new(self.output.motor_ex_cmd_id[i], self.input.motor_ex_cmd_id[i])
    }

    /// Command record for a counter reset.
    pub const fn counter_record(&self, counter: Counter) -> CommandRecord {
        let i = counter.index();
        CommandRecord::new(self.output.cnt_reset_cmd_id[i], self.input.cnt_reset_cmd_id[i])
    }

    /// Command record by kind and raw slot index (already range-checked).
    pub fn record(&self, kind: ActionKind, slot: usize) -> CommandRecord {
        match kind {
            ActionKind::MotorEx => {
                CommandRecord::new(self.output.motor_ex_cmd_id[slot], self.input.motor_ex_cmd_id[slot])
            }
            ActionKind::CounterReset => CommandRecord::new(
                self.output.cnt_reset_cmd_id[slot],
                self.input.cnt_reset_cmd_id[slot],
            ),
        }
    }
}
