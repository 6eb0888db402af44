//! Slot configuration staging and validation.
//!
//! Every accepted change is written into the area's `config` image and bumps
//! `state.config_id`. The worker keeps sending the configuration image until
//! firmware echoes that id; until then the interface is *uncommitted* and
//! acknowledged actions are refused.

use tracing::debug;
use txt_common::error::{TxtError, TxtResult};
use txt_common::ids::{Counter, CounterMode, Input, InputMode, InterfaceId, Motor, MotorMode, Output};
use txt_common::transfer_area::{TransferArea, UniConfig};

/// Stage the mode of a universal input.
///
/// # Errors
/// `InvalidMode` when `digital` is requested for a mode without a digital
/// evaluation (ultrasonic).
pub fn stage_input_mode(
    area: &mut TransferArea,
    input: Input,
    mode: InputMode,
    digital: bool,
) -> TxtResult<u16> {
    if digital && !mode.supports_digital() {
        return Err(TxtError::InvalidMode(format!(
            "input {input} cannot evaluate {mode:?} as digital"
        )));
    }
    area.config.uni[input.index()] = UniConfig { mode, digital };
    Ok(bump_config_id(area))
}

/// Stage the bridge mode of a motor slot.
///
/// The duties of the slot are zeroed so a mode switch never carries a stale
/// drive value across.
///
/// # Errors
/// `InvalidMode` when switching to half bridges while the motor takes part
/// in a master/slave relation.
pub fn stage_motor_mode(area: &mut TransferArea, motor: Motor, mode: MotorMode) -> TxtResult<u16> {
    if mode == MotorMode::HalfBridges && in_relation(area, motor) {
        return Err(TxtError::InvalidMode(format!(
            "motor {motor} is synchronized and must stay a full bridge"
        )));
    }
    area.config.motor[motor.index()] = mode;
    let base = motor.duty_index();
    area.output.duty[base] = 0;
    area.output.duty[base + 1] = 0;
    Ok(bump_config_id(area))
}

/// Stage the counting mode of a fast counter.
pub fn stage_counter_mode(area: &mut TransferArea, counter: Counter, mode: CounterMode) -> u16 {
    area.config.cnt[counter.index()] = mode;
    bump_config_id(area)
}

/// Refuse acknowledged actions while firmware runs an older configuration.
pub fn ensure_committed(interface: InterfaceId, area: &TransferArea) -> TxtResult<()> {
    if area.state.is_config_committed() {
        Ok(())
    } else {
        Err(TxtError::UncommittedConfig {
            interface,
            requested: area.state.config_id,
            acknowledged: area.state.config_id_ack,
        })
    }
}

/// Motor must be configured as a full bridge.
pub fn ensure_full_bridge(area: &TransferArea, motor: Motor) -> TxtResult<()> {
    match area.config.motor[motor.index()] {
        MotorMode::FullBridge => Ok(()),
        MotorMode::HalfBridges => Err(TxtError::InvalidMode(format!(
            "motor {motor} is configured as two half bridges"
        ))),
    }
}

/// The motor owning `output` must be configured as two half bridges.
pub fn ensure_half_bridge(area: &TransferArea, output: Output) -> TxtResult<()> {
    let motor = output.motor();
    match area.config.motor[motor.index()] {
        MotorMode::HalfBridges => Ok(()),
        MotorMode::FullBridge => Err(TxtError::InvalidMode(format!(
            "output {output} belongs to full-bridge motor {motor}"
        ))),
    }
}

fn in_relation(area: &TransferArea, motor: Motor) -> bool {
    let slot = motor.index() as u8 + 1;
    area.output.master[motor.index()] != 0 || area.output.master.contains(&slot)
}

fn bump_config_id(area: &mut TransferArea) -> u16 {
    area.state.config_id = area.state.config_id.wrapping_add(1);
    debug!("Staged config id {}", area.state.config_id);
    area.state.config_id
}
