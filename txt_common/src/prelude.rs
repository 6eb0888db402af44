//! Prelude module for common re-exports.
//!
//! This module provides convenient re-exports of commonly used types
//! so that consumers can do `use txt_common::prelude::*;` and get
//! the most important types without listing individual paths.

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{AppConfig, ConfigError, ConfigLoader, LinkConfig, LogLevel, SlotSetup};

// ─── Errors ─────────────────────────────────────────────────────────
pub use crate::error::{TxtError, TxtResult};

// ─── Identifiers ────────────────────────────────────────────────────
pub use crate::ids::{
    ActionKind, Counter, CounterMode, Direction, Input, InputMode, InterfaceId, IrAxis, IrDevice,
    Motor, MotorMode, Output,
};

// ─── Transfer area ──────────────────────────────────────────────────
pub use crate::command_id::{CommandId, CommandRecord};
pub use crate::transfer_area::{TaConfig, TaInput, TaOutput, TaState, TransferArea};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{DUTY_MAX, IF_TXT_MAX};
