//! Simulated TXT controller.
//!
//! Provides an in-process firmware emulation behind the [`Transport`]
//! trait for development and testing without a physical controller.
//!
//! [`Transport`]: crate::transport::Transport

mod controller;
mod firmware;

pub use controller::{SimHandle, SimulatedController};
pub use firmware::{SimFirmware, SimInterface};
