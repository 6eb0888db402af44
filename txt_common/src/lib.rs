//! TXT Common Library
//!
//! Shared types for the TXT transfer-area link: slot ids, the transfer-area
//! layout, command-id primitives, configuration loading and errors.
//!
//! # Module Structure
//!
//! - [`consts`] - Slot counts, protocol limits and link defaults
//! - [`ids`] - Interface and slot identifiers, mode enums
//! - [`transfer_area`] - Input / output / config / state images
//! - [`command_id`] - Command-id handshake primitives
//! - [`config`] - Configuration loading traits and types
//! - [`error`] - Error taxonomy
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use txt_common::prelude::*;
//!
//! let mut area = TransferArea::default();
//! area.output.set_motor_speed(Motor::M1, 512);
//! assert!(area.motor_record(Motor::M1).is_ready());
//! ```

#![warn(missing_docs)]

pub mod command_id;
pub mod config;
pub mod consts;
pub mod error;
pub mod ids;
pub mod prelude;
pub mod transfer_area;
