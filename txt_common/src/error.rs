//! Error types for link operations.

use crate::config::ConfigError;
use crate::ids::InterfaceId;
use thiserror::Error;

/// Errors surfaced by the transfer-area link.
///
/// Usage errors (`InvalidInterface`, `InvalidActuator`, `InvalidMode`,
/// `UncommittedConfig`, `InvalidState`) are reported synchronously by the
/// call that caused them and have no wire effect. `LinkLost` is recorded by
/// the worker and surfaced through the engine status. `MalformedFrame` is
/// only produced by the frame codec; the worker counts it as a miss.
#[derive(Error, Debug)]
pub enum TxtError {
    /// The channel to the controller could not be established.
    #[error("Cannot connect to {host}:{port}: {reason}")]
    Connect {
        /// Controller host
        host: String,
        /// Controller port
        port: u16,
        /// Failure description
        reason: String,
    },

    /// Interface id beyond the configured interface count.
    #[error("Invalid interface {index} (configured interfaces: {count})")]
    InvalidInterface {
        /// Requested interface index
        index: usize,
        /// Number of configured interfaces
        count: usize,
    },

    /// Slot id out of range for its category.
    #[error("Invalid {category} id {id}")]
    InvalidActuator {
        /// Slot category ("motor", "counter", ...)
        category: &'static str,
        /// Raw id that was rejected
        id: u8,
    },

    /// Requested mode is not supported by the slot or its current configuration.
    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    /// Firmware has not yet echoed the staged configuration.
    #[error("Configuration of {interface} not committed (requested {requested}, echoed {acknowledged})")]
    UncommittedConfig {
        /// Interface with pending configuration
        interface: InterfaceId,
        /// Staged configuration id
        requested: u16,
        /// Last echoed configuration id
        acknowledged: u16,
    },

    /// Consecutive-miss threshold exceeded; the worker has stopped.
    #[error("Link lost after {misses} consecutive missed exchanges")]
    LinkLost {
        /// Consecutive misses observed
        misses: u32,
    },

    /// Frame failed header or body validation.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Operation not allowed in the current engine state.
    #[error("Invalid engine state: {0}")]
    InvalidState(String),

    /// A blocking wait reached its deadline.
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Transport-level IO error
    #[error("Transport error: {source}")]
    Transport {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {source}")]
    Config {
        /// Source configuration error
        #[from]
        source: ConfigError,
    },
}

/// Result type for link operations
pub type TxtResult<T> = Result<T, TxtError>;
