//! # TXT Link Library
//!
//! Transfer-area link to a fischertechnik TXT controller and its chained
//! extensions: a background worker that mirrors one transfer area per
//! interface to and from controller firmware, a command-id handshake for
//! acknowledged actions, and per-slot callbacks fired on observed
//! transitions.
//!
//! # Module Structure
//!
//! - [`engine`] - `TxtEngine` caller API and lifecycle
//! - [`area`] - Shared transfer areas and the caller-side view
//! - [`config_manager`] - Slot mode staging and validation
//! - [`dispatch`] - Edge detection and callback registry
//! - [`lifecycle`] - Engine state machine and status
//! - [`codec`] - Frame layout (protocol version 1)
//! - [`transport`] - `Transport` trait and the TCP transport
//! - [`frame_log`] - Append-only JSON-lines diagnostic log
//! - [`simulation`] - In-process controller emulation
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                      txt_link (single crate)                      │
//! │  ┌──────────────┐    ┌──────────────┐    ┌─────────────────────┐  │
//! │  │  TxtEngine   │───►│ SharedArea   │◄──►│  Worker (thread)    │  │
//! │  │  (caller)    │    │ Mutex per IF │    │  exchange loop      │  │
//! │  └──────┬───────┘    └──────────────┘    └──────┬──────────────┘  │
//! │         │ register                              │ dispatch        │
//! │         ▼                                       ▼                 │
//! │  ┌──────────────────┐                  ┌────────────────┐         │
//! │  │ CallbackRegistry │◄─────────────────│  Transport     │         │
//! │  └──────────────────┘                  │  (trait obj)   │         │
//! │                                        └────────────────┘         │
//! └───────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod area;
pub mod codec;
pub mod config_manager;
pub mod dispatch;
pub mod engine;
pub mod frame_log;
pub mod lifecycle;
pub mod prelude;
pub mod simulation;
pub mod transport;
mod worker;

// Re-export key types for convenience
pub use crate::engine::TxtEngine;
pub use crate::lifecycle::{EngineState, LinkStatus};
pub use crate::transport::{TcpTransport, Transport};
pub use crate::worker::LinkLostHandler;
