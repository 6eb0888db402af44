//! Common re-exports for link users.

pub use crate::area::TransferAreaView;
pub use crate::dispatch::{Callback, CallbackCategory, TaEvent, callback};
pub use crate::engine::TxtEngine;
pub use crate::lifecycle::{EngineState, LinkFault, LinkStatus};
pub use crate::simulation::{SimHandle, SimulatedController};
pub use crate::transport::{TcpTransport, Transport};
pub use txt_common::prelude::*;
