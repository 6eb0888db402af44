//! System-wide constants for the TXT link workspace.
//!
//! Single source of truth for slot counts, protocol limits and link defaults.
//! Imported by all crates.

use static_assertions::const_assert;

/// Maximum number of logical interfaces (local controller + 8 extensions).
pub const IF_TXT_MAX: usize = 9;

/// Universal inputs per interface (I1..I8).
pub const NUM_INPUTS: usize = 8;

/// Fast counters per interface (C1..C4).
pub const NUM_COUNTERS: usize = 4;

/// Motors per interface (M1..M4), each a full bridge over two outputs.
pub const NUM_MOTORS: usize = 4;

/// Half-bridge outputs per interface (O1..O8).
pub const NUM_OUTPUTS: usize = 2 * NUM_MOTORS;

/// IR receiver devices: "any remote" plus the four switch settings.
pub const NUM_IR_DEVICES: usize = 5;

/// Maximum magnitude of an output duty value.
pub const DUTY_MAX: i16 = 512;

/// Maximum number of slaves that can follow one master motor.
pub const MAX_SLAVES_PER_MASTER: usize = NUM_MOTORS - 1;

/// Wire protocol version spoken by this implementation.
pub const PROTOCOL_VERSION: u16 = 1;

/// Largest accepted frame payload in bytes.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Default TCP port of the transfer-area service on the controller.
pub const DEFAULT_PORT: u16 = 65000;

/// Default exchange cycle time in milliseconds.
pub const DEFAULT_CYCLE_TIME_MS: u64 = 10;

/// Default bounded wait for a firmware response in milliseconds.
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 50;

/// Default number of consecutive misses before the link is declared lost.
pub const DEFAULT_MISS_THRESHOLD: u32 = 10;

/// Default connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2000;

const_assert!(NUM_OUTPUTS == 8);
const_assert!(IF_TXT_MAX <= u8::MAX as usize);
const_assert!(DEFAULT_RESPONSE_TIMEOUT_MS > 0);
