//! Command-id handshake primitives.
//!
//! The link is a periodic poll/response exchange, not a confirmed RPC. The
//! caller bumps a per-slot command id to request an action; firmware echoes
//! the id back once the action has completed. Completion is plain modular
//! equality, so wrapping past `u16::MAX` is harmless.

use serde::{Deserialize, Serialize};

/// Per-slot monotonic command identifier (wraps at `u16::MAX`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(pub u16);

impl CommandId {
    /// Next id in sequence, wrapping to 0 after `u16::MAX`.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Raw value.
    #[inline]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Number of requests issued after `other` (modulo 2^16).
    #[inline]
    pub const fn distance_from(self, other: Self) -> u16 {
        self.0.wrapping_sub(other.0)
    }
}

impl From<u16> for CommandId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Requested vs. completed id pair for one actuator or counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandRecord {
    /// Id last written by the caller into the output side.
    pub requested: CommandId,
    /// Id last echoed by firmware into the input side.
    pub completed: CommandId,
}

impl CommandRecord {
    /// Build from the raw output/input fields.
    pub const fn new(requested: u16, completed: u16) -> Self {
        Self {
            requested: CommandId(requested),
            completed: CommandId(completed),
        }
    }

    /// True when firmware has echoed the most recent request.
    #[inline]
    pub const fn is_ready(&self) -> bool {
        self.requested.0 == self.completed.0
    }

    /// Requests not yet acknowledged.
    #[inline]
    pub const fn outstanding(&self) -> u16 {
        self.requested.distance_from(self.completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_wraps() {
        assert_eq!(CommandId(u16::MAX).next(), CommandId(0));
        assert_eq!(CommandId(7).next().get(), 8);
    }

    #[test]
    fn record_ready_uses_modular_equality() {
        let rec = CommandRecord::new(0, u16::MAX);
        assert!(!rec.is_ready());
        assert_eq!(rec.outstanding(), 1);

        let rec = CommandRecord::new(0, 0);
        assert!(rec.is_ready());
        assert_eq!(rec.outstanding(), 0);
    }

    #[test]
    fn default_record_is_ready() {
        assert!(CommandRecord::default().is_ready());
    }
}
