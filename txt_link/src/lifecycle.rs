//! Engine lifecycle: Idle → Starting → Running → Stopping → Stopped.
//!
//! `Starting` falls back to `Idle` when the connect or configuration
//! handshake fails. `Running` goes straight to `Stopped` when the link is
//! lost or the worker dies. A `Stopped` engine may be started again.

use serde::Serialize;

/// Engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum EngineState {
    /// No transport, no exchange.
    #[default]
    Idle,
    /// Connecting and pushing the initial configuration.
    Starting,
    /// Worker exchanging frames every cycle.
    Running,
    /// Stop requested; worker finishing its cycle.
    Stopping,
    /// Worker halted and transport closed.
    Stopped,
}

/// Lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Caller requested start.
    Start,
    /// Connect and configuration handshake succeeded.
    Connected,
    /// Connect or handshake failed.
    ConnectFailed,
    /// Caller requested stop.
    StopRequested,
    /// Worker finished its last cycle and disconnected.
    Drained,
    /// Consecutive-miss threshold exceeded.
    LinkLost,
    /// Worker thread panicked.
    WorkerFailed,
}

/// Result of a transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition succeeded; carries the new state.
    Ok(EngineState),
    /// Transition rejected with a reason.
    Rejected(&'static str),
}

/// Fatal link condition recorded by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkFault {
    /// Consecutive-miss threshold exceeded.
    LinkLost {
        /// Consecutive misses observed
        misses: u32,
    },
    /// Worker thread panicked and the exchange loop ended.
    WorkerPanicked,
}

/// Lifecycle state holder.
#[derive(Debug, Clone, Default)]
pub struct LinkStateMachine {
    state: EngineState,
}

impl LinkStateMachine {
    /// New machine in `Idle`.
    pub const fn new() -> Self {
        Self {
            state: EngineState::Idle,
        }
    }

    /// Current state.
    #[inline]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    /// Attempt a transition given an event.
    pub fn handle_event(&mut self, event: LinkEvent) -> TransitionResult {
        use EngineState::*;
        use LinkEvent::*;

        let next = match (self.state, event) {
            (Idle, Start) | (Stopped, Start) => Starting,
            (Starting, Connected) => Running,
            (Starting, ConnectFailed) => Idle,
            (Running, StopRequested) => Stopping,
            (Stopping, Drained) => Stopped,
            // Lost while a stop was pending still ends in Stopped.
            (Running, LinkLost) | (Stopping, LinkLost) => Stopped,
            (Running, WorkerFailed) | (Stopping, WorkerFailed) => Stopped,
            _ => return TransitionResult::Rejected(invalid_transition_reason(self.state)),
        };

        self.state = next;
        TransitionResult::Ok(next)
    }

    /// Whether the worker thread may be alive in this state.
    #[inline]
    pub const fn worker_active(&self) -> bool {
        matches!(self.state, EngineState::Running | EngineState::Stopping)
    }
}

fn invalid_transition_reason(state: EngineState) -> &'static str {
    match state {
        EngineState::Idle => "Idle: only Start allowed",
        EngineState::Starting => "Starting: only Connected or ConnectFailed allowed",
        EngineState::Running => "Running: only StopRequested, LinkLost or WorkerFailed allowed",
        EngineState::Stopping => "Stopping: only Drained, LinkLost or WorkerFailed allowed",
        EngineState::Stopped => "Stopped: only Start allowed",
    }
}

/// Snapshot of engine health for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LinkStatus {
    /// Lifecycle state.
    pub state: EngineState,
    /// Fatal condition that stopped the worker, if any.
    pub fault: Option<LinkFault>,
    /// Successful exchanges since start.
    pub exchanges: u64,
    /// Misses since start.
    pub total_misses: u64,
    /// Current run of consecutive misses.
    pub consecutive_misses: u32,
    /// Malformed frames since start (included in `total_misses`).
    pub malformed_frames: u64,
    /// Cycles that overran the configured cycle time.
    pub timing_violations: u64,
    /// Longest observed cycle in microseconds.
    pub max_cycle_time_us: u64,
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use EngineState::*;
    use LinkEvent::*;

    #[test]
    fn initial_state_is_idle() {
        assert_eq!(LinkStateMachine::new().state(), Idle);
    }

    #[test]
    fn normal_lifecycle() {
        let mut sm = LinkStateMachine::new();
        assert_eq!(sm.handle_event(Start), TransitionResult::Ok(Starting));
        assert_eq!(sm.handle_event(Connected), TransitionResult::Ok(Running));
        assert!(sm.worker_active());
        assert_eq!(sm.handle_event(StopRequested), TransitionResult::Ok(Stopping));
        assert_eq!(sm.handle_event(Drained), TransitionResult::Ok(Stopped));
        assert!(!sm.worker_active());
    }

    #[test]
    fn connect_failure_returns_to_idle() {
        let mut sm = LinkStateMachine::new();
        sm.handle_event(Start);
        assert_eq!(sm.handle_event(ConnectFailed), TransitionResult::Ok(Idle));
    }

    #[test]
    fn link_lost_stops_running_engine() {
        let mut sm = LinkStateMachine { state: Running };
        assert_eq!(sm.handle_event(LinkLost), TransitionResult::Ok(Stopped));
    }

    #[test]
    fn worker_failure_stops_engine() {
        let mut sm = LinkStateMachine { state: Stopping };
        assert_eq!(sm.handle_event(WorkerFailed), TransitionResult::Ok(Stopped));
        assert!(matches!(sm.handle_event(WorkerFailed), TransitionResult::Rejected(_)));
    }

    #[test]
    fn stopped_engine_can_restart() {
        let mut sm = LinkStateMachine { state: Stopped };
        assert_eq!(sm.handle_event(Start), TransitionResult::Ok(Starting));
    }

    #[test]
    fn invalid_transitions_rejected() {
        let mut sm = LinkStateMachine { state: Running };
        assert!(matches!(sm.handle_event(Start), TransitionResult::Rejected(_)));
        assert_eq!(sm.state(), Running);

        let mut sm = LinkStateMachine { state: Idle };
        assert!(matches!(
            sm.handle_event(StopRequested),
            TransitionResult::Rejected(_)
        ));
    }
}
