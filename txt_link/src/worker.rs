//! Communication worker: the periodic transfer-area exchange.
//!
//! Each cycle snapshots every interface's output (and pending configuration)
//! into one request frame, waits a bounded time for the matching response,
//! writes the received input images back, and only then dispatches the
//! callbacks for the transitions it observed. Consecutive misses beyond the
//! configured threshold end the worker with a `LinkLost` fault.

use parking_lot::{Mutex, RwLock};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use txt_common::config::LinkConfig;
use txt_common::error::{TxtError, TxtResult};
use txt_common::ids::InterfaceId;
use txt_common::transfer_area::TaInput;

use crate::area::SharedArea;
use crate::codec::{InterfaceRequest, RequestFrame, ResponseFrame};
use crate::dispatch::{CallbackRegistry, TaEvent, detect_transitions, dispatch};
use crate::frame_log::{FrameDirection, FrameLog};
use crate::lifecycle::{LinkEvent, LinkFault, LinkStateMachine, LinkStatus, TransitionResult};
use crate::transport::Transport;

/// Handler invoked once, on the worker thread, when the link is lost or the
/// worker dies. Receives the consecutive misses at that point.
pub type LinkLostHandler = Arc<dyn Fn(u32) + Send + Sync>;

/// Lifecycle state plus the health counters published by the worker.
#[derive(Debug, Default)]
pub(crate) struct LinkControl {
    pub machine: LinkStateMachine,
    pub status: LinkStatus,
}

impl LinkControl {
    /// Apply a lifecycle event, logging rejected transitions.
    pub fn transition(&mut self, event: LinkEvent) -> TransitionResult {
        let result = self.machine.handle_event(event);
        match &result {
            TransitionResult::Ok(state) => {
                debug!("Link state -> {:?} ({:?})", state, event);
                self.status.state = *state;
            }
            TransitionResult::Rejected(reason) => {
                debug!("Link event {:?} rejected: {}", event, reason);
            }
        }
        result
    }

    /// Snapshot for callers.
    pub fn snapshot(&self) -> LinkStatus {
        LinkStatus {
            state: self.machine.state(),
            ..self.status
        }
    }
}

/// State shared between the engine handle and its worker.
pub(crate) struct LinkShared {
    pub area: Arc<SharedArea>,
    pub callbacks: RwLock<CallbackRegistry>,
    pub control: Mutex<LinkControl>,
    pub stop: AtomicBool,
    pub link_lost: RwLock<Option<LinkLostHandler>>,
}

impl LinkShared {
    pub fn new(interface_count: usize) -> Self {
        Self {
            area: Arc::new(SharedArea::new(interface_count)),
            callbacks: RwLock::new(CallbackRegistry::new()),
            control: Mutex::new(LinkControl::default()),
            stop: AtomicBool::new(false),
            link_lost: RwLock::new(None),
        }
    }
}

/// Timing statistics for cycle monitoring.
#[derive(Debug, Default)]
struct TimingStats {
    /// Number of cycles executed
    cycle_count: u64,
    /// Number of timing violations (cycle exceeded target)
    timing_violations: u64,
    /// Maximum observed cycle time
    max_cycle_time_us: u64,
    /// Sum of cycle times for average calculation
    total_cycle_time_us: u64,
}

/// Why an exchange produced no usable response.
#[derive(Debug)]
enum Miss {
    Timeout,
    Malformed(String),
    Incomplete(InterfaceId),
    Transport(TxtError),
}

impl Miss {
    /// Framing errors reported by the transport count as malformed.
    fn from_transport(error: TxtError) -> Self {
        match error {
            TxtError::MalformedFrame(detail) => Self::Malformed(detail),
            other => Self::Transport(other),
        }
    }

    fn reason(&self) -> String {
        match self {
            Self::Timeout => "timeout".to_string(),
            Self::Malformed(detail) => format!("malformed: {detail}"),
            Self::Incomplete(interface) => format!("no input for {interface}"),
            Self::Transport(e) => format!("transport: {e}"),
        }
    }
}

/// Owns the transport while the engine is running.
pub(crate) struct Worker {
    shared: Arc<LinkShared>,
    transport: Box<dyn Transport>,
    config: LinkConfig,
    frame_log: Option<FrameLog>,
    seq: u32,
    prev_inputs: Vec<TaInput>,
    events: Vec<TaEvent>,
    stats: TimingStats,
    consecutive_misses: u32,
    total_misses: u64,
    malformed_frames: u64,
    exchanges: u64,
}

impl Worker {
    pub fn new(
        shared: Arc<LinkShared>,
        transport: Box<dyn Transport>,
        config: LinkConfig,
        frame_log: Option<FrameLog>,
    ) -> Self {
        let count = shared.area.count();
        Self {
            shared,
            transport,
            config,
            frame_log,
            seq: 0,
            prev_inputs: vec![TaInput::default(); count],
            events: Vec::with_capacity(32),
            stats: TimingStats::default(),
            consecutive_misses: 0,
            total_misses: 0,
            malformed_frames: 0,
            exchanges: 0,
        }
    }

    /// Connect and push the initial configuration.
    ///
    /// Runs on the caller's thread while the engine is `Starting`. The
    /// configuration image is sent every attempt until firmware echoes the
    /// staged id on every interface. Inputs received here become the
    /// baseline for edge detection; no callbacks fire for them.
    pub fn handshake(&mut self) -> TxtResult<()> {
        self.transport.connect(self.config.connect_timeout())?;
        info!(
            "Connected via {} transport, pushing configuration to {} interface(s)",
            self.transport.name(),
            self.shared.area.count()
        );

        for attempt in 1..=self.config.miss_threshold {
            match self.exchange(true) {
                Ok(response) => {
                    self.apply_response(&response, false);
                    if self.all_committed() {
                        info!("Configuration acknowledged after {} exchange(s)", attempt);
                        self.consecutive_misses = 0;
                        self.publish_status();
                        return Ok(());
                    }
                    debug!("Configuration not yet echoed (attempt {})", attempt);
                }
                Err(miss) => {
                    warn!("Handshake exchange {} missed: {}", attempt, miss.reason());
                    self.record_miss(&miss);
                }
            }
        }

        if let Err(e) = self.transport.disconnect() {
            debug!("Disconnect after failed handshake: {}", e);
        }
        Err(TxtError::Connect {
            host: self.config.host.clone(),
            port: self.config.port,
            reason: format!(
                "configuration not acknowledged within {} exchanges",
                self.config.miss_threshold
            ),
        })
    }

    /// Run the exchange loop until stop is requested or the link is lost.
    ///
    /// A panic inside the loop is caught and recorded as
    /// `LinkFault::WorkerPanicked`; the engine then reads `Stopped`.
    pub fn run(mut self) {
        if catch_unwind(AssertUnwindSafe(|| self.run_loop())).is_err() {
            self.declare_worker_panicked();
        }
    }

    fn run_loop(&mut self) {
        let cycle_time = self.config.cycle_time();
        info!(
            "Starting exchange loop (cycle_time={}ms, response_timeout={}ms, miss_threshold={})",
            self.config.cycle_time_ms, self.config.response_timeout_ms, self.config.miss_threshold
        );
        if detect_rt_mode() {
            info!("Running in real-time mode");
        } else {
            info!("Running in standard (non-RT) mode");
        }
        if let Some(log) = self.frame_log.as_mut() {
            log.lifecycle("running");
        }

        let mut lost = false;
        while !self.shared.stop.load(Ordering::SeqCst) {
            let cycle_start = Instant::now();

            match self.exchange(false) {
                Ok(response) => {
                    self.consecutive_misses = 0;
                    self.apply_response(&response, true);
                }
                Err(miss) => {
                    warn!(
                        "Exchange seq={} missed ({} consecutive): {}",
                        self.seq,
                        self.consecutive_misses + 1,
                        miss.reason()
                    );
                    self.record_miss(&miss);
                    if self.consecutive_misses >= self.config.miss_threshold {
                        lost = true;
                    }
                }
            }

            self.update_timing(cycle_start);
            self.publish_status();
            if lost {
                break;
            }

            let elapsed = cycle_start.elapsed();
            if elapsed < cycle_time {
                std::thread::sleep(cycle_time - elapsed);
            }
        }

        if let Err(e) = self.transport.disconnect() {
            warn!("Disconnect failed: {}", e);
        }
        if let Some(log) = self.frame_log.as_mut() {
            log.lifecycle(if lost { "link_lost" } else { "stopped" });
            log.flush();
        }

        info!(
            "Exchange loop stopped after {} cycles (violations: {}, misses: {})",
            self.stats.cycle_count, self.stats.timing_violations, self.total_misses
        );

        if lost {
            self.declare_link_lost();
        } else {
            self.shared.control.lock().transition(LinkEvent::Drained);
        }
    }

    fn declare_link_lost(&self) {
        let misses = self.consecutive_misses;
        error!("Link lost after {} consecutive missed exchanges", misses);
        {
            let mut control = self.shared.control.lock();
            control.status.fault = Some(LinkFault::LinkLost { misses });
            control.transition(LinkEvent::LinkLost);
        }
        self.notify_link_lost(misses);
    }

    fn declare_worker_panicked(&mut self) {
        error!("Link worker panicked; closing the link");
        if catch_unwind(AssertUnwindSafe(|| self.transport.disconnect())).is_err() {
            warn!("Disconnect after worker panic failed");
        }
        if let Some(log) = self.frame_log.as_mut() {
            log.lifecycle("worker_panicked");
            log.flush();
        }
        {
            let mut control = self.shared.control.lock();
            // Already reported as lost.
            if !control.machine.worker_active() {
                return;
            }
            control.status.fault = Some(LinkFault::WorkerPanicked);
            control.transition(LinkEvent::WorkerFailed);
        }
        self.notify_link_lost(self.consecutive_misses);
    }

    fn notify_link_lost(&self, misses: u32) {
        let handler = self.shared.link_lost.read().clone();
        if let Some(handler) = handler {
            if catch_unwind(AssertUnwindSafe(|| handler(misses))).is_err() {
                error!("Link-lost handler panicked");
            }
        }
    }

    /// Send one request and wait for its response.
    fn exchange(&mut self, force_config: bool) -> Result<ResponseFrame, Miss> {
        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;

        let request = self.build_request(seq, force_config)?;
        let bytes = request
            .encode()
            .map_err(|e| Miss::Malformed(e.to_string()))?;
        self.transport.send_frame(&bytes).map_err(Miss::from_transport)?;
        if let Some(log) = self.frame_log.as_mut() {
            log.frame(FrameDirection::Tx, seq, &bytes);
        }

        let deadline = Instant::now() + self.config.response_timeout();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Miss::Timeout);
            }
            let Some(bytes) = self.transport.recv_frame(remaining).map_err(Miss::from_transport)? else {
                return Err(Miss::Timeout);
            };
            let response =
                ResponseFrame::decode(&bytes).map_err(|e| Miss::Malformed(e.to_string()))?;
            if let Some(log) = self.frame_log.as_mut() {
                log.frame(FrameDirection::Rx, response.seq, &bytes);
            }

            if response.seq == seq {
                return self.check_complete(response);
            }
            if is_stale(seq, response.seq) {
                debug!("Discarding stale response seq={} (expecting {})", response.seq, seq);
                continue;
            }
            return Err(Miss::Malformed(format!(
                "response seq {} ahead of request {}",
                response.seq, seq
            )));
        }
    }

    fn build_request(&self, seq: u32, force_config: bool) -> Result<RequestFrame, Miss> {
        let mut frame = RequestFrame::new(seq);
        for (interface, slot) in self.shared.area.iter() {
            let area = *slot.lock();
            let pending = force_config || !area.state.is_config_committed();
            frame
                .push(InterfaceRequest {
                    interface: interface as u8,
                    config_id: area.state.config_id,
                    config: pending.then_some(area.config),
                    output: area.output.clamped(),
                })
                .map_err(|e| Miss::Malformed(e.to_string()))?;
        }
        Ok(frame)
    }

    fn check_complete(&self, response: ResponseFrame) -> Result<ResponseFrame, Miss> {
        for (interface, _) in self.shared.area.iter() {
            if response.input_for(interface as u8).is_none() {
                return Err(Miss::Incomplete(interface));
            }
        }
        Ok(response)
    }

    /// Write every input image, then dispatch the observed transitions.
    fn apply_response(&mut self, response: &ResponseFrame, fire: bool) {
        for (interface, slot) in self.shared.area.iter() {
            let Some(input) = response.input_for(interface as u8) else {
                continue;
            };
            {
                let mut area = slot.lock();
                area.input = *input;
                area.state.config_id_ack = input.config_id;
                area.state.exchange_count += 1;
            }
            let prev = &mut self.prev_inputs[interface.index()];
            if fire {
                detect_transitions(interface, prev, input, &mut self.events);
            }
            *prev = *input;
        }
        self.exchanges += 1;

        if self.events.is_empty() {
            return;
        }
        let stats = dispatch(&self.shared.callbacks, &self.events);
        if stats.panicked > 0 {
            warn!("{} of {} callbacks panicked", stats.panicked, stats.invoked);
        }
        if let Some(log) = self.frame_log.as_mut() {
            for event in &self.events {
                log.event(event);
            }
        }
        self.events.clear();
    }

    fn record_miss(&mut self, miss: &Miss) {
        self.consecutive_misses += 1;
        self.total_misses += 1;
        if matches!(miss, Miss::Malformed(_)) {
            self.malformed_frames += 1;
        }
        for (_, slot) in self.shared.area.iter() {
            slot.lock().state.miss_count += 1;
        }
        if let Some(log) = self.frame_log.as_mut() {
            log.miss(self.seq, self.consecutive_misses, &miss.reason());
        }
    }

    fn all_committed(&self) -> bool {
        self.shared
            .area
            .iter()
            .all(|(_, slot)| slot.lock().state.is_config_committed())
    }

    fn update_timing(&mut self, cycle_start: Instant) {
        let cycle_time_us = cycle_start.elapsed().as_micros() as u64;
        let target_us = self.config.cycle_time_ms * 1000;
        self.stats.cycle_count += 1;
        self.stats.total_cycle_time_us += cycle_time_us;
        if cycle_time_us > self.stats.max_cycle_time_us {
            self.stats.max_cycle_time_us = cycle_time_us;
        }

        if cycle_time_us > target_us {
            self.stats.timing_violations += 1;
            if self.stats.timing_violations <= 10 || self.stats.timing_violations % 1000 == 0 {
                warn!(
                    "Timing violation #{}: cycle took {}us (target {}us)",
                    self.stats.timing_violations, cycle_time_us, target_us
                );
            }
        }

        if self.stats.cycle_count % 1000 == 0 {
            debug!(
                "Exchange loop: {} cycles, avg={}us, max={}us, violations={}",
                self.stats.cycle_count,
                self.stats.total_cycle_time_us / self.stats.cycle_count,
                self.stats.max_cycle_time_us,
                self.stats.timing_violations
            );
        }
    }

    fn publish_status(&self) {
        let mut control = self.shared.control.lock();
        control.status.exchanges = self.exchanges;
        control.status.total_misses = self.total_misses;
        control.status.consecutive_misses = self.consecutive_misses;
        control.status.malformed_frames = self.malformed_frames;
        control.status.timing_violations = self.stats.timing_violations;
        control.status.max_cycle_time_us = self.stats.max_cycle_time_us;
    }
}

/// `received` is an answer to a request issued before `expected`.
fn is_stale(expected: u32, received: u32) -> bool {
    let age = expected.wrapping_sub(received);
    age != 0 && age < u32::MAX / 2
}

/// Poll interval helper for blocking waits.
pub(crate) fn poll_sleep(interval: Duration) {
    std::thread::sleep(interval.max(Duration::from_micros(100)));
}

/// Detect if running in real-time mode by checking scheduler policy.
fn detect_rt_mode() -> bool {
    #[cfg(target_os = "linux")]
    {
        use libc::{SCHED_FIFO, SCHED_RR, sched_getscheduler};
        // SAFETY: querying the calling thread's policy has no preconditions.
        unsafe {
            let policy = sched_getscheduler(0);
            policy == SCHED_FIFO || policy == SCHED_RR
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_detection_handles_wraparound() {
        assert!(is_stale(10, 9));
        assert!(!is_stale(10, 10));
        assert!(!is_stale(10, 11));
        assert!(is_stale(0, u32::MAX));
        assert!(is_stale(2, u32::MAX - 3));
    }

    #[test]
    fn control_snapshot_reports_machine_state() {
        let mut control = LinkControl::default();
        control.transition(LinkEvent::Start);
        control.transition(LinkEvent::Connected);
        control.status.exchanges = 5;
        let status = control.snapshot();
        assert_eq!(status.state, crate::lifecycle::EngineState::Running);
        assert_eq!(status.exchanges, 5);
    }

    #[test]
    fn rejected_transition_keeps_status_state() {
        let mut control = LinkControl::default();
        assert!(matches!(
            control.transition(LinkEvent::Drained),
            TransitionResult::Rejected(_)
        ));
        assert_eq!(control.snapshot().state, crate::lifecycle::EngineState::Idle);
    }
}
