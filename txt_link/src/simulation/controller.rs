//! In-process controller implementing [`Transport`].
//!
//! Requests are answered synchronously by a [`SimFirmware`]; the response is
//! queued for the next `recv_frame`. A [`SimHandle`] shares the state with
//! tests and demos for scripting inputs and injecting link faults.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use txt_common::error::{TxtError, TxtResult};
use txt_common::ids::{Input, InterfaceId, IrDevice};
use txt_common::transfer_area::{IrState, TaInput};

use super::firmware::{SimFirmware, SimInterface};
use crate::codec::{RequestFrame, ResponseFrame};
use crate::transport::Transport;

/// Requests kept for inspection.
const REQUEST_HISTORY: usize = 256;

/// Pending fault injections.
#[derive(Debug, Default, Clone, Copy)]
struct FaultPlan {
    drop_responses: u32,
    corrupt_responses: u32,
    stale_responses: u32,
    link_down: bool,
    refuse_connect: bool,
}

#[derive(Debug)]
struct SimState {
    firmware: SimFirmware,
    faults: FaultPlan,
    requests: VecDeque<RequestFrame>,
    exchanges: u64,
    connected: bool,
    last_response: Option<ResponseFrame>,
}

/// Simulated controller transport.
pub struct SimulatedController {
    state: Arc<Mutex<SimState>>,
    pending: VecDeque<Vec<u8>>,
}

/// Shared control handle of a [`SimulatedController`].
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedController {
    /// Controller emulating `interface_count` interfaces.
    pub fn new(interface_count: usize) -> (Self, SimHandle) {
        let state = Arc::new(Mutex::new(SimState {
            firmware: SimFirmware::new(interface_count),
            faults: FaultPlan::default(),
            requests: VecDeque::with_capacity(REQUEST_HISTORY),
            exchanges: 0,
            connected: false,
            last_response: None,
        }));
        let handle = SimHandle {
            state: Arc::clone(&state),
        };
        (
            Self {
                state,
                pending: VecDeque::new(),
            },
            handle,
        )
    }
}

impl Transport for SimulatedController {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn connect(&mut self, _timeout: Duration) -> TxtResult<()> {
        let mut state = self.state.lock();
        if state.faults.refuse_connect {
            return Err(TxtError::Connect {
                host: "simulation".to_string(),
                port: 0,
                reason: "connection refused".to_string(),
            });
        }
        state.connected = true;
        self.pending.clear();
        info!(
            "Simulated controller connected ({} interfaces)",
            state.firmware.count()
        );
        Ok(())
    }

    fn send_frame(&mut self, frame: &[u8]) -> TxtResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.connected {
            return Err(TxtError::InvalidState("transport not connected".to_string()));
        }
        let Ok(request) = RequestFrame::decode(frame) else {
            // Firmware ignores garbage.
            debug!("Sim: ignoring undecodable request");
            return Ok(());
        };

        let response = state.firmware.handle(&request);
        state.exchanges += 1;
        if state.requests.len() == REQUEST_HISTORY {
            state.requests.pop_front();
        }
        state.requests.push_back(request);

        let faults = &mut state.faults;
        if faults.link_down {
            return Ok(());
        }
        if faults.drop_responses > 0 {
            faults.drop_responses -= 1;
            return Ok(());
        }
        if faults.corrupt_responses > 0 {
            faults.corrupt_responses -= 1;
            self.pending.push_back(b"garbage".to_vec());
            return Ok(());
        }
        if faults.stale_responses > 0 {
            faults.stale_responses -= 1;
            if let Some(previous) = state.last_response.clone() {
                self.pending.push_back(previous.encode()?);
            }
        }

        self.pending.push_back(response.encode()?);
        state.last_response = Some(response);
        Ok(())
    }

    fn recv_frame(&mut self, timeout: Duration) -> TxtResult<Option<Vec<u8>>> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(Some(frame));
        }
        // Nothing will arrive; emulate the full wait.
        std::thread::sleep(timeout);
        Ok(None)
    }

    fn disconnect(&mut self) -> TxtResult<()> {
        self.state.lock().connected = false;
        self.pending.clear();
        Ok(())
    }
}

impl SimHandle {
    fn with_interface<R>(
        &self,
        interface: InterfaceId,
        f: impl FnOnce(&mut SimInterface) -> R,
    ) -> Option<R> {
        let mut state = self.state.lock();
        state.firmware.interface_mut(interface).map(f)
    }

    /// Set a universal input value.
    pub fn set_input(&self, interface: InterfaceId, input: Input, value: i16) {
        self.with_interface(interface, |sim| sim.set_input(input, value));
    }

    /// Queue values for `input`, applied one per exchange.
    pub fn script_input(&self, interface: InterfaceId, input: Input, values: &[i16]) {
        self.with_interface(interface, |sim| sim.script_input(input, values.iter().copied()));
    }

    /// Set the state of one IR receiver channel.
    pub fn set_ir(&self, interface: InterfaceId, device: IrDevice, state: IrState) {
        self.with_interface(interface, |sim| sim.set_ir(device as usize, state));
    }

    /// Stop (or resume) echoing configuration ids.
    pub fn withhold_config_echo(&self, interface: InterfaceId, withhold: bool) {
        self.with_interface(interface, |sim| sim.withhold_config_echo = withhold);
    }

    /// Stop (or resume) reporting finished moves and resets.
    pub fn hold_completions(&self, interface: InterfaceId, hold: bool) {
        self.with_interface(interface, |sim| {
            sim.hold_completions = hold;
            if !hold {
                sim.release_completions();
            }
        });
    }

    /// Swallow the responses to the next `n` requests.
    pub fn drop_responses(&self, n: u32) {
        self.state.lock().faults.drop_responses = n;
    }

    /// Replace the responses to the next `n` requests with garbage.
    pub fn corrupt_responses(&self, n: u32) {
        self.state.lock().faults.corrupt_responses = n;
    }

    /// Precede the next `n` responses with a copy of the previous one.
    pub fn inject_stale_responses(&self, n: u32) {
        self.state.lock().faults.stale_responses = n;
    }

    /// Stop answering entirely (or resume).
    pub fn set_link_down(&self, down: bool) {
        self.state.lock().faults.link_down = down;
    }

    /// Refuse connection attempts.
    pub fn refuse_connect(&self, refuse: bool) {
        self.state.lock().faults.refuse_connect = refuse;
    }

    /// Requests processed so far.
    pub fn exchange_count(&self) -> u64 {
        self.state.lock().exchanges
    }

    /// Most recent request, if any.
    pub fn last_request(&self) -> Option<RequestFrame> {
        self.state.lock().requests.back().cloned()
    }

    /// Recent requests, oldest first.
    pub fn requests(&self) -> Vec<RequestFrame> {
        self.state.lock().requests.iter().cloned().collect()
    }

    /// Input image firmware will report next.
    pub fn input(&self, interface: InterfaceId) -> Option<TaInput> {
        let state = self.state.lock();
        state.firmware.interface(interface).map(|sim| sim.input)
    }

    /// Whether a transport is currently connected.
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}
