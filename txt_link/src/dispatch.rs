//! Event detection and callback dispatch.
//!
//! After every successful exchange the worker compares the previous and the
//! new input image of each interface and turns edges into [`TaEvent`]s.
//! Handlers are looked up per `(interface, category, slot)` key and invoked
//! on the worker thread with no lock held. A panicking handler is caught and
//! logged; the cycle continues.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{error, trace};
use txt_common::command_id::CommandId;
use txt_common::consts::{NUM_COUNTERS, NUM_INPUTS, NUM_MOTORS};
use txt_common::error::{TxtError, TxtResult};
use txt_common::ids::{Counter, Input, InterfaceId, Motor};
use txt_common::transfer_area::TaInput;

/// Callback category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CallbackCategory {
    /// Universal input value changed.
    InputChange,
    /// Enhanced motor command reached its target.
    MotorReached,
    /// Counter value changed.
    CounterValue,
    /// Counter reset completed.
    CounterResetReady,
}

impl CallbackCategory {
    /// Number of addressable slots in this category.
    pub const fn slot_count(self) -> usize {
        match self {
            Self::InputChange => NUM_INPUTS,
            Self::MotorReached => NUM_MOTORS,
            Self::CounterValue | Self::CounterResetReady => NUM_COUNTERS,
        }
    }

    /// Slot category name used in errors.
    pub const fn slot_name(self) -> &'static str {
        match self {
            Self::InputChange => "input",
            Self::MotorReached => "motor",
            Self::CounterValue | Self::CounterResetReady => "counter",
        }
    }

    /// Validate a raw slot id for this category.
    pub fn check_slot(self, slot: u8) -> TxtResult<()> {
        if (slot as usize) < self.slot_count() {
            Ok(())
        } else {
            Err(TxtError::InvalidActuator {
                category: self.slot_name(),
                id: slot,
            })
        }
    }
}

/// State transition observed in an input image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaEvent {
    /// Universal input value changed.
    InputChanged {
        /// Interface
        interface: InterfaceId,
        /// Input slot
        input: Input,
        /// New raw value
        value: i16,
        /// New value as boolean
        state: bool,
    },
    /// Enhanced motor command completed.
    MotorReached {
        /// Interface
        interface: InterfaceId,
        /// Motor slot
        motor: Motor,
        /// Encoder counter value at completion
        position: u16,
        /// Completed command id
        cmd_id: CommandId,
    },
    /// Counter value changed.
    CounterChanged {
        /// Interface
        interface: InterfaceId,
        /// Counter slot
        counter: Counter,
        /// New value
        count: u16,
    },
    /// Counter reset completed.
    CounterResetReady {
        /// Interface
        interface: InterfaceId,
        /// Counter slot
        counter: Counter,
        /// Completed command id
        cmd_id: CommandId,
    },
}

impl TaEvent {
    /// Registry key this event is delivered to.
    pub fn key(&self) -> CallbackKey {
        match *self {
            Self::InputChanged { interface, input, .. } => {
                CallbackKey::new(interface, CallbackCategory::InputChange, input as u8)
            }
            Self::MotorReached { interface, motor, .. } => {
                CallbackKey::new(interface, CallbackCategory::MotorReached, motor as u8)
            }
            Self::CounterChanged { interface, counter, .. } => {
                CallbackKey::new(interface, CallbackCategory::CounterValue, counter as u8)
            }
            Self::CounterResetReady { interface, counter, .. } => {
                CallbackKey::new(interface, CallbackCategory::CounterResetReady, counter as u8)
            }
        }
    }
}

/// User handler invoked for matching events.
pub type Callback = Arc<dyn Fn(&TaEvent) + Send + Sync>;

/// Wrap a closure as a [`Callback`].
pub fn callback(f: impl Fn(&TaEvent) + Send + Sync + 'static) -> Callback {
    Arc::new(f)
}

/// Registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackKey {
    /// Interface
    pub interface: InterfaceId,
    /// Category
    pub category: CallbackCategory,
    /// Zero-based slot id
    pub slot: u8,
}

impl CallbackKey {
    /// Build a key.
    pub const fn new(interface: InterfaceId, category: CallbackCategory, slot: u8) -> Self {
        Self {
            interface,
            category,
            slot,
        }
    }
}

/// Keyed handler map.
#[derive(Default)]
pub struct CallbackRegistry {
    handlers: HashMap<CallbackKey, Callback>,
}

impl CallbackRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler`, replacing any existing handler for the key.
    pub fn register(&mut self, key: CallbackKey, handler: Callback) -> TxtResult<Option<Callback>> {
        key.category.check_slot(key.slot)?;
        Ok(self.handlers.insert(key, handler))
    }

    /// Remove the handler for `key`.
    pub fn unregister(&mut self, key: &CallbackKey) -> Option<Callback> {
        self.handlers.remove(key)
    }

    /// Handler for `key`, if any.
    pub fn get(&self, key: &CallbackKey) -> Option<Callback> {
        self.handlers.get(key).cloned()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Append the events for one interface's `prev → next` transition to `out`.
///
/// Completion events fire on the rising edge of the done flag, or when a new
/// completion id is echoed while the flag stays set (a command that started
/// and finished between two exchanges).
pub fn detect_transitions(
    interface: InterfaceId,
    prev: &TaInput,
    next: &TaInput,
    out: &mut Vec<TaEvent>,
) {
    for &input in Input::ALL {
        let i = input.index();
        if prev.uni[i] != next.uni[i] {
            out.push(TaEvent::InputChanged {
                interface,
                input,
                value: next.uni[i],
                state: next.uni[i] != 0,
            });
        }
    }

    for &motor in Motor::ALL {
        let i = motor.index();
        let newly_reached = next.motor_ex_reached[i]
            && (!prev.motor_ex_reached[i] || prev.motor_ex_cmd_id[i] != next.motor_ex_cmd_id[i]);
        if newly_reached {
            out.push(TaEvent::MotorReached {
                interface,
                motor,
                position: next.counter[motor.counter().index()],
                cmd_id: CommandId(next.motor_ex_cmd_id[i]),
            });
        }
    }

    for &counter in Counter::ALL {
        let i = counter.index();
        if prev.counter[i] != next.counter[i] {
            out.push(TaEvent::CounterChanged {
                interface,
                counter,
                count: next.counter[i],
            });
        }
        let newly_reset = next.cnt_resetted[i]
            && (!prev.cnt_resetted[i] || prev.cnt_reset_cmd_id[i] != next.cnt_reset_cmd_id[i]);
        if newly_reset {
            out.push(TaEvent::CounterResetReady {
                interface,
                counter,
                cmd_id: CommandId(next.cnt_reset_cmd_id[i]),
            });
        }
    }
}

/// Dispatch outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Handlers invoked.
    pub invoked: usize,
    /// Handlers that panicked.
    pub panicked: usize,
}

/// Invoke the registered handler of every event, in order.
///
/// The registry lock is held only for the lookup, so a handler may register
/// or unregister callbacks without deadlocking.
pub fn dispatch(registry: &RwLock<CallbackRegistry>, events: &[TaEvent]) -> DispatchStats {
    let mut stats = DispatchStats::default();
    for event in events {
        let handler = registry.read().get(&event.key());
        let Some(handler) = handler else {
            continue;
        };
        trace!("Dispatching {:?}", event);
        stats.invoked += 1;
        if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
            stats.panicked += 1;
            error!("Callback for {:?} panicked; continuing", event.key());
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const IF: InterfaceId = InterfaceId::LocalIo;

    fn events(prev: &TaInput, next: &TaInput) -> Vec<TaEvent> {
        let mut out = Vec::new();
        detect_transitions(IF, prev, next, &mut out);
        out
    }

    #[test]
    fn unchanged_input_yields_nothing() {
        let a = TaInput::default();
        assert!(events(&a, &a).is_empty());
    }

    #[test]
    fn input_change_reports_value_and_state() {
        let prev = TaInput::default();
        let mut next = prev;
        next.uni[2] = 1;
        assert_eq!(
            events(&prev, &next),
            vec![TaEvent::InputChanged {
                interface: IF,
                input: Input::I3,
                value: 1,
                state: true
            }]
        );
    }

    #[test]
    fn reached_fires_on_edge_only() {
        let mut prev = TaInput::default();
        let mut next = prev;
        next.motor_ex_reached[0] = true;
        next.motor_ex_cmd_id[0] = 1;
        next.counter[0] = 400;
        let ev = events(&prev, &next);
        assert!(ev.contains(&TaEvent::MotorReached {
            interface: IF,
            motor: Motor::M1,
            position: 400,
            cmd_id: CommandId(1)
        }));

        // Staying reached with the same id: no repeat.
        prev = next;
        assert!(events(&prev, &next).is_empty());
    }

    #[test]
    fn reached_fires_for_new_id_while_flag_stays_set() {
        let mut prev = TaInput::default();
        prev.motor_ex_reached[1] = true;
        prev.motor_ex_cmd_id[1] = 4;
        let mut next = prev;
        next.motor_ex_cmd_id[1] = 5;
        let ev = events(&prev, &next);
        assert_eq!(ev.len(), 1);
        assert!(matches!(
            ev[0],
            TaEvent::MotorReached { motor: Motor::M2, cmd_id: CommandId(5), .. }
        ));
    }

    #[test]
    fn counter_reset_and_value_are_independent() {
        let mut prev = TaInput::default();
        prev.counter[3] = 17;
        let mut next = TaInput::default();
        next.cnt_resetted[3] = true;
        next.cnt_reset_cmd_id[3] = 1;
        let ev = events(&prev, &next);
        assert_eq!(ev.len(), 2);
        assert!(matches!(ev[0], TaEvent::CounterChanged { counter: Counter::C4, count: 0, .. }));
        assert!(matches!(ev[1], TaEvent::CounterResetReady { counter: Counter::C4, .. }));
    }

    #[test]
    fn register_rejects_out_of_range_slot() {
        let mut reg = CallbackRegistry::new();
        let key = CallbackKey::new(IF, CallbackCategory::MotorReached, 4);
        let result = reg.register(key, callback(|_| {}));
        assert!(matches!(
            result,
            Err(TxtError::InvalidActuator { category: "motor", id: 4 })
        ));
        assert!(reg.is_empty());
    }

    #[test]
    fn register_replaces_existing_handler() {
        let mut reg = CallbackRegistry::new();
        let key = CallbackKey::new(IF, CallbackCategory::InputChange, 0);
        assert!(reg.register(key, callback(|_| {})).unwrap().is_none());
        assert!(reg.register(key, callback(|_| {})).unwrap().is_some());
        assert_eq!(reg.len(), 1);
        assert!(reg.unregister(&key).is_some());
        assert!(reg.unregister(&key).is_none());
    }

    #[test]
    fn dispatch_survives_panicking_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let registry = RwLock::new(CallbackRegistry::new());
        {
            let mut reg = registry.write();
            reg.register(
                CallbackKey::new(IF, CallbackCategory::InputChange, 0),
                callback(|_| panic!("handler failure")),
            )
            .unwrap();
            let hits = Arc::clone(&hits);
            reg.register(
                CallbackKey::new(IF, CallbackCategory::InputChange, 1),
                callback(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        }

        let prev = TaInput::default();
        let mut next = prev;
        next.uni[0] = 1;
        next.uni[1] = 1;
        next.uni[2] = 1; // no handler
        let stats = dispatch(&registry, &events(&prev, &next));
        assert_eq!(stats, DispatchStats { invoked: 2, panicked: 1 });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_may_reenter_registry() {
        let registry = Arc::new(RwLock::new(CallbackRegistry::new()));
        let key = CallbackKey::new(IF, CallbackCategory::InputChange, 0);
        let reg_clone = Arc::clone(&registry);
        registry
            .write()
            .register(
                key,
                callback(move |_| {
                    reg_clone.write().unregister(&key);
                }),
            )
            .unwrap();

        let prev = TaInput::default();
        let mut next = prev;
        next.uni[0] = 5;
        let stats = dispatch(&registry, &events(&prev, &next));
        assert_eq!(stats.invoked, 1);
        assert!(registry.read().is_empty());
    }
}
