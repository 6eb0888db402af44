//! Shared transfer areas and the caller-side accessor.
//!
//! Each interface's [`TransferArea`] sits behind its own mutex. The worker
//! takes the lock only to snapshot `output`/`config` for transmission and to
//! write a fully received `input`; the caller takes it to read a snapshot or
//! to apply a mutation. Nothing hands out references into the guarded data.

use parking_lot::Mutex;
use std::sync::Arc;
use txt_common::error::{TxtError, TxtResult};
use txt_common::ids::InterfaceId;
use txt_common::transfer_area::{TaConfig, TaInput, TaOutput, TaState, TransferArea};

/// Per-interface transfer areas shared by caller and worker.
#[derive(Debug)]
pub struct SharedArea {
    slots: Box<[Mutex<TransferArea>]>,
}

impl SharedArea {
    /// Allocate `count` zeroed transfer areas.
    pub fn new(count: usize) -> Self {
        let slots = (0..count)
            .map(|_| Mutex::new(TransferArea::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { slots }
    }

    /// Number of configured interfaces.
    #[inline]
    pub fn count(&self) -> usize {
        self.slots.len()
    }

    /// Guarded area of one interface.
    ///
    /// # Errors
    /// `InvalidInterface` if `interface` is beyond the configured count.
    pub fn slot(&self, interface: InterfaceId) -> TxtResult<&Mutex<TransferArea>> {
        self.slots
            .get(interface.index())
            .ok_or(TxtError::InvalidInterface {
                index: interface.index(),
                count: self.slots.len(),
            })
    }

    /// Iterate configured interfaces in index order.
    pub fn iter(&self) -> impl Iterator<Item = (InterfaceId, &Mutex<TransferArea>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| InterfaceId::from_u8(i as u8).map(|id| (id, slot)))
    }

    /// Run `f` with the locked area of `interface`.
    pub fn with<R>(
        &self,
        interface: InterfaceId,
        f: impl FnOnce(&mut TransferArea) -> R,
    ) -> TxtResult<R> {
        let slot = self.slot(interface)?;
        let mut area = slot.lock();
        Ok(f(&mut area))
    }
}

/// Cloneable caller-side view of the transfer areas.
///
/// Reads return copies taken under the interface lock, so a caller never
/// observes a partially written input image. Output mutations applied
/// between two exchange cycles coalesce into the next outgoing frame.
#[derive(Debug, Clone)]
pub struct TransferAreaView {
    shared: Arc<SharedArea>,
}

impl TransferAreaView {
    pub(crate) fn new(shared: Arc<SharedArea>) -> Self {
        Self { shared }
    }

    /// Number of configured interfaces.
    pub fn interface_count(&self) -> usize {
        self.shared.count()
    }

    /// Latest fully received input image.
    pub fn read(&self, interface: InterfaceId) -> TxtResult<TaInput> {
        self.shared.with(interface, |area| area.input)
    }

    /// Current output image (as staged by the caller).
    pub fn output(&self, interface: InterfaceId) -> TxtResult<TaOutput> {
        self.shared.with(interface, |area| area.output)
    }

    /// Current configuration image.
    pub fn config(&self, interface: InterfaceId) -> TxtResult<TaConfig> {
        self.shared.with(interface, |area| area.config)
    }

    /// Configuration version and link bookkeeping.
    pub fn state(&self, interface: InterfaceId) -> TxtResult<TaState> {
        self.shared.with(interface, |area| area.state)
    }

    /// Consistent copy of the whole area.
    pub fn snapshot(&self, interface: InterfaceId) -> TxtResult<TransferArea> {
        self.shared.with(interface, |area| *area)
    }

    /// Apply a mutation to the output image.
    ///
    /// ```rust,ignore
    /// view.write(InterfaceId::LocalIo, |out| out.set_motor_speed(Motor::M1, 512))?;
    /// ```
    pub fn write<R>(
        &self,
        interface: InterfaceId,
        mutation: impl FnOnce(&mut TaOutput) -> R,
    ) -> TxtResult<R> {
        self.shared.with(interface, |area| mutation(&mut area.output))
    }
}
