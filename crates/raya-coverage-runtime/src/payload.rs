//! Payload arrays and the per-method slots that hold them

use crate::error::PayloadError;
use crate::token::MethodToken;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Visitation cells for one compiled method, one per span
///
/// Cells are only ever set to `true` by probes and reset to `false` by flush,
/// so writers never need to coordinate with each other.
#[derive(Debug)]
pub struct PayloadArray {
    cells: Box<[AtomicBool]>,
}

impl PayloadArray {
    /// Allocate a zeroed array of `length` cells
    ///
    /// Fails instead of aborting when the allocation cannot be satisfied or
    /// exceeds `limit`.
    pub fn try_new(length: usize, limit: usize) -> Result<Self, PayloadError> {
        if length > limit {
            return Err(PayloadError::TooLarge { length, limit });
        }
        let mut cells = Vec::new();
        cells
            .try_reserve_exact(length)
            .map_err(|_| PayloadError::AllocationFailed { length })?;
        cells.extend((0..length).map(|_| AtomicBool::new(false)));
        Ok(Self {
            cells: cells.into_boxed_slice(),
        })
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Record a visit to span `index`. Out-of-range indices are ignored.
    #[inline]
    pub fn mark(&self, index: usize) {
        if let Some(cell) = self.cells.get(index) {
            cell.store(true, Ordering::Relaxed);
        }
    }

    pub fn is_marked(&self, index: usize) -> bool {
        self.cells
            .get(index)
            .map(|cell| cell.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Current cell values in span order
    pub fn snapshot(&self) -> Vec<bool> {
        self.cells
            .iter()
            .map(|cell| cell.load(Ordering::Relaxed))
            .collect()
    }

    /// Read and reset every cell in place
    ///
    /// Each cell is swapped individually; a probe racing with the drain lands
    /// either in this report or the next one.
    pub fn drain(&self) -> Vec<bool> {
        self.cells
            .iter()
            .map(|cell| cell.swap(false, Ordering::Relaxed))
            .collect()
    }
}

/// The storage cell an instrumented method declares for its payload
///
/// Starts empty and is filled exactly once by [`PayloadSlot::install`].
#[derive(Debug, Default)]
pub struct PayloadSlot {
    cell: OnceCell<Arc<PayloadArray>>,
}

impl PayloadSlot {
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// The installed array, if any
    #[inline]
    pub fn get(&self) -> Option<&Arc<PayloadArray>> {
        self.cell.get()
    }

    pub fn is_empty(&self) -> bool {
        self.cell.get().is_none()
    }

    /// Atomically install `array` if the slot is empty
    ///
    /// Returns the canonical array and whether `array` was the one installed.
    /// A losing caller's array is dropped.
    pub fn install(&self, array: Arc<PayloadArray>) -> (&Arc<PayloadArray>, bool) {
        match self.cell.try_insert(array) {
            Ok(installed) => (installed, true),
            Err((current, _discarded)) => (current, false),
        }
    }
}

/// Process-wide payload slots, one per instrumented method
pub struct SlotTable {
    slots: DashMap<MethodToken, Arc<PayloadSlot>>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Declare the slot for `token`, returning the existing one if already declared
    pub fn declare(&self, token: MethodToken) -> Arc<PayloadSlot> {
        self.slots
            .entry(token)
            .or_insert_with(|| Arc::new(PayloadSlot::new()))
            .clone()
    }

    pub fn get(&self, token: MethodToken) -> Option<Arc<PayloadSlot>> {
        self.slots.get(&token).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}
