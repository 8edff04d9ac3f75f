//! Slot tables mapping numeric handles to listeners.
//!
//! The transport can only carry an opaque number back to us, so every
//! listener is parked in a [`HandleRegistry`] and looked up again when an
//! event arrives. Handles come from a counter that probes forward past
//! occupied slots; a handle is reused only after it was released.

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;

use super::types::Handle;

/// Default number of slots in a registry.
pub const DEFAULT_CAPACITY: u64 = 1 << 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandleError {
    #[error("all {capacity} handles of the {registry} registry are in use")]
    Exhausted { registry: &'static str, capacity: u64 },

    #[error("handle {handle} is not registered in the {registry} registry")]
    Unknown { registry: &'static str, handle: Handle },
}

struct Slots<T> {
    entries: HashMap<Handle, T>,
    next: Handle,
}

/// A mutex-protected handle to listener table.
pub struct HandleRegistry<T> {
    name: &'static str,
    capacity: u64,
    slots: Mutex<Slots<T>>,
}

impl<T: Clone> HandleRegistry<T> {
    pub fn new(name: &'static str) -> Self {
        Self::with_capacity(name, DEFAULT_CAPACITY)
    }

    /// A registry whose handles stay below `capacity`.
    pub fn with_capacity(name: &'static str, capacity: u64) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            slots: Mutex::new(Slots {
                entries: HashMap::new(),
                next: 0,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Park a listener and return its handle.
    pub fn register(&self, listener: T) -> Result<Handle, HandleError> {
        let mut slots = self.slots.lock();
        if slots.entries.len() as u64 >= self.capacity {
            return Err(HandleError::Exhausted {
                registry: self.name,
                capacity: self.capacity,
            });
        }
        let mut handle = slots.next;
        while slots.entries.contains_key(&handle) {
            handle = (handle + 1) % self.capacity;
        }
        slots.next = (handle + 1) % self.capacity;
        slots.entries.insert(handle, listener);
        Ok(handle)
    }

    /// A clone of the listener registered under `handle`.
    pub fn lookup(&self, handle: Handle) -> Result<T, HandleError> {
        self.slots
            .lock()
            .entries
            .get(&handle)
            .cloned()
            .ok_or(HandleError::Unknown {
                registry: self.name,
                handle,
            })
    }

    /// Remove the listener registered under `handle`, freeing the slot.
    pub fn release(&self, handle: Handle) -> Result<T, HandleError> {
        self.slots
            .lock()
            .entries
            .remove(&handle)
            .ok_or(HandleError::Unknown {
                registry: self.name,
                handle,
            })
    }

    /// Release `handle` only if its listener still satisfies `pred`.
    ///
    /// Used when a handle may have been released and reallocated by
    /// someone else in the meantime.
    pub fn release_if(&self, handle: Handle, pred: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut slots = self.slots.lock();
        match slots.entries.get(&handle) {
            Some(listener) if pred(listener) => slots.entries.remove(&handle),
            _ => None,
        }
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.slots.lock().entries.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
