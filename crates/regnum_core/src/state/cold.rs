//! # Auxiliary Cold Data
//!
//! Variable-size or rarely touched per-entity data, kept out of the hot
//! [`EntityRecord`] and referenced through its `aux_slot` field.
//!
//! The layer that defines an extension type owns its `AuxStore`. A slot lives
//! exactly as long as the entity that references it: [`AuxStore::attach`]
//! allocates and links in one step, [`AuxStore::detach`] unlinks and frees.
//! Slot 0 is never handed out, so a zeroed record means "no cold data".

use super::record::{EntityRecord, NO_AUX_SLOT};
use super::store::StateStore;
use crate::error::{StateError, StateResult};

/// Slab of cold data addressed by `u16` slots.
///
/// # Thread Safety
///
/// Not shared. Owned by the layer that defines `T` and touched only on the
/// simulation thread.
#[derive(Clone, Debug)]
pub struct AuxStore<T> {
    /// Slot storage. Index 0 is permanently empty.
    slots: Vec<Option<T>>,
    /// Released slots, reused last-in first-out.
    free_list: Vec<u16>,
    /// Number of occupied slots.
    allocated_count: usize,
}

impl<T> Default for AuxStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AuxStore<T> {
    /// Largest number of simultaneously occupied slots.
    pub const MAX_SLOTS: usize = u16::MAX as usize;

    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: vec![None],
            free_list: Vec::new(),
            allocated_count: 0,
        }
    }

    /// Returns the number of currently allocated slots.
    #[inline]
    #[must_use]
    pub const fn allocated_count(&self) -> usize {
        self.allocated_count
    }

    /// Stores `value` and returns its slot.
    ///
    /// # Errors
    ///
    /// [`StateError::CapacityExceeded`] when every non-zero slot is taken.
    pub fn allocate(&mut self, value: T) -> StateResult<u16> {
        let slot = if let Some(slot) = self.free_list.pop() {
            self.slots[slot as usize] = Some(value);
            slot
        } else if self.slots.len() <= Self::MAX_SLOTS {
            self.slots.push(Some(value));
            (self.slots.len() - 1) as u16
        } else {
            return Err(StateError::CapacityExceeded {
                capacity: Self::MAX_SLOTS,
            });
        };
        self.allocated_count += 1;
        Ok(slot)
    }

    /// Frees `slot` and returns its value.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidAuxSlot`] if `slot` is not allocated.
    pub fn release(&mut self, slot: u16) -> StateResult<T> {
        let value = self
            .slots
            .get_mut(slot as usize)
            .and_then(Option::take)
            .ok_or(StateError::InvalidAuxSlot(slot))?;
        self.free_list.push(slot);
        self.allocated_count -= 1;
        Ok(value)
    }

    /// Value in `slot`.
    #[inline]
    #[must_use]
    pub fn get(&self, slot: u16) -> Option<&T> {
        self.slots.get(slot as usize).and_then(Option::as_ref)
    }

    /// Mutable value in `slot`.
    #[inline]
    pub fn get_mut(&mut self, slot: u16) -> Option<&mut T> {
        self.slots.get_mut(slot as usize).and_then(Option::as_mut)
    }

    /// Cold data of the record at `index`, as seen by the write buffer.
    #[must_use]
    pub fn of(&self, store: &StateStore, index: usize) -> Option<&T> {
        store
            .get_write(index)
            .ok()
            .and_then(|record| self.get(record.aux_slot))
    }

    /// Gives the record at `index` cold data.
    ///
    /// If the record already has a slot in this store its value is replaced
    /// in place and the slot is kept.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidEntityIndex`] or [`StateError::CapacityExceeded`].
    pub fn attach(&mut self, store: &mut StateStore, index: usize, value: T) -> StateResult<u16> {
        let record = store.get_write(index)?;
        if let Some(existing) = self.get_mut(record.aux_slot) {
            *existing = value;
            return Ok(record.aux_slot);
        }
        let slot = self.allocate(value)?;
        store.set(index, record.with_aux_slot(slot))?;
        Ok(slot)
    }

    /// Removes the cold data of the record at `index`.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidEntityIndex`] if `index` is out of range,
    /// [`StateError::InvalidAuxSlot`] if the record names a slot this store
    /// does not hold.
    pub fn detach(&mut self, store: &mut StateStore, index: usize) -> StateResult<Option<T>> {
        let record: EntityRecord = store.get_write(index)?;
        if record.aux_slot == NO_AUX_SLOT {
            return Ok(None);
        }
        let value = self.release(record.aux_slot)?;
        store.set(index, record.with_aux_slot(NO_AUX_SLOT))?;
        Ok(Some(value))
    }
}
