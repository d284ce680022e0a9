//! # Entity Records
//!
//! The hot, fixed-size state of one province or country.
//!
//! Records are plain numbers only. Anything variable-length lives in the
//! [`AuxStore`](super::AuxStore) and is referenced through `aux_slot`.

use std::fmt;
use std::mem::{align_of, size_of};

use bytemuck::{Pod, Zeroable};

use crate::error::{StateError, StateResult};

/// Stable entity identifier.
///
/// Assigned at load time and never reused within a session. Distinct from the
/// dense buffer index, which is reused after removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct EntityId(pub u16);

impl EntityId {
    /// Returns the raw identifier.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Owner/controller value meaning "nobody".
pub const NO_OWNER: u16 = 0;

/// Auxiliary slot value meaning "no cold data".
pub const NO_AUX_SLOT: u16 = 0;

/// Fixed-size entity state.
///
/// ```text
/// offset 0: owner_id      u16
/// offset 2: controller_id u16
/// offset 4: category_id   u16
/// offset 6: aux_slot      u16
/// ```
///
/// `Pod` rules out pointers and padding at compile time; the 8-byte size and
/// alignment are re-checked by [`EntityRecord::validate_layout`] when a store
/// is created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C, align(8))]
pub struct EntityRecord {
    /// Owning country.
    pub owner_id: u16,
    /// Country currently in control (occupation, etc.).
    pub controller_id: u16,
    /// Terrain/type/category classification.
    pub category_id: u16,
    /// Slot in the auxiliary cold-data store, [`NO_AUX_SLOT`] if none.
    pub aux_slot: u16,
}

const _: () = assert!(size_of::<EntityRecord>() == EntityRecord::SIZE);

impl EntityRecord {
    /// Encoded and in-memory size in bytes.
    pub const SIZE: usize = 8;

    /// Creates a record owned and controlled by `owner_id`.
    #[inline]
    #[must_use]
    pub const fn new(owner_id: u16, category_id: u16) -> Self {
        Self {
            owner_id,
            controller_id: owner_id,
            category_id,
            aux_slot: NO_AUX_SLOT,
        }
    }

    /// Returns the record with a different auxiliary slot.
    #[inline]
    #[must_use]
    pub const fn with_aux_slot(mut self, aux_slot: u16) -> Self {
        self.aux_slot = aux_slot;
        self
    }

    /// Returns true if the controller differs from the owner.
    #[inline]
    #[must_use]
    pub const fn is_occupied(&self) -> bool {
        self.controller_id != self.owner_id
    }

    /// Little-endian encoding used by saves and checksums.
    ///
    /// Fields are swapped to little-endian first, so the cast yields the
    /// same bytes on every host.
    #[must_use]
    pub fn to_le_bytes(&self) -> [u8; Self::SIZE] {
        let mut le = *self;
        for field in bytemuck::cast_mut::<Self, [u16; 4]>(&mut le) {
            *field = field.to_le();
        }
        bytemuck::cast(le)
    }

    /// Decodes the little-endian encoding.
    #[must_use]
    pub fn from_le_bytes(bytes: [u8; Self::SIZE]) -> Self {
        let mut record: Self = bytemuck::cast(bytes);
        for field in bytemuck::cast_mut::<Self, [u16; 4]>(&mut record) {
            *field = u16::from_le(*field);
        }
        record
    }

    /// Verifies the in-memory layout is exactly 8 bytes, 8-byte aligned.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::RecordLayout`] on any other layout.
    pub fn validate_layout() -> StateResult<()> {
        let (size, align) = (size_of::<Self>(), align_of::<Self>());
        if size == Self::SIZE && align == 8 {
            Ok(())
        } else {
            Err(StateError::RecordLayout { size, align })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert!(EntityRecord::validate_layout().is_ok());
        assert_eq!(bytemuck::bytes_of(&EntityRecord::default()), &[0u8; 8]);
    }

    #[test]
    fn test_le_encoding() {
        let record = EntityRecord {
            owner_id: 0x0102,
            controller_id: 0x0304,
            category_id: 0x0506,
            aux_slot: 0x0708,
        };
        let bytes = record.to_le_bytes();
        assert_eq!(bytes, [0x02, 0x01, 0x04, 0x03, 0x06, 0x05, 0x08, 0x07]);
        assert_eq!(EntityRecord::from_le_bytes(bytes), record);
    }

    #[test]
    fn test_occupation() {
        let mut record = EntityRecord::new(5, 1);
        assert!(!record.is_occupied());
        record.controller_id = 9;
        assert!(record.is_occupied());
    }
}
