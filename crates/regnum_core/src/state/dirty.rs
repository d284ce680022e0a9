//! # Dirty Tracking
//!
//! Records which entity indices were written since the last swap.
//!
//! A bitset deduplicates marks; a list keeps the first-mark order so the
//! swap copies and the checksum walks exactly the written indices without
//! scanning the whole capacity.

/// Per-index dirty flags plus the list of marked indices.
#[derive(Clone, Debug, Default)]
pub struct DirtyTracker {
    /// Bitset: 1 = dirty, 0 = clean. 64 entities per u64.
    bits: Vec<u64>,
    /// Dirty indices in first-mark order, no duplicates.
    list: Vec<u32>,
    /// Capacity in entities.
    capacity: usize,
}

impl DirtyTracker {
    /// Creates a tracker for `capacity` indices.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            bits: vec![0u64; capacity.div_ceil(64)],
            list: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Marks `index` dirty. Returns true if it was clean.
    ///
    /// # Performance
    ///
    /// O(1), no allocation once the list has reached capacity.
    #[inline]
    pub fn mark(&mut self, index: usize) -> bool {
        debug_assert!(index < self.capacity, "index out of bounds");
        let (word, mask) = (index / 64, 1u64 << (index % 64));
        match self.bits.get_mut(word) {
            Some(bits) if *bits & mask == 0 => {
                *bits |= mask;
                self.list.push(index as u32);
                true
            }
            _ => false,
        }
    }

    /// Checks if an index is dirty.
    #[inline]
    #[must_use]
    pub fn is_dirty(&self, index: usize) -> bool {
        if index >= self.capacity {
            return false;
        }
        (self.bits[index / 64] >> (index % 64)) & 1 == 1
    }

    /// Dirty indices in first-mark order.
    #[inline]
    #[must_use]
    pub fn indices(&self) -> &[u32] {
        &self.list
    }

    /// Number of dirty indices.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Returns true if nothing is dirty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Clears all dirty flags.
    ///
    /// # Performance
    ///
    /// O(dirty), only the marked words are touched.
    pub fn clear(&mut self) {
        for &index in &self.list {
            self.bits[index as usize / 64] = 0;
        }
        self.list.clear();
    }

    /// Extends tracking to `capacity` indices.
    pub fn grow(&mut self, capacity: usize) {
        if capacity > self.capacity {
            self.bits.resize(capacity.div_ceil(64), 0);
            self.list.reserve(capacity - self.capacity);
            self.capacity = capacity;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_dedupes_in_order() {
        let mut dirty = DirtyTracker::new(200);
        assert!(dirty.mark(130));
        assert!(dirty.mark(3));
        assert!(!dirty.mark(130));
        assert_eq!(dirty.indices(), &[130, 3]);
        assert!(dirty.is_dirty(3));
        assert!(!dirty.is_dirty(4));
        assert!(!dirty.is_dirty(500));
    }

    #[test]
    fn test_clear() {
        let mut dirty = DirtyTracker::new(128);
        dirty.mark(1);
        dirty.mark(65);
        dirty.clear();
        assert!(dirty.is_empty());
        assert!(!dirty.is_dirty(1));
        assert!(!dirty.is_dirty(65));
        assert!(dirty.mark(65));
    }

    #[test]
    fn test_grow_keeps_marks() {
        let mut dirty = DirtyTracker::new(70);
        dirty.mark(5);
        dirty.mark(69);

        dirty.grow(140);
        assert!(dirty.is_dirty(69));
        assert!(dirty.mark(139));
        assert!(!dirty.mark(5));
        assert_eq!(dirty.indices(), &[5, 69, 139]);
    }
}
