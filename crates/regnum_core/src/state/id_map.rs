//! # ID <-> Index Mapping
//!
//! Stable entity IDs map to dense buffer indices `0..capacity`.
//!
//! Freed indices go back to a min-heap, so the next insert always takes the
//! lowest free index. Allocation therefore depends only on the current set of
//! active indices, not on the order of past removals, and a loaded session
//! allocates exactly like the session that saved it.
//!
//! The active list keeps insertion order through removals. Each index
//! remembers its insertion stamp, so removal is O(log n) instead of a scan.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use super::record::EntityId;
use crate::error::{StateError, StateResult};

/// Bidirectional stable-ID / dense-index map.
#[derive(Clone, Debug, Default)]
pub struct IdIndexMap {
    /// ID -> index.
    id_to_index: HashMap<EntityId, u32>,
    /// Index -> ID, `None` for free slots.
    index_to_id: Vec<Option<EntityId>>,
    /// Active IDs keyed by insertion stamp.
    active: BTreeMap<u64, EntityId>,
    /// Insertion stamp of the ID at each index.
    stamps: Vec<u64>,
    /// Next insertion stamp.
    next_stamp: u64,
    /// Freed indices below `high_water`.
    free: BinaryHeap<Reverse<u32>>,
    /// Indices `>= high_water` have never been handed out.
    high_water: u32,
}

impl IdIndexMap {
    /// Creates an empty map for `capacity` indices.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            id_to_index: HashMap::with_capacity(capacity),
            index_to_id: vec![None; capacity],
            active: BTreeMap::new(),
            stamps: vec![0; capacity],
            next_stamp: 0,
            free: BinaryHeap::new(),
            high_water: 0,
        }
    }

    /// Number of indices.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.index_to_id.len()
    }

    /// Number of active entities.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Returns true if no entity is active.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Returns true if `id` is active.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.id_to_index.contains_key(&id)
    }

    /// Dense index of `id`.
    #[inline]
    #[must_use]
    pub fn index_of(&self, id: EntityId) -> Option<usize> {
        self.id_to_index.get(&id).map(|&index| index as usize)
    }

    /// ID occupying `index`.
    #[inline]
    #[must_use]
    pub fn id_at(&self, index: usize) -> Option<EntityId> {
        self.index_to_id.get(index).copied().flatten()
    }

    /// Active IDs in insertion order.
    #[inline]
    pub fn active_ids(&self) -> impl ExactSizeIterator<Item = EntityId> + '_ {
        self.active.values().copied()
    }

    /// Assigns the lowest free index to `id`.
    ///
    /// # Errors
    ///
    /// [`StateError::DuplicateEntity`] if `id` is active,
    /// [`StateError::CapacityExceeded`] if every index is taken.
    pub fn insert(&mut self, id: EntityId) -> StateResult<usize> {
        if self.contains(id) {
            return Err(StateError::DuplicateEntity(id));
        }
        let index = if let Some(Reverse(index)) = self.free.pop() {
            index
        } else if (self.high_water as usize) < self.capacity() {
            self.high_water += 1;
            self.high_water - 1
        } else {
            return Err(StateError::CapacityExceeded {
                capacity: self.capacity(),
            });
        };

        self.link(id, index);
        Ok(index as usize)
    }

    /// Frees the index of `id` and returns it.
    ///
    /// # Errors
    ///
    /// [`StateError::UnknownEntity`] if `id` is not active.
    pub fn remove(&mut self, id: EntityId) -> StateResult<usize> {
        let index = self
            .id_to_index
            .remove(&id)
            .ok_or(StateError::UnknownEntity(id))?;
        self.index_to_id[index as usize] = None;
        self.active.remove(&self.stamps[index as usize]);
        self.free.push(Reverse(index));
        Ok(index as usize)
    }

    /// Extends the index space to `capacity`.
    pub(crate) fn grow(&mut self, capacity: usize) {
        if capacity > self.index_to_id.len() {
            self.index_to_id.resize(capacity, None);
            self.stamps.resize(capacity, 0);
        }
    }

    fn link(&mut self, id: EntityId, index: u32) {
        self.id_to_index.insert(id, index);
        self.index_to_id[index as usize] = Some(id);
        self.stamps[index as usize] = self.next_stamp;
        self.active.insert(self.next_stamp, id);
        self.next_stamp += 1;
    }

    /// `(id, index)` pairs sorted by ID.
    #[must_use]
    pub fn sorted_pairs(&self) -> Vec<(EntityId, usize)> {
        let mut pairs: Vec<_> = self
            .id_to_index
            .iter()
            .map(|(&id, &index)| (id, index as usize))
            .collect();
        pairs.sort_unstable();
        pairs
    }

    /// Rebuilds a map from persisted pairs and active list.
    ///
    /// # Errors
    ///
    /// Fails if an index is out of range, an ID or index repeats, or the
    /// active list does not name exactly the mapped IDs.
    pub fn restore(
        capacity: usize,
        pairs: &[(EntityId, usize)],
        active: &[EntityId],
    ) -> StateResult<Self> {
        if active.len() != pairs.len() {
            return Err(StateError::InvalidCapacity {
                requested: active.len(),
                reason: "active list length differs from id map",
            });
        }
        let mut indices = HashMap::with_capacity(pairs.len());
        for &(id, index) in pairs {
            if index >= capacity {
                return Err(StateError::InvalidEntityIndex { index, capacity });
            }
            if indices.insert(id, index).is_some() {
                return Err(StateError::DuplicateEntity(id));
            }
        }

        // Linking in active-list order reproduces the saved iteration order.
        let mut map = Self::with_capacity(capacity);
        for &id in active {
            let index = indices.remove(&id).ok_or(StateError::UnknownEntity(id))?;
            if map.index_to_id[index].is_some() {
                return Err(StateError::DuplicateEntity(id));
            }
            map.link(id, index as u32);
        }

        let high_water = pairs.iter().map(|&(_, index)| index + 1).max().unwrap_or(0);
        map.high_water = high_water as u32;
        map.free = (0..map.high_water)
            .filter(|&index| map.index_to_id[index as usize].is_none())
            .map(Reverse)
            .collect();
        Ok(map)
    }
}
