//! # State Store
//!
//! Authoritative per-entity state: a [`DoubleBuffer`] of [`EntityRecord`]s,
//! the stable-ID map and the dirty tracker.
//!
//! ## Access Discipline
//!
//! | Accessor                      | Buffer | Who                              |
//! |-------------------------------|--------|----------------------------------|
//! | `set` / `update` / `get_write`| write  | command execution (single owner) |
//! | `get_read` / `view`           | read   | owner, between mutations         |
//! | `reader().read()`             | read   | any thread, any time             |
//!
//! Mutating methods take `&mut self`, so the owner can never hold a view of
//! the buffers across a write or a swap.
//!
//! ## ID Map Generations
//!
//! The owner edits a working ID map; readers see a published copy that is
//! replaced inside the swap's exclusive section, together with the buffer
//! it describes. A reader therefore never resolves an ID against records
//! from a different generation, even when a removed entity's index has
//! already been handed to a new one. Readers hold an `Arc` of the copy, not
//! a lock, so inserts and removals never wait on them.

use std::sync::Arc;

use parking_lot::RwLock;

use super::dirty::DirtyTracker;
use super::id_map::IdIndexMap;
use super::record::{EntityId, EntityRecord};
use crate::error::{StateError, StateResult};
use crate::sync::{BufferReadGuard, DoubleBuffer};

/// Largest supported capacity (one index per possible [`EntityId`]).
pub const MAX_CAPACITY: usize = 1 << 16;

/// Counters from one [`StateStore::swap`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SwapStats {
    /// Records copied into the new write buffer.
    pub copied: usize,
    /// Total records per buffer.
    pub capacity: usize,
}

impl SwapStats {
    /// Fraction of the buffer copied, in percent.
    #[must_use]
    pub fn copy_percent(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        (self.copied as f64 / self.capacity as f64) * 100.0
    }
}

/// Double-buffered entity state with dirty-tracked incremental swaps.
#[derive(Debug)]
pub struct StateStore {
    buffer: Arc<DoubleBuffer<EntityRecord>>,
    /// Working map, matches the write buffer.
    ids: IdIndexMap,
    /// Published map, matches the read buffer.
    published: Arc<RwLock<Arc<IdIndexMap>>>,
    /// The working map differs from the published one.
    ids_changed: bool,
    dirty: DirtyTracker,
}

impl StateStore {
    /// Allocates both buffers for `capacity` records.
    ///
    /// # Errors
    ///
    /// [`StateError::RecordLayout`] if the record layout is not 8/8,
    /// [`StateError::InvalidCapacity`] if `capacity` is zero or above
    /// [`MAX_CAPACITY`].
    pub fn new(capacity: usize) -> StateResult<Self> {
        EntityRecord::validate_layout()?;
        check_capacity(capacity)?;

        tracing::info!(
            "Allocating state store: {} records x2 ({} KiB)",
            capacity,
            capacity * EntityRecord::SIZE * 2 / 1024
        );

        Ok(Self {
            buffer: Arc::new(DoubleBuffer::new(capacity)),
            ids: IdIndexMap::with_capacity(capacity),
            published: Arc::new(RwLock::new(Arc::new(IdIndexMap::with_capacity(capacity)))),
            ids_changed: false,
            dirty: DirtyTracker::new(capacity),
        })
    }

    /// Records per buffer.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Number of active entities, including unpublished inserts.
    #[inline]
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if `id` is active in the write buffer.
    #[inline]
    #[must_use]
    pub fn has_entity(&self, id: EntityId) -> bool {
        self.ids.contains(id)
    }

    /// Dense index of `id` in the write buffer.
    #[inline]
    #[must_use]
    pub fn index_of(&self, id: EntityId) -> Option<usize> {
        self.ids.index_of(id)
    }

    /// ID occupying `index` in the write buffer.
    #[inline]
    #[must_use]
    pub fn id_at(&self, index: usize) -> Option<EntityId> {
        self.ids.id_at(index)
    }

    /// Active IDs in insertion order, including unpublished inserts.
    #[must_use]
    pub fn active_ids(&self) -> Vec<EntityId> {
        self.ids.active_ids().collect()
    }

    /// Returns true if inserts or removals are waiting for the next swap.
    #[inline]
    #[must_use]
    pub const fn has_unpublished_ids(&self) -> bool {
        self.ids_changed
    }

    /// Adds an entity and writes its initial record. Out-of-tick only.
    ///
    /// The entity becomes visible to readers after the next swap or
    /// [`Self::sync_full`].
    ///
    /// # Errors
    ///
    /// [`StateError::DuplicateEntity`] or [`StateError::CapacityExceeded`].
    pub fn insert(&mut self, id: EntityId, record: EntityRecord) -> StateResult<usize> {
        let index = self.ids.insert(id)?;
        self.ids_changed = true;
        self.buffer.set_write(index, record);
        self.dirty.mark(index);
        tracing::debug!("Inserted entity {} at index {}", id, index);
        Ok(index)
    }

    /// Removes an entity, resetting its record. Out-of-tick only.
    ///
    /// Returns the last written record. Readers keep seeing the entity
    /// until the next swap.
    ///
    /// # Errors
    ///
    /// [`StateError::UnknownEntity`] if `id` is not active.
    pub fn remove(&mut self, id: EntityId) -> StateResult<EntityRecord> {
        let index = self.ids.remove(id)?;
        self.ids_changed = true;
        let previous = self.buffer.write_value(index);
        self.buffer.set_write(index, EntityRecord::default());
        self.dirty.mark(index);
        tracing::debug!("Removed entity {} from index {}", id, index);
        Ok(previous)
    }

    /// Reallocates both buffers to `capacity`. Out-of-tick only.
    ///
    /// # Errors
    ///
    /// [`StateError::BufferBusy`] while any [`StateReader`] exists,
    /// [`StateError::InvalidCapacity`] for a shrink or an oversized request.
    pub fn grow(&mut self, capacity: usize) -> StateResult<()> {
        check_capacity(capacity)?;
        if capacity < self.capacity() {
            return Err(StateError::InvalidCapacity {
                requested: capacity,
                reason: "state store cannot shrink",
            });
        }
        let readers = Arc::strong_count(&self.buffer) - 1;
        let buffer = Arc::get_mut(&mut self.buffer).ok_or(StateError::BufferBusy { readers })?;

        tracing::info!("Growing state store: {} -> {} records", buffer.len(), capacity);
        buffer.grow(capacity);
        self.ids.grow(capacity);
        self.dirty.grow(capacity);
        Ok(())
    }

    /// Writes `record` at `index` in the write buffer and marks it dirty.
    ///
    /// Writing the value already present is a no-op. Returns true if the
    /// record changed.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidEntityIndex`] if `index` is out of range.
    #[inline]
    pub fn set(&mut self, index: usize, record: EntityRecord) -> StateResult<bool> {
        self.check_index(index)?;
        if self.buffer.write_value(index) == record {
            return Ok(false);
        }
        self.buffer.set_write(index, record);
        self.dirty.mark(index);
        Ok(true)
    }

    /// Read-modify-write on the write buffer.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidEntityIndex`] if `index` is out of range.
    #[inline]
    pub fn update(
        &mut self,
        index: usize,
        f: impl FnOnce(&mut EntityRecord),
    ) -> StateResult<bool> {
        let mut record = self.get_write(index)?;
        f(&mut record);
        self.set(index, record)
    }

    /// Record at `index` in the write buffer.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidEntityIndex`] if `index` is out of range.
    #[inline]
    pub fn get_write(&self, index: usize) -> StateResult<EntityRecord> {
        self.check_index(index)?;
        Ok(self.buffer.write_value(index))
    }

    /// Record at `index` in the read buffer.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidEntityIndex`] if `index` is out of range.
    #[inline]
    pub fn get_read(&self, index: usize) -> StateResult<EntityRecord> {
        self.check_index(index)?;
        Ok(self.buffer.read_value(index))
    }

    /// Stable record of entity `id`, resolved against the published map.
    ///
    /// # Errors
    ///
    /// [`StateError::UnknownEntity`] if `id` is not active in the read buffer.
    pub fn get_entity(&self, id: EntityId) -> StateResult<EntityRecord> {
        let index = self
            .published
            .read()
            .index_of(id)
            .ok_or(StateError::UnknownEntity(id))?;
        self.get_read(index)
    }

    /// Indices written since the last swap, in first-write order.
    #[inline]
    #[must_use]
    pub fn dirty_indices(&self) -> &[u32] {
        self.dirty.indices()
    }

    /// Returns true if `index` was written since the last swap.
    #[inline]
    #[must_use]
    pub fn is_dirty(&self, index: usize) -> bool {
        self.dirty.is_dirty(index)
    }

    /// Publishes the write buffer to readers and clears the dirty set.
    ///
    /// Cost is O(dirty): only written records are copied into the buffer
    /// that takes the write role.
    ///
    /// # Errors
    ///
    /// [`StateError::BufferBusy`] while a read guard is held. Nothing changes
    /// and the swap can be retried.
    pub fn swap(&mut self) -> StateResult<SwapStats> {
        let publish = self.ids_publisher();
        self.buffer
            .swap(self.dirty.indices(), publish)
            .map_err(|readers| StateError::BufferBusy { readers })?;
        self.ids_changed = false;

        let stats = SwapStats {
            copied: self.dirty.len(),
            capacity: self.capacity(),
        };
        self.dirty.clear();
        Ok(stats)
    }

    /// Copies the whole write buffer into the read buffer.
    ///
    /// Used once after bulk loading so both buffers start identical.
    ///
    /// # Errors
    ///
    /// [`StateError::BufferBusy`] while a read guard is held.
    pub fn sync_full(&mut self) -> StateResult<()> {
        self.ids_changed = true;
        let publish = self.ids_publisher();
        self.buffer
            .sync_full(publish)
            .map_err(|readers| StateError::BufferBusy { readers })?;
        self.ids_changed = false;
        self.dirty.clear();
        tracing::info!(
            "Full buffer sync: {} records, {} entities",
            self.capacity(),
            self.entity_count()
        );
        Ok(())
    }

    /// Thread-shareable handle to the read buffer.
    #[must_use]
    pub fn reader(&self) -> StateReader {
        StateReader {
            buffer: Arc::clone(&self.buffer),
            published: Arc::clone(&self.published),
        }
    }

    /// Query view of the read buffer for the owning thread.
    #[must_use]
    pub fn view(&self) -> StateView<'_> {
        let records = self.buffer.read();
        let ids = Arc::clone(&self.published.read());
        StateView { records, ids }
    }

    /// CRC32 of the read buffer, for cheap whole-state comparisons.
    #[must_use]
    pub fn read_digest(&self) -> u32 {
        records_digest(self.buffer.read_slice())
    }

    /// CRC32 of the write buffer.
    #[must_use]
    pub fn write_digest(&self) -> u32 {
        records_digest(self.buffer.write_slice())
    }

    /// The whole write buffer, for persistence.
    pub(crate) fn write_records(&self) -> &[EntityRecord] {
        self.buffer.write_slice()
    }

    /// Writes a record without dirty tracking, for bulk restore before `sync_full`.
    pub(crate) fn restore_record(&mut self, index: usize, record: EntityRecord) {
        self.buffer.set_write(index, record);
    }

    /// Replaces the working ID map, for bulk restore before `sync_full`.
    pub(crate) fn restore_ids(&mut self, ids: IdIndexMap) {
        self.ids = ids;
        self.ids_changed = true;
    }

    /// The working ID map, for persistence.
    pub(crate) fn ids(&self) -> &IdIndexMap {
        &self.ids
    }

    /// Installs a copy of the working map as the published one if it
    /// changed. Runs inside the buffer's exclusive section.
    fn ids_publisher(&self) -> impl FnOnce() + '_ {
        let changed = self.ids_changed;
        move || {
            if changed {
                *self.published.write() = Arc::new(self.ids.clone());
            }
        }
    }

    #[inline]
    fn check_index(&self, index: usize) -> StateResult<()> {
        let capacity = self.capacity();
        if index < capacity {
            Ok(())
        } else {
            Err(StateError::InvalidEntityIndex { index, capacity })
        }
    }
}

fn check_capacity(capacity: usize) -> StateResult<()> {
    if capacity == 0 {
        return Err(StateError::InvalidCapacity {
            requested: capacity,
            reason: "capacity must be greater than zero",
        });
    }
    if capacity > MAX_CAPACITY {
        return Err(StateError::InvalidCapacity {
            requested: capacity,
            reason: "capacity exceeds the entity id space",
        });
    }
    Ok(())
}

fn records_digest(records: &[EntityRecord]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for record in records {
        hasher.update(&record.to_le_bytes());
    }
    hasher.finalize()
}

/// Cloneable, `Send + Sync` handle for observer threads.
///
/// Holding a [`StateView`] from [`StateReader::read`] blocks the owner's
/// swap (it returns [`StateError::BufferBusy`]), so views should be short-lived.
#[derive(Clone, Debug)]
pub struct StateReader {
    buffer: Arc<DoubleBuffer<EntityRecord>>,
    published: Arc<RwLock<Arc<IdIndexMap>>>,
}

impl StateReader {
    /// Registers as a reader and returns a view of the stable buffer.
    #[must_use]
    pub fn read(&self) -> StateView<'_> {
        let records = self.buffer.read();
        // Registered first: the map cannot be republished until the guard drops.
        let ids = Arc::clone(&self.published.read());
        StateView { records, ids }
    }

    /// Like [`Self::read`], but gives up instead of waiting out a swap.
    #[must_use]
    pub fn try_read(&self) -> Option<StateView<'_>> {
        let records = self.buffer.try_read()?;
        let ids = Arc::clone(&self.published.read());
        Some(StateView { records, ids })
    }

    /// Number of swaps published so far.
    #[must_use]
    pub fn swap_count(&self) -> u64 {
        self.buffer.swap_count()
    }
}

/// Consistent snapshot of the read buffer and the ID map.
pub struct StateView<'a> {
    records: BufferReadGuard<'a, EntityRecord>,
    ids: Arc<IdIndexMap>,
}

impl StateView<'_> {
    /// Stable record of entity `id`.
    #[inline]
    #[must_use]
    pub fn get_entity(&self, id: EntityId) -> Option<EntityRecord> {
        self.ids
            .index_of(id)
            .and_then(|index| self.records.get(index).copied())
    }

    /// Record at a dense index.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<EntityRecord> {
        self.records.get(index).copied()
    }

    /// Number of active entities.
    #[inline]
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if `id` is active.
    #[inline]
    #[must_use]
    pub fn has_entity(&self, id: EntityId) -> bool {
        self.ids.contains(id)
    }

    /// Active entities owned by `owner_id`, in insertion order.
    pub fn entities_by_owner(
        &self,
        owner_id: u16,
    ) -> impl Iterator<Item = (EntityId, EntityRecord)> + '_ {
        self.entities()
            .filter(move |(_, record)| record.owner_id == owner_id)
    }

    /// All active entities, in insertion order.
    pub fn entities(&self) -> impl Iterator<Item = (EntityId, EntityRecord)> + '_ {
        self.ids.active_ids().filter_map(|id| {
            self.ids
                .index_of(id)
                .and_then(|index| self.records.get(index))
                .map(|&record| (id, record))
        })
    }

    /// The raw read buffer.
    #[inline]
    #[must_use]
    pub fn records(&self) -> &[EntityRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(owner: u16) -> EntityRecord {
        EntityRecord::new(owner, 0)
    }

    #[test]
    fn test_capacity_validation() {
        assert!(matches!(
            StateStore::new(0),
            Err(StateError::InvalidCapacity { requested: 0, .. })
        ));
        assert!(StateStore::new(MAX_CAPACITY + 1).is_err());
        assert_eq!(StateStore::new(4).unwrap().capacity(), 4);
    }

    #[test]
    fn test_capacity_four_scenario() {
        let mut store = StateStore::new(4).unwrap();
        store.set(1, owned(5)).unwrap();
        store.set(3, owned(7)).unwrap();
        let stats = store.swap().unwrap();
        assert_eq!(stats.copied, 2);

        assert_eq!(store.get_read(1).unwrap().owner_id, 5);
        assert_eq!(store.get_read(3).unwrap().owner_id, 7);
        assert_eq!(store.get_read(0).unwrap(), EntityRecord::default());
        assert_eq!(store.get_read(2).unwrap(), EntityRecord::default());
        assert!(store.dirty_indices().is_empty());

        let before = store.read_digest();
        assert_eq!(store.swap().unwrap().copied, 0);
        assert_eq!(store.read_digest(), before);
        assert_eq!(store.get_read(1).unwrap().owner_id, 5);
    }

    #[test]
    fn test_no_stale_value_after_two_swaps() {
        let mut store = StateStore::new(2).unwrap();
        store.set(0, owned(1)).unwrap();
        store.swap().unwrap();
        store.set(1, owned(2)).unwrap();
        store.swap().unwrap();
        // Index 0 was written two swaps ago; both buffers must still hold it.
        assert_eq!(store.get_write(0).unwrap().owner_id, 1);
        assert_eq!(store.get_read(0).unwrap().owner_id, 1);
    }

    #[test]
    fn test_set_same_value_is_clean() {
        let mut store = StateStore::new(2).unwrap();
        assert!(!store.set(0, EntityRecord::default()).unwrap());
        assert!(store.dirty_indices().is_empty());
        assert!(store.set(0, owned(3)).unwrap());
        assert!(store.set(0, owned(4)).unwrap());
        assert_eq!(store.dirty_indices(), &[0]);
    }

    #[test]
    fn test_index_bounds() {
        let mut store = StateStore::new(2).unwrap();
        let err = StateError::InvalidEntityIndex { index: 2, capacity: 2 };
        assert_eq!(store.set(2, owned(1)), Err(err.clone()));
        assert_eq!(store.get_read(2), Err(err.clone()));
        assert_eq!(store.get_write(2), Err(err));
    }

    #[test]
    fn test_insert_remove_lifecycle() {
        let mut store = StateStore::new(2).unwrap();
        store.insert(EntityId(10), owned(1)).unwrap();
        store.insert(EntityId(20), owned(2)).unwrap();
        assert_eq!(
            store.insert(EntityId(30), owned(3)),
            Err(StateError::CapacityExceeded { capacity: 2 })
        );
        store.sync_full().unwrap();
        assert_eq!(store.get_entity(EntityId(20)).unwrap().owner_id, 2);

        assert_eq!(store.remove(EntityId(10)).unwrap().owner_id, 1);
        assert!(!store.has_entity(EntityId(10)));
        assert_eq!(store.insert(EntityId(30), owned(3)).unwrap(), 0);
        store.swap().unwrap();
        assert_eq!(store.get_entity(EntityId(30)).unwrap().owner_id, 3);
        assert_eq!(
            store.get_entity(EntityId(10)),
            Err(StateError::UnknownEntity(EntityId(10)))
        );
    }

    #[test]
    fn test_reader_blocks_swap_and_grow() {
        let mut store = StateStore::new(4).unwrap();
        store.insert(EntityId(1), owned(9)).unwrap();
        let reader = store.reader();
        {
            let view = reader.read();
            assert_eq!(view.get_entity(EntityId(1)), None);
            assert_eq!(store.swap(), Err(StateError::BufferBusy { readers: 1 }));
            assert!(store.has_unpublished_ids());
        }
        store.swap().unwrap();
        assert_eq!(reader.read().get_entity(EntityId(1)).unwrap().owner_id, 9);
        assert_eq!(reader.swap_count(), 1);

        assert_eq!(store.grow(8), Err(StateError::BufferBusy { readers: 1 }));
        drop(reader);
        store.grow(8).unwrap();
        assert_eq!(store.capacity(), 8);
        assert_eq!(store.get_entity(EntityId(1)).unwrap().owner_id, 9);
        store.set(7, owned(4)).unwrap();
        assert!(store.grow(4).is_err());
    }

    #[test]
    fn test_reused_index_follows_buffer_generation() {
        let mut store = StateStore::new(4).unwrap();
        store.insert(EntityId(1), owned(1)).unwrap();
        store.insert(EntityId(2), owned(2)).unwrap();
        store.sync_full().unwrap();
        let reader = store.reader();

        store.remove(EntityId(1)).unwrap();
        assert_eq!(store.insert(EntityId(50), owned(9)).unwrap(), 0);
        assert!(store.has_unpublished_ids());
        {
            let view = reader.read();
            assert_eq!(view.get_entity(EntityId(50)), None);
            assert_eq!(view.get_entity(EntityId(1)).unwrap().owner_id, 1);
            assert_eq!(view.entity_count(), 2);
        }
        assert_eq!(store.get_entity(EntityId(1)).unwrap().owner_id, 1);
        assert_eq!(
            store.get_entity(EntityId(50)),
            Err(StateError::UnknownEntity(EntityId(50)))
        );

        store.swap().unwrap();
        assert!(!store.has_unpublished_ids());
        let view = reader.read();
        assert_eq!(view.get_entity(EntityId(50)).unwrap().owner_id, 9);
        assert_eq!(view.get_entity(EntityId(1)), None);
        let ids: Vec<_> = view.entities().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![EntityId(2), EntityId(50)]);
    }

    #[test]
    fn test_insert_and_remove_while_viewing() {
        let mut store = StateStore::new(4).unwrap();
        store.insert(EntityId(1), owned(1)).unwrap();
        store.sync_full().unwrap();
        let reader = store.reader();
        let view = reader.read();

        store.insert(EntityId(3), owned(3)).unwrap();
        store.remove(EntityId(1)).unwrap();
        assert_eq!(store.entity_count(), 1);
        assert_eq!(store.swap(), Err(StateError::BufferBusy { readers: 1 }));
        assert!(view.has_entity(EntityId(1)));
        assert!(!view.has_entity(EntityId(3)));
        drop(view);

        store.swap().unwrap();
        let view = reader.read();
        assert!(!view.has_entity(EntityId(1)));
        assert_eq!(view.get_entity(EntityId(3)).unwrap().owner_id, 3);
    }

    #[test]
    fn test_view_queries() {
        let mut store = StateStore::new(8).unwrap();
        for (id, owner) in [(1, 5), (2, 6), (3, 5), (4, 7)] {
            store.insert(EntityId(id), owned(owner)).unwrap();
        }
        store.sync_full().unwrap();

        let view = store.view();
        assert_eq!(view.entity_count(), 4);
        assert!(view.has_entity(EntityId(3)));
        let owned_by_five: Vec<_> = view.entities_by_owner(5).map(|(id, _)| id).collect();
        assert_eq!(owned_by_five, vec![EntityId(1), EntityId(3)]);
    }

    #[test]
    fn test_reader_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StateReader>();
    }
}
