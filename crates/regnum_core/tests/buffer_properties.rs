//! Property tests for the double-buffered state store.
//!
//! - After a swap, the read buffer holds exactly the written values at
//!   dirty indices and is unchanged everywhere else.
//! - Every index whose read value changed across a swap was dirty.

use proptest::prelude::*;
use regnum_core::{EntityId, EntityRecord, StateError, StateStore};

const CAPACITY: usize = 32;

fn record_strategy() -> impl Strategy<Value = EntityRecord> {
    (0u16..8, 0u16..8, 0u16..4).prop_map(|(owner, controller, category)| EntityRecord {
        owner_id: owner,
        controller_id: controller,
        category_id: category,
        aux_slot: 0,
    })
}

fn writes_strategy() -> impl Strategy<Value = Vec<(usize, EntityRecord)>> {
    prop::collection::vec((0..CAPACITY, record_strategy()), 0..48)
}

fn snapshot_read(store: &StateStore) -> Vec<EntityRecord> {
    (0..store.capacity()).map(|i| store.get_read(i).unwrap()).collect()
}

fn snapshot_write(store: &StateStore) -> Vec<EntityRecord> {
    (0..store.capacity()).map(|i| store.get_write(i).unwrap()).collect()
}

proptest! {
    #[test]
    fn swap_publishes_exactly_the_dirty_set(ticks in prop::collection::vec(writes_strategy(), 1..6)) {
        let mut store = StateStore::new(CAPACITY).unwrap();

        for writes in ticks {
            let read_before = snapshot_read(&store);
            for (index, record) in writes {
                store.set(index, record).unwrap();
            }
            let write_before = snapshot_write(&store);
            let dirty: Vec<usize> = store.dirty_indices().iter().map(|&i| i as usize).collect();

            store.swap().unwrap();
            let read_after = snapshot_read(&store);

            for index in 0..CAPACITY {
                if dirty.contains(&index) {
                    prop_assert_eq!(read_after[index], write_before[index]);
                } else {
                    prop_assert_eq!(read_after[index], read_before[index]);
                }
                if read_after[index] != read_before[index] {
                    prop_assert!(dirty.contains(&index), "index {} changed without being dirty", index);
                }
            }

            // Both buffers start the next tick identical.
            prop_assert_eq!(snapshot_write(&store), read_after);
            prop_assert!(store.dirty_indices().is_empty());
        }
    }

    #[test]
    fn dirty_list_has_no_duplicates(writes in writes_strategy()) {
        let mut store = StateStore::new(CAPACITY).unwrap();
        for (index, record) in writes {
            store.set(index, record).unwrap();
        }
        let mut dirty = store.dirty_indices().to_vec();
        let len = dirty.len();
        dirty.sort_unstable();
        dirty.dedup();
        prop_assert_eq!(dirty.len(), len);
    }

    #[test]
    fn unique_writes_are_all_published(indices in prop::collection::btree_set(0..CAPACITY, 0..CAPACITY)) {
        let mut store = StateStore::new(CAPACITY).unwrap();
        for &index in &indices {
            store.set(index, EntityRecord::new(index as u16 + 1, 0)).unwrap();
        }
        prop_assert_eq!(store.dirty_indices().len(), indices.len());
        store.swap().unwrap();
        for index in 0..CAPACITY {
            let expected = if indices.contains(&index) { index as u16 + 1 } else { 0 };
            prop_assert_eq!(store.get_read(index).unwrap().owner_id, expected);
        }
    }
}

#[test]
fn observer_thread_sees_only_completed_ticks() {
    let mut store = StateStore::new(CAPACITY).unwrap();
    for id in 0..CAPACITY as u16 {
        store.insert(EntityId(id), EntityRecord::default()).unwrap();
    }
    store.sync_full().unwrap();
    let reader = store.reader();

    let observer = std::thread::spawn(move || {
        let mut seen = 0u16;
        while seen < 200 {
            let view = reader.read();
            let owners: Vec<u16> = view.entities().map(|(_, record)| record.owner_id).collect();
            assert!(owners.windows(2).all(|pair| pair[0] == pair[1]), "torn tick: {owners:?}");
            assert!(owners[0] >= seen);
            seen = owners[0];
        }
    });

    for tick in 1..=200u16 {
        for index in 0..CAPACITY {
            store.update(index, |record| record.owner_id = tick).unwrap();
        }
        loop {
            match store.swap() {
                Ok(_) => break,
                Err(StateError::BufferBusy { .. }) => std::hint::spin_loop(),
                Err(err) => panic!("unexpected swap error: {err}"),
            }
        }
    }
    observer.join().unwrap();
}
