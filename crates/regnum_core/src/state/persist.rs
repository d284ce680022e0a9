//! # Persisted State Layout
//!
//! Flat little-endian stream, field order fixed:
//!
//! ```text
//! u32                 capacity
//! u32                 active entity count
//! [u8; 8] x capacity  write-buffer records (EntityRecord::to_le_bytes)
//! u32                 map entry count
//! (u16, i32) x count  id -> index pairs, ascending id
//! u32                 active list length
//! u16 x length        active ids, insertion order
//! ```
//!
//! Loading restores both buffers identically via `sync_full`, so the first
//! tick after a load never reads a stale buffer.

use std::io::{ErrorKind, Read, Write};

use super::id_map::IdIndexMap;
use super::record::{EntityId, EntityRecord};
use super::store::{StateStore, MAX_CAPACITY};
use crate::error::PersistError;

impl StateStore {
    /// Writes the write buffer, ID map and active list to `writer`.
    ///
    /// # Errors
    ///
    /// [`PersistError::Io`] on stream failure.
    pub fn save_to<W: Write>(&self, writer: &mut W) -> Result<(), PersistError> {
        let ids = self.ids();
        let pairs = ids.sorted_pairs();

        writer.write_all(&(self.capacity() as u32).to_le_bytes())?;
        writer.write_all(&(ids.len() as u32).to_le_bytes())?;

        for record in self.write_records() {
            writer.write_all(&record.to_le_bytes())?;
        }

        writer.write_all(&(pairs.len() as u32).to_le_bytes())?;
        for (id, index) in &pairs {
            writer.write_all(&id.raw().to_le_bytes())?;
            writer.write_all(&(*index as i32).to_le_bytes())?;
        }

        writer.write_all(&(ids.len() as u32).to_le_bytes())?;
        for id in ids.active_ids() {
            writer.write_all(&id.raw().to_le_bytes())?;
        }

        tracing::info!(
            "Saved state: {} records, {} entities",
            self.capacity(),
            ids.len()
        );
        Ok(())
    }

    /// Reads a stream produced by [`StateStore::save_to`].
    ///
    /// # Errors
    ///
    /// [`PersistError::Truncated`] if the stream ends early,
    /// [`PersistError::Corrupt`] if sections disagree with each other,
    /// [`PersistError::Io`] on any other stream failure.
    pub fn load_from<R: Read>(reader: &mut R) -> Result<Self, PersistError> {
        let capacity = read_u32(reader, "header")? as usize;
        let active_count = read_u32(reader, "header")? as usize;
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(PersistError::Corrupt(format!("capacity {capacity} out of range")));
        }
        if active_count > capacity {
            return Err(PersistError::Corrupt(format!(
                "{active_count} active entities exceed capacity {capacity}"
            )));
        }

        let mut store = Self::new(capacity)?;
        for index in 0..capacity {
            let record = EntityRecord::from_le_bytes(read_bytes(reader, "records")?);
            store.restore_record(index, record);
        }

        let map_count = read_u32(reader, "id map")? as usize;
        if map_count != active_count {
            return Err(PersistError::Corrupt(format!(
                "id map has {map_count} entries, header says {active_count}"
            )));
        }
        let mut pairs = Vec::with_capacity(map_count);
        for _ in 0..map_count {
            let id = EntityId(u16::from_le_bytes(read_bytes(reader, "id map")?));
            let index = i32::from_le_bytes(read_bytes(reader, "id map")?);
            let index = usize::try_from(index)
                .map_err(|_| PersistError::Corrupt(format!("negative index {index} for {id}")))?;
            pairs.push((id, index));
        }

        let list_len = read_u32(reader, "active list")? as usize;
        if list_len != active_count {
            return Err(PersistError::Corrupt(format!(
                "active list has {list_len} ids, header says {active_count}"
            )));
        }
        let mut active = Vec::with_capacity(list_len);
        for _ in 0..list_len {
            active.push(EntityId(u16::from_le_bytes(read_bytes(reader, "active list")?)));
        }

        let ids = IdIndexMap::restore(capacity, &pairs, &active)?;
        store.restore_ids(ids);
        store.sync_full()?;

        tracing::info!("Loaded state: {} records, {} entities", capacity, active_count);
        Ok(store)
    }
}

fn read_bytes<R: Read, const N: usize>(
    reader: &mut R,
    section: &'static str,
) -> Result<[u8; N], PersistError> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes).map_err(|err| match err.kind() {
        ErrorKind::UnexpectedEof => PersistError::Truncated { section },
        _ => PersistError::Io(err),
    })?;
    Ok(bytes)
}

fn read_u32<R: Read>(reader: &mut R, section: &'static str) -> Result<u32, PersistError> {
    read_bytes(reader, section).map(u32::from_le_bytes)
}
