//! # Entity State
//!
//! Hot per-entity records in a double buffer, the ID map, dirty tracking,
//! cold auxiliary data and the persisted layout.

mod cold;
mod dirty;
mod id_map;
mod persist;
mod record;
mod store;

pub use cold::AuxStore;
pub use dirty::DirtyTracker;
pub use id_map::IdIndexMap;
pub use record::{EntityId, EntityRecord, NO_AUX_SLOT, NO_OWNER};
pub use store::{StateReader, StateStore, StateView, SwapStats, MAX_CAPACITY};
