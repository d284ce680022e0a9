//! # REGNUM Core
//!
//! Deterministic state kernel of the REGNUM grand-strategy simulation:
//! - Q32.32 fixed-point numbers, bit-identical on every platform
//! - Double-buffered entity records with O(dirty) swaps
//! - Lock-free reads of the last completed tick from any thread
//!
//! ## Architecture Rules
//!
//! 1. **No floating point in simulation state** - use [`FixedPoint64`]
//! 2. **Single writer** - only the tick owner mutates the write buffer
//! 3. **Readers never block the tick** - they see the read buffer only
//!
//! ## Example
//!
//! ```rust
//! use regnum_core::{EntityId, EntityRecord, StateStore};
//!
//! let mut store = StateStore::new(1024)?;
//! store.insert(EntityId(1), EntityRecord::new(5, 0))?;
//! store.sync_full()?;
//! assert_eq!(store.get_entity(EntityId(1))?.owner_id, 5);
//! # Ok::<(), regnum_core::StateError>(())
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]
#![allow(clippy::cast_possible_truncation, clippy::module_name_repetitions)]

pub mod error;
pub mod math;
pub mod state;
pub mod sync;

pub use error::{MathError, MathResult, PersistError, StateError, StateResult};
pub use math::{FixedPoint64, FRACTIONAL_BITS};
pub use state::{
    AuxStore, DirtyTracker, EntityId, EntityRecord, IdIndexMap, StateReader, StateStore,
    StateView, SwapStats, MAX_CAPACITY, NO_AUX_SLOT, NO_OWNER,
};
pub use sync::{BufferReadGuard, DoubleBuffer};
