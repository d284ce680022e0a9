//! # Core Error Types
//!
//! All errors that can occur in the state kernel.

use thiserror::Error;

use crate::state::EntityId;

/// Errors from fixed-point arithmetic and parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MathError {
    /// Division or remainder with a zero divisor.
    #[error("division by zero")]
    DivisionByZero,

    /// Malformed decimal literal.
    #[error("invalid fixed-point literal: {input:?}")]
    Parse {
        /// The rejected input.
        input: String,
    },

    /// Literal outside the Q32.32 range.
    #[error("fixed-point literal out of range: {input:?}")]
    OutOfRange {
        /// The rejected input.
        input: String,
    },
}

/// Result type for fixed-point operations.
pub type MathResult<T> = Result<T, MathError>;

/// Errors from the entity state store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Index outside the allocated buffers.
    #[error("invalid entity index {index} (capacity {capacity})")]
    InvalidEntityIndex {
        /// The rejected index.
        index: usize,
        /// Current buffer capacity.
        capacity: usize,
    },

    /// No free index is left for a new entity.
    #[error("state store capacity exceeded: {capacity} entities")]
    CapacityExceeded {
        /// Current buffer capacity.
        capacity: usize,
    },

    /// The entity ID is not active.
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    /// The entity ID is already active.
    #[error("entity {0} already exists")]
    DuplicateEntity(EntityId),

    /// Requested capacity cannot be allocated.
    #[error("invalid capacity {requested}: {reason}")]
    InvalidCapacity {
        /// The requested capacity.
        requested: usize,
        /// Why it was refused.
        reason: &'static str,
    },

    /// The record type does not have the fixed layout the store requires.
    #[error("entity record layout is {size} bytes / align {align}, expected 8 / 8")]
    RecordLayout {
        /// Observed size in bytes.
        size: usize,
        /// Observed alignment in bytes.
        align: usize,
    },

    /// The buffers are held by readers and cannot change roles or size.
    #[error("state buffers busy: {readers} reader(s) active")]
    BufferBusy {
        /// Readers holding the read buffer.
        readers: usize,
    },

    /// The auxiliary slot is not allocated.
    #[error("invalid auxiliary slot {0}")]
    InvalidAuxSlot(u16),
}

/// Result type for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors from saving or loading persisted state.
#[derive(Error, Debug)]
pub enum PersistError {
    /// Underlying stream failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended inside a section.
    #[error("persisted state truncated in section `{section}`")]
    Truncated {
        /// Section being read.
        section: &'static str,
    },

    /// The stream decoded but its contents are inconsistent.
    #[error("persisted state corrupt: {0}")]
    Corrupt(String),

    /// The decoded state was rejected by the store.
    #[error(transparent)]
    State(#[from] StateError),
}
