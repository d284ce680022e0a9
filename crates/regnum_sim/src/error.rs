//! # Simulation Error Types
//!
//! ## Taxonomy
//!
//! | Class         | Examples                                     | Effect                     |
//! |---------------|----------------------------------------------|----------------------------|
//! | Configuration | bad capacity, zero tier interval             | startup aborts             |
//! | Validation    | stale command, owner mismatch                | command dropped, reported  |
//! | Determinism   | checksum mismatch, cascade overflow, failure | session halts              |
//! | Capacity      | index out of range, store full               | operation fails            |

use std::path::PathBuf;

use regnum_core::{EntityId, PersistError, StateError};
use thiserror::Error;

/// Why a command was not executed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Target tick had already started when the command arrived.
    #[error("command for tick {target_tick} arrived at tick {current_tick}")]
    StaleCommand {
        /// Tick the command asked for.
        target_tick: u64,
        /// Tick being executed.
        current_tick: u64,
    },

    /// The entity is not active.
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    /// The submitting player does not own the entity.
    #[error("player {player} does not own {entity} (owner {owner})")]
    OwnerMismatch {
        /// Target entity.
        entity: EntityId,
        /// Owner in the read buffer.
        owner: u16,
        /// Submitting player.
        player: u16,
    },

    /// Only the system player may issue this command type.
    #[error("player {player} may not issue this command")]
    NotAuthorized {
        /// Submitting player.
        player: u16,
    },

    /// An argument is out of its domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

/// Errors from the fixed-layout command codec.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Envelope written by an incompatible version.
    #[error("unsupported command envelope version {0}")]
    UnsupportedVersion(u8),

    /// Discriminant outside the known command types.
    #[error("unknown command type {0}")]
    UnknownCommandType(u8),

    /// Not enough bytes for the fixed layout.
    #[error("command data truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },
}

/// Errors returned to a command submitter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// Target tick is already in the past.
    #[error("stale command: target tick {target_tick}, current tick {current_tick}")]
    StaleCommand {
        /// Tick the command asked for.
        target_tick: u64,
        /// Tick being executed.
        current_tick: u64,
    },

    /// The pipeline has shut down.
    #[error("command queue closed")]
    QueueClosed,

    /// Wire bytes did not decode.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Errors from the command pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// A command failed its predicate. Recoverable: the command is dropped.
    #[error("command {sequence} rejected: {reason}")]
    ValidationFailed {
        /// Sequence number of the command.
        sequence: u64,
        /// Why.
        reason: RejectReason,
    },

    /// A validated command could not be applied. The tick cannot be trusted.
    #[error("command {sequence} failed during tick {tick}: {source}")]
    ExecutionFailed {
        /// Tick being executed.
        tick: u64,
        /// Sequence number of the command.
        sequence: u64,
        /// Underlying store failure.
        source: StateError,
    },

    /// A peer computed a different checksum for the same tick.
    #[error("desync at tick {tick}: local {local:#018x}, remote {remote:#018x}")]
    ChecksumMismatch {
        /// The tick compared.
        tick: u64,
        /// Local checksum.
        local: u64,
        /// Peer checksum.
        remote: u64,
    },

    /// No checksum is retained for the tick.
    #[error("no checksum recorded for tick {tick}")]
    UnknownChecksum {
        /// The tick asked for.
        tick: u64,
    },
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors from event processing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Handlers kept emitting past the configured depth.
    #[error("event cascade exceeded depth {max_depth} ({pending} events still pending)")]
    CascadeDepthExceeded {
        /// Configured limit.
        max_depth: u32,
        /// Events discarded when processing stopped.
        pending: usize,
    },
}

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The TOML did not parse into the config schema.
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Error class, deciding how the orchestrating layer reacts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad startup input. Fatal before the first tick.
    Configuration,
    /// One command dropped. The tick continues.
    Validation,
    /// Peers may have diverged. The session halts.
    Determinism,
    /// Out of range or out of room. The operation fails.
    Capacity,
}

/// Top-level error of the simulation.
#[derive(Error, Debug)]
pub enum SimError {
    /// Configuration problem.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// State store failure.
    #[error(transparent)]
    State(#[from] StateError),

    /// Save or load failure.
    #[error(transparent)]
    Persist(#[from] PersistError),

    /// Submission failure.
    #[error(transparent)]
    Submit(#[from] SubmitError),

    /// Pipeline failure.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Event processing failure.
    #[error(transparent)]
    Event(#[from] EventError),

    /// The session halted earlier and refuses to continue.
    #[error("simulation halted at tick {tick}: {reason}")]
    Halted {
        /// Tick that failed.
        tick: u64,
        /// The original failure.
        reason: String,
    },
}

impl SimError {
    /// Classifies the error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_) => ErrorClass::Configuration,
            Self::State(StateError::RecordLayout { .. } | StateError::InvalidCapacity { .. }) => {
                ErrorClass::Configuration
            }
            Self::State(_) | Self::Persist(_) => ErrorClass::Capacity,
            Self::Submit(_) | Self::Pipeline(PipelineError::ValidationFailed { .. }) => {
                ErrorClass::Validation
            }
            Self::Pipeline(_) | Self::Event(_) | Self::Halted { .. } => ErrorClass::Determinism,
        }
    }

    /// Returns true if the session must stop.
    ///
    /// `UnknownChecksum` is a determinism-class query failure but does not
    /// prove divergence, so it is not fatal.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Pipeline(PipelineError::UnknownChecksum { .. }) => false,
            _ => matches!(
                self.class(),
                ErrorClass::Configuration | ErrorClass::Determinism
            ),
        }
    }
}

/// Result type for simulation operations.
pub type SimResult<T> = Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let stale = SimError::from(SubmitError::StaleCommand {
            target_tick: 1,
            current_tick: 2,
        });
        assert_eq!(stale.class(), ErrorClass::Validation);
        assert!(!stale.is_fatal());

        let desync = SimError::from(PipelineError::ChecksumMismatch {
            tick: 4,
            local: 1,
            remote: 2,
        });
        assert_eq!(desync.class(), ErrorClass::Determinism);
        assert!(desync.is_fatal());

        let cascade = SimError::from(EventError::CascadeDepthExceeded {
            max_depth: 8,
            pending: 3,
        });
        assert!(cascade.is_fatal());

        let bounds = SimError::from(StateError::InvalidEntityIndex {
            index: 9,
            capacity: 4,
        });
        assert_eq!(bounds.class(), ErrorClass::Capacity);
        assert!(!bounds.is_fatal());

        let config = SimError::from(ConfigError::Invalid("capacity".into()));
        assert!(config.is_fatal());

        assert!(!SimError::from(PipelineError::UnknownChecksum { tick: 1 }).is_fatal());
    }

    #[test]
    fn test_messages_name_the_culprit() {
        let err = PipelineError::ValidationFailed {
            sequence: 17,
            reason: RejectReason::UnknownEntity(EntityId(42)),
        };
        assert_eq!(err.to_string(), "command 17 rejected: unknown entity #42");
    }
}
