//! # Commands
//!
//! The only way state changes. A command names one entity, carries the
//! tick it should run on and the player who asked for it, and goes through:
//!
//! ```text
//! Submitted -> Ordered -> Validated -> Executed
//!                                  \-> Rejected
//! ```
//!
//! ## Canonical Order
//!
//! Peers must execute a tick's commands in the same order regardless of
//! arrival order. The order is: command type, then player, then sequence
//! number. The remaining envelope fields break ties so the order stays total
//! even if a malformed peer reuses a sequence number.
//!
//! ## Authority
//!
//! | Command             | Who may issue it                 |
//! |---------------------|----------------------------------|
//! | `SetOwner`          | system only                      |
//! | `SetController`     | system only                      |
//! | `SetCategory`       | system only                      |
//! | `SetAuxSlot`        | system only                      |
//! | `TransferOwnership` | current owner (or system)        |

mod codec;
mod pipeline;
mod queue;

pub use codec::{decode_envelope, encode_envelope, CommandLog, ENVELOPE_SIZE, WIRE_VERSION};
pub use pipeline::{CommandPipeline, TickReport};
pub use queue::CommandSender;

use std::cmp::Ordering;

use regnum_core::{EntityId, EntityRecord, NO_OWNER};

use crate::error::{CodecError, RejectReason};

/// Player ID of the simulation itself (scripts, periodic systems, loaders).
pub const SYSTEM_PLAYER: u16 = 0;

/// Wire discriminant of a command. Also the primary sort key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum CommandType {
    /// Set owner and controller outright.
    SetOwner = 1,
    /// Set the controller (occupation).
    SetController = 2,
    /// Set the category.
    SetCategory = 3,
    /// Owner hands the entity to another player.
    TransferOwnership = 4,
    /// Point the entity at an auxiliary data slot.
    SetAuxSlot = 5,
}

impl TryFrom<u8> for CommandType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::SetOwner),
            2 => Ok(Self::SetController),
            3 => Ok(Self::SetCategory),
            4 => Ok(Self::TransferOwnership),
            5 => Ok(Self::SetAuxSlot),
            other => Err(CodecError::UnknownCommandType(other)),
        }
    }
}

/// What a command does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Set owner and controller.
    SetOwner {
        /// Target.
        entity: EntityId,
        /// New owner (`NO_OWNER` releases the entity).
        owner: u16,
        /// New controller.
        controller: u16,
    },
    /// Set the controller only.
    SetController {
        /// Target.
        entity: EntityId,
        /// New controller.
        controller: u16,
    },
    /// Set the category.
    SetCategory {
        /// Target.
        entity: EntityId,
        /// New category.
        category: u16,
    },
    /// Hand an owned entity to another player. The controller follows the
    /// owner unless the entity is occupied by someone else.
    TransferOwnership {
        /// Target.
        entity: EntityId,
        /// Receiving player.
        to: u16,
    },
    /// Attach an auxiliary data slot (0 detaches).
    SetAuxSlot {
        /// Target.
        entity: EntityId,
        /// Slot handle.
        slot: u16,
    },
}

impl CommandKind {
    /// Wire discriminant.
    #[must_use]
    pub const fn command_type(&self) -> CommandType {
        match self {
            Self::SetOwner { .. } => CommandType::SetOwner,
            Self::SetController { .. } => CommandType::SetController,
            Self::SetCategory { .. } => CommandType::SetCategory,
            Self::TransferOwnership { .. } => CommandType::TransferOwnership,
            Self::SetAuxSlot { .. } => CommandType::SetAuxSlot,
        }
    }

    /// Target entity.
    #[must_use]
    pub const fn entity(&self) -> EntityId {
        match *self {
            Self::SetOwner { entity, .. }
            | Self::SetController { entity, .. }
            | Self::SetCategory { entity, .. }
            | Self::TransferOwnership { entity, .. }
            | Self::SetAuxSlot { entity, .. } => entity,
        }
    }

    /// The two wire arguments. Unused arguments are zero.
    #[must_use]
    pub const fn args(&self) -> [u16; 2] {
        match *self {
            Self::SetOwner { owner, controller, .. } => [owner, controller],
            Self::SetController { controller, .. } => [controller, 0],
            Self::SetCategory { category, .. } => [category, 0],
            Self::TransferOwnership { to, .. } => [to, 0],
            Self::SetAuxSlot { slot, .. } => [slot, 0],
        }
    }

    /// Rebuilds a kind from wire fields. Unused arguments are ignored.
    #[must_use]
    pub const fn from_parts(command_type: CommandType, entity: EntityId, args: [u16; 2]) -> Self {
        match command_type {
            CommandType::SetOwner => Self::SetOwner {
                entity,
                owner: args[0],
                controller: args[1],
            },
            CommandType::SetController => Self::SetController {
                entity,
                controller: args[0],
            },
            CommandType::SetCategory => Self::SetCategory {
                entity,
                category: args[0],
            },
            CommandType::TransferOwnership => Self::TransferOwnership { entity, to: args[0] },
            CommandType::SetAuxSlot => Self::SetAuxSlot { entity, slot: args[0] },
        }
    }

    /// Validation predicate against the pre-tick record.
    ///
    /// # Errors
    ///
    /// The [`RejectReason`] for the first failed check.
    pub fn check(&self, player: u16, record: &EntityRecord) -> Result<(), RejectReason> {
        match *self {
            Self::TransferOwnership { entity, to } => {
                if to == NO_OWNER {
                    return Err(RejectReason::InvalidArgument("transfer to no owner"));
                }
                if player != SYSTEM_PLAYER && player != record.owner_id {
                    return Err(RejectReason::OwnerMismatch {
                        entity,
                        owner: record.owner_id,
                        player,
                    });
                }
                Ok(())
            }
            _ if player == SYSTEM_PLAYER => Ok(()),
            _ => Err(RejectReason::NotAuthorized { player }),
        }
    }

    /// Applies the command to the current write-buffer record.
    #[must_use]
    pub fn apply(&self, mut record: EntityRecord) -> EntityRecord {
        match *self {
            Self::SetOwner { owner, controller, .. } => {
                record.owner_id = owner;
                record.controller_id = controller;
            }
            Self::SetController { controller, .. } => record.controller_id = controller,
            Self::SetCategory { category, .. } => record.category_id = category,
            Self::TransferOwnership { to, .. } => {
                if record.controller_id == record.owner_id {
                    record.controller_id = to;
                }
                record.owner_id = to;
            }
            Self::SetAuxSlot { slot, .. } => record.aux_slot = slot,
        }
        record
    }
}

/// An intended mutation, as submitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Command {
    /// Tick the command should execute on.
    pub target_tick: u64,
    /// Submitting player.
    pub player_id: u16,
    /// The mutation.
    pub kind: CommandKind,
}

impl Command {
    /// Creates a command.
    #[inline]
    #[must_use]
    pub const fn new(target_tick: u64, player_id: u16, kind: CommandKind) -> Self {
        Self {
            target_tick,
            player_id,
            kind,
        }
    }
}

/// A command with its submission sequence number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CommandEnvelope {
    /// Submission sequence, unique per session.
    pub sequence: u64,
    /// The command.
    pub command: Command,
}

impl CommandEnvelope {
    /// Wraps a command.
    #[inline]
    #[must_use]
    pub const fn new(sequence: u64, command: Command) -> Self {
        Self { sequence, command }
    }

    /// Sort key: type, player, sequence, then the remaining fields.
    #[must_use]
    pub fn order_key(&self) -> (u8, u16, u64, u64, u16, [u16; 2]) {
        let kind = &self.command.kind;
        (
            kind.command_type() as u8,
            self.command.player_id,
            self.sequence,
            self.command.target_tick,
            kind.entity().raw(),
            kind.args(),
        )
    }
}

impl Ord for CommandEnvelope {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

impl PartialOrd for CommandEnvelope {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
