//! # REGNUM Sim - Deterministic Tick Pipeline
//!
//! Everything that happens between two published ticks:
//!
//! - **Commands**: the only way state changes, ordered canonically so every
//!   peer executes the same sequence
//! - **Events**: deferred, typed notifications with a hard cascade bound
//! - **Scheduler**: fixed-point clock, fixed calendar, staggered tiers
//! - **Simulation**: the composition root owning all of the above
//!
//! ## Determinism Contract
//!
//! ```text
//! PEER A                             PEER B
//!   |  same commands, any order        |
//!   |--------------------------------->|
//!   | sort (type, player, sequence)    | sort (type, player, sequence)
//!   | validate vs read buffer          | validate vs read buffer
//!   | execute vs write buffer          | execute vs write buffer
//!   | checksum tick N                  | checksum tick N
//!   |<------------- compare ---------->|
//! ```
//!
//! A mismatch halts the session instead of letting the peers drift.
//!
//! ## Example
//!
//! ```rust
//! use regnum_core::{EntityId, EntityRecord};
//! use regnum_sim::{Command, CommandKind, SimConfig, Simulation};
//!
//! let mut sim = Simulation::init(SimConfig::default())?;
//! sim.insert_entity(EntityId(1), EntityRecord::new(3, 0), 0)?;
//! sim.finish_loading()?;
//!
//! sim.submit(Command::new(1, 3, CommandKind::TransferOwnership { entity: EntityId(1), to: 4 }))?;
//! let report = sim.step()?;
//! assert_eq!(report.executed, 1);
//! assert_eq!(sim.store().get_entity(EntityId(1))?.owner_id, 4);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::module_name_repetitions
)]

pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod scheduler;
pub mod simulation;

pub use command::{
    Command, CommandEnvelope, CommandKind, CommandLog, CommandPipeline, CommandSender,
    CommandType, TickReport, SYSTEM_PLAYER,
};
pub use config::SimConfig;
pub use error::{
    CodecError, ConfigError, ErrorClass, EventError, PipelineError, PipelineResult, RejectReason,
    SimError, SimResult, SubmitError,
};
pub use events::{Event, EventBus, EventSink};
pub use scheduler::{
    GameDate, PeriodicContext, PeriodicSystem, TickClock, TickInfo, TickScheduler, TierConfig,
    TierSchedule,
};
pub use simulation::Simulation;
