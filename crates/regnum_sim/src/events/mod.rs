//! # Simulation Events
//!
//! Everything the core announces to the outside world travels on the
//! [`EventBus`]. Events are plain `Copy` records; nothing here is delivered
//! synchronously.
//!
//! ## Event Flow for one tick
//! ```text
//! 1. CommandPipeline: OwnershipChanged / ControllerChanged / CategoryChanged
//! 2. CommandPipeline: CommandRejected (one per dropped command)
//! 3. TickScheduler:   HourlyTick, then DayStarted / MonthStarted / YearStarted
//! 4. StateStore swap
//! 5. EventBus::process delivers 1-3 to subscribers
//! ```

mod bus;

pub use bus::{Event, EventBus, EventSink, EventStats, Handler, ProcessStats};

use regnum_core::EntityId;

use crate::error::RejectReason;
use crate::scheduler::GameDate;

// ============================================================================
// LIFECYCLE EVENTS
// ============================================================================

/// Emitted once when a simulation finishes initializing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimulationInitialized {
    /// Number of entities loaded.
    pub entity_count: usize,
    /// First tick that will execute.
    pub first_tick: u64,
}

// ============================================================================
// CALENDAR EVENTS
// ============================================================================

/// One simulated hour elapsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HourlyTick {
    /// Tick just executed.
    pub tick: u64,
    /// Calendar date of that tick.
    pub date: GameDate,
}

/// A new day began.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DayStarted {
    /// Tick that crossed the boundary.
    pub tick: u64,
    /// The new date.
    pub date: GameDate,
}

/// A new month began.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonthStarted {
    /// Tick that crossed the boundary.
    pub tick: u64,
    /// The new date.
    pub date: GameDate,
}

/// A new year began.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct YearStarted {
    /// Tick that crossed the boundary.
    pub tick: u64,
    /// The new date.
    pub date: GameDate,
}

// ============================================================================
// STATE CHANGE EVENTS
// ============================================================================

/// An entity changed owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OwnershipChanged {
    /// Tick of the change.
    pub tick: u64,
    /// The entity.
    pub entity: EntityId,
    /// Previous owner.
    pub from: u16,
    /// New owner.
    pub to: u16,
}

/// An entity changed controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControllerChanged {
    /// Tick of the change.
    pub tick: u64,
    /// The entity.
    pub entity: EntityId,
    /// Previous controller.
    pub from: u16,
    /// New controller.
    pub to: u16,
}

/// An entity changed category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CategoryChanged {
    /// Tick of the change.
    pub tick: u64,
    /// The entity.
    pub entity: EntityId,
    /// Previous category.
    pub from: u16,
    /// New category.
    pub to: u16,
}

/// A command was dropped without being applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandRejected {
    /// Tick the command targeted.
    pub tick: u64,
    /// Sequence number of the command.
    pub sequence: u64,
    /// Submitting player.
    pub player_id: u16,
    /// Why.
    pub reason: RejectReason,
}

impl Event for SimulationInitialized {}
impl Event for HourlyTick {}
impl Event for DayStarted {}
impl Event for MonthStarted {}
impl Event for YearStarted {}
impl Event for OwnershipChanged {}
impl Event for ControllerChanged {}
impl Event for CategoryChanged {}
impl Event for CommandRejected {}

/// Registers every core event type, in a fixed order.
///
/// Delivery order across types follows registration order, so every peer
/// must register the same way.
pub fn register_core_events(bus: &mut EventBus) {
    bus.register::<OwnershipChanged>();
    bus.register::<ControllerChanged>();
    bus.register::<CategoryChanged>();
    bus.register::<CommandRejected>();
    bus.register::<HourlyTick>();
    bus.register::<DayStarted>();
    bus.register::<MonthStarted>();
    bus.register::<YearStarted>();
    bus.register::<SimulationInitialized>();
}
