//! # Tick Scheduler
//!
//! Drives simulated time: the [`TickClock`] turns real deltas into ticks,
//! calendar boundaries become events, and [`TierSchedule`] spreads periodic
//! per-entity work so no tick pays for a whole tier at once.
//!
//! ## Tick Phases
//!
//! ```text
//! clock fires tick N
//!   -> commands for N execute (CommandPipeline)
//!   -> HourlyTick / DayStarted / MonthStarted / YearStarted queued
//!   -> StateStore::swap publishes N
//!   -> periodic systems read N and submit commands for N+1 or later
//!   -> EventBus::process
//! ```

mod calendar;
mod clock;
mod tiers;

pub use calendar::{
    GameDate, DAYS_PER_MONTH, HOURS_PER_DAY, HOURS_PER_MONTH, HOURS_PER_YEAR, MONTHS_PER_YEAR,
};
pub use clock::{TickClock, TickInfo};
pub use tiers::{validate_tiers, TierConfig, TierSchedule};

use regnum_core::{EntityId, FixedPoint64, StateError, StateResult, StateStore, SwapStats};

use crate::command::CommandSender;
use crate::events::{DayStarted, EventBus, HourlyTick, MonthStarted, YearStarted};

/// Swap attempts before giving up on a tick while readers hold the buffer.
const SWAP_ATTEMPTS: u32 = 64;

// ============================================================================
// PERIODIC SYSTEMS
// ============================================================================

/// What a periodic system sees when it runs.
pub struct PeriodicContext<'a> {
    /// Tick just published.
    pub tick: u64,
    /// Its date.
    pub date: GameDate,
    /// Entities due this tick, tier by tier, ascending ID within a tier.
    pub due: &'a [EntityId],
    /// The store. Systems read the published buffer through it.
    pub state: &'a StateStore,
    /// Where follow-up commands go. They must target a later tick.
    pub commands: &'a CommandSender,
}

/// Work that runs every tick on the entities that are due.
///
/// Systems never mutate state directly. They submit commands.
pub trait PeriodicSystem: Send {
    /// Name for logging.
    fn name(&self) -> &'static str;

    /// Runs once per tick, after the tick is published.
    fn run(&mut self, ctx: &PeriodicContext<'_>);
}

// ============================================================================
// SCHEDULER
// ============================================================================

/// Clock, calendar, tiers and periodic systems.
pub struct TickScheduler {
    clock: TickClock,
    tiers: TierSchedule,
    systems: Vec<Box<dyn PeriodicSystem>>,
    /// Reused due list.
    due: Vec<EntityId>,
}

impl std::fmt::Debug for TickScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickScheduler")
            .field("clock", &self.clock)
            .field("tiers", &self.tiers.tier_sizes())
            .field("systems", &self.systems.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl TickScheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(clock: TickClock, tiers: TierSchedule) -> Self {
        Self {
            clock,
            tiers,
            systems: Vec::new(),
            due: Vec::new(),
        }
    }

    /// The clock.
    #[inline]
    #[must_use]
    pub const fn clock(&self) -> &TickClock {
        &self.clock
    }

    /// The clock, for speed and pause control.
    #[inline]
    pub fn clock_mut(&mut self) -> &mut TickClock {
        &mut self.clock
    }

    /// The tier schedule.
    #[inline]
    #[must_use]
    pub const fn tiers(&self) -> &TierSchedule {
        &self.tiers
    }

    /// The tier schedule, for assigning entities.
    #[inline]
    pub fn tiers_mut(&mut self) -> &mut TierSchedule {
        &mut self.tiers
    }

    /// Registers a periodic system. Systems run in registration order.
    pub fn add_system(&mut self, system: Box<dyn PeriodicSystem>) {
        tracing::info!("Registered periodic system '{}'", system.name());
        self.systems.push(system);
    }

    /// Number of registered systems.
    #[must_use]
    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// Feeds real time to the clock. Returns the number of ticks now due.
    pub fn advance(&mut self, real_delta: FixedPoint64) -> u32 {
        self.clock.advance(real_delta)
    }

    /// Next due tick, if the clock has one.
    pub fn next_tick(&mut self) -> Option<TickInfo> {
        self.clock.poll_tick()
    }

    /// Fires a tick regardless of accumulated time.
    pub fn force_tick(&mut self) -> TickInfo {
        self.clock.force_tick()
    }

    /// Queues the calendar events for `info`.
    ///
    /// Boundary events follow the hourly event and go from finest to coarsest.
    pub fn emit_calendar_events(info: &TickInfo, bus: &mut EventBus) {
        let TickInfo { tick, date } = *info;
        bus.emit(HourlyTick { tick, date });
        if info.new_day() {
            bus.emit(DayStarted { tick, date });
        }
        if info.new_month() {
            tracing::debug!("Month started: {}", date);
            bus.emit(MonthStarted { tick, date });
        }
        if info.new_year() {
            tracing::info!("Year {} started at tick {}", date.year, tick);
            bus.emit(YearStarted { tick, date });
        }
    }

    /// Swaps the store's buffers, retrying briefly while readers hold a guard.
    ///
    /// # Errors
    ///
    /// [`StateError::BufferBusy`] if readers still hold the buffer after
    /// every retry. The dirty set is kept, so a later call publishes it.
    pub fn publish(store: &mut StateStore) -> StateResult<SwapStats> {
        let mut attempt = 0;
        loop {
            match store.swap() {
                Err(StateError::BufferBusy { readers }) if attempt < SWAP_ATTEMPTS => {
                    attempt += 1;
                    if attempt == 1 {
                        tracing::debug!("Swap waiting on {} reader(s)", readers);
                    }
                    std::thread::yield_now();
                }
                result => return result,
            }
        }
    }

    /// Runs every system on the entities due at `info.tick`.
    pub fn run_systems(&mut self, info: &TickInfo, state: &StateStore, commands: &CommandSender) {
        self.tiers.collect_due(info.tick, &mut self.due);
        if self.systems.is_empty() {
            return;
        }
        let ctx = PeriodicContext {
            tick: info.tick,
            date: info.date,
            due: &self.due,
            state,
            commands,
        };
        for system in &mut self.systems {
            system.run(&ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::register_core_events;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn scheduler() -> TickScheduler {
        let tiers = TierSchedule::new(vec![
            TierConfig { max_relevance: 0, interval: 1 },
            TierConfig { max_relevance: u32::MAX, interval: 3 },
        ])
        .unwrap();
        TickScheduler::new(TickClock::new(FixedPoint64::ONE, 1444, 24), tiers)
    }

    struct Recorder {
        seen: Arc<Mutex<Vec<(u64, Vec<EntityId>)>>>,
    }

    impl PeriodicSystem for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn run(&mut self, ctx: &PeriodicContext<'_>) {
            self.seen.lock().push((ctx.tick, ctx.due.to_vec()));
        }
    }

    #[test]
    fn test_calendar_events() {
        let mut scheduler = scheduler();
        let mut bus = EventBus::new(4, 16);
        register_core_events(&mut bus);

        let days = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&days);
        bus.subscribe::<DayStarted>(move |event, _| sink.lock().push(event.tick));
        let hours = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&hours);
        bus.subscribe::<HourlyTick>(move |_, _| *counter.lock() += 1);

        for _ in 0..48 {
            let info = scheduler.force_tick();
            TickScheduler::emit_calendar_events(&info, &mut bus);
        }
        bus.process().unwrap();

        assert_eq!(*hours.lock(), 48);
        assert_eq!(*days.lock(), vec![24, 48]);
    }

    #[test]
    fn test_systems_see_due_entities() {
        let mut scheduler = scheduler();
        let seen = Arc::new(Mutex::new(Vec::new()));
        scheduler.add_system(Box::new(Recorder { seen: Arc::clone(&seen) }));
        scheduler.tiers_mut().assign(EntityId(1), 0, 0);
        scheduler.tiers_mut().assign(EntityId(5), 9, 0);

        let store = StateStore::new(4).unwrap();
        let pipeline = crate::command::CommandPipeline::new(1, 1);
        let sender = pipeline.sender();
        for _ in 0..3 {
            let info = scheduler.force_tick();
            scheduler.run_systems(&info, &store, &sender);
        }

        // Entity 5: interval 3, last = 0 - 5 % 3 = -2, due at tick 1.
        let seen = seen.lock();
        assert_eq!(seen[0], (1, vec![EntityId(1), EntityId(5)]));
        assert_eq!(seen[1], (2, vec![EntityId(1)]));
        assert_eq!(seen[2], (3, vec![EntityId(1)]));
    }

    #[test]
    fn test_publish_waits_for_readers() {
        let mut store = StateStore::new(4).unwrap();
        store.insert(EntityId(1), regnum_core::EntityRecord::new(2, 0)).unwrap();
        let reader = store.reader();

        let guard = reader.read();
        assert!(matches!(
            TickScheduler::publish(&mut store),
            Err(StateError::BufferBusy { .. })
        ));
        drop(guard);

        let stats = TickScheduler::publish(&mut store).unwrap();
        assert_eq!(stats.copied, 1);
        assert_eq!(store.get_entity(EntityId(1)).unwrap().owner_id, 2);
    }
}
