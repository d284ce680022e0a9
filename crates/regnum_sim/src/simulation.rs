//! # Simulation
//!
//! Composition root. Owns the store, the pipeline, the bus and the
//! scheduler, and passes them to each other explicitly. There is no global
//! instance: create one with [`Simulation::init`] and drop it (or call
//! [`Simulation::shutdown`]) when done.
//!
//! ## Lifecycle
//!
//! ```text
//! init(config)
//!   -> insert_entity(...) x N      bulk load, nothing published yet
//!   -> finish_loading()            sync_full, SimulationInitialized
//!   -> advance(delta) / step()     ticks
//!   -> shutdown()
//! ```
//!
//! ## Halting
//!
//! A fatal error (execution failure, cascade overflow, checksum mismatch)
//! halts the session. Every later tick call returns [`SimError::Halted`]
//! with the original reason; the orchestrating layer decides what happens
//! next.

use std::io::{Read, Write};

use regnum_core::{
    AuxStore, EntityId, EntityRecord, FixedPoint64, PersistError, StateError, StateReader,
    StateStore,
};

use crate::command::{
    Command, CommandEnvelope, CommandLog, CommandPipeline, CommandSender, TickReport,
};
use crate::config::SimConfig;
use crate::error::{SimError, SimResult, SubmitError};
use crate::events::{register_core_events, Event, EventBus, EventSink, SimulationInitialized};
use crate::scheduler::{
    GameDate, PeriodicSystem, TickClock, TickInfo, TickScheduler, TierSchedule,
};

/// A running simulation session.
#[derive(Debug)]
pub struct Simulation {
    config: SimConfig,
    store: StateStore,
    pipeline: CommandPipeline,
    bus: EventBus,
    scheduler: TickScheduler,
    sender: CommandSender,
    /// Bulk load in progress; inserts are not published one by one.
    loading: bool,
    /// Tick whose swap is still waiting on readers. Its systems have not run.
    unpublished: Option<TickInfo>,
    /// Out-of-tick changes whose swap is still waiting on readers.
    pending_publish: bool,
    /// Tick and reason of a fatal error.
    halted: Option<(u64, String)>,
}

impl Simulation {
    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Creates a session in the loading state.
    ///
    /// # Errors
    ///
    /// [`SimError::Config`] or [`SimError::State`] for unusable configuration.
    pub fn init(config: SimConfig) -> SimResult<Self> {
        config.validate()?;
        let store = StateStore::new(config.capacity)?;

        let mut bus = EventBus::new(config.max_cascade_depth, config.event_queue_capacity);
        register_core_events(&mut bus);

        let pipeline = CommandPipeline::new(
            config.command_history_ticks,
            config.checksum_history_ticks,
        );
        let sender = pipeline.sender();

        let mut clock = TickClock::new(
            config.seconds_per_hour,
            config.start_year,
            config.max_ticks_per_advance,
        );
        clock.set_speed(config.speed);
        let scheduler = TickScheduler::new(clock, TierSchedule::new(config.tiers.clone())?);

        tracing::info!(
            "Simulation initialized: capacity {}, start year {}, {} tiers",
            config.capacity,
            config.start_year,
            config.tiers.len()
        );

        Ok(Self {
            config,
            store,
            pipeline,
            bus,
            scheduler,
            sender,
            loading: true,
            unpublished: None,
            pending_publish: false,
            halted: None,
        })
    }

    /// Adds an entity and schedules its periodic work by `relevance`.
    ///
    /// Outside bulk load the new entity is published immediately, or with
    /// the next swap if readers hold the buffer.
    ///
    /// # Errors
    ///
    /// [`SimError::State`] for a duplicate ID or a full store.
    pub fn insert_entity(
        &mut self,
        id: EntityId,
        record: EntityRecord,
        relevance: u32,
    ) -> SimResult<usize> {
        self.check_running()?;
        let index = self.store.insert(id, record)?;
        let tick = self.scheduler.clock().tick();
        self.scheduler.tiers_mut().assign(id, relevance, tick);
        if !self.loading {
            self.publish_between_ticks()?;
        }
        Ok(index)
    }

    /// Removes an entity and its periodic work.
    ///
    /// Readers keep seeing it until the removal is published.
    ///
    /// # Errors
    ///
    /// [`SimError::State`] if the ID is not active.
    pub fn remove_entity(&mut self, id: EntityId) -> SimResult<EntityRecord> {
        self.check_running()?;
        let record = self.store.remove(id)?;
        self.scheduler.tiers_mut().remove(id);
        if !self.loading {
            self.publish_between_ticks()?;
        }
        Ok(record)
    }

    /// Attaches cold data to an entity outside a tick.
    ///
    /// The caller owns `aux`; detach before removing the entity so the slot
    /// is freed with it.
    ///
    /// # Errors
    ///
    /// [`SimError::State`] if the entity is unknown or `aux` is full.
    pub fn attach_aux<T>(
        &mut self,
        aux: &mut AuxStore<T>,
        id: EntityId,
        value: T,
    ) -> SimResult<u16> {
        self.check_running()?;
        let index = self
            .store
            .index_of(id)
            .ok_or(StateError::UnknownEntity(id))?;
        let slot = aux.attach(&mut self.store, index, value)?;
        if !self.loading {
            self.publish_between_ticks()?;
        }
        Ok(slot)
    }

    /// Detaches and returns an entity's cold data outside a tick.
    ///
    /// # Errors
    ///
    /// [`SimError::State`] if the entity is unknown or its slot is not in `aux`.
    pub fn detach_aux<T>(
        &mut self,
        aux: &mut AuxStore<T>,
        id: EntityId,
    ) -> SimResult<Option<T>> {
        self.check_running()?;
        let index = self
            .store
            .index_of(id)
            .ok_or(StateError::UnknownEntity(id))?;
        let value = aux.detach(&mut self.store, index)?;
        if !self.loading {
            self.publish_between_ticks()?;
        }
        Ok(value)
    }

    /// Ends bulk load: both buffers become identical and readers see the
    /// loaded state.
    ///
    /// # Errors
    ///
    /// [`SimError::State`] if readers hold the buffer.
    pub fn finish_loading(&mut self) -> SimResult<()> {
        self.store.sync_full()?;
        self.loading = false;
        self.pending_publish = false;
        self.bus.emit(SimulationInitialized {
            entity_count: self.store.entity_count(),
            first_tick: self.pipeline.current_tick(),
        });
        tracing::info!(
            "Loading finished: {} entities, first tick {}",
            self.store.entity_count(),
            self.pipeline.current_tick()
        );
        Ok(())
    }

    /// Writes the session: the last executed tick (u64 LE), then the state
    /// store layout.
    ///
    /// # Errors
    ///
    /// [`SimError::Persist`] on I/O failure.
    pub fn save<W: Write>(&self, writer: &mut W) -> SimResult<()> {
        let tick = self.scheduler.clock().tick();
        writer
            .write_all(&tick.to_le_bytes())
            .map_err(PersistError::from)?;
        self.store.save_to(writer)?;
        tracing::info!("Saved session at tick {}", tick);
        Ok(())
    }

    /// Restores a session written by [`Simulation::save`].
    ///
    /// The store capacity comes from the save. Tier membership is rebuilt
    /// from `relevance`.
    ///
    /// # Errors
    ///
    /// [`SimError::Config`] for bad configuration, [`SimError::Persist`]
    /// for a truncated or corrupt stream.
    pub fn load<R, F>(config: SimConfig, reader: &mut R, relevance: F) -> SimResult<Self>
    where
        R: Read,
        F: Fn(EntityId) -> u32 + Sync,
    {
        let mut sim = Self::init(config)?;

        let mut header = [0u8; 8];
        reader.read_exact(&mut header).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => PersistError::Truncated { section: "tick" },
            _ => PersistError::Io(e),
        })?;
        let tick = u64::from_le_bytes(header);

        sim.store = StateStore::load_from(reader)?;
        sim.scheduler.clock_mut().set_tick(tick);
        sim.pipeline.reset_tick(tick + 1);

        let ids = sim.store.active_ids();
        sim.scheduler.tiers_mut().recompute(&ids, tick, relevance);
        sim.finish_loading()?;
        tracing::info!("Loaded session at tick {} ({} entities)", tick, ids.len());
        Ok(sim)
    }

    /// Ends the session. Returns the last executed tick.
    pub fn shutdown(mut self) -> u64 {
        let tick = self.scheduler.clock().tick();
        let pending = self.bus.pending();
        self.bus.clear();
        tracing::info!(
            "Simulation shut down at tick {} ({} undelivered events discarded, {} delivered total)",
            tick,
            pending,
            self.bus.stats().delivered
        );
        tick
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    /// A submission handle for other threads.
    #[must_use]
    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    /// Submits a command. Returns its sequence number.
    ///
    /// # Errors
    ///
    /// [`SubmitError::StaleCommand`] if its tick has already started.
    pub fn submit(&self, command: Command) -> Result<u64, SubmitError> {
        self.sender.submit(command)
    }

    /// Submits every envelope of `log` and runs ticks until the last one
    /// targeted has executed.
    ///
    /// # Errors
    ///
    /// [`SimError::Submit`] if an envelope targets an executed tick, or any
    /// error from [`Simulation::step`].
    pub fn replay(&mut self, log: &CommandLog) -> SimResult<Vec<TickReport>> {
        self.check_running()?;
        let mut last = self.pipeline.current_tick().saturating_sub(1);
        for envelope in log.envelopes() {
            self.sender.submit_envelope(*envelope)?;
            last = last.max(envelope.command.target_tick);
        }

        let mut reports = Vec::new();
        while self.pipeline.current_tick() <= last {
            reports.push(self.step()?);
        }
        tracing::info!("Replayed {} commands over {} ticks", log.len(), reports.len());
        Ok(reports)
    }

    // ========================================================================
    // TICKING
    // ========================================================================

    /// Feeds real time and runs every tick that becomes due.
    ///
    /// If readers still hold the previous tick's buffer, remaining ticks
    /// stay in the clock and run on a later call.
    ///
    /// # Errors
    ///
    /// Any tick error. Fatal errors halt the session.
    pub fn advance(&mut self, real_delta: FixedPoint64) -> SimResult<Vec<TickReport>> {
        self.check_running()?;
        self.scheduler.advance(real_delta);

        let mut reports = Vec::new();
        loop {
            match self.finish_publish() {
                Ok(()) => {}
                Err(SimError::State(StateError::BufferBusy { readers })) => {
                    tracing::warn!(
                        "Publication after tick {} held by {} reader(s), deferring {} tick(s)",
                        self.scheduler.clock().tick(),
                        readers,
                        self.scheduler.clock().pending_ticks()
                    );
                    break;
                }
                Err(error) => return Err(error),
            }
            let Some(info) = self.scheduler.next_tick() else {
                break;
            };
            reports.push(self.run_tick(info)?);
        }
        Ok(reports)
    }

    /// Runs exactly one tick regardless of the clock.
    ///
    /// # Errors
    ///
    /// [`StateError::BufferBusy`] if the previous tick is still unpublished,
    /// otherwise any tick error.
    pub fn step(&mut self) -> SimResult<TickReport> {
        self.check_running()?;
        self.finish_publish()?;
        let info = self.scheduler.force_tick();
        self.run_tick(info)
    }

    /// Compares a peer's checksum. A mismatch halts the session.
    ///
    /// # Errors
    ///
    /// [`SimError::Pipeline`] on mismatch or an unretained tick.
    pub fn verify_remote_checksum(&mut self, tick: u64, remote: u64) -> SimResult<()> {
        let result = self
            .pipeline
            .verify_checksum(tick, remote)
            .map_err(SimError::from);
        if let Err(error) = &result {
            if error.is_fatal() {
                self.halt(tick, error);
            }
        }
        result
    }

    fn run_tick(&mut self, info: TickInfo) -> SimResult<TickReport> {
        let result = self.execute(info);
        if let Err(error) = &result {
            if error.is_fatal() {
                self.halt(info.tick, error);
            }
        }
        result
    }

    fn execute(&mut self, info: TickInfo) -> SimResult<TickReport> {
        debug_assert_eq!(info.tick, self.pipeline.current_tick());
        let report = self.pipeline.execute_tick(&mut self.store, &mut self.bus)?;
        TickScheduler::emit_calendar_events(&info, &mut self.bus);

        match TickScheduler::publish(&mut self.store) {
            Ok(stats) => {
                tracing::trace!(
                    "Tick {} published, {} records copied ({:.2}%)",
                    info.tick,
                    stats.copied,
                    stats.copy_percent()
                );
                self.scheduler.run_systems(&info, &self.store, &self.sender);
            }
            Err(StateError::BufferBusy { readers }) => {
                tracing::warn!(
                    "Tick {} unpublished: {} reader(s) holding the buffer",
                    info.tick,
                    readers
                );
                self.unpublished = Some(info);
            }
            Err(error) => return Err(error.into()),
        }

        self.bus.process()?;
        Ok(report)
    }

    /// Publishes a deferred tick or out-of-tick change, then runs the
    /// deferred tick's systems.
    ///
    /// A new tick must not start before this succeeds: validation reads the
    /// published buffer, and every peer has to validate against the same one.
    fn finish_publish(&mut self) -> SimResult<()> {
        if self.unpublished.is_none() && !self.pending_publish {
            return Ok(());
        }
        TickScheduler::publish(&mut self.store)?;
        self.pending_publish = false;
        if let Some(info) = self.unpublished.take() {
            self.scheduler.run_systems(&info, &self.store, &self.sender);
            self.bus.process()?;
        }
        Ok(())
    }

    /// Publishes an out-of-tick change. While readers hold the buffer the
    /// change stays committed and waits for the next swap.
    fn publish_between_ticks(&mut self) -> SimResult<()> {
        if self.unpublished.is_some() || self.pending_publish {
            // The pending swap will carry this change too.
            self.pending_publish = true;
            return Ok(());
        }
        match TickScheduler::publish(&mut self.store) {
            Ok(_) => Ok(()),
            Err(StateError::BufferBusy { readers }) => {
                tracing::debug!(
                    "Out-of-tick change deferred: {} reader(s) holding the buffer",
                    readers
                );
                self.pending_publish = true;
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    fn check_running(&self) -> SimResult<()> {
        match &self.halted {
            Some((tick, reason)) => Err(SimError::Halted {
                tick: *tick,
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn halt(&mut self, tick: u64, error: &SimError) {
        tracing::error!("Simulation halted at tick {}: {}", tick, error);
        self.halted = Some((tick, error.to_string()));
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The state store. Queries through it read the published buffer.
    #[must_use]
    pub const fn store(&self) -> &StateStore {
        &self.store
    }

    /// A thread-shareable reader of published state.
    #[must_use]
    pub fn reader(&self) -> StateReader {
        self.store.reader()
    }

    /// The event bus, for subscribing.
    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    /// The event bus.
    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Subscribes to an event type.
    pub fn subscribe<T: Event>(
        &mut self,
        handler: impl FnMut(&T, &mut EventSink<'_>) + Send + 'static,
    ) {
        self.bus.subscribe(handler);
    }

    /// Registers a periodic system.
    pub fn add_system(&mut self, system: Box<dyn PeriodicSystem>) {
        self.scheduler.add_system(system);
    }

    /// The scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &TickScheduler {
        &self.scheduler
    }

    /// The scheduler, for clock control and tier changes.
    pub fn scheduler_mut(&mut self) -> &mut TickScheduler {
        &mut self.scheduler
    }

    /// Recomputes every entity's tier. Returns how many moved.
    pub fn recompute_tiers<F>(&mut self, relevance: F) -> usize
    where
        F: Fn(EntityId) -> u32 + Sync,
    {
        let ids = self.store.active_ids();
        let tick = self.scheduler.clock().tick();
        self.scheduler.tiers_mut().recompute(&ids, tick, relevance)
    }

    /// The pipeline.
    #[must_use]
    pub const fn pipeline(&self) -> &CommandPipeline {
        &self.pipeline
    }

    /// Last executed tick.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.scheduler.clock().tick()
    }

    /// Date of the last executed tick.
    #[must_use]
    pub fn date(&self) -> GameDate {
        self.scheduler.clock().date()
    }

    /// Checksum of `tick`, if retained.
    #[must_use]
    pub fn checksum(&self, tick: u64) -> Option<u64> {
        self.pipeline.checksum(tick)
    }

    /// Commands executed on `tick`, if retained.
    #[must_use]
    pub fn history(&self, tick: u64) -> Option<&[CommandEnvelope]> {
        self.pipeline.history(tick)
    }

    /// Every retained executed command.
    #[must_use]
    pub fn command_log(&self) -> CommandLog {
        self.pipeline.command_log()
    }

    /// Returns true once a fatal error has stopped the session.
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Returns true while a tick is waiting on readers to be published.
    #[must_use]
    pub const fn has_unpublished_tick(&self) -> bool {
        self.unpublished.is_some()
    }

    /// Returns true while any committed change is waiting on readers to be
    /// published.
    #[must_use]
    pub const fn has_pending_publish(&self) -> bool {
        self.unpublished.is_some() || self.pending_publish
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandKind, SYSTEM_PLAYER};
    use crate::events::HourlyTick;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn small_config() -> SimConfig {
        SimConfig {
            capacity: 16,
            ..SimConfig::default()
        }
    }

    fn loaded() -> Simulation {
        let mut sim = Simulation::init(small_config()).unwrap();
        for id in 1..=4u16 {
            sim.insert_entity(EntityId(id), EntityRecord::new(id, 0), 0).unwrap();
        }
        sim.finish_loading().unwrap();
        sim
    }

    #[test]
    fn test_rejects_bad_config() {
        let config = SimConfig {
            capacity: 0,
            ..SimConfig::default()
        };
        assert!(matches!(Simulation::init(config), Err(SimError::Config(_))));
    }

    #[test]
    fn test_step_publishes_commands() {
        let mut sim = loaded();
        sim.submit(Command::new(
            1,
            SYSTEM_PLAYER,
            CommandKind::SetCategory { entity: EntityId(2), category: 7 },
        ))
        .unwrap();

        let report = sim.step().unwrap();
        assert_eq!(report.tick, 1);
        assert_eq!(sim.tick(), 1);
        assert_eq!(sim.store().get_entity(EntityId(2)).unwrap().category_id, 7);
    }

    #[test]
    fn test_advance_runs_due_ticks() {
        let mut sim = loaded();
        let hours = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&hours);
        sim.subscribe::<HourlyTick>(move |_, _| *counter.lock() += 1);

        let reports = sim.advance(FixedPoint64::from_int(3)).unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(*hours.lock(), 3);
        assert_eq!(sim.date().hour, 3);
    }

    #[test]
    fn test_mid_session_insert_is_visible() {
        let mut sim = loaded();
        sim.step().unwrap();
        sim.insert_entity(EntityId(40), EntityRecord::new(9, 1), 5).unwrap();
        assert_eq!(sim.store().get_entity(EntityId(40)).unwrap().owner_id, 9);
        assert_eq!(sim.scheduler().tiers().tier_of(EntityId(40)), Some(1));
    }

    #[test]
    fn test_reader_defers_publication() {
        let mut sim = loaded();
        sim.submit(Command::new(
            1,
            SYSTEM_PLAYER,
            CommandKind::SetController { entity: EntityId(1), controller: 3 },
        ))
        .unwrap();

        let reader = sim.reader();
        let view = reader.read();
        sim.step().unwrap();
        assert!(sim.has_unpublished_tick());
        assert_eq!(view.get_entity(EntityId(1)).unwrap().controller_id, 1);
        assert!(matches!(
            sim.step(),
            Err(SimError::State(StateError::BufferBusy { .. }))
        ));
        drop(view);

        sim.step().unwrap();
        assert!(!sim.has_unpublished_tick());
        assert_eq!(sim.tick(), 2);
        assert_eq!(reader.read().get_entity(EntityId(1)).unwrap().controller_id, 3);
    }

    #[test]
    fn test_reused_index_stays_hidden_until_published() {
        let mut sim = loaded();
        let reader = sim.reader();
        let view = reader.read();
        sim.step().unwrap();
        assert!(sim.has_unpublished_tick());
        drop(view);

        sim.remove_entity(EntityId(1)).unwrap();
        let index = sim
            .insert_entity(EntityId(50), EntityRecord::new(9, 0), 0)
            .unwrap();
        assert_eq!(index, 0);
        {
            let view = reader.read();
            assert_eq!(view.get_entity(EntityId(50)), None);
            assert_eq!(view.get_entity(EntityId(1)).unwrap().owner_id, 1);
            let owned: Vec<_> = view.entities_by_owner(1).map(|(id, _)| id).collect();
            assert_eq!(owned, vec![EntityId(1)]);
        }
        assert!(matches!(
            sim.store().get_entity(EntityId(50)),
            Err(StateError::UnknownEntity(_))
        ));

        sim.step().unwrap();
        let view = reader.read();
        assert_eq!(view.get_entity(EntityId(50)).unwrap().owner_id, 9);
        assert_eq!(view.get_entity(EntityId(1)), None);
        let owned: Vec<_> = view.entities_by_owner(9).map(|(id, _)| id).collect();
        assert_eq!(owned, vec![EntityId(50)]);
        assert_eq!(sim.store().get_entity(EntityId(50)).unwrap().owner_id, 9);
    }

    #[test]
    fn test_out_of_tick_changes_wait_for_readers() {
        let mut sim = loaded();
        let reader = sim.reader();
        let view = reader.read();

        sim.insert_entity(EntityId(70), EntityRecord::new(5, 0), 0).unwrap();
        sim.remove_entity(EntityId(2)).unwrap();
        assert!(sim.has_pending_publish());
        assert!(!sim.has_unpublished_tick());
        assert_eq!(view.get_entity(EntityId(70)), None);
        assert!(view.has_entity(EntityId(2)));

        // The committed insert is not lost or repeated.
        assert!(matches!(
            sim.insert_entity(EntityId(70), EntityRecord::new(5, 0), 0),
            Err(SimError::State(StateError::DuplicateEntity(_)))
        ));
        assert!(matches!(
            sim.step(),
            Err(SimError::State(StateError::BufferBusy { .. }))
        ));
        assert_eq!(sim.tick(), 0);
        drop(view);

        assert_eq!(sim.step().unwrap().tick, 1);
        assert!(!sim.has_pending_publish());
        let view = reader.read();
        assert_eq!(view.get_entity(EntityId(70)).unwrap().owner_id, 5);
        assert!(!view.has_entity(EntityId(2)));
        assert_eq!(view.entity_count(), 4);
    }

    #[test]
    fn test_halts_after_fatal_error() {
        let mut sim = loaded();
        sim.step().unwrap();
        let local = sim.checksum(1).unwrap();
        assert!(sim.verify_remote_checksum(1, local).is_ok());
        assert!(sim.verify_remote_checksum(500, 0).is_err());
        assert!(!sim.is_halted());

        assert!(sim.verify_remote_checksum(1, local.wrapping_add(1)).is_err());
        assert!(sim.is_halted());
        assert!(matches!(sim.step(), Err(SimError::Halted { tick: 1, .. })));
        assert!(matches!(
            sim.advance(FixedPoint64::ONE),
            Err(SimError::Halted { .. })
        ));
    }

    #[test]
    fn test_cold_data_lifecycle() {
        let mut sim = loaded();
        let mut names: AuxStore<String> = AuxStore::new();
        let slot = sim
            .attach_aux(&mut names, EntityId(3), "Brandenburg".into())
            .unwrap();
        assert_eq!(sim.store().get_entity(EntityId(3)).unwrap().aux_slot, slot);

        sim.step().unwrap();
        let index = sim.store().index_of(EntityId(3)).unwrap();
        assert_eq!(names.of(sim.store(), index).map(String::as_str), Some("Brandenburg"));

        let name = sim.detach_aux(&mut names, EntityId(3)).unwrap();
        assert_eq!(name.as_deref(), Some("Brandenburg"));
        assert_eq!(sim.store().get_entity(EntityId(3)).unwrap().aux_slot, 0);
        assert!(matches!(
            sim.attach_aux(&mut names, EntityId(99), String::new()),
            Err(SimError::State(StateError::UnknownEntity(_)))
        ));
    }

    #[test]
    fn test_shutdown_returns_last_tick() {
        let mut sim = loaded();
        sim.step().unwrap();
        sim.step().unwrap();
        assert_eq!(sim.shutdown(), 2);
    }
}
