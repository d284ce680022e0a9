//! # Command Pipeline
//!
//! Single-writer execution of one tick's commands.
//!
//! ## Per-Tick Algorithm
//!
//! ```text
//! 1. Drain the submission queue into per-tick pending lists
//!    (late arrivals are rejected as stale, withdrawals are honored)
//! 2. Take this tick's list and sort it into canonical order
//! 3. Validate every command against the READ buffer (pre-tick state)
//! 4. Execute the survivors in order against the WRITE buffer
//! 5. Hash tick number, executed envelopes and changed records
//! 6. Record history and checksum, advance the tick
//! ```
//!
//! Validation sees only the state every peer agreed on at the end of the
//! previous tick. Execution sees earlier commands of the same tick.

use std::collections::{BTreeMap, VecDeque};
use std::hash::Hasher;

use regnum_core::{EntityId, EntityRecord, StateError, StateStore};
use siphasher::sip::SipHasher24;

use super::codec::encode_envelope;
use super::queue::{self, CommandReceiver, CommandSender, Submission};
use super::{CommandEnvelope, CommandLog};
use crate::error::{PipelineError, PipelineResult, RejectReason};
use crate::events::{
    CategoryChanged, CommandRejected, ControllerChanged, EventBus, OwnershipChanged,
};

/// Fixed checksum keys. Every peer must use the same ones.
const CHECKSUM_KEYS: (u64, u64) = (0x5245_474E_554D_5F31, 0x5449_434B_5F53_554D);

/// Outcome of one executed tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// The tick.
    pub tick: u64,
    /// Commands applied.
    pub executed: usize,
    /// Commands dropped (stale or failed validation).
    pub rejected: usize,
    /// Records whose value changed.
    pub changed: usize,
    /// Desync detection hash.
    pub checksum: u64,
}

/// Orders, validates, executes and checksums commands.
#[derive(Debug)]
pub struct CommandPipeline {
    sender: CommandSender,
    receiver: CommandReceiver,
    /// Queued commands by target tick.
    pending: BTreeMap<u64, Vec<CommandEnvelope>>,
    /// Commands that arrived after their tick started.
    late: Vec<CommandEnvelope>,
    /// Tick the next `execute_tick` runs.
    current_tick: u64,
    /// Executed commands per tick, oldest first.
    history: VecDeque<(u64, Vec<CommandEnvelope>)>,
    /// Checksums per tick, oldest first.
    checksums: VecDeque<(u64, u64)>,
    command_history_ticks: usize,
    checksum_history_ticks: usize,
    /// Reused per tick.
    validated: Vec<CommandEnvelope>,
    /// Indices changed this tick, reused.
    changed: Vec<u32>,
}

impl CommandPipeline {
    /// Creates a pipeline whose first tick is 1.
    #[must_use]
    pub fn new(command_history_ticks: usize, checksum_history_ticks: usize) -> Self {
        let (sender, receiver) = queue::channel();
        Self {
            sender,
            receiver,
            pending: BTreeMap::new(),
            late: Vec::new(),
            current_tick: 1,
            history: VecDeque::with_capacity(command_history_ticks),
            checksums: VecDeque::with_capacity(checksum_history_ticks),
            command_history_ticks,
            checksum_history_ticks: checksum_history_ticks.max(1),
            validated: Vec::new(),
            changed: Vec::new(),
        }
    }

    /// A new submission handle.
    #[must_use]
    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    /// Tick the next [`Self::execute_tick`] runs.
    #[inline]
    #[must_use]
    pub const fn current_tick(&self) -> u64 {
        self.current_tick
    }

    /// Moves the pipeline to `tick`, for resuming a saved session.
    ///
    /// Pending commands for earlier ticks are dropped.
    pub fn reset_tick(&mut self, tick: u64) {
        self.current_tick = tick.max(1);
        self.pending = self.pending.split_off(&self.current_tick);
        self.receiver.set_current_tick(self.current_tick);
    }

    /// Commands queued and not yet executed (after draining the channel).
    pub fn pending_count(&mut self) -> usize {
        self.drain();
        self.pending.values().map(Vec::len).sum()
    }

    /// Withdraws a queued command. Returns false if it is not pending.
    pub fn withdraw(&mut self, sequence: u64) -> bool {
        self.drain();
        self.remove_pending(sequence)
    }

    /// Validates `envelope` against the read buffer without executing it.
    ///
    /// # Errors
    ///
    /// [`PipelineError::ValidationFailed`] with the reason.
    pub fn check(&self, store: &StateStore, envelope: &CommandEnvelope) -> PipelineResult<()> {
        validate(store, envelope).map_err(|reason| PipelineError::ValidationFailed {
            sequence: envelope.sequence,
            reason,
        })
    }

    /// Executes the current tick.
    ///
    /// # Errors
    ///
    /// [`PipelineError::ExecutionFailed`] if a validated command cannot be
    /// applied. The tick is then incomplete and must not be published.
    pub fn execute_tick(
        &mut self,
        store: &mut StateStore,
        bus: &mut EventBus,
    ) -> PipelineResult<TickReport> {
        let tick = self.current_tick;
        self.drain();

        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };

        for envelope in std::mem::take(&mut self.late) {
            self.reject(bus, &envelope, RejectReason::StaleCommand {
                target_tick: envelope.command.target_tick,
                current_tick: tick,
            });
            report.rejected += 1;
        }

        let mut commands = self.pending.remove(&tick).unwrap_or_default();
        commands.sort_unstable();

        self.validated.clear();
        for envelope in commands {
            match validate(store, &envelope) {
                Ok(()) => self.validated.push(envelope),
                Err(reason) => {
                    self.reject(bus, &envelope, reason);
                    report.rejected += 1;
                }
            }
        }

        self.changed.clear();
        for envelope in &self.validated {
            let fail = |source| PipelineError::ExecutionFailed {
                tick,
                sequence: envelope.sequence,
                source,
            };
            let entity = envelope.command.kind.entity();
            let index = store
                .index_of(entity)
                .ok_or(StateError::UnknownEntity(entity))
                .map_err(fail)?;
            let before = store.get_write(index).map_err(fail)?;
            let after = envelope.command.kind.apply(before);
            if store.set(index, after).map_err(fail)? {
                self.changed.push(index as u32);
                emit_changes(bus, tick, entity, &before, &after);
            }
        }
        report.executed = self.validated.len();

        self.changed.sort_unstable();
        self.changed.dedup();
        report.changed = self.changed.len();
        report.checksum = self.compute_checksum(store, tick)?;

        self.record_history(tick, report.checksum);
        self.current_tick = tick + 1;
        self.receiver.set_current_tick(self.current_tick);

        tracing::debug!(
            "Tick {} executed {} commands ({} rejected, {} changed), checksum {:#018x}",
            tick,
            report.executed,
            report.rejected,
            report.changed,
            report.checksum
        );
        Ok(report)
    }

    /// Commands executed on `tick`, if still retained.
    #[must_use]
    pub fn history(&self, tick: u64) -> Option<&[CommandEnvelope]> {
        self.history
            .iter()
            .find(|(t, _)| *t == tick)
            .map(|(_, commands)| commands.as_slice())
    }

    /// Every retained executed command, oldest tick first.
    #[must_use]
    pub fn command_log(&self) -> CommandLog {
        self.history
            .iter()
            .flat_map(|(_, commands)| commands.iter().copied())
            .collect()
    }

    /// Checksum of `tick`, if still retained.
    #[must_use]
    pub fn checksum(&self, tick: u64) -> Option<u64> {
        self.checksums
            .iter()
            .rev()
            .find(|(t, _)| *t == tick)
            .map(|&(_, checksum)| checksum)
    }

    /// Compares a peer's checksum with ours.
    ///
    /// # Errors
    ///
    /// [`PipelineError::ChecksumMismatch`] on divergence,
    /// [`PipelineError::UnknownChecksum`] if the tick is not retained.
    pub fn verify_checksum(&self, tick: u64, remote: u64) -> PipelineResult<()> {
        let local = self
            .checksum(tick)
            .ok_or(PipelineError::UnknownChecksum { tick })?;
        if local != remote {
            tracing::error!(
                "Desync at tick {}: local {:#018x}, remote {:#018x}",
                tick,
                local,
                remote
            );
            return Err(PipelineError::ChecksumMismatch {
                tick,
                local,
                remote,
            });
        }
        Ok(())
    }

    fn drain(&mut self) {
        while let Some(submission) = self.receiver.try_next() {
            match submission {
                Submission::Submit(envelope) if envelope.command.target_tick < self.current_tick => {
                    self.late.push(envelope);
                }
                Submission::Submit(envelope) => {
                    self.pending
                        .entry(envelope.command.target_tick)
                        .or_default()
                        .push(envelope);
                }
                Submission::Withdraw(sequence) => {
                    if !self.remove_pending(sequence) {
                        tracing::debug!("Withdrawal of command {} had no effect", sequence);
                    }
                }
            }
        }
    }

    fn remove_pending(&mut self, sequence: u64) -> bool {
        for commands in self.pending.values_mut() {
            if let Some(position) = commands.iter().position(|c| c.sequence == sequence) {
                commands.remove(position);
                return true;
            }
        }
        false
    }

    fn reject(&self, bus: &mut EventBus, envelope: &CommandEnvelope, reason: RejectReason) {
        tracing::warn!(
            "Command {} from player {} rejected: {}",
            envelope.sequence,
            envelope.command.player_id,
            reason
        );
        self.receiver
            .record_rejection(envelope.sequence, envelope.command.target_tick, reason);
        bus.emit(CommandRejected {
            tick: envelope.command.target_tick,
            sequence: envelope.sequence,
            player_id: envelope.command.player_id,
            reason,
        });
    }

    fn compute_checksum(&self, store: &StateStore, tick: u64) -> PipelineResult<u64> {
        let mut hasher = SipHasher24::new_with_keys(CHECKSUM_KEYS.0, CHECKSUM_KEYS.1);
        hasher.write_u64(tick);
        for envelope in &self.validated {
            hasher.write(&encode_envelope(envelope));
        }
        for &index in &self.changed {
            let record = store
                .get_write(index as usize)
                .map_err(|source| PipelineError::ExecutionFailed {
                    tick,
                    sequence: 0,
                    source,
                })?;
            hasher.write_u32(index);
            hasher.write(&record.to_le_bytes());
        }
        Ok(hasher.finish())
    }

    fn record_history(&mut self, tick: u64, checksum: u64) {
        if self.command_history_ticks > 0 {
            self.history.push_back((tick, self.validated.clone()));
            while self.history.len() > self.command_history_ticks {
                self.history.pop_front();
            }
        }
        self.checksums.push_back((tick, checksum));
        while self.checksums.len() > self.checksum_history_ticks {
            self.checksums.pop_front();
        }
        let window = self.command_history_ticks.max(1) as u64;
        self.receiver
            .prune_rejections(tick.saturating_sub(window - 1));
    }
}

fn validate(store: &StateStore, envelope: &CommandEnvelope) -> Result<(), RejectReason> {
    let entity = envelope.command.kind.entity();
    let record = store
        .get_entity(entity)
        .map_err(|_| RejectReason::UnknownEntity(entity))?;
    envelope.command.kind.check(envelope.command.player_id, &record)
}

fn emit_changes(
    bus: &mut EventBus,
    tick: u64,
    entity: EntityId,
    before: &EntityRecord,
    after: &EntityRecord,
) {
    if before.owner_id != after.owner_id {
        bus.emit(OwnershipChanged {
            tick,
            entity,
            from: before.owner_id,
            to: after.owner_id,
        });
    }
    if before.controller_id != after.controller_id {
        bus.emit(ControllerChanged {
            tick,
            entity,
            from: before.controller_id,
            to: after.controller_id,
        });
    }
    if before.category_id != after.category_id {
        bus.emit(CategoryChanged {
            tick,
            entity,
            from: before.category_id,
            to: after.category_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandKind, SYSTEM_PLAYER};
    use crate::events::register_core_events;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn setup() -> (StateStore, EventBus, CommandPipeline) {
        let mut store = StateStore::new(8).unwrap();
        for id in 1..=4u16 {
            store.insert(EntityId(id), EntityRecord::new(id, 0)).unwrap();
        }
        store.sync_full().unwrap();
        let mut bus = EventBus::new(8, 16);
        register_core_events(&mut bus);
        (store, bus, CommandPipeline::new(4, 4))
    }

    fn transfer(tick: u64, player: u16, entity: u16, to: u16) -> Command {
        Command::new(
            tick,
            player,
            CommandKind::TransferOwnership { entity: EntityId(entity), to },
        )
    }

    #[test]
    fn test_executes_and_reports() {
        let (mut store, mut bus, mut pipeline) = setup();
        let sender = pipeline.sender();
        sender.submit(transfer(1, 2, 2, 3)).unwrap();

        let report = pipeline.execute_tick(&mut store, &mut bus).unwrap();
        assert_eq!(report.tick, 1);
        assert_eq!((report.executed, report.rejected, report.changed), (1, 0, 1));
        assert_eq!(pipeline.current_tick(), 2);
        assert_eq!(sender.current_tick(), 2);

        // Written, not yet published.
        let index = store.index_of(EntityId(2)).unwrap();
        assert_eq!(store.get_write(index).unwrap().owner_id, 3);
        assert_eq!(store.get_read(index).unwrap().owner_id, 2);
        assert_eq!(pipeline.checksum(1), Some(report.checksum));
        assert_eq!(pipeline.history(1).map(<[_]>::len), Some(1));
    }

    #[test]
    fn test_validation_uses_read_buffer() {
        let (mut store, mut bus, mut pipeline) = setup();
        let sender = pipeline.sender();
        // Player 1 gives entity 1 to player 2, then player 2 tries to pass it on
        // in the same tick. Player 2 does not own it in the pre-tick state.
        let first = sender.submit(transfer(1, 1, 1, 2)).unwrap();
        let second = sender.submit(transfer(1, 2, 1, 3)).unwrap();

        let report = pipeline.execute_tick(&mut store, &mut bus).unwrap();
        assert_eq!((report.executed, report.rejected), (1, 1));
        assert_eq!(sender.rejection(first), None);
        assert_eq!(
            sender.rejection(second),
            Some(RejectReason::OwnerMismatch { entity: EntityId(1), owner: 1, player: 2 })
        );
    }

    #[test]
    fn test_rejections_are_published() {
        let (mut store, mut bus, mut pipeline) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe::<CommandRejected>(move |event, _| sink.lock().push(event.reason));

        let sender = pipeline.sender();
        sender
            .submit(Command::new(1, 5, CommandKind::SetCategory { entity: EntityId(1), category: 9 }))
            .unwrap();
        sender.submit(transfer(1, 1, 77, 2)).unwrap();
        pipeline.execute_tick(&mut store, &mut bus).unwrap();
        bus.process().unwrap();

        let reasons = seen.lock().clone();
        assert_eq!(
            reasons,
            vec![
                RejectReason::NotAuthorized { player: 5 },
                RejectReason::UnknownEntity(EntityId(77)),
            ]
        );
    }

    #[test]
    fn test_change_events() {
        let (mut store, mut bus, mut pipeline) = setup();
        let owners = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&owners);
        bus.subscribe::<OwnershipChanged>(move |event, _| sink.lock().push((event.from, event.to)));

        let sender = pipeline.sender();
        sender.submit(transfer(1, 3, 3, 1)).unwrap();
        // No-op: same values as already stored.
        sender
            .submit(Command::new(
                1,
                SYSTEM_PLAYER,
                CommandKind::SetOwner { entity: EntityId(4), owner: 4, controller: 4 },
            ))
            .unwrap();
        let report = pipeline.execute_tick(&mut store, &mut bus).unwrap();
        bus.process().unwrap();

        assert_eq!(report.executed, 2);
        assert_eq!(report.changed, 1);
        assert_eq!(*owners.lock(), vec![(3, 1)]);
    }

    #[test]
    fn test_future_commands_wait_for_their_tick() {
        let (mut store, mut bus, mut pipeline) = setup();
        let sender = pipeline.sender();
        sender.submit(transfer(3, 1, 1, 2)).unwrap();

        assert_eq!(pipeline.execute_tick(&mut store, &mut bus).unwrap().executed, 0);
        assert_eq!(pipeline.pending_count(), 1);
        assert_eq!(pipeline.execute_tick(&mut store, &mut bus).unwrap().executed, 0);
        assert_eq!(pipeline.execute_tick(&mut store, &mut bus).unwrap().executed, 1);
        assert_eq!(pipeline.pending_count(), 0);
    }

    #[test]
    fn test_withdrawal() {
        let (mut store, mut bus, mut pipeline) = setup();
        let sender = pipeline.sender();
        let kept = sender.submit(transfer(1, 1, 1, 2)).unwrap();
        let dropped = sender.submit(transfer(1, 2, 2, 3)).unwrap();
        sender.withdraw(dropped).unwrap();

        let report = pipeline.execute_tick(&mut store, &mut bus).unwrap();
        assert_eq!(report.executed, 1);
        assert_eq!(pipeline.history(1).unwrap()[0].sequence, kept);
        assert!(!pipeline.withdraw(kept));
    }

    #[test]
    fn test_late_arrival_is_stale() {
        let (mut store, mut bus, mut pipeline) = setup();
        let sender = pipeline.sender();
        pipeline.execute_tick(&mut store, &mut bus).unwrap();
        // Bypasses the sender-side check, as a peer packet would.
        let late = CommandEnvelope::new(500, transfer(1, 1, 1, 2));
        pipeline.sender.send_unchecked(late);

        let report = pipeline.execute_tick(&mut store, &mut bus).unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(
            sender.rejection(500),
            Some(RejectReason::StaleCommand { target_tick: 1, current_tick: 2 })
        );
    }

    #[test]
    fn test_checksum_verification() {
        let (mut store, mut bus, mut pipeline) = setup();
        pipeline.sender().submit(transfer(1, 1, 1, 2)).unwrap();
        let report = pipeline.execute_tick(&mut store, &mut bus).unwrap();

        assert!(pipeline.verify_checksum(1, report.checksum).is_ok());
        assert!(matches!(
            pipeline.verify_checksum(1, report.checksum ^ 1),
            Err(PipelineError::ChecksumMismatch { tick: 1, .. })
        ));
        assert_eq!(
            pipeline.verify_checksum(99, 0),
            Err(PipelineError::UnknownChecksum { tick: 99 })
        );
    }

    #[test]
    fn test_history_is_bounded() {
        let (mut store, mut bus, mut pipeline) = setup();
        for _ in 0..10 {
            pipeline.execute_tick(&mut store, &mut bus).unwrap();
        }
        assert!(pipeline.history(6).is_none());
        assert!(pipeline.history(7).is_some());
        assert!(pipeline.checksum(6).is_none());
        assert!(pipeline.checksum(10).is_some());
    }
}
