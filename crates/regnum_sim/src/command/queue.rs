//! # Command Submission Queue
//!
//! Network and UI threads submit through a cloneable [`CommandSender`];
//! the pipeline drains the channel at the start of each tick. Submission
//! never blocks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::Mutex;

use super::codec::decode_envelope;
use super::{Command, CommandEnvelope};
use crate::error::{RejectReason, SubmitError};

/// One message from a submitter.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Submission {
    /// Queue a command.
    Submit(CommandEnvelope),
    /// Withdraw a queued command by sequence.
    Withdraw(u64),
}

/// State shared between every sender and the pipeline.
#[derive(Debug)]
struct Shared {
    /// Next sequence number to hand out.
    next_sequence: AtomicU64,
    /// Tick the pipeline will execute next.
    current_tick: AtomicU64,
    /// Rejections by sequence, with the tick they targeted.
    rejections: Mutex<HashMap<u64, (u64, RejectReason)>>,
}

/// Thread-safe handle for submitting commands.
#[derive(Clone, Debug)]
pub struct CommandSender {
    tx: Sender<Submission>,
    shared: Arc<Shared>,
}

/// Pipeline side of the queue.
#[derive(Debug)]
pub(crate) struct CommandReceiver {
    rx: Receiver<Submission>,
    shared: Arc<Shared>,
}

/// Creates a connected sender and receiver. Sequences start at 1, ticks at 1.
pub(crate) fn channel() -> (CommandSender, CommandReceiver) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let shared = Arc::new(Shared {
        next_sequence: AtomicU64::new(1),
        current_tick: AtomicU64::new(1),
        rejections: Mutex::new(HashMap::new()),
    });
    (
        CommandSender {
            tx,
            shared: Arc::clone(&shared),
        },
        CommandReceiver { rx, shared },
    )
}

impl CommandSender {
    /// Submits a command and returns its sequence number.
    ///
    /// # Errors
    ///
    /// [`SubmitError::StaleCommand`] if the target tick has already started,
    /// [`SubmitError::QueueClosed`] if the pipeline is gone.
    pub fn submit(&self, command: Command) -> Result<u64, SubmitError> {
        self.check_tick(command.target_tick)?;
        let sequence = self.shared.next_sequence.fetch_add(1, Ordering::Relaxed);
        self.send(Submission::Submit(CommandEnvelope::new(sequence, command)))?;
        Ok(sequence)
    }

    /// Submits an envelope that already carries a sequence number, e.g. one
    /// received from a peer or read from a replay log.
    ///
    /// Local numbering continues above the highest sequence seen.
    ///
    /// # Errors
    ///
    /// As [`CommandSender::submit`].
    pub fn submit_envelope(&self, envelope: CommandEnvelope) -> Result<u64, SubmitError> {
        self.check_tick(envelope.command.target_tick)?;
        self.shared
            .next_sequence
            .fetch_max(envelope.sequence.saturating_add(1), Ordering::Relaxed);
        self.send(Submission::Submit(envelope))?;
        Ok(envelope.sequence)
    }

    /// Decodes and submits one wire envelope.
    ///
    /// # Errors
    ///
    /// [`SubmitError::Codec`] on bad bytes, otherwise as
    /// [`CommandSender::submit_envelope`].
    pub fn submit_bytes(&self, bytes: &[u8]) -> Result<u64, SubmitError> {
        let envelope = decode_envelope(bytes)?;
        self.submit_envelope(envelope)
    }

    /// Withdraws a queued command. Has no effect once its tick has begun.
    ///
    /// # Errors
    ///
    /// [`SubmitError::QueueClosed`] if the pipeline is gone.
    pub fn withdraw(&self, sequence: u64) -> Result<(), SubmitError> {
        self.send(Submission::Withdraw(sequence))
    }

    /// Why a command was rejected, while it is still within the history window.
    #[must_use]
    pub fn rejection(&self, sequence: u64) -> Option<RejectReason> {
        self.shared
            .rejections
            .lock()
            .get(&sequence)
            .map(|&(_, reason)| reason)
    }

    /// Tick the pipeline will execute next. Commands must target at least this.
    #[must_use]
    pub fn current_tick(&self) -> u64 {
        self.shared.current_tick.load(Ordering::Acquire)
    }

    fn check_tick(&self, target_tick: u64) -> Result<(), SubmitError> {
        let current_tick = self.current_tick();
        if target_tick < current_tick {
            return Err(SubmitError::StaleCommand {
                target_tick,
                current_tick,
            });
        }
        Ok(())
    }

    fn send(&self, submission: Submission) -> Result<(), SubmitError> {
        self.tx
            .send(submission)
            .map_err(|_| SubmitError::QueueClosed)
    }
}

#[cfg(test)]
impl CommandSender {
    /// Sends without the stale check, as a misbehaving peer would.
    pub(crate) fn send_unchecked(&self, envelope: CommandEnvelope) {
        let _ = self.tx.send(Submission::Submit(envelope));
    }
}

impl CommandReceiver {
    /// Next queued submission, if any.
    pub(crate) fn try_next(&self) -> Option<Submission> {
        match self.rx.try_recv() {
            Ok(submission) => Some(submission),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Publishes the tick the pipeline will execute next.
    pub(crate) fn set_current_tick(&self, tick: u64) {
        self.shared.current_tick.store(tick, Ordering::Release);
    }

    /// Records a rejection for submitters to query.
    pub(crate) fn record_rejection(&self, sequence: u64, tick: u64, reason: RejectReason) {
        self.shared.rejections.lock().insert(sequence, (tick, reason));
    }

    /// Forgets rejections of commands that targeted ticks before `oldest_tick`.
    pub(crate) fn prune_rejections(&self, oldest_tick: u64) {
        self.shared
            .rejections
            .lock()
            .retain(|_, &mut (tick, _)| tick >= oldest_tick);
    }
}
