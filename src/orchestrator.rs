//! Sequencing: check slot, create-and-catch-up or resume, then stream until
//! cancelled or faulted.

use std::sync::atomic::AtomicBool;

use crate::error::CaptureError;
use crate::event::EventSink;
use crate::replication::slot::{SlotConfig, SlotStatus};
use crate::source::{ChangeSource, ChangeStream, StreamEvent};
use crate::store::PositionStore;
use crate::tracker::{AckPolicy, PositionTracker};

/// The run lifecycle. Snapshot catch-up and streaming never overlap: the
/// catch-up transaction closes before `START_REPLICATION` is issued, because
/// streaming positioning depends on the slot being in the exact state left by
/// its creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Uninitialized,
    SlotCheck,
    Creating,
    SnapshotCatchup,
    Resuming,
    Streaming,
    Stopped,
    Cancelled,
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The source ended the stream.
    Stopped,
    /// A cancellation signal was observed between messages.
    Cancelled,
}

pub struct Orchestrator<S: ChangeSource> {
    source: S,
    slot: SlotConfig,
    ack_policy: AckPolicy,
}

impl<S: ChangeSource> Orchestrator<S> {
    pub fn new(source: S, slot: SlotConfig) -> Self {
        Orchestrator {
            source,
            slot,
            ack_policy: AckPolicy::EveryEvent,
        }
    }

    pub fn with_ack_policy(mut self, policy: AckPolicy) -> Self {
        self.ack_policy = policy;
        self
    }

    /// Drive one capture run to a terminal state. Consuming `self` makes a run
    /// restartable only by building a new orchestrator, which resumes from the
    /// last acknowledged position.
    pub fn run(
        self,
        sink: &mut dyn EventSink,
        store: &mut dyn PositionStore,
        cancel: &AtomicBool,
    ) -> Result<RunOutcome, CaptureError> {
        let slot_name = self.slot.name.clone();
        let result = self.drive(sink, store, cancel);
        match &result {
            Ok(outcome) => tracing::info!(slot = %slot_name, ?outcome, "capture run finished"),
            Err(err) => {
                enter(RunState::Faulted);
                tracing::error!(slot = %slot_name, error = %err, "capture run faulted");
            }
        }
        result
    }

    fn drive(
        self,
        sink: &mut dyn EventSink,
        store: &mut dyn PositionStore,
        cancel: &AtomicBool,
    ) -> Result<RunOutcome, CaptureError> {
        let Orchestrator {
            mut source,
            slot,
            ack_policy,
        } = self;

        enter(RunState::SlotCheck);
        let start = match source.slot_status(&slot)? {
            SlotStatus::PluginMismatch(plugin) => {
                return Err(CaptureError::SlotState(format!(
                    "slot {} belongs to plugin {plugin}; refusing to touch it",
                    slot.name
                )));
            }
            SlotStatus::Absent => {
                enter(RunState::Creating);
                let created = source.create_slot(&slot)?;
                tracing::info!(
                    slot = %slot.name,
                    snapshot = %created.snapshot_name,
                    consistent_point = %created.consistent_point,
                    "slot created"
                );
                enter(RunState::SnapshotCatchup);
                let rows = source
                    .read_snapshot(&slot, &created.snapshot_name, &mut |event| sink.apply(&event))?;
                tracing::info!(slot = %slot.name, rows, "snapshot catch-up complete");
                // Persist the starting position now: the slot exists from this
                // point on, so a run that ends before the first streamed
                // acknowledgment must still be resumable. Saved only after
                // catch-up, so a crash mid-snapshot forces a clean restart.
                store
                    .save(&slot.name, created.consistent_point)
                    .map_err(CaptureError::PositionStore)?;
                created.consistent_point
            }
            SlotStatus::Present => {
                enter(RunState::Resuming);
                let position = store
                    .load(&slot.name)
                    .map_err(CaptureError::PositionStore)?
                    .ok_or_else(|| {
                        CaptureError::SlotState(format!(
                            "slot {} exists but no acknowledged position is stored; \
                             cannot infer where to resume",
                            slot.name
                        ))
                    })?;
                tracing::info!(slot = %slot.name, %position, "resuming");
                position
            }
        };

        enter(RunState::Streaming);
        let mut stream = source.start_stream(&slot, start)?;
        let mut tracker = PositionTracker::new(start, ack_policy);
        loop {
            match stream.next_event(cancel)? {
                StreamEvent::Change(event, position) => {
                    sink.apply(&event).map_err(CaptureError::Sink)?;
                    if let Some(confirmed) = tracker.record(position) {
                        store
                            .save(&slot.name, confirmed)
                            .map_err(CaptureError::PositionStore)?;
                        stream.acknowledge(confirmed)?;
                    }
                }
                StreamEvent::Cancelled => {
                    flush(&mut tracker, &mut stream, store, &slot)?;
                    enter(RunState::Cancelled);
                    return Ok(RunOutcome::Cancelled);
                }
                StreamEvent::EndOfStream => {
                    flush(&mut tracker, &mut stream, store, &slot)?;
                    enter(RunState::Stopped);
                    return Ok(RunOutcome::Stopped);
                }
            }
        }
    }
}

/// Confirm any pending batch before the session closes. Never acknowledges
/// past the last fully processed event.
fn flush<T: ChangeStream>(
    tracker: &mut PositionTracker,
    stream: &mut T,
    store: &mut dyn PositionStore,
    slot: &SlotConfig,
) -> Result<(), CaptureError> {
    if let Some(confirmed) = tracker.flush() {
        store
            .save(&slot.name, confirmed)
            .map_err(CaptureError::PositionStore)?;
        stream.acknowledge(confirmed)?;
    }
    Ok(())
}

fn enter(state: RunState) {
    tracing::debug!(state = ?state, "capture state");
}
