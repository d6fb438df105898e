//! Change-data-capture client for Postgres logical replication.
//!
//! Ensures a pgoutput slot exists, catches up on pre-existing rows through the
//! slot's exported snapshot, then streams live inserts to an [`EventSink`],
//! acknowledging processed positions for at-least-once delivery.

pub mod args;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod replication;
pub mod snapshot;
pub mod source;
pub mod store;
pub mod tracker;

pub use error::{CaptureError, DecodeError};
pub use event::{ChangeEvent, ChangeKind, EventOrigin, EventSink};
pub use orchestrator::{Orchestrator, RunOutcome, RunState};
pub use replication::{CreatedSlot, Lsn, SlotConfig, SlotStatus};
pub use snapshot::SnapshotReader;
pub use source::{ChangeSource, ChangeStream, PgSource, PgStream, StreamEvent};
pub use store::{FilePositionStore, MemoryPositionStore, PositionStore};
pub use tracker::{AckPolicy, PositionTracker};
