//! The source collaborator: what the capture pipeline needs from the
//! transactional log service, and the Postgres implementation of it.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::CaptureError;
use crate::event::ChangeEvent;
use crate::replication::message::{Lsn, ReplicationMessage};
use crate::replication::pgoutput::{LogicalMessage, decode_insert_row};
use crate::replication::slot::{CreatedSlot, SlotConfig, SlotStatus};
use crate::replication::stream::ReplicationConn;
use crate::snapshot::SnapshotReader;

/// Operations the orchestrator consumes from the source. One implementation
/// speaks to Postgres; tests drive the pipeline through an in-memory fake.
pub trait ChangeSource {
    type Stream: ChangeStream;

    fn slot_status(&mut self, slot: &SlotConfig) -> Result<SlotStatus, CaptureError>;

    /// Create the slot, atomically capturing a consistent snapshot identifier
    /// and the starting log position.
    fn create_slot(&mut self, slot: &SlotConfig) -> Result<CreatedSlot, CaptureError>;

    /// Stream the snapshot-pinned baseline as a finite sequence of events.
    fn read_snapshot(
        &mut self,
        slot: &SlotConfig,
        snapshot_name: &str,
        on_event: &mut dyn FnMut(ChangeEvent) -> anyhow::Result<()>,
    ) -> Result<u64, CaptureError>;

    /// Begin live streaming at `from`. Consumes the source: a stream is
    /// restartable only by opening a new session, never resumable mid-flight.
    fn start_stream(self, slot: &SlotConfig, from: Lsn) -> Result<Self::Stream, CaptureError>;
}

/// The live feed after `start_stream`. Exactly one stream per slot.
pub trait ChangeStream {
    /// Await the next decoded event. Cancellation is observed only here,
    /// between messages, never mid-decode.
    fn next_event(&mut self, cancel: &AtomicBool) -> Result<StreamEvent, CaptureError>;

    /// Report `position` back to the source so retained history up to that
    /// point may be reclaimed.
    fn acknowledge(&mut self, position: Lsn) -> Result<(), CaptureError>;
}

#[derive(Debug)]
pub enum StreamEvent {
    /// A decoded insert and the log position it was observed at.
    Change(ChangeEvent, Lsn),
    Cancelled,
    EndOfStream,
}

/// Postgres-backed source: a plain SQL connection for metadata and the
/// snapshot transaction, plus one replication-protocol connection whose
/// session carries the exported snapshot, any temporary slot, and the stream.
pub struct PgSource {
    client: postgres::Client,
    repl: ReplicationConn,
}

impl PgSource {
    pub fn connect(conninfo: &str) -> Result<Self, CaptureError> {
        let client = postgres::Client::connect(conninfo, postgres::NoTls)?;
        let repl = ReplicationConn::connect(conninfo)?;
        Ok(Self { client, repl })
    }
}

impl ChangeSource for PgSource {
    type Stream = PgStream;

    fn slot_status(&mut self, slot: &SlotConfig) -> Result<SlotStatus, CaptureError> {
        slot.status(&mut self.client)
    }

    fn create_slot(&mut self, slot: &SlotConfig) -> Result<CreatedSlot, CaptureError> {
        self.repl.create_slot(slot)
    }

    fn read_snapshot(
        &mut self,
        slot: &SlotConfig,
        snapshot_name: &str,
        on_event: &mut dyn FnMut(ChangeEvent) -> anyhow::Result<()>,
    ) -> Result<u64, CaptureError> {
        SnapshotReader::new(&slot.publication).read(&mut self.client, snapshot_name, on_event)
    }

    fn start_stream(mut self, slot: &SlotConfig, from: Lsn) -> Result<PgStream, CaptureError> {
        self.repl.start(slot, from)?;
        Ok(PgStream {
            conn: self.repl,
            last_acked: from,
        })
    }
}

/// Decode loop over the COPY-both feed. Dropping it closes the session, which
/// also drops a temporary slot.
pub struct PgStream {
    conn: ReplicationConn,
    last_acked: Lsn,
}

impl ChangeStream for PgStream {
    fn next_event(&mut self, cancel: &AtomicBool) -> Result<StreamEvent, CaptureError> {
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Ok(StreamEvent::Cancelled);
            }
            match self.conn.next_message()? {
                ReplicationMessage::KeepAlive(keepalive) => {
                    if keepalive.reply_requested {
                        self.conn.send_status_update(self.last_acked, false)?;
                    }
                }
                ReplicationMessage::XLogData(xlog) => {
                    match LogicalMessage::parse(&xlog.data)? {
                        LogicalMessage::Insert { row, .. } => {
                            let (id, payload) = decode_insert_row(&row)?;
                            let position = xlog.wal_end;
                            return Ok(StreamEvent::Change(
                                ChangeEvent::streamed(id, payload, position),
                                position,
                            ));
                        }
                        LogicalMessage::Begin | LogicalMessage::Commit => {}
                        other => {
                            tracing::debug!(message = ?other, "skipping unsupported logical message");
                        }
                    }
                }
                ReplicationMessage::Unknown(tag) => {
                    tracing::debug!(tag, "skipping unknown replication frame");
                }
            }
        }
    }

    fn acknowledge(&mut self, position: Lsn) -> Result<(), CaptureError> {
        self.last_acked = position;
        self.conn.send_status_update(position, false)
    }
}
