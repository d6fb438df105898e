//! Decoded change events and the downstream sink contract.

use crate::replication::message::Lsn;

/// Only inserts are decoded in this client; other operations are consumed and
/// discarded at the protocol layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    /// Baseline row replayed from the consistent snapshot.
    Snapshot,
    /// Row decoded from the live replication feed.
    Streamed,
}

/// An immutable row-level change. Streamed events always carry the WAL
/// position they were decoded at; snapshot events never do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub origin: EventOrigin,
    pub id: i64,
    pub payload: String,
    pub position: Option<Lsn>,
}

impl ChangeEvent {
    pub fn snapshot(id: i64, payload: String) -> Self {
        ChangeEvent {
            kind: ChangeKind::Insert,
            origin: EventOrigin::Snapshot,
            id,
            payload,
            position: None,
        }
    }

    pub fn streamed(id: i64, payload: String, position: Lsn) -> Self {
        ChangeEvent {
            kind: ChangeKind::Insert,
            origin: EventOrigin::Streamed,
            id,
            payload,
            position: Some(position),
        }
    }
}

/// Downstream consumer of decoded events. Delivery is at-least-once: a crash
/// between processing and acknowledgment replays events on the next run, so
/// implementations must apply events idempotently, keyed by `id`. Calls are
/// synchronous; a slow sink delays acknowledgment and that backpressure is
/// intentional.
pub trait EventSink {
    fn apply(&mut self, event: &ChangeEvent) -> anyhow::Result<()>;
}
