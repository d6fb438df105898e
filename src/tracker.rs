//! Acknowledgment bookkeeping: monotonic positions, configurable granularity.

use crate::replication::message::Lsn;

/// How often processed positions are reported back to the source. Batch
/// boundaries must align with the sink's own commit boundaries; flushing on
/// stop or cancel keeps the last batch from being lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckPolicy {
    EveryEvent,
    EveryN(u32),
}

impl AckPolicy {
    fn batch_size(self) -> u32 {
        match self {
            AckPolicy::EveryEvent => 1,
            AckPolicy::EveryN(n) => n.max(1),
        }
    }
}

/// Tracks processed positions and decides when to acknowledge. Acknowledged
/// positions are monotonically non-decreasing: a position behind what was
/// already confirmed is ignored rather than sent backwards.
#[derive(Debug)]
pub struct PositionTracker {
    policy: AckPolicy,
    last_acked: Lsn,
    pending: Option<Lsn>,
    unacked: u32,
}

impl PositionTracker {
    pub fn new(start: Lsn, policy: AckPolicy) -> Self {
        PositionTracker {
            policy,
            last_acked: start,
            pending: None,
            unacked: 0,
        }
    }

    /// Record a fully processed position. Returns the position to acknowledge
    /// now, if the policy says it is due.
    pub fn record(&mut self, position: Lsn) -> Option<Lsn> {
        if position < self.last_acked || self.pending.is_some_and(|p| position < p) {
            return None;
        }
        self.pending = Some(position);
        self.unacked += 1;
        if self.unacked >= self.policy.batch_size() {
            self.take()
        } else {
            None
        }
    }

    /// Drain the pending batch, if any. Called on stop and cancellation so
    /// already-processed events are never re-delivered more than necessary.
    pub fn flush(&mut self) -> Option<Lsn> {
        self.take()
    }

    pub fn last_acknowledged(&self) -> Lsn {
        self.last_acked
    }

    fn take(&mut self) -> Option<Lsn> {
        let position = self.pending.take()?;
        self.last_acked = position;
        self.unacked = 0;
        Some(position)
    }
}
