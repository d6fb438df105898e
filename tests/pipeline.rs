//! Pipeline tests driven through an in-memory source, covering the
//! catch-up/stream boundary, acknowledgment, cancellation, and resume.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use pg_capture::{
    AckPolicy, CaptureError, ChangeEvent, ChangeSource, ChangeStream, CreatedSlot, DecodeError,
    EventOrigin, EventSink, Lsn, MemoryPositionStore, Orchestrator, PositionStore, RunOutcome,
    SlotConfig, SlotStatus, StreamEvent,
};

/// Scripted feed for the fake stream.
#[derive(Clone)]
enum Feed {
    Insert { id: i64, payload: &'static str, at: u64 },
    /// A message kind the decoder consumes and discards.
    Skipped,
    /// Sets the cancellation flag, emulating a signal arriving mid-stream.
    Cancel,
    Fail(DecodeError),
}

struct FakeStream {
    feed: VecDeque<Feed>,
    acks: Arc<Mutex<Vec<Lsn>>>,
}

impl ChangeStream for FakeStream {
    fn next_event(&mut self, cancel: &AtomicBool) -> Result<StreamEvent, CaptureError> {
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Ok(StreamEvent::Cancelled);
            }
            match self.feed.pop_front() {
                None => return Ok(StreamEvent::EndOfStream),
                Some(Feed::Insert { id, payload, at }) => {
                    let position = Lsn(at);
                    return Ok(StreamEvent::Change(
                        ChangeEvent::streamed(id, payload.to_string(), position),
                        position,
                    ));
                }
                Some(Feed::Skipped) => continue,
                Some(Feed::Cancel) => cancel.store(true, Ordering::Relaxed),
                Some(Feed::Fail(err)) => return Err(CaptureError::Decode(err)),
            }
        }
    }

    fn acknowledge(&mut self, position: Lsn) -> Result<(), CaptureError> {
        self.acks.lock().unwrap().push(position);
        Ok(())
    }
}

struct FakeSource {
    slot_exists: bool,
    plugin_mismatch: Option<&'static str>,
    snapshot_rows: Vec<(i64, &'static str)>,
    consistent_point: Lsn,
    feed: Vec<Feed>,
    acks: Arc<Mutex<Vec<Lsn>>>,
}

impl FakeSource {
    fn new() -> Self {
        FakeSource {
            slot_exists: false,
            plugin_mismatch: None,
            snapshot_rows: Vec::new(),
            consistent_point: Lsn(10),
            feed: Vec::new(),
            acks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn acks(&self) -> Arc<Mutex<Vec<Lsn>>> {
        self.acks.clone()
    }
}

impl ChangeSource for FakeSource {
    type Stream = FakeStream;

    fn slot_status(&mut self, _slot: &SlotConfig) -> Result<SlotStatus, CaptureError> {
        if let Some(plugin) = self.plugin_mismatch {
            return Ok(SlotStatus::PluginMismatch(plugin.to_string()));
        }
        Ok(if self.slot_exists {
            SlotStatus::Present
        } else {
            SlotStatus::Absent
        })
    }

    fn create_slot(&mut self, _slot: &SlotConfig) -> Result<CreatedSlot, CaptureError> {
        self.slot_exists = true;
        Ok(CreatedSlot {
            snapshot_name: "00000003-0000001B-1".to_string(),
            consistent_point: self.consistent_point,
        })
    }

    fn read_snapshot(
        &mut self,
        _slot: &SlotConfig,
        _snapshot_name: &str,
        on_event: &mut dyn FnMut(ChangeEvent) -> anyhow::Result<()>,
    ) -> Result<u64, CaptureError> {
        let mut count = 0;
        for (id, payload) in &self.snapshot_rows {
            on_event(ChangeEvent::snapshot(*id, payload.to_string()))
                .map_err(CaptureError::Sink)?;
            count += 1;
        }
        Ok(count)
    }

    fn start_stream(self, _slot: &SlotConfig, from: Lsn) -> Result<FakeStream, CaptureError> {
        // The source never re-delivers history at or before the start position.
        let feed = self
            .feed
            .into_iter()
            .filter(|item| match item {
                Feed::Insert { at, .. } => Lsn(*at) > from,
                _ => true,
            })
            .collect();
        Ok(FakeStream {
            feed,
            acks: self.acks,
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Vec<ChangeEvent>,
}

impl EventSink for RecordingSink {
    fn apply(&mut self, event: &ChangeEvent) -> anyhow::Result<()> {
        self.events.push(event.clone());
        Ok(())
    }
}

/// Applies events idempotently, keyed by id, the way a real sink must.
#[derive(Default)]
struct KeyedSink {
    rows: HashMap<i64, String>,
}

impl EventSink for KeyedSink {
    fn apply(&mut self, event: &ChangeEvent) -> anyhow::Result<()> {
        self.rows.insert(event.id, event.payload.clone());
        Ok(())
    }
}

fn slot() -> SlotConfig {
    SlotConfig::new("capture_slot", "capture_pub")
}

#[test]
fn create_snapshot_stream_acknowledge_then_resume_without_replay() {
    let mut store = MemoryPositionStore::default();
    let cancel = AtomicBool::new(false);

    let mut source = FakeSource::new();
    source.snapshot_rows = vec![(1, "A"), (2, "B")];
    source.feed = vec![Feed::Insert {
        id: 5,
        payload: "C",
        at: 20,
    }];
    let acks = source.acks();

    let mut sink = RecordingSink::default();
    let outcome = Orchestrator::new(source, slot())
        .run(&mut sink, &mut store, &cancel)
        .unwrap();
    assert_eq!(outcome, RunOutcome::Stopped);

    // Snapshot and stream partition the history: no gap, no duplicate.
    assert_eq!(sink.events.len(), 3);
    assert_eq!(sink.events[0].origin, EventOrigin::Snapshot);
    assert_eq!(sink.events[0].position, None);
    assert_eq!((sink.events[1].id, sink.events[1].payload.as_str()), (2, "B"));
    assert_eq!(sink.events[2].origin, EventOrigin::Streamed);
    assert_eq!(sink.events[2].position, Some(Lsn(20)));
    assert_eq!(*acks.lock().unwrap(), vec![Lsn(20)]);
    assert_eq!(store.load("capture_slot").unwrap(), Some(Lsn(20)));

    // Restart: the slot exists, the stored position is supplied, and nothing
    // already processed comes back.
    let mut source = FakeSource::new();
    source.slot_exists = true;
    source.feed = vec![
        Feed::Insert {
            id: 5,
            payload: "C",
            at: 20,
        },
        Feed::Insert {
            id: 6,
            payload: "D",
            at: 30,
        },
    ];
    let acks = source.acks();

    let mut sink = RecordingSink::default();
    let outcome = Orchestrator::new(source, slot())
        .run(&mut sink, &mut store, &cancel)
        .unwrap();
    assert_eq!(outcome, RunOutcome::Stopped);
    assert_eq!(sink.events.len(), 1);
    assert_eq!(sink.events[0].id, 6);
    assert_eq!(*acks.lock().unwrap(), vec![Lsn(30)]);
}

#[test]
fn freshly_created_slot_is_resumable_before_any_streamed_event() {
    let mut store = MemoryPositionStore::default();
    let cancel = AtomicBool::new(false);

    // First run: the slot is created and catch-up completes, but the stream
    // ends before a single live event arrives.
    let mut source = FakeSource::new();
    source.snapshot_rows = vec![(1, "A")];
    let mut sink = RecordingSink::default();
    let outcome = Orchestrator::new(source, slot())
        .run(&mut sink, &mut store, &cancel)
        .unwrap();
    assert_eq!(outcome, RunOutcome::Stopped);
    // The consistent point is durable even though nothing was acknowledged.
    assert_eq!(store.load("capture_slot").unwrap(), Some(Lsn(10)));

    // Second run: the slot exists, and the stored consistent point lets the
    // resume path proceed instead of failing with a slot-state error.
    let mut source = FakeSource::new();
    source.slot_exists = true;
    source.feed = vec![Feed::Insert {
        id: 5,
        payload: "C",
        at: 20,
    }];
    let acks = source.acks();
    let mut sink = RecordingSink::default();
    let outcome = Orchestrator::new(source, slot())
        .run(&mut sink, &mut store, &cancel)
        .unwrap();
    assert_eq!(outcome, RunOutcome::Stopped);
    assert_eq!(sink.events.len(), 1);
    assert_eq!(sink.events[0].id, 5);
    assert_eq!(*acks.lock().unwrap(), vec![Lsn(20)]);
}

#[test]
fn resuming_an_existing_slot_requires_a_stored_position() {
    let mut source = FakeSource::new();
    source.slot_exists = true;
    let mut sink = RecordingSink::default();
    let mut store = MemoryPositionStore::default();
    let err = Orchestrator::new(source, slot())
        .run(&mut sink, &mut store, &AtomicBool::new(false))
        .unwrap_err();
    assert!(matches!(err, CaptureError::SlotState(_)));
    assert!(sink.events.is_empty());
}

#[test]
fn plugin_mismatch_is_fatal_and_never_recreates_the_slot() {
    let mut source = FakeSource::new();
    source.plugin_mismatch = Some("wal2json");
    let mut sink = RecordingSink::default();
    let mut store = MemoryPositionStore::default();
    let err = Orchestrator::new(source, slot())
        .run(&mut sink, &mut store, &AtomicBool::new(false))
        .unwrap_err();
    assert!(matches!(err, CaptureError::SlotState(_)));
}

#[test]
fn decode_error_aborts_the_run_without_over_acknowledging() {
    let mut source = FakeSource::new();
    source.feed = vec![
        Feed::Insert {
            id: 1,
            payload: "A",
            at: 20,
        },
        Feed::Fail(DecodeError::FieldKind {
            ordinal: 0,
            found: "null",
        }),
        Feed::Insert {
            id: 2,
            payload: "B",
            at: 40,
        },
    ];
    let acks = source.acks();
    let mut sink = RecordingSink::default();
    let mut store = MemoryPositionStore::default();
    let err = Orchestrator::new(source, slot())
        .run(&mut sink, &mut store, &AtomicBool::new(false))
        .unwrap_err();
    assert!(matches!(err, CaptureError::Decode(_)));
    // The sink saw the event before the fault and nothing after it.
    assert_eq!(sink.events.len(), 1);
    assert_eq!(*acks.lock().unwrap(), vec![Lsn(20)]);
}

#[test]
fn cancellation_stops_within_one_wait_cycle() {
    let mut source = FakeSource::new();
    source.feed = vec![
        Feed::Insert {
            id: 1,
            payload: "A",
            at: 20,
        },
        Feed::Cancel,
        Feed::Insert {
            id: 2,
            payload: "B",
            at: 30,
        },
    ];
    let acks = source.acks();
    let mut sink = RecordingSink::default();
    let mut store = MemoryPositionStore::default();
    let outcome = Orchestrator::new(source, slot())
        .run(&mut sink, &mut store, &AtomicBool::new(false))
        .unwrap();
    assert_eq!(outcome, RunOutcome::Cancelled);
    assert_eq!(sink.events.len(), 1);
    // Acknowledged up to the last processed event, never past it.
    assert_eq!(*acks.lock().unwrap(), vec![Lsn(20)]);
}

#[test]
fn unsupported_messages_are_skipped_and_later_inserts_still_arrive() {
    let mut source = FakeSource::new();
    source.feed = vec![
        Feed::Skipped,
        Feed::Insert {
            id: 7,
            payload: "X",
            at: 40,
        },
        Feed::Skipped,
    ];
    let acks = source.acks();
    let mut sink = RecordingSink::default();
    let mut store = MemoryPositionStore::default();
    let outcome = Orchestrator::new(source, slot())
        .run(&mut sink, &mut store, &AtomicBool::new(false))
        .unwrap();
    assert_eq!(outcome, RunOutcome::Stopped);
    assert_eq!(sink.events.len(), 1);
    assert_eq!(sink.events[0].id, 7);
    assert_eq!(*acks.lock().unwrap(), vec![Lsn(40)]);
}

#[test]
fn delivery_order_matches_production_order() {
    let mut source = FakeSource::new();
    source.feed = (1..=5)
        .map(|n| Feed::Insert {
            id: n,
            payload: "row",
            at: 20 + n as u64 * 10,
        })
        .collect();
    let mut sink = RecordingSink::default();
    let mut store = MemoryPositionStore::default();
    Orchestrator::new(source, slot())
        .run(&mut sink, &mut store, &AtomicBool::new(false))
        .unwrap();
    let ids: Vec<i64> = sink.events.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[test]
fn batched_acknowledgment_flushes_on_stop() {
    let mut source = FakeSource::new();
    source.feed = (1..=3)
        .map(|n| Feed::Insert {
            id: n,
            payload: "row",
            at: 20 + n as u64 * 10,
        })
        .collect();
    let acks = source.acks();
    let mut sink = RecordingSink::default();
    let mut store = MemoryPositionStore::default();
    Orchestrator::new(source, slot())
        .with_ack_policy(AckPolicy::EveryN(2))
        .run(&mut sink, &mut store, &AtomicBool::new(false))
        .unwrap();
    // One batch boundary at the second event, the remainder flushed on stop.
    assert_eq!(*acks.lock().unwrap(), vec![Lsn(40), Lsn(50)]);
    assert_eq!(store.load("capture_slot").unwrap(), Some(Lsn(50)));
}

#[test]
fn replaying_an_event_is_idempotent_in_a_keyed_sink() {
    let mut sink = KeyedSink::default();
    let event = ChangeEvent::streamed(5, "C".to_string(), Lsn(20));
    sink.apply(&event).unwrap();
    let once = sink.rows.clone();
    // Crash between processing and acknowledgment replays the event.
    sink.apply(&event).unwrap();
    assert_eq!(sink.rows, once);
    assert_eq!(sink.rows.get(&5).map(String::as_str), Some("C"));
}
