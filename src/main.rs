//! Binary entry point for pg-capture.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pg_capture::args::get_args;
use pg_capture::{
    AckPolicy, ChangeEvent, EventOrigin, EventSink, FilePositionStore, Orchestrator, PgSource,
    RunOutcome, SlotConfig,
};

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = match get_args() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(2);
        }
    };

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        if let Err(err) = ctrlc::set_handler(move || cancel.store(true, Ordering::Relaxed)) {
            tracing::error!(error = %err, "failed to install signal handler");
            return ExitCode::from(1);
        }
    }

    let mut slot = SlotConfig::new(&args.slot, &args.publication);
    if args.temporary {
        slot = slot.temporary();
    }
    let mut store = FilePositionStore::new(args.position_file());
    let mut sink = ConsoleSink;

    let source = match PgSource::connect(&args.conninfo()) {
        Ok(source) => source,
        Err(err) => {
            tracing::error!(error = %err, "failed to connect");
            return ExitCode::from(1);
        }
    };

    let orchestrator =
        Orchestrator::new(source, slot).with_ack_policy(AckPolicy::EveryN(args.ack_every));
    match orchestrator.run(&mut sink, &mut store, &cancel) {
        Ok(RunOutcome::Stopped) => ExitCode::SUCCESS,
        Ok(RunOutcome::Cancelled) => ExitCode::from(1),
        Err(_) => ExitCode::from(1),
    }
}

/// Demo sink: prints each event. Printing is idempotent enough for a demo;
/// real sinks must key their writes by the event id.
struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn apply(&mut self, event: &ChangeEvent) -> anyhow::Result<()> {
        match event.origin {
            EventOrigin::Snapshot => {
                println!("existing row id={} payload={:?}", event.id, event.payload);
            }
            EventOrigin::Streamed => {
                println!("inserted row id={} payload={:?}", event.id, event.payload);
            }
        }
        Ok(())
    }
}
