// Replication-protocol connection: slot creation, START_REPLICATION, the
// COPY-both message pump, and standby status updates.

use crate::error::CaptureError;
use crate::replication::message::{Lsn, ReplicationMessage};
use crate::replication::slot::{CreatedSlot, OUTPUT_PLUGIN, SlotConfig};

/// Microseconds between the Unix and Postgres (2000-01-01) epochs.
const PG_EPOCH_UNIX_MICROS: u64 = 946_684_800 * 1_000_000;

pub struct ReplicationConn {
    conn: libpq::Connection,
}

impl ReplicationConn {
    pub fn connect(conninfo: &str) -> Result<Self, CaptureError> {
        let conninfo = with_replication_param(conninfo);
        let conn = libpq::Connection::new(&conninfo)
            .map_err(|e| CaptureError::Connectivity(e.to_string()))?;
        Ok(Self { conn })
    }

    /// `CREATE_REPLICATION_SLOT` with an exported snapshot. The snapshot stays
    /// usable until streaming starts on this connection, which is exactly the
    /// window the catch-up phase runs in.
    pub fn create_slot(&mut self, slot: &SlotConfig) -> Result<CreatedSlot, CaptureError> {
        let temporary = if slot.temporary { " TEMPORARY" } else { "" };
        let command = format!(
            "CREATE_REPLICATION_SLOT \"{}\"{} LOGICAL {} (SNAPSHOT 'export')",
            slot.name, temporary, OUTPUT_PLUGIN
        );
        let res = self.conn.exec(&command);
        if res.status() != libpq::Status::TuplesOk {
            return Err(CaptureError::SlotState(format!(
                "failed to create slot {}: {:?}",
                slot.name,
                self.conn.error_message()
            )));
        }
        // Result row: slot_name, consistent_point, snapshot_name, output_plugin.
        let consistent_point = text_value(&res, 1)
            .and_then(|s| Lsn::from_pg_string(&s))
            .ok_or_else(|| {
                CaptureError::SlotState(format!(
                    "slot {} was created without a consistent point",
                    slot.name
                ))
            })?;
        let snapshot_name = text_value(&res, 2).ok_or_else(|| {
            CaptureError::SlotState(format!(
                "slot {} was created without an exported snapshot",
                slot.name
            ))
        })?;
        Ok(CreatedSlot {
            snapshot_name,
            consistent_point,
        })
    }

    /// Issue `START_REPLICATION`, switching the connection into COPY-both mode.
    pub fn start(&mut self, slot: &SlotConfig, from: Lsn) -> Result<(), CaptureError> {
        let query = format!(
            "START_REPLICATION SLOT \"{}\" LOGICAL {} (proto_version '1', publication_names '\"{}\"', binary 'true')",
            slot.name,
            from.to_pg_string(),
            slot.publication
        );
        let res = self.conn.exec(&query);
        if res.status() != libpq::Status::CopyBoth {
            return Err(CaptureError::Connectivity(format!(
                "failed to start replication: status {:?}, error {:?}",
                res.status(),
                self.conn.error_message()
            )));
        }
        Ok(())
    }

    /// Block until the next copy-stream frame arrives. This is the single
    /// suspension point of the pipeline; keepalives bound how long it lasts.
    pub fn next_message(&mut self) -> Result<ReplicationMessage, CaptureError> {
        let _ = self.conn.consume_input();
        match self.conn.copy_data(false) {
            Ok(buf) => Ok(ReplicationMessage::parse(&buf)?),
            Err(err) => Err(CaptureError::Connectivity(format!(
                "replication stream closed: {:?} {:?}",
                err,
                self.conn.error_message()
            ))),
        }
    }

    /// Standby status update ('r') confirming everything up to and including
    /// `position` as durably processed, so the server may reclaim its history.
    pub fn send_status_update(
        &mut self,
        position: Lsn,
        reply_requested: bool,
    ) -> Result<(), CaptureError> {
        let buf = encode_status_update(position, pg_clock_micros(), reply_requested);
        self.conn
            .put_copy_data(&buf)
            .map_err(|e| CaptureError::Connectivity(e.to_string()))?;
        self.conn
            .flush()
            .map_err(|e| CaptureError::Connectivity(e.to_string()))?;
        Ok(())
    }
}

fn text_value(res: &libpq::Result, column: usize) -> Option<String> {
    res.value(0, column)
        .and_then(|raw| std::str::from_utf8(raw).ok())
        .map(str::to_string)
}

/// 'r' + written/flushed/applied LSNs + client clock + reply flag. All three
/// LSNs carry the confirmed position.
fn encode_status_update(position: Lsn, clock_micros: u64, reply_requested: bool) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + 8 * 4 + 1);
    buf.push(b'r');
    for _ in 0..3 {
        buf.extend_from_slice(&u64::from(position).to_be_bytes());
    }
    buf.extend_from_slice(&clock_micros.to_be_bytes());
    buf.push(u8::from(reply_requested));
    buf
}

fn pg_clock_micros() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
        .saturating_sub(PG_EPOCH_UNIX_MICROS)
}

fn with_replication_param(conninfo: &str) -> String {
    let mut conninfo = conninfo.trim().to_string();
    if !conninfo.contains("replication=") {
        if conninfo.starts_with("postgres://") || conninfo.starts_with("postgresql://") {
            if conninfo.contains('?') {
                conninfo.push_str("&replication=database");
            } else {
                conninfo.push_str("?replication=database");
            }
        } else {
            if !conninfo.is_empty() && !conninfo.ends_with(' ') {
                conninfo.push(' ');
            }
            conninfo.push_str("replication=database");
        }
    }
    conninfo
}
