// Slot identity and existence checks.

use crate::error::CaptureError;
use crate::replication::message::Lsn;

/// The only output plugin this client speaks.
pub const OUTPUT_PLUGIN: &str = "pgoutput";

/// Identity of a capture slot and the publication scoping its stream.
#[derive(Debug, Clone)]
pub struct SlotConfig {
    pub name: String,
    pub publication: String,
    /// Temporary slots are dropped by the server when the session ends.
    pub temporary: bool,
}

impl SlotConfig {
    pub fn new(name: impl Into<String>, publication: impl Into<String>) -> Self {
        SlotConfig {
            name: name.into(),
            publication: publication.into(),
            temporary: false,
        }
    }

    pub fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }

    /// Metadata query against `pg_replication_slots`. A failed check is a
    /// connectivity error; the caller decides whether to retry.
    pub fn status<C: postgres::GenericClient>(
        &self,
        client: &mut C,
    ) -> Result<SlotStatus, CaptureError> {
        let rows = client.query(
            "SELECT plugin FROM pg_replication_slots WHERE slot_name = $1",
            &[&self.name],
        )?;
        match rows.first() {
            None => Ok(SlotStatus::Absent),
            Some(row) => {
                let plugin: String = row.get(0);
                if plugin == OUTPUT_PLUGIN {
                    Ok(SlotStatus::Present)
                } else {
                    Ok(SlotStatus::PluginMismatch(plugin))
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotStatus {
    Absent,
    Present,
    /// A slot with this name exists but belongs to a different plugin. Fatal:
    /// recreating it would discard someone else's position continuity.
    PluginMismatch(String),
}

/// Atomic result of slot creation: the exported snapshot and the streaming
/// start refer to the identical point in WAL history. This is what makes the
/// catch-up/stream boundary gap-free and duplicate-free.
#[derive(Debug, Clone)]
pub struct CreatedSlot {
    pub snapshot_name: String,
    pub consistent_point: Lsn,
}
