//! Durable storage of the last acknowledged position per slot.
//!
//! The source itself does not remember consumer progress across restarts; the
//! resume path requires the caller to supply the last acknowledged position.
//! The trait is the contract, the implementations here are policies: a file
//! per slot for the CLI, an in-memory map for tests and embedders with their
//! own durability.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;

use crate::replication::message::Lsn;

pub trait PositionStore {
    fn load(&mut self, slot: &str) -> anyhow::Result<Option<Lsn>>;
    fn save(&mut self, slot: &str, position: Lsn) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryPositionStore {
    positions: HashMap<String, Lsn>,
}

impl PositionStore for MemoryPositionStore {
    fn load(&mut self, slot: &str) -> anyhow::Result<Option<Lsn>> {
        Ok(self.positions.get(slot).copied())
    }

    fn save(&mut self, slot: &str, position: Lsn) -> anyhow::Result<()> {
        self.positions.insert(slot.to_string(), position);
        Ok(())
    }
}

/// One text file holding the position in the Postgres "X/Y" form. The slot
/// name is ignored: the file is already scoped to a single slot by the caller.
#[derive(Debug)]
pub struct FilePositionStore {
    path: PathBuf,
}

impl FilePositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FilePositionStore { path: path.into() }
    }
}

impl PositionStore for FilePositionStore {
    fn load(&mut self, _slot: &str) -> anyhow::Result<Option<Lsn>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading position file {}", self.path.display()));
            }
        };
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let position = Lsn::from_pg_string(trimmed)
            .with_context(|| format!("malformed position {trimmed:?} in {}", self.path.display()))?;
        Ok(Some(position))
    }

    fn save(&mut self, _slot: &str, position: Lsn) -> anyhow::Result<()> {
        std::fs::write(&self.path, format!("{position}\n"))
            .with_context(|| format!("writing position file {}", self.path.display()))
    }
}
