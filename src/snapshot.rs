//! Snapshot catch-up: baseline rows read under the slot's exported snapshot.

use postgres::fallible_iterator::FallibleIterator;

use crate::error::CaptureError;
use crate::event::ChangeEvent;

/// Reads the publication's tables inside a read-only repeatable-read
/// transaction pinned to an exported snapshot, so every row is causally
/// consistent with the slot's consistent point. Rows are streamed, not
/// materialized; order is unspecified unless `order_by` is set.
pub struct SnapshotReader {
    publication: String,
    order_by: Option<String>,
}

impl SnapshotReader {
    pub fn new(publication: impl Into<String>) -> Self {
        SnapshotReader {
            publication: publication.into(),
            order_by: None,
        }
    }

    pub fn with_order_by(mut self, expr: impl Into<String>) -> Self {
        self.order_by = Some(expr.into());
        self
    }

    /// Yield every baseline row to `on_event` as a snapshot-origin insert.
    /// Returns the number of rows read.
    pub fn read(
        &self,
        client: &mut postgres::Client,
        snapshot_name: &str,
        on_event: &mut dyn FnMut(ChangeEvent) -> anyhow::Result<()>,
    ) -> Result<u64, CaptureError> {
        let mut txn = client
            .build_transaction()
            .isolation_level(postgres::IsolationLevel::RepeatableRead)
            .read_only(true)
            .start()?;
        txn.batch_execute(&format!("SET TRANSACTION SNAPSHOT '{snapshot_name}'"))?;

        let tables = txn.query(
            "SELECT schemaname, tablename FROM pg_publication_tables WHERE pubname = $1",
            &[&self.publication],
        )?;
        let mut count = 0u64;
        for table in &tables {
            let schema: String = table.get(0);
            let name: String = table.get(1);
            let query = self.table_query(&schema, &name);
            let params: Vec<&(dyn postgres::types::ToSql + Sync)> = Vec::new();
            let mut rows = txn.query_raw(query.as_str(), params)?;
            while let Some(row) = rows.next()? {
                let id: i64 = row.try_get(0)?;
                let payload: String = row.try_get(1)?;
                on_event(ChangeEvent::snapshot(id, payload)).map_err(CaptureError::Sink)?;
                count += 1;
            }
        }
        txn.commit()?;
        Ok(count)
    }

    fn table_query(&self, schema: &str, name: &str) -> String {
        let mut query = format!("SELECT * FROM {}.{}", quote_ident(schema), quote_ident(name));
        if let Some(order_by) = &self.order_by {
            query.push_str(&format!(" ORDER BY {order_by}"));
        }
        query
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
