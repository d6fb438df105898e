pub mod message;
pub mod pgoutput;
pub mod slot;
pub mod stream;

pub use message::{KeepAlive, Lsn, ReplicationMessage, XLogData};
pub use pgoutput::{LogicalMessage, TupleField, decode_insert_row};
pub use slot::{CreatedSlot, OUTPUT_PLUGIN, SlotConfig, SlotStatus};
pub use stream::ReplicationConn;
