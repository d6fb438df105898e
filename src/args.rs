use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Database server host
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Database server port
    #[arg(long, default_value_t = 5432)]
    pub port: u16,

    /// Database user
    #[arg(long, default_value = "postgres")]
    pub user: String,

    /// Database name
    #[arg(long, default_value = "postgres")]
    pub dbname: String,

    /// Replication slot name
    #[arg(long, default_value = "capture_slot")]
    pub slot: String,

    /// Publication scoping the captured tables
    #[arg(long, default_value = "capture_pub")]
    pub publication: String,

    /// Create the slot as temporary (dropped when the session ends)
    #[arg(long, default_value = "false")]
    pub temporary: bool,

    /// File holding the last acknowledged position (default: <slot>.lsn)
    #[arg(long)]
    pub position_file: Option<PathBuf>,

    /// Acknowledge after every N processed events
    #[arg(long, default_value_t = 1)]
    pub ack_every: u32,
}

impl Args {
    /// Key-value conninfo accepted by both the SQL and replication connections.
    pub fn conninfo(&self) -> String {
        format!(
            "host={} port={} user={} dbname={}",
            self.host, self.port, self.user, self.dbname
        )
    }

    pub fn position_file(&self) -> PathBuf {
        self.position_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.lsn", self.slot)))
    }
}

pub fn get_args() -> Result<Args, clap::Error> {
    Args::try_parse()
}
