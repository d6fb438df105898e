// Outer replication protocol frames: XLogData and keepalive.

use crate::error::DecodeError;

/// A write-ahead log position. Totally ordered, opaque to the consumer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn(pub u64);

impl Lsn {
    /// Parse the Postgres textual form, e.g. "0/16B6C50".
    pub fn from_pg_string(s: &str) -> Option<Self> {
        let (hi, lo) = s.split_once('/')?;
        let hi = u64::from_str_radix(hi, 16).ok()?;
        let lo = u64::from_str_radix(lo, 16).ok()?;
        Some(Lsn((hi << 32) | lo))
    }

    pub fn to_pg_string(self) -> String {
        format!("{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl std::fmt::Display for Lsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_pg_string())
    }
}

impl From<u64> for Lsn {
    fn from(val: u64) -> Self {
        Lsn(val)
    }
}

impl From<Lsn> for u64 {
    fn from(lsn: Lsn) -> Self {
        lsn.0
    }
}

/// One frame of the COPY-both stream.
#[derive(Debug, PartialEq, Eq)]
pub enum ReplicationMessage {
    XLogData(XLogData),
    KeepAlive(KeepAlive),
    /// Tag not understood by this client. Skipped, forward-compatible.
    Unknown(u8),
}

/// A chunk of decoded WAL ('w'). `data` carries a pgoutput logical message.
#[derive(Debug, PartialEq, Eq)]
pub struct XLogData {
    pub wal_start: Lsn,
    pub wal_end: Lsn,
    pub server_clock: u64,
    pub data: Vec<u8>,
}

/// Primary keepalive ('k'). When `reply_requested` is set the server expects a
/// standby status update promptly.
#[derive(Debug, PartialEq, Eq)]
pub struct KeepAlive {
    pub wal_end: Lsn,
    pub server_clock: u64,
    pub reply_requested: bool,
}

impl ReplicationMessage {
    pub fn parse(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(buf, "replication frame");
        match r.u8()? {
            b'w' => Ok(ReplicationMessage::XLogData(XLogData {
                wal_start: Lsn(r.u64()?),
                wal_end: Lsn(r.u64()?),
                server_clock: r.u64()?,
                data: r.rest().to_vec(),
            })),
            b'k' => Ok(ReplicationMessage::KeepAlive(KeepAlive {
                wal_end: Lsn(r.u64()?),
                server_clock: r.u64()?,
                reply_requested: r.u8()? != 0,
            })),
            tag => Ok(ReplicationMessage::Unknown(tag)),
        }
    }
}

/// Big-endian cursor over a message buffer.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    what: &'static str,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8], what: &'static str) -> Self {
        Reader { buf, what }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() < n {
            return Err(DecodeError::Truncated(self.what));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn i16(&mut self) -> Result<i16, DecodeError> {
        let raw = self.take(2)?;
        Ok(i16::from_be_bytes([raw[0], raw[1]]))
    }

    pub fn i32(&mut self) -> Result<i32, DecodeError> {
        let raw = self.take(4)?;
        Ok(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        let raw = self.take(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub fn u64(&mut self) -> Result<u64, DecodeError> {
        let raw = self.take(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(raw);
        Ok(u64::from_be_bytes(bytes))
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.take(n)
    }

    pub fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }
}
