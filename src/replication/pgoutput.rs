// pgoutput logical messages carried inside XLogData frames.

use crate::error::DecodeError;
use crate::replication::message::Reader;

/// A decoded pgoutput message. Only `Insert` carries data this client acts on;
/// the remaining variants are recognized so the loop can discard them without
/// error, keeping the client forward-compatible with message kinds it does not
/// implement yet.
#[derive(Debug, PartialEq, Eq)]
pub enum LogicalMessage {
    Begin,
    Commit,
    Relation,
    Insert { relation_oid: u32, row: Vec<TupleField> },
    Update,
    Delete,
    Truncate,
    /// Tag this client does not recognize at all. Skipped, forward-compatible.
    Unsupported(u8),
}

/// One column of a replicated tuple, tagged with how it was encoded on the
/// wire. Transient: consumed during decode, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TupleField {
    Null,
    UnchangedToast,
    Text(Vec<u8>),
    Binary(Vec<u8>),
}

impl TupleField {
    pub fn kind_name(&self) -> &'static str {
        match self {
            TupleField::Null => "null",
            TupleField::UnchangedToast => "unchanged toast",
            TupleField::Text(_) => "text",
            TupleField::Binary(_) => "binary",
        }
    }
}

impl LogicalMessage {
    pub fn parse(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(buf, "logical message");
        match r.u8()? {
            b'B' => Ok(LogicalMessage::Begin),
            b'C' => Ok(LogicalMessage::Commit),
            b'R' => Ok(LogicalMessage::Relation),
            b'I' => {
                let relation_oid = r.u32()?;
                let marker = r.u8()?;
                // Inserts carry exactly one new-row tuple, marked 'N'.
                if marker != b'N' {
                    return Err(DecodeError::UnexpectedTupleMarker(marker));
                }
                let row = parse_tuple(&mut r)?;
                Ok(LogicalMessage::Insert { relation_oid, row })
            }
            b'U' => Ok(LogicalMessage::Update),
            b'D' => Ok(LogicalMessage::Delete),
            b'T' => Ok(LogicalMessage::Truncate),
            tag => Ok(LogicalMessage::Unsupported(tag)),
        }
    }
}

fn parse_tuple(r: &mut Reader<'_>) -> Result<Vec<TupleField>, DecodeError> {
    let count = r.i16()?.max(0) as usize;
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        let field = match r.u8()? {
            b'n' => TupleField::Null,
            b'u' => TupleField::UnchangedToast,
            b't' => {
                let len = r.i32()?.max(0) as usize;
                TupleField::Text(r.bytes(len)?.to_vec())
            }
            b'b' => {
                let len = r.i32()?.max(0) as usize;
                TupleField::Binary(r.bytes(len)?.to_vec())
            }
            kind => return Err(DecodeError::UnknownFieldKind(kind)),
        };
        fields.push(field);
    }
    Ok(fields)
}

/// Decode an insert's new-row tuple into `(identifier, payload)`, strictly by
/// ordinal: field 0 a binary int64, field 1 a binary text value. The stream
/// runs with `binary 'true'`, so both arrive as binary fields.
pub fn decode_insert_row(row: &[TupleField]) -> Result<(i64, String), DecodeError> {
    if row.len() != 2 {
        return Err(DecodeError::FieldCount {
            expected: 2,
            found: row.len(),
        });
    }
    let id = match &row[0] {
        TupleField::Binary(raw) => {
            let bytes: [u8; 8] = raw.as_slice().try_into().map_err(|_| DecodeError::Malformed {
                ordinal: 0,
                reason: format!("expected an 8-byte integer, got {} bytes", raw.len()),
            })?;
            i64::from_be_bytes(bytes)
        }
        other => {
            return Err(DecodeError::FieldKind {
                ordinal: 0,
                found: other.kind_name(),
            });
        }
    };
    let payload = match &row[1] {
        TupleField::Binary(raw) => std::str::from_utf8(raw)
            .map_err(|_| DecodeError::Malformed {
                ordinal: 1,
                reason: "payload is not valid utf-8".to_string(),
            })?
            .to_string(),
        other => {
            return Err(DecodeError::FieldKind {
                ordinal: 1,
                found: other.kind_name(),
            });
        }
    };
    Ok((id, payload))
}
