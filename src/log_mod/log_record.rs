use crate::common::{DbError, Lsn, PageId, Result, Rid, TxnId};

/// Size of the common record header: type u8, lsn u64, total_len u32,
/// txn_id u64, prev_lsn u64.
pub const LOG_HEADER_SIZE: usize = 29;

/// Trailing crc32c over header + payload.
const CRC_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogRecordType {
    Update = 0,
    Insert = 1,
    Delete = 2,
    Begin = 3,
    Commit = 4,
    Abort = 5,
    Checkpoint = 6,
    Header = 7,
}

impl LogRecordType {
    fn from_u8(value: u8) -> Result<Self> {
        Ok(match value {
            0 => LogRecordType::Update,
            1 => LogRecordType::Insert,
            2 => LogRecordType::Delete,
            3 => LogRecordType::Begin,
            4 => LogRecordType::Commit,
            5 => LogRecordType::Abort,
            6 => LogRecordType::Checkpoint,
            7 => LogRecordType::Header,
            _ => return Err(DbError::LogCorrupt),
        })
    }
}

/// Type-specific payload. Every variant owns its bytes; ownership passes into
/// the log buffer at append time.
#[derive(Debug, Clone)]
pub enum LogPayload {
    Begin,
    Commit,
    Abort,
    Insert {
        tuple: Vec<u8>,
        rid: Rid,
        table: String,
    },
    Delete {
        tuple: Vec<u8>,
        rid: Rid,
        table: String,
    },
    Update {
        old: Vec<u8>,
        new: Vec<u8>,
        rid: Rid,
        table: String,
    },
    Checkpoint {
        att: Vec<(TxnId, Lsn)>,
        dpt: Vec<(PageId, Lsn)>,
    },
    Header {
        global_lsn: Lsn,
        checkpoint_lsn: Lsn,
        checkpoint_count: u64,
    },
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
    /// Compensation marker: the record describes an undo step and its
    /// `prev_lsn` points past the record it undoes. Undo never re-undoes a
    /// compensation record. Encoded in the high bit of the type byte.
    pub clr: bool,
    pub payload: LogPayload,
}

impl LogRecord {
    pub fn record_type(&self) -> LogRecordType {
        match &self.payload {
            LogPayload::Update { .. } => LogRecordType::Update,
            LogPayload::Insert { .. } => LogRecordType::Insert,
            LogPayload::Delete { .. } => LogRecordType::Delete,
            LogPayload::Begin => LogRecordType::Begin,
            LogPayload::Commit => LogRecordType::Commit,
            LogPayload::Abort => LogRecordType::Abort,
            LogPayload::Checkpoint { .. } => LogRecordType::Checkpoint,
            LogPayload::Header { .. } => LogRecordType::Header,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        match &self.payload {
            LogPayload::Begin | LogPayload::Commit | LogPayload::Abort => {}
            LogPayload::Insert { tuple, rid, table } | LogPayload::Delete { tuple, rid, table } => {
                put_tuple(&mut payload, tuple);
                payload.extend_from_slice(&rid.to_bytes());
                put_str(&mut payload, table);
            }
            LogPayload::Update {
                old,
                new,
                rid,
                table,
            } => {
                put_tuple(&mut payload, old);
                put_tuple(&mut payload, new);
                payload.extend_from_slice(&rid.to_bytes());
                put_str(&mut payload, table);
            }
            LogPayload::Checkpoint { att, dpt } => {
                payload.extend_from_slice(&(att.len() as u32).to_le_bytes());
                for (txn_id, last_lsn) in att {
                    payload.extend_from_slice(&txn_id.to_le_bytes());
                    payload.extend_from_slice(&last_lsn.to_le_bytes());
                }
                payload.extend_from_slice(&(dpt.len() as u32).to_le_bytes());
                for (page_id, rec_lsn) in dpt {
                    payload.extend_from_slice(&page_id.0.to_le_bytes());
                    payload.extend_from_slice(&rec_lsn.to_le_bytes());
                }
            }
            LogPayload::Header {
                global_lsn,
                checkpoint_lsn,
                checkpoint_count,
            } => {
                payload.extend_from_slice(&global_lsn.to_le_bytes());
                payload.extend_from_slice(&checkpoint_lsn.to_le_bytes());
                payload.extend_from_slice(&checkpoint_count.to_le_bytes());
            }
        }

        let total_len = LOG_HEADER_SIZE + payload.len() + CRC_SIZE;
        let mut out = Vec::with_capacity(total_len);
        let type_byte = self.record_type() as u8 | if self.clr { 0x80 } else { 0 };
        out.push(type_byte);
        out.extend_from_slice(&self.lsn.to_le_bytes());
        out.extend_from_slice(&(total_len as u32).to_le_bytes());
        out.extend_from_slice(&self.txn_id.to_le_bytes());
        out.extend_from_slice(&self.prev_lsn.to_le_bytes());
        out.extend_from_slice(&payload);
        let crc = crc32c::crc32c(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    /// Deserializes one record from the front of `buf`, returning it and its
    /// total length. Length or checksum mismatches surface as `LogCorrupt` /
    /// `ChecksumMismatch`; recovery truncates the tail on either.
    pub fn deserialize(buf: &[u8]) -> Result<(LogRecord, usize)> {
        if buf.len() < LOG_HEADER_SIZE + CRC_SIZE {
            return Err(DbError::LogCorrupt);
        }
        let clr = buf[0] & 0x80 != 0;
        let record_type = LogRecordType::from_u8(buf[0] & 0x7f)?;
        let lsn = get_u64(buf, 1);
        let total_len = get_u32(buf, 9) as usize;
        let txn_id = get_u64(buf, 13);
        let prev_lsn = get_u64(buf, 21);
        if total_len < LOG_HEADER_SIZE + CRC_SIZE || total_len > buf.len() {
            return Err(DbError::LogCorrupt);
        }
        let stored_crc = get_u32(buf, total_len - CRC_SIZE);
        let crc = crc32c::crc32c(&buf[..total_len - CRC_SIZE]);
        if crc != stored_crc {
            return Err(DbError::ChecksumMismatch);
        }

        let body = &buf[LOG_HEADER_SIZE..total_len - CRC_SIZE];
        let payload = match record_type {
            LogRecordType::Begin => LogPayload::Begin,
            LogRecordType::Commit => LogPayload::Commit,
            LogRecordType::Abort => LogPayload::Abort,
            LogRecordType::Insert | LogRecordType::Delete => {
                let mut pos = 0;
                let tuple = take_tuple(body, &mut pos)?;
                let rid = take_rid(body, &mut pos)?;
                let table = take_str(body, &mut pos)?;
                if record_type == LogRecordType::Insert {
                    LogPayload::Insert { tuple, rid, table }
                } else {
                    LogPayload::Delete { tuple, rid, table }
                }
            }
            LogRecordType::Update => {
                let mut pos = 0;
                let old = take_tuple(body, &mut pos)?;
                let new = take_tuple(body, &mut pos)?;
                let rid = take_rid(body, &mut pos)?;
                let table = take_str(body, &mut pos)?;
                LogPayload::Update {
                    old,
                    new,
                    rid,
                    table,
                }
            }
            LogRecordType::Checkpoint => {
                let mut pos = 0;
                let att_len = take_u32(body, &mut pos)? as usize;
                let mut att = Vec::with_capacity(att_len);
                for _ in 0..att_len {
                    let txn = take_u64(body, &mut pos)?;
                    let last = take_u64(body, &mut pos)?;
                    att.push((txn, last));
                }
                let dpt_len = take_u32(body, &mut pos)? as usize;
                let mut dpt = Vec::with_capacity(dpt_len);
                for _ in 0..dpt_len {
                    let page = take_u64(body, &mut pos)?;
                    let rec = take_u64(body, &mut pos)?;
                    dpt.push((PageId(page), rec));
                }
                LogPayload::Checkpoint { att, dpt }
            }
            LogRecordType::Header => {
                let mut pos = 0;
                let global_lsn = take_u64(body, &mut pos)?;
                let checkpoint_lsn = take_u64(body, &mut pos)?;
                let checkpoint_count = take_u64(body, &mut pos)?;
                LogPayload::Header {
                    global_lsn,
                    checkpoint_lsn,
                    checkpoint_count,
                }
            }
        };

        Ok((
            LogRecord {
                lsn,
                txn_id,
                prev_lsn,
                clr,
                payload,
            },
            total_len,
        ))
    }
}

fn put_tuple(out: &mut Vec<u8>, tuple: &[u8]) {
    out.extend_from_slice(&(tuple.len() as u32).to_le_bytes());
    out.extend_from_slice(tuple);
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn get_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn get_u64(buf: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(b)
}

fn take_u32(buf: &[u8], pos: &mut usize) -> Result<u32> {
    if *pos + 4 > buf.len() {
        return Err(DbError::LogCorrupt);
    }
    let v = get_u32(buf, *pos);
    *pos += 4;
    Ok(v)
}

fn take_u64(buf: &[u8], pos: &mut usize) -> Result<u64> {
    if *pos + 8 > buf.len() {
        return Err(DbError::LogCorrupt);
    }
    let v = get_u64(buf, *pos);
    *pos += 8;
    Ok(v)
}

fn take_rid(buf: &[u8], pos: &mut usize) -> Result<Rid> {
    if *pos + Rid::SERIALIZED_LEN > buf.len() {
        return Err(DbError::LogCorrupt);
    }
    let rid = Rid::from_bytes(&buf[*pos..*pos + Rid::SERIALIZED_LEN]);
    *pos += Rid::SERIALIZED_LEN;
    Ok(rid)
}

fn take_tuple(buf: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    let len = take_u32(buf, pos)? as usize;
    if *pos + len > buf.len() {
        return Err(DbError::LogCorrupt);
    }
    let out = buf[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(out)
}

fn take_str(buf: &[u8], pos: &mut usize) -> Result<String> {
    let bytes = take_tuple(buf, pos)?;
    String::from_utf8(bytes).map_err(|_| DbError::LogCorrupt)
}
