use crate::buffer::PageId;
use crate::error::BurrowDBResult;
use crate::recovery::{Lsn, INVALID_LSN};
use crate::storage::codec::{CommonCodec, DecodedData, RidCodec};
use crate::storage::page::RecordId;
use crate::transaction::TransactionId;

/// Fixed header of five i32s: size, lsn, txn_id, prev_lsn, type.
pub const LOG_RECORD_HEADER_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordType {
    Invalid = 0,
    Insert = 1,
    MarkDelete = 2,
    ApplyDelete = 3,
    RollbackDelete = 4,
    Update = 5,
    Begin = 6,
    Commit = 7,
    Abort = 8,
    NewPage = 9,
}

impl LogRecordType {
    fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            1 => Some(Self::Insert),
            2 => Some(Self::MarkDelete),
            3 => Some(Self::ApplyDelete),
            4 => Some(Self::RollbackDelete),
            5 => Some(Self::Update),
            6 => Some(Self::Begin),
            7 => Some(Self::Commit),
            8 => Some(Self::Abort),
            9 => Some(Self::NewPage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogPayload {
    Begin,
    Commit,
    Abort,
    Insert {
        rid: RecordId,
        tuple: Vec<u8>,
    },
    MarkDelete {
        rid: RecordId,
        tuple: Vec<u8>,
    },
    ApplyDelete {
        rid: RecordId,
        tuple: Vec<u8>,
    },
    RollbackDelete {
        rid: RecordId,
        tuple: Vec<u8>,
    },
    Update {
        rid: RecordId,
        old_tuple: Vec<u8>,
        new_tuple: Vec<u8>,
    },
    /// `page_id` is the page being initialized, `prev_page_id` its
    /// predecessor in the table's page list.
    NewPage {
        prev_page_id: PageId,
        page_id: PageId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub txn_id: TransactionId,
    pub prev_lsn: Lsn,
    pub payload: LogPayload,
}

impl LogRecord {
    pub fn new(txn_id: TransactionId, prev_lsn: Lsn, payload: LogPayload) -> Self {
        Self {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            payload,
        }
    }

    pub fn record_type(&self) -> LogRecordType {
        match &self.payload {
            LogPayload::Begin => LogRecordType::Begin,
            LogPayload::Commit => LogRecordType::Commit,
            LogPayload::Abort => LogRecordType::Abort,
            LogPayload::Insert { .. } => LogRecordType::Insert,
            LogPayload::MarkDelete { .. } => LogRecordType::MarkDelete,
            LogPayload::ApplyDelete { .. } => LogRecordType::ApplyDelete,
            LogPayload::RollbackDelete { .. } => LogRecordType::RollbackDelete,
            LogPayload::Update { .. } => LogRecordType::Update,
            LogPayload::NewPage { .. } => LogRecordType::NewPage,
        }
    }

    /// Total serialized size, header included. The header's `size` field
    /// carries this value so a forward scan can hop record to record.
    pub fn size(&self) -> usize {
        let payload_size = match &self.payload {
            LogPayload::Begin | LogPayload::Commit | LogPayload::Abort => 0,
            LogPayload::Insert { tuple, .. }
            | LogPayload::MarkDelete { tuple, .. }
            | LogPayload::ApplyDelete { tuple, .. }
            | LogPayload::RollbackDelete { tuple, .. } => RidCodec::SIZE + 4 + tuple.len(),
            LogPayload::Update {
                old_tuple,
                new_tuple,
                ..
            } => RidCodec::SIZE + 4 + old_tuple.len() + 4 + new_tuple.len(),
            LogPayload::NewPage { .. } => 8,
        };
        LOG_RECORD_HEADER_SIZE + payload_size
    }
}

pub struct LogRecordCodec;

impl LogRecordCodec {
    pub fn encode(record: &LogRecord) -> Vec<u8> {
        let mut bytes = CommonCodec::encode_i32(record.size() as i32);
        bytes.extend(CommonCodec::encode_i32(record.lsn));
        bytes.extend(CommonCodec::encode_i32(record.txn_id));
        bytes.extend(CommonCodec::encode_i32(record.prev_lsn));
        bytes.extend(CommonCodec::encode_i32(record.record_type() as i32));

        match &record.payload {
            LogPayload::Begin | LogPayload::Commit | LogPayload::Abort => {}
            LogPayload::Insert { rid, tuple }
            | LogPayload::MarkDelete { rid, tuple }
            | LogPayload::ApplyDelete { rid, tuple }
            | LogPayload::RollbackDelete { rid, tuple } => {
                bytes.extend(RidCodec::encode(rid));
                bytes.extend(CommonCodec::encode_bytes(tuple));
            }
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            } => {
                bytes.extend(RidCodec::encode(rid));
                bytes.extend(CommonCodec::encode_bytes(old_tuple));
                bytes.extend(CommonCodec::encode_bytes(new_tuple));
            }
            LogPayload::NewPage {
                prev_page_id,
                page_id,
            } => {
                bytes.extend(CommonCodec::encode_i32(*prev_page_id));
                bytes.extend(CommonCodec::encode_i32(*page_id));
            }
        }
        debug_assert_eq!(bytes.len(), record.size());
        bytes
    }

    /// Decode one record from the front of `bytes`. `Ok(None)` means the
    /// buffer ends in a partial (or absent) record; a forward scan stops
    /// there cleanly.
    pub fn decode(bytes: &[u8]) -> BurrowDBResult<Option<DecodedData<LogRecord>>> {
        if bytes.len() < LOG_RECORD_HEADER_SIZE {
            return Ok(None);
        }
        let mut left_bytes = bytes;
        let (size, offset) = CommonCodec::decode_i32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        if size <= 0 || size as usize > bytes.len() || (size as usize) < LOG_RECORD_HEADER_SIZE {
            return Ok(None);
        }
        let (lsn, offset) = CommonCodec::decode_i32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (txn_id, offset) = CommonCodec::decode_i32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (prev_lsn, offset) = CommonCodec::decode_i32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (type_tag, offset) = CommonCodec::decode_i32(left_bytes)?;
        left_bytes = &left_bytes[offset..];

        let Some(record_type) = LogRecordType::from_tag(type_tag) else {
            return Ok(None);
        };

        let payload = match record_type {
            LogRecordType::Begin => LogPayload::Begin,
            LogRecordType::Commit => LogPayload::Commit,
            LogRecordType::Abort => LogPayload::Abort,
            LogRecordType::Insert
            | LogRecordType::MarkDelete
            | LogRecordType::ApplyDelete
            | LogRecordType::RollbackDelete => {
                let (rid, offset) = RidCodec::decode(left_bytes)?;
                left_bytes = &left_bytes[offset..];
                let (tuple, offset) = CommonCodec::decode_bytes(left_bytes)?;
                left_bytes = &left_bytes[offset..];
                match record_type {
                    LogRecordType::Insert => LogPayload::Insert { rid, tuple },
                    LogRecordType::MarkDelete => LogPayload::MarkDelete { rid, tuple },
                    LogRecordType::ApplyDelete => LogPayload::ApplyDelete { rid, tuple },
                    _ => LogPayload::RollbackDelete { rid, tuple },
                }
            }
            LogRecordType::Update => {
                let (rid, offset) = RidCodec::decode(left_bytes)?;
                left_bytes = &left_bytes[offset..];
                let (old_tuple, offset) = CommonCodec::decode_bytes(left_bytes)?;
                left_bytes = &left_bytes[offset..];
                let (new_tuple, offset) = CommonCodec::decode_bytes(left_bytes)?;
                left_bytes = &left_bytes[offset..];
                LogPayload::Update {
                    rid,
                    old_tuple,
                    new_tuple,
                }
            }
            LogRecordType::NewPage => {
                let (prev_page_id, offset) = CommonCodec::decode_i32(left_bytes)?;
                left_bytes = &left_bytes[offset..];
                let (page_id, offset) = CommonCodec::decode_i32(left_bytes)?;
                left_bytes = &left_bytes[offset..];
                LogPayload::NewPage {
                    prev_page_id,
                    page_id,
                }
            }
            LogRecordType::Invalid => unreachable!("filtered by from_tag"),
        };

        let consumed = bytes.len() - left_bytes.len();
        if consumed != size as usize {
            // header size disagrees with the payload we just walked
            return Ok(None);
        }
        let record = LogRecord {
            lsn,
            txn_id,
            prev_lsn,
            payload,
        };
        Ok(Some((record, consumed)))
    }
}
