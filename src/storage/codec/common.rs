use crate::error::{BurrowDBError, BurrowDBResult};
use crate::storage::codec::DecodedData;
use crate::storage::page::RecordId;

/// Little-endian scalar and byte-string codecs shared by the page and log
/// record codecs.
pub struct CommonCodec;

impl CommonCodec {
    pub fn encode_u8(data: u8) -> Vec<u8> {
        vec![data]
    }

    pub fn decode_u8(bytes: &[u8]) -> BurrowDBResult<DecodedData<u8>> {
        if bytes.is_empty() {
            return Err(BurrowDBError::Internal(
                "bytes too short for u8".to_string(),
            ));
        }
        Ok((bytes[0], 1))
    }

    pub fn encode_u32(data: u32) -> Vec<u8> {
        data.to_le_bytes().to_vec()
    }

    pub fn decode_u32(bytes: &[u8]) -> BurrowDBResult<DecodedData<u32>> {
        if bytes.len() < 4 {
            return Err(BurrowDBError::Internal(format!(
                "bytes length {} is less than 4",
                bytes.len()
            )));
        }
        let data = [bytes[0], bytes[1], bytes[2], bytes[3]];
        Ok((u32::from_le_bytes(data), 4))
    }

    pub fn encode_i32(data: i32) -> Vec<u8> {
        data.to_le_bytes().to_vec()
    }

    pub fn decode_i32(bytes: &[u8]) -> BurrowDBResult<DecodedData<i32>> {
        if bytes.len() < 4 {
            return Err(BurrowDBError::Internal(format!(
                "bytes length {} is less than 4",
                bytes.len()
            )));
        }
        let data = [bytes[0], bytes[1], bytes[2], bytes[3]];
        Ok((i32::from_le_bytes(data), 4))
    }

    /// Length-prefixed byte string.
    pub fn encode_bytes(data: &[u8]) -> Vec<u8> {
        let mut bytes = Self::encode_u32(data.len() as u32);
        bytes.extend_from_slice(data);
        bytes
    }

    pub fn decode_bytes(bytes: &[u8]) -> BurrowDBResult<DecodedData<Vec<u8>>> {
        let (length, offset) = Self::decode_u32(bytes)?;
        let length = length as usize;
        if bytes.len() < offset + length {
            return Err(BurrowDBError::Internal(format!(
                "bytes length {} is less than expected {}",
                bytes.len(),
                offset + length
            )));
        }
        Ok((bytes[offset..offset + length].to_vec(), offset + length))
    }

    pub fn encode_string(data: &str) -> Vec<u8> {
        Self::encode_bytes(data.as_bytes())
    }

    pub fn decode_string(bytes: &[u8]) -> BurrowDBResult<DecodedData<String>> {
        let (raw, offset) = Self::decode_bytes(bytes)?;
        let s = String::from_utf8(raw)
            .map_err(|e| BurrowDBError::Internal(format!("invalid utf8 string: {}", e)))?;
        Ok((s, offset))
    }
}

pub struct RidCodec;

impl RidCodec {
    pub const SIZE: usize = 8;

    pub fn encode(rid: &RecordId) -> Vec<u8> {
        let mut bytes = CommonCodec::encode_i32(rid.page_id);
        bytes.extend(CommonCodec::encode_u32(rid.slot_num));
        bytes
    }

    pub fn decode(bytes: &[u8]) -> BurrowDBResult<DecodedData<RecordId>> {
        let mut left_bytes = bytes;
        let (page_id, offset) = CommonCodec::decode_i32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (slot_num, offset2) = CommonCodec::decode_u32(left_bytes)?;
        Ok((RecordId::new(page_id, slot_num), offset + offset2))
    }
}
