use crate::buffer::PAGE_SIZE;
use crate::error::{BurrowDBError, BurrowDBResult};
use crate::recovery::Lsn;
use crate::storage::codec::{CommonCodec, DecodedData};
use crate::storage::page::{TablePage, TablePageHeader, TupleInfo};

pub struct TablePageCodec;

impl TablePageCodec {
    pub fn encode(page: &TablePage) -> Vec<u8> {
        let mut bytes = CommonCodec::encode_u32(page.header.lsn as u32);
        bytes.extend(CommonCodec::encode_i32(page.header.prev_page_id));
        bytes.extend(CommonCodec::encode_i32(page.header.next_page_id));
        bytes.extend(CommonCodec::encode_u32(page.slots.len() as u32));
        for slot in page.slots.iter() {
            bytes.extend(CommonCodec::encode_u8(slot.is_deleted as u8));
            bytes.extend(CommonCodec::encode_bytes(&slot.tuple));
        }
        assert!(
            bytes.len() <= PAGE_SIZE,
            "table page overflows {} bytes",
            PAGE_SIZE
        );
        bytes.resize(PAGE_SIZE, 0);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> BurrowDBResult<DecodedData<TablePage>> {
        if bytes.len() != PAGE_SIZE {
            return Err(BurrowDBError::Storage(format!(
                "table page size is {} instead of {}",
                bytes.len(),
                PAGE_SIZE
            )));
        }
        let mut left_bytes = bytes;
        let (lsn, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (prev_page_id, offset) = CommonCodec::decode_i32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (next_page_id, offset) = CommonCodec::decode_i32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (tuple_count, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];

        let mut slots = Vec::with_capacity(tuple_count as usize);
        for _ in 0..tuple_count {
            let (is_deleted, offset) = CommonCodec::decode_u8(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            let (tuple, offset) = CommonCodec::decode_bytes(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            slots.push(TupleInfo {
                is_deleted: is_deleted != 0,
                tuple,
            });
        }

        Ok((
            TablePage {
                header: TablePageHeader {
                    lsn: lsn as Lsn,
                    prev_page_id,
                    next_page_id,
                },
                slots,
            },
            bytes.len() - left_bytes.len(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::TablePageCodec;
    use crate::storage::page::TablePage;

    #[test]
    fn test_table_page_codec_roundtrip() {
        let mut page = TablePage::new(7);
        page.header.lsn = 12;
        page.header.next_page_id = 9;
        page.insert_tuple(b"first");
        page.insert_tuple(b"second");
        page.mark_delete(0);

        let bytes = TablePageCodec::encode(&page);
        let (decoded, _) = TablePageCodec::decode(&bytes).unwrap();
        assert_eq!(decoded, page);
    }
}
