use crate::buffer::PAGE_SIZE;
use crate::error::{BurrowDBError, BurrowDBResult};
use crate::recovery::Lsn;
use crate::storage::codec::{CommonCodec, DecodedData, RidCodec};
use crate::storage::page::{
    BPlusTreeInternalPage, BPlusTreeInternalPageHeader, BPlusTreeLeafPage,
    BPlusTreeLeafPageHeader, BPlusTreePage, BPlusTreePageType, HeaderPage,
};

const LEAF_PAGE_TYPE_TAG: u32 = 1;
const INTERNAL_PAGE_TYPE_TAG: u32 = 2;

struct BPlusTreePageTypeCodec;

impl BPlusTreePageTypeCodec {
    fn encode(page_type: BPlusTreePageType) -> Vec<u8> {
        match page_type {
            BPlusTreePageType::LeafPage => CommonCodec::encode_u32(LEAF_PAGE_TYPE_TAG),
            BPlusTreePageType::InternalPage => CommonCodec::encode_u32(INTERNAL_PAGE_TYPE_TAG),
        }
    }

    fn decode(bytes: &[u8]) -> BurrowDBResult<DecodedData<BPlusTreePageType>> {
        let (tag, offset) = CommonCodec::decode_u32(bytes)?;
        match tag {
            LEAF_PAGE_TYPE_TAG => Ok((BPlusTreePageType::LeafPage, offset)),
            INTERNAL_PAGE_TYPE_TAG => Ok((BPlusTreePageType::InternalPage, offset)),
            other => Err(BurrowDBError::Storage(format!(
                "invalid index page type tag {}",
                other
            ))),
        }
    }
}

pub struct BPlusTreePageCodec;

impl BPlusTreePageCodec {
    pub fn encode(page: &BPlusTreePage) -> Vec<u8> {
        match page {
            BPlusTreePage::Leaf(page) => BPlusTreeLeafPageCodec::encode(page),
            BPlusTreePage::Internal(page) => BPlusTreeInternalPageCodec::encode(page),
        }
    }

    pub fn decode(bytes: &[u8]) -> BurrowDBResult<DecodedData<BPlusTreePage>> {
        if bytes.len() != PAGE_SIZE {
            return Err(BurrowDBError::Storage(format!(
                "index page size is {} instead of {}",
                bytes.len(),
                PAGE_SIZE
            )));
        }
        // peek the tag only, without consuming
        let (page_type, _) = BPlusTreePageTypeCodec::decode(bytes)?;
        match page_type {
            BPlusTreePageType::LeafPage => {
                let (page, offset) = BPlusTreeLeafPageCodec::decode(bytes)?;
                Ok((BPlusTreePage::Leaf(page), offset))
            }
            BPlusTreePageType::InternalPage => {
                let (page, offset) = BPlusTreeInternalPageCodec::decode(bytes)?;
                Ok((BPlusTreePage::Internal(page), offset))
            }
        }
    }
}

pub struct BPlusTreeLeafPageCodec;

impl BPlusTreeLeafPageCodec {
    pub fn encode(page: &BPlusTreeLeafPage) -> Vec<u8> {
        let mut bytes = Self::encode_header(&page.header);
        for (key, rid) in page.array.iter() {
            bytes.extend(CommonCodec::encode_bytes(key));
            bytes.extend(RidCodec::encode(rid));
        }
        assert!(
            bytes.len() <= PAGE_SIZE,
            "leaf page overflows {} bytes",
            PAGE_SIZE
        );
        bytes.resize(PAGE_SIZE, 0);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> BurrowDBResult<DecodedData<BPlusTreeLeafPage>> {
        if bytes.len() != PAGE_SIZE {
            return Err(BurrowDBError::Storage(format!(
                "index page size is {} instead of {}",
                bytes.len(),
                PAGE_SIZE
            )));
        }
        let (header, header_len) = Self::decode_header(bytes)?;
        let mut left_bytes = &bytes[header_len..];

        let mut array = Vec::with_capacity(header.current_size as usize);
        for _ in 0..header.current_size {
            let (key, offset) = CommonCodec::decode_bytes(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            let (rid, offset) = RidCodec::decode(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            array.push((key, rid));
        }

        let mut page = BPlusTreeLeafPage::new(header.page_id, header.parent_page_id, 2);
        page.header = header;
        page.array = array;
        Ok((page, PAGE_SIZE))
    }

    fn encode_header(header: &BPlusTreeLeafPageHeader) -> Vec<u8> {
        let mut bytes = BPlusTreePageTypeCodec::encode(header.page_type);
        bytes.extend(CommonCodec::encode_u32(header.lsn as u32));
        bytes.extend(CommonCodec::encode_u32(header.current_size));
        bytes.extend(CommonCodec::encode_u32(header.max_size));
        bytes.extend(CommonCodec::encode_i32(header.parent_page_id));
        bytes.extend(CommonCodec::encode_i32(header.page_id));
        bytes.extend(CommonCodec::encode_i32(header.next_page_id));
        bytes.extend(CommonCodec::encode_i32(header.prev_page_id));
        bytes
    }

    fn decode_header(bytes: &[u8]) -> BurrowDBResult<DecodedData<BPlusTreeLeafPageHeader>> {
        let mut left_bytes = bytes;
        let (page_type, offset) = BPlusTreePageTypeCodec::decode(left_bytes)?;
        if page_type != BPlusTreePageType::LeafPage {
            return Err(BurrowDBError::Storage(
                "index page type must be leaf page".to_string(),
            ));
        }
        left_bytes = &left_bytes[offset..];
        let (lsn, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (current_size, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (max_size, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (parent_page_id, offset) = CommonCodec::decode_i32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (page_id, offset) = CommonCodec::decode_i32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (next_page_id, offset) = CommonCodec::decode_i32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (prev_page_id, offset) = CommonCodec::decode_i32(left_bytes)?;
        left_bytes = &left_bytes[offset..];

        Ok((
            BPlusTreeLeafPageHeader {
                page_type,
                lsn: lsn as Lsn,
                current_size,
                max_size,
                parent_page_id,
                page_id,
                next_page_id,
                prev_page_id,
            },
            bytes.len() - left_bytes.len(),
        ))
    }
}

pub struct BPlusTreeInternalPageCodec;

impl BPlusTreeInternalPageCodec {
    pub fn encode(page: &BPlusTreeInternalPage) -> Vec<u8> {
        let mut bytes = Self::encode_header(&page.header);
        for (key, child) in page.array.iter() {
            bytes.extend(CommonCodec::encode_bytes(key));
            bytes.extend(CommonCodec::encode_i32(*child));
        }
        assert!(
            bytes.len() <= PAGE_SIZE,
            "internal page overflows {} bytes",
            PAGE_SIZE
        );
        bytes.resize(PAGE_SIZE, 0);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> BurrowDBResult<DecodedData<BPlusTreeInternalPage>> {
        if bytes.len() != PAGE_SIZE {
            return Err(BurrowDBError::Storage(format!(
                "index page size is {} instead of {}",
                bytes.len(),
                PAGE_SIZE
            )));
        }
        let (header, header_len) = Self::decode_header(bytes)?;
        let mut left_bytes = &bytes[header_len..];

        let mut array = Vec::with_capacity(header.current_size as usize);
        for _ in 0..header.current_size {
            let (key, offset) = CommonCodec::decode_bytes(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            let (child, offset) = CommonCodec::decode_i32(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            array.push((key, child));
        }

        let mut page = BPlusTreeInternalPage::new(header.page_id, header.parent_page_id, 2);
        page.header = header;
        page.array = array;
        Ok((page, PAGE_SIZE))
    }

    fn encode_header(header: &BPlusTreeInternalPageHeader) -> Vec<u8> {
        let mut bytes = BPlusTreePageTypeCodec::encode(header.page_type);
        bytes.extend(CommonCodec::encode_u32(header.lsn as u32));
        bytes.extend(CommonCodec::encode_u32(header.current_size));
        bytes.extend(CommonCodec::encode_u32(header.max_size));
        bytes.extend(CommonCodec::encode_i32(header.parent_page_id));
        bytes.extend(CommonCodec::encode_i32(header.page_id));
        bytes
    }

    fn decode_header(bytes: &[u8]) -> BurrowDBResult<DecodedData<BPlusTreeInternalPageHeader>> {
        let mut left_bytes = bytes;
        let (page_type, offset) = BPlusTreePageTypeCodec::decode(left_bytes)?;
        if page_type != BPlusTreePageType::InternalPage {
            return Err(BurrowDBError::Storage(
                "index page type must be internal page".to_string(),
            ));
        }
        left_bytes = &left_bytes[offset..];
        let (lsn, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (current_size, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (max_size, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (parent_page_id, offset) = CommonCodec::decode_i32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (page_id, offset) = CommonCodec::decode_i32(left_bytes)?;
        left_bytes = &left_bytes[offset..];

        Ok((
            BPlusTreeInternalPageHeader {
                page_type,
                lsn: lsn as Lsn,
                current_size,
                max_size,
                parent_page_id,
                page_id,
            },
            bytes.len() - left_bytes.len(),
        ))
    }
}

pub struct HeaderPageCodec;

impl HeaderPageCodec {
    pub fn encode(page: &HeaderPage) -> Vec<u8> {
        let mut bytes = CommonCodec::encode_u32(page.records.len() as u32);
        for (name, root_page_id) in page.records.iter() {
            bytes.extend(CommonCodec::encode_string(name));
            bytes.extend(CommonCodec::encode_i32(*root_page_id));
        }
        assert!(
            bytes.len() <= PAGE_SIZE,
            "header page overflows {} bytes",
            PAGE_SIZE
        );
        bytes.resize(PAGE_SIZE, 0);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> BurrowDBResult<DecodedData<HeaderPage>> {
        if bytes.len() != PAGE_SIZE {
            return Err(BurrowDBError::Storage(format!(
                "header page size is {} instead of {}",
                bytes.len(),
                PAGE_SIZE
            )));
        }
        let mut left_bytes = bytes;
        let (count, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (name, offset) = CommonCodec::decode_string(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            let (root_page_id, offset) = CommonCodec::decode_i32(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            records.push((name, root_page_id));
        }
        Ok((HeaderPage { records }, bytes.len() - left_bytes.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        BPlusTreeInternalPageCodec, BPlusTreeLeafPageCodec, BPlusTreePageCodec, HeaderPageCodec,
    };
    use crate::storage::page::{
        BPlusTreeInternalPage, BPlusTreeLeafPage, BPlusTreePage, HeaderPage, RecordId,
    };

    #[test]
    fn test_leaf_page_codec_roundtrip() {
        let mut leaf = BPlusTreeLeafPage::new(5, 2, 10);
        leaf.header.next_page_id = 6;
        leaf.header.prev_page_id = 4;
        leaf.header.lsn = 33;
        leaf.insert(b"apple".to_vec(), RecordId::new(1, 1));
        leaf.insert(b"banana".to_vec(), RecordId::new(2, 2));

        let bytes = BPlusTreeLeafPageCodec::encode(&leaf);
        let (decoded, _) = BPlusTreeLeafPageCodec::decode(&bytes).unwrap();
        assert_eq!(decoded.header.page_id, 5);
        assert_eq!(decoded.header.parent_page_id, 2);
        assert_eq!(decoded.header.next_page_id, 6);
        assert_eq!(decoded.header.prev_page_id, 4);
        assert_eq!(decoded.header.lsn, 33);
        assert_eq!(decoded.header.current_size, 2);
        assert_eq!(decoded.header.max_size, 10);
        assert_eq!(decoded.array, leaf.array);
    }

    #[test]
    fn test_internal_page_codec_roundtrip() {
        let mut internal = BPlusTreeInternalPage::new(9, -1, 10);
        internal.populate_new_root(3, b"m".to_vec(), 4);
        let bytes = BPlusTreeInternalPageCodec::encode(&internal);
        let (decoded, _) = BPlusTreeInternalPageCodec::decode(&bytes).unwrap();
        assert_eq!(decoded.header.page_id, 9);
        assert_eq!(decoded.header.parent_page_id, -1);
        assert_eq!(decoded.header.current_size, 2);
        assert_eq!(decoded.array, internal.array);

        // tagged decode dispatches on the page type
        match BPlusTreePageCodec::decode(&bytes).unwrap().0 {
            BPlusTreePage::Internal(page) => assert_eq!(page.values(), vec![3, 4]),
            BPlusTreePage::Leaf(_) => panic!("decoded wrong page type"),
        }
    }

    #[test]
    fn test_header_page_codec_roundtrip() {
        let mut header = HeaderPage::new();
        header.insert_record("idx_users", 12);
        header.insert_record("idx_orders", 48);
        let bytes = HeaderPageCodec::encode(&header);
        let (decoded, _) = HeaderPageCodec::decode(&bytes).unwrap();
        assert_eq!(decoded.records, header.records);
    }
}
