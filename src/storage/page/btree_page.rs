use std::cmp::Ordering;

use crate::buffer::{PageId, INVALID_PAGE_ID};
use crate::recovery::{Lsn, INVALID_LSN};
use crate::storage::comparator::{default_comparator, KeyComparator};
use crate::storage::page::RecordId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BPlusTreePageType {
    LeafPage,
    InternalPage,
}

pub type InternalKV = (Vec<u8>, PageId);
pub type LeafKV = (Vec<u8>, RecordId);

#[derive(Debug, Clone)]
pub enum BPlusTreePage {
    Internal(BPlusTreeInternalPage),
    Leaf(BPlusTreeLeafPage),
}

impl BPlusTreePage {
    pub fn is_full(&self) -> bool {
        match self {
            Self::Internal(page) => page.is_full(),
            Self::Leaf(page) => page.is_full(),
        }
    }

    pub fn is_underflow(&self, is_root: bool) -> bool {
        if is_root {
            return false;
        }
        match self {
            Self::Internal(page) => page.header.current_size < page.min_size(),
            Self::Leaf(page) => page.header.current_size < page.min_size(),
        }
    }

    /// Safe for latch crabbing: a mutation here cannot propagate upward.
    pub fn is_safe(&self, for_insert: bool) -> bool {
        let (size, max_size, min_size) = match self {
            Self::Internal(page) => (
                page.header.current_size,
                page.header.max_size,
                page.min_size(),
            ),
            Self::Leaf(page) => (
                page.header.current_size,
                page.header.max_size,
                page.min_size(),
            ),
        };
        if for_insert {
            size < max_size
        } else {
            size > min_size
        }
    }

    pub fn can_borrow(&self) -> bool {
        match self {
            Self::Internal(page) => page.header.current_size > page.min_size(),
            Self::Leaf(page) => page.header.current_size > page.min_size(),
        }
    }

    pub fn page_id(&self) -> PageId {
        match self {
            Self::Internal(page) => page.header.page_id,
            Self::Leaf(page) => page.header.page_id,
        }
    }

    pub fn parent_page_id(&self) -> PageId {
        match self {
            Self::Internal(page) => page.header.parent_page_id,
            Self::Leaf(page) => page.header.parent_page_id,
        }
    }

    pub fn set_parent_page_id(&mut self, parent_page_id: PageId) {
        match self {
            Self::Internal(page) => page.header.parent_page_id = parent_page_id,
            Self::Leaf(page) => page.header.parent_page_id = parent_page_id,
        }
    }

    pub fn size(&self) -> u32 {
        match self {
            Self::Internal(page) => page.header.current_size,
            Self::Leaf(page) => page.header.current_size,
        }
    }
}

/**
 * Internal page layout (keys in increasing order, array[0] key unused):
 *
 *  | HEADER(24) | KEY(1)+PAGE_ID(1) | KEY(2)+PAGE_ID(2) | ... |
 *
 * Header: PageType(4) | LSN(4) | CurrentSize(4) | MaxSize(4) |
 *         ParentPageId(4) | PageId(4)
 */
#[derive(Debug, Clone)]
pub struct BPlusTreeInternalPage {
    pub header: BPlusTreeInternalPageHeader,
    pub array: Vec<InternalKV>,
    pub comparator: KeyComparator,
}

#[derive(Debug, Clone)]
pub struct BPlusTreeInternalPageHeader {
    pub page_type: BPlusTreePageType,
    pub lsn: Lsn,
    pub current_size: u32,
    pub max_size: u32,
    pub parent_page_id: PageId,
    pub page_id: PageId,
}

impl BPlusTreeInternalPage {
    pub fn new(page_id: PageId, parent_page_id: PageId, max_size: u32) -> Self {
        // An internal node holds one more child than separators; an even max
        // keeps both split halves above the minimum.
        let max_size = (max_size / 2) * 2;
        assert!(max_size >= 2, "internal max size must be at least 2");
        Self {
            header: BPlusTreeInternalPageHeader {
                page_type: BPlusTreePageType::InternalPage,
                lsn: INVALID_LSN,
                current_size: 0,
                max_size,
                parent_page_id,
                page_id,
            },
            array: Vec::with_capacity(max_size as usize + 1),
            comparator: default_comparator,
        }
    }

    pub fn min_size(&self) -> u32 {
        self.header.max_size.div_ceil(2)
    }

    pub fn is_full(&self) -> bool {
        self.header.current_size > self.header.max_size
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        &self.array[index].0
    }

    pub fn set_key_at(&mut self, index: usize, key: Vec<u8>) {
        self.array[index].0 = key;
    }

    pub fn value_at(&self, index: usize) -> PageId {
        self.array[index].1
    }

    pub fn set_value_at(&mut self, index: usize, page_id: PageId) {
        self.array[index].1 = page_id;
    }

    /// Index of the child pointer equal to `page_id`. Children are not
    /// sorted by value, so this is a linear scan.
    pub fn value_index(&self, page_id: PageId) -> Option<usize> {
        self.array.iter().position(|kv| kv.1 == page_id)
    }

    pub fn values(&self) -> Vec<PageId> {
        self.array.iter().map(|kv| kv.1).collect()
    }

    /// Child covering `key`: follow the pointer left of the smallest
    /// separator strictly greater than `key`.
    pub fn lookup(&self, key: &[u8]) -> PageId {
        debug_assert!(self.header.current_size >= 1);
        let mut start = 1usize;
        let mut end = self.header.current_size as usize;
        while start < end {
            let mid = (start + end) / 2;
            if (self.comparator)(key, &self.array[mid].0) == Ordering::Less {
                end = mid;
            } else {
                start = mid + 1;
            }
        }
        self.array[start - 1].1
    }

    /// Seed a fresh root after the old root split: sentinel slot points at
    /// the old root, `key` separates it from the new right page.
    pub fn populate_new_root(&mut self, old_page_id: PageId, key: Vec<u8>, new_page_id: PageId) {
        debug_assert_eq!(self.header.current_size, 0);
        self.array.push((Vec::new(), old_page_id));
        self.array.push((key, new_page_id));
        self.header.current_size = 2;
    }

    /// Insert `key -> new_page_id` immediately after the slot whose child is
    /// `old_page_id`.
    pub fn insert_node_after(&mut self, old_page_id: PageId, key: Vec<u8>, new_page_id: PageId) {
        let index = self
            .value_index(old_page_id)
            .expect("split child must be present in parent");
        self.array.insert(index + 1, (key, new_page_id));
        self.header.current_size += 1;
    }

    pub fn remove(&mut self, index: usize) {
        self.array.remove(index);
        self.header.current_size -= 1;
    }

    /// Detach entries `[at..)` for a split; the receiver's first key becomes
    /// its sentinel after the separator bubbles up.
    pub fn split_off(&mut self, at: usize) -> Vec<InternalKV> {
        let detached = self.array.split_off(at);
        self.header.current_size -= detached.len() as u32;
        detached
    }

    pub fn extend(&mut self, kvs: Vec<InternalKV>) {
        self.header.current_size += kvs.len() as u32;
        self.array.extend(kvs);
    }

    pub fn pop_first(&mut self) -> InternalKV {
        self.header.current_size -= 1;
        self.array.remove(0)
    }

    pub fn pop_last(&mut self) -> InternalKV {
        self.header.current_size -= 1;
        self.array.pop().expect("pop_last on empty internal page")
    }

    pub fn push_front(&mut self, kv: InternalKV) {
        self.array.insert(0, kv);
        self.header.current_size += 1;
    }

    pub fn push_back(&mut self, kv: InternalKV) {
        self.array.push(kv);
        self.header.current_size += 1;
    }
}

/**
 * Leaf page layout (keys in increasing order):
 *
 *  | HEADER(32) | KEY(1)+RID(1) | KEY(2)+RID(2) | ... |
 *
 * Header: PageType(4) | LSN(4) | CurrentSize(4) | MaxSize(4) |
 *         ParentPageId(4) | PageId(4) | NextPageId(4) | PrevPageId(4)
 */
#[derive(Debug, Clone)]
pub struct BPlusTreeLeafPage {
    pub header: BPlusTreeLeafPageHeader,
    pub array: Vec<LeafKV>,
    pub comparator: KeyComparator,
}

#[derive(Debug, Clone)]
pub struct BPlusTreeLeafPageHeader {
    pub page_type: BPlusTreePageType,
    pub lsn: Lsn,
    pub current_size: u32,
    pub max_size: u32,
    pub parent_page_id: PageId,
    pub page_id: PageId,
    pub next_page_id: PageId,
    pub prev_page_id: PageId,
}

impl BPlusTreeLeafPage {
    pub fn new(page_id: PageId, parent_page_id: PageId, max_size: u32) -> Self {
        assert!(max_size >= 2, "leaf max size must be at least 2");
        Self {
            header: BPlusTreeLeafPageHeader {
                page_type: BPlusTreePageType::LeafPage,
                lsn: INVALID_LSN,
                current_size: 0,
                max_size,
                parent_page_id,
                page_id,
                next_page_id: INVALID_PAGE_ID,
                prev_page_id: INVALID_PAGE_ID,
            },
            array: Vec::with_capacity(max_size as usize + 1),
            comparator: default_comparator,
        }
    }

    pub fn min_size(&self) -> u32 {
        self.header.max_size.div_ceil(2)
    }

    pub fn is_full(&self) -> bool {
        self.header.current_size > self.header.max_size
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        &self.array[index].0
    }

    pub fn kv_at(&self, index: usize) -> &LeafKV {
        &self.array[index]
    }

    /// Sorted insert. Returns false (no mutation) for a duplicate key.
    pub fn insert(&mut self, key: Vec<u8>, rid: RecordId) -> bool {
        match self
            .array
            .binary_search_by(|(k, _)| (self.comparator)(k, &key))
        {
            Ok(_) => false,
            Err(pos) => {
                self.array.insert(pos, (key, rid));
                self.header.current_size += 1;
                true
            }
        }
    }

    /// Remove `key` if present; absence is a no-op.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        match self
            .array
            .binary_search_by(|(k, _)| (self.comparator)(k, key))
        {
            Ok(pos) => {
                self.array.remove(pos);
                self.header.current_size -= 1;
                true
            }
            Err(_) => false,
        }
    }

    pub fn lookup(&self, key: &[u8]) -> Option<RecordId> {
        self.array
            .binary_search_by(|(k, _)| (self.comparator)(k, key))
            .ok()
            .map(|pos| self.array[pos].1)
    }

    /// Index of the first key `>= key` (may equal `current_size`).
    pub fn lower_bound(&self, key: &[u8]) -> usize {
        match self
            .array
            .binary_search_by(|(k, _)| (self.comparator)(k, key))
        {
            Ok(pos) => pos,
            Err(pos) => pos,
        }
    }

    pub fn split_off(&mut self, at: usize) -> Vec<LeafKV> {
        let detached = self.array.split_off(at);
        self.header.current_size -= detached.len() as u32;
        detached
    }

    pub fn extend(&mut self, kvs: Vec<LeafKV>) {
        self.header.current_size += kvs.len() as u32;
        self.array.extend(kvs);
    }

    pub fn pop_first(&mut self) -> LeafKV {
        self.header.current_size -= 1;
        self.array.remove(0)
    }

    pub fn pop_last(&mut self) -> LeafKV {
        self.header.current_size -= 1;
        self.array.pop().expect("pop_last on empty leaf page")
    }

    pub fn push_front(&mut self, kv: LeafKV) {
        self.array.insert(0, kv);
        self.header.current_size += 1;
    }

    pub fn push_back(&mut self, kv: LeafKV) {
        self.array.push(kv);
        self.header.current_size += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::{BPlusTreeInternalPage, BPlusTreeLeafPage};
    use crate::storage::page::RecordId;

    fn key(i: i32) -> Vec<u8> {
        i.to_be_bytes().to_vec()
    }

    #[test]
    pub fn test_leaf_page_insert_sorted_unique() {
        let mut leaf = BPlusTreeLeafPage::new(2, 1, 4);
        assert!(leaf.insert(key(2), RecordId::new(2, 2)));
        assert!(leaf.insert(key(1), RecordId::new(1, 1)));
        assert!(leaf.insert(key(3), RecordId::new(3, 3)));
        // duplicate key rejected, value unchanged
        assert!(!leaf.insert(key(2), RecordId::new(9, 9)));

        assert_eq!(leaf.header.current_size, 3);
        assert_eq!(leaf.key_at(0), key(1).as_slice());
        assert_eq!(leaf.key_at(1), key(2).as_slice());
        assert_eq!(leaf.key_at(2), key(3).as_slice());
        assert_eq!(leaf.lookup(&key(2)), Some(RecordId::new(2, 2)));
        assert_eq!(leaf.lookup(&key(5)), None);
    }

    #[test]
    pub fn test_leaf_page_delete() {
        let mut leaf = BPlusTreeLeafPage::new(2, 1, 4);
        for i in 1..=4 {
            leaf.insert(key(i), RecordId::new(i, i as u32));
        }
        assert!(leaf.delete(&key(2)));
        assert!(!leaf.delete(&key(2)));
        assert_eq!(leaf.header.current_size, 3);
        assert_eq!(leaf.lookup(&key(2)), None);
        assert_eq!(leaf.lookup(&key(3)), Some(RecordId::new(3, 3)));
    }

    #[test]
    pub fn test_leaf_page_lower_bound() {
        let mut leaf = BPlusTreeLeafPage::new(2, 1, 6);
        for i in [1, 3, 5] {
            leaf.insert(key(i), RecordId::new(i, i as u32));
        }
        assert_eq!(leaf.lower_bound(&key(0)), 0);
        assert_eq!(leaf.lower_bound(&key(3)), 1);
        assert_eq!(leaf.lower_bound(&key(4)), 2);
        assert_eq!(leaf.lower_bound(&key(6)), 3);
    }

    #[test]
    pub fn test_internal_page_lookup() {
        let mut internal = BPlusTreeInternalPage::new(5, -1, 4);
        internal.populate_new_root(10, key(5), 11);
        internal.insert_node_after(11, key(9), 12);
        // children: (<5)->10, [5,9)->11, [9,..)->12
        assert_eq!(internal.lookup(&key(1)), 10);
        assert_eq!(internal.lookup(&key(5)), 11);
        assert_eq!(internal.lookup(&key(7)), 11);
        assert_eq!(internal.lookup(&key(9)), 12);
        assert_eq!(internal.lookup(&key(100)), 12);
    }

    #[test]
    pub fn test_internal_page_value_index_and_remove() {
        let mut internal = BPlusTreeInternalPage::new(5, -1, 4);
        internal.populate_new_root(10, key(5), 11);
        internal.insert_node_after(11, key(9), 12);
        assert_eq!(internal.value_index(11), Some(1));
        assert_eq!(internal.value_index(99), None);
        internal.remove(1);
        assert_eq!(internal.header.current_size, 2);
        assert_eq!(internal.values(), vec![10, 12]);
    }

    #[test]
    pub fn test_internal_max_size_rounded_even() {
        let internal = BPlusTreeInternalPage::new(1, -1, 5);
        assert_eq!(internal.header.max_size, 4);
        assert_eq!(internal.min_size(), 2);
    }
}
