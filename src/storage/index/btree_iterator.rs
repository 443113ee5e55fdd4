use std::sync::Arc;

use crate::buffer::INVALID_PAGE_ID;
use crate::error::BurrowDBResult;
use crate::storage::index::BPlusTreeIndex;
use crate::storage::page::{BPlusTreeLeafPage, RecordId};

/// Single-pass forward scan over the leaf list. The iterator works on a
/// decoded snapshot of one leaf at a time and holds no latches between
/// advances; `next_page_id` chains the walk, `INVALID_PAGE_ID` ends it.
#[derive(Debug)]
pub struct TreeIndexIterator {
    index: Arc<BPlusTreeIndex>,
    leaf: BPlusTreeLeafPage,
    cursor: usize,
    exhausted: bool,
}

impl TreeIndexIterator {
    /// Position at the smallest key in the tree.
    pub fn begin(index: Arc<BPlusTreeIndex>) -> BurrowDBResult<Self> {
        match index.find_leaf_read(&[], true)? {
            Some(leaf) => Ok(Self {
                index,
                leaf,
                cursor: 0,
                exhausted: false,
            }),
            None => Ok(Self::empty(index)),
        }
    }

    /// Position at the first key `>= key`.
    pub fn begin_at(index: Arc<BPlusTreeIndex>, key: &[u8]) -> BurrowDBResult<Self> {
        match index.find_leaf_read(key, false)? {
            Some(leaf) => {
                let cursor = leaf.lower_bound(key);
                Ok(Self {
                    index,
                    leaf,
                    cursor,
                    exhausted: false,
                })
            }
            None => Ok(Self::empty(index)),
        }
    }

    fn empty(index: Arc<BPlusTreeIndex>) -> Self {
        Self {
            index: index.clone(),
            leaf: {
                let mut leaf = BPlusTreeLeafPage::new(INVALID_PAGE_ID, INVALID_PAGE_ID, 2);
                leaf.comparator = index.comparator;
                leaf
            },
            cursor: 0,
            exhausted: true,
        }
    }

    pub fn next(&mut self) -> BurrowDBResult<Option<(Vec<u8>, RecordId)>> {
        if self.exhausted {
            return Ok(None);
        }
        while self.cursor >= self.leaf.header.current_size as usize {
            let next_page_id = self.leaf.header.next_page_id;
            if next_page_id == INVALID_PAGE_ID {
                self.exhausted = true;
                return Ok(None);
            }
            let guard = self.index.buffer_pool.fetch_page_read(next_page_id)?;
            self.leaf = self.index.decode_leaf(guard.data())?;
            self.cursor = 0;
        }
        let (key, rid) = self.leaf.kv_at(self.cursor).clone();
        self.cursor += 1;
        Ok(Some((key, rid)))
    }
}

#[cfg(test)]
mod tests {
    use super::TreeIndexIterator;
    use crate::buffer::BufferManager;
    use crate::storage::comparator::default_comparator;
    use crate::storage::disk_manager::DiskManager;
    use crate::storage::index::BPlusTreeIndex;
    use crate::storage::page::RecordId;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn key(i: i32) -> Vec<u8> {
        i.to_be_bytes().to_vec()
    }

    fn build_index() -> (TempDir, Arc<BPlusTreeIndex>) {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager =
            Arc::new(DiskManager::try_new(temp_dir.path().join("test.db")).unwrap());
        let buffer_pool = Arc::new(BufferManager::new(64, disk_manager));
        let index = Arc::new(
            BPlusTreeIndex::new("iter_index", buffer_pool, default_comparator, 4, 4).unwrap(),
        );
        for i in 1..=20 {
            index.insert(&key(i), RecordId::new(i, i as u32)).unwrap();
        }
        (temp_dir, index)
    }

    #[test]
    fn test_iterator_full_scan_in_order() {
        let (_tmp, index) = build_index();
        let mut iter = TreeIndexIterator::begin(index).unwrap();
        let mut expected = 1;
        while let Some((k, rid)) = iter.next().unwrap() {
            assert_eq!(k, key(expected));
            assert_eq!(rid, RecordId::new(expected, expected as u32));
            expected += 1;
        }
        assert_eq!(expected, 21);
        // the iterator stays exhausted
        assert_eq!(iter.next().unwrap(), None);
    }

    #[test]
    fn test_iterator_begin_at_key() {
        let (_tmp, index) = build_index();
        let mut iter = TreeIndexIterator::begin_at(index.clone(), &key(15)).unwrap();
        let mut expected = 15;
        while let Some((k, _)) = iter.next().unwrap() {
            assert_eq!(k, key(expected));
            expected += 1;
        }
        assert_eq!(expected, 21);

        // a start key past the end yields nothing
        let mut iter = TreeIndexIterator::begin_at(index, &key(100)).unwrap();
        assert_eq!(iter.next().unwrap(), None);
    }

    #[test]
    fn test_iterator_on_empty_tree() {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager =
            Arc::new(DiskManager::try_new(temp_dir.path().join("test.db")).unwrap());
        let buffer_pool = Arc::new(BufferManager::new(16, disk_manager));
        let index = Arc::new(
            BPlusTreeIndex::new("empty_index", buffer_pool, default_comparator, 4, 4).unwrap(),
        );
        let mut iter = TreeIndexIterator::begin(index).unwrap();
        assert_eq!(iter.next().unwrap(), None);
    }
}
