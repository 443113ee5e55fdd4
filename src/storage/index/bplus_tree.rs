use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::buffer::{
    AtomicPageId, BufferManager, PageId, WritePageGuard, HEADER_PAGE_ID, INVALID_PAGE_ID,
};
use crate::error::{BurrowDBError, BurrowDBResult};
use crate::storage::codec::{BPlusTreePageCodec, HeaderPageCodec};
use crate::storage::comparator::KeyComparator;
use crate::storage::page::{
    BPlusTreeInternalPage, BPlusTreeLeafPage, BPlusTreePage, RecordId,
};

/// Concurrent, unique-key B+Tree over the buffer pool.
///
/// Descents crab: writers take write latches from the root down and release
/// every ancestor as soon as the child cannot push a structure change back
/// up; readers latch the child before letting go of the parent. The latched
/// path is the stack of page guards a descent accumulates. Root pointer
/// changes are additionally serialized by `root_latch`, and the root record
/// in the header page is rewritten whenever the root moves.
#[derive(Debug)]
pub struct BPlusTreeIndex {
    pub index_name: String,
    pub buffer_pool: Arc<BufferManager>,
    pub comparator: KeyComparator,
    pub internal_max_size: u32,
    pub leaf_max_size: u32,
    pub root_page_id: AtomicPageId,
    root_latch: Mutex<()>,
}

impl BPlusTreeIndex {
    pub fn new(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferManager>,
        comparator: KeyComparator,
        internal_max_size: u32,
        leaf_max_size: u32,
    ) -> BurrowDBResult<Self> {
        let index_name = index_name.into();
        let root_page_id = {
            let guard = buffer_pool.fetch_page_read(HEADER_PAGE_ID)?;
            let (header, _) = HeaderPageCodec::decode(guard.data())?;
            header
                .get_root_page_id(&index_name)
                .unwrap_or(INVALID_PAGE_ID)
        };
        Ok(Self {
            index_name,
            buffer_pool,
            comparator,
            internal_max_size,
            leaf_max_size,
            root_page_id: AtomicPageId::new(root_page_id),
            root_latch: Mutex::new(()),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id.load(Ordering::SeqCst) == INVALID_PAGE_ID
    }

    /// Point lookup with read crabbing.
    pub fn get(&self, key: &[u8]) -> BurrowDBResult<Option<RecordId>> {
        let Some(leaf) = self.find_leaf_read(key, false)? else {
            return Ok(None);
        };
        Ok(leaf.lookup(key))
    }

    /// Insert a unique key. Returns false (and changes nothing) when the
    /// key is already present.
    pub fn insert(&self, key: &[u8], rid: RecordId) -> BurrowDBResult<bool> {
        loop {
            if self.is_empty() {
                if self.start_new_tree(key, rid)? {
                    return Ok(true);
                }
                // lost the race to plant the root; insert into the new tree
                continue;
            }
            let Some(mut path) = self.find_leaf_write(key, true)? else {
                continue;
            };
            let mut leaf_guard = path.pop().expect("descent ends at a leaf");
            let mut leaf = self.decode_leaf(leaf_guard.data())?;
            if !leaf.insert(key.to_vec(), rid) {
                return Ok(false);
            }
            if !leaf.is_full() {
                self.write_leaf(&mut leaf_guard, &leaf);
                return Ok(true);
            }
            self.split_and_propagate(path, leaf_guard, leaf)?;
            return Ok(true);
        }
    }

    /// Delete a key; absence is a no-op.
    pub fn delete(&self, key: &[u8]) -> BurrowDBResult<()> {
        if self.is_empty() {
            return Ok(());
        }
        let Some(mut path) = self.find_leaf_write(key, false)? else {
            return Ok(());
        };
        let mut leaf_guard = path.pop().expect("descent ends at a leaf");
        let mut leaf = self.decode_leaf(leaf_guard.data())?;
        if !leaf.delete(key) {
            return Ok(());
        }

        if leaf.header.parent_page_id == INVALID_PAGE_ID {
            // the root leaf shrinks freely; an empty root empties the tree
            let leaf_page_id = leaf.header.page_id;
            if leaf.header.current_size == 0 {
                let _root = self.root_latch.lock();
                self.root_page_id.store(INVALID_PAGE_ID, Ordering::SeqCst);
                self.update_root_page_id()?;
                drop(leaf_guard);
                drop(path);
                let _ = self.buffer_pool.delete_page(leaf_page_id)?;
                debug!("index {}: tree emptied", self.index_name);
            } else {
                self.write_leaf(&mut leaf_guard, &leaf);
            }
            return Ok(());
        }

        if leaf.header.current_size >= leaf.min_size() {
            self.write_leaf(&mut leaf_guard, &leaf);
            return Ok(());
        }
        self.rebalance(path, leaf_guard, BPlusTreePage::Leaf(leaf))
    }

    fn start_new_tree(&self, key: &[u8], rid: RecordId) -> BurrowDBResult<bool> {
        let _root = self.root_latch.lock();
        if self.root_page_id.load(Ordering::SeqCst) != INVALID_PAGE_ID {
            return Ok(false);
        }
        let mut guard = self.buffer_pool.new_page()?;
        let page_id = guard.page_id();
        let mut leaf = BPlusTreeLeafPage::new(page_id, INVALID_PAGE_ID, self.leaf_max_size);
        leaf.comparator = self.comparator;
        leaf.insert(key.to_vec(), rid);
        self.write_leaf(&mut guard, &leaf);
        self.root_page_id.store(page_id, Ordering::SeqCst);
        self.update_root_page_id()?;
        debug!("index {}: new tree rooted at {}", self.index_name, page_id);
        Ok(true)
    }

    /// Read-crab down to the leaf covering `key` (or the leftmost leaf) and
    /// return its decoded image; no latches survive the call.
    pub(crate) fn find_leaf_read(
        &self,
        key: &[u8],
        leftmost: bool,
    ) -> BurrowDBResult<Option<BPlusTreeLeafPage>> {
        let mut guard = loop {
            let root = self.root_page_id.load(Ordering::SeqCst);
            if root == INVALID_PAGE_ID {
                return Ok(None);
            }
            let guard = self.buffer_pool.fetch_page_read(root)?;
            // the root may have moved while we latched; restart if so
            if self.root_page_id.load(Ordering::SeqCst) == root {
                break guard;
            }
        };
        loop {
            match self.decode_tree_page(guard.data())? {
                BPlusTreePage::Internal(internal) => {
                    let child = if leftmost {
                        internal.value_at(0)
                    } else {
                        internal.lookup(key)
                    };
                    // crab: latch the child before the parent guard drops
                    let child_guard = self.buffer_pool.fetch_page_read(child)?;
                    guard = child_guard;
                }
                BPlusTreePage::Leaf(leaf) => return Ok(Some(leaf)),
            }
        }
    }

    /// Write-crab down to the leaf covering `key`. Ancestors are released
    /// as soon as the child is safe for the operation; the returned path
    /// always ends with the leaf guard. `None` means the tree emptied (or
    /// re-rooted) under us and the caller should retry.
    fn find_leaf_write(
        &self,
        key: &[u8],
        for_insert: bool,
    ) -> BurrowDBResult<Option<Vec<WritePageGuard>>> {
        let root_guard = loop {
            let root = self.root_page_id.load(Ordering::SeqCst);
            if root == INVALID_PAGE_ID {
                return Ok(None);
            }
            let guard = self.buffer_pool.fetch_page_write(root)?;
            if self.root_page_id.load(Ordering::SeqCst) == root {
                break guard;
            }
        };
        let mut path = vec![root_guard];
        loop {
            let page = self.decode_tree_page(path.last().expect("path is never empty").data())?;
            match page {
                BPlusTreePage::Internal(internal) => {
                    let child_pid = internal.lookup(key);
                    let child_guard = self.buffer_pool.fetch_page_write(child_pid)?;
                    let child = self.decode_tree_page(child_guard.data())?;
                    if child.is_safe(for_insert) {
                        // a safe child cannot propagate changes upward
                        path.clear();
                    }
                    path.push(child_guard);
                }
                BPlusTreePage::Leaf(_) => return Ok(Some(path)),
            }
        }
    }

    /// Split the overflowed leaf and push separators upward along the
    /// latched path, growing a new root if the split reaches the top.
    fn split_and_propagate(
        &self,
        mut path: Vec<WritePageGuard>,
        leaf_guard: WritePageGuard,
        mut leaf: BPlusTreeLeafPage,
    ) -> BurrowDBResult<()> {
        // detach the upper half into a fresh right sibling
        let mut right_guard = self.buffer_pool.new_page()?;
        let right_pid = right_guard.page_id();
        let moved = leaf.split_off(leaf.header.current_size as usize / 2);
        let mut right =
            BPlusTreeLeafPage::new(right_pid, leaf.header.parent_page_id, self.leaf_max_size);
        right.comparator = self.comparator;
        right.extend(moved);

        // splice the right sibling into the leaf list
        let old_next = leaf.header.next_page_id;
        right.header.next_page_id = old_next;
        right.header.prev_page_id = leaf.header.page_id;
        leaf.header.next_page_id = right_pid;
        if old_next != INVALID_PAGE_ID {
            let mut next_guard = self.buffer_pool.fetch_page_write(old_next)?;
            let mut next_leaf = self.decode_leaf(next_guard.data())?;
            next_leaf.header.prev_page_id = right_pid;
            self.write_leaf(&mut next_guard, &next_leaf);
        }

        // the separator is the right page's first key
        let mut separator = right.key_at(0).to_vec();
        debug!(
            "index {}: leaf {} split, right {} gets {} entries",
            self.index_name,
            leaf.header.page_id,
            right_pid,
            right.header.current_size
        );

        let mut left_guard = leaf_guard;
        let mut left_page = BPlusTreePage::Leaf(leaf);
        let mut right_page = BPlusTreePage::Leaf(right);

        loop {
            let left_pid = left_page.page_id();
            let right_pid = right_page.page_id();

            if left_page.parent_page_id() == INVALID_PAGE_ID {
                // the old root split: grow a new root above both halves
                let _root = self.root_latch.lock();
                let mut root_guard = self.buffer_pool.new_page()?;
                let root_pid = root_guard.page_id();
                let mut root =
                    BPlusTreeInternalPage::new(root_pid, INVALID_PAGE_ID, self.internal_max_size);
                root.comparator = self.comparator;
                root.populate_new_root(left_pid, separator, right_pid);
                left_page.set_parent_page_id(root_pid);
                right_page.set_parent_page_id(root_pid);
                self.write_tree_page(&mut left_guard, &left_page);
                self.write_tree_page(&mut right_guard, &right_page);
                self.write_tree_page(&mut root_guard, &BPlusTreePage::Internal(root));
                self.root_page_id.store(root_pid, Ordering::SeqCst);
                self.update_root_page_id()?;
                debug!("index {}: new root {}", self.index_name, root_pid);
                return Ok(());
            }

            let mut parent_guard = path
                .pop()
                .expect("an unsafe child keeps its parent latched");
            let mut parent = self.decode_internal(parent_guard.data())?;
            parent.insert_node_after(left_pid, separator, right_pid);

            if !parent.is_full() {
                self.write_tree_page(&mut left_guard, &left_page);
                self.write_tree_page(&mut right_guard, &right_page);
                self.write_internal(&mut parent_guard, &parent);
                return Ok(());
            }

            // the parent overflows in turn: split it and keep climbing
            let new_guard = self.buffer_pool.new_page()?;
            let new_pid = new_guard.page_id();
            let moved = parent.split_off(parent.header.current_size as usize / 2);
            // the first moved key bubbles up; it stays in place as the new
            // page's sentinel slot
            let next_separator = moved[0].0.clone();
            let mut new_internal = BPlusTreeInternalPage::new(
                new_pid,
                parent.header.parent_page_id,
                self.internal_max_size,
            );
            new_internal.comparator = self.comparator;
            new_internal.extend(moved);

            // migrated children now answer to the new page; the two guards
            // we still hold are updated in place, the rest re-fetched
            for index in 0..new_internal.header.current_size as usize {
                let child_pid = new_internal.value_at(index);
                if child_pid == left_pid {
                    left_page.set_parent_page_id(new_pid);
                } else if child_pid == right_pid {
                    right_page.set_parent_page_id(new_pid);
                } else {
                    let mut child_guard = self.buffer_pool.fetch_page_write(child_pid)?;
                    let mut child = self.decode_tree_page(child_guard.data())?;
                    child.set_parent_page_id(new_pid);
                    self.write_tree_page(&mut child_guard, &child);
                }
            }

            self.write_tree_page(&mut left_guard, &left_page);
            self.write_tree_page(&mut right_guard, &right_page);
            debug!(
                "index {}: internal {} split into {}",
                self.index_name,
                parent.header.page_id,
                new_pid
            );

            separator = next_separator;
            left_guard = parent_guard;
            left_page = BPlusTreePage::Internal(parent);
            right_guard = new_guard;
            right_page = BPlusTreePage::Internal(new_internal);
        }
    }

    /// Rebalance an underflowing node: borrow from the left then the right
    /// sibling, else merge into the left participant and recurse on the
    /// parent. Pages emptied by merges are deleted once their latches drop.
    fn rebalance(
        &self,
        mut path: Vec<WritePageGuard>,
        node_guard: WritePageGuard,
        node_page: BPlusTreePage,
    ) -> BurrowDBResult<()> {
        let mut deleted_pages: Vec<PageId> = Vec::new();
        let mut node_guard = node_guard;
        let mut node_page = node_page;

        loop {
            let mut parent_guard = path
                .pop()
                .expect("an unsafe child keeps its parent latched");
            let mut parent = self.decode_internal(parent_guard.data())?;
            let node_pid = node_page.page_id();
            let index = parent.value_index(node_pid).ok_or_else(|| {
                BurrowDBError::Storage(format!(
                    "page {} missing from its parent {}",
                    node_pid, parent.header.page_id
                ))
            })?;

            // try the left sibling first, then the right
            let mut left_entry = None;
            if index >= 1 {
                let left_pid = parent.value_at(index - 1);
                let left_guard = self.buffer_pool.fetch_page_write(left_pid)?;
                let left = self.decode_tree_page(left_guard.data())?;
                if left.can_borrow() {
                    self.redistribute_from_left(
                        left_guard,
                        left,
                        &mut node_guard,
                        &mut node_page,
                        &mut parent,
                        index,
                    )?;
                    self.write_internal(&mut parent_guard, &parent);
                    return self.finish_rebalance(deleted_pages);
                }
                left_entry = Some((left_guard, left));
            }

            let mut right_entry = None;
            if index + 1 < parent.header.current_size as usize {
                let right_pid = parent.value_at(index + 1);
                let right_guard = self.buffer_pool.fetch_page_write(right_pid)?;
                let right = self.decode_tree_page(right_guard.data())?;
                if right.can_borrow() {
                    self.redistribute_from_right(
                        right_guard,
                        right,
                        &mut node_guard,
                        &mut node_page,
                        &mut parent,
                        index,
                    )?;
                    self.write_internal(&mut parent_guard, &parent);
                    return self.finish_rebalance(deleted_pages);
                }
                right_entry = Some((right_guard, right));
            }

            // neither sibling can donate: merge into the left participant,
            // dropping the dissolved page's latch so it can be deleted
            let (mut survivor_guard, mut survivor) = if let Some((left_guard, left)) = left_entry {
                // node dissolves into its left sibling
                let separator = parent.key_at(index).to_vec();
                drop(right_entry);
                let merged =
                    self.merge_into_left(left, node_page, separator, &mut deleted_pages)?;
                parent.remove(index);
                drop(node_guard);
                (left_guard, merged)
            } else if let Some((right_guard, right)) = right_entry {
                // node is leftmost: the right sibling dissolves into it
                let separator = parent.key_at(index + 1).to_vec();
                drop(right_guard);
                let merged =
                    self.merge_into_left(node_page, right, separator, &mut deleted_pages)?;
                parent.remove(index + 1);
                (node_guard, merged)
            } else {
                return Err(BurrowDBError::Storage(format!(
                    "underflowing page {} has no siblings in parent {}",
                    node_pid, parent.header.page_id
                )));
            };
            self.write_tree_page(&mut survivor_guard, &survivor);

            if parent.header.parent_page_id == INVALID_PAGE_ID {
                // the parent is the root
                if parent.header.current_size == 1 {
                    // a single child left: it becomes the new root
                    let _root = self.root_latch.lock();
                    survivor.set_parent_page_id(INVALID_PAGE_ID);
                    self.write_tree_page(&mut survivor_guard, &survivor);
                    self.root_page_id
                        .store(survivor.page_id(), Ordering::SeqCst);
                    self.update_root_page_id()?;
                    deleted_pages.push(parent.header.page_id);
                    debug!(
                        "index {}: root collapsed into {}",
                        self.index_name,
                        survivor.page_id()
                    );
                } else {
                    self.write_internal(&mut parent_guard, &parent);
                }
                drop(parent_guard);
                drop(survivor_guard);
                return self.finish_rebalance(deleted_pages);
            }

            if parent.header.current_size >= parent.min_size() {
                self.write_internal(&mut parent_guard, &parent);
                return self.finish_rebalance(deleted_pages);
            }

            // the parent underflows in turn
            self.write_internal(&mut parent_guard, &parent);
            drop(survivor_guard);
            node_guard = parent_guard;
            node_page = BPlusTreePage::Internal(parent);
        }
    }

    /// Move the last entry of the left sibling to the front of `node`,
    /// rotating the separator through the parent.
    fn redistribute_from_left(
        &self,
        mut left_guard: WritePageGuard,
        mut left: BPlusTreePage,
        node_guard: &mut WritePageGuard,
        node_page: &mut BPlusTreePage,
        parent: &mut BPlusTreeInternalPage,
        index: usize,
    ) -> BurrowDBResult<()> {
        match (&mut left, &mut *node_page) {
            (BPlusTreePage::Leaf(left), BPlusTreePage::Leaf(node)) => {
                let kv = left.pop_last();
                parent.set_key_at(index, kv.0.clone());
                node.push_front(kv);
            }
            (BPlusTreePage::Internal(left), BPlusTreePage::Internal(node)) => {
                let (key, child_pid) = left.pop_last();
                // the old separator drops into the node's sentinel slot and
                // the donated key replaces it in the parent
                let old_separator = parent.key_at(index).to_vec();
                node.push_front((key.clone(), child_pid));
                node.set_key_at(1, old_separator);
                parent.set_key_at(index, key);
                self.reparent_child(child_pid, node.header.page_id)?;
            }
            _ => {
                return Err(BurrowDBError::Storage(
                    "sibling page kind mismatch during redistribution".to_string(),
                ))
            }
        }
        self.write_tree_page(&mut left_guard, &left);
        self.write_tree_page(node_guard, node_page);
        Ok(())
    }

    /// Move the first entry of the right sibling to the end of `node`,
    /// rotating the separator through the parent.
    fn redistribute_from_right(
        &self,
        mut right_guard: WritePageGuard,
        mut right: BPlusTreePage,
        node_guard: &mut WritePageGuard,
        node_page: &mut BPlusTreePage,
        parent: &mut BPlusTreeInternalPage,
        index: usize,
    ) -> BurrowDBResult<()> {
        match (&mut right, &mut *node_page) {
            (BPlusTreePage::Leaf(right), BPlusTreePage::Leaf(node)) => {
                let kv = right.pop_first();
                node.push_back(kv);
                parent.set_key_at(index + 1, right.key_at(0).to_vec());
            }
            (BPlusTreePage::Internal(right), BPlusTreePage::Internal(node)) => {
                let (_, child_pid) = right.pop_first();
                // the departing child travels under the old separator; the
                // right page's new sentinel key moves up into the parent
                let old_separator = parent.key_at(index + 1).to_vec();
                node.push_back((old_separator, child_pid));
                parent.set_key_at(index + 1, right.key_at(0).to_vec());
                self.reparent_child(child_pid, node.header.page_id)?;
            }
            _ => {
                return Err(BurrowDBError::Storage(
                    "sibling page kind mismatch during redistribution".to_string(),
                ))
            }
        }
        self.write_tree_page(&mut right_guard, &right);
        self.write_tree_page(node_guard, node_page);
        Ok(())
    }

    /// Merge `right` into `left`. For internal pages the parent's discarded
    /// separator becomes the hinge key over the right page's sentinel slot;
    /// for leaves it is simply dropped and the sibling list is respliced.
    /// Returns the merged left page; the right page is queued for deletion.
    fn merge_into_left(
        &self,
        mut left: BPlusTreePage,
        right: BPlusTreePage,
        separator: Vec<u8>,
        deleted_pages: &mut Vec<PageId>,
    ) -> BurrowDBResult<BPlusTreePage> {
        match (&mut left, right) {
            (BPlusTreePage::Leaf(left), BPlusTreePage::Leaf(right)) => {
                deleted_pages.push(right.header.page_id);
                left.header.next_page_id = right.header.next_page_id;
                left.extend(right.array);
                if left.header.next_page_id != INVALID_PAGE_ID {
                    let mut next_guard = self
                        .buffer_pool
                        .fetch_page_write(left.header.next_page_id)?;
                    let mut next_leaf = self.decode_leaf(next_guard.data())?;
                    next_leaf.header.prev_page_id = left.header.page_id;
                    self.write_leaf(&mut next_guard, &next_leaf);
                }
            }
            (BPlusTreePage::Internal(left), BPlusTreePage::Internal(right)) => {
                deleted_pages.push(right.header.page_id);
                let left_pid = left.header.page_id;
                let mut moved = right.array;
                moved[0].0 = separator;
                for (_, child_pid) in moved.iter() {
                    self.reparent_child(*child_pid, left_pid)?;
                }
                left.extend(moved);
            }
            _ => {
                return Err(BurrowDBError::Storage(
                    "sibling page kind mismatch during merge".to_string(),
                ))
            }
        }
        Ok(left)
    }

    fn reparent_child(&self, child_pid: PageId, parent_pid: PageId) -> BurrowDBResult<()> {
        let mut guard = self.buffer_pool.fetch_page_write(child_pid)?;
        let mut child = self.decode_tree_page(guard.data())?;
        child.set_parent_page_id(parent_pid);
        self.write_tree_page(&mut guard, &child);
        Ok(())
    }

    /// Merged-away pages are deleted only after every latch in the
    /// operation dropped.
    fn finish_rebalance(&self, deleted_pages: Vec<PageId>) -> BurrowDBResult<()> {
        for page_id in deleted_pages {
            if !self.buffer_pool.delete_page(page_id)? {
                debug!("page {} still pinned, left for the replacer", page_id);
            }
        }
        Ok(())
    }

    /// Rewrite this index's root record in the header page.
    fn update_root_page_id(&self) -> BurrowDBResult<()> {
        let mut guard = self.buffer_pool.fetch_page_write(HEADER_PAGE_ID)?;
        let (mut header, _) = HeaderPageCodec::decode(guard.data())?;
        let root = self.root_page_id.load(Ordering::SeqCst);
        if !header.update_record(&self.index_name, root) {
            header.insert_record(&self.index_name, root);
        }
        let bytes = HeaderPageCodec::encode(&header);
        guard.data_mut().copy_from_slice(&bytes);
        guard.mark_dirty();
        Ok(())
    }

    pub(crate) fn decode_tree_page(&self, bytes: &[u8]) -> BurrowDBResult<BPlusTreePage> {
        let (mut page, _) = BPlusTreePageCodec::decode(bytes)?;
        match &mut page {
            BPlusTreePage::Internal(internal) => internal.comparator = self.comparator,
            BPlusTreePage::Leaf(leaf) => leaf.comparator = self.comparator,
        }
        Ok(page)
    }

    pub(crate) fn decode_leaf(&self, bytes: &[u8]) -> BurrowDBResult<BPlusTreeLeafPage> {
        match self.decode_tree_page(bytes)? {
            BPlusTreePage::Leaf(leaf) => Ok(leaf),
            BPlusTreePage::Internal(_) => Err(BurrowDBError::Storage(
                "expected a leaf page".to_string(),
            )),
        }
    }

    fn decode_internal(&self, bytes: &[u8]) -> BurrowDBResult<BPlusTreeInternalPage> {
        match self.decode_tree_page(bytes)? {
            BPlusTreePage::Internal(internal) => Ok(internal),
            BPlusTreePage::Leaf(_) => Err(BurrowDBError::Storage(
                "expected an internal page".to_string(),
            )),
        }
    }

    fn write_tree_page(&self, guard: &mut WritePageGuard, page: &BPlusTreePage) {
        let bytes = BPlusTreePageCodec::encode(page);
        guard.data_mut().copy_from_slice(&bytes);
        guard.mark_dirty();
    }

    fn write_leaf(&self, guard: &mut WritePageGuard, leaf: &BPlusTreeLeafPage) {
        self.write_tree_page(guard, &BPlusTreePage::Leaf(leaf.clone()));
    }

    fn write_internal(&self, guard: &mut WritePageGuard, internal: &BPlusTreeInternalPage) {
        self.write_tree_page(guard, &BPlusTreePage::Internal(internal.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::BPlusTreeIndex;
    use crate::buffer::{BufferManager, INVALID_PAGE_ID};
    use crate::storage::comparator::default_comparator;
    use crate::storage::disk_manager::DiskManager;
    use crate::storage::page::{BPlusTreePage, RecordId};
    use rand::seq::SliceRandom;
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    fn key(i: i32) -> Vec<u8> {
        i.to_be_bytes().to_vec()
    }

    fn build_index(pool_size: usize, internal_max: u32, leaf_max: u32) -> (TempDir, BPlusTreeIndex) {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager =
            Arc::new(DiskManager::try_new(temp_dir.path().join("test.db")).unwrap());
        let buffer_pool = Arc::new(BufferManager::new(pool_size, disk_manager));
        let index = BPlusTreeIndex::new(
            "test_index",
            buffer_pool,
            default_comparator,
            internal_max,
            leaf_max,
        )
        .unwrap();
        (temp_dir, index)
    }

    #[test]
    fn test_insert_then_get() {
        let (_tmp, index) = build_index(64, 4, 4);
        for i in 1..=50 {
            assert!(index.insert(&key(i), RecordId::new(i, i as u32)).unwrap());
        }
        for i in 1..=50 {
            assert_eq!(
                index.get(&key(i)).unwrap(),
                Some(RecordId::new(i, i as u32)),
                "key {} lost",
                i
            );
        }
        assert_eq!(index.get(&key(0)).unwrap(), None);
        assert_eq!(index.get(&key(51)).unwrap(), None);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let (_tmp, index) = build_index(64, 4, 4);
        assert!(index.insert(&key(1), RecordId::new(1, 1)).unwrap());
        assert!(!index.insert(&key(1), RecordId::new(9, 9)).unwrap());
        assert_eq!(index.get(&key(1)).unwrap(), Some(RecordId::new(1, 1)));
    }

    #[test]
    fn test_split_pushes_right_first_key() {
        // max_size = 4: inserting 1..=5 splits the root leaf into [1,2] and
        // [3,4,5] with separator 3 (the right page's first key)
        let (_tmp, index) = build_index(64, 4, 4);
        for i in 1..=5 {
            index.insert(&key(i), RecordId::new(i, i as u32)).unwrap();
        }
        let root_pid = index.root_page_id.load(Ordering::SeqCst);
        let guard = index.buffer_pool.fetch_page_read(root_pid).unwrap();
        let root = match index.decode_tree_page(guard.data()).unwrap() {
            BPlusTreePage::Internal(page) => page,
            BPlusTreePage::Leaf(_) => panic!("root should have split into an internal page"),
        };
        assert_eq!(root.header.current_size, 2);
        assert_eq!(root.key_at(1), key(3).as_slice());
        drop(guard);

        let left = index.find_leaf_read(&key(1), false).unwrap().unwrap();
        assert_eq!(left.header.current_size, 2);
        assert_eq!(left.header.parent_page_id, root_pid);
        let right = index.find_leaf_read(&key(3), false).unwrap().unwrap();
        assert_eq!(right.header.current_size, 3);
        assert_eq!(right.key_at(0), key(3).as_slice());
        assert_eq!(right.header.prev_page_id, left.header.page_id);
        assert_eq!(left.header.next_page_id, right.header.page_id);
    }

    #[test]
    fn test_coalesce_back_to_single_leaf() {
        // continuing the split scenario: deleting 5 then 4 merges the
        // leaves and the root becomes a leaf [1,2,3] again
        let (_tmp, index) = build_index(64, 4, 4);
        for i in 1..=5 {
            index.insert(&key(i), RecordId::new(i, i as u32)).unwrap();
        }
        index.delete(&key(5)).unwrap();
        index.delete(&key(4)).unwrap();

        let root_pid = index.root_page_id.load(Ordering::SeqCst);
        let guard = index.buffer_pool.fetch_page_read(root_pid).unwrap();
        let root = match index.decode_tree_page(guard.data()).unwrap() {
            BPlusTreePage::Leaf(page) => page,
            BPlusTreePage::Internal(_) => panic!("root should have collapsed into a leaf"),
        };
        assert_eq!(root.header.current_size, 3);
        assert_eq!(root.header.parent_page_id, INVALID_PAGE_ID);
        for i in 1..=3 {
            assert_eq!(root.lookup(&key(i)), Some(RecordId::new(i, i as u32)));
        }
    }

    #[test]
    fn test_insert_all_then_delete_all_random_order() {
        let (_tmp, index) = build_index(256, 4, 4);
        let mut keys: Vec<i32> = (0..300).collect();
        let mut rng = rand::thread_rng();
        keys.shuffle(&mut rng);
        for &i in keys.iter() {
            assert!(index.insert(&key(i), RecordId::new(i, i as u32)).unwrap());
        }
        for i in 0..300 {
            assert_eq!(index.get(&key(i)).unwrap(), Some(RecordId::new(i, i as u32)));
        }
        keys.shuffle(&mut rng);
        for &i in keys.iter() {
            index.delete(&key(i)).unwrap();
            assert_eq!(index.get(&key(i)).unwrap(), None);
        }
        assert!(index.is_empty());
        assert_eq!(index.root_page_id.load(Ordering::SeqCst), INVALID_PAGE_ID);
    }

    #[test]
    fn test_delete_absent_key_is_noop() {
        let (_tmp, index) = build_index(64, 4, 4);
        index.delete(&key(1)).unwrap();
        for i in 1..=10 {
            index.insert(&key(i), RecordId::new(i, i as u32)).unwrap();
        }
        index.delete(&key(99)).unwrap();
        for i in 1..=10 {
            assert_eq!(index.get(&key(i)).unwrap(), Some(RecordId::new(i, i as u32)));
        }
    }

    #[test]
    fn test_concurrent_disjoint_inserts_with_reader() {
        const NUM_THREADS: usize = 8;
        const KEYS_PER_THREAD: i32 = 1000;

        let (_tmp, index) = build_index(1024, 16, 16);
        let index = Arc::new(index);
        let barrier = Arc::new(Barrier::new(NUM_THREADS + 1));

        let mut handles = Vec::new();
        for t in 0..NUM_THREADS {
            let index = index.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                let start = t as i32 * KEYS_PER_THREAD;
                barrier.wait();
                for i in start..start + KEYS_PER_THREAD {
                    assert!(index.insert(&key(i), RecordId::new(i, i as u32)).unwrap());
                }
            }));
        }

        // a reader scans concurrently; it must never see out-of-order keys
        let reader_index = index.clone();
        let reader_barrier = barrier.clone();
        let reader = thread::spawn(move || {
            reader_barrier.wait();
            for _ in 0..20 {
                let mut iter = crate::storage::index::TreeIndexIterator::begin(
                    reader_index.clone(),
                )
                .unwrap();
                let mut prev: Option<Vec<u8>> = None;
                while let Some((k, _)) = iter.next().unwrap() {
                    if let Some(p) = &prev {
                        assert!(p < &k, "iterator yielded keys out of order");
                    }
                    prev = Some(k);
                }
            }
        });

        for handle in handles {
            handle.join().unwrap();
        }
        reader.join().unwrap();

        for i in 0..NUM_THREADS as i32 * KEYS_PER_THREAD {
            assert_eq!(
                index.get(&key(i)).unwrap(),
                Some(RecordId::new(i, i as u32)),
                "key {} missing after concurrent insert",
                i
            );
        }
    }

    #[test]
    fn test_concurrent_inserts_and_deletes() {
        const NUM_THREADS: usize = 4;
        const KEYS_PER_THREAD: i32 = 500;
        const TOTAL: i32 = NUM_THREADS as i32 * KEYS_PER_THREAD;

        let (_tmp, index) = build_index(1024, 8, 8);
        let index = Arc::new(index);

        let barrier = Arc::new(Barrier::new(NUM_THREADS));
        let mut handles = Vec::new();
        for t in 0..NUM_THREADS {
            let index = index.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                let start = t as i32 * KEYS_PER_THREAD;
                barrier.wait();
                for i in start..start + KEYS_PER_THREAD {
                    index.insert(&key(i), RecordId::new(i, i as u32)).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let mut all: Vec<i32> = (0..TOTAL).collect();
        all.shuffle(&mut rand::thread_rng());
        let shards: Vec<Vec<i32>> = all
            .chunks(TOTAL as usize / NUM_THREADS)
            .map(|chunk| chunk.to_vec())
            .collect();

        let barrier = Arc::new(Barrier::new(NUM_THREADS));
        let mut handles = Vec::new();
        for shard in shards {
            let index = index.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                for i in shard {
                    index.delete(&key(i)).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        for i in 0..TOTAL {
            assert_eq!(index.get(&key(i)).unwrap(), None, "key {} survived", i);
        }
        assert!(index.is_empty());
    }
}
