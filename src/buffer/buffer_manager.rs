//! BufferManager couples the frame store with the replacement policy and the
//! write-ahead-log discipline: dirty pages never reach disk before the log
//! records covering them.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::buffer::buffer_pool::{BufferPool, FrameId, FrameMeta};
use crate::buffer::page::{self, PageId, ReadPageGuard, WritePageGuard, INVALID_PAGE_ID};
use crate::error::{BurrowDBError, BurrowDBResult};
use crate::recovery::{Lsn, LogManager, INVALID_LSN};
use crate::storage::disk_manager::DiskManager;
use crate::utils::cache::lru::LRUReplacer;
use crate::utils::cache::Replacer;

#[derive(Debug)]
pub struct BufferManager {
    pool: Arc<BufferPool>,
    replacer: Mutex<LRUReplacer>,
    // Concurrent fetches of the same non-resident page collapse onto one
    // disk read.
    inflight_loads: DashMap<PageId, Arc<Mutex<()>>>,
    dirty_pages: DashSet<PageId>,
    log_manager: RwLock<Option<Arc<LogManager>>>,
}

impl BufferManager {
    pub fn new(num_pages: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self {
            pool: Arc::new(BufferPool::new(num_pages, disk_manager)),
            replacer: Mutex::new(LRUReplacer::new(num_pages)),
            inflight_loads: DashMap::new(),
            dirty_pages: DashSet::new(),
            log_manager: RwLock::new(None),
        }
    }

    pub fn buffer_pool(&self) -> Arc<BufferPool> {
        self.pool.clone()
    }

    pub fn set_log_manager(&self, log_manager: Arc<LogManager>) {
        *self.log_manager.write() = Some(log_manager);
    }

    pub fn log_manager(&self) -> Option<Arc<LogManager>> {
        self.log_manager.read().clone()
    }

    pub fn new_page(self: &Arc<Self>) -> BurrowDBResult<WritePageGuard> {
        if !self.pool.has_free_frame() && self.replacer.lock().size() == 0 {
            return Err(BurrowDBError::Storage(
                "Cannot new page because buffer pool is full and no page to evict".to_string(),
            ));
        }
        let frame_id = self.allocate_frame()?;
        let page_id = self.pool.allocate_page_id()?;

        self.pool.reset_frame(frame_id);
        {
            let mut meta = self.pool.frame_meta(frame_id);
            *meta = FrameMeta {
                page_id,
                pin_count: 1,
                is_dirty: false,
                lsn: INVALID_LSN,
            };
        }
        self.pool.insert_mapping(page_id, frame_id);
        Ok(page::new_write_guard(Arc::clone(self), frame_id))
    }

    pub fn fetch_page_read(self: &Arc<Self>, page_id: PageId) -> BurrowDBResult<ReadPageGuard> {
        if page_id == INVALID_PAGE_ID {
            return Err(BurrowDBError::Storage(
                "fetch_page_read: invalid page id".to_string(),
            ));
        }
        let frame_id = self.ensure_frame(page_id)?;
        Ok(page::new_read_guard(Arc::clone(self), frame_id))
    }

    pub fn fetch_page_write(self: &Arc<Self>, page_id: PageId) -> BurrowDBResult<WritePageGuard> {
        if page_id == INVALID_PAGE_ID {
            return Err(BurrowDBError::Storage(
                "fetch_page_write: invalid page id".to_string(),
            ));
        }
        let frame_id = self.ensure_frame(page_id)?;
        Ok(page::new_write_guard(Arc::clone(self), frame_id))
    }

    /// Drop one pin; the last unpin makes the frame a replacement candidate.
    pub fn complete_unpin(&self, page_id: PageId, is_dirty: bool) -> BurrowDBResult<()> {
        let Some(frame_id) = self.pool.lookup_frame(page_id) else {
            return Ok(());
        };
        let mut meta = self.pool.frame_meta(frame_id);
        if meta.page_id != page_id {
            return Ok(());
        }
        debug_assert!(meta.pin_count > 0, "unpin of unpinned page {}", page_id);
        if meta.pin_count > 0 {
            meta.pin_count -= 1;
        }
        if is_dirty {
            meta.is_dirty = true;
            self.dirty_pages.insert(page_id);
        }
        let now_unpinned = meta.pin_count == 0;
        drop(meta);
        if now_unpinned {
            self.replacer.lock().insert(frame_id);
        }
        Ok(())
    }

    /// Write the page image to disk unconditionally. The dirty bit is left
    /// set; eviction remains responsible for its own write-back decision.
    pub fn flush_page(&self, page_id: PageId) -> BurrowDBResult<bool> {
        let Some(frame_id) = self.pool.lookup_frame(page_id) else {
            return Ok(false);
        };
        // Hold the frame latch across WAL force and copy so the image on
        // disk is never newer than the durable log.
        let _latch = self.pool.frame_lock(frame_id).read();
        let lsn = {
            let meta = self.pool.frame_meta(frame_id);
            if meta.page_id != page_id {
                return Ok(false);
            }
            meta.lsn
        };
        self.ensure_wal_durable(lsn)?;
        let bytes = Bytes::copy_from_slice(unsafe { self.pool.frame_slice(frame_id) });
        self.pool.write_page_to_disk(page_id, &bytes)?;
        Ok(true)
    }

    pub fn flush_all_pages(&self) -> BurrowDBResult<()> {
        if let Some(log_manager) = self.log_manager() {
            log_manager.flush()?;
        }
        let dirty: Vec<PageId> = self.dirty_pages.iter().map(|entry| *entry.key()).collect();
        for page_id in dirty {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Drop a page from the pool and release its id. The caller guarantees
    /// the page is unpinned; a pinned page returns false.
    pub fn delete_page(&self, page_id: PageId) -> BurrowDBResult<bool> {
        let (load_lock, created_here) = self.inflight_entry(page_id);
        let _lock = load_lock.lock();
        let result = self.delete_page_inner(page_id);
        if created_here {
            self.inflight_loads.remove(&page_id);
        }
        result
    }

    fn delete_page_inner(&self, page_id: PageId) -> BurrowDBResult<bool> {
        if let Some(frame_id) = self.pool.lookup_frame(page_id) {
            let mut meta = self.pool.frame_meta(frame_id);
            if meta.page_id == page_id {
                if meta.pin_count > 0 {
                    return Ok(false);
                }
                self.pool.remove_mapping(page_id);
                *meta = FrameMeta::default();
                drop(meta);
                self.dirty_pages.remove(&page_id);
                self.pool.reset_frame(frame_id);
                self.replacer.lock().erase(frame_id);
                self.pool.push_free_frame(frame_id);
            }
        }
        self.pool.deallocate_page_id(page_id)?;
        Ok(true)
    }

    /// Locate (loading if needed) and pin the frame holding `page_id`.
    fn ensure_frame(&self, page_id: PageId) -> BurrowDBResult<FrameId> {
        if let Some(frame_id) = self.try_pin_resident(page_id) {
            return Ok(frame_id);
        }

        let (load_lock, created_here) = self.inflight_entry(page_id);
        let _lock = load_lock.lock();

        // Someone may have finished loading while we waited.
        if let Some(frame_id) = self.try_pin_resident(page_id) {
            if created_here {
                self.inflight_loads.remove(&page_id);
            }
            return Ok(frame_id);
        }

        let load_result = self.load_into_pool(page_id);
        if created_here {
            self.inflight_loads.remove(&page_id);
        }
        load_result
    }

    fn load_into_pool(&self, page_id: PageId) -> BurrowDBResult<FrameId> {
        let frame_id = self.allocate_frame()?;
        self.pool.load_page_into_frame(page_id, frame_id)?;
        {
            let mut meta = self.pool.frame_meta(frame_id);
            *meta = FrameMeta {
                page_id,
                pin_count: 1,
                is_dirty: false,
                lsn: INVALID_LSN,
            };
        }
        self.pool.insert_mapping(page_id, frame_id);
        Ok(frame_id)
    }

    /// Pin the resident frame for `page_id`, or None if it is not (or no
    /// longer) mapped. The page-id recheck under the meta lock closes the
    /// race with eviction.
    fn try_pin_resident(&self, page_id: PageId) -> Option<FrameId> {
        let frame_id = self.pool.lookup_frame(page_id)?;
        let mut meta = self.pool.frame_meta(frame_id);
        if meta.page_id != page_id {
            return None;
        }
        meta.pin_count += 1;
        drop(meta);
        self.replacer.lock().erase(frame_id);
        Some(frame_id)
    }

    fn inflight_entry(&self, page_id: PageId) -> (Arc<Mutex<()>>, bool) {
        if let Some(existing) = self.inflight_loads.get(&page_id) {
            (existing.clone(), false)
        } else {
            let entry = Arc::new(Mutex::new(()));
            self.inflight_loads.insert(page_id, entry.clone());
            (entry, true)
        }
    }

    fn allocate_frame(&self) -> BurrowDBResult<FrameId> {
        if let Some(frame_id) = self.pool.pop_free_frame() {
            return Ok(frame_id);
        }
        self.evict_victim_frame()
    }

    fn evict_victim_frame(&self) -> BurrowDBResult<FrameId> {
        loop {
            let victim = self.replacer.lock().victim().ok_or_else(|| {
                BurrowDBError::Storage("Cannot allocate frame: buffer pool is full".to_string())
            })?;

            // The frame latch is held from before the WAL force until the
            // mapping is gone: no writer can slip a change between the copy
            // we persist and the moment the frame is reused.
            {
                let _latch = self.pool.frame_lock(victim).read();
                let (page_id, pin_count, is_dirty, lsn) = {
                    let meta = self.pool.frame_meta(victim);
                    (meta.page_id, meta.pin_count, meta.is_dirty, meta.lsn)
                };
                if pin_count > 0 {
                    // Re-pinned after entering the replacer; its unpin will
                    // re-insert it.
                    continue;
                }

                if page_id != INVALID_PAGE_ID {
                    if is_dirty {
                        // Force-WAL: the log must cover this page before
                        // the image reaches disk.
                        self.ensure_wal_durable(lsn)?;
                        let bytes =
                            Bytes::copy_from_slice(unsafe { self.pool.frame_slice(victim) });
                        self.pool.write_page_to_disk(page_id, &bytes)?;
                        debug!("evicted dirty page {} (lsn {})", page_id, lsn);
                    }
                    let mut meta = self.pool.frame_meta(victim);
                    if meta.pin_count > 0 {
                        // A fetcher pinned the frame while we wrote it back;
                        // leave it mapped and pick another victim.
                        continue;
                    }
                    self.pool.remove_mapping(page_id);
                    *meta = FrameMeta::default();
                    drop(meta);
                    self.dirty_pages.remove(&page_id);
                }
            }

            self.pool.reset_frame(victim);
            return Ok(victim);
        }
    }

    fn ensure_wal_durable(&self, lsn: Lsn) -> BurrowDBResult<()> {
        if lsn == INVALID_LSN {
            return Ok(());
        }
        if let Some(log_manager) = self.log_manager() {
            if lsn > log_manager.persistent_lsn() {
                log_manager.flush_until(lsn)?;
            }
        }
        Ok(())
    }

    pub fn replacer_size(&self) -> usize {
        self.replacer.lock().size()
    }
}
