use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::buffer::page::{PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::error::BurrowDBResult;
use crate::recovery::{Lsn, INVALID_LSN};
use crate::storage::disk_manager::DiskManager;
use crate::utils::hash::ExtendibleHashTable;

pub type FrameId = usize;

/// Bucket capacity of the extendible-hash page table.
const PAGE_TABLE_BUCKET_SIZE: usize = 8;

#[derive(Debug, Clone)]
pub struct FrameMeta {
    pub page_id: PageId,
    pub pin_count: u32,
    pub is_dirty: bool,
    pub lsn: Lsn,
}

impl Default for FrameMeta {
    fn default() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
            lsn: INVALID_LSN,
        }
    }
}

struct FrameCell {
    // Guards the frame bytes; page guards hold it for their lifetime.
    latch: RwLock<()>,
    meta: Mutex<FrameMeta>,
    data: UnsafeCell<Box<[u8; PAGE_SIZE]>>,
}

/// Frame storage: fixed page memory, per-frame latches and metadata, the
/// free list, and the extendible-hash `page_id -> frame_id` table. Policy
/// (replacement, WAL coupling) lives in `BufferManager`.
pub struct BufferPool {
    frames: Vec<FrameCell>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    free_list: Mutex<VecDeque<FrameId>>,
    disk_manager: Arc<DiskManager>,
}

// Frame bytes are only touched through `frame_slice`/`frame_slice_mut`,
// whose callers hold the frame latch.
unsafe impl Send for BufferPool {}
unsafe impl Sync for BufferPool {}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.frames.len())
            .finish()
    }
}

impl BufferPool {
    pub fn new(num_pages: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(num_pages);
        let mut free_list = VecDeque::with_capacity(num_pages);
        for frame_id in 0..num_pages {
            frames.push(FrameCell {
                latch: RwLock::new(()),
                meta: Mutex::new(FrameMeta::default()),
                data: UnsafeCell::new(Box::new([0; PAGE_SIZE])),
            });
            free_list.push_back(frame_id);
        }
        Self {
            frames,
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
            free_list: Mutex::new(free_list),
            disk_manager,
        }
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    pub fn frame_lock(&self, frame_id: FrameId) -> &RwLock<()> {
        &self.frames[frame_id].latch
    }

    pub fn frame_meta(&self, frame_id: FrameId) -> MutexGuard<'_, FrameMeta> {
        self.frames[frame_id].meta.lock()
    }

    /// # Safety
    /// The caller must hold the frame latch (read or write).
    pub unsafe fn frame_slice(&self, frame_id: FrameId) -> &[u8] {
        (*self.frames[frame_id].data.get()).as_slice()
    }

    /// # Safety
    /// The caller must hold the frame latch exclusively.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn frame_slice_mut(&self, frame_id: FrameId) -> &mut [u8] {
        (*self.frames[frame_id].data.get()).as_mut_slice()
    }

    pub fn lookup_frame(&self, page_id: PageId) -> Option<FrameId> {
        self.page_table.find(&page_id)
    }

    pub fn insert_mapping(&self, page_id: PageId, frame_id: FrameId) {
        self.page_table.insert(page_id, frame_id);
    }

    pub fn remove_mapping(&self, page_id: PageId) {
        self.page_table.remove(&page_id);
    }

    pub fn pop_free_frame(&self) -> Option<FrameId> {
        self.free_list.lock().pop_front()
    }

    pub fn push_free_frame(&self, frame_id: FrameId) {
        self.free_list.lock().push_back(frame_id);
    }

    pub fn has_free_frame(&self) -> bool {
        !self.free_list.lock().is_empty()
    }

    /// Read `page_id` from disk into an unmapped frame. The frame must not
    /// be reachable through the page table yet.
    pub fn load_page_into_frame(
        &self,
        page_id: PageId,
        frame_id: FrameId,
    ) -> BurrowDBResult<()> {
        let page = self.disk_manager.read_page(page_id)?;
        let _latch = self.frames[frame_id].latch.write();
        let slice = unsafe { self.frame_slice_mut(frame_id) };
        slice.copy_from_slice(&page);
        Ok(())
    }

    pub fn reset_frame(&self, frame_id: FrameId) {
        let _latch = self.frames[frame_id].latch.write();
        let slice = unsafe { self.frame_slice_mut(frame_id) };
        slice.fill(0);
    }

    pub fn write_page_to_disk(&self, page_id: PageId, data: &[u8]) -> BurrowDBResult<()> {
        self.disk_manager.write_page(page_id, data)
    }

    pub fn allocate_page_id(&self) -> BurrowDBResult<PageId> {
        self.disk_manager.allocate_page()
    }

    pub fn deallocate_page_id(&self, page_id: PageId) -> BurrowDBResult<()> {
        self.disk_manager.deallocate_page(page_id)
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}
