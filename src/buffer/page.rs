use log::error;
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use std::mem::{self, ManuallyDrop};
use std::sync::atomic::AtomicI32;
use std::sync::Arc;

use crate::buffer::buffer_pool::BufferPool;
use crate::buffer::{BufferManager, FrameId, FrameMeta};
use crate::recovery::Lsn;

pub type PageId = i32;
pub type AtomicPageId = AtomicI32;

pub const INVALID_PAGE_ID: PageId = -1;
pub const HEADER_PAGE_ID: PageId = 0;
pub const PAGE_SIZE: usize = 4096;

/// Shared handle to a pinned, read-latched frame. Pin is taken before the
/// latch; drop releases the latch first, then the pin.
#[derive(Debug)]
pub struct ReadPageGuard {
    bpm: Arc<BufferManager>,
    pool: Arc<BufferPool>,
    frame_id: FrameId,
    guard: ManuallyDrop<RwLockReadGuard<'static, ()>>,
}

impl ReadPageGuard {
    pub fn data(&self) -> &[u8] {
        unsafe { self.pool.frame_slice(self.frame_id) }
    }

    pub fn page_id(&self) -> PageId {
        self.meta_snapshot().page_id
    }

    pub fn lsn(&self) -> Lsn {
        self.meta_snapshot().lsn
    }

    pub fn pin_count(&self) -> u32 {
        self.meta_snapshot().pin_count
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn meta_snapshot(&self) -> FrameMeta {
        self.pool.frame_meta(self.frame_id).clone()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        let page_id = self.meta_snapshot().page_id;
        unsafe {
            ManuallyDrop::drop(&mut self.guard);
        }
        if let Err(e) = self.bpm.complete_unpin(page_id, false) {
            error!("failed to unpin page {}: {}", page_id, e);
        }
    }
}

/// Exclusive handle to a pinned, write-latched frame.
#[derive(Debug)]
pub struct WritePageGuard {
    bpm: Arc<BufferManager>,
    pool: Arc<BufferPool>,
    frame_id: FrameId,
    guard: ManuallyDrop<RwLockWriteGuard<'static, ()>>,
}

impl WritePageGuard {
    pub fn data(&self) -> &[u8] {
        unsafe { self.pool.frame_slice(self.frame_id) }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        unsafe { self.pool.frame_slice_mut(self.frame_id) }
    }

    pub fn page_id(&self) -> PageId {
        self.meta_snapshot().page_id
    }

    pub fn lsn(&self) -> Lsn {
        self.meta_snapshot().lsn
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.pool.frame_meta(self.frame_id).lsn = lsn;
    }

    pub fn mark_dirty(&mut self) {
        self.pool.frame_meta(self.frame_id).is_dirty = true;
    }

    /// Replace the whole page image, optionally stamping a new LSN.
    pub fn overwrite(&mut self, data: &[u8], new_lsn: Option<Lsn>) {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        let slice = unsafe { self.pool.frame_slice_mut(self.frame_id) };
        slice.copy_from_slice(data);
        if let Some(lsn) = new_lsn {
            self.set_lsn(lsn);
        }
        self.mark_dirty();
    }

    pub fn pin_count(&self) -> u32 {
        self.meta_snapshot().pin_count
    }

    pub fn is_dirty(&self) -> bool {
        self.meta_snapshot().is_dirty
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn meta_snapshot(&self) -> FrameMeta {
        self.pool.frame_meta(self.frame_id).clone()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        let snapshot = self.meta_snapshot();
        unsafe {
            ManuallyDrop::drop(&mut self.guard);
        }
        if let Err(e) = self.bpm.complete_unpin(snapshot.page_id, snapshot.is_dirty) {
            error!("failed to unpin page {}: {}", snapshot.page_id, e);
        }
    }
}

// The frame rw-latch lives inside BufferPool; the guard keeps the pool alive
// through its Arc, so extending the lock guard lifetime to 'static is sound.
pub(crate) fn new_read_guard(bpm: Arc<BufferManager>, frame_id: FrameId) -> ReadPageGuard {
    let pool = bpm.buffer_pool();
    let guard = pool.frame_lock(frame_id).read();
    let guard_static: RwLockReadGuard<'static, ()> =
        unsafe { mem::transmute::<RwLockReadGuard<'_, ()>, RwLockReadGuard<'static, ()>>(guard) };
    ReadPageGuard {
        bpm,
        pool,
        frame_id,
        guard: ManuallyDrop::new(guard_static),
    }
}

pub(crate) fn new_write_guard(bpm: Arc<BufferManager>, frame_id: FrameId) -> WritePageGuard {
    let pool = bpm.buffer_pool();
    let guard = pool.frame_lock(frame_id).write();
    let guard_static: RwLockWriteGuard<'static, ()> = unsafe {
        mem::transmute::<RwLockWriteGuard<'_, ()>, RwLockWriteGuard<'static, ()>>(guard)
    };
    WritePageGuard {
        bpm,
        pool,
        frame_id,
        guard: ManuallyDrop::new(guard_static),
    }
}
