use log::debug;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::buffer::{PageId, HEADER_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE};
use crate::error::{BurrowDBError, BurrowDBResult};

static EMPTY_PAGE: [u8; PAGE_SIZE] = [0; PAGE_SIZE];

/// Byte-addressed page and log I/O over two files. Page `p` lives at offset
/// `p * PAGE_SIZE` in the data file; the log file is append-only.
#[derive(Debug)]
pub struct DiskManager {
    next_page_id: AtomicI32,
    db_file: Mutex<File>,
    log_file: Mutex<File>,
    free_pages: Mutex<Vec<PageId>>,
}

impl DiskManager {
    pub fn try_new(db_path: impl AsRef<Path>) -> BurrowDBResult<Self> {
        let db_path = db_path.as_ref();
        let is_new_file = !db_path.exists();
        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        let log_path = db_path.with_extension("log");
        let log_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(log_path)?;

        let db_file_len = db_file.metadata()?.len();
        if db_file_len % PAGE_SIZE as u64 != 0 {
            return Err(BurrowDBError::Internal(format!(
                "db file size {} is not a multiple of {}",
                db_file_len, PAGE_SIZE
            )));
        }
        let next_page_id = (db_file_len / PAGE_SIZE as u64) as PageId;

        let disk_manager = Self {
            next_page_id: AtomicI32::new(next_page_id),
            db_file: Mutex::new(db_file),
            log_file: Mutex::new(log_file),
            free_pages: Mutex::new(Vec::new()),
        };

        if is_new_file {
            // Page 0 is the well-known header page.
            let header = disk_manager.allocate_page()?;
            assert_eq!(header, HEADER_PAGE_ID);
        }
        debug!(
            "disk_manager opened, next_page_id={}",
            disk_manager.next_page_id.load(Ordering::SeqCst)
        );
        Ok(disk_manager)
    }

    pub fn read_page(&self, page_id: PageId) -> BurrowDBResult<[u8; PAGE_SIZE]> {
        if page_id == INVALID_PAGE_ID {
            return Err(BurrowDBError::Storage(
                "read_page: invalid page id".to_string(),
            ));
        }
        let mut guard = self.db_file.lock();
        guard.seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))?;
        let mut page = [0u8; PAGE_SIZE];
        guard.read_exact(&mut page)?;
        Ok(page)
    }

    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> BurrowDBResult<()> {
        if page_id == INVALID_PAGE_ID {
            return Err(BurrowDBError::Storage(
                "write_page: invalid page id".to_string(),
            ));
        }
        if data.len() != PAGE_SIZE {
            return Err(BurrowDBError::Internal(format!(
                "page size is not {}",
                PAGE_SIZE
            )));
        }
        let mut guard = self.db_file.lock();
        guard.seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))?;
        guard.write_all(data)?;
        guard.flush()?;
        Ok(())
    }

    pub fn allocate_page(&self) -> BurrowDBResult<PageId> {
        if let Some(page_id) = self.free_pages.lock().pop() {
            return Ok(page_id);
        }
        let page_id = self.next_page_id.fetch_add(1, Ordering::SeqCst);
        self.write_page(page_id, &EMPTY_PAGE)?;
        Ok(page_id)
    }

    pub fn deallocate_page(&self, page_id: PageId) -> BurrowDBResult<()> {
        if page_id == INVALID_PAGE_ID {
            return Err(BurrowDBError::Storage(
                "deallocate_page: invalid page id".to_string(),
            ));
        }
        self.write_page(page_id, &EMPTY_PAGE)?;
        self.free_pages.lock().push(page_id);
        Ok(())
    }

    /// Append raw log bytes and force them to stable storage.
    pub fn write_log(&self, data: &[u8]) -> BurrowDBResult<()> {
        let mut guard = self.log_file.lock();
        guard.seek(SeekFrom::End(0))?;
        guard.write_all(data)?;
        guard.sync_data()?;
        Ok(())
    }

    /// Read up to `buf.len()` log bytes starting at `offset`. Returns false
    /// once `offset` is at or past the end of the log; a short tail read
    /// zero-fills the remainder of `buf`.
    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> BurrowDBResult<bool> {
        let mut guard = self.log_file.lock();
        let len = guard.metadata()?.len();
        if offset >= len {
            return Ok(false);
        }
        guard.seek(SeekFrom::Start(offset))?;
        buf.fill(0);
        let readable = ((len - offset) as usize).min(buf.len());
        guard.read_exact(&mut buf[..readable])?;
        Ok(true)
    }

    pub fn db_file_len(&self) -> BurrowDBResult<u64> {
        Ok(self.db_file.lock().metadata()?.len())
    }

    pub fn log_file_len(&self) -> BurrowDBResult<u64> {
        Ok(self.log_file.lock().metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use crate::buffer::PAGE_SIZE;
    use tempfile::TempDir;

    #[test]
    pub fn test_disk_manager_write_read_page() {
        let temp_dir = TempDir::new().unwrap();
        let temp_path = temp_dir.path().join("test.db");
        let disk_manager = super::DiskManager::try_new(temp_path).unwrap();

        // page 0 is reserved for the header page
        let page_id1 = disk_manager.allocate_page().unwrap();
        assert_eq!(page_id1, 1);
        let mut page1 = vec![1, 2, 3];
        page1.extend(vec![0; PAGE_SIZE - 3]);
        disk_manager.write_page(page_id1, &page1).unwrap();
        assert_eq!(disk_manager.read_page(page_id1).unwrap(), page1.as_slice());

        let page_id2 = disk_manager.allocate_page().unwrap();
        assert_eq!(page_id2, 2);
        let mut page2 = vec![0; PAGE_SIZE - 3];
        page2.extend(vec![4, 5, 6]);
        disk_manager.write_page(page_id2, &page2).unwrap();
        assert_eq!(disk_manager.read_page(page_id2).unwrap(), page2.as_slice());

        assert_eq!(disk_manager.db_file_len().unwrap() as usize, PAGE_SIZE * 3);
    }

    #[test]
    pub fn test_disk_manager_deallocate_reuses_page() {
        let temp_dir = TempDir::new().unwrap();
        let temp_path = temp_dir.path().join("test.db");
        let disk_manager = super::DiskManager::try_new(temp_path).unwrap();

        let page_id1 = disk_manager.allocate_page().unwrap();
        let _page_id2 = disk_manager.allocate_page().unwrap();
        disk_manager.deallocate_page(page_id1).unwrap();
        let page_id3 = disk_manager.allocate_page().unwrap();
        assert_eq!(page_id1, page_id3);
        assert!(disk_manager.read_page(page_id3).unwrap().iter().all(|b| *b == 0));
    }

    #[test]
    pub fn test_disk_manager_log_io() {
        let temp_dir = TempDir::new().unwrap();
        let temp_path = temp_dir.path().join("test.db");
        let disk_manager = super::DiskManager::try_new(temp_path).unwrap();

        disk_manager.write_log(b"hello").unwrap();
        disk_manager.write_log(b"world").unwrap();

        let mut buf = [0u8; 16];
        assert!(disk_manager.read_log(&mut buf, 0).unwrap());
        assert_eq!(&buf[..10], b"helloworld");
        assert_eq!(&buf[10..], &[0; 6]);

        // offset past the end terminates a scan
        assert!(!disk_manager.read_log(&mut buf, 10).unwrap());
        assert!(disk_manager.read_log(&mut buf, 5).unwrap());
        assert_eq!(&buf[..5], b"world");
    }
}
