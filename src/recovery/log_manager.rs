use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::debug;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::LogConfig;
use crate::error::{BurrowDBError, BurrowDBResult};
use crate::recovery::log_record::{LogRecord, LogRecordCodec};
use crate::recovery::{Lsn, INVALID_LSN};
use crate::storage::codec::CommonCodec;
use crate::storage::disk_manager::DiskManager;

/// Append-only log buffer with a background flusher. Appenders fill
/// `log_buffer`; the flush thread swaps it against an empty flush buffer,
/// writes the swapped bytes out, and advances `persistent_lsn` by scanning
/// what it wrote. The buffer pool forces a flush up to a page's LSN before
/// that page may be written to disk.
pub struct LogManager {
    disk_manager: Arc<DiskManager>,
    log_buffer_capacity: usize,
    flush_timeout: std::time::Duration,

    next_lsn: AtomicI32,
    persistent_lsn: AtomicI32,
    enable_logging: AtomicBool,
    flush_thread_on: AtomicBool,

    // Serializes appenders; LSN assignment and buffer fill stay one atomic
    // step from the appenders' point of view.
    append_latch: Mutex<()>,
    state: Mutex<LogState>,
    // Wakes the flush thread early.
    flush_cv: Condvar,
    // Signals completed flush cycles back to synchronous flushers.
    flush_done_cv: Condvar,
    flush_thread: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Default)]
struct LogState {
    log_buffer: Vec<u8>,
    // Completed flush cycles; `flush()` waits for this to advance.
    flush_cycles: u64,
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogManager")
            .field("next_lsn", &self.next_lsn.load(Ordering::SeqCst))
            .field("persistent_lsn", &self.persistent_lsn.load(Ordering::SeqCst))
            .field("enable_logging", &self.enable_logging.load(Ordering::SeqCst))
            .finish()
    }
}

impl LogManager {
    pub fn new(disk_manager: Arc<DiskManager>, config: LogConfig) -> Self {
        Self {
            disk_manager,
            log_buffer_capacity: config.log_buffer_size,
            flush_timeout: config.flush_timeout,
            // LSN 0 is never assigned: a zeroed page image decodes with LSN
            // 0 and must always read as older than every record.
            next_lsn: AtomicI32::new(1),
            persistent_lsn: AtomicI32::new(INVALID_LSN),
            enable_logging: AtomicBool::new(false),
            flush_thread_on: AtomicBool::new(false),
            append_latch: Mutex::new(()),
            state: Mutex::new(LogState::default()),
            flush_cv: Condvar::new(),
            flush_done_cv: Condvar::new(),
            flush_thread: Mutex::new(None),
        }
    }

    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn.load(Ordering::SeqCst)
    }

    /// Highest LSN known to be on disk.
    pub fn persistent_lsn(&self) -> Lsn {
        self.persistent_lsn.load(Ordering::SeqCst)
    }

    pub fn is_logging_enabled(&self) -> bool {
        self.enable_logging.load(Ordering::SeqCst)
    }

    pub fn set_logging_enabled(&self, enabled: bool) {
        self.enable_logging.store(enabled, Ordering::SeqCst);
    }

    /// Assign the record its LSN and serialize it into the log buffer,
    /// forcing a flush first if the record would overflow.
    pub fn append_log_record(&self, record: &mut LogRecord) -> BurrowDBResult<Lsn> {
        let _append = self.append_latch.lock();
        record.lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        let encoded = LogRecordCodec::encode(record);
        if encoded.len() > self.log_buffer_capacity {
            return Err(BurrowDBError::Internal(format!(
                "log record of {} bytes exceeds log buffer capacity {}",
                encoded.len(),
                self.log_buffer_capacity
            )));
        }

        let mut state = self.state.lock();
        if state.log_buffer.len() + encoded.len() > self.log_buffer_capacity {
            drop(state);
            self.flush()?;
            state = self.state.lock();
        }
        state.log_buffer.extend_from_slice(&encoded);
        Ok(record.lsn)
    }

    /// Start the background flusher and enable logging.
    pub fn run_flush_thread(self: &Arc<Self>) {
        if self.flush_thread_on.swap(true, Ordering::SeqCst) {
            return;
        }
        self.enable_logging.store(true, Ordering::SeqCst);
        let this = Arc::clone(self);
        let handle = std::thread::spawn(move || this.flush_loop());
        *self.flush_thread.lock() = Some(handle);
    }

    /// Disable logging, drain the buffer, and join the flusher.
    pub fn stop_flush_thread(&self) -> BurrowDBResult<()> {
        if !self.flush_thread_on.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.enable_logging.store(false, Ordering::SeqCst);
        self.flush()?;
        self.flush_thread_on.store(false, Ordering::SeqCst);
        self.flush_cv.notify_all();
        if let Some(handle) = self.flush_thread.lock().take() {
            handle
                .join()
                .map_err(|_| BurrowDBError::Internal("log flush thread panicked".to_string()))?;
        }
        Ok(())
    }

    /// Synchronous force: wait out two full flush cycles, so a record
    /// appended after a cycle was already signalled still lands on disk.
    pub fn flush(&self) -> BurrowDBResult<()> {
        self.flush_impl()?;
        self.flush_impl()
    }

    /// Force the log durable up to at least `lsn`.
    pub fn flush_until(&self, lsn: Lsn) -> BurrowDBResult<()> {
        let mut attempts = 0;
        while self.persistent_lsn() < lsn {
            self.flush()?;
            attempts += 1;
            if attempts > 8 {
                return Err(BurrowDBError::Internal(format!(
                    "log flush cannot reach lsn {} (persistent {})",
                    lsn,
                    self.persistent_lsn()
                )));
            }
        }
        Ok(())
    }

    fn flush_impl(&self) -> BurrowDBResult<()> {
        let mut state = self.state.lock();
        if !self.flush_thread_on.load(Ordering::SeqCst) {
            // No background flusher: drain synchronously.
            return self.write_out(&mut state);
        }
        let target = state.flush_cycles + 1;
        self.flush_cv.notify_all();
        while state.flush_cycles < target {
            if !self.flush_thread_on.load(Ordering::SeqCst) {
                return self.write_out(&mut state);
            }
            let _ = self.flush_done_cv.wait_for(&mut state, self.flush_timeout);
        }
        Ok(())
    }

    fn flush_loop(self: Arc<Self>) {
        let mut state = self.state.lock();
        while self.flush_thread_on.load(Ordering::SeqCst) {
            let _ = self.flush_cv.wait_for(&mut state, self.flush_timeout);
            if let Err(e) = self.write_out(&mut state) {
                log::error!("log flush failed: {}", e);
            }
            self.flush_done_cv.notify_all();
        }
        // Final drain so nothing appended during shutdown is lost.
        if let Err(e) = self.write_out(&mut state) {
            log::error!("log flush failed during shutdown: {}", e);
        }
        self.flush_done_cv.notify_all();
    }

    /// Swap out the append buffer and write it to disk. The state lock is
    /// held across the write so flushed byte ranges land in log order.
    fn write_out(&self, state: &mut MutexGuard<'_, LogState>) -> BurrowDBResult<()> {
        let result = if state.log_buffer.is_empty() {
            Ok(())
        } else {
            let flush_buffer = std::mem::take(&mut state.log_buffer);
            let result = self.disk_manager.write_log(&flush_buffer);
            if result.is_ok() {
                let durable = Self::scan_highest_lsn(&flush_buffer);
                if durable != INVALID_LSN {
                    self.persistent_lsn.store(durable, Ordering::SeqCst);
                }
                debug!(
                    "flushed {} log bytes, persistent_lsn={}",
                    flush_buffer.len(),
                    durable
                );
            }
            result
        };
        // a failed write still completes the cycle
        state.flush_cycles += 1;
        result
    }

    /// Walk the flushed bytes record by record; the last header's LSN is
    /// the new persistent LSN.
    fn scan_highest_lsn(buffer: &[u8]) -> Lsn {
        let mut highest = INVALID_LSN;
        let mut offset = 0usize;
        while offset + 8 <= buffer.len() {
            let Ok((size, _)) = CommonCodec::decode_i32(&buffer[offset..]) else {
                break;
            };
            if size <= 0 {
                break;
            }
            let Ok((lsn, _)) = CommonCodec::decode_i32(&buffer[offset + 4..]) else {
                break;
            };
            highest = lsn;
            offset += size as usize;
        }
        highest
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        let _ = self.stop_flush_thread();
    }
}
