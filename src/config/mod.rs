use std::time::Duration;

use crate::buffer::PAGE_SIZE;

/// Default number of frames in the buffer pool.
pub const BUFFER_POOL_SIZE: usize = 64;

/// Size of each of the two log buffers. One extra page so a record written
/// right at the boundary still fits after a forced flush.
pub const LOG_BUFFER_SIZE: usize = (BUFFER_POOL_SIZE + 1) * PAGE_SIZE;

/// Deadline for the background log flush thread.
pub const LOG_TIMEOUT: Duration = Duration::from_secs(1);

/// How long a lock waiter blocks before it is aborted.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct BufferPoolConfig {
    pub buffer_pool_size: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        BufferPoolConfig {
            buffer_pool_size: BUFFER_POOL_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LogConfig {
    pub log_buffer_size: usize,
    pub flush_timeout: Duration,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            log_buffer_size: LOG_BUFFER_SIZE,
            flush_timeout: LOG_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LockConfig {
    pub wait_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            wait_timeout: WAIT_TIMEOUT,
        }
    }
}
