pub mod log_manager;
pub mod log_record;
pub mod log_recovery;

pub use log_manager::LogManager;
pub use log_record::{LogPayload, LogRecord, LogRecordCodec, LogRecordType, LOG_RECORD_HEADER_SIZE};
pub use log_recovery::LogRecovery;

/// Log sequence number, assigned monotonically at append time.
pub type Lsn = i32;

pub const INVALID_LSN: Lsn = -1;
