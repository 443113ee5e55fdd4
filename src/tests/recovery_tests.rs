//! End-to-end crash/restart scenarios across the buffer pool, WAL, and
//! recovery.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use crate::buffer::BufferManager;
use crate::config::{LockConfig, LogConfig};
use crate::recovery::log_record::{LogPayload, LogRecord};
use crate::recovery::{LogManager, LogRecovery};
use crate::storage::codec::TablePageCodec;
use crate::storage::disk_manager::DiskManager;
use crate::storage::page::{RecordId, TablePage};
use crate::transaction::{LockManager, Transaction, TransactionManager, TwoPhaseLocking};

const TEST_LOG_BUFFER: usize = 8192;

struct Engine {
    disk_manager: Arc<DiskManager>,
    buffer_pool: Arc<BufferManager>,
    log_manager: Arc<LogManager>,
    txn_manager: TransactionManager,
}

fn open_engine(path: &Path, pool_size: usize) -> Engine {
    let disk_manager = Arc::new(DiskManager::try_new(path).unwrap());
    let buffer_pool = Arc::new(BufferManager::new(pool_size, disk_manager.clone()));
    let log_manager = Arc::new(LogManager::new(
        disk_manager.clone(),
        LogConfig {
            log_buffer_size: TEST_LOG_BUFFER,
            flush_timeout: std::time::Duration::from_millis(50),
        },
    ));
    buffer_pool.set_log_manager(log_manager.clone());
    let lock_manager = Arc::new(LockManager::new(LockConfig::default()));
    let txn_manager = TransactionManager::new(lock_manager, log_manager.clone());
    Engine {
        disk_manager,
        buffer_pool,
        log_manager,
        txn_manager,
    }
}

/// Log a tuple insert the way a table heap would: append the record under
/// the transaction's LSN chain, apply it to the page, stamp the page LSN.
fn logged_insert(
    engine: &Engine,
    txn: &mut Transaction,
    rid: RecordId,
    tuple: &[u8],
) {
    let mut record = LogRecord::new(
        txn.id(),
        txn.prev_lsn(),
        LogPayload::Insert {
            rid,
            tuple: tuple.to_vec(),
        },
    );
    let lsn = engine.log_manager.append_log_record(&mut record).unwrap();
    txn.set_prev_lsn(lsn);

    let mut guard = engine.buffer_pool.fetch_page_write(rid.page_id).unwrap();
    let (mut page, _) = TablePageCodec::decode(guard.data()).unwrap();
    page.insert_tuple_at(rid.slot_num, tuple);
    page.header.lsn = lsn;
    let bytes = TablePageCodec::encode(&page);
    guard.data_mut().copy_from_slice(&bytes);
    guard.set_lsn(lsn);
    guard.mark_dirty();
}

fn logged_new_table_page(engine: &Engine, txn: &mut Transaction) -> i32 {
    let mut guard = engine.buffer_pool.new_page().unwrap();
    let page_id = guard.page_id();
    let mut record = LogRecord::new(
        txn.id(),
        txn.prev_lsn(),
        LogPayload::NewPage {
            prev_page_id: -1,
            page_id,
        },
    );
    let lsn = engine.log_manager.append_log_record(&mut record).unwrap();
    txn.set_prev_lsn(lsn);

    let mut page = TablePage::new(-1);
    page.header.lsn = lsn;
    let bytes = TablePageCodec::encode(&page);
    guard.data_mut().copy_from_slice(&bytes);
    guard.set_lsn(lsn);
    guard.mark_dirty();
    page_id
}

fn recover(engine: &Engine) -> LogRecovery {
    let mut recovery = LogRecovery::new(
        engine.disk_manager.clone(),
        engine.buffer_pool.clone(),
        engine.log_manager.clone(),
        TEST_LOG_BUFFER,
    );
    recovery.redo().unwrap();
    recovery.undo().unwrap();
    recovery
}

#[test]
fn test_committed_txn_survives_crash_loser_rolled_back() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("engine.db");

    let page_id = {
        let engine = open_engine(&db_path, 16);
        engine.log_manager.run_flush_thread();

        let mut t1 = engine.txn_manager.begin(TwoPhaseLocking::Strict).unwrap();
        let page_id = logged_new_table_page(&engine, &mut t1);
        logged_insert(&engine, &mut t1, RecordId::new(page_id, 0), b"alpha");
        engine.txn_manager.commit(&mut t1).unwrap();

        let mut t2 = engine.txn_manager.begin(TwoPhaseLocking::Strict).unwrap();
        logged_insert(&engine, &mut t2, RecordId::new(page_id, 1), b"beta");
        // crash before t2 commits: force the log down, drop the pool with
        // its dirty page unflushed
        engine.log_manager.flush().unwrap();
        engine.log_manager.stop_flush_thread().unwrap();
        page_id
    };

    let engine = open_engine(&db_path, 16);
    let recovery = recover(&engine);
    assert_eq!(recovery.active_transactions(), Vec::<i32>::new());

    let guard = engine.buffer_pool.fetch_page_read(page_id).unwrap();
    let (page, _) = TablePageCodec::decode(guard.data()).unwrap();
    assert_eq!(page.get_tuple(0), Some(b"alpha".as_slice()));
    assert_eq!(page.get_tuple(1), None, "loser insert must be rolled back");
}

#[test]
fn test_update_undo_restores_old_tuple() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("engine.db");

    let page_id = {
        let engine = open_engine(&db_path, 16);
        engine.log_manager.set_logging_enabled(true);

        let mut t1 = engine.txn_manager.begin(TwoPhaseLocking::Strict).unwrap();
        let page_id = logged_new_table_page(&engine, &mut t1);
        logged_insert(&engine, &mut t1, RecordId::new(page_id, 0), b"original");
        engine.txn_manager.commit(&mut t1).unwrap();

        // t2 updates the tuple but never commits
        let mut t2 = engine.txn_manager.begin(TwoPhaseLocking::Strict).unwrap();
        let rid = RecordId::new(page_id, 0);
        let mut record = LogRecord::new(
            t2.id(),
            t2.prev_lsn(),
            LogPayload::Update {
                rid,
                old_tuple: b"original".to_vec(),
                new_tuple: b"clobbered".to_vec(),
            },
        );
        let lsn = engine.log_manager.append_log_record(&mut record).unwrap();
        t2.set_prev_lsn(lsn);
        let mut guard = engine.buffer_pool.fetch_page_write(page_id).unwrap();
        let (mut page, _) = TablePageCodec::decode(guard.data()).unwrap();
        page.update_tuple(0, b"clobbered");
        page.header.lsn = lsn;
        let bytes = TablePageCodec::encode(&page);
        guard.data_mut().copy_from_slice(&bytes);
        guard.set_lsn(lsn);
        guard.mark_dirty();
        drop(guard);

        engine.log_manager.flush().unwrap();
        // crash: the clobbered page image even reaches disk
        engine.buffer_pool.flush_page(page_id).unwrap();
        page_id
    };

    let engine = open_engine(&db_path, 16);
    recover(&engine);

    let guard = engine.buffer_pool.fetch_page_read(page_id).unwrap();
    let (page, _) = TablePageCodec::decode(guard.data()).unwrap();
    assert_eq!(page.get_tuple(0), Some(b"original".as_slice()));
}

#[test]
fn test_force_wal_before_dirty_eviction() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("engine.db");
    // two frames: churning new pages forces eviction of the dirty one
    let engine = open_engine(&db_path, 2);
    engine.log_manager.set_logging_enabled(true);

    let mut t1 = engine.txn_manager.begin(TwoPhaseLocking::Strict).unwrap();
    let page_id = logged_new_table_page(&engine, &mut t1);
    logged_insert(&engine, &mut t1, RecordId::new(page_id, 0), b"payload");
    let page_lsn = t1.prev_lsn();
    // nothing flushed yet
    assert!(engine.log_manager.persistent_lsn() < page_lsn);

    // allocate until the dirty page gets evicted
    let _a = engine.buffer_pool.new_page().unwrap();
    let _b = engine.buffer_pool.new_page().unwrap();
    assert!(engine.buffer_pool.buffer_pool().lookup_frame(page_id).is_none());

    // force-write-ahead: by the time the page image hit disk, the log
    // covering it had to be durable
    assert!(engine.log_manager.persistent_lsn() >= page_lsn);
    let raw = engine.disk_manager.read_page(page_id).unwrap();
    let (page, _) = TablePageCodec::decode(&raw).unwrap();
    assert_eq!(page.get_tuple(0), Some(b"payload".as_slice()));
}
