//! Transaction manager + lock manager integration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use crate::config::{LockConfig, LogConfig};
use crate::recovery::LogManager;
use crate::storage::disk_manager::DiskManager;
use crate::storage::page::RecordId;
use crate::transaction::{
    LockManager, TransactionManager, TransactionState, TwoPhaseLocking,
};

fn setup() -> (TempDir, Arc<LockManager>, TransactionManager) {
    let temp_dir = TempDir::new().unwrap();
    let disk_manager = Arc::new(DiskManager::try_new(temp_dir.path().join("txn.db")).unwrap());
    let log_manager = Arc::new(LogManager::new(disk_manager, LogConfig::default()));
    let lock_manager = Arc::new(LockManager::new(LockConfig {
        wait_timeout: Duration::from_millis(300),
    }));
    let txn_manager = TransactionManager::new(lock_manager.clone(), log_manager);
    (temp_dir, lock_manager, txn_manager)
}

#[test]
fn test_txn_ids_are_begin_ordered() {
    let (_tmp, _lock_manager, txn_manager) = setup();
    let t0 = txn_manager.begin(TwoPhaseLocking::Regular).unwrap();
    let t1 = txn_manager.begin(TwoPhaseLocking::Regular).unwrap();
    assert!(t0.id() < t1.id());
    assert_eq!(t0.state(), TransactionState::Growing);
}

#[test]
fn test_commit_releases_locks_to_waiter() {
    let (_tmp, lock_manager, txn_manager) = setup();
    let rid = RecordId::new(5, 0);

    // begin the older transaction first so it may wait on the younger holder
    let mut older = txn_manager.begin(TwoPhaseLocking::Strict).unwrap();
    let mut younger = txn_manager.begin(TwoPhaseLocking::Strict).unwrap();
    assert!(lock_manager.lock_exclusive(&mut younger, rid));

    let acquired = Arc::new(AtomicBool::new(false));
    let acquired_clone = acquired.clone();
    let lock_manager_clone = lock_manager.clone();
    let handle = thread::spawn(move || {
        let ok = lock_manager_clone.lock_exclusive(&mut older, rid);
        acquired_clone.store(ok, Ordering::SeqCst);
        older
    });

    thread::sleep(Duration::from_millis(50));
    assert!(!acquired.load(Ordering::SeqCst));

    // commit releases the younger holder's lock and wakes the waiter
    txn_manager.commit(&mut younger).unwrap();
    assert!(younger.exclusive_lock_set().is_empty());

    let older = handle.join().unwrap();
    assert!(acquired.load(Ordering::SeqCst));
    assert!(older.holds_exclusive(&rid));
}

#[test]
fn test_abort_releases_locks() {
    let (_tmp, lock_manager, txn_manager) = setup();
    let rid = RecordId::new(6, 0);

    let mut t0 = txn_manager.begin(TwoPhaseLocking::Strict).unwrap();
    assert!(lock_manager.lock_shared(&mut t0, rid));
    txn_manager.abort(&mut t0).unwrap();
    assert_eq!(t0.state(), TransactionState::Aborted);
    assert!(t0.shared_lock_set().is_empty());

    // the rid is free again
    let mut t1 = txn_manager.begin(TwoPhaseLocking::Strict).unwrap();
    assert!(lock_manager.lock_exclusive(&mut t1, rid));
    txn_manager.commit(&mut t1).unwrap();
}

#[test]
fn test_wait_die_victim_observes_abort() {
    let (_tmp, lock_manager, txn_manager) = setup();
    let rid = RecordId::new(7, 0);

    let mut older = txn_manager.begin(TwoPhaseLocking::Strict).unwrap();
    let mut younger = txn_manager.begin(TwoPhaseLocking::Strict).unwrap();
    assert!(lock_manager.lock_exclusive(&mut older, rid));

    // the younger requester dies instead of waiting on the older holder
    assert!(!lock_manager.lock_shared(&mut younger, rid));
    assert_eq!(younger.state(), TransactionState::Aborted);
    txn_manager.abort(&mut younger).unwrap();
    txn_manager.commit(&mut older).unwrap();
}

#[test]
fn test_strict_txn_keeps_locks_until_commit() {
    let (_tmp, lock_manager, txn_manager) = setup();
    let rid = RecordId::new(8, 0);

    let mut t = txn_manager.begin(TwoPhaseLocking::Strict).unwrap();
    assert!(lock_manager.lock_exclusive(&mut t, rid));
    // early release is a protocol violation
    assert!(!lock_manager.unlock(&mut t, rid));
    assert_eq!(t.state(), TransactionState::Aborted);
    txn_manager.abort(&mut t).unwrap();
    assert!(t.exclusive_lock_set().is_empty());
}
