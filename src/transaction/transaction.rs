use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use log::debug;

use crate::error::BurrowDBResult;
use crate::recovery::log_record::{LogPayload, LogRecord};
use crate::recovery::{LogManager, Lsn, INVALID_LSN};
use crate::storage::page::RecordId;
use crate::transaction::{LockManager, TransactionId};

pub const INVALID_TXN_ID: TransactionId = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Which two-phase-locking variant the transaction runs under. Strict 2PL
/// holds every lock until commit or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwoPhaseLocking {
    Regular,
    Strict,
}

/// Transaction ids are handed out in begin order: a smaller id is older,
/// which is what wait-die compares.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    protocol: TwoPhaseLocking,
    prev_lsn: Lsn,
    shared_lock_set: HashSet<RecordId>,
    exclusive_lock_set: HashSet<RecordId>,
}

impl Transaction {
    pub fn new(id: TransactionId, protocol: TwoPhaseLocking) -> Self {
        Self {
            id,
            state: TransactionState::Growing,
            protocol,
            prev_lsn: INVALID_LSN,
            shared_lock_set: HashSet::new(),
            exclusive_lock_set: HashSet::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    pub fn protocol(&self) -> TwoPhaseLocking {
        self.protocol
    }

    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn
    }

    pub fn set_prev_lsn(&mut self, lsn: Lsn) {
        self.prev_lsn = lsn;
    }

    pub fn shared_lock_set(&mut self) -> &mut HashSet<RecordId> {
        &mut self.shared_lock_set
    }

    pub fn exclusive_lock_set(&mut self) -> &mut HashSet<RecordId> {
        &mut self.exclusive_lock_set
    }

    pub fn holds_shared(&self, rid: &RecordId) -> bool {
        self.shared_lock_set.contains(rid)
    }

    pub fn holds_exclusive(&self, rid: &RecordId) -> bool {
        self.exclusive_lock_set.contains(rid)
    }
}

/// Hands out transaction ids, writes the BEGIN/COMMIT/ABORT log records,
/// and releases locks at transaction end. Undoing a loser's data changes is
/// recovery's job.
#[derive(Debug)]
pub struct TransactionManager {
    next_txn_id: AtomicI32,
    lock_manager: Arc<LockManager>,
    log_manager: Arc<LogManager>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>, log_manager: Arc<LogManager>) -> Self {
        Self {
            next_txn_id: AtomicI32::new(0),
            lock_manager,
            log_manager,
        }
    }

    pub fn begin(&self, protocol: TwoPhaseLocking) -> BurrowDBResult<Transaction> {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let mut txn = Transaction::new(id, protocol);
        if self.log_manager.is_logging_enabled() {
            let mut record = LogRecord::new(id, txn.prev_lsn(), LogPayload::Begin);
            let lsn = self.log_manager.append_log_record(&mut record)?;
            txn.set_prev_lsn(lsn);
        }
        debug!("txn {} began", id);
        Ok(txn)
    }

    pub fn commit(&self, txn: &mut Transaction) -> BurrowDBResult<()> {
        txn.set_state(TransactionState::Committed);
        if self.log_manager.is_logging_enabled() {
            let mut record = LogRecord::new(txn.id(), txn.prev_lsn(), LogPayload::Commit);
            let lsn = self.log_manager.append_log_record(&mut record)?;
            txn.set_prev_lsn(lsn);
            // Commit is only real once its record is durable.
            self.log_manager.flush_until(lsn)?;
        }
        self.release_all_locks(txn);
        debug!("txn {} committed", txn.id());
        Ok(())
    }

    pub fn abort(&self, txn: &mut Transaction) -> BurrowDBResult<()> {
        txn.set_state(TransactionState::Aborted);
        if self.log_manager.is_logging_enabled() {
            let mut record = LogRecord::new(txn.id(), txn.prev_lsn(), LogPayload::Abort);
            let lsn = self.log_manager.append_log_record(&mut record)?;
            txn.set_prev_lsn(lsn);
        }
        self.release_all_locks(txn);
        debug!("txn {} aborted", txn.id());
        Ok(())
    }

    fn release_all_locks(&self, txn: &mut Transaction) {
        let shared: Vec<RecordId> = txn.shared_lock_set().iter().copied().collect();
        let exclusive: Vec<RecordId> = txn.exclusive_lock_set().iter().copied().collect();
        for rid in shared.into_iter().chain(exclusive) {
            self.lock_manager.unlock(txn, rid);
        }
    }
}
