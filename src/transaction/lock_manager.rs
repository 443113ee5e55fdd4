use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::time::Duration;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::config::LockConfig;
use crate::storage::page::RecordId;
use crate::transaction::{Transaction, TransactionId, TransactionState, TwoPhaseLocking};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct Waiter {
    txn_id: TransactionId,
    mode: LockMode,
    // One-shot grant signal; the granter tolerates a receiver that already
    // timed out and walked away.
    grant_tx: SyncSender<()>,
}

#[derive(Debug)]
struct WaitList {
    mode: LockMode,
    granted: HashSet<TransactionId>,
    queue: VecDeque<Waiter>,
}

impl WaitList {
    fn empty() -> Self {
        Self {
            mode: LockMode::Shared,
            granted: HashSet::new(),
            queue: VecDeque::new(),
        }
    }
}

/// Tuple-granularity shared/exclusive lock table under one mutex, enforcing
/// two-phase locking with wait-die deadlock avoidance. Waiters suspend on a
/// one-shot channel outside the mutex; `WAIT_TIMEOUT` bounds every wait and
/// expiry aborts the waiter.
#[derive(Debug)]
pub struct LockManager {
    lock_table: Mutex<HashMap<RecordId, WaitList>>,
    wait_timeout: Duration,
}

impl LockManager {
    pub fn new(config: LockConfig) -> Self {
        Self {
            lock_table: Mutex::new(HashMap::new()),
            wait_timeout: config.wait_timeout,
        }
    }

    pub fn lock_shared(&self, txn: &mut Transaction, rid: RecordId) -> bool {
        if !self.check_acquirable(txn) {
            return false;
        }
        if txn.holds_shared(&rid) || txn.holds_exclusive(&rid) {
            return true;
        }

        let mut table = self.lock_table.lock();
        let entry = table.entry(rid).or_insert_with(WaitList::empty);
        if entry.granted.is_empty() && entry.queue.is_empty() {
            entry.mode = LockMode::Shared;
            entry.granted.insert(txn.id());
            drop(table);
            txn.shared_lock_set().insert(rid);
            return true;
        }

        // Share the grant only when nothing incompatible is held or queued
        // ahead of us.
        if entry.mode == LockMode::Shared && entry.queue.is_empty() {
            entry.granted.insert(txn.id());
            drop(table);
            txn.shared_lock_set().insert(rid);
            return true;
        }

        if self.dies_by_wait_die(txn, entry) {
            return false;
        }
        let rx = {
            let (tx, rx) = sync_channel(1);
            entry.queue.push_back(Waiter {
                txn_id: txn.id(),
                mode: LockMode::Shared,
                grant_tx: tx,
            });
            rx
        };
        drop(table);
        self.await_grant(txn, rid, rx, LockMode::Shared)
    }

    pub fn lock_exclusive(&self, txn: &mut Transaction, rid: RecordId) -> bool {
        if !self.check_acquirable(txn) {
            return false;
        }
        if txn.holds_exclusive(&rid) {
            return true;
        }
        if txn.holds_shared(&rid) {
            return self.lock_upgrade(txn, rid);
        }

        let mut table = self.lock_table.lock();
        let entry = table.entry(rid).or_insert_with(WaitList::empty);
        if entry.granted.is_empty() && entry.queue.is_empty() {
            entry.mode = LockMode::Exclusive;
            entry.granted.insert(txn.id());
            drop(table);
            txn.exclusive_lock_set().insert(rid);
            return true;
        }

        if self.dies_by_wait_die(txn, entry) {
            return false;
        }
        let rx = {
            let (tx, rx) = sync_channel(1);
            entry.queue.push_back(Waiter {
                txn_id: txn.id(),
                mode: LockMode::Exclusive,
                grant_tx: tx,
            });
            rx
        };
        drop(table);
        self.await_grant(txn, rid, rx, LockMode::Exclusive)
    }

    /// Upgrade a held shared lock to exclusive as one atomic step under the
    /// table mutex: the shared grant is surrendered and the exclusive one
    /// either taken immediately or queued at the head.
    pub fn lock_upgrade(&self, txn: &mut Transaction, rid: RecordId) -> bool {
        if !self.check_acquirable(txn) {
            return false;
        }

        let mut table = self.lock_table.lock();
        let Some(entry) = table.get_mut(&rid) else {
            return false;
        };
        if entry.mode != LockMode::Shared || !entry.granted.contains(&txn.id()) {
            return false;
        }

        entry.granted.remove(&txn.id());
        if entry.granted.is_empty() {
            entry.mode = LockMode::Exclusive;
            entry.granted.insert(txn.id());
            drop(table);
            txn.shared_lock_set().remove(&rid);
            txn.exclusive_lock_set().insert(rid);
            return true;
        }

        if self.dies_by_wait_die(txn, entry) {
            txn.shared_lock_set().remove(&rid);
            return false;
        }
        // Upgraders go to the head of the queue.
        let rx = {
            let (tx, rx) = sync_channel(1);
            entry.queue.push_front(Waiter {
                txn_id: txn.id(),
                mode: LockMode::Exclusive,
                grant_tx: tx,
            });
            rx
        };
        drop(table);
        txn.shared_lock_set().remove(&rid);
        self.await_grant(txn, rid, rx, LockMode::Exclusive)
    }

    pub fn unlock(&self, txn: &mut Transaction, rid: RecordId) -> bool {
        if txn.protocol() == TwoPhaseLocking::Strict
            && !matches!(
                txn.state(),
                TransactionState::Committed | TransactionState::Aborted
            )
        {
            txn.set_state(TransactionState::Aborted);
            return false;
        }

        let mut table = self.lock_table.lock();
        let Some(entry) = table.get_mut(&rid) else {
            debug_assert!(false, "unlock of rid {} with no lock entry", rid);
            return false;
        };
        if !entry.granted.remove(&txn.id()) {
            debug_assert!(false, "txn {} unlocking unheld rid {}", txn.id(), rid);
            return false;
        }
        let held_mode = entry.mode;

        // Under regular 2PL the first unlock ends the growing phase.
        if txn.protocol() == TwoPhaseLocking::Regular
            && txn.state() == TransactionState::Growing
        {
            txn.set_state(TransactionState::Shrinking);
        }

        let mut to_signal = None;
        if entry.granted.is_empty() {
            if let Some(waiter) = entry.queue.pop_front() {
                entry.mode = waiter.mode;
                entry.granted.insert(waiter.txn_id);
                to_signal = Some(waiter);
            } else {
                table.remove(&rid);
            }
        }
        drop(table);

        match held_mode {
            LockMode::Shared => txn.shared_lock_set().remove(&rid),
            LockMode::Exclusive => txn.exclusive_lock_set().remove(&rid),
        };
        if let Some(waiter) = to_signal {
            // Signal after the mutex is released; a missed notify just
            // means the waiter timed out and will find itself granted.
            let _ = waiter.grant_tx.try_send(());
        }
        true
    }

    fn check_acquirable(&self, txn: &mut Transaction) -> bool {
        match txn.state() {
            TransactionState::Shrinking => {
                // 2PL violation: no acquisitions once shrinking began.
                txn.set_state(TransactionState::Aborted);
                false
            }
            TransactionState::Committed | TransactionState::Aborted => false,
            TransactionState::Growing => true,
        }
    }

    /// Wait-die: an older requester may wait; one younger than the youngest
    /// (max) granted holder dies immediately.
    fn dies_by_wait_die(&self, txn: &mut Transaction, entry: &WaitList) -> bool {
        let Some(youngest_holder) = entry.granted.iter().max().copied() else {
            return false;
        };
        if txn.id() > youngest_holder {
            debug!(
                "wait-die: txn {} dies waiting behind txn {}",
                txn.id(),
                youngest_holder
            );
            txn.set_state(TransactionState::Aborted);
            true
        } else {
            false
        }
    }

    fn await_grant(
        &self,
        txn: &mut Transaction,
        rid: RecordId,
        rx: std::sync::mpsc::Receiver<()>,
        mode: LockMode,
    ) -> bool {
        if rx.recv_timeout(self.wait_timeout).is_ok() {
            self.record_grant(txn, rid, mode);
            return true;
        }

        // Timed out; withdraw from the queue unless the grant raced in.
        let mut table = self.lock_table.lock();
        if let Some(entry) = table.get_mut(&rid) {
            if entry.granted.contains(&txn.id()) {
                drop(table);
                self.record_grant(txn, rid, mode);
                return true;
            }
            entry.queue.retain(|waiter| waiter.txn_id != txn.id());
            if entry.granted.is_empty() && entry.queue.is_empty() {
                table.remove(&rid);
            }
        }
        drop(table);
        warn!("txn {} lock wait on {} timed out", txn.id(), rid);
        txn.set_state(TransactionState::Aborted);
        false
    }

    fn record_grant(&self, txn: &mut Transaction, rid: RecordId, mode: LockMode) {
        match mode {
            LockMode::Shared => txn.shared_lock_set().insert(rid),
            LockMode::Exclusive => txn.exclusive_lock_set().insert(rid),
        };
    }
}
