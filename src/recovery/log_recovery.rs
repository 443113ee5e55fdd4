use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};

use crate::buffer::{BufferManager, WritePageGuard};
use crate::error::{BurrowDBError, BurrowDBResult};
use crate::recovery::log_record::{LogPayload, LogRecord, LogRecordCodec};
use crate::recovery::{LogManager, Lsn};
use crate::storage::codec::TablePageCodec;
use crate::storage::disk_manager::DiskManager;
use crate::storage::page::TablePage;
use crate::transaction::TransactionId;

/// ARIES-style restart: `redo` scans the whole log forward rebuilding page
/// state and the loser table, `undo` walks each loser's `prev_lsn` chain
/// backwards applying inverses. Logging is disabled while either pass runs
/// and re-enabled when recovery completes.
pub struct LogRecovery {
    disk_manager: Arc<DiskManager>,
    buffer_pool: Arc<BufferManager>,
    log_manager: Arc<LogManager>,
    log_buffer_size: usize,
    offset: u64,
    active_txn: HashMap<TransactionId, Lsn>,
    lsn_mapping: HashMap<Lsn, u64>,
}

impl LogRecovery {
    pub fn new(
        disk_manager: Arc<DiskManager>,
        buffer_pool: Arc<BufferManager>,
        log_manager: Arc<LogManager>,
        log_buffer_size: usize,
    ) -> Self {
        Self {
            disk_manager,
            buffer_pool,
            log_manager,
            log_buffer_size,
            offset: 0,
            active_txn: HashMap::new(),
            lsn_mapping: HashMap::new(),
        }
    }

    /// Transactions still active at the end of the redo scan (the losers).
    pub fn active_transactions(&self) -> Vec<TransactionId> {
        let mut txns: Vec<TransactionId> = self.active_txn.keys().copied().collect();
        txns.sort_unstable();
        txns
    }

    /// Forward scan from the start of the log, replaying every record whose
    /// page is older than it. A record cut off at the buffer end refills
    /// from its own offset; an undecodable head ends the scan cleanly.
    pub fn redo(&mut self) -> BurrowDBResult<()> {
        self.log_manager.set_logging_enabled(false);
        self.offset = 0;
        self.active_txn.clear();
        self.lsn_mapping.clear();

        let mut buffer = vec![0u8; self.log_buffer_size];
        while self.disk_manager.read_log(&mut buffer, self.offset)? {
            let mut pos = 0usize;
            loop {
                match LogRecordCodec::decode(&buffer[pos..])? {
                    Some((record, consumed)) => {
                        match record.payload {
                            LogPayload::Commit | LogPayload::Abort => {
                                self.active_txn.remove(&record.txn_id);
                            }
                            _ => {
                                self.active_txn.insert(record.txn_id, record.lsn);
                            }
                        }
                        self.lsn_mapping.insert(record.lsn, self.offset + pos as u64);
                        self.apply_redo(&record)?;
                        pos += consumed;
                    }
                    None => {
                        if pos == 0 {
                            // nothing decodable at the head of a fresh
                            // chunk: the log ends here
                            debug!("redo scan stops at offset {}", self.offset);
                            return Ok(());
                        }
                        break;
                    }
                }
            }
            // refill from the first byte that did not decode
            self.offset += pos as u64;
        }
        Ok(())
    }

    /// Roll back every loser by following its `prev_lsn` chain down to its
    /// BEGIN record. Re-enables logging when done.
    pub fn undo(&mut self) -> BurrowDBResult<()> {
        self.log_manager.set_logging_enabled(false);
        let losers = self.active_transactions();
        let mut buffer = vec![0u8; self.log_buffer_size];

        for txn_id in losers {
            let mut lsn = self.active_txn[&txn_id];
            loop {
                let Some(offset) = self.lsn_mapping.get(&lsn).copied() else {
                    warn!("undo: lsn {} of txn {} not in the scanned log", lsn, txn_id);
                    break;
                };
                if !self.disk_manager.read_log(&mut buffer, offset)? {
                    return Err(BurrowDBError::Internal(format!(
                        "undo: cannot re-read log at offset {}",
                        offset
                    )));
                }
                let Some((record, _)) = LogRecordCodec::decode(&buffer)? else {
                    return Err(BurrowDBError::Internal(format!(
                        "undo: undecodable record at offset {}",
                        offset
                    )));
                };
                debug_assert_eq!(record.lsn, lsn);
                if matches!(record.payload, LogPayload::Begin) {
                    break;
                }
                self.apply_undo(&record)?;
                lsn = record.prev_lsn;
            }
            debug!("undo: txn {} rolled back", txn_id);
        }

        self.active_txn.clear();
        // recovery is complete; the engine logs normally again
        self.log_manager.set_logging_enabled(true);
        Ok(())
    }

    fn apply_redo(&self, record: &LogRecord) -> BurrowDBResult<()> {
        match &record.payload {
            LogPayload::Begin | LogPayload::Commit | LogPayload::Abort => Ok(()),
            LogPayload::NewPage {
                prev_page_id,
                page_id,
            } => {
                let mut guard = self.buffer_pool.fetch_page_write(*page_id)?;
                let mut page = match TablePageCodec::decode(guard.data()) {
                    Ok((page, _)) => page,
                    // an undecodable image has never been initialized
                    Err(_) => TablePage::new(*prev_page_id),
                };
                // a page image that already carries this LSN (or a newer
                // one) absorbed the change before the crash
                if page.header.lsn >= record.lsn {
                    return Ok(());
                }
                page.init(*prev_page_id);
                page.header.lsn = record.lsn;
                self.write_table_page(&mut guard, &page);
                Ok(())
            }
            LogPayload::Insert { rid, tuple } => {
                self.redo_table_op(record, rid.page_id, |page| {
                    page.insert_tuple_at(rid.slot_num, tuple);
                })
            }
            LogPayload::MarkDelete { rid, .. } => self.redo_table_op(record, rid.page_id, |page| {
                page.mark_delete(rid.slot_num);
            }),
            LogPayload::ApplyDelete { rid, .. } => {
                self.redo_table_op(record, rid.page_id, |page| {
                    page.apply_delete(rid.slot_num);
                })
            }
            LogPayload::RollbackDelete { rid, .. } => {
                self.redo_table_op(record, rid.page_id, |page| {
                    page.rollback_delete(rid.slot_num);
                })
            }
            LogPayload::Update { rid, new_tuple, .. } => {
                self.redo_table_op(record, rid.page_id, |page| {
                    page.update_tuple(rid.slot_num, new_tuple);
                })
            }
        }
    }

    fn redo_table_op<F>(
        &self,
        record: &LogRecord,
        page_id: crate::buffer::PageId,
        apply: F,
    ) -> BurrowDBResult<()>
    where
        F: FnOnce(&mut TablePage),
    {
        let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
        let (mut page, _) = TablePageCodec::decode(guard.data())?;
        if page.header.lsn >= record.lsn {
            return Ok(());
        }
        apply(&mut page);
        page.header.lsn = record.lsn;
        self.write_table_page(&mut guard, &page);
        Ok(())
    }

    /// Apply the inverse of a loser's change. The effect is on the page
    /// exactly when the page's LSN has caught up to the record, so the
    /// inverse applies under `page.lsn >= record.lsn`; the page LSN itself
    /// is left alone (no compensation records are written).
    fn apply_undo(&self, record: &LogRecord) -> BurrowDBResult<()> {
        let (rid, apply): (_, Box<dyn FnOnce(&mut TablePage)>) = match &record.payload {
            LogPayload::Insert { rid, .. } => {
                let slot = rid.slot_num;
                (rid, Box::new(move |page| {
                    page.apply_delete(slot);
                }))
            }
            LogPayload::MarkDelete { rid, .. } => {
                let slot = rid.slot_num;
                (rid, Box::new(move |page| {
                    page.rollback_delete(slot);
                }))
            }
            LogPayload::Update { rid, old_tuple, .. } => {
                let slot = rid.slot_num;
                let old_tuple = old_tuple.clone();
                (rid, Box::new(move |page| {
                    page.update_tuple(slot, &old_tuple);
                }))
            }
            // nothing to compensate for the rest
            _ => return Ok(()),
        };

        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
        let (mut page, _) = TablePageCodec::decode(guard.data())?;
        if page.header.lsn < record.lsn {
            return Ok(());
        }
        apply(&mut page);
        self.write_table_page(&mut guard, &page);
        Ok(())
    }

    fn write_table_page(&self, guard: &mut WritePageGuard, page: &TablePage) {
        let bytes = TablePageCodec::encode(page);
        guard.data_mut().copy_from_slice(&bytes);
        guard.set_lsn(page.header.lsn);
        guard.mark_dirty();
    }
}
