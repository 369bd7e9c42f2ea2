use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use parking_lot::Mutex;

use crate::common::types::{Rid, TxnId};
use super::lock_manager::LockManager;
use super::transaction::{IsolationLevel, Transaction, TransactionError, TransactionState};

/// Transaction manager - creates transactions, tracks the active set, and
/// tears their locks down on commit or abort. Ids are monotone, so a higher
/// id always means a younger transaction.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Begin a new transaction
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, txn.clone());
        txn
    }

    /// Commit a transaction, releasing everything it holds
    pub fn commit(&self, txn_id: TxnId) -> Result<(), TransactionError> {
        let txn = self
            .active_transactions
            .lock()
            .remove(&txn_id)
            .ok_or(TransactionError::NotFound(txn_id))?;

        txn.set_state(TransactionState::Committed);
        self.release_all_locks(&txn);
        Ok(())
    }

    /// Abort a transaction, releasing everything it holds
    pub fn abort(&self, txn_id: TxnId) -> Result<(), TransactionError> {
        let txn = self
            .active_transactions
            .lock()
            .remove(&txn_id)
            .ok_or(TransactionError::NotFound(txn_id))?;

        txn.set_state(TransactionState::Aborted);
        self.release_all_locks(&txn);
        Ok(())
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }

    fn release_all_locks(&self, txn: &Arc<Transaction>) {
        // Snapshot first: unlock() takes the same lock-set mutexes
        let held: Vec<Rid> = {
            let shared = txn.shared_lock_set();
            let exclusive = txn.exclusive_lock_set();
            shared.iter().chain(exclusive.iter()).copied().collect()
        };
        for rid in held {
            self.lock_manager.unlock(txn, rid);
        }
    }
}
