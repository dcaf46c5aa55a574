use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState,
};
use crate::transaction::wal::{LogManager, LogRecordType};

/// Transaction manager - creates transactions with monotonically increasing
/// ids and tracks the active ones so the lock manager can resolve queue
/// entries back to their owners.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
    log_manager: Option<Arc<LogManager>>,
}

impl TransactionManager {
    pub fn new(log_manager: Option<Arc<LogManager>>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(0),
            active_transactions: Mutex::new(HashMap::new()),
            log_manager,
        }
    }

    /// Begin a new transaction
    pub fn begin(&self, isolation_level: IsolationLevel) -> Result<Arc<Transaction>, TransactionError> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));

        if let Some(log_manager) = &self.log_manager {
            let lsn = log_manager
                .append_record(txn_id, 0, LogRecordType::Begin)
                .map_err(|e| TransactionError::LogError(e.to_string()))?;
            txn.set_last_lsn(lsn);
        }

        self.active_transactions.lock().insert(txn_id, txn.clone());
        Ok(txn)
    }

    /// Commit a transaction and retire it from the active set
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        match txn.state() {
            TransactionState::Committed | TransactionState::Aborted => {
                return Err(TransactionError::InvalidState(txn.id()));
            }
            _ => {}
        }

        if let Some(log_manager) = &self.log_manager {
            let lsn = log_manager
                .append_record(txn.id(), txn.last_lsn(), LogRecordType::Commit)
                .map_err(|e| TransactionError::LogError(e.to_string()))?;
            txn.set_last_lsn(lsn);
        }

        txn.set_state(TransactionState::Committed);
        self.active_transactions.lock().remove(&txn.id());
        Ok(())
    }

    /// Abort a transaction and retire it from the active set
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        if txn.state() == TransactionState::Committed {
            return Err(TransactionError::InvalidState(txn.id()));
        }

        if let Some(log_manager) = &self.log_manager {
            let lsn = log_manager
                .append_record(txn.id(), txn.last_lsn(), LogRecordType::Abort)
                .map_err(|e| TransactionError::LogError(e.to_string()))?;
            txn.set_last_lsn(lsn);
        }

        txn.set_state(TransactionState::Aborted);
        self.active_transactions.lock().remove(&txn.id());
        Ok(())
    }

    /// Look up an active transaction by id
    pub fn get(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    /// Ids of all transactions that are still active
    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic_from_zero() {
        let manager = TransactionManager::new(None);
        let t0 = manager.begin(IsolationLevel::ReadCommitted).unwrap();
        let t1 = manager.begin(IsolationLevel::RepeatableRead).unwrap();
        assert_eq!(t0.id(), 0);
        assert_eq!(t1.id(), 1);
        assert_eq!(manager.active_transaction_ids().len(), 2);
    }

    #[test]
    fn test_commit_retires_transaction() {
        let manager = TransactionManager::new(None);
        let txn = manager.begin(IsolationLevel::ReadCommitted).unwrap();

        manager.commit(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(manager.get(txn.id()).is_none());

        // a finished transaction cannot commit again
        assert!(manager.commit(&txn).is_err());
    }

    #[test]
    fn test_lifecycle_reaches_the_log() {
        use tempfile::NamedTempFile;

        let file = NamedTempFile::new().unwrap();
        let log_manager = Arc::new(LogManager::new(file.path()).unwrap());
        let manager = TransactionManager::new(Some(log_manager.clone()));

        let txn = manager.begin(IsolationLevel::ReadCommitted).unwrap();
        let begin_lsn = txn.last_lsn();
        assert!(begin_lsn > 0);

        manager.commit(&txn).unwrap();
        assert!(txn.last_lsn() > begin_lsn);
        assert_eq!(log_manager.next_lsn(), txn.last_lsn() + 1);
    }

    #[test]
    fn test_abort_retires_transaction() {
        let manager = TransactionManager::new(None);
        let txn = manager.begin(IsolationLevel::ReadCommitted).unwrap();

        manager.abort(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert!(manager.get(txn.id()).is_none());
    }
}
