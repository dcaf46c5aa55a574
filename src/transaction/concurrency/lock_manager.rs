use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::debug;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};
use crate::transaction::concurrency::transaction_manager::TransactionManager;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Transaction {0} was aborted")]
    TransactionAborted(TxnId),

    #[error("Transaction {0} lost an upgrade race")]
    UpgradeConflict(TxnId),

    #[error("Transaction {0} holds no lock on the record")]
    LockNotHeld(TxnId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

/// Per-record request queue. Waiters block on the condition variable and
/// re-run their whole routine when woken; the queue state may have changed
/// arbitrarily in between.
struct LockRequestQueue {
    requests: VecDeque<LockRequest>,
    upgrading: Option<TxnId>,
    cv: Arc<Condvar>,
}

impl Default for LockRequestQueue {
    fn default() -> Self {
        Self {
            requests: VecDeque::new(),
            upgrading: None,
            cv: Arc::new(Condvar::new()),
        }
    }
}

type LockTable = HashMap<Rid, LockRequestQueue>;

/// Row-level lock manager: shared/exclusive locks with two-phase-locking
/// state tracking and wound-wait deadlock prevention. On a conflict the
/// older transaction always wins; a younger shared requester waits, a
/// younger exclusive requester dies.
///
/// One mutex guards the whole lock table; per-record condition variables
/// carry the waiters.
pub struct LockManager {
    txn_manager: Arc<TransactionManager>,
    lock_table: Mutex<LockTable>,
}

impl LockManager {
    pub fn new(txn_manager: Arc<TransactionManager>) -> Self {
        Self {
            txn_manager,
            lock_table: Mutex::new(HashMap::new()),
        }
    }

    /// Take a shared lock on a record. Younger exclusive holders are
    /// wounded; an older exclusive holder puts this transaction to sleep
    /// until the queue changes.
    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), LockError> {
        let mut table = self.lock_table.lock();
        loop {
            self.check_lock_preconditions(txn)?;
            if txn.is_shared_locked(rid) {
                return Ok(());
            }

            let queue = table.entry(rid).or_default();
            let mut wounded = false;
            let mut must_wait = false;
            let mut index = 0;
            while index < queue.requests.len() {
                let peer_id = queue.requests[index].txn_id;
                if peer_id == txn.id() {
                    index += 1;
                    continue;
                }
                let peer = match self.txn_manager.get(peer_id) {
                    Some(peer) => peer,
                    None => {
                        queue.requests.remove(index);
                        continue;
                    }
                };
                if peer_id > txn.id() && peer.is_exclusive_locked(rid) {
                    queue.requests.remove(index);
                    Self::wound(&peer, rid);
                    wounded = true;
                    continue;
                }
                if peer_id < txn.id() && peer.is_exclusive_locked(rid) {
                    must_wait = true;
                }
                index += 1;
            }

            let cv = queue.cv.clone();
            if wounded {
                cv.notify_all();
            }
            if must_wait {
                // queue the request so an older arrival can wound us while
                // we sleep
                Self::enqueue_request(queue, txn.id(), LockMode::Shared, false);
                cv.wait(&mut table);
                continue;
            }

            txn.set_state(TransactionState::Growing);
            Self::enqueue_request(queue, txn.id(), LockMode::Shared, true);
            txn.insert_shared_lock(rid);
            return Ok(());
        }
    }

    /// Take an exclusive lock on a record. Younger requesters of any mode
    /// are wounded; an older holder of any mode kills this transaction
    /// outright (it dies rather than waits).
    pub fn lock_exclusive(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), LockError> {
        let mut table = self.lock_table.lock();

        self.check_lock_preconditions(txn)?;
        if txn.is_exclusive_locked(rid) {
            return Ok(());
        }

        let queue = table.entry(rid).or_default();
        let mut wounded = false;
        let mut older_exists = false;
        let mut index = 0;
        while index < queue.requests.len() {
            let peer_id = queue.requests[index].txn_id;
            if peer_id == txn.id() {
                index += 1;
                continue;
            }
            let peer = match self.txn_manager.get(peer_id) {
                Some(peer) => peer,
                None => {
                    queue.requests.remove(index);
                    continue;
                }
            };
            if peer_id > txn.id() {
                queue.requests.remove(index);
                Self::wound(&peer, rid);
                wounded = true;
                continue;
            }
            older_exists = true;
            index += 1;
        }

        if wounded {
            queue.cv.notify_all();
        }
        if older_exists {
            txn.remove_shared_lock(rid);
            txn.remove_exclusive_lock(rid);
            txn.set_state(TransactionState::Aborted);
            return Err(LockError::TransactionAborted(txn.id()));
        }

        txn.set_state(TransactionState::Growing);
        Self::enqueue_request(queue, txn.id(), LockMode::Exclusive, true);
        txn.insert_exclusive_lock(rid);
        Ok(())
    }

    /// Upgrade a held shared lock to exclusive. Only one upgrade may be in
    /// flight per record; a second upgrader is aborted immediately.
    pub fn lock_upgrade(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), LockError> {
        let mut table = self.lock_table.lock();
        loop {
            if let Err(e) = self.check_lock_preconditions(txn) {
                Self::clear_upgrading(&mut table, rid, txn.id());
                return Err(e);
            }
            if txn.is_exclusive_locked(rid) {
                Self::clear_upgrading(&mut table, rid, txn.id());
                return Ok(());
            }

            let queue = table.entry(rid).or_default();
            match queue.upgrading {
                Some(other) if other != txn.id() => {
                    txn.set_state(TransactionState::Aborted);
                    return Err(LockError::UpgradeConflict(txn.id()));
                }
                _ => queue.upgrading = Some(txn.id()),
            }

            let mut wounded = false;
            let mut must_wait = false;
            let mut index = 0;
            while index < queue.requests.len() {
                let peer_id = queue.requests[index].txn_id;
                if peer_id == txn.id() {
                    index += 1;
                    continue;
                }
                let peer = match self.txn_manager.get(peer_id) {
                    Some(peer) => peer,
                    None => {
                        queue.requests.remove(index);
                        continue;
                    }
                };
                if peer_id > txn.id() {
                    queue.requests.remove(index);
                    Self::wound(&peer, rid);
                    wounded = true;
                    continue;
                }
                must_wait = true;
                index += 1;
            }

            let cv = queue.cv.clone();
            if wounded {
                cv.notify_all();
            }
            if must_wait {
                cv.wait(&mut table);
                continue;
            }

            if let Some(request) = queue.requests.iter_mut().find(|r| r.txn_id == txn.id()) {
                request.mode = LockMode::Exclusive;
                request.granted = true;
            }
            queue.upgrading = None;
            txn.set_state(TransactionState::Growing);
            txn.remove_shared_lock(rid);
            txn.insert_exclusive_lock(rid);
            return Ok(());
        }
    }

    /// Release a lock on a record. Under isolation stricter than
    /// READ COMMITTED this moves a live transaction into its shrinking
    /// phase. Remaining waiters are woken to re-run their routines.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), LockError> {
        let mut table = self.lock_table.lock();

        let queue = match table.get_mut(&rid) {
            Some(queue) => queue,
            None => return Err(LockError::LockNotHeld(txn.id())),
        };
        let position = match queue.requests.iter().position(|r| r.txn_id == txn.id()) {
            Some(position) => position,
            None => return Err(LockError::LockNotHeld(txn.id())),
        };

        if txn.isolation_level() != IsolationLevel::ReadCommitted
            && !matches!(
                txn.state(),
                TransactionState::Aborted | TransactionState::Committed
            )
        {
            txn.set_state(TransactionState::Shrinking);
        }

        let request = queue.requests.remove(position);
        match request.map(|r| r.mode) {
            Some(LockMode::Shared) => txn.remove_shared_lock(rid),
            _ => txn.remove_exclusive_lock(rid),
        }
        if !queue.requests.is_empty() {
            queue.cv.notify_all();
        }

        Ok(())
    }

    /// Shared up-front rejections: an aborted transaction stays aborted, a
    /// READ UNCOMMITTED transaction may not lock, and locking during the
    /// shrinking phase violates 2PL.
    fn check_lock_preconditions(&self, txn: &Arc<Transaction>) -> Result<(), LockError> {
        if txn.state() == TransactionState::Aborted {
            return Err(LockError::TransactionAborted(txn.id()));
        }
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return Err(LockError::TransactionAborted(txn.id()));
        }
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(LockError::TransactionAborted(txn.id()));
        }
        Ok(())
    }

    /// Abort a younger conflicting transaction: drop its claim on the record
    /// and mark it aborted. The caller removes its queue entry and wakes the
    /// queue so a sleeping victim observes the abort.
    fn wound(peer: &Arc<Transaction>, rid: Rid) {
        debug!("wounding transaction {} on record {}", peer.id(), rid);
        peer.remove_shared_lock(rid);
        peer.remove_exclusive_lock(rid);
        peer.set_state(TransactionState::Aborted);
    }

    fn enqueue_request(queue: &mut LockRequestQueue, txn_id: TxnId, mode: LockMode, granted: bool) {
        if let Some(request) = queue.requests.iter_mut().find(|r| r.txn_id == txn_id) {
            request.granted = granted;
        } else {
            queue.requests.push_back(LockRequest {
                txn_id,
                mode,
                granted,
            });
        }
    }

    fn clear_upgrading(table: &mut LockTable, rid: Rid, txn_id: TxnId) {
        if let Some(queue) = table.get_mut(&rid) {
            if queue.upgrading == Some(txn_id) {
                queue.upgrading = None;
            }
        }
    }
}
