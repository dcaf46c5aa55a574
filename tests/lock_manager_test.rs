use anyhow::Result;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use burrowdb::transaction::concurrency::{
    IsolationLevel, LockError, LockManager, TransactionManager, TransactionState,
};

fn create_lock_manager() -> (Arc<TransactionManager>, LockManager) {
    let txn_manager = Arc::new(TransactionManager::new(None));
    let lock_manager = LockManager::new(txn_manager.clone());
    (txn_manager, lock_manager)
}

#[test]
fn test_shared_locks_coexist() -> Result<()> {
    let (txn_manager, lock_manager) = create_lock_manager();
    let t0 = txn_manager.begin(IsolationLevel::RepeatableRead)?;
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead)?;

    lock_manager.lock_shared(&t0, 1).unwrap();
    lock_manager.lock_shared(&t1, 1).unwrap();
    assert!(t0.is_shared_locked(1));
    assert!(t1.is_shared_locked(1));
    assert_eq!(t0.state(), TransactionState::Growing);

    // re-locking an already held record is a no-op
    lock_manager.lock_shared(&t0, 1).unwrap();

    lock_manager.unlock(&t0, 1).unwrap();
    lock_manager.unlock(&t1, 1).unwrap();
    assert_eq!(t0.state(), TransactionState::Shrinking);
    assert!(!t0.is_shared_locked(1));

    Ok(())
}

#[test]
fn test_read_uncommitted_may_not_take_shared_locks() -> Result<()> {
    let (txn_manager, lock_manager) = create_lock_manager();
    let t0 = txn_manager.begin(IsolationLevel::ReadUncommitted)?;

    assert!(matches!(
        lock_manager.lock_shared(&t0, 1),
        Err(LockError::TransactionAborted(_))
    ));
    assert_eq!(t0.state(), TransactionState::Aborted);

    Ok(())
}

#[test]
fn test_no_new_locks_after_shrinking() -> Result<()> {
    let (txn_manager, lock_manager) = create_lock_manager();
    let t0 = txn_manager.begin(IsolationLevel::RepeatableRead)?;

    lock_manager.lock_shared(&t0, 1).unwrap();
    lock_manager.unlock(&t0, 1).unwrap();
    assert_eq!(t0.state(), TransactionState::Shrinking);

    // 2PL: the growing phase is over
    assert!(matches!(
        lock_manager.lock_shared(&t0, 2),
        Err(LockError::TransactionAborted(_))
    ));
    assert_eq!(t0.state(), TransactionState::Aborted);

    Ok(())
}

#[test]
fn test_read_committed_unlock_keeps_growing() -> Result<()> {
    let (txn_manager, lock_manager) = create_lock_manager();
    let t0 = txn_manager.begin(IsolationLevel::ReadCommitted)?;

    lock_manager.lock_shared(&t0, 1).unwrap();
    lock_manager.unlock(&t0, 1).unwrap();
    assert_eq!(t0.state(), TransactionState::Growing);

    // early release under READ COMMITTED does not end the growing phase
    lock_manager.lock_shared(&t0, 2).unwrap();
    lock_manager.unlock(&t0, 2).unwrap();

    Ok(())
}

#[test]
fn test_unlock_requires_a_held_lock() -> Result<()> {
    let (txn_manager, lock_manager) = create_lock_manager();
    let t0 = txn_manager.begin(IsolationLevel::RepeatableRead)?;

    assert!(matches!(
        lock_manager.unlock(&t0, 1),
        Err(LockError::LockNotHeld(_))
    ));
    // a failed unlock must not push the transaction into shrinking
    assert_eq!(t0.state(), TransactionState::Growing);

    Ok(())
}

#[test]
fn test_younger_exclusive_requester_dies() -> Result<()> {
    let (txn_manager, lock_manager) = create_lock_manager();
    let t0 = txn_manager.begin(IsolationLevel::RepeatableRead)?;
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead)?;

    lock_manager.lock_shared(&t0, 1).unwrap();

    // wound-wait: the younger exclusive requester aborts rather than waits
    assert!(matches!(
        lock_manager.lock_exclusive(&t1, 1),
        Err(LockError::TransactionAborted(_))
    ));
    assert_eq!(t1.state(), TransactionState::Aborted);
    assert_eq!(t0.state(), TransactionState::Growing);
    assert!(t0.is_shared_locked(1));

    Ok(())
}

#[test]
fn test_older_exclusive_wounds_holder_and_waiter() -> Result<()> {
    let (txn_manager, lock_manager) = create_lock_manager();
    let lock_manager = Arc::new(lock_manager);
    let t0 = txn_manager.begin(IsolationLevel::RepeatableRead)?;
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead)?;
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead)?;

    lock_manager.lock_exclusive(&t1, 1).unwrap();

    // the younger t2 blocks behind t1's exclusive lock
    let waiter = {
        let lock_manager = Arc::clone(&lock_manager);
        let t2 = Arc::clone(&t2);
        thread::spawn(move || lock_manager.lock_shared(&t2, 1))
    };
    thread::sleep(Duration::from_millis(100));

    // the oldest transaction wounds both the holder and the waiter
    lock_manager.lock_exclusive(&t0, 1).unwrap();
    assert!(t0.is_exclusive_locked(1));
    assert_eq!(t1.state(), TransactionState::Aborted);
    assert!(!t1.is_exclusive_locked(1));

    let waiter_result = waiter.join().unwrap();
    assert!(matches!(
        waiter_result,
        Err(LockError::TransactionAborted(_))
    ));
    assert_eq!(t2.state(), TransactionState::Aborted);

    // the wounded transactions stay dead
    assert!(lock_manager.lock_shared(&t1, 2).is_err());
    assert!(lock_manager.lock_exclusive(&t2, 2).is_err());

    Ok(())
}

#[test]
fn test_upgrade_sole_holder() -> Result<()> {
    let (txn_manager, lock_manager) = create_lock_manager();
    let t0 = txn_manager.begin(IsolationLevel::RepeatableRead)?;

    lock_manager.lock_shared(&t0, 1).unwrap();
    lock_manager.lock_upgrade(&t0, 1).unwrap();
    assert!(t0.is_exclusive_locked(1));
    assert!(!t0.is_shared_locked(1));

    // upgrading an already exclusive lock is a no-op
    lock_manager.lock_upgrade(&t0, 1).unwrap();

    lock_manager.unlock(&t0, 1).unwrap();
    assert!(!t0.is_exclusive_locked(1));

    Ok(())
}

#[test]
fn test_upgrade_wounds_younger_sharer() -> Result<()> {
    let (txn_manager, lock_manager) = create_lock_manager();
    let t0 = txn_manager.begin(IsolationLevel::RepeatableRead)?;
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead)?;

    lock_manager.lock_shared(&t0, 1).unwrap();
    lock_manager.lock_shared(&t1, 1).unwrap();

    lock_manager.lock_upgrade(&t0, 1).unwrap();
    assert!(t0.is_exclusive_locked(1));
    assert_eq!(t1.state(), TransactionState::Aborted);
    assert!(!t1.is_shared_locked(1));

    // exactly one of the two racers survives
    assert!(matches!(
        lock_manager.lock_upgrade(&t1, 1),
        Err(LockError::TransactionAborted(_))
    ));

    Ok(())
}

#[test]
fn test_concurrent_upgrades_abort_the_late_arrival() -> Result<()> {
    let (txn_manager, lock_manager) = create_lock_manager();
    let lock_manager = Arc::new(lock_manager);
    let t0 = txn_manager.begin(IsolationLevel::RepeatableRead)?;
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead)?;
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead)?;

    lock_manager.lock_shared(&t0, 1).unwrap();
    lock_manager.lock_shared(&t1, 1).unwrap();
    lock_manager.lock_shared(&t2, 1).unwrap();

    // the youngest sharer starts its upgrade first and parks behind the
    // older sharers
    let upgrader = {
        let lock_manager = Arc::clone(&lock_manager);
        let t2 = Arc::clone(&t2);
        thread::spawn(move || lock_manager.lock_upgrade(&t2, 1))
    };
    thread::sleep(Duration::from_millis(100));

    // a second in-flight upgrade on the same record aborts immediately
    assert!(matches!(
        lock_manager.lock_upgrade(&t1, 1),
        Err(LockError::UpgradeConflict(_))
    ));
    assert_eq!(t1.state(), TransactionState::Aborted);

    // once the older sharers let go, the parked upgrade completes
    lock_manager.unlock(&t0, 1).unwrap();
    lock_manager.unlock(&t1, 1).unwrap();
    upgrader.join().unwrap().unwrap();
    assert!(t2.is_exclusive_locked(1));
    assert_eq!(t2.state(), TransactionState::Growing);

    Ok(())
}
