use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use kestreldb::common::types::Rid;
use kestreldb::transaction::{
    AbortReason, IsolationLevel, LockManager, TransactionError, TransactionManager,
    TransactionState,
};

fn setup() -> (Arc<LockManager>, Arc<TransactionManager>) {
    let lock_manager = Arc::new(LockManager::with_detection_interval(Duration::from_millis(
        20,
    )));
    let txn_manager = Arc::new(TransactionManager::new(lock_manager.clone()));
    (lock_manager, txn_manager)
}

fn abort_reason(error: TransactionError) -> AbortReason {
    match error {
        TransactionError::Abort { reason, .. } => reason,
        other => panic!("expected abort, got {other:?}"),
    }
}

#[test]
fn test_two_shared_lockers_coexist() {
    let (lock_manager, txn_manager) = setup();
    let rid = Rid::new(1, 1);

    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);

    lock_manager.lock_shared(&t1, rid).unwrap();
    // Grantable immediately while t1 still holds its shared lock
    lock_manager.lock_shared(&t2, rid).unwrap();

    assert!(t1.is_shared_locked(&rid));
    assert!(t2.is_shared_locked(&rid));

    txn_manager.commit(t1.id()).unwrap();
    txn_manager.commit(t2.id()).unwrap();
}

#[test]
fn test_lock_shared_on_read_uncommitted_aborts() {
    let (lock_manager, txn_manager) = setup();
    let rid = Rid::new(1, 1);

    let txn = txn_manager.begin(IsolationLevel::ReadUncommitted);
    let reason = abort_reason(lock_manager.lock_shared(&txn, rid).unwrap_err());

    assert_eq!(reason, AbortReason::LockSharedOnReadUncommitted);
    assert_eq!(txn.state(), TransactionState::Aborted);
}

#[test]
fn test_repeatable_read_shrinks_after_unlock() {
    let (lock_manager, txn_manager) = setup();
    let r1 = Rid::new(1, 1);
    let r2 = Rid::new(1, 2);

    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    lock_manager.lock_shared(&txn, r1).unwrap();
    assert!(lock_manager.unlock(&txn, r1));
    assert_eq!(txn.state(), TransactionState::Shrinking);

    let reason = abort_reason(lock_manager.lock_shared(&txn, r2).unwrap_err());
    assert_eq!(reason, AbortReason::LockOnShrinking);

    let txn2 = txn_manager.begin(IsolationLevel::RepeatableRead);
    lock_manager.lock_exclusive(&txn2, r1).unwrap();
    assert!(lock_manager.unlock(&txn2, r1));
    let reason = abort_reason(lock_manager.lock_exclusive(&txn2, r2).unwrap_err());
    assert_eq!(reason, AbortReason::LockOnShrinking);
}

#[test]
fn test_read_committed_can_relock_after_unlock() {
    let (lock_manager, txn_manager) = setup();
    let r1 = Rid::new(1, 1);
    let r2 = Rid::new(1, 2);

    let txn = txn_manager.begin(IsolationLevel::ReadCommitted);
    lock_manager.lock_shared(&txn, r1).unwrap();
    assert!(lock_manager.unlock(&txn, r1));
    assert_eq!(txn.state(), TransactionState::Growing);

    // Still growing: more locks are fine
    lock_manager.lock_shared(&txn, r2).unwrap();
    txn_manager.commit(txn.id()).unwrap();
}

#[test]
fn test_exclusive_waits_for_shared_release() {
    let (lock_manager, txn_manager) = setup();
    let rid = Rid::new(2, 1);

    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);

    lock_manager.lock_shared(&t1, rid).unwrap();

    let released = Arc::new(AtomicBool::new(false));
    let writer = {
        let lock_manager = lock_manager.clone();
        let t2 = t2.clone();
        let released = released.clone();
        thread::spawn(move || {
            lock_manager.lock_exclusive(&t2, rid).unwrap();
            // The grant must come after t1 let go
            assert!(released.load(Ordering::SeqCst));
        })
    };

    // Give the writer time to block
    thread::sleep(Duration::from_millis(100));
    assert!(!writer.is_finished());

    released.store(true, Ordering::SeqCst);
    assert!(lock_manager.unlock(&t1, rid));

    writer.join().unwrap();
    assert!(t2.is_exclusive_locked(&rid));
    txn_manager.commit(t1.id()).unwrap();
    txn_manager.commit(t2.id()).unwrap();
}

#[test]
fn test_exclusive_waiters_granted_in_fifo_order() {
    let (lock_manager, txn_manager) = setup();
    let rid = Rid::new(2, 2);

    let reader = txn_manager.begin(IsolationLevel::RepeatableRead);
    lock_manager.lock_shared(&reader, rid).unwrap();

    let grant_order = Arc::new(Mutex::new(Vec::new()));
    let mut writers = Vec::new();

    for _ in 0..3 {
        let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
        let lock_manager = lock_manager.clone();
        let grant_order = grant_order.clone();
        let txn_id = txn.id();
        writers.push(thread::spawn(move || {
            lock_manager.lock_exclusive(&txn, rid).unwrap();
            grant_order.lock().push(txn_id);
            lock_manager.unlock(&txn, rid);
        }));
        // Stagger the arrivals so queue order is deterministic
        thread::sleep(Duration::from_millis(100));
    }

    lock_manager.unlock(&reader, rid);
    for writer in writers {
        writer.join().unwrap();
    }

    let order = grant_order.lock().clone();
    let mut sorted = order.clone();
    sorted.sort_unstable();
    assert_eq!(order, sorted, "exclusive grants out of queue order");
}

#[test]
fn test_deadlock_aborts_youngest() {
    let (lock_manager, txn_manager) = setup();
    let r1 = Rid::new(3, 1);
    let r2 = Rid::new(3, 2);

    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);

    lock_manager.lock_exclusive(&t1, r1).unwrap();
    lock_manager.lock_exclusive(&t2, r2).unwrap();

    // t2 requests r1 and blocks behind t1
    let younger = {
        let lock_manager = lock_manager.clone();
        let txn_manager = txn_manager.clone();
        let t2 = t2.clone();
        thread::spawn(move || {
            let result = lock_manager.lock_exclusive(&t2, r1);
            let reason = abort_reason(result.unwrap_err());
            assert_eq!(reason, AbortReason::Deadlock);
            assert_eq!(t2.state(), TransactionState::Aborted);
            // Victim cleanup releases everything it held
            txn_manager.abort(t2.id()).unwrap();
        })
    };

    thread::sleep(Duration::from_millis(50));

    // Closing the cycle: t1 waits on r2, the detector aborts max(t1, t2) = t2
    lock_manager.lock_exclusive(&t1, r2).unwrap();

    younger.join().unwrap();
    assert!(t1.is_exclusive_locked(&r1));
    assert!(t1.is_exclusive_locked(&r2));
    assert_eq!(t1.state(), TransactionState::Growing);

    txn_manager.commit(t1.id()).unwrap();
}

#[test]
fn test_upgrade_conflict_and_eventual_grant() {
    let (lock_manager, txn_manager) = setup();
    let rid = Rid::new(4, 1);

    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);

    lock_manager.lock_shared(&t1, rid).unwrap();
    lock_manager.lock_shared(&t2, rid).unwrap();

    // t1's upgrade must wait for t2's shared lock
    let upgrader = {
        let lock_manager = lock_manager.clone();
        let t1 = t1.clone();
        thread::spawn(move || {
            lock_manager.lock_upgrade(&t1, rid).unwrap();
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!upgrader.is_finished());

    // A second upgrade on the same rid is refused outright
    let reason = abort_reason(lock_manager.lock_upgrade(&t2, rid).unwrap_err());
    assert_eq!(reason, AbortReason::UpgradeConflict);
    assert_eq!(t2.state(), TransactionState::Aborted);

    // Releasing t2's stake lets the first upgrade through
    txn_manager.abort(t2.id()).unwrap();
    upgrader.join().unwrap();
    assert!(t1.is_exclusive_locked(&rid));

    txn_manager.commit(t1.id()).unwrap();
}

#[test]
fn test_wait_for_graph_edges() {
    let (lock_manager, txn_manager) = setup();
    let rid = Rid::new(5, 1);

    let holder = txn_manager.begin(IsolationLevel::RepeatableRead);
    let waiter = txn_manager.begin(IsolationLevel::RepeatableRead);

    lock_manager.lock_exclusive(&holder, rid).unwrap();

    let blocked = {
        let lock_manager = lock_manager.clone();
        let waiter = waiter.clone();
        thread::spawn(move || {
            lock_manager.lock_exclusive(&waiter, rid).unwrap();
            lock_manager.unlock(&waiter, rid);
        })
    };

    thread::sleep(Duration::from_millis(100));
    let edges = lock_manager.edge_list();
    assert!(edges.contains(&(waiter.id(), holder.id())));

    lock_manager.unlock(&holder, rid);
    blocked.join().unwrap();

    txn_manager.commit(holder.id()).unwrap();
    txn_manager.commit(waiter.id()).unwrap();
}
