use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use parking_lot::{Condvar, Mutex};
use log::debug;

use crate::common::types::{Rid, TxnId};
use super::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionError, TransactionState,
};

/// How often the background detector scans for wait-for cycles
pub const DEFAULT_CYCLE_DETECTION_INTERVAL: Duration = Duration::from_millis(50);

/// Lock modes on a record id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct LockRequest {
    txn: Arc<Transaction>,
    mode: LockMode,
    granted: bool,
}

/// FIFO queue of requests on one rid plus the condvar its waiters sleep on
struct LockRequestQueue {
    requests: VecDeque<LockRequest>,
    cv: Arc<Condvar>,
    upgrading: bool,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            requests: VecDeque::new(),
            cv: Arc::new(Condvar::new()),
            upgrading: false,
        }
    }

    /// A shared request needs no granted exclusive holder and no waiting
    /// upgrader ahead of it.
    fn can_grant_shared(&self) -> bool {
        !self.upgrading
            && !self
                .requests
                .iter()
                .any(|r| r.granted && r.mode == LockMode::Exclusive)
    }

    /// An exclusive request needs an empty grant set, no waiting upgrader,
    /// and must be the first waiter in queue order.
    fn can_grant_exclusive(&self, txn_id: TxnId) -> bool {
        if self.upgrading || self.requests.iter().any(|r| r.granted) {
            return false;
        }
        match self.requests.iter().find(|r| !r.granted) {
            Some(first) => first.txn.id() == txn_id,
            None => true,
        }
    }

    /// An upgrader proceeds once it is the only granted request left
    fn can_upgrade(&self, txn_id: TxnId) -> bool {
        !self
            .requests
            .iter()
            .any(|r| r.granted && r.txn.id() != txn_id)
    }

    fn remove_request(&mut self, txn_id: TxnId) {
        self.requests.retain(|r| r.txn.id() != txn_id);
    }
}

struct LockManagerInner {
    lock_table: HashMap<Rid, LockRequestQueue>,
    /// Which rid each blocked transaction is waiting on, for victim wake-up
    waiting_on: HashMap<TxnId, Rid>,
    /// Wait-for graph, rebuilt by every detector pass
    waits_for: BTreeMap<TxnId, BTreeSet<TxnId>>,
}

impl LockManagerInner {
    fn new() -> Self {
        Self {
            lock_table: HashMap::new(),
            waiting_on: HashMap::new(),
            waits_for: BTreeMap::new(),
        }
    }

    /// Every waiting transaction gets an edge to every granted transaction
    /// in the same queue. Aborted transactions are left out on both sides.
    fn rebuild_waits_for(&mut self) {
        self.waits_for.clear();

        for queue in self.lock_table.values() {
            let mut granted = Vec::new();
            let mut waiting = Vec::new();
            for request in &queue.requests {
                if request.txn.state() == TransactionState::Aborted {
                    continue;
                }
                if request.granted {
                    granted.push(request.txn.id());
                } else {
                    waiting.push(request.txn.id());
                }
            }
            for &waiter in &waiting {
                for &holder in &granted {
                    if waiter != holder {
                        self.waits_for.entry(waiter).or_default().insert(holder);
                    }
                }
            }
        }
    }

    /// DFS over the wait-for graph. On a back edge, the cycle is the DFS
    /// stack from the re-encountered node to the top; the victim is its
    /// youngest member (maximum id).
    fn find_cycle_victim(&self) -> Option<TxnId> {
        let mut visited = HashSet::new();

        for &start in self.waits_for.keys() {
            if visited.contains(&start) {
                continue;
            }
            let mut stack = Vec::new();
            let mut on_stack = HashSet::new();
            if let Some(victim) = self.dfs(start, &mut visited, &mut stack, &mut on_stack) {
                return Some(victim);
            }
        }
        None
    }

    fn dfs(
        &self,
        current: TxnId,
        visited: &mut HashSet<TxnId>,
        stack: &mut Vec<TxnId>,
        on_stack: &mut HashSet<TxnId>,
    ) -> Option<TxnId> {
        visited.insert(current);
        on_stack.insert(current);
        stack.push(current);

        if let Some(successors) = self.waits_for.get(&current) {
            for &next in successors {
                if on_stack.contains(&next) {
                    let cycle_start = stack.iter().position(|&t| t == next).unwrap_or(0);
                    return stack[cycle_start..].iter().copied().max();
                }
                if !visited.contains(&next) {
                    if let Some(victim) = self.dfs(next, visited, stack, on_stack) {
                        return Some(victim);
                    }
                }
            }
        }

        on_stack.remove(&current);
        stack.pop();
        None
    }

    fn remove_from_graph(&mut self, txn_id: TxnId) {
        self.waits_for.remove(&txn_id);
        for successors in self.waits_for.values_mut() {
            successors.remove(&txn_id);
        }
    }

    fn find_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.lock_table
            .values()
            .flat_map(|queue| queue.requests.iter())
            .find(|request| request.txn.id() == txn_id)
            .map(|request| request.txn.clone())
    }
}

/// Two-phase locking on record ids: shared/exclusive modes, in-place
/// upgrades, and a background thread that breaks deadlocks by aborting the
/// youngest transaction in each wait-for cycle.
pub struct LockManager {
    inner: Arc<Mutex<LockManagerInner>>,
    shutdown: Arc<AtomicBool>,
    detector: Option<JoinHandle<()>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_detection_interval(DEFAULT_CYCLE_DETECTION_INTERVAL)
    }

    pub fn with_detection_interval(interval: Duration) -> Self {
        let inner = Arc::new(Mutex::new(LockManagerInner::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let detector = {
            let inner = inner.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || Self::detection_loop(inner, shutdown, interval))
        };

        Self {
            inner,
            shutdown,
            detector: Some(detector),
        }
    }

    /// Acquire a shared lock on `rid`, blocking until it is grantable or the
    /// transaction is aborted by the deadlock detector.
    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), TransactionError> {
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::LockSharedOnReadUncommitted,
            });
        }
        if txn.state() != TransactionState::Growing {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }

        txn.shared_lock_set().insert(rid);

        let mut inner = self.inner.lock();
        let queue = inner
            .lock_table
            .entry(rid)
            .or_insert_with(LockRequestQueue::new);
        let granted = queue.can_grant_shared();
        queue.requests.push_back(LockRequest {
            txn: txn.clone(),
            mode: LockMode::Shared,
            granted,
        });
        let cv = queue.cv.clone();

        if !granted {
            inner.waiting_on.insert(txn.id(), rid);
            // A wake means either the lock became grantable or this
            // transaction was chosen as a deadlock victim; re-check both.
            loop {
                if txn.state() == TransactionState::Aborted {
                    break;
                }
                if inner
                    .lock_table
                    .get(&rid)
                    .is_some_and(|q| q.can_grant_shared())
                {
                    break;
                }
                cv.wait(&mut inner);
            }
            inner.waiting_on.remove(&txn.id());
        }

        if txn.state() == TransactionState::Aborted {
            if let Some(queue) = inner.lock_table.get_mut(&rid) {
                queue.remove_request(txn.id());
            }
            txn.shared_lock_set().remove(&rid);
            cv.notify_all();
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::Deadlock,
            });
        }

        if let Some(request) = inner
            .lock_table
            .get_mut(&rid)
            .and_then(|q| q.requests.iter_mut().find(|r| r.txn.id() == txn.id()))
        {
            request.granted = true;
        }
        Ok(())
    }

    /// Acquire an exclusive lock on `rid`. Exclusive waiters are served in
    /// queue order.
    pub fn lock_exclusive(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), TransactionError> {
        if txn.state() != TransactionState::Growing {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }

        txn.exclusive_lock_set().insert(rid);

        let mut inner = self.inner.lock();
        let queue = inner
            .lock_table
            .entry(rid)
            .or_insert_with(LockRequestQueue::new);
        let granted = queue.can_grant_exclusive(txn.id());
        queue.requests.push_back(LockRequest {
            txn: txn.clone(),
            mode: LockMode::Exclusive,
            granted,
        });
        let cv = queue.cv.clone();

        if !granted {
            inner.waiting_on.insert(txn.id(), rid);
            loop {
                if txn.state() == TransactionState::Aborted {
                    break;
                }
                if inner
                    .lock_table
                    .get(&rid)
                    .is_some_and(|q| q.can_grant_exclusive(txn.id()))
                {
                    break;
                }
                cv.wait(&mut inner);
            }
            inner.waiting_on.remove(&txn.id());
        }

        if txn.state() == TransactionState::Aborted {
            if let Some(queue) = inner.lock_table.get_mut(&rid) {
                queue.remove_request(txn.id());
            }
            txn.exclusive_lock_set().remove(&rid);
            cv.notify_all();
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::Deadlock,
            });
        }

        if let Some(request) = inner
            .lock_table
            .get_mut(&rid)
            .and_then(|q| q.requests.iter_mut().find(|r| r.txn.id() == txn.id()))
        {
            request.granted = true;
        }
        Ok(())
    }

    /// Upgrade a held shared lock to exclusive. Only one upgrade may wait
    /// per rid; a second upgrader aborts with `UpgradeConflict`.
    pub fn lock_upgrade(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), TransactionError> {
        if txn.state() != TransactionState::Growing {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }

        txn.shared_lock_set().remove(&rid);
        txn.exclusive_lock_set().insert(rid);

        let mut inner = self.inner.lock();
        let queue = inner
            .lock_table
            .entry(rid)
            .or_insert_with(LockRequestQueue::new);

        if queue.upgrading {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::UpgradeConflict,
            });
        }

        // Flip the held request in place; it re-queues as a waiter
        if let Some(request) = queue.requests.iter_mut().find(|r| r.txn.id() == txn.id()) {
            request.granted = false;
            request.mode = LockMode::Exclusive;
        }
        let cv = queue.cv.clone();

        if !queue.can_upgrade(txn.id()) {
            queue.upgrading = true;
            inner.waiting_on.insert(txn.id(), rid);
            loop {
                if txn.state() == TransactionState::Aborted {
                    break;
                }
                if inner
                    .lock_table
                    .get(&rid)
                    .is_some_and(|q| q.can_upgrade(txn.id()))
                {
                    break;
                }
                cv.wait(&mut inner);
            }
            inner.waiting_on.remove(&txn.id());
        }

        if let Some(queue) = inner.lock_table.get_mut(&rid) {
            queue.upgrading = false;
        }

        if txn.state() == TransactionState::Aborted {
            if let Some(queue) = inner.lock_table.get_mut(&rid) {
                queue.remove_request(txn.id());
            }
            txn.exclusive_lock_set().remove(&rid);
            cv.notify_all();
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::Deadlock,
            });
        }

        if let Some(request) = inner
            .lock_table
            .get_mut(&rid)
            .and_then(|q| q.requests.iter_mut().find(|r| r.txn.id() == txn.id()))
        {
            request.granted = true;
        }
        Ok(())
    }

    /// Release a held lock and wake the queue. Under REPEATABLE_READ the
    /// first release moves the transaction into its shrinking phase;
    /// READ_COMMITTED may keep acquiring locks afterwards.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        txn.shared_lock_set().remove(&rid);
        txn.exclusive_lock_set().remove(&rid);

        let mut inner = self.inner.lock();
        let found = match inner.lock_table.get_mut(&rid) {
            Some(queue) => {
                let position = queue
                    .requests
                    .iter()
                    .position(|r| r.txn.id() == txn.id() && r.granted);
                match position {
                    Some(index) => {
                        queue.requests.remove(index);
                        queue.cv.notify_all();
                        true
                    }
                    None => false,
                }
            }
            None => false,
        };

        if txn.state() == TransactionState::Growing
            && txn.isolation_level() == IsolationLevel::RepeatableRead
        {
            txn.set_state(TransactionState::Shrinking);
        }
        found
    }

    /// Current wait-for edges, rebuilt on demand. Exposed for tests and
    /// debugging.
    pub fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        let mut inner = self.inner.lock();
        inner.rebuild_waits_for();
        inner
            .waits_for
            .iter()
            .flat_map(|(&from, tos)| tos.iter().map(move |&to| (from, to)))
            .collect()
    }

    fn detection_loop(
        inner: Arc<Mutex<LockManagerInner>>,
        shutdown: Arc<AtomicBool>,
        interval: Duration,
    ) {
        while !shutdown.load(Ordering::SeqCst) {
            thread::sleep(interval);
            if shutdown.load(Ordering::SeqCst) {
                break;
            }

            let mut inner = inner.lock();
            inner.rebuild_waits_for();

            while let Some(victim) = inner.find_cycle_victim() {
                debug!("deadlock detected, aborting transaction {}", victim);
                if let Some(txn) = inner.find_transaction(victim) {
                    txn.set_state(TransactionState::Aborted);
                }
                if let Some(&rid) = inner.waiting_on.get(&victim) {
                    if let Some(queue) = inner.lock_table.get(&rid) {
                        queue.cv.notify_all();
                    }
                }
                inner.remove_from_graph(victim);
            }
        }
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(detector) = self.detector.take() {
            let _ = detector.join();
        }
    }
}
