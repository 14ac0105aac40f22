use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use log::warn;

use crate::common::{DbError, FileId, Result, Rid, TxnId};

const LOCK_PARTITIONS: usize = 16;

/// Hierarchical lock modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    IS,
    IX,
    S,
    SIX,
    X,
}

impl LockMode {
    /// Compatibility matrix (rows = held, cols = requested).
    pub fn compatible(held: LockMode, requested: LockMode) -> bool {
        use LockMode::*;
        match (held, requested) {
            (IS, X) | (X, _) => false,
            (IS, _) => true,
            (IX, IS) | (IX, IX) => true,
            (IX, _) => false,
            (S, IS) | (S, S) => true,
            (S, _) => false,
            (SIX, IS) => true,
            (SIX, _) => false,
        }
    }

    /// Least upper bound in the mode lattice; the target of an upgrade.
    pub fn lub(a: LockMode, b: LockMode) -> LockMode {
        use LockMode::*;
        if a == b {
            return a;
        }
        match (a, b) {
            (IS, other) | (other, IS) => other,
            (IX, S) | (S, IX) => SIX,
            (IX, SIX) | (SIX, IX) => SIX,
            (S, SIX) | (SIX, S) => SIX,
            (X, _) | (_, X) => X,
            (IX, IX) | (S, S) | (SIX, SIX) => a,
        }
    }

    /// True when a holder of `held` needs nothing more to satisfy `requested`.
    pub fn covers(held: LockMode, requested: LockMode) -> bool {
        LockMode::lub(held, requested) == held
    }
}

/// What is being locked: a table, a row, or an index gap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockObject {
    Table(FileId),
    Row(FileId, Rid),
    Gap(FileId, Vec<u8>),
}

#[derive(Debug)]
struct Request {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
    /// Upgrade target; a granted request with a pending mode waits at the
    /// head of the queue.
    pending: Option<LockMode>,
    victim: bool,
}

impl Request {
    fn is_waiting(&self) -> bool {
        !self.granted || self.pending.is_some()
    }
}

#[derive(Default)]
struct Partition {
    queues: HashMap<LockObject, Vec<Request>>,
}

#[derive(Default)]
struct WaitState {
    edges: HashMap<TxnId, HashSet<TxnId>>,
    waiting_on: HashMap<TxnId, LockObject>,
}

enum Progress {
    Granted,
    Waiting,
    Victim,
}

/// Hash-partitioned lock table with FIFO queues, strict-2PL release and
/// wait-for-graph deadlock detection.
pub struct LockManager {
    partitions: Vec<(Mutex<Partition>, Condvar)>,
    waits: Mutex<WaitState>,
    timeout: Duration,
}

impl LockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            partitions: (0..LOCK_PARTITIONS)
                .map(|_| (Mutex::new(Partition::default()), Condvar::new()))
                .collect(),
            waits: Mutex::new(WaitState::default()),
            timeout,
        }
    }

    fn partition_of(object: &LockObject) -> usize {
        let mut hasher = DefaultHasher::new();
        object.hash(&mut hasher);
        (hasher.finish() as usize) % LOCK_PARTITIONS
    }

    /// Acquires `mode` on `object` for `txn_id`, blocking until granted.
    /// Returns `DeadlockVictim` when this transaction is chosen as the
    /// youngest member of a cycle, `LockTimeout` when the wait bound expires.
    pub fn lock(&self, txn_id: TxnId, object: &LockObject, mode: LockMode) -> Result<()> {
        let pidx = Self::partition_of(object);
        {
            let mut part = self.partitions[pidx].0.lock().unwrap();
            let queue = part.queues.entry(object.clone()).or_default();
            match Self::register(queue, txn_id, mode) {
                Progress::Granted => return Ok(()),
                Progress::Victim => unreachable!("fresh request cannot be a victim"),
                Progress::Waiting => {}
            }
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            // Refresh this transaction's wait edges and look for cycles while
            // holding no partition latch.
            let blockers = {
                let mut part = self.partitions[pidx].0.lock().unwrap();
                match Self::progress_of(&mut part, object, txn_id) {
                    Progress::Granted => {
                        drop(part);
                        self.clear_wait(txn_id);
                        return Ok(());
                    }
                    Progress::Victim => {
                        Self::cancel_wait(&mut part, object, txn_id);
                        self.partitions[pidx].1.notify_all();
                        drop(part);
                        self.clear_wait(txn_id);
                        return Err(DbError::DeadlockVictim);
                    }
                    Progress::Waiting => Self::blockers_of(&part, object, txn_id),
                }
            };

            {
                let mut waits = self.waits.lock().unwrap();
                waits.edges.insert(txn_id, blockers);
                waits.waiting_on.insert(txn_id, object.clone());
                if let Some(victim) = Self::find_victim(&waits.edges) {
                    if victim == txn_id {
                        drop(waits);
                        let mut part = self.partitions[pidx].0.lock().unwrap();
                        Self::cancel_wait(&mut part, object, txn_id);
                        self.partitions[pidx].1.notify_all();
                        drop(part);
                        self.clear_wait(txn_id);
                        warn!("transaction {} aborted as deadlock victim", txn_id);
                        return Err(DbError::DeadlockVictim);
                    }
                    let victim_obj = waits.waiting_on.get(&victim).cloned();
                    drop(waits);
                    if let Some(victim_obj) = victim_obj {
                        warn!("transaction {} chosen as deadlock victim", victim);
                        self.mark_victim(&victim_obj, victim);
                    }
                }
            }

            let mut part = self.partitions[pidx].0.lock().unwrap();
            match Self::progress_of(&mut part, object, txn_id) {
                Progress::Granted => {
                    drop(part);
                    self.clear_wait(txn_id);
                    return Ok(());
                }
                Progress::Victim => {
                    Self::cancel_wait(&mut part, object, txn_id);
                    self.partitions[pidx].1.notify_all();
                    drop(part);
                    self.clear_wait(txn_id);
                    return Err(DbError::DeadlockVictim);
                }
                Progress::Waiting => {}
            }
            let now = Instant::now();
            if now >= deadline {
                Self::cancel_wait(&mut part, object, txn_id);
                self.partitions[pidx].1.notify_all();
                drop(part);
                self.clear_wait(txn_id);
                return Err(DbError::LockTimeout);
            }
            let (guard, _timed_out) = self.partitions[pidx]
                .1
                .wait_timeout(part, deadline - now)
                .unwrap();
            drop(guard);
        }
    }

    /// Non-blocking probe: grants the lock if it can be granted right now.
    pub fn try_lock(&self, txn_id: TxnId, object: &LockObject, mode: LockMode) -> bool {
        let pidx = Self::partition_of(object);
        let mut part = self.partitions[pidx].0.lock().unwrap();
        let queue = part.queues.entry(object.clone()).or_default();
        match Self::register_if_free(queue, txn_id, mode) {
            Some(granted) => granted,
            None => false,
        }
    }

    /// Releases every lock the transaction holds (strict 2PL: all at once,
    /// at commit or abort).
    pub fn unlock_all(&self, txn_id: TxnId, objects: &[LockObject]) {
        for object in objects {
            let pidx = Self::partition_of(object);
            let mut part = self.partitions[pidx].0.lock().unwrap();
            Self::drop_request(&mut part, object, txn_id);
            self.partitions[pidx].1.notify_all();
        }
        self.clear_wait(txn_id);
    }

    /// Registers a request, granting immediately when possible.
    fn register(queue: &mut Vec<Request>, txn_id: TxnId, mode: LockMode) -> Progress {
        if let Some(pos) = queue.iter().position(|r| r.txn_id == txn_id) {
            let held = queue[pos].mode;
            if queue[pos].granted && LockMode::covers(held, mode) {
                return Progress::Granted;
            }
            // Upgrade: wait at the head for the other holders to drain.
            let target = LockMode::lub(held, mode);
            queue[pos].pending = Some(target);
            if Self::upgrade_grantable(queue, pos) {
                queue[pos].mode = target;
                queue[pos].pending = None;
                return Progress::Granted;
            }
            return Progress::Waiting;
        }

        let grantable = Self::plain_grantable(queue, txn_id, mode);
        queue.push(Request {
            txn_id,
            mode,
            granted: grantable,
            pending: None,
            victim: false,
        });
        if grantable {
            Progress::Granted
        } else {
            Progress::Waiting
        }
    }

    /// Like `register`, but never leaves a waiting request behind. Returns
    /// `None` when the lock cannot be granted immediately.
    fn register_if_free(
        queue: &mut Vec<Request>,
        txn_id: TxnId,
        mode: LockMode,
    ) -> Option<bool> {
        if let Some(pos) = queue.iter().position(|r| r.txn_id == txn_id) {
            let held = queue[pos].mode;
            if queue[pos].granted && LockMode::covers(held, mode) {
                return Some(true);
            }
            let target = LockMode::lub(held, mode);
            let was_pending = queue[pos].pending;
            queue[pos].pending = Some(target);
            if Self::upgrade_grantable(queue, pos) {
                queue[pos].mode = target;
                queue[pos].pending = None;
                return Some(true);
            }
            queue[pos].pending = was_pending;
            return None;
        }
        if Self::plain_grantable(queue, txn_id, mode) {
            queue.push(Request {
                txn_id,
                mode,
                granted: true,
                pending: None,
                victim: false,
            });
            Some(true)
        } else {
            None
        }
    }

    /// A plain (non-upgrade) request is grantable when it is compatible with
    /// every granted holder and there is no earlier waiter it would bypass.
    fn plain_grantable(queue: &[Request], txn_id: TxnId, mode: LockMode) -> bool {
        for req in queue {
            if req.txn_id == txn_id {
                continue;
            }
            if req.is_waiting() {
                return false;
            }
            if req.granted && !LockMode::compatible(req.mode, mode) {
                return false;
            }
        }
        true
    }

    /// An upgrade is grantable when every *other* granted holder is
    /// compatible with the target mode.
    fn upgrade_grantable(queue: &[Request], pos: usize) -> bool {
        let target = match queue[pos].pending {
            Some(t) => t,
            None => return false,
        };
        for (i, req) in queue.iter().enumerate() {
            if i == pos {
                continue;
            }
            if req.granted && !LockMode::compatible(req.mode, target) {
                return false;
            }
        }
        true
    }

    /// Re-examines this transaction's request after a wake-up.
    fn progress_of(part: &mut Partition, object: &LockObject, txn_id: TxnId) -> Progress {
        Self::promote(part, object);
        let queue = match part.queues.get(object) {
            Some(q) => q,
            None => return Progress::Waiting,
        };
        match queue.iter().find(|r| r.txn_id == txn_id) {
            Some(req) if req.victim => Progress::Victim,
            Some(req) if req.granted && req.pending.is_none() => Progress::Granted,
            Some(_) => Progress::Waiting,
            None => Progress::Waiting,
        }
    }

    /// Grants whatever the FIFO discipline now allows: upgrades first, then
    /// waiters in arrival order up to the first one that must keep waiting.
    fn promote(part: &mut Partition, object: &LockObject) {
        let queue = match part.queues.get_mut(object) {
            Some(q) => q,
            None => return,
        };
        // Upgrades wait at the head.
        for pos in 0..queue.len() {
            if queue[pos].granted && queue[pos].pending.is_some() && !queue[pos].victim {
                if Self::upgrade_grantable(queue, pos) {
                    let target = queue[pos].pending.take().unwrap_or(queue[pos].mode);
                    queue[pos].mode = target;
                }
            }
        }
        if queue.iter().any(|r| r.granted && r.pending.is_some()) {
            return;
        }
        for pos in 0..queue.len() {
            if queue[pos].granted || queue[pos].victim {
                continue;
            }
            let mode = queue[pos].mode;
            let compatible = queue.iter().enumerate().all(|(i, other)| {
                i == pos || !other.granted || LockMode::compatible(other.mode, mode)
            });
            if compatible {
                queue[pos].granted = true;
            } else {
                break; // no bypass
            }
        }
    }

    /// Abandons a wait without touching locks the transaction already
    /// holds: an upgrader keeps its granted mode, a plain waiter is removed.
    fn cancel_wait(part: &mut Partition, object: &LockObject, txn_id: TxnId) {
        let remove_queue = {
            let queue = match part.queues.get_mut(object) {
                Some(q) => q,
                None => return,
            };
            if let Some(pos) = queue.iter().position(|r| r.txn_id == txn_id) {
                if queue[pos].granted {
                    queue[pos].pending = None;
                    queue[pos].victim = false;
                } else {
                    queue.remove(pos);
                }
            }
            queue.is_empty()
        };
        if remove_queue {
            part.queues.remove(object);
        } else {
            Self::promote(part, object);
        }
    }

    fn drop_request(part: &mut Partition, object: &LockObject, txn_id: TxnId) {
        let remove_queue = {
            let queue = match part.queues.get_mut(object) {
                Some(q) => q,
                None => return,
            };
            queue.retain(|r| r.txn_id != txn_id);
            queue.is_empty()
        };
        if remove_queue {
            part.queues.remove(object);
        } else {
            Self::promote(part, object);
        }
    }

    /// Transactions this waiter is blocked behind.
    fn blockers_of(part: &Partition, object: &LockObject, txn_id: TxnId) -> HashSet<TxnId> {
        let mut blockers = HashSet::new();
        let queue = match part.queues.get(object) {
            Some(q) => q,
            None => return blockers,
        };
        let pos = match queue.iter().position(|r| r.txn_id == txn_id) {
            Some(p) => p,
            None => return blockers,
        };
        let me = &queue[pos];
        let wanted = me.pending.unwrap_or(me.mode);
        for (i, req) in queue.iter().enumerate() {
            if req.txn_id == txn_id {
                continue;
            }
            if req.granted && !LockMode::compatible(req.mode, wanted) {
                blockers.insert(req.txn_id);
            }
            if !me.granted {
                // Plain waiters queue behind earlier waiters and upgraders.
                if (i < pos && !req.granted) || (req.granted && req.pending.is_some()) {
                    blockers.insert(req.txn_id);
                }
            }
        }
        blockers
    }

    fn clear_wait(&self, txn_id: TxnId) {
        let mut waits = self.waits.lock().unwrap();
        waits.edges.remove(&txn_id);
        waits.waiting_on.remove(&txn_id);
    }

    fn mark_victim(&self, object: &LockObject, victim: TxnId) {
        let pidx = Self::partition_of(object);
        let mut part = self.partitions[pidx].0.lock().unwrap();
        if let Some(queue) = part.queues.get_mut(object) {
            for req in queue.iter_mut() {
                if req.txn_id == victim && req.is_waiting() {
                    req.victim = true;
                }
            }
        }
        self.partitions[pidx].1.notify_all();
    }

    /// Looks for any cycle in the wait-for graph; returns the youngest
    /// (largest id) transaction in it.
    fn find_victim(edges: &HashMap<TxnId, HashSet<TxnId>>) -> Option<TxnId> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }
        let mut colors: HashMap<TxnId, Color> = HashMap::new();
        let nodes: Vec<TxnId> = edges.keys().copied().collect();

        fn dfs(
            node: TxnId,
            edges: &HashMap<TxnId, HashSet<TxnId>>,
            colors: &mut HashMap<TxnId, Color>,
            stack: &mut Vec<TxnId>,
        ) -> Option<Vec<TxnId>> {
            colors.insert(node, Color::Gray);
            stack.push(node);
            if let Some(nexts) = edges.get(&node) {
                let mut sorted: Vec<TxnId> = nexts.iter().copied().collect();
                sorted.sort_unstable();
                for next in sorted {
                    match colors.get(&next).copied().unwrap_or(Color::White) {
                        Color::Gray => {
                            // Cycle: everything on the stack from `next` on.
                            let start = stack.iter().position(|&t| t == next).unwrap_or(0);
                            return Some(stack[start..].to_vec());
                        }
                        Color::White => {
                            if let Some(cycle) = dfs(next, edges, colors, stack) {
                                return Some(cycle);
                            }
                        }
                        Color::Black => {}
                    }
                }
            }
            stack.pop();
            colors.insert(node, Color::Black);
            None
        }

        for node in nodes {
            if colors.get(&node).copied().unwrap_or(Color::White) == Color::White {
                let mut stack = Vec::new();
                if let Some(cycle) = dfs(node, edges, &mut colors, &mut stack) {
                    return cycle.into_iter().max();
                }
            }
        }
        None
    }
}
