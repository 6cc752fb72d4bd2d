//! # Lock Table
//!
//! Per-UID exclusive locks with FIFO waiters and deadlock detection over
//! the wait-for graph.
//!
//! One mutex guards five maps:
//!
//! ```text
//! held:    xid -> [uid, ...]   resources the transaction owns
//! owner:   uid -> xid          current owner of each resource
//! waiters: uid -> [xid, ...]   FIFO queue of blocked transactions
//! waiting: xid -> uid          what each blocked transaction wants
//! gates:   xid -> WaitGate     where each blocked transaction is parked
//! ```
//!
//! `acquire` either grants immediately, detects a would-be deadlock (the
//! requester is the victim and nothing is recorded), or returns a
//! [`WaitGate`] the caller blocks on. `remove` releases everything a
//! finished transaction held, promoting the first still-parked waiter of
//! each resource to owner.
//!
//! Deadlock detection is a stamped DFS over `xid -> owner(waiting[xid])`
//! edges: hitting a node stamped by the *current* walk means a cycle;
//! nodes stamped by earlier walks are already known cycle-free.

use std::collections::VecDeque;
use std::sync::Arc;

use eyre::{bail, Result};
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;

use crate::error::EngineError;
use crate::{Uid, Xid};

/// A private parking spot for one blocked transaction. The owner of the
/// contended resource opens the gate when it finishes.
pub struct WaitGate {
    granted: Mutex<bool>,
    cond: Condvar,
}

impl WaitGate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            granted: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    /// Blocks until ownership has been transferred to the waiter.
    pub fn wait(&self) {
        let mut granted = self.granted.lock();
        while !*granted {
            self.cond.wait(&mut granted);
        }
    }

    fn open(&self) {
        let mut granted = self.granted.lock();
        *granted = true;
        self.cond.notify_one();
    }
}

#[derive(Default)]
struct Tables {
    held: HashMap<Xid, SmallVec<[Uid; 8]>>,
    owner: HashMap<Uid, Xid>,
    waiters: HashMap<Uid, VecDeque<Xid>>,
    waiting: HashMap<Xid, Uid>,
    gates: HashMap<Xid, Arc<WaitGate>>,
}

pub struct LockTable {
    tables: Mutex<Tables>,
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Requests `uid` for `xid`. Returns `None` when the lock is held (or
    /// was just granted), `Some(gate)` when the caller must park, and a
    /// `Deadlock` error when parking would close a cycle — in which case no
    /// trace of the request remains.
    pub fn acquire(&self, xid: Xid, uid: Uid) -> Result<Option<Arc<WaitGate>>> {
        let mut t = self.tables.lock();

        if t.held.get(&xid).is_some_and(|uids| uids.contains(&uid)) {
            return Ok(None);
        }

        if !t.owner.contains_key(&uid) {
            t.owner.insert(uid, xid);
            t.held.entry(xid).or_default().push(uid);
            return Ok(None);
        }

        t.waiting.insert(xid, uid);
        t.waiters.entry(uid).or_default().push_back(xid);

        if has_deadlock(&t) {
            t.waiting.remove(&xid);
            if let Some(queue) = t.waiters.get_mut(&uid) {
                queue.retain(|&waiter| waiter != xid);
                if queue.is_empty() {
                    t.waiters.remove(&uid);
                }
            }
            bail!(EngineError::Deadlock);
        }

        let gate = WaitGate::new();
        t.gates.insert(xid, gate.clone());
        Ok(Some(gate))
    }

    /// Releases everything `xid` holds and promotes successors. Called on
    /// commit and abort.
    pub fn remove(&self, xid: Xid) {
        let mut t = self.tables.lock();

        if let Some(uids) = t.held.remove(&xid) {
            for uid in uids {
                promote_successor(&mut t, uid);
            }
        }
        t.waiting.remove(&xid);
        t.gates.remove(&xid);
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Hands `uid` to the first waiter that is still parked, unparking it.
fn promote_successor(t: &mut Tables, uid: Uid) {
    t.owner.remove(&uid);

    loop {
        let next = match t.waiters.get_mut(&uid) {
            Some(queue) => match queue.pop_front() {
                Some(xid) => xid,
                None => break,
            },
            None => return,
        };

        // A waiter without a gate aborted while queued; skip it.
        if let Some(gate) = t.gates.remove(&next) {
            t.owner.insert(uid, next);
            t.held.entry(next).or_default().push(uid);
            t.waiting.remove(&next);
            gate.open();
            break;
        }
    }

    if t.waiters.get(&uid).is_some_and(|queue| queue.is_empty()) {
        t.waiters.remove(&uid);
    }
}

fn has_deadlock(t: &Tables) -> bool {
    let mut stamps: HashMap<Xid, u32> = HashMap::new();
    let mut stamp = 1u32;

    for &xid in t.held.keys() {
        if stamps.get(&xid).copied().unwrap_or(0) > 0 {
            continue;
        }
        stamp += 1;
        if dfs(t, xid, stamp, &mut stamps) {
            return true;
        }
    }
    false
}

fn dfs(t: &Tables, xid: Xid, stamp: u32, stamps: &mut HashMap<Xid, u32>) -> bool {
    match stamps.get(&xid) {
        Some(&s) if s == stamp => return true,
        Some(&s) if s < stamp => return false,
        _ => {}
    }
    stamps.insert(xid, stamp);

    let Some(&uid) = t.waiting.get(&xid) else {
        return false;
    };
    let Some(&owner) = t.owner.get(&uid) else {
        return false;
    };
    dfs(t, owner, stamp, stamps)
}
