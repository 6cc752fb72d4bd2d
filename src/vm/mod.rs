//! # Version Manager
//!
//! MVCC over the data manager. Rows become [`Entry`] versions carrying
//! `(xmin, xmax)` stamps; reads apply the isolation level's visibility rule,
//! deletes stamp `xmax` under a per-UID lock with deadlock detection, and
//! nothing is ever rewritten in place beyond that stamp.
//!
//! ## Transactions
//!
//! `begin` registers the transaction in the active set (capturing a snapshot
//! of that set under Repeatable Read), `commit`/`abort` unregister it,
//! release its locks and persist the final state through the transaction
//! manager. A transaction that hits a deadlock is errored with
//! `ConcurrentUpdate`, aborted internally, and every later call on its XID
//! replays that sticky error.
//!
//! Entries are served through a pin-counted cache keyed by UID, so
//! concurrent readers of one row share a single handle (and its lock).

pub mod entry;
pub mod lock_table;
pub mod visibility;

use std::sync::Arc;

use eyre::{bail, Result};
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;

use crate::dm::DataManager;
use crate::error::EngineError;
use crate::storage::{CacheBacking, PinCache};
use crate::tm::{TransactionManager, SUPER_XID};
use crate::{Uid, Xid};

pub use entry::Entry;
pub use lock_table::LockTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
}

pub struct Transaction {
    pub xid: Xid,
    pub level: IsolationLevel,
    /// XIDs active at begin time; captured only under Repeatable Read.
    pub(crate) snapshot: Option<HashSet<Xid>>,
    pub(crate) err: Option<EngineError>,
    pub(crate) auto_aborted: bool,
}

impl Transaction {
    fn new(xid: Xid, level: IsolationLevel, active: &HashMap<Xid, Arc<Mutex<Transaction>>>) -> Self {
        let snapshot = (level == IsolationLevel::RepeatableRead)
            .then(|| active.keys().copied().collect());
        Self {
            xid,
            level,
            snapshot,
            err: None,
            auto_aborted: false,
        }
    }

    pub fn in_snapshot(&self, xid: Xid) -> bool {
        if xid == SUPER_XID {
            return false;
        }
        self.snapshot
            .as_ref()
            .is_some_and(|snap| snap.contains(&xid))
    }
}

struct EntryBacking {
    dm: Arc<DataManager>,
}

impl CacheBacking<Uid, Arc<Entry>> for EntryBacking {
    fn load(&self, uid: Uid) -> Result<Arc<Entry>> {
        match Entry::load(&self.dm, uid)? {
            Some(entry) => Ok(Arc::new(entry)),
            None => bail!(EngineError::NullEntry),
        }
    }

    fn evict(&self, _uid: Uid, entry: Arc<Entry>) -> Result<()> {
        self.dm.release(entry.item())
    }
}

pub struct VersionManager {
    tm: Arc<TransactionManager>,
    dm: Arc<DataManager>,
    active: Mutex<HashMap<Xid, Arc<Mutex<Transaction>>>>,
    lock_table: LockTable,
    entries: PinCache<Uid, Arc<Entry>, EntryBacking>,
}

impl VersionManager {
    pub fn new(tm: Arc<TransactionManager>, dm: Arc<DataManager>) -> Self {
        let mut active = HashMap::new();
        active.insert(
            SUPER_XID,
            Arc::new(Mutex::new(Transaction {
                xid: SUPER_XID,
                level: IsolationLevel::ReadCommitted,
                snapshot: None,
                err: None,
                auto_aborted: false,
            })),
        );
        Self {
            entries: PinCache::new(0, EntryBacking { dm: dm.clone() }),
            tm,
            dm,
            active: Mutex::new(active),
            lock_table: LockTable::new(),
        }
    }

    pub fn dm(&self) -> &Arc<DataManager> {
        &self.dm
    }

    /// Starts a transaction at the given isolation level.
    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        let mut active = self.active.lock();
        let xid = self.tm.begin()?;
        let tx = Transaction::new(xid, level, &active);
        active.insert(xid, Arc::new(Mutex::new(tx)));
        Ok(xid)
    }

    /// Reads the row at `uid` as seen by `xid`, or `None` when no visible
    /// version exists (including dangling UIDs).
    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        let tx = self.transaction(xid)?;
        self.check_sticky(&tx)?;

        let entry = match self.entries.get(uid) {
            Ok(entry) => entry,
            Err(e) if EngineError::NullEntry.is_cause_of(&e) => return Ok(None),
            Err(e) => return Err(e),
        };

        let outcome = (|| {
            let t = tx.lock();
            if visibility::is_visible(&self.tm, &t, &entry)? {
                Ok(Some(entry.data()))
            } else {
                Ok(None)
            }
        })();
        self.entries.release(uid)?;
        outcome
    }

    /// Inserts a new live version stamped with `xid`.
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        let tx = self.transaction(xid)?;
        self.check_sticky(&tx)?;

        self.dm.insert(xid, &Entry::wrap_raw(xid, data))
    }

    /// Tombstones the version at `uid` by stamping `xmax = xid`. Returns
    /// false when there was nothing visible to delete; may block on the
    /// row lock; deadlocks and version skips error and auto-abort.
    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool> {
        let tx = self.transaction(xid)?;
        self.check_sticky(&tx)?;

        let entry = match self.entries.get(uid) {
            Ok(entry) => entry,
            Err(e) if EngineError::NullEntry.is_cause_of(&e) => return Ok(false),
            Err(e) => return Err(e),
        };

        let outcome = self.delete_inner(xid, &tx, &entry);
        self.entries.release(uid)?;
        outcome
    }

    fn delete_inner(
        &self,
        xid: Xid,
        tx: &Arc<Mutex<Transaction>>,
        entry: &Arc<Entry>,
    ) -> Result<bool> {
        {
            let t = tx.lock();
            if !visibility::is_visible(&self.tm, &t, entry)? {
                return Ok(false);
            }
        }

        match self.lock_table.acquire(xid, entry.uid()) {
            Ok(Some(gate)) => gate.wait(),
            Ok(None) => {}
            Err(e) if EngineError::Deadlock.is_cause_of(&e) => {
                return Err(self.fail_concurrent(xid, tx));
            }
            Err(e) => return Err(e),
        }

        // Re-check under the lock: the previous owner may have stamped it.
        if entry.xmax() == xid {
            return Ok(false);
        }

        let skipped = {
            let t = tx.lock();
            visibility::is_version_skip(&self.tm, &t, entry)?
        };
        if skipped {
            return Err(self.fail_concurrent(xid, tx));
        }

        entry.set_xmax(xid, &self.dm)?;
        Ok(true)
    }

    /// Marks the transaction errored, aborts it internally, and returns the
    /// sticky `ConcurrentUpdate` report.
    fn fail_concurrent(&self, xid: Xid, tx: &Arc<Mutex<Transaction>>) -> eyre::Report {
        tx.lock().err = Some(EngineError::ConcurrentUpdate);
        if let Err(e) = self.intern_abort(xid, true) {
            log::error!("auto-abort of {} failed: {:#}", xid, e);
        }
        tx.lock().auto_aborted = true;
        eyre::Report::new(EngineError::ConcurrentUpdate)
    }

    pub fn commit(&self, xid: Xid) -> Result<()> {
        let tx = self.transaction(xid)?;
        self.check_sticky(&tx)?;

        self.active.lock().remove(&xid);
        self.lock_table.remove(xid);
        self.tm.commit(xid)
    }

    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.intern_abort(xid, false)
    }

    fn intern_abort(&self, xid: Xid, auto: bool) -> Result<()> {
        let tx = {
            let mut active = self.active.lock();
            let tx = active.get(&xid).cloned();
            if !auto {
                active.remove(&xid);
            }
            tx
        };

        let Some(tx) = tx else {
            bail!(EngineError::NoTransaction);
        };
        if tx.lock().auto_aborted {
            return Ok(());
        }

        self.lock_table.remove(xid);
        self.tm.abort(xid)
    }

    /// Evicts every cached entry. Callers shut the data manager afterwards.
    pub fn close(&self) -> Result<()> {
        self.entries.close()
    }

    fn transaction(&self, xid: Xid) -> Result<Arc<Mutex<Transaction>>> {
        self.active
            .lock()
            .get(&xid)
            .cloned()
            .ok_or_else(|| eyre::Report::new(EngineError::NoTransaction))
    }

    fn check_sticky(&self, tx: &Arc<Mutex<Transaction>>) -> Result<()> {
        let t = tx.lock();
        match &t.err {
            Some(kind) => Err(eyre::Report::new(kind.clone())),
            None => Ok(()),
        }
    }
}
