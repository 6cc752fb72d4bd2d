//! # Visibility Rules
//!
//! Decides whether one entry version is visible to one transaction, from
//! nothing but the entry's `(xmin, xmax)` pair, the transaction's isolation
//! level and snapshot, and the durable commit state in the transaction
//! manager.
//!
//! Read Committed sees the latest committed version; Repeatable Read pins
//! the view to what was committed when the transaction began, using the
//! snapshot of then-active XIDs. The version-skip predicate is Repeatable
//! Read's write-side guard: a committed deleter that the reader cannot see
//! means the reader would be updating around a version it never observed,
//! and must abort instead.

use eyre::Result;

use super::entry::Entry;
use super::{IsolationLevel, Transaction};
use crate::tm::TransactionManager;

/// Is `entry` visible to `tx`?
pub fn is_visible(tm: &TransactionManager, tx: &Transaction, entry: &Entry) -> Result<bool> {
    let xmin = entry.xmin();
    let xmax = entry.xmax();
    match tx.level {
        IsolationLevel::ReadCommitted => read_committed(tm, tx, xmin, xmax),
        IsolationLevel::RepeatableRead => repeatable_read(tm, tx, xmin, xmax),
    }
}

/// Did a committed-but-invisible writer delete this version out from under a
/// Repeatable Read transaction? Always false under Read Committed.
pub fn is_version_skip(tm: &TransactionManager, tx: &Transaction, entry: &Entry) -> Result<bool> {
    if tx.level == IsolationLevel::ReadCommitted {
        return Ok(false);
    }
    let xmax = entry.xmax();
    Ok(tm.is_committed(xmax)? && (xmax > tx.xid || tx.in_snapshot(xmax)))
}

fn read_committed(
    tm: &TransactionManager,
    tx: &Transaction,
    xmin: u64,
    xmax: u64,
) -> Result<bool> {
    // Our own live version.
    if xmin == tx.xid && xmax == 0 {
        return Ok(true);
    }

    if tm.is_committed(xmin)? {
        if xmax == 0 {
            return Ok(true);
        }
        // Deleted, but not by us and the deleter has not committed.
        if xmax != tx.xid && !tm.is_committed(xmax)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn repeatable_read(
    tm: &TransactionManager,
    tx: &Transaction,
    xmin: u64,
    xmax: u64,
) -> Result<bool> {
    // Our own live version.
    if xmin == tx.xid && xmax == 0 {
        return Ok(true);
    }

    // Creator must have committed before we began.
    if tm.is_committed(xmin)? && xmin < tx.xid && !tx.in_snapshot(xmin) {
        if xmax == 0 {
            return Ok(true);
        }
        // Deleter is not us, and its delete is invisible to our snapshot.
        if xmax != tx.xid
            && (!tm.is_committed(xmax)? || xmax > tx.xid || tx.in_snapshot(xmax))
        {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MEM;
    use crate::dm::DataManager;
    use crate::vm::entry::Entry;
    use hashbrown::HashSet;
    use std::sync::Arc;
    use tempfile::tempdir;

    struct Fixture {
        tm: Arc<TransactionManager>,
        dm: DataManager,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("db");
        let tm = Arc::new(TransactionManager::create(&prefix).unwrap());
        let dm = DataManager::create(&prefix, DEFAULT_MEM, tm.clone()).unwrap();
        Fixture { tm, dm, _dir: dir }
    }

    fn entry_with(fx: &Fixture, xmin: u64, xmax: u64) -> Entry {
        let uid = fx.dm.insert(0, &Entry::wrap_raw(xmin, b"v")).unwrap();
        let entry = Entry::load(&fx.dm, uid).unwrap().unwrap();
        if xmax != 0 {
            entry.set_xmax(xmax, &fx.dm).unwrap();
        }
        entry
    }

    fn tx_at(xid: u64, level: IsolationLevel, snapshot: &[u64]) -> Transaction {
        Transaction {
            xid,
            level,
            snapshot: (level == IsolationLevel::RepeatableRead)
                .then(|| snapshot.iter().copied().collect::<HashSet<_>>()),
            err: None,
            auto_aborted: false,
        }
    }

    #[test]
    fn rc_sees_own_live_write() {
        let fx = fixture();
        let xid = fx.tm.begin().unwrap();
        let entry = entry_with(&fx, xid, 0);
        let tx = tx_at(xid, IsolationLevel::ReadCommitted, &[]);

        assert!(is_visible(&fx.tm, &tx, &entry).unwrap());
    }

    #[test]
    fn rc_hides_uncommitted_writer() {
        let fx = fixture();
        let writer = fx.tm.begin().unwrap();
        let reader = fx.tm.begin().unwrap();
        let entry = entry_with(&fx, writer, 0);
        let tx = tx_at(reader, IsolationLevel::ReadCommitted, &[]);

        assert!(!is_visible(&fx.tm, &tx, &entry).unwrap());

        fx.tm.commit(writer).unwrap();
        assert!(is_visible(&fx.tm, &tx, &entry).unwrap());
    }

    #[test]
    fn rc_sees_version_deleted_by_uncommitted_tx() {
        let fx = fixture();
        let writer = fx.tm.begin().unwrap();
        let deleter = fx.tm.begin().unwrap();
        let reader = fx.tm.begin().unwrap();
        fx.tm.commit(writer).unwrap();

        let entry = entry_with(&fx, writer, deleter);
        let tx = tx_at(reader, IsolationLevel::ReadCommitted, &[]);
        assert!(is_visible(&fx.tm, &tx, &entry).unwrap());

        fx.tm.commit(deleter).unwrap();
        assert!(!is_visible(&fx.tm, &tx, &entry).unwrap());
    }

    #[test]
    fn rc_hides_version_it_deleted_itself() {
        let fx = fixture();
        let writer = fx.tm.begin().unwrap();
        let me = fx.tm.begin().unwrap();
        fx.tm.commit(writer).unwrap();

        let entry = entry_with(&fx, writer, me);
        let tx = tx_at(me, IsolationLevel::ReadCommitted, &[]);
        assert!(!is_visible(&fx.tm, &tx, &entry).unwrap());
    }

    #[test]
    fn rr_hides_commits_after_begin() {
        let fx = fixture();
        let reader = fx.tm.begin().unwrap();
        let writer = fx.tm.begin().unwrap();
        fx.tm.commit(writer).unwrap();

        // writer has a larger xid: committed after reader began.
        let entry = entry_with(&fx, writer, 0);
        let tx = tx_at(reader, IsolationLevel::RepeatableRead, &[]);
        assert!(!is_visible(&fx.tm, &tx, &entry).unwrap());
    }

    #[test]
    fn rr_hides_snapshot_members() {
        let fx = fixture();
        let writer = fx.tm.begin().unwrap();
        let reader = fx.tm.begin().unwrap();
        fx.tm.commit(writer).unwrap();

        // writer was active when reader began, so it is in the snapshot.
        let entry = entry_with(&fx, writer, 0);
        let tx = tx_at(reader, IsolationLevel::RepeatableRead, &[writer]);
        assert!(!is_visible(&fx.tm, &tx, &entry).unwrap());
    }

    #[test]
    fn rr_keeps_seeing_version_deleted_after_begin() {
        let fx = fixture();
        let writer = fx.tm.begin().unwrap();
        fx.tm.commit(writer).unwrap();
        let reader = fx.tm.begin().unwrap();
        let deleter = fx.tm.begin().unwrap();
        fx.tm.commit(deleter).unwrap();

        let entry = entry_with(&fx, writer, deleter);
        let tx = tx_at(reader, IsolationLevel::RepeatableRead, &[]);
        assert!(
            is_visible(&fx.tm, &tx, &entry).unwrap(),
            "delete committed after begin must stay invisible to RR"
        );
    }

    #[test]
    fn super_xid_rows_are_visible_to_everyone() {
        let fx = fixture();
        let reader = fx.tm.begin().unwrap();
        let entry = entry_with(&fx, 0, 0);

        let rc = tx_at(reader, IsolationLevel::ReadCommitted, &[]);
        let rr = tx_at(reader, IsolationLevel::RepeatableRead, &[]);
        assert!(is_visible(&fx.tm, &rc, &entry).unwrap());
        assert!(is_visible(&fx.tm, &rr, &entry).unwrap());
    }

    #[test]
    fn version_skip_fires_only_for_invisible_committed_deleter() {
        let fx = fixture();
        let writer = fx.tm.begin().unwrap();
        fx.tm.commit(writer).unwrap();
        let me = fx.tm.begin().unwrap();
        let later = fx.tm.begin().unwrap();
        fx.tm.commit(later).unwrap();

        let entry = entry_with(&fx, writer, later);
        let rr = tx_at(me, IsolationLevel::RepeatableRead, &[]);
        assert!(is_version_skip(&fx.tm, &rr, &entry).unwrap());

        let rc = tx_at(me, IsolationLevel::ReadCommitted, &[]);
        assert!(!is_version_skip(&fx.tm, &rc, &entry).unwrap());

        let live = entry_with(&fx, writer, 0);
        assert!(!is_version_skip(&fx.tm, &rr, &live).unwrap());
    }
}
