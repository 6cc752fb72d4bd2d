//! # MVCC Entries
//!
//! An entry is the payload of a DataItem holding one row version:
//!
//! ```text
//! [xmin: u64][xmax: u64][row bytes]
//! ```
//!
//! `xmin` is the transaction that created the version. `xmax` starts at 0
//! (live) and is set exactly once, to the transaction that deleted the
//! version; that write is the only in-place mutation the version manager
//! ever performs — every other change becomes a brand-new entry.

use std::sync::Arc;

use eyre::Result;

use crate::dm::{DataItem, DataManager, Mutation};
use crate::encoding;
use crate::{Uid, Xid};

const OF_XMIN: usize = 0;
const OF_XMAX: usize = 8;
const OF_DATA: usize = 16;

pub struct Entry {
    uid: Uid,
    item: Arc<DataItem>,
}

impl Entry {
    /// Builds the on-disk form of a new live version.
    pub fn wrap_raw(xid: Xid, data: &[u8]) -> Vec<u8> {
        let mut raw = Vec::with_capacity(OF_DATA + data.len());
        encoding::put_u64(&mut raw, xid);
        encoding::put_u64(&mut raw, 0);
        raw.extend_from_slice(data);
        raw
    }

    /// Fetches the entry at `uid`, or `None` for a logically deleted item.
    pub fn load(dm: &DataManager, uid: Uid) -> Result<Option<Self>> {
        Ok(dm.read(uid)?.map(|item| Self { uid, item }))
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn item(&self) -> &Arc<DataItem> {
        &self.item
    }

    pub fn xmin(&self) -> Xid {
        self.item
            .read(|payload| encoding::read_u64(&payload[OF_XMIN..OF_XMAX]))
    }

    pub fn xmax(&self) -> Xid {
        self.item
            .read(|payload| encoding::read_u64(&payload[OF_XMAX..OF_DATA]))
    }

    /// Copies the row bytes out.
    pub fn data(&self) -> Vec<u8> {
        self.item.read(|payload| payload[OF_DATA..].to_vec())
    }

    /// Stamps the deleting transaction. WAL-logged through the item's
    /// update envelope.
    pub fn set_xmax(&self, xid: Xid, dm: &DataManager) -> Result<()> {
        self.item.update(xid, dm, |payload| {
            encoding::write_u64(&mut payload[OF_XMAX..OF_DATA], xid);
            Ok(Mutation::Apply(()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MEM;
    use crate::tm::TransactionManager;
    use tempfile::tempdir;

    #[test]
    fn wrap_raw_layout() {
        let raw = Entry::wrap_raw(5, b"row");
        assert_eq!(raw.len(), 16 + 3);
        assert_eq!(encoding::read_u64(&raw[0..8]), 5);
        assert_eq!(encoding::read_u64(&raw[8..16]), 0);
        assert_eq!(&raw[16..], b"row");
    }

    #[test]
    fn load_and_stamp_xmax() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("db");
        let tm = Arc::new(TransactionManager::create(&prefix).unwrap());
        let dm = DataManager::create(&prefix, DEFAULT_MEM, tm).unwrap();

        let uid = dm.insert(1, &Entry::wrap_raw(1, b"alice")).unwrap();
        let entry = Entry::load(&dm, uid).unwrap().unwrap();

        assert_eq!(entry.xmin(), 1);
        assert_eq!(entry.xmax(), 0);
        assert_eq!(entry.data(), b"alice");

        entry.set_xmax(2, &dm).unwrap();
        assert_eq!(entry.xmax(), 2);
        assert_eq!(entry.data(), b"alice");
        dm.release(entry.item()).unwrap();
    }
}
