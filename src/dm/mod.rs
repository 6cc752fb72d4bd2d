//! # Data Manager
//!
//! DataItem-level storage over the pager and the write-ahead log:
//!
//! - `insert` picks a page through the free-space index, logs an INSERT
//!   record, then appends the record bytes to the page;
//! - `read` hands out pinned, cached [`DataItem`] handles (one handle per
//!   UID process-wide, so the handle's lock really serializes writers);
//! - [`DataItem::update`] routes through `log_update` for the WAL envelope;
//! - open checks the boot page's tokens and runs recovery when the previous
//!   shutdown wasn't clean.
//!
//! UIDs pack a record's address: high 32 bits page number, low 16 bits byte
//! offset, middle 16 bits zero.

pub mod data_item;
pub mod recover;

use std::path::Path;
use std::sync::Arc;

use eyre::{ensure, Result};

use crate::config::{DATA_OFFSET, INSERT_ATTEMPTS, MAX_FREE_SPACE};
use crate::error::EngineError;
use crate::storage::{CacheBacking, Page, PageIndex, Pager, PinCache, Wal};
use crate::tm::TransactionManager;
use crate::{Uid, Xid};

pub use data_item::{DataItem, Mutation};

/// Packs a page number and byte offset into a UID.
pub fn make_uid(pgno: u32, offset: u16) -> Uid {
    ((pgno as u64) << 32) | offset as u64
}

/// Splits a UID back into `(pgno, offset)`.
pub fn split_uid(uid: Uid) -> (u32, u16) {
    ((uid >> 32) as u32, uid as u16)
}

struct ItemBacking {
    pager: Arc<Pager>,
}

impl CacheBacking<Uid, Arc<DataItem>> for ItemBacking {
    fn load(&self, uid: Uid) -> Result<Arc<DataItem>> {
        let (pgno, offset) = split_uid(uid);
        let page = self.pager.get(pgno)?;
        Ok(Arc::new(DataItem::parse(page, offset, uid)))
    }

    fn evict(&self, _uid: Uid, item: Arc<DataItem>) -> Result<()> {
        self.pager.release(item.pgno())
    }
}

pub struct DataManager {
    tm: Arc<TransactionManager>,
    pager: Arc<Pager>,
    wal: Wal,
    page_index: PageIndex,
    items: PinCache<Uid, Arc<DataItem>, ItemBacking>,
    boot_page: Arc<Page>,
}

impl DataManager {
    /// Initializes the `.db` and `.log` files of a fresh database.
    pub fn create(prefix: &Path, mem: usize, tm: Arc<TransactionManager>) -> Result<Self> {
        let pager = Arc::new(Pager::create(prefix, mem)?);
        let wal = Wal::create(prefix)?;

        let pgno = pager.new_page(Page::init_boot())?;
        debug_assert_eq!(pgno, 1);
        let boot_page = pager.get(1)?;
        pager.flush(&boot_page)?;

        Ok(Self::assemble(tm, pager, wal, boot_page))
    }

    /// Opens an existing database, recovering first if the boot tokens show
    /// an unclean shutdown.
    pub fn open(prefix: &Path, mem: usize, tm: Arc<TransactionManager>) -> Result<Self> {
        let pager = Arc::new(Pager::open(prefix, mem)?);
        let wal = Wal::open(prefix)?;

        let boot_page = pager.get(1)?;
        if !boot_page.tokens_match() {
            recover::recover(&tm, &wal, &pager)?;
        }

        let dm = Self::assemble(tm, pager, wal, boot_page);
        dm.fill_page_index()?;

        dm.boot_page.set_open_token();
        dm.pager.flush(&dm.boot_page)?;

        Ok(dm)
    }

    fn assemble(
        tm: Arc<TransactionManager>,
        pager: Arc<Pager>,
        wal: Wal,
        boot_page: Arc<Page>,
    ) -> Self {
        Self {
            tm,
            items: PinCache::new(
                0,
                ItemBacking {
                    pager: pager.clone(),
                },
            ),
            pager,
            wal,
            page_index: PageIndex::new(),
            boot_page,
        }
    }

    fn fill_page_index(&self) -> Result<()> {
        for pgno in 2..=self.pager.page_count() {
            let page = self.pager.get(pgno)?;
            self.page_index.add(pgno, page.free_space());
            self.pager.release(pgno)?;
        }
        Ok(())
    }

    pub fn tm(&self) -> &TransactionManager {
        &self.tm
    }

    /// Returns a pinned handle, or `None` when the record was logically
    /// deleted. Callers pair this with [`DataManager::release`].
    pub fn read(&self, uid: Uid) -> Result<Option<Arc<DataItem>>> {
        let item = self.items.get(uid)?;
        if !item.valid() {
            self.items.release(uid)?;
            return Ok(None);
        }
        Ok(Some(item))
    }

    pub fn release(&self, item: &DataItem) -> Result<()> {
        self.items.release(item.uid())
    }

    /// Wraps `data` into a record, places it on a page with room, and
    /// returns its UID. The INSERT log record is durable before the page is
    /// touched.
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        let raw = data_item::wrap_raw(data);
        ensure!(raw.len() <= MAX_FREE_SPACE, EngineError::DataTooLarge);

        let mut picked = None;
        for _ in 0..INSERT_ATTEMPTS {
            if let Some(space) = self.page_index.select(raw.len()) {
                picked = Some(space);
                break;
            }
            let pgno = self.pager.new_page(Page::init_data())?;
            self.page_index.add(pgno, MAX_FREE_SPACE);
        }
        let space = picked.ok_or(EngineError::DatabaseBusy)?;

        let placed = (|| {
            let page = self.pager.get(space.pgno)?;
            let offset = page.fso();
            self.wal
                .log(&recover::insert_record(xid, space.pgno, offset, &raw))?;
            let at = page.insert(&raw);
            debug_assert_eq!(at, offset);
            let free = page.free_space();
            self.pager.release(space.pgno)?;
            Ok::<_, eyre::Report>((offset, free))
        })();

        // The page left the index in select(); it must come back even on
        // failure, with the best known free space.
        match placed {
            Ok((offset, free)) => {
                self.page_index.add(space.pgno, free);
                Ok(make_uid(space.pgno, offset))
            }
            Err(e) => {
                self.page_index.add(space.pgno, space.free);
                Err(e)
            }
        }
    }

    /// Appends an UPDATE record. Called from inside the DataItem write
    /// envelope, before the page bytes change.
    pub fn log_update(&self, xid: Xid, uid: Uid, old_raw: &[u8], new_raw: &[u8]) -> Result<()> {
        self.wal
            .log(&recover::update_record(xid, uid, old_raw, new_raw))
    }

    /// Graceful shutdown: evict every cached item, write the matching close
    /// token onto the boot page, and flush everything out.
    pub fn close(&self) -> Result<()> {
        self.items.close()?;
        self.wal.close()?;

        self.boot_page.set_close_token();
        self.pager.flush(&self.boot_page)?;
        self.pager.release(1)?;
        self.pager.close()
    }
}

/// Usable payload bytes on a completely empty data page.
pub const MAX_PAYLOAD: usize = MAX_FREE_SPACE - data_item::OF_DATA;

const _: () = assert!(MAX_PAYLOAD + data_item::OF_DATA + DATA_OFFSET == crate::config::PAGE_SIZE);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MEM;
    use tempfile::tempdir;

    fn fresh_dm(dir: &std::path::Path) -> DataManager {
        let prefix = dir.join("db");
        let tm = Arc::new(TransactionManager::create(&prefix).unwrap());
        DataManager::create(&prefix, DEFAULT_MEM, tm).unwrap()
    }

    #[test]
    fn insert_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let dm = fresh_dm(dir.path());

        let uid = dm.insert(0, b"hello dm").unwrap();
        let (pgno, offset) = split_uid(uid);
        assert_eq!(pgno, 2, "first data page sits after the boot page");
        assert_eq!(offset, DATA_OFFSET as u16);

        let item = dm.read(uid).unwrap().unwrap();
        assert_eq!(item.payload(), b"hello dm");
        dm.release(&item).unwrap();
    }

    #[test]
    fn same_uid_yields_the_same_handle() {
        let dir = tempdir().unwrap();
        let dm = fresh_dm(dir.path());
        let uid = dm.insert(0, b"one handle").unwrap();

        let a = dm.read(uid).unwrap().unwrap();
        let b = dm.read(uid).unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        dm.release(&a).unwrap();
        dm.release(&b).unwrap();
    }

    #[test]
    fn oversized_insert_is_rejected() {
        let dir = tempdir().unwrap();
        let dm = fresh_dm(dir.path());

        let err = dm.insert(0, &vec![0u8; MAX_PAYLOAD + 1]).unwrap_err();
        assert!(EngineError::DataTooLarge.is_cause_of(&err));

        dm.insert(0, &vec![0u8; MAX_PAYLOAD]).unwrap();
    }

    #[test]
    fn inserts_pack_onto_the_same_page() {
        let dir = tempdir().unwrap();
        let dm = fresh_dm(dir.path());

        let a = dm.insert(0, &[1u8; 16]).unwrap();
        let b = dm.insert(0, &[2u8; 16]).unwrap();
        assert_eq!(split_uid(a).0, split_uid(b).0);
        assert!(split_uid(b).1 > split_uid(a).1);
    }

    #[test]
    fn update_changes_payload_in_place() {
        let dir = tempdir().unwrap();
        let dm = fresh_dm(dir.path());
        let uid = dm.insert(0, &[0u8; 4]).unwrap();

        let item = dm.read(uid).unwrap().unwrap();
        item.update(0, &dm, |payload| {
            payload.copy_from_slice(&[9, 9, 9, 9]);
            Ok(Mutation::Apply(()))
        })
        .unwrap();
        assert_eq!(item.payload(), vec![9, 9, 9, 9]);
        dm.release(&item).unwrap();

        let item = dm.read(uid).unwrap().unwrap();
        assert_eq!(item.payload(), vec![9, 9, 9, 9]);
        dm.release(&item).unwrap();
    }

    #[test]
    fn discarded_update_leaves_bytes_alone() {
        let dir = tempdir().unwrap();
        let dm = fresh_dm(dir.path());
        let uid = dm.insert(0, &[5u8; 4]).unwrap();

        let item = dm.read(uid).unwrap().unwrap();
        item.update(0, &dm, |payload| {
            payload.copy_from_slice(&[1, 2, 3, 4]);
            Ok(Mutation::Discard(()))
        })
        .unwrap();
        assert_eq!(item.payload(), vec![5u8; 4]);
        dm.release(&item).unwrap();
    }

    #[test]
    fn clean_close_then_open_skips_recovery() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("db");
        let uid;
        {
            let tm = Arc::new(TransactionManager::create(&prefix).unwrap());
            let dm = DataManager::create(&prefix, DEFAULT_MEM, tm.clone()).unwrap();
            uid = dm.insert(0, b"persisted").unwrap();
            dm.close().unwrap();
            tm.close().unwrap();
        }

        let tm = Arc::new(TransactionManager::open(&prefix).unwrap());
        let dm = DataManager::open(&prefix, DEFAULT_MEM, tm).unwrap();
        let item = dm.read(uid).unwrap().unwrap();
        assert_eq!(item.payload(), b"persisted");
        dm.release(&item).unwrap();
        dm.close().unwrap();
    }

    #[test]
    fn unclean_open_undoes_active_insert() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("db");
        let uid;
        {
            let tm = Arc::new(TransactionManager::create(&prefix).unwrap());
            let dm = DataManager::create(&prefix, DEFAULT_MEM, tm.clone()).unwrap();
            let xid = tm.begin().unwrap();
            uid = dm.insert(xid, b"doomed").unwrap();
            // Force the dirty page out so the crash image contains the row.
            let item = dm.read(uid).unwrap().unwrap();
            dm.release(&item).unwrap();
            // No close: simulated crash with xid still active.
        }

        let tm = Arc::new(TransactionManager::open(&prefix).unwrap());
        let dm = DataManager::open(&prefix, DEFAULT_MEM, tm.clone()).unwrap();
        assert!(dm.read(uid).unwrap().is_none(), "undo must invalidate the insert");
        assert!(tm.is_aborted(1).unwrap());
        dm.close().unwrap();
    }
}
