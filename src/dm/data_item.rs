//! # DataItems
//!
//! The smallest addressable record on a data page:
//!
//! ```text
//! [valid: u8][size: u16][payload: size bytes]
//! ```
//!
//! `valid = 0` means live; `1` means the record was logically deleted by
//! recovery undo. The 3-byte header is never counted in `size`.
//!
//! A `DataItem` is a handle: it remembers its UID, its byte range, and keeps
//! the owning page pinned for as long as the handle is cached. The handle's
//! own read/write lock serializes access to that byte range — the page
//! buffer itself is only locked for the moment of a copy.
//!
//! Mutations go through [`DataItem::update`], which implements the
//! write-ahead envelope: snapshot the old record image, let the caller
//! rewrite the payload in a scratch buffer, append the UPDATE log record,
//! and only then blit the new image onto the page. A caller that decides
//! mid-flight not to change anything returns [`Mutation::Discard`] and the
//! page is left untouched, nothing logged.

use std::sync::Arc;

use eyre::Result;
use parking_lot::RwLock;

use super::DataManager;
use crate::encoding;
use crate::storage::Page;
use crate::{Uid, Xid};

pub const OF_VALID: usize = 0;
pub const OF_SIZE: usize = 1;
pub const OF_DATA: usize = 3;

/// Outcome of an update closure: apply and log, or roll back silently.
/// Either way the carried value is handed back to the caller.
pub enum Mutation<T> {
    Apply(T),
    Discard(T),
}

pub struct DataItem {
    uid: Uid,
    offset: u16,
    /// Full record length, header included.
    len: usize,
    page: Arc<Page>,
    lock: RwLock<()>,
}

/// Wraps a payload into on-page record form.
pub fn wrap_raw(data: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(OF_DATA + data.len());
    raw.push(0);
    encoding::put_u16(&mut raw, data.len() as u16);
    raw.extend_from_slice(data);
    raw
}

/// Flips a record image's valid byte to "deleted". Used by recovery undo.
pub fn set_raw_invalid(raw: &mut [u8]) {
    raw[OF_VALID] = 1;
}

impl DataItem {
    /// Builds a handle over the record starting at `offset` on `page`.
    pub fn parse(page: Arc<Page>, offset: u16, uid: Uid) -> Self {
        let size = page.with(|data| {
            let at = offset as usize;
            encoding::read_u16(&data[at + OF_SIZE..at + OF_DATA])
        });
        Self {
            uid,
            offset,
            len: OF_DATA + size as usize,
            page,
            lock: RwLock::new(()),
        }
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn pgno(&self) -> u32 {
        self.page.pgno()
    }

    pub fn valid(&self) -> bool {
        let _guard = self.lock.read();
        self.page
            .with(|data| data[self.offset as usize + OF_VALID] == 0)
    }

    /// Runs `f` over the payload bytes under the record's read lock.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let _guard = self.lock.read();
        self.page.with(|data| {
            let start = self.offset as usize;
            f(&data[start + OF_DATA..start + self.len])
        })
    }

    /// Copies the payload out.
    pub fn payload(&self) -> Vec<u8> {
        self.read(|data| data.to_vec())
    }

    /// Copies the full record image (header included) out.
    pub fn raw(&self) -> Vec<u8> {
        let _guard = self.lock.read();
        self.snapshot_raw()
    }

    fn snapshot_raw(&self) -> Vec<u8> {
        self.page.with(|data| {
            let start = self.offset as usize;
            data[start..start + self.len].to_vec()
        })
    }

    /// The write-ahead update envelope. `f` receives a scratch copy of the
    /// payload; on [`Mutation::Apply`] the UPDATE record (old and new full
    /// images) is logged and the new image is written to the page, all
    /// before the record's write lock is released.
    pub fn update<T>(
        &self,
        xid: Xid,
        dm: &DataManager,
        f: impl FnOnce(&mut [u8]) -> Result<Mutation<T>>,
    ) -> Result<T> {
        let _guard = self.lock.write();

        let old_raw = self.snapshot_raw();
        let mut new_raw = old_raw.clone();

        match f(&mut new_raw[OF_DATA..])? {
            Mutation::Discard(value) => Ok(value),
            Mutation::Apply(value) => {
                dm.log_update(xid, self.uid, &old_raw, &new_raw)?;
                self.page.with_mut(|data| {
                    let start = self.offset as usize;
                    data[start..start + self.len].copy_from_slice(&new_raw);
                });
                Ok(value)
            }
        }
    }
}
