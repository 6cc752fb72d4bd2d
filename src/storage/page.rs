//! # Pages
//!
//! Every page is `PAGE_SIZE` bytes. Page 1 is the boot page; pages 2 and up
//! are data pages.
//!
//! ## Data pages
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  --------------------------------------------
//! 0       2     FSO: offset where free space begins
//! 2..FSO        append-only sequence of DataItem records
//! FSO..         free
//! ```
//!
//! Records are never moved or compacted; the FSO only grows within a process
//! lifetime (recovery may rebuild a page wholesale).
//!
//! ## Boot page
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  --------------------------------------------
//! 100     8     open token, randomized at every open
//! 108     8     close token, copied from the open token on
//!               graceful shutdown
//! ```
//!
//! Matching tokens at open mean the previous shutdown was clean; a mismatch
//! triggers log-driven recovery.
//!
//! ## Locking
//!
//! The byte buffer sits behind its own mutex; all access goes through the
//! `with` / `with_mut` closures, which never perform I/O. Record-level
//! serialization is the DataItem lock's job, one layer up.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rand::Rng;

use crate::config::{BOOT_TOKEN_LEN, BOOT_TOKEN_OFFSET, DATA_OFFSET, PAGE_SIZE};
use crate::encoding;

pub struct Page {
    pgno: u32,
    data: Mutex<Box<[u8]>>,
    dirty: AtomicBool,
}

impl Page {
    pub fn new(pgno: u32, data: Box<[u8]>) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self {
            pgno,
            data: Mutex::new(data),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn pgno(&self) -> u32 {
        self.pgno
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    /// Read access to the page bytes.
    pub fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let data = self.data.lock();
        f(&data)
    }

    /// Write access to the page bytes; marks the page dirty.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut data = self.data.lock();
        self.mark_dirty();
        f(&mut data)
    }

    /// Copies the full page out, for flushing.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().to_vec()
    }

    // ---- data page operations -------------------------------------------

    /// A fresh data page image: FSO pointing just past itself.
    pub fn init_data() -> Box<[u8]> {
        let mut raw = vec![0u8; PAGE_SIZE];
        encoding::write_u16(&mut raw[..2], DATA_OFFSET as u16);
        raw.into_boxed_slice()
    }

    pub fn fso(&self) -> u16 {
        self.with(|data| encoding::read_u16(&data[..2]))
    }

    pub fn free_space(&self) -> usize {
        PAGE_SIZE - self.fso() as usize
    }

    /// Appends a raw record at the FSO and advances it. The caller has made
    /// sure the record fits (the page came out of the free-space index).
    pub fn insert(&self, raw: &[u8]) -> u16 {
        self.with_mut(|data| {
            let offset = encoding::read_u16(&data[..2]);
            let start = offset as usize;
            data[start..start + raw.len()].copy_from_slice(raw);
            encoding::write_u16(&mut data[..2], offset + raw.len() as u16);
            offset
        })
    }

    /// Redo of an insert: blits the record at its logged offset and grows
    /// the FSO to cover it. Idempotent.
    pub fn recover_insert(&self, raw: &[u8], offset: u16) {
        self.with_mut(|data| {
            let start = offset as usize;
            data[start..start + raw.len()].copy_from_slice(raw);
            let fso = encoding::read_u16(&data[..2]);
            let end = offset + raw.len() as u16;
            if fso < end {
                encoding::write_u16(&mut data[..2], end);
            }
        });
    }

    /// Redo/undo of an update: blits a record image at its offset.
    pub fn recover_update(&self, raw: &[u8], offset: u16) {
        self.with_mut(|data| {
            let start = offset as usize;
            data[start..start + raw.len()].copy_from_slice(raw);
        });
    }

    // ---- boot page operations -------------------------------------------

    /// A fresh boot page image with a random open token and a zeroed close
    /// token.
    pub fn init_boot() -> Box<[u8]> {
        let mut raw = vec![0u8; PAGE_SIZE];
        rand::thread_rng().fill(&mut raw[BOOT_TOKEN_OFFSET..BOOT_TOKEN_OFFSET + BOOT_TOKEN_LEN]);
        raw.into_boxed_slice()
    }

    /// Randomizes the open token, invalidating the close copy until the next
    /// graceful shutdown.
    pub fn set_open_token(&self) {
        self.with_mut(|data| {
            rand::thread_rng()
                .fill(&mut data[BOOT_TOKEN_OFFSET..BOOT_TOKEN_OFFSET + BOOT_TOKEN_LEN]);
        });
    }

    /// Copies the open token over the close slot, marking a clean shutdown.
    pub fn set_close_token(&self) {
        self.with_mut(|data| {
            data.copy_within(
                BOOT_TOKEN_OFFSET..BOOT_TOKEN_OFFSET + BOOT_TOKEN_LEN,
                BOOT_TOKEN_OFFSET + BOOT_TOKEN_LEN,
            );
        });
    }

    /// True when the open and close tokens agree, i.e. the last shutdown was
    /// clean.
    pub fn tokens_match(&self) -> bool {
        self.with(|data| {
            data[BOOT_TOKEN_OFFSET..BOOT_TOKEN_OFFSET + BOOT_TOKEN_LEN]
                == data[BOOT_TOKEN_OFFSET + BOOT_TOKEN_LEN..BOOT_TOKEN_OFFSET + 2 * BOOT_TOKEN_LEN]
        })
    }
}
