//! # Transaction Manager
//!
//! Allocates transaction identifiers (XIDs) and durably tracks each
//! transaction's lifecycle state in a dedicated `.xid` file:
//!
//! ```text
//! +--------------------+--------+--------+-----+
//! | xid counter (u64)  | state  | state  | ... |
//! | 8 bytes            | xid 1  | xid 2  |     |
//! +--------------------+--------+--------+-----+
//! ```
//!
//! One byte per transaction: `0` active, `1` committed, `2` aborted. The
//! byte for `xid` lives at offset `8 + (xid - 1)`, so the file length must
//! always equal `8 + counter`; any other length means the file was tampered
//! with or corrupted and opening fails. The torn-tail healing that the log
//! layer performs has no counterpart here on purpose — a `begin` writes the
//! state byte *before* persisting the new counter, so a crash between the
//! two writes leaves a file that still satisfies the length invariant at the
//! old counter value.
//!
//! `XID 0` is the super transaction: it is defined as always committed,
//! never active, never aborted, and never appears in snapshots. Bootstrap
//! writes (catalog rows, B+ tree nodes) run under it.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use parking_lot::Mutex;

use crate::error::EngineError;
use crate::Xid;

/// The always-committed bootstrap transaction.
pub const SUPER_XID: Xid = 0;

pub const XID_SUFFIX: &str = ".xid";

const XID_HEADER_LEN: u64 = 8;

const STATE_ACTIVE: u8 = 0;
const STATE_COMMITTED: u8 = 1;
const STATE_ABORTED: u8 = 2;

pub struct TransactionManager {
    file: File,
    counter: Mutex<u64>,
}

fn xid_path(prefix: &Path) -> PathBuf {
    let mut os = prefix.as_os_str().to_os_string();
    os.push(XID_SUFFIX);
    PathBuf::from(os)
}

fn state_offset(xid: Xid) -> u64 {
    XID_HEADER_LEN + (xid - 1)
}

impl TransactionManager {
    /// Creates a fresh `.xid` file with a zeroed counter. Fails if the file
    /// already exists.
    pub fn create(prefix: &Path) -> Result<Self> {
        let path = xid_path(prefix);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to create xid file at {:?}", path))?;

        file.write_all_at(&0u64.to_be_bytes(), 0)
            .wrap_err("failed to write xid counter header")?;
        file.sync_data().wrap_err("failed to sync xid file")?;

        Ok(Self {
            file,
            counter: Mutex::new(0),
        })
    }

    /// Opens an existing `.xid` file and validates the length invariant.
    pub fn open(prefix: &Path) -> Result<Self> {
        let path = xid_path(prefix);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open xid file at {:?}", path))?;

        let len = file
            .metadata()
            .wrap_err("failed to stat xid file")?
            .len();
        ensure!(len >= XID_HEADER_LEN, EngineError::BadXidFile);

        let mut header = [0u8; 8];
        file.read_exact_at(&mut header, 0)
            .wrap_err("failed to read xid counter header")?;
        let counter = u64::from_be_bytes(header);

        ensure!(len == XID_HEADER_LEN + counter, EngineError::BadXidFile);

        Ok(Self {
            file,
            counter: Mutex::new(counter),
        })
    }

    /// Reserves the next XID, marks it active and persists the new counter.
    pub fn begin(&self) -> Result<Xid> {
        let mut counter = self.counter.lock();
        let xid = *counter + 1;

        self.write_state(xid, STATE_ACTIVE)?;

        self.file
            .write_all_at(&xid.to_be_bytes(), 0)
            .wrap_err("failed to persist xid counter")?;
        self.file.sync_data().wrap_err("failed to sync xid file")?;

        *counter = xid;
        Ok(xid)
    }

    pub fn commit(&self, xid: Xid) -> Result<()> {
        self.write_state(xid, STATE_COMMITTED)
    }

    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.write_state(xid, STATE_ABORTED)
    }

    pub fn is_active(&self, xid: Xid) -> Result<bool> {
        if xid == SUPER_XID {
            return Ok(false);
        }
        Ok(self.read_state(xid)? == STATE_ACTIVE)
    }

    pub fn is_committed(&self, xid: Xid) -> Result<bool> {
        if xid == SUPER_XID {
            return Ok(true);
        }
        Ok(self.read_state(xid)? == STATE_COMMITTED)
    }

    pub fn is_aborted(&self, xid: Xid) -> Result<bool> {
        if xid == SUPER_XID {
            return Ok(false);
        }
        Ok(self.read_state(xid)? == STATE_ABORTED)
    }

    pub fn close(&self) -> Result<()> {
        self.file.sync_all().wrap_err("failed to sync xid file")
    }

    fn write_state(&self, xid: Xid, state: u8) -> Result<()> {
        self.file
            .write_all_at(&[state], state_offset(xid))
            .wrap_err_with(|| format!("failed to write state for xid {}", xid))?;
        self.file.sync_data().wrap_err("failed to sync xid file")
    }

    fn read_state(&self, xid: Xid) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.file
            .read_exact_at(&mut byte, state_offset(xid))
            .wrap_err_with(|| format!("failed to read state for xid {}", xid))?;
        Ok(byte[0])
    }
}
