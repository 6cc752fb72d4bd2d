//! # Write-Ahead Log
//!
//! Append-only `.log` file describing every data-page mutation before it
//! happens. The data manager appends a record, fsyncs, and only then touches
//! the page; recovery replays the log against the paged file.
//!
//! ## File format
//!
//! ```text
//! +--------------------+----------+----------+-----+------------+
//! | global checksum u32| record 1 | record 2 | ... | torn tail? |
//! +--------------------+----------+----------+-----+------------+
//!
//! record = [size: u32][checksum: u32][payload: size bytes]
//! ```
//!
//! Both checksums are the same rolling hash, `h = h * 13331 + b` applied
//! byte by byte: the record checksum covers its payload, the global checksum
//! folds over every record's full bytes (header included) and is rewritten
//! at offset 0 after each append.
//!
//! ## Torn-tail healing
//!
//! A crash can leave a half-written record at the end of the file, and can
//! also land between a record's fsync and the global checksum update. Open
//! therefore walks the records, stops at the first one whose header runs
//! past the file or whose payload checksum disagrees, truncates there, and
//! rewrites the global checksum if the recomputed fold disagrees with the
//! stored one. A record that made it to disk intact is never dropped.
//!
//! ## Concurrency
//!
//! One mutex serializes appends, the checksum rewrite and the read cursor.
//! Iteration (`rewind` / `next`) is only used during recovery, before the
//! database accepts work.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use parking_lot::Mutex;
use zerocopy::big_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::encoding::rolling_checksum;
use crate::error::EngineError;

pub const LOG_SUFFIX: &str = ".log";

/// Offset of the first record: right after the global checksum.
const RECORDS_START: u64 = 4;

/// Per-record header: payload size then payload checksum.
const RECORD_HEADER_SIZE: usize = 8;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct RecordHeader {
    size: U32,
    checksum: U32,
}

const _: () = assert!(std::mem::size_of::<RecordHeader>() == RECORD_HEADER_SIZE);

fn log_path(prefix: &Path) -> PathBuf {
    let mut os = prefix.as_os_str().to_os_string();
    os.push(LOG_SUFFIX);
    PathBuf::from(os)
}

fn wrap_record(payload: &[u8]) -> Vec<u8> {
    let header = RecordHeader {
        size: U32::new(payload.len() as u32),
        checksum: U32::new(rolling_checksum(0, payload)),
    };
    let mut record = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
    record.extend_from_slice(header.as_bytes());
    record.extend_from_slice(payload);
    record
}

struct WalInner {
    file: File,
    xchecksum: u32,
    /// Read cursor for `next`.
    pos: u64,
    /// Logical end of the log (valid bytes).
    size: u64,
}

impl WalInner {
    /// Reads the record under the cursor, full bytes including header.
    /// Returns `None` on a torn or absent record.
    fn intern_next(&mut self) -> Result<Option<Vec<u8>>> {
        if self.pos + RECORD_HEADER_SIZE as u64 > self.size {
            return Ok(None);
        }

        let mut header_bytes = [0u8; RECORD_HEADER_SIZE];
        self.file
            .read_exact_at(&mut header_bytes, self.pos)
            .wrap_err("failed to read log record header")?;
        let header = RecordHeader::read_from_bytes(&header_bytes)
            .map_err(|e| eyre::eyre!("failed to parse log record header: {:?}", e))?;

        let payload_len = header.size.get() as u64;
        if self.pos + RECORD_HEADER_SIZE as u64 + payload_len > self.size {
            return Ok(None);
        }

        let total = RECORD_HEADER_SIZE + payload_len as usize;
        let mut record = vec![0u8; total];
        self.file
            .read_exact_at(&mut record, self.pos)
            .wrap_err("failed to read log record")?;

        if rolling_checksum(0, &record[RECORD_HEADER_SIZE..]) != header.checksum.get() {
            return Ok(None);
        }

        self.pos += total as u64;
        Ok(Some(record))
    }

    fn write_xchecksum(&mut self) -> Result<()> {
        self.file
            .write_all_at(&self.xchecksum.to_be_bytes(), 0)
            .wrap_err("failed to write global log checksum")?;
        self.file.sync_data().wrap_err("failed to sync log file")
    }
}

pub struct Wal {
    inner: Mutex<WalInner>,
}

impl Wal {
    pub fn create(prefix: &Path) -> Result<Self> {
        let path = log_path(prefix);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to create log file at {:?}", path))?;

        let mut inner = WalInner {
            file,
            xchecksum: 0,
            pos: RECORDS_START,
            size: RECORDS_START,
        };
        inner.write_xchecksum()?;

        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    pub fn open(prefix: &Path) -> Result<Self> {
        let path = log_path(prefix);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open log file at {:?}", path))?;

        let size = file.metadata().wrap_err("failed to stat log file")?.len();
        ensure!(size >= RECORDS_START, EngineError::BadLogFile);

        let mut header = [0u8; 4];
        file.read_exact_at(&mut header, 0)
            .wrap_err("failed to read global log checksum")?;

        let mut inner = WalInner {
            file,
            xchecksum: u32::from_be_bytes(header),
            pos: RECORDS_START,
            size,
        };
        Self::heal_tail(&mut inner)?;

        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Walks the records, truncates at the first torn one, and reconciles
    /// the stored global checksum with the fold over the surviving records.
    fn heal_tail(inner: &mut WalInner) -> Result<()> {
        inner.pos = RECORDS_START;
        let mut xcheck = 0u32;
        while let Some(record) = inner.intern_next()? {
            xcheck = rolling_checksum(xcheck, &record);
        }

        if inner.pos != inner.size {
            log::warn!(
                "truncating torn log tail: {} of {} bytes survive",
                inner.pos,
                inner.size
            );
            inner
                .file
                .set_len(inner.pos)
                .wrap_err("failed to truncate torn log tail")?;
            inner.size = inner.pos;
        }

        if xcheck != inner.xchecksum {
            log::warn!("global log checksum stale after crash, rewriting");
            inner.xchecksum = xcheck;
            inner.write_xchecksum()?;
        }

        inner.file.sync_data().wrap_err("failed to sync log file")?;
        inner.pos = RECORDS_START;
        Ok(())
    }

    /// Appends one record durably: record bytes first, then the updated
    /// global checksum, each followed by an fsync.
    pub fn log(&self, payload: &[u8]) -> Result<()> {
        let record = wrap_record(payload);
        let mut inner = self.inner.lock();

        let at = inner.size;
        inner
            .file
            .write_all_at(&record, at)
            .wrap_err("failed to append log record")?;
        inner.file.sync_data().wrap_err("failed to sync log file")?;
        inner.size += record.len() as u64;

        inner.xchecksum = rolling_checksum(inner.xchecksum, &record);
        inner.write_xchecksum()
    }

    /// Resets the read cursor to the first record.
    pub fn rewind(&self) {
        self.inner.lock().pos = RECORDS_START;
    }

    /// Returns the next record's payload, or `None` at the end of the valid
    /// log.
    pub fn next(&self) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        Ok(inner
            .intern_next()?
            .map(|record| record[RECORD_HEADER_SIZE..].to_vec()))
    }

    pub fn close(&self) -> Result<()> {
        let inner = self.inner.lock();
        inner.file.sync_all().wrap_err("failed to sync log file")
    }
}
