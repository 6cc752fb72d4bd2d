//! # Log Records and Crash Recovery
//!
//! Two record kinds describe every data-page mutation:
//!
//! ```text
//! insert = [kind=0][xid: u64][pgno: u32][offset: u16][raw: record image]
//! update = [kind=1][xid: u64][uid: u64][old image][new image]
//! ```
//!
//! An update's old and new images are the *full* record bytes and always the
//! same length, so the payload splits evenly.
//!
//! ## Recovery
//!
//! Runs only when the boot page's tokens disagree (unclean shutdown), after
//! the log has healed its torn tail, so every record seen here is
//! well-formed. Three passes:
//!
//! 1. Scan for the highest page number any record touches and truncate the
//!    paged file there — pages past it were allocated by work the log never
//!    promised.
//! 2. **Redo**: reapply every record whose transaction is *not* active
//!    (committed or aborted — aborted ones will be rolled back by their own
//!    later records if any, and their effects are inert under MVCC).
//! 3. **Undo**: for each transaction still active at crash time, walk its
//!    records newest to oldest: inserts are re-blitted with the valid byte
//!    flipped (logical delete), updates restore the old image. The
//!    transaction is then marked aborted.

use std::sync::Arc;

use eyre::{ensure, Result};
use hashbrown::HashMap;
use zerocopy::big_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::data_item;
use super::split_uid;
use crate::error::EngineError;
use crate::storage::{Pager, Wal};
use crate::tm::TransactionManager;
use crate::{Uid, Xid};

const KIND_INSERT: u8 = 0;
const KIND_UPDATE: u8 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct InsertHeader {
    kind: u8,
    xid: U64,
    pgno: U32,
    offset: U16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct UpdateHeader {
    kind: u8,
    xid: U64,
    uid: U64,
}

const INSERT_HEADER_SIZE: usize = 15;
const UPDATE_HEADER_SIZE: usize = 17;

const _: () = assert!(std::mem::size_of::<InsertHeader>() == INSERT_HEADER_SIZE);
const _: () = assert!(std::mem::size_of::<UpdateHeader>() == UPDATE_HEADER_SIZE);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertRecord {
    pub xid: Xid,
    pub pgno: u32,
    pub offset: u16,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRecord {
    pub xid: Xid,
    pub uid: Uid,
    pub old_raw: Vec<u8>,
    pub new_raw: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Insert(InsertRecord),
    Update(UpdateRecord),
}

impl LogRecord {
    pub fn xid(&self) -> Xid {
        match self {
            LogRecord::Insert(r) => r.xid,
            LogRecord::Update(r) => r.xid,
        }
    }

    pub fn pgno(&self) -> u32 {
        match self {
            LogRecord::Insert(r) => r.pgno,
            LogRecord::Update(r) => split_uid(r.uid).0,
        }
    }
}

pub fn insert_record(xid: Xid, pgno: u32, offset: u16, raw: &[u8]) -> Vec<u8> {
    let header = InsertHeader {
        kind: KIND_INSERT,
        xid: U64::new(xid),
        pgno: U32::new(pgno),
        offset: U16::new(offset),
    };
    let mut out = Vec::with_capacity(INSERT_HEADER_SIZE + raw.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(raw);
    out
}

pub fn update_record(xid: Xid, uid: Uid, old_raw: &[u8], new_raw: &[u8]) -> Vec<u8> {
    debug_assert_eq!(old_raw.len(), new_raw.len());
    let header = UpdateHeader {
        kind: KIND_UPDATE,
        xid: U64::new(xid),
        uid: U64::new(uid),
    };
    let mut out = Vec::with_capacity(UPDATE_HEADER_SIZE + old_raw.len() + new_raw.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(old_raw);
    out.extend_from_slice(new_raw);
    out
}

pub fn parse_record(payload: &[u8]) -> Result<LogRecord> {
    ensure!(!payload.is_empty(), EngineError::BadLogFile);
    match payload[0] {
        KIND_INSERT => {
            ensure!(payload.len() >= INSERT_HEADER_SIZE, EngineError::BadLogFile);
            let header = InsertHeader::read_from_bytes(&payload[..INSERT_HEADER_SIZE])
                .map_err(|e| eyre::eyre!("failed to parse insert log header: {:?}", e))?;
            Ok(LogRecord::Insert(InsertRecord {
                xid: header.xid.get(),
                pgno: header.pgno.get(),
                offset: header.offset.get(),
                raw: payload[INSERT_HEADER_SIZE..].to_vec(),
            }))
        }
        KIND_UPDATE => {
            ensure!(payload.len() >= UPDATE_HEADER_SIZE, EngineError::BadLogFile);
            let header = UpdateHeader::read_from_bytes(&payload[..UPDATE_HEADER_SIZE])
                .map_err(|e| eyre::eyre!("failed to parse update log header: {:?}", e))?;
            let body = &payload[UPDATE_HEADER_SIZE..];
            ensure!(body.len() % 2 == 0, EngineError::BadLogFile);
            let half = body.len() / 2;
            Ok(LogRecord::Update(UpdateRecord {
                xid: header.xid.get(),
                uid: header.uid.get(),
                old_raw: body[..half].to_vec(),
                new_raw: body[half..].to_vec(),
            }))
        }
        other => Err(eyre::eyre!("unknown log record kind {}", other)),
    }
}

/// Replays the log against the paged file after an unclean shutdown.
pub fn recover(tm: &TransactionManager, wal: &Wal, pager: &Arc<Pager>) -> Result<()> {
    log::info!("unclean shutdown detected, recovering");

    // Pass 1: find the highest page the log knows about.
    wal.rewind();
    let mut max_pgno = 0u32;
    while let Some(payload) = wal.next()? {
        let record = parse_record(&payload)?;
        max_pgno = max_pgno.max(record.pgno());
    }
    let max_pgno = max_pgno.max(1);
    pager.truncate_to(max_pgno)?;
    log::info!("truncated data file to {} pages", max_pgno);

    // Pass 2: redo everything from finished transactions.
    wal.rewind();
    let mut redone = 0usize;
    while let Some(payload) = wal.next()? {
        let record = parse_record(&payload)?;
        if !tm.is_active(record.xid())? {
            redo(pager, &record)?;
            redone += 1;
        }
    }
    log::info!("redo pass applied {} records", redone);

    // Pass 3: undo active transactions, newest record first.
    wal.rewind();
    let mut pending: HashMap<Xid, Vec<LogRecord>> = HashMap::new();
    while let Some(payload) = wal.next()? {
        let record = parse_record(&payload)?;
        if tm.is_active(record.xid())? {
            pending.entry(record.xid()).or_default().push(record);
        }
    }
    for (xid, records) in &pending {
        for record in records.iter().rev() {
            undo(pager, record)?;
        }
        tm.abort(*xid)?;
        log::info!("rolled back crashed transaction {}", xid);
    }

    log::info!("recovery complete");
    Ok(())
}

fn redo(pager: &Pager, record: &LogRecord) -> Result<()> {
    match record {
        LogRecord::Insert(r) => {
            let page = pager.get(r.pgno)?;
            page.recover_insert(&r.raw, r.offset);
            pager.release(r.pgno)
        }
        LogRecord::Update(r) => {
            let (pgno, offset) = split_uid(r.uid);
            let page = pager.get(pgno)?;
            page.recover_update(&r.new_raw, offset);
            pager.release(pgno)
        }
    }
}

fn undo(pager: &Pager, record: &LogRecord) -> Result<()> {
    match record {
        LogRecord::Insert(r) => {
            // Logical delete: re-blit the record with its valid byte set.
            let mut raw = r.raw.clone();
            data_item::set_raw_invalid(&mut raw);
            let page = pager.get(r.pgno)?;
            page.recover_insert(&raw, r.offset);
            pager.release(r.pgno)
        }
        LogRecord::Update(r) => {
            let (pgno, offset) = split_uid(r.uid);
            let page = pager.get(pgno)?;
            page.recover_update(&r.old_raw, offset);
            pager.release(pgno)
        }
    }
}
