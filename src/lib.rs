//! # LarkDB - Small Relational Storage Engine
//!
//! LarkDB is a compact relational database engine with SQL-like data
//! definition and manipulation, ACID transactions and crash recovery.
//! Clients speak a hex-line framed socket protocol; statements flow through
//! a table layer, execute under MVCC isolation and persist through a
//! page-based data manager with write-ahead logging.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │    Server / Session (hex framing)   │
//! ├─────────────────────────────────────┤
//! │   SQL Subset (tokenizer / parser)   │
//! ├─────────────────────────────────────┤
//! │  Schema & Catalog │  B+ Tree Index  │
//! ├───────────────────┴─────────────────┤
//! │   Version Manager (MVCC, locks)     │
//! ├─────────────────────────────────────┤
//! │   Data Manager (DataItems, WAL)     │
//! ├─────────────────────────────────────┤
//! │  Storage (pager, page cache, log)   │
//! └─────────────────────────────────────┘
//! ```
//!
//! The transaction manager sits beside the stack: every layer consults it
//! for the durable state of a transaction.
//!
//! ## File Layout
//!
//! One database is a shared path prefix `P` plus four files:
//!
//! ```text
//! P.db    paged data file, 8 KB pages, page 1 is the boot page
//! P.log   write-ahead log with per-record and whole-file checksums
//! P.xid   transaction state bytes behind an 8-byte counter
//! P.bt    catalog head pointer, swapped atomically via P.bt_tmp
//! ```
//!
//! ## Module Overview
//!
//! - [`tm`]: XID allocation and durable transaction states
//! - [`storage`]: pager, pin-counted page cache, WAL, free-space index
//! - [`dm`]: DataItem storage, insert placement, redo/undo recovery
//! - [`vm`]: MVCC visibility, lock table with deadlock detection
//! - [`btree`]: copy-on-write B+ tree over DataItems
//! - [`schema`]: catalog, row codec, WHERE evaluation, statement executor
//! - [`sql`]: the statement subset's tokenizer and parser
//! - [`db`]: the assembled engine and per-connection sessions
//! - [`server`]: thread-per-connection TCP front end

pub mod btree;
pub mod config;
pub mod db;
pub mod dm;
pub mod encoding;
pub mod error;
pub mod schema;
pub mod server;
pub mod sql;
pub mod storage;
pub mod tm;
pub mod vm;

/// 64-bit transaction identifier; `0` is the always-committed super
/// transaction.
pub type Xid = u64;

/// 64-bit DataItem identifier: high 32 bits page number, low 16 bits byte
/// offset.
pub type Uid = u64;

pub use db::{Database, Session};
pub use error::EngineError;
