//! # LarkDB Configuration Constants
//!
//! Centralizes the engine's layout and tuning constants. Several values are
//! interdependent; the compile-time assertions at the bottom keep them from
//! drifting apart.
//!
//! ```text
//! PAGE_SIZE (8192 bytes)
//!       │
//!       ├─> DATA_OFFSET (2)            data pages: bytes [0..2) hold the FSO
//!       ├─> MAX_FREE_SPACE (derived)   largest record a data page can hold
//!       └─> FREE_INTERVAL (derived)    bucket width of the free-space index
//!
//! BALANCE (32)
//!       └─> NODE_SIZE (derived)        a B+ tree node is one DataItem
//!
//! MIN_CACHE_PAGES (10)
//!       └─> page-cache budgets below this are refused at startup
//! ```

/// Size of every database page in bytes. This is the unit of I/O, caching
/// and write-ahead logging.
pub const PAGE_SIZE: usize = 8192;

/// Offset of the first record byte on a data page; bytes `[0..2)` hold the
/// free space offset (FSO).
pub const DATA_OFFSET: usize = 2;

/// Largest raw DataItem (header included) a data page can hold.
pub const MAX_FREE_SPACE: usize = PAGE_SIZE - DATA_OFFSET;

/// Number of interval buckets in the free-space index; bucket `k` of
/// `0..=FREE_INTERVALS` holds pages with `k` free intervals.
pub const FREE_INTERVALS: usize = 40;

/// Width of one free-space bucket.
pub const FREE_INTERVAL: usize = PAGE_SIZE / FREE_INTERVALS;

/// Boot page: offset of the 8-byte open token.
pub const BOOT_TOKEN_OFFSET: usize = 100;

/// Boot page: length of each token; the close copy lives directly after the
/// open token.
pub const BOOT_TOKEN_LEN: usize = 8;

/// Seed of the rolling hash used for log checksums and string index keys.
pub const HASH_SEED: u32 = 13331;

/// Minimum number of resident pages the page cache will accept.
pub const MIN_CACHE_PAGES: usize = 10;

/// Default page-cache memory budget (64 MB).
pub const DEFAULT_MEM: usize = 64 << 20;

/// B+ tree balance number: nodes split when they reach `2 * BALANCE` keys.
pub const BALANCE: usize = 32;

/// B+ tree node header: `[is_leaf: u8][key_count: u16][sibling: u64]`.
pub const NODE_HEADER_SIZE: usize = 1 + 2 + 8;

/// On-disk size of a B+ tree node: header plus `2 * BALANCE + 2` slots of
/// `(child uid, key)` pairs.
pub const NODE_SIZE: usize = NODE_HEADER_SIZE + (2 * 8) * (2 * BALANCE + 2);

/// Attempts the data manager makes to find or allocate a page with room
/// before reporting the database busy.
pub const INSERT_ATTEMPTS: usize = 5;

/// Default port the server listens on.
pub const DEFAULT_PORT: u16 = 9999;

const _: () = assert!(
    NODE_SIZE <= MAX_FREE_SPACE - 3,
    "a B+ tree node must fit in a single data page record"
);

const _: () = assert!(
    FREE_INTERVAL * FREE_INTERVALS == PAGE_SIZE,
    "free-space buckets must tile the page exactly"
);

const _: () = assert!(MIN_CACHE_PAGES * PAGE_SIZE <= DEFAULT_MEM);
