//! # Storage Layer
//!
//! The paged file, its pin-counted cache, the write-ahead log and the
//! free-space index. Everything above this layer deals in pages and log
//! records; everything below is positioned file I/O.

pub mod cache;
pub mod page;
pub mod page_index;
pub mod pager;
pub mod wal;

pub use cache::{CacheBacking, PinCache};
pub use page::Page;
pub use page_index::{PageIndex, PageSpace};
pub use pager::Pager;
pub use wal::Wal;
