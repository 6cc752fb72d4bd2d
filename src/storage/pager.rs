//! # Pager
//!
//! Owns the `.db` file: a flat array of `PAGE_SIZE` pages, page 1 first.
//! Pages are served through the pin-counted cache; a page loads on first
//! `get`, stays resident while pinned, and is flushed-if-dirty when the last
//! pin drops.
//!
//! New pages are written through to disk immediately so a crash right after
//! allocation cannot leave a hole in the file that later pages would sit
//! past.
//!
//! The file is accessed with positioned reads and writes (`FileExt`), so
//! there is no shared cursor to serialize; durability comes from explicit
//! `sync_data` after every write-through and flush.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};

use super::cache::{CacheBacking, PinCache};
use super::page::Page;
use crate::config::{MIN_CACHE_PAGES, PAGE_SIZE};
use crate::error::EngineError;

pub const DB_SUFFIX: &str = ".db";

fn db_path(prefix: &Path) -> PathBuf {
    let mut os = prefix.as_os_str().to_os_string();
    os.push(DB_SUFFIX);
    PathBuf::from(os)
}

fn page_offset(pgno: u32) -> u64 {
    (pgno as u64 - 1) * PAGE_SIZE as u64
}

fn flush_page(file: &File, page: &Page) -> Result<()> {
    let image = page.snapshot();
    file.write_all_at(&image, page_offset(page.pgno()))
        .wrap_err_with(|| format!("failed to write page {}", page.pgno()))?;
    file.sync_data().wrap_err("failed to sync db file")?;
    page.clear_dirty();
    Ok(())
}

struct PageBacking {
    file: Arc<File>,
}

impl CacheBacking<u32, Arc<Page>> for PageBacking {
    fn load(&self, pgno: u32) -> Result<Arc<Page>> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.file
            .read_exact_at(&mut buf, page_offset(pgno))
            .wrap_err_with(|| format!("failed to read page {}", pgno))?;
        Ok(Arc::new(Page::new(pgno, buf.into_boxed_slice())))
    }

    fn evict(&self, _pgno: u32, page: Arc<Page>) -> Result<()> {
        if page.is_dirty() {
            flush_page(&self.file, &page)?;
        }
        Ok(())
    }
}

pub struct Pager {
    file: Arc<File>,
    page_count: AtomicU32,
    cache: PinCache<u32, Arc<Page>, PageBacking>,
}

impl Pager {
    pub fn create(prefix: &Path, mem: usize) -> Result<Self> {
        let path = db_path(prefix);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to create db file at {:?}", path))?;
        Self::new(file, mem)
    }

    pub fn open(prefix: &Path, mem: usize) -> Result<Self> {
        let path = db_path(prefix);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open db file at {:?}", path))?;
        Self::new(file, mem)
    }

    fn new(file: File, mem: usize) -> Result<Self> {
        let capacity = mem / PAGE_SIZE;
        ensure!(capacity >= MIN_CACHE_PAGES, EngineError::InvalidMem);

        let len = file.metadata().wrap_err("failed to stat db file")?.len();
        let file = Arc::new(file);

        Ok(Self {
            cache: PinCache::new(capacity, PageBacking { file: file.clone() }),
            page_count: AtomicU32::new((len / PAGE_SIZE as u64) as u32),
            file,
        })
    }

    /// Allocates the next page number and writes the page image through to
    /// disk. The page is not left resident; callers `get` it when needed.
    pub fn new_page(&self, data: Box<[u8]>) -> Result<u32> {
        let pgno = self.page_count.fetch_add(1, Ordering::SeqCst) + 1;
        let page = Page::new(pgno, data);
        flush_page(&self.file, &page)?;
        Ok(pgno)
    }

    /// Returns a pinned page.
    pub fn get(&self, pgno: u32) -> Result<Arc<Page>> {
        self.cache.get(pgno)
    }

    /// Drops a pin; the last pin flushes a dirty page and evicts it.
    pub fn release(&self, pgno: u32) -> Result<()> {
        self.cache.release(pgno)
    }

    /// Forces a pinned page to disk now.
    pub fn flush(&self, page: &Page) -> Result<()> {
        flush_page(&self.file, page)
    }

    pub fn page_count(&self) -> u32 {
        self.page_count.load(Ordering::SeqCst)
    }

    /// Shrinks the file to exactly `max_pgno` pages. Only recovery calls
    /// this, before any page is resident.
    pub fn truncate_to(&self, max_pgno: u32) -> Result<()> {
        self.file
            .set_len(max_pgno as u64 * PAGE_SIZE as u64)
            .wrap_err("failed to truncate db file")?;
        self.page_count.store(max_pgno, Ordering::SeqCst);
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.cache.close()?;
        self.file.sync_all().wrap_err("failed to sync db file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MEM;
    use tempfile::tempdir;

    #[test]
    fn rejects_memory_below_floor() {
        let dir = tempdir().unwrap();
        let err = Pager::create(&dir.path().join("db"), PAGE_SIZE * 2).unwrap_err();
        assert!(EngineError::InvalidMem.is_cause_of(&err));
    }

    #[test]
    fn new_page_is_written_through() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("db");
        let pager = Pager::create(&prefix, DEFAULT_MEM).unwrap();

        let pgno = pager.new_page(Page::init_data()).unwrap();
        assert_eq!(pgno, 1);
        assert_eq!(pager.page_count(), 1);

        let len = std::fs::metadata(db_path(&prefix)).unwrap().len();
        assert_eq!(len, PAGE_SIZE as u64);
    }

    #[test]
    fn dirty_page_survives_release_and_reload() {
        let dir = tempdir().unwrap();
        let pager = Pager::create(&dir.path().join("db"), DEFAULT_MEM).unwrap();
        let pgno = pager.new_page(Page::init_data()).unwrap();

        {
            let page = pager.get(pgno).unwrap();
            page.insert(&[42, 43, 44]);
            pager.release(pgno).unwrap();
        }

        let page = pager.get(pgno).unwrap();
        page.with(|data| assert_eq!(&data[2..5], &[42, 43, 44]));
        assert!(!page.is_dirty());
        pager.release(pgno).unwrap();
    }

    #[test]
    fn reopen_sees_page_count() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("db");

        {
            let pager = Pager::create(&prefix, DEFAULT_MEM).unwrap();
            pager.new_page(Page::init_boot()).unwrap();
            pager.new_page(Page::init_data()).unwrap();
            pager.close().unwrap();
        }

        let pager = Pager::open(&prefix, DEFAULT_MEM).unwrap();
        assert_eq!(pager.page_count(), 2);
    }

    #[test]
    fn truncate_drops_trailing_pages() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("db");
        let pager = Pager::create(&prefix, DEFAULT_MEM).unwrap();
        for _ in 0..4 {
            pager.new_page(Page::init_data()).unwrap();
        }

        pager.truncate_to(2).unwrap();

        assert_eq!(pager.page_count(), 2);
        let len = std::fs::metadata(db_path(&prefix)).unwrap().len();
        assert_eq!(len, 2 * PAGE_SIZE as u64);
        assert_eq!(pager.new_page(Page::init_data()).unwrap(), 3);
    }
}
