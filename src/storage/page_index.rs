//! # Free-Space Index
//!
//! Tracks how much tail free space each data page has so an insert can pick
//! a page without scanning the file. Pages are bucketed by free space in
//! units of `FREE_INTERVAL` bytes: bucket `k` holds pages with at least
//! `k * FREE_INTERVAL` free bytes (41 buckets, 0 through 40).
//!
//! `select` removes the returned page from the index, so a page being
//! written to is invisible to other inserters; the caller must `add` it back
//! afterwards, success or not, with its refreshed free space.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::config::{FREE_INTERVAL, FREE_INTERVALS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSpace {
    pub pgno: u32,
    pub free: usize,
}

pub struct PageIndex {
    buckets: Mutex<Vec<VecDeque<PageSpace>>>,
}

impl PageIndex {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(vec![VecDeque::new(); FREE_INTERVALS + 1]),
        }
    }

    /// Registers (or re-registers) a page with `free` bytes of tail space.
    pub fn add(&self, pgno: u32, free: usize) {
        let bucket = (free / FREE_INTERVAL).min(FREE_INTERVALS);
        self.buckets.lock()[bucket].push_front(PageSpace { pgno, free });
    }

    /// Takes a page with at least `needed` free bytes out of the index, or
    /// `None` if no registered page is roomy enough.
    pub fn select(&self, needed: usize) -> Option<PageSpace> {
        let mut bucket = needed / FREE_INTERVAL;
        if bucket < FREE_INTERVALS {
            // Round up: bucket k only guarantees k full intervals.
            bucket += 1;
        }

        let mut buckets = self.buckets.lock();
        while bucket <= FREE_INTERVALS {
            if let Some(info) = buckets[bucket].pop_front() {
                return Some(info);
            }
            bucket += 1;
        }
        None
    }
}

impl Default for PageIndex {
    fn default() -> Self {
        Self::new()
    }
}
