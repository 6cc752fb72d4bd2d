//! # Index Manager — Copy-on-Write B+ Tree
//!
//! A non-unique ordered index from `u64` keys to row UIDs, stored entirely
//! as DataItems: each node is one item, and the tree's *boot item* is an
//! 8-byte item holding the current root node's UID. Node mutations run
//! through the DataItem update envelope, so every change is WAL-logged
//! under the super XID and survives crashes without version management —
//! index probes re-check row visibility anyway.
//!
//! Growing the tree never rewrites a root in place: a root split inserts a
//! fresh root node and swaps the 8 bytes inside the boot item (under the
//! boot lock).
//!
//! Concurrent splits are tolerated on the read path by the sibling-follow
//! rule: a descent that runs past a node's last key follows `sibling`
//! instead, where a just-moved key must now live.

pub mod node;

use std::sync::Arc;

use eyre::{eyre, Result};

use crate::config::BALANCE;
use crate::dm::{DataItem, DataManager, Mutation};
use crate::encoding;
use crate::tm::SUPER_XID;
use crate::Uid;

pub struct BPlusTree {
    boot_uid: Uid,
    boot_item: Arc<DataItem>,
    boot_lock: parking_lot::Mutex<()>,
    dm: Arc<DataManager>,
}

/// Outcome of a recursive insert: the split-off node to register in the
/// parent, if any.
#[derive(Default)]
struct Lifted {
    new_node: Uid,
    new_key: u64,
}

/// Outcome of one node-level insert attempt.
struct Placed {
    /// Retry in this sibling instead (key moved right).
    sibling: Uid,
    lifted: Lifted,
}

impl BPlusTree {
    /// Allocates an empty tree: an empty leaf root plus the boot item
    /// pointing at it. Returns the boot item's UID.
    pub fn create(dm: &Arc<DataManager>) -> Result<Uid> {
        let root_uid = dm.insert(SUPER_XID, &node::empty_leaf_raw())?;
        let mut boot = Vec::with_capacity(8);
        encoding::put_u64(&mut boot, root_uid);
        dm.insert(SUPER_XID, &boot)
    }

    /// Loads a tree by its boot item UID; the boot item stays pinned until
    /// [`BPlusTree::close`].
    pub fn load(boot_uid: Uid, dm: Arc<DataManager>) -> Result<Self> {
        let boot_item = dm
            .read(boot_uid)?
            .ok_or_else(|| eyre!("index boot item {} is missing", boot_uid))?;
        Ok(Self {
            boot_uid,
            boot_item,
            boot_lock: parking_lot::Mutex::new(()),
            dm,
        })
    }

    pub fn boot_uid(&self) -> Uid {
        self.boot_uid
    }

    fn root_uid(&self) -> Uid {
        let _guard = self.boot_lock.lock();
        self.boot_item.read(|payload| encoding::read_u64(payload))
    }

    /// Installs a fresh root above a split root: `[left | key | right]`.
    fn lift_root(&self, left: Uid, right: Uid, key: u64) -> Result<()> {
        let _guard = self.boot_lock.lock();
        let new_root = self
            .dm
            .insert(SUPER_XID, &node::root_raw(left, right, key))?;
        self.boot_item.update(SUPER_XID, &self.dm, |payload| {
            encoding::write_u64(&mut payload[..8], new_root);
            Ok(Mutation::Apply(()))
        })
    }

    /// Every row UID whose key falls in `[lo, hi]`, in key order.
    pub fn search_range(&self, lo: u64, hi: u64) -> Result<Vec<Uid>> {
        let mut leaf_uid = self.find_leaf(self.root_uid(), lo)?;
        let mut uids = Vec::new();
        loop {
            let item = self.node_item(leaf_uid)?;
            let (mut found, sibling) = item.read(|raw| node::leaf_search_range(raw, lo, hi));
            self.dm.release(&item)?;
            uids.append(&mut found);
            if sibling == 0 {
                return Ok(uids);
            }
            leaf_uid = sibling;
        }
    }

    /// Point lookup: all row UIDs stored under exactly `key`.
    pub fn search(&self, key: u64) -> Result<Vec<Uid>> {
        self.search_range(key, key)
    }

    /// Inserts one `(key, row uid)` pair, splitting up the spine as needed.
    pub fn insert(&self, key: u64, uid: Uid) -> Result<()> {
        let root = self.root_uid();
        let lifted = self.insert_into(root, uid, key)?;
        if lifted.new_node != 0 {
            self.lift_root(root, lifted.new_node, lifted.new_key)?;
        }
        Ok(())
    }

    /// Unpins the boot item. The tree must not be used afterwards.
    pub fn close(&self) -> Result<()> {
        self.dm.release(&self.boot_item)
    }

    fn node_item(&self, uid: Uid) -> Result<Arc<DataItem>> {
        eyre::ensure!(uid != 0, "index descent hit a null node");
        self.dm
            .read(uid)?
            .ok_or_else(|| eyre!("index node {} is missing", uid))
    }

    fn find_leaf(&self, mut node_uid: Uid, key: u64) -> Result<Uid> {
        loop {
            let item = self.node_item(node_uid)?;
            let leaf = item.read(|raw| node::is_leaf(raw));
            self.dm.release(&item)?;
            if leaf {
                return Ok(node_uid);
            }
            node_uid = self.descend(node_uid, key)?;
        }
    }

    /// One interior step: child for `key`, following siblings as needed.
    fn descend(&self, mut node_uid: Uid, key: u64) -> Result<Uid> {
        loop {
            let item = self.node_item(node_uid)?;
            let (child, sibling) = item.read(|raw| node::search_next(raw, key));
            self.dm.release(&item)?;
            if child != 0 {
                return Ok(child);
            }
            node_uid = sibling;
        }
    }

    fn insert_into(&self, node_uid: Uid, uid: Uid, key: u64) -> Result<Lifted> {
        let item = self.node_item(node_uid)?;
        let leaf = item.read(|raw| node::is_leaf(raw));
        self.dm.release(&item)?;

        if leaf {
            self.place(node_uid, uid, key)
        } else {
            let child = self.descend(node_uid, key)?;
            let lifted = self.insert_into(child, uid, key)?;
            if lifted.new_node != 0 {
                self.place(node_uid, lifted.new_node, lifted.new_key)
            } else {
                Ok(Lifted::default())
            }
        }
    }

    /// Inserts into one node, retrying in siblings until a node accepts the
    /// key, splitting when the accepting node fills up.
    fn place(&self, mut node_uid: Uid, uid: Uid, key: u64) -> Result<Lifted> {
        loop {
            let item = self.node_item(node_uid)?;
            let placed = self.insert_and_split(&item, uid, key);
            self.dm.release(&item)?;
            let placed = placed?;
            if placed.sibling != 0 {
                node_uid = placed.sibling;
            } else {
                return Ok(placed.lifted);
            }
        }
    }

    fn insert_and_split(&self, item: &Arc<DataItem>, uid: Uid, key: u64) -> Result<Placed> {
        item.update(SUPER_XID, &self.dm, |raw| {
            if !node::insert_slot(raw, uid, key) {
                return Ok(Mutation::Discard(Placed {
                    sibling: node::sibling(raw),
                    lifted: Lifted::default(),
                }));
            }

            if !node::needs_split(raw) {
                return Ok(Mutation::Apply(Placed {
                    sibling: 0,
                    lifted: Lifted::default(),
                }));
            }

            let (right_image, first_key) = node::split_image(raw);
            let right_uid = self.dm.insert(SUPER_XID, &right_image)?;
            node::set_key_count(raw, BALANCE);
            node::set_sibling(raw, right_uid);
            Ok(Mutation::Apply(Placed {
                sibling: 0,
                lifted: Lifted {
                    new_node: right_uid,
                    new_key: first_key,
                },
            }))
        })
    }
}

/// Handy for WHERE-less scans and `>` ranges.
pub const MAX_KEY: u64 = u64::MAX;
