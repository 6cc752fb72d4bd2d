//! # Fields
//!
//! A field is one column of a table, persisted as its own catalog row:
//!
//! ```text
//! [name: string][type: string][index boot uid: u64]
//! ```
//!
//! A zero boot UID means the field is unindexed and cannot appear in WHERE
//! clauses. Indexed fields own a B+ tree keyed by the field's value mapped
//! into `u64`: integers by order-preserving sign-bit flip, strings by the
//! rolling hash (collisions are resolved by re-checking the decoded value
//! on equality probes).

use std::sync::Arc;

use eyre::{bail, ensure, Result};

use crate::btree::{BPlusTree, MAX_KEY};
use crate::dm::DataManager;
use crate::encoding;
use crate::error::EngineError;
use crate::sql::ast::{CompareOp, Condition};
use crate::tm::SUPER_XID;
use crate::vm::VersionManager;
use crate::Uid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int32,
    Int64,
    Str,
}

impl FieldType {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "int32" => Ok(FieldType::Int32),
            "int64" => Ok(FieldType::Int64),
            "string" => Ok(FieldType::Str),
            _ => bail!(EngineError::InvalidFieldType),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Int32 => "int32",
            FieldType::Int64 => "int64",
            FieldType::Str => "string",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Str(String),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{}", v),
        }
    }
}

pub struct Field {
    pub uid: Uid,
    pub name: String,
    pub ftype: FieldType,
    pub index_root: Uid,
    tree: Option<BPlusTree>,
}

impl Field {
    /// Creates a field (and its index tree when requested) and persists the
    /// catalog row. Catalog rows are written under the super XID: schema
    /// changes are durable the moment they happen, like the index trees
    /// they anchor.
    pub fn create(
        vm: &VersionManager,
        dm: &Arc<DataManager>,
        name: &str,
        type_name: &str,
        indexed: bool,
    ) -> Result<Self> {
        let ftype = FieldType::from_name(type_name)?;

        let (index_root, tree) = if indexed {
            let boot = BPlusTree::create(dm)?;
            (boot, Some(BPlusTree::load(boot, dm.clone())?))
        } else {
            (0, None)
        };

        let mut raw = Vec::new();
        encoding::put_string(&mut raw, name);
        encoding::put_string(&mut raw, ftype.name());
        encoding::put_u64(&mut raw, index_root);
        let uid = vm.insert(SUPER_XID, &raw)?;

        Ok(Self {
            uid,
            name: name.to_owned(),
            ftype,
            index_root,
            tree,
        })
    }

    /// Loads a field row (always committed catalog data, read as super).
    pub fn load(vm: &VersionManager, dm: &Arc<DataManager>, uid: Uid) -> Result<Self> {
        let raw = vm
            .read(SUPER_XID, uid)?
            .ok_or_else(|| eyre::eyre!("field row {} is missing", uid))?;

        let (name, consumed) = encoding::read_string(&raw)?;
        let (type_name, consumed2) = encoding::read_string(&raw[consumed..])?;
        let at = consumed + consumed2;
        ensure!(raw.len() >= at + 8, "field row {} is truncated", uid);
        let index_root = encoding::read_u64(&raw[at..at + 8]);

        let tree = (index_root != 0)
            .then(|| BPlusTree::load(index_root, dm.clone()))
            .transpose()?;

        Ok(Self {
            uid,
            name,
            ftype: FieldType::from_name(&type_name)?,
            index_root,
            tree,
        })
    }

    pub fn is_indexed(&self) -> bool {
        self.index_root != 0
    }

    /// Parses a statement token into this field's value type.
    pub fn parse_value(&self, token: &str) -> Result<Value> {
        match self.ftype {
            FieldType::Int32 => token
                .parse::<i32>()
                .map(Value::Int32)
                .map_err(|_| EngineError::InvalidValues.into()),
            FieldType::Int64 => token
                .parse::<i64>()
                .map(Value::Int64)
                .map_err(|_| EngineError::InvalidValues.into()),
            FieldType::Str => Ok(Value::Str(token.to_owned())),
        }
    }

    /// Maps a value into the u64 index key space.
    pub fn value_key(&self, value: &Value) -> u64 {
        match value {
            Value::Int32(v) => encoding::int_key(*v as i64),
            Value::Int64(v) => encoding::int_key(*v),
            Value::Str(v) => encoding::string_key(v),
        }
    }

    pub fn encode_value(&self, value: &Value, out: &mut Vec<u8>) {
        match value {
            Value::Int32(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::Int64(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::Str(v) => encoding::put_string(out, v),
        }
    }

    /// Decodes one value off the front of `buf`; returns it and the bytes
    /// consumed.
    pub fn decode_value(&self, buf: &[u8]) -> Result<(Value, usize)> {
        match self.ftype {
            FieldType::Int32 => {
                ensure!(buf.len() >= 4, EngineError::InvalidValues);
                let v = i32::from_be_bytes(buf[..4].try_into().unwrap());
                Ok((Value::Int32(v), 4))
            }
            FieldType::Int64 => {
                ensure!(buf.len() >= 8, EngineError::InvalidValues);
                let v = i64::from_be_bytes(buf[..8].try_into().unwrap());
                Ok((Value::Int64(v), 8))
            }
            FieldType::Str => {
                let (s, consumed) = encoding::read_string(buf)?;
                Ok((Value::Str(s), consumed))
            }
        }
    }

    /// The key range a condition on this field selects.
    pub fn condition_range(&self, cond: &Condition) -> Result<(u64, u64)> {
        let key = self.value_key(&self.parse_value(&cond.value)?);
        Ok(match cond.op {
            CompareOp::Lt => (0, key.saturating_sub(1)),
            CompareOp::Eq => (key, key),
            CompareOp::Gt => (key.saturating_add(1), MAX_KEY),
        })
    }

    /// Does a row value satisfy a condition? Implemented over the key
    /// mapping (which preserves integer order exactly); string equality is
    /// additionally verified on the decoded value because the hash is not
    /// collision-free.
    pub fn condition_matches(&self, cond: &Condition, value: &Value) -> Result<bool> {
        let (lo, hi) = self.condition_range(cond)?;
        let key = self.value_key(value);
        if !(lo..=hi).contains(&key) {
            return Ok(false);
        }
        if self.ftype == FieldType::Str && cond.op == CompareOp::Eq {
            return Ok(matches!(value, Value::Str(s) if s == &cond.value));
        }
        Ok(true)
    }

    pub fn index_insert(&self, value: &Value, uid: Uid) -> Result<()> {
        let tree = self
            .tree
            .as_ref()
            .ok_or(EngineError::FieldNotIndexed)?;
        tree.insert(self.value_key(value), uid)
    }

    pub fn index_search(&self, lo: u64, hi: u64) -> Result<Vec<Uid>> {
        let tree = self
            .tree
            .as_ref()
            .ok_or(EngineError::FieldNotIndexed)?;
        tree.search_range(lo, hi)
    }

    /// Unpins the index tree's boot item.
    pub fn close(&self) -> Result<()> {
        match &self.tree {
            Some(tree) => tree.close(),
            None => Ok(()),
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "({}, {}, {})",
            self.name,
            self.ftype.name(),
            if self.is_indexed() { "Index" } else { "NoIndex" }
        )
    }
}
