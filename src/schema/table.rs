//! # Tables
//!
//! A table is a catalog row plus its field rows, written through the
//! version manager under the super XID — schema changes are durable the
//! moment they happen, since the booter's head pointer and the field index
//! trees already are:
//!
//! ```text
//! [name: string][next table uid: u64][field uid: u64]...
//! ```
//!
//! Tables form a singly linked list newest-first via `next table uid`; the
//! booter points at the head. Rows of the table itself are encoded as the
//! concatenation of the field encodings in declaration order.
//!
//! ## WHERE evaluation
//!
//! Every candidate row comes out of an index probe — there are no table
//! scans. The first condition's field drives the probe; `and` narrows the
//! range when both conditions name the same field, `or` unions two probes.
//! Because string keys are hashes and `or` ranges can overlap, candidates
//! are deduplicated and every decoded row is re-checked against the full
//! clause before it is returned, updated or deleted.

use std::sync::Arc;

use eyre::{ensure, Result};
use hashbrown::HashSet;

use super::field::{Field, Value};
use crate::btree::MAX_KEY;
use crate::dm::DataManager;
use crate::encoding;
use crate::error::EngineError;
use crate::sql::ast::{self, LogicOp};
use crate::tm::SUPER_XID;
use crate::vm::VersionManager;
use crate::{Uid, Xid};

pub struct Table {
    pub uid: Uid,
    pub name: String,
    pub next_uid: Uid,
    pub fields: Vec<Field>,
}

impl Table {
    /// Creates the table and field rows and returns the assembled table.
    /// `next_uid` is the previous catalog head.
    pub fn create(
        vm: &VersionManager,
        dm: &Arc<DataManager>,
        stmt: &ast::Create,
        next_uid: Uid,
    ) -> Result<Self> {
        for indexed in &stmt.indexed {
            ensure!(
                stmt.fields.iter().any(|(name, _)| name == indexed),
                EngineError::FieldNotFound
            );
        }

        let mut fields = Vec::with_capacity(stmt.fields.len());
        for (name, type_name) in &stmt.fields {
            let indexed = stmt.indexed.iter().any(|idx| idx == name);
            fields.push(Field::create(vm, dm, name, type_name, indexed)?);
        }

        let mut table = Self {
            uid: 0,
            name: stmt.table.clone(),
            next_uid,
            fields,
        };

        let mut raw = Vec::new();
        encoding::put_string(&mut raw, &table.name);
        encoding::put_u64(&mut raw, table.next_uid);
        for field in &table.fields {
            encoding::put_u64(&mut raw, field.uid);
        }
        table.uid = vm.insert(SUPER_XID, &raw)?;
        Ok(table)
    }

    pub fn load(vm: &VersionManager, dm: &Arc<DataManager>, uid: Uid) -> Result<Self> {
        let raw = vm
            .read(SUPER_XID, uid)?
            .ok_or_else(|| eyre::eyre!("table row {} is missing", uid))?;

        let (name, mut at) = encoding::read_string(&raw)?;
        ensure!(raw.len() >= at + 8, "table row {} is truncated", uid);
        let next_uid = encoding::read_u64(&raw[at..at + 8]);
        at += 8;

        let mut fields = Vec::new();
        while at < raw.len() {
            ensure!(raw.len() >= at + 8, "table row {} is truncated", uid);
            let field_uid = encoding::read_u64(&raw[at..at + 8]);
            at += 8;
            fields.push(Field::load(vm, dm, field_uid)?);
        }

        Ok(Self {
            uid,
            name,
            next_uid,
            fields,
        })
    }

    pub fn field(&self, name: &str) -> Result<&Field> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| EngineError::FieldNotFound.into())
    }

    // ---- row codec -------------------------------------------------------

    fn row_from_tokens(&self, tokens: &[String]) -> Result<Vec<Value>> {
        ensure!(tokens.len() == self.fields.len(), EngineError::InvalidValues);
        self.fields
            .iter()
            .zip(tokens)
            .map(|(field, token)| field.parse_value(token))
            .collect()
    }

    fn encode_row(&self, row: &[Value]) -> Vec<u8> {
        let mut raw = Vec::new();
        for (field, value) in self.fields.iter().zip(row) {
            field.encode_value(value, &mut raw);
        }
        raw
    }

    fn decode_row(&self, mut raw: &[u8]) -> Result<Vec<Value>> {
        let mut row = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let (value, consumed) = field.decode_value(raw)?;
            row.push(value);
            raw = &raw[consumed..];
        }
        Ok(row)
    }

    // ---- WHERE -----------------------------------------------------------

    /// Candidate row UIDs for a clause, deduplicated, via index probes.
    fn probe_where(&self, clause: Option<&ast::Where>) -> Result<Vec<Uid>> {
        let Some(clause) = clause else {
            // No WHERE: full range over the first indexed field.
            let field = self
                .fields
                .iter()
                .find(|f| f.is_indexed())
                .ok_or(EngineError::TableNoIndex)?;
            return field.index_search(0, MAX_KEY);
        };

        let first_field = self.field(&clause.first.field)?;
        ensure!(first_field.is_indexed(), EngineError::FieldNotIndexed);
        let (mut lo, mut hi) = first_field.condition_range(&clause.first)?;

        let mut uids = match &clause.rest {
            None => first_field.index_search(lo, hi)?,
            Some((LogicOp::And, second)) => {
                if second.field == clause.first.field {
                    // Same field: intersect into a single range.
                    let (lo2, hi2) = first_field.condition_range(second)?;
                    lo = lo.max(lo2);
                    hi = hi.min(hi2);
                }
                // Different field: probe the first range, the row
                // re-check enforces the second condition.
                if lo > hi {
                    Vec::new()
                } else {
                    first_field.index_search(lo, hi)?
                }
            }
            Some((LogicOp::Or, second)) => {
                let second_field = self.field(&second.field)?;
                ensure!(second_field.is_indexed(), EngineError::FieldNotIndexed);
                let (lo2, hi2) = second_field.condition_range(second)?;
                let mut both = first_field.index_search(lo, hi)?;
                both.extend(second_field.index_search(lo2, hi2)?);
                both
            }
        };

        let mut seen = HashSet::with_capacity(uids.len());
        uids.retain(|uid| seen.insert(*uid));
        Ok(uids)
    }

    /// Exact re-check of the clause against a decoded row.
    fn row_matches(&self, clause: Option<&ast::Where>, row: &[Value]) -> Result<bool> {
        let Some(clause) = clause else {
            return Ok(true);
        };

        let check = |cond: &ast::Condition| -> Result<bool> {
            let field = self.field(&cond.field)?;
            let at = self
                .fields
                .iter()
                .position(|f| f.name == cond.field)
                .expect("field() already resolved the name");
            field.condition_matches(cond, &row[at])
        };

        let first = check(&clause.first)?;
        Ok(match &clause.rest {
            None => first,
            Some((LogicOp::And, second)) => first && check(second)?,
            Some((LogicOp::Or, second)) => first || check(second)?,
        })
    }

    /// Visible, clause-matching `(uid, row)` pairs.
    fn visible_rows(
        &self,
        vm: &VersionManager,
        xid: Xid,
        clause: Option<&ast::Where>,
    ) -> Result<Vec<(Uid, Vec<Value>)>> {
        let mut rows = Vec::new();
        for uid in self.probe_where(clause)? {
            let Some(raw) = vm.read(xid, uid)? else {
                continue;
            };
            let row = self.decode_row(&raw)?;
            if self.row_matches(clause, &row)? {
                rows.push((uid, row));
            }
        }
        Ok(rows)
    }

    // ---- DML -------------------------------------------------------------

    pub fn insert(&self, vm: &VersionManager, xid: Xid, stmt: &ast::Insert) -> Result<()> {
        let row = self.row_from_tokens(&stmt.values)?;
        let uid = vm.insert(xid, &self.encode_row(&row))?;

        for (field, value) in self.fields.iter().zip(&row) {
            if field.is_indexed() {
                field.index_insert(value, uid)?;
            }
        }
        Ok(())
    }

    pub fn select(&self, vm: &VersionManager, xid: Xid, stmt: &ast::Select) -> Result<String> {
        let projection: Vec<usize> = if stmt.fields.len() == 1 && stmt.fields[0] == "*" {
            (0..self.fields.len()).collect()
        } else {
            stmt.fields
                .iter()
                .map(|name| {
                    self.fields
                        .iter()
                        .position(|f| &f.name == name)
                        .ok_or_else(|| EngineError::FieldNotFound.into())
                })
                .collect::<Result<_>>()?
        };

        let mut out = String::new();
        for (_, row) in self.visible_rows(vm, xid, stmt.where_clause.as_ref())? {
            let printed: Vec<String> = projection.iter().map(|&i| row[i].to_string()).collect();
            out.push('[');
            out.push_str(&printed.join(", "));
            out.push_str("]\n");
        }
        Ok(out)
    }

    pub fn update(&self, vm: &VersionManager, xid: Xid, stmt: &ast::Update) -> Result<usize> {
        let target = self
            .fields
            .iter()
            .position(|f| f.name == stmt.field)
            .ok_or(EngineError::FieldNotFound)?;
        let new_value = self.fields[target].parse_value(&stmt.value)?;

        let mut count = 0;
        for (uid, mut row) in self.visible_rows(vm, xid, stmt.where_clause.as_ref())? {
            if !vm.delete(xid, uid)? {
                continue;
            }
            row[target] = new_value.clone();
            let new_uid = vm.insert(xid, &self.encode_row(&row))?;
            count += 1;

            // Stale index entries for the old version are tolerated: reads
            // re-check visibility and values.
            for (field, value) in self.fields.iter().zip(&row) {
                if field.is_indexed() {
                    field.index_insert(value, new_uid)?;
                }
            }
        }
        Ok(count)
    }

    pub fn delete(&self, vm: &VersionManager, xid: Xid, stmt: &ast::Delete) -> Result<usize> {
        let mut count = 0;
        for (uid, _) in self.visible_rows(vm, xid, stmt.where_clause.as_ref())? {
            if vm.delete(xid, uid)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Unpins every field's index tree.
    pub fn close(&self) -> Result<()> {
        for field in &self.fields {
            field.close()?;
        }
        Ok(())
    }

    pub fn describe(&self) -> String {
        let fields: Vec<String> = self.fields.iter().map(|f| f.describe()).collect();
        format!("{{{}: {}}}", self.name, fields.join(", "))
    }
}
