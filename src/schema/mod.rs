//! # Schema Layer
//!
//! The catalog and the statement executor over it. Tables and fields are
//! ordinary MVCC rows; the booter file anchors the newest table of the
//! singly linked catalog list. The [`TableManager`] is the entry point the
//! session layer calls with parsed statements.

pub mod booter;
pub mod field;
pub mod table;

use std::path::Path;
use std::sync::Arc;

use eyre::{ensure, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::dm::DataManager;
use crate::encoding;
use crate::error::EngineError;
use crate::sql::ast;
use crate::vm::{IsolationLevel, VersionManager};
use crate::{Uid, Xid};

pub use booter::Booter;
pub use field::{Field, FieldType, Value};
pub use table::Table;

struct Catalog {
    tables: HashMap<String, Arc<Table>>,
    /// Tables created by each still-open transaction, listed by `show`.
    by_xid: HashMap<Xid, Vec<Arc<Table>>>,
}

pub struct TableManager {
    vm: Arc<VersionManager>,
    dm: Arc<DataManager>,
    booter: Booter,
    catalog: Mutex<Catalog>,
}

impl TableManager {
    /// Initializes an empty catalog for a fresh database.
    pub fn create(
        prefix: &Path,
        vm: Arc<VersionManager>,
        dm: Arc<DataManager>,
    ) -> Result<Self> {
        let booter = Booter::create(prefix)?;
        booter.update(&0u64.to_be_bytes())?;
        Self::assemble(vm, dm, booter)
    }

    /// Opens the catalog of an existing database, loading every table.
    pub fn open(prefix: &Path, vm: Arc<VersionManager>, dm: Arc<DataManager>) -> Result<Self> {
        let booter = Booter::open(prefix)?;
        Self::assemble(vm, dm, booter)
    }

    fn assemble(
        vm: Arc<VersionManager>,
        dm: Arc<DataManager>,
        booter: Booter,
    ) -> Result<Self> {
        let tm = Self {
            vm,
            dm,
            booter,
            catalog: Mutex::new(Catalog {
                tables: HashMap::new(),
                by_xid: HashMap::new(),
            }),
        };

        let mut uid = tm.first_table_uid()?;
        let mut catalog = tm.catalog.lock();
        while uid != 0 {
            let table = Arc::new(Table::load(&tm.vm, &tm.dm, uid)?);
            uid = table.next_uid;
            catalog.tables.insert(table.name.clone(), table);
        }
        log::info!("catalog loaded with {} tables", catalog.tables.len());
        drop(catalog);

        Ok(tm)
    }

    fn first_table_uid(&self) -> Result<Uid> {
        let raw = self.booter.load()?;
        ensure!(raw.len() == 8, "booter file is corrupted");
        Ok(encoding::read_u64(&raw))
    }

    pub fn vm(&self) -> &Arc<VersionManager> {
        &self.vm
    }

    // ---- transaction control --------------------------------------------

    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        self.vm.begin(level)
    }

    pub fn commit(&self, xid: Xid) -> Result<()> {
        self.vm.commit(xid)?;
        self.catalog.lock().by_xid.remove(&xid);
        Ok(())
    }

    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.vm.abort(xid)?;
        // DDL is durable the moment it runs (catalog rows are super-XID
        // writes), so created tables survive the abort.
        self.catalog.lock().by_xid.remove(&xid);
        Ok(())
    }

    // ---- statements ------------------------------------------------------

    pub fn show(&self, xid: Xid) -> Result<String> {
        let catalog = self.catalog.lock();
        let mut out = String::new();
        for table in catalog.tables.values() {
            out.push_str(&table.describe());
            out.push('\n');
        }
        if let Some(created) = catalog.by_xid.get(&xid) {
            for table in created {
                if !catalog.tables.contains_key(&table.name) {
                    out.push_str(&table.describe());
                    out.push('\n');
                }
            }
        }
        Ok(out)
    }

    pub fn create_table(&self, xid: Xid, stmt: &ast::Create) -> Result<String> {
        let mut catalog = self.catalog.lock();
        ensure!(
            !catalog.tables.contains_key(&stmt.table),
            EngineError::DuplicatedTable
        );

        let head = self.first_table_uid()?;
        let table = Arc::new(Table::create(&self.vm, &self.dm, stmt, head)?);
        self.booter.update(&table.uid.to_be_bytes())?;

        catalog.tables.insert(table.name.clone(), table.clone());
        catalog.by_xid.entry(xid).or_default().push(table);

        Ok(format!("create {}", stmt.table))
    }

    fn table(&self, name: &str) -> Result<Arc<Table>> {
        self.catalog
            .lock()
            .tables
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::TableNotFound.into())
    }

    pub fn insert(&self, xid: Xid, stmt: &ast::Insert) -> Result<String> {
        self.table(&stmt.table)?.insert(&self.vm, xid, stmt)?;
        Ok("insert".to_owned())
    }

    pub fn select(&self, xid: Xid, stmt: &ast::Select) -> Result<String> {
        self.table(&stmt.table)?.select(&self.vm, xid, stmt)
    }

    pub fn update(&self, xid: Xid, stmt: &ast::Update) -> Result<String> {
        let count = self.table(&stmt.table)?.update(&self.vm, xid, stmt)?;
        Ok(format!("update {}", count))
    }

    pub fn delete(&self, xid: Xid, stmt: &ast::Delete) -> Result<String> {
        let count = self.table(&stmt.table)?.delete(&self.vm, xid, stmt)?;
        Ok(format!("delete {}", count))
    }

    /// Unpins every table's index trees ahead of engine shutdown. Tables
    /// created by open transactions live in the shared map too, so one pass
    /// covers everything.
    pub fn close(&self) -> Result<()> {
        let catalog = self.catalog.lock();
        for table in catalog.tables.values() {
            table.close()?;
        }
        Ok(())
    }
}
