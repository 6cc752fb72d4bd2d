//! # Database Facade
//!
//! Assembles the engine's layers over one shared path prefix `P`:
//!
//! ```text
//! P.db   paged data file            P.log  write-ahead log
//! P.xid  transaction states         P.bt   catalog head pointer
//! ```
//!
//! [`Database::create`] initializes the four files; [`Database::open`]
//! recovers if needed and serves sessions. A [`Session`] is one
//! connection's executor: it owns that connection's current transaction
//! and wraps loose statements in implicit Read-Committed transactions.

use std::path::Path;
use std::sync::Arc;

use eyre::{bail, Result};

use crate::config::DEFAULT_MEM;
use crate::dm::DataManager;
use crate::error::EngineError;
use crate::schema::TableManager;
use crate::sql::{self, Statement};
use crate::tm::TransactionManager;
use crate::vm::{IsolationLevel, VersionManager};
use crate::Xid;

pub struct Database {
    tm: Arc<TransactionManager>,
    dm: Arc<DataManager>,
    vm: Arc<VersionManager>,
    tbm: Arc<TableManager>,
}

impl Database {
    /// Initializes a fresh database at `prefix`. Fails if any of the files
    /// already exist.
    pub fn create(prefix: &Path) -> Result<Self> {
        let tm = Arc::new(TransactionManager::create(prefix)?);
        let dm = Arc::new(DataManager::create(prefix, DEFAULT_MEM, tm.clone())?);
        let vm = Arc::new(VersionManager::new(tm.clone(), dm.clone()));
        let tbm = Arc::new(TableManager::create(prefix, vm.clone(), dm.clone())?);
        log::info!("created database at {:?}", prefix);
        Ok(Self { tm, dm, vm, tbm })
    }

    /// Opens an existing database with a page-cache budget of `mem` bytes.
    pub fn open(prefix: &Path, mem: usize) -> Result<Self> {
        let tm = Arc::new(TransactionManager::open(prefix)?);
        let dm = Arc::new(DataManager::open(prefix, mem, tm.clone())?);
        let vm = Arc::new(VersionManager::new(tm.clone(), dm.clone()));
        let tbm = Arc::new(TableManager::open(prefix, vm.clone(), dm.clone())?);
        log::info!("opened database at {:?}", prefix);
        Ok(Self { tm, dm, vm, tbm })
    }

    pub fn table_manager(&self) -> &Arc<TableManager> {
        &self.tbm
    }

    pub fn session(&self) -> Session {
        Session {
            tbm: self.tbm.clone(),
            xid: 0,
        }
    }

    /// Graceful shutdown: unpin everything top-down, then write the close
    /// token so the next open skips recovery.
    pub fn close(&self) -> Result<()> {
        self.tbm.close()?;
        self.vm.close()?;
        self.dm.close()?;
        self.tm.close()?;
        log::info!("database closed cleanly");
        Ok(())
    }
}

/// One connection's statement executor. `xid == 0` means no transaction is
/// open on this session.
pub struct Session {
    tbm: Arc<TableManager>,
    xid: Xid,
}

impl Session {
    /// Parses and executes one statement, returning its textual result.
    pub fn execute(&mut self, statement: &str) -> Result<String> {
        log::debug!("execute: {}", statement);
        let stmt = sql::parse(statement)?;

        match stmt {
            Statement::Begin(begin) => {
                if self.xid != 0 {
                    bail!(EngineError::NestedTransaction);
                }
                self.xid = self.tbm.begin(begin.level)?;
                Ok("begin".to_owned())
            }
            Statement::Commit => {
                if self.xid == 0 {
                    bail!(EngineError::NoTransaction);
                }
                self.tbm.commit(self.xid)?;
                self.xid = 0;
                Ok("commit".to_owned())
            }
            Statement::Abort => {
                if self.xid == 0 {
                    bail!(EngineError::NoTransaction);
                }
                self.tbm.abort(self.xid)?;
                self.xid = 0;
                Ok("abort".to_owned())
            }
            other => self.run(other),
        }
    }

    /// Runs a non-transaction-control statement, inside the session's open
    /// transaction or an implicit single-statement one.
    fn run(&mut self, stmt: Statement) -> Result<String> {
        if self.xid != 0 {
            return self.dispatch(self.xid, &stmt);
        }

        let xid = self.tbm.begin(IsolationLevel::ReadCommitted)?;
        let outcome = self.dispatch(xid, &stmt);
        match &outcome {
            Ok(_) => self.tbm.commit(xid)?,
            Err(_) => {
                // Best effort: a deadlocked statement already auto-aborted.
                if let Err(abort_err) = self.tbm.abort(xid) {
                    log::warn!("implicit abort of {} failed: {:#}", xid, abort_err);
                }
            }
        }
        outcome
    }

    fn dispatch(&self, xid: Xid, stmt: &Statement) -> Result<String> {
        match stmt {
            Statement::Show => self.tbm.show(xid),
            Statement::Create(create) => self.tbm.create_table(xid, create),
            Statement::Insert(insert) => self.tbm.insert(xid, insert),
            Statement::Select(select) => self.tbm.select(xid, select),
            Statement::Update(update) => self.tbm.update(xid, update),
            Statement::Delete(delete) => self.tbm.delete(xid, delete),
            _ => unreachable!("transaction control handled in execute"),
        }
    }

    /// Aborts any transaction the connection left open.
    pub fn close(&mut self) {
        if self.xid != 0 {
            log::warn!("session dropped with open transaction {}, aborting", self.xid);
            if let Err(e) = self.tbm.abort(self.xid) {
                log::error!("abort of abandoned transaction {} failed: {:#}", self.xid, e);
            }
            self.xid = 0;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::kind_of;
    use tempfile::tempdir;

    #[test]
    fn implicit_transactions_commit_per_statement() {
        let dir = tempdir().unwrap();
        let db = Database::create(&dir.path().join("db")).unwrap();
        let mut session = db.session();

        session
            .execute("create table t (id int32, name string) (id)")
            .unwrap();
        assert_eq!(session.execute("insert into t values 1 \"alice\"").unwrap(), "insert");
        assert_eq!(
            session.execute("select * from t where id = 1").unwrap(),
            "[1, alice]\n"
        );
        drop(session);
        db.close().unwrap();
    }

    #[test]
    fn explicit_transaction_spans_statements() {
        let dir = tempdir().unwrap();
        let db = Database::create(&dir.path().join("db")).unwrap();
        let mut session = db.session();
        session.execute("create table t (id int32) (id)").unwrap();

        assert_eq!(session.execute("begin").unwrap(), "begin");
        session.execute("insert into t values 7").unwrap();
        assert_eq!(session.execute("select * from t where id = 7").unwrap(), "[7]\n");
        assert_eq!(session.execute("abort").unwrap(), "abort");

        assert_eq!(session.execute("select * from t where id = 7").unwrap(), "");
        drop(session);
        db.close().unwrap();
    }

    #[test]
    fn nested_begin_is_rejected() {
        let dir = tempdir().unwrap();
        let db = Database::create(&dir.path().join("db")).unwrap();
        let mut session = db.session();

        session.execute("begin").unwrap();
        let err = session.execute("begin").unwrap_err();
        assert_eq!(kind_of(&err), Some(EngineError::NestedTransaction));
        session.execute("commit").unwrap();
        drop(session);
        db.close().unwrap();
    }

    #[test]
    fn commit_without_transaction_is_rejected() {
        let dir = tempdir().unwrap();
        let db = Database::create(&dir.path().join("db")).unwrap();
        let mut session = db.session();

        let err = session.execute("commit").unwrap_err();
        assert_eq!(kind_of(&err), Some(EngineError::NoTransaction));
        drop(session);
        db.close().unwrap();
    }

    #[test]
    fn statement_errors_do_not_poison_the_session() {
        let dir = tempdir().unwrap();
        let db = Database::create(&dir.path().join("db")).unwrap();
        let mut session = db.session();

        assert!(session.execute("select * from missing").is_err());
        session.execute("create table t (id int32) (id)").unwrap();
        session.execute("insert into t values 1").unwrap();
        drop(session);
        db.close().unwrap();
    }

    #[test]
    fn two_sessions_are_isolated() {
        let dir = tempdir().unwrap();
        let db = Database::create(&dir.path().join("db")).unwrap();
        let mut writer = db.session();
        let mut reader = db.session();
        writer.execute("create table t (id int32) (id)").unwrap();

        writer.execute("begin").unwrap();
        writer.execute("insert into t values 1").unwrap();
        assert_eq!(reader.execute("select * from t where id = 1").unwrap(), "");

        writer.execute("commit").unwrap();
        assert_eq!(
            reader.execute("select * from t where id = 1").unwrap(),
            "[1]\n"
        );
        drop(writer);
        drop(reader);
        db.close().unwrap();
    }
}
