//! # End-to-End Statement Tests
//!
//! Drives the assembled engine through its public session API: DDL, DML,
//! point and range queries, projections, and persistence across clean
//! close/reopen cycles.

use larkdb::config::DEFAULT_MEM;
use larkdb::Database;
use tempfile::tempdir;

#[test]
fn create_insert_point_select() {
    let dir = tempdir().unwrap();
    let db = Database::create(&dir.path().join("db")).unwrap();
    let mut session = db.session();

    session
        .execute("create table t (id int32, name string) (id)")
        .unwrap();
    session.execute("insert into t values 1 \"alice\"").unwrap();

    let out = session.execute("select * from t where id = 1").unwrap();
    assert_eq!(out, "[1, alice]\n");

    drop(session);
    db.close().unwrap();
}

#[test]
fn range_select_between_bounds() {
    let dir = tempdir().unwrap();
    let db = Database::create(&dir.path().join("db")).unwrap();
    let mut session = db.session();

    session
        .execute("create table t (id int32, name string) (id)")
        .unwrap();
    for (id, name) in [(1, "a"), (2, "b"), (3, "c"), (4, "d")] {
        session
            .execute(&format!("insert into t values {} \"{}\"", id, name))
            .unwrap();
    }

    let out = session
        .execute("select * from t where id > 1 and id < 4")
        .unwrap();
    let mut rows: Vec<&str> = out.lines().collect();
    rows.sort_unstable();
    assert_eq!(rows, vec!["[2, b]", "[3, c]"]);

    drop(session);
    db.close().unwrap();
}

#[test]
fn projection_and_show() {
    let dir = tempdir().unwrap();
    let db = Database::create(&dir.path().join("db")).unwrap();
    let mut session = db.session();

    session
        .execute("create table people (id int64, name string, age int32) (id)")
        .unwrap();
    session
        .execute("insert into people values 10 \"carol\" 44")
        .unwrap();

    let out = session
        .execute("select name, age from people where id = 10")
        .unwrap();
    assert_eq!(out, "[carol, 44]\n");

    let shown = session.execute("show").unwrap();
    assert!(shown.contains("{people: (id, int64, Index), (name, string, NoIndex), (age, int32, NoIndex)}"));

    drop(session);
    db.close().unwrap();
}

#[test]
fn update_and_delete_counts() {
    let dir = tempdir().unwrap();
    let db = Database::create(&dir.path().join("db")).unwrap();
    let mut session = db.session();

    session.execute("create table t (id int32) (id)").unwrap();
    for id in 1..=5 {
        session
            .execute(&format!("insert into t values {}", id))
            .unwrap();
    }

    assert_eq!(session.execute("update t set id = 9 where id = 3").unwrap(), "update 1");
    assert_eq!(session.execute("delete from t where id > 3").unwrap(), "delete 3");

    let out = session.execute("select * from t").unwrap();
    let mut rows: Vec<&str> = out.lines().collect();
    rows.sort_unstable();
    assert_eq!(rows, vec!["[1]", "[2]"]);

    drop(session);
    db.close().unwrap();
}

#[test]
fn string_index_equality_and_collision_guard() {
    let dir = tempdir().unwrap();
    let db = Database::create(&dir.path().join("db")).unwrap();
    let mut session = db.session();

    session
        .execute("create table users (name string, score int32) (name)")
        .unwrap();
    session.execute("insert into users values \"alice\" 1").unwrap();
    session.execute("insert into users values \"bob\" 2").unwrap();
    session.execute("insert into users values \"alice\" 3").unwrap();

    let out = session
        .execute("select score from users where name = \"alice\"")
        .unwrap();
    let mut rows: Vec<&str> = out.lines().collect();
    rows.sort_unstable();
    assert_eq!(rows, vec!["[1]", "[3]"]);

    drop(session);
    db.close().unwrap();
}

#[test]
fn data_survives_clean_reopen() {
    let dir = tempdir().unwrap();
    let prefix = dir.path().join("db");

    {
        let db = Database::create(&prefix).unwrap();
        let mut session = db.session();
        session
            .execute("create table t (id int32, name string) (id)")
            .unwrap();
        session.execute("insert into t values 1 \"alice\"").unwrap();
        session.execute("insert into t values 2 \"bob\"").unwrap();
        drop(session);
        db.close().unwrap();
    }

    let db = Database::open(&prefix, DEFAULT_MEM).unwrap();
    let mut session = db.session();

    let out = session.execute("select * from t where id > 0").unwrap();
    let mut rows: Vec<&str> = out.lines().collect();
    rows.sort_unstable();
    assert_eq!(rows, vec!["[1, alice]", "[2, bob]"]);

    session.execute("insert into t values 3 \"carol\"").unwrap();
    assert_eq!(
        session.execute("select * from t where id = 3").unwrap(),
        "[3, carol]\n"
    );

    drop(session);
    db.close().unwrap();
}

#[test]
fn open_on_missing_files_fails_and_create_on_existing_fails() {
    let dir = tempdir().unwrap();
    let prefix = dir.path().join("db");

    assert!(Database::open(&prefix, DEFAULT_MEM).is_err());

    let db = Database::create(&prefix).unwrap();
    db.close().unwrap();
    assert!(Database::create(&prefix).is_err());
}

#[test]
fn invalid_statements_report_errors() {
    let dir = tempdir().unwrap();
    let db = Database::create(&dir.path().join("db")).unwrap();
    let mut session = db.session();

    assert!(session.execute("frobnicate").is_err());
    assert!(session.execute("select * from nope").is_err());
    assert!(session.execute("create table t (id int128) (id)").is_err());
    assert!(session.execute("create table t (id int32) (other)").is_err());

    // The session is still healthy.
    session.execute("create table t (id int32) (id)").unwrap();

    drop(session);
    db.close().unwrap();
}
