/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Open a SQLite database connection, initializing or upgrading the schema as
//! needed. The schema version lives in `PRAGMA user_version`; a freshly
//! created database runs `init`, an existing one runs `upgrade_from` once per
//! version until it reaches `END_VERSION`, all inside one transaction.

use crate::ConnExt;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Incompatible database version: {0}")]
    IncompatibleVersion(u32),
    #[error("Error executing SQL: {0}")]
    SqlError(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Implemented by each database's `schema` module.
pub trait ConnectionInitializer {
    /// Name to display in the logs.
    const NAME: &'static str;

    /// The version that a fully migrated database has.
    const END_VERSION: u32;

    /// Runs immediately after the connection opens, outside the schema
    /// transaction. Pragmas go here.
    fn prepare(&self, _conn: &Connection, _db_empty: bool) -> Result<()> {
        Ok(())
    }

    /// Initialize a brand-new database to `END_VERSION`.
    fn init(&self, tx: &Connection) -> Result<()>;

    /// Upgrade from `version` to `version + 1`.
    fn upgrade_from(&self, tx: &Connection, version: u32) -> Result<()>;

    /// Runs after init/upgrade, still inside the transaction.
    fn finish(&self, _conn: &Connection) -> Result<()> {
        Ok(())
    }
}

pub fn open_database<CI: ConnectionInitializer, P: AsRef<Path>>(
    path: P,
    initializer: &CI,
) -> Result<Connection> {
    open_database_with_flags(path, OpenFlags::default(), initializer)
}

pub fn open_memory_database<CI: ConnectionInitializer>(initializer: &CI) -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    run_initializer(&conn, initializer)?;
    Ok(conn)
}

pub fn open_database_with_flags<CI: ConnectionInitializer, P: AsRef<Path>>(
    path: P,
    open_flags: OpenFlags,
    initializer: &CI,
) -> Result<Connection> {
    let conn = Connection::open_with_flags(path, open_flags)?;
    run_initializer(&conn, initializer)?;
    Ok(conn)
}

fn run_initializer<CI: ConnectionInitializer>(conn: &Connection, initializer: &CI) -> Result<()> {
    log::debug!("{}: opening database", CI::NAME);
    let mut current_version = get_schema_version(conn)?;
    initializer.prepare(conn, current_version == 0)?;
    let tx = conn.unchecked_transaction()?;
    if current_version == 0 {
        log::debug!("{}: initializing new database", CI::NAME);
        initializer.init(&tx)?;
    } else {
        if current_version > CI::END_VERSION {
            return Err(Error::IncompatibleVersion(current_version));
        }
        while current_version < CI::END_VERSION {
            log::debug!(
                "{}: upgrading database from {}",
                CI::NAME,
                current_version
            );
            initializer.upgrade_from(&tx, current_version)?;
            current_version += 1;
        }
    }
    set_schema_version(&tx, CI::END_VERSION)?;
    initializer.finish(&tx)?;
    tx.commit()?;
    log::debug!("{}: database open successful", CI::NAME);
    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<u32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestInitializer;

    impl ConnectionInitializer for TestInitializer {
        const NAME: &'static str = "test db";
        const END_VERSION: u32 = 2;

        fn init(&self, tx: &Connection) -> Result<()> {
            tx.execute_batch("CREATE TABLE person (name TEXT NOT NULL, age INTEGER);")?;
            Ok(())
        }

        fn upgrade_from(&self, tx: &Connection, version: u32) -> Result<()> {
            match version {
                1 => {
                    tx.execute_batch("ALTER TABLE person ADD COLUMN age INTEGER;")?;
                    Ok(())
                }
                _ => Err(Error::IncompatibleVersion(version)),
            }
        }
    }

    #[test]
    fn test_init_fresh() {
        let conn = open_memory_database(&TestInitializer).unwrap();
        let version: u32 = conn.query_one("PRAGMA user_version").unwrap();
        assert_eq!(version, TestInitializer::END_VERSION);
        conn.execute(
            "INSERT INTO person (name, age) VALUES ('ahmed', 40)",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_upgrade_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upgrade.db");
        // Lay down a v1 database by hand.
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE person (name TEXT NOT NULL); PRAGMA user_version = 1;",
            )
            .unwrap();
        }
        let conn = open_database(&path, &TestInitializer).unwrap();
        let version: u32 = conn.query_one("PRAGMA user_version").unwrap();
        assert_eq!(version, 2);
        conn.execute("INSERT INTO person (name, age) VALUES ('x', 1)", [])
            .unwrap();
    }

    #[test]
    fn test_version_too_new() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toonew.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("PRAGMA user_version = 99;").unwrap();
        }
        assert!(matches!(
            open_database(&path, &TestInitializer),
            Err(Error::IncompatibleVersion(99))
        ));
    }
}
