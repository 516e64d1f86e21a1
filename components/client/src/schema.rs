/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use rusqlite::Connection;
use sql_support::open_database::{ConnectionInitializer, Error as MigrationError, Result as MigrationResult};
use sql_support::ConnExt;

// The local mirror carries what the server schema carries, minus other users,
// plus the two client-only columns: `dirty` (unsent local change) and a usn
// that stays 0 until the server acknowledges the row.
const CREATE_BOOKS_SQL: &str = "
    CREATE TABLE IF NOT EXISTS books (
        uuid     TEXT NOT NULL PRIMARY KEY,
        label    TEXT NOT NULL,
        usn      INTEGER NOT NULL DEFAULT 0,
        dirty    INTEGER NOT NULL DEFAULT 0,
        deleted  INTEGER NOT NULL DEFAULT 0
    )
";

const CREATE_NOTES_SQL: &str = "
    CREATE TABLE IF NOT EXISTS notes (
        uuid       TEXT NOT NULL PRIMARY KEY,
        book_uuid  TEXT NOT NULL,
        body       TEXT NOT NULL,
        usn        INTEGER NOT NULL DEFAULT 0,
        dirty      INTEGER NOT NULL DEFAULT 0,
        deleted    INTEGER NOT NULL DEFAULT 0,
        added_on   INTEGER NOT NULL,
        edited_on  INTEGER NOT NULL DEFAULT 0
    )
";

const CREATE_SYSTEM_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS system (
        key    TEXT PRIMARY KEY,
        value  NOT NULL
    )
";

// A live local book may coexist with any number of tombstones sharing its
// label, so uniqueness only binds live rows.
const CREATE_INDICES_SQL: &str = "
    CREATE UNIQUE INDEX IF NOT EXISTS idx_books_label_live
        ON books(label) WHERE deleted = 0;
    CREATE INDEX IF NOT EXISTS idx_notes_book ON notes(book_uuid);
";

pub(crate) static LAST_MAX_USN_KEY: &str = "last_max_usn";
pub(crate) static LAST_SYNC_AT_KEY: &str = "last_sync_at";
pub(crate) static SESSION_KEY_KEY: &str = "session_key";
pub(crate) static SESSION_KEY_EXPIRY_KEY: &str = "session_key_expiry";
pub(crate) static API_ENDPOINT_KEY: &str = "api_endpoint";

pub struct ClientSchema;

impl ConnectionInitializer for ClientSchema {
    const NAME: &'static str = "dnote client db";
    const END_VERSION: u32 = 1;

    fn prepare(&self, conn: &Connection, _db_empty: bool) -> MigrationResult<()> {
        let initial_pragmas = "
            PRAGMA temp_store = 2;
            PRAGMA journal_mode = WAL;
            PRAGMA foreign_keys = ON;
        ";
        conn.execute_batch(initial_pragmas)?;
        conn.set_prepared_statement_cache_capacity(128);
        Ok(())
    }

    fn init(&self, tx: &Connection) -> MigrationResult<()> {
        log::debug!("Creating client schema");
        tx.execute_all(&[CREATE_BOOKS_SQL, CREATE_NOTES_SQL, CREATE_SYSTEM_TABLE_SQL])?;
        tx.execute_batch(CREATE_INDICES_SQL)?;
        Ok(())
    }

    fn upgrade_from(&self, _tx: &Connection, version: u32) -> MigrationResult<()> {
        Err(MigrationError::IncompatibleVersion(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sql_support::open_database::open_memory_database;

    #[test]
    fn test_create_schema_twice() {
        let conn = open_memory_database(&ClientSchema).unwrap();
        conn.execute_all(&[CREATE_BOOKS_SQL, CREATE_NOTES_SQL, CREATE_SYSTEM_TABLE_SQL])
            .expect("should allow running twice");
    }

    #[test]
    fn test_tombstones_share_labels() {
        let conn = open_memory_database(&ClientSchema).unwrap();
        let insert = "INSERT INTO books (uuid, label, deleted) VALUES (?1, ?2, ?3)";
        conn.execute(insert, rusqlite::params!["u1", "js", 1]).unwrap();
        conn.execute(insert, rusqlite::params!["u2", "js", 1]).unwrap();
        conn.execute(insert, rusqlite::params!["u3", "js", 0]).unwrap();
        assert!(conn
            .execute(insert, rusqlite::params!["u4", "js", 0])
            .is_err());
    }
}
