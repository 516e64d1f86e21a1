/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use rusqlite::Connection;
use sql_support::open_database::{ConnectionInitializer, Error as MigrationError, Result as MigrationResult};
use sql_support::ConnExt;

const CREATE_USERS_SQL: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id                INTEGER PRIMARY KEY,
        api_key           TEXT NOT NULL UNIQUE,
        max_usn           INTEGER NOT NULL DEFAULT 0,
        full_sync_before  INTEGER NOT NULL DEFAULT 0,
        created_at        INTEGER NOT NULL
    )
";

const CREATE_BOOKS_SQL: &str = "
    CREATE TABLE IF NOT EXISTS books (
        uuid       TEXT NOT NULL PRIMARY KEY,
        user_id    INTEGER NOT NULL REFERENCES users(id),
        label      TEXT NOT NULL,
        usn        INTEGER NOT NULL,
        deleted    INTEGER NOT NULL DEFAULT 0,
        added_on   INTEGER NOT NULL,
        edited_on  INTEGER NOT NULL DEFAULT 0
    )
";

const CREATE_NOTES_SQL: &str = "
    CREATE TABLE IF NOT EXISTS notes (
        uuid       TEXT NOT NULL PRIMARY KEY,
        user_id    INTEGER NOT NULL REFERENCES users(id),
        book_uuid  TEXT NOT NULL,
        body       TEXT NOT NULL,
        usn        INTEGER NOT NULL,
        deleted    INTEGER NOT NULL DEFAULT 0,
        added_on   INTEGER NOT NULL,
        edited_on  INTEGER NOT NULL DEFAULT 0,
        client     TEXT NOT NULL DEFAULT ''
    )
";

// Deleted tombstones keep their row but drop out of the uniqueness universe,
// so a fresh live book may reuse the label.
const CREATE_INDICES_SQL: &str = "
    CREATE UNIQUE INDEX IF NOT EXISTS idx_books_user_label
        ON books(user_id, label) WHERE deleted = 0;
    CREATE INDEX IF NOT EXISTS idx_books_user_usn ON books(user_id, usn);
    CREATE INDEX IF NOT EXISTS idx_notes_user_usn ON notes(user_id, usn);
    CREATE INDEX IF NOT EXISTS idx_notes_book ON notes(book_uuid);
";

pub struct ServerSchema;

impl ConnectionInitializer for ServerSchema {
    const NAME: &'static str = "dnote server db";
    const END_VERSION: u32 = 1;

    fn prepare(&self, conn: &Connection, _db_empty: bool) -> MigrationResult<()> {
        let initial_pragmas = "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = 2;
        ";
        conn.execute_batch(initial_pragmas)?;
        conn.set_prepared_statement_cache_capacity(128);
        Ok(())
    }

    fn init(&self, tx: &Connection) -> MigrationResult<()> {
        log::debug!("Creating server schema");
        tx.execute_all(&[CREATE_USERS_SQL, CREATE_BOOKS_SQL, CREATE_NOTES_SQL])?;
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
        let conn = open_memory_database(&ServerSchema).unwrap();
        conn.execute_all(&[CREATE_USERS_SQL, CREATE_BOOKS_SQL, CREATE_NOTES_SQL])
            .expect("should allow running twice");
    }

    #[test]
    fn test_live_label_uniqueness_is_partial() {
        let conn = open_memory_database(&ServerSchema).unwrap();
        conn.execute(
            "INSERT INTO users (id, api_key, created_at) VALUES (1, 'k', 0)",
            [],
        )
        .unwrap();
        let insert = "INSERT INTO books (uuid, user_id, label, usn, deleted, added_on)
                      VALUES (?1, 1, ?2, 1, ?3, 0)";
        conn.execute(insert, rusqlite::params!["u1", "js", 1]).unwrap();
        conn.execute(insert, rusqlite::params!["u2", "js", 1]).unwrap();
        conn.execute(insert, rusqlite::params!["u3", "js", 0]).unwrap();
        // A second live "js" violates the partial unique index.
        assert!(conn
            .execute(insert, rusqlite::params!["u4", "js", 0])
            .is_err());
    }
}
