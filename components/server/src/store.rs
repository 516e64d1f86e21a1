/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The authoritative entity store. Every mutation runs in one transaction
//! that allocates the next usn(s) and writes the row(s), so the per-user usn
//! sequence is gap-free and strictly monotonic for any reader that started
//! after the writer committed.

use crate::error::*;
use crate::schema::ServerSchema;
use rusqlite::{named_params, Connection, Row};
use sql_support::open_database::{open_database, open_memory_database};
use sql_support::{ConnExt, UncheckedTransaction};
use std::path::Path;
use std::sync::Mutex;
use sync_proto::{clock, new_uuid, BookRecord, NoteRecord, SyncFragmentResponse, SyncStateResponse};
use sync_proto::{DEFAULT_FRAGMENT_LIMIT, MAX_FRAGMENT_LIMIT};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub api_key: String,
    pub max_usn: i64,
    pub full_sync_before: i64,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open_database(path, &ServerSchema)?),
        })
    }

    pub fn new_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open_memory_database(&ServerSchema)?),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means another thread panicked mid-statement; the
        // connection itself is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------
    // Users

    pub fn create_user(&self, api_key: &str) -> Result<User> {
        let conn = self.lock();
        conn.execute_cached(
            "INSERT INTO users (api_key, created_at) VALUES (:api_key, :now)",
            named_params! { ":api_key": api_key, ":now": clock::now_secs() },
        )?;
        let id = conn.last_insert_rowid();
        Ok(User {
            id,
            api_key: api_key.into(),
            max_usn: 0,
            full_sync_before: 0,
        })
    }

    pub fn get_user_by_api_key(&self, api_key: &str) -> Result<Option<User>> {
        let conn = self.lock();
        conn.try_query_row(
            "SELECT id, api_key, max_usn, full_sync_before FROM users WHERE api_key = :key",
            named_params! { ":key": api_key },
            user_from_row,
        )
    }

    pub fn get_user(&self, user_id: i64) -> Result<User> {
        let conn = self.lock();
        conn.try_query_row(
            "SELECT id, api_key, max_usn, full_sync_before FROM users WHERE id = :id",
            named_params! { ":id": user_id },
            user_from_row,
        )?
        .ok_or(StoreError::NotFound)
    }

    // ------------------------------------------------------------------
    // USN allocation

    /// Allocate the next usn for `user_id` inside the caller's transaction.
    ///
    /// The 0->1 transition arms `full_sync_before`: a previously empty
    /// account just received its first change, so any client that had synced
    /// against an earlier, non-empty incarnation must discard its cursor.
    /// Once armed it is never re-armed (the `full_sync_before = 0` guard).
    fn increment_usn(tx: &UncheckedTransaction<'_>, user_id: i64) -> Result<i64> {
        let usn = tx
            .try_query_row(
                "UPDATE users SET
                     full_sync_before = CASE
                         WHEN max_usn = 0 AND full_sync_before = 0 THEN :now
                         ELSE full_sync_before
                     END,
                     max_usn = max_usn + 1
                 WHERE id = :user_id
                 RETURNING max_usn",
                named_params! { ":user_id": user_id, ":now": clock::now_secs() },
                |row: &Row<'_>| -> Result<i64> { Ok(row.get(0)?) },
            )?
            .ok_or(StoreError::NotFound)?;
        Ok(usn)
    }

    // ------------------------------------------------------------------
    // Books

    pub fn create_book(&self, user_id: i64, label: &str) -> Result<BookRecord> {
        if label.is_empty() {
            return Err(StoreError::BadRequest("name is required".into()));
        }
        let conn = self.lock();
        let tx = conn.unchecked_transaction_imm()?;
        if live_label_exists(&tx, user_id, label, None)? {
            return Err(StoreError::DuplicateLabel);
        }
        let usn = Self::increment_usn(&tx, user_id)?;
        let uuid = new_uuid();
        let now = clock::now_nanos();
        tx.execute_cached(
            "INSERT INTO books (uuid, user_id, label, usn, deleted, added_on, edited_on)
             VALUES (:uuid, :user_id, :label, :usn, 0, :added_on, 0)",
            named_params! {
                ":uuid": uuid,
                ":user_id": user_id,
                ":label": label,
                ":usn": usn,
                ":added_on": now,
            },
        )?;
        let book = get_book(&tx, user_id, &uuid)?.ok_or(StoreError::NotFound)?;
        tx.commit()?;
        Ok(book)
    }

    /// Rename and/or un-tombstone a book. The usn and `edited_on` bump
    /// happens whether or not a new label was supplied.
    pub fn update_book(&self, user_id: i64, uuid: &str, name: Option<&str>) -> Result<BookRecord> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction_imm()?;
        let book = get_book(&tx, user_id, uuid)?.ok_or(StoreError::NotFound)?;
        let label = match name {
            Some(n) if n.is_empty() => {
                return Err(StoreError::BadRequest("name must not be empty".into()))
            }
            Some(n) => {
                if live_label_exists(&tx, user_id, n, Some(uuid))? {
                    return Err(StoreError::DuplicateLabel);
                }
                n.to_string()
            }
            None => {
                // Un-deleting without a new label needs one to come back to.
                if book.label.is_empty() {
                    return Err(StoreError::BadRequest("name is required".into()));
                }
                book.label.clone()
            }
        };
        let usn = Self::increment_usn(&tx, user_id)?;
        tx.execute_cached(
            "UPDATE books SET label = :label, deleted = 0, usn = :usn, edited_on = :now
             WHERE uuid = :uuid AND user_id = :user_id",
            named_params! {
                ":label": label,
                ":usn": usn,
                ":now": clock::now_nanos(),
                ":uuid": uuid,
                ":user_id": user_id,
            },
        )?;
        let book = get_book(&tx, user_id, uuid)?.ok_or(StoreError::NotFound)?;
        tx.commit()?;
        Ok(book)
    }

    /// Soft-delete a book and cascade to its live notes, each tombstone
    /// consuming its own usn. Already-deleted notes are left untouched.
    pub fn delete_book(&self, user_id: i64, uuid: &str) -> Result<BookRecord> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction_imm()?;
        let book = get_book(&tx, user_id, uuid)?.ok_or(StoreError::NotFound)?;
        if book.deleted {
            tx.commit()?;
            return Ok(book);
        }
        let usn = Self::increment_usn(&tx, user_id)?;
        tx.execute_cached(
            "UPDATE books SET deleted = 1, label = '', usn = :usn
             WHERE uuid = :uuid AND user_id = :user_id",
            named_params! { ":usn": usn, ":uuid": uuid, ":user_id": user_id },
        )?;
        let live_notes: Vec<String> = tx.query_rows_and_then(
            "SELECT uuid FROM notes
             WHERE user_id = :user_id AND book_uuid = :book_uuid AND deleted = 0
             ORDER BY usn",
            named_params! { ":user_id": user_id, ":book_uuid": uuid },
            |row: &Row<'_>| -> Result<String> { Ok(row.get(0)?) },
        )?;
        for note_uuid in live_notes {
            let note_usn = Self::increment_usn(&tx, user_id)?;
            tx.execute_cached(
                "UPDATE notes SET deleted = 1, body = '', usn = :usn
                 WHERE uuid = :uuid AND user_id = :user_id",
                named_params! { ":usn": note_usn, ":uuid": note_uuid, ":user_id": user_id },
            )?;
        }
        let book = get_book(&tx, user_id, uuid)?.ok_or(StoreError::NotFound)?;
        tx.commit()?;
        Ok(book)
    }

    // ------------------------------------------------------------------
    // Notes

    /// Create a note. The caller may supply its own timestamps so a client
    /// replaying offline edits preserves authorship time.
    pub fn create_note(
        &self,
        user_id: i64,
        book_uuid: &str,
        body: &str,
        added_on: Option<i64>,
        edited_on: Option<i64>,
        client: &str,
    ) -> Result<NoteRecord> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction_imm()?;
        if get_book(&tx, user_id, book_uuid)?.is_none() {
            return Err(StoreError::NotFound);
        }
        let usn = Self::increment_usn(&tx, user_id)?;
        let uuid = new_uuid();
        tx.execute_cached(
            "INSERT INTO notes (uuid, user_id, book_uuid, body, usn, deleted, added_on, edited_on, client)
             VALUES (:uuid, :user_id, :book_uuid, :body, :usn, 0, :added_on, :edited_on, :client)",
            named_params! {
                ":uuid": uuid,
                ":user_id": user_id,
                ":book_uuid": book_uuid,
                ":body": body,
                ":usn": usn,
                ":added_on": added_on.unwrap_or_else(clock::now_nanos),
                ":edited_on": edited_on.unwrap_or(0),
                ":client": client,
            },
        )?;
        let note = get_note(&tx, user_id, &uuid)?.ok_or(StoreError::NotFound)?;
        tx.commit()?;
        Ok(note)
    }

    /// Edit a note. Only the supplied fields change; an update always
    /// un-tombstones.
    pub fn update_note(
        &self,
        user_id: i64,
        uuid: &str,
        book_uuid: Option<&str>,
        body: Option<&str>,
    ) -> Result<NoteRecord> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction_imm()?;
        if get_note(&tx, user_id, uuid)?.is_none() {
            return Err(StoreError::NotFound);
        }
        if let Some(target) = book_uuid {
            if get_book(&tx, user_id, target)?.is_none() {
                return Err(StoreError::NotFound);
            }
        }
        let usn = Self::increment_usn(&tx, user_id)?;
        tx.execute_cached(
            "UPDATE notes SET
                 book_uuid = COALESCE(:book_uuid, book_uuid),
                 body = COALESCE(:body, body),
                 deleted = 0,
                 usn = :usn,
                 edited_on = :now
             WHERE uuid = :uuid AND user_id = :user_id",
            named_params! {
                ":book_uuid": book_uuid,
                ":body": body,
                ":usn": usn,
                ":now": clock::now_nanos(),
                ":uuid": uuid,
                ":user_id": user_id,
            },
        )?;
        let note = get_note(&tx, user_id, uuid)?.ok_or(StoreError::NotFound)?;
        tx.commit()?;
        Ok(note)
    }

    pub fn delete_note(&self, user_id: i64, uuid: &str) -> Result<NoteRecord> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction_imm()?;
        let note = get_note(&tx, user_id, uuid)?.ok_or(StoreError::NotFound)?;
        if note.deleted {
            tx.commit()?;
            return Ok(note);
        }
        let usn = Self::increment_usn(&tx, user_id)?;
        tx.execute_cached(
            "UPDATE notes SET deleted = 1, body = '', usn = :usn
             WHERE uuid = :uuid AND user_id = :user_id",
            named_params! { ":usn": usn, ":uuid": uuid, ":user_id": user_id },
        )?;
        let note = get_note(&tx, user_id, uuid)?.ok_or(StoreError::NotFound)?;
        tx.commit()?;
        Ok(note)
    }

    // ------------------------------------------------------------------
    // Sync reads

    pub fn get_sync_state(&self, user_id: i64) -> Result<SyncStateResponse> {
        let conn = self.lock();
        conn.try_query_row(
            "SELECT full_sync_before, max_usn FROM users WHERE id = :id",
            named_params! { ":id": user_id },
            |row: &Row<'_>| -> Result<SyncStateResponse> {
                Ok(SyncStateResponse {
                    full_sync_before: row.get(0)?,
                    max_usn: row.get(1)?,
                    current_time: clock::now_secs(),
                })
            },
        )?
        .ok_or(StoreError::NotFound)
    }

    /// Every book and note with `usn > after_usn`, usn ascending, at most
    /// `limit` rows across both kinds.
    pub fn get_sync_fragment(
        &self,
        user_id: i64,
        after_usn: i64,
        limit: Option<usize>,
    ) -> Result<SyncFragmentResponse> {
        let limit = match limit {
            None | Some(0) => DEFAULT_FRAGMENT_LIMIT,
            Some(n) if n > MAX_FRAGMENT_LIMIT => {
                return Err(StoreError::QueryParam {
                    key: "limit".into(),
                    value: n.to_string(),
                    message: format!("limit must be at most {}", MAX_FRAGMENT_LIMIT),
                })
            }
            Some(n) => n,
        };
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        let books: Vec<BookRecord> = tx.query_rows_and_then(
            "SELECT uuid, usn, label, deleted, added_on, edited_on FROM books
             WHERE user_id = :user_id AND usn > :after
             ORDER BY usn LIMIT :limit",
            named_params! { ":user_id": user_id, ":after": after_usn, ":limit": limit as i64 },
            book_from_row,
        )?;
        let notes: Vec<NoteRecord> = tx.query_rows_and_then(
            "SELECT uuid, book_uuid, usn, body, deleted, added_on, edited_on, client FROM notes
             WHERE user_id = :user_id AND usn > :after
             ORDER BY usn LIMIT :limit",
            named_params! { ":user_id": user_id, ":after": after_usn, ":limit": limit as i64 },
            note_from_row,
        )?;
        let user_max_usn: i64 = tx
            .try_query_one(
                "SELECT max_usn FROM users WHERE id = :id",
                named_params! { ":id": user_id },
            )?
            .ok_or(StoreError::NotFound)?;
        tx.commit()?;

        // Both lists are usn-ascending; keep the `limit` smallest usns
        // overall so the fragment is a contiguous slice of the change log.
        let (books, notes) = merge_capped(books, notes, limit);
        let current_max_usn = books
            .iter()
            .map(|b| b.usn)
            .chain(notes.iter().map(|n| n.usn))
            .max()
            .unwrap_or(0);
        Ok(SyncFragmentResponse {
            books,
            notes,
            current_max_usn,
            user_max_usn,
        })
    }

    // ------------------------------------------------------------------
    // Lookups (used by handlers and tests)

    pub fn get_book_by_uuid(&self, user_id: i64, uuid: &str) -> Result<Option<BookRecord>> {
        let conn = self.lock();
        get_book(&conn, user_id, uuid)
    }

    pub fn get_note_by_uuid(&self, user_id: i64, uuid: &str) -> Result<Option<NoteRecord>> {
        let conn = self.lock();
        get_note(&conn, user_id, uuid)
    }

    // ------------------------------------------------------------------
    // Maintenance

    pub fn checkpoint_wal(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }

    pub fn vacuum(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch("VACUUM;")?;
        Ok(())
    }
}

fn user_from_row(row: &Row<'_>) -> Result<User> {
    Ok(User {
        id: row.get(0)?,
        api_key: row.get(1)?,
        max_usn: row.get(2)?,
        full_sync_before: row.get(3)?,
    })
}

fn book_from_row(row: &Row<'_>) -> Result<BookRecord> {
    Ok(BookRecord {
        uuid: row.get(0)?,
        usn: row.get(1)?,
        label: row.get(2)?,
        deleted: row.get(3)?,
        added_on: row.get(4)?,
        edited_on: row.get(5)?,
    })
}

fn note_from_row(row: &Row<'_>) -> Result<NoteRecord> {
    Ok(NoteRecord {
        uuid: row.get(0)?,
        book_uuid: row.get(1)?,
        usn: row.get(2)?,
        content: row.get(3)?,
        deleted: row.get(4)?,
        added_on: row.get(5)?,
        edited_on: row.get(6)?,
        client: row.get(7)?,
    })
}

fn get_book(conn: &Connection, user_id: i64, uuid: &str) -> Result<Option<BookRecord>> {
    conn.try_query_row(
        "SELECT uuid, usn, label, deleted, added_on, edited_on FROM books
         WHERE uuid = :uuid AND user_id = :user_id",
        named_params! { ":uuid": uuid, ":user_id": user_id },
        book_from_row,
    )
}

fn get_note(conn: &Connection, user_id: i64, uuid: &str) -> Result<Option<NoteRecord>> {
    conn.try_query_row(
        "SELECT uuid, book_uuid, usn, body, deleted, added_on, edited_on, client FROM notes
         WHERE uuid = :uuid AND user_id = :user_id",
        named_params! { ":uuid": uuid, ":user_id": user_id },
        note_from_row,
    )
}

fn live_label_exists(
    conn: &Connection,
    user_id: i64,
    label: &str,
    excluding_uuid: Option<&str>,
) -> Result<bool> {
    let count: i64 = conn
        .try_query_one(
            "SELECT COUNT(*) FROM books
             WHERE user_id = :user_id AND label = :label AND deleted = 0
               AND (:excluding IS NULL OR uuid <> :excluding)",
            named_params! { ":user_id": user_id, ":label": label, ":excluding": excluding_uuid },
        )?
        .unwrap_or(0);
    Ok(count > 0)
}

fn merge_capped(
    books: Vec<BookRecord>,
    notes: Vec<NoteRecord>,
    limit: usize,
) -> (Vec<BookRecord>, Vec<NoteRecord>) {
    if books.len() + notes.len() <= limit {
        return (books, notes);
    }
    let mut kept_books = Vec::new();
    let mut kept_notes = Vec::new();
    let mut books = books.into_iter().peekable();
    let mut notes = notes.into_iter().peekable();
    while kept_books.len() + kept_notes.len() < limit {
        match (books.peek(), notes.peek()) {
            (Some(b), Some(n)) => {
                if b.usn < n.usn {
                    kept_books.push(books.next().unwrap());
                } else {
                    kept_notes.push(notes.next().unwrap());
                }
            }
            (Some(_), None) => kept_books.push(books.next().unwrap()),
            (None, Some(_)) => kept_notes.push(notes.next().unwrap()),
            (None, None) => break,
        }
    }
    (kept_books, kept_notes)
}
