/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The local SQLite mirror, owned exclusively by one device. Rows carry a
//! `dirty` flag for unsent local changes and a usn of 0 until the server has
//! acknowledged them; the `system` table holds the sync cursor and session
//! details.

use crate::error::*;
use crate::schema::{self, ClientSchema};
use rusqlite::{
    named_params,
    types::{FromSql, ToSql},
    Connection, Row,
};
use sql_support::open_database::{open_database, open_memory_database};
use sql_support::ConnExt;
use std::path::Path;
use sync_proto::{clock, new_uuid, BookRecord, NoteRecord};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalBook {
    pub uuid: String,
    pub label: String,
    pub usn: i64,
    pub dirty: bool,
    pub deleted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalNote {
    pub uuid: String,
    pub book_uuid: String,
    pub body: String,
    pub usn: i64,
    pub dirty: bool,
    pub deleted: bool,
    pub added_on: i64,
    pub edited_on: i64,
}

pub struct ClientStorage {
    db: Connection,
}

impl ConnExt for ClientStorage {
    #[inline]
    fn conn(&self) -> &Connection {
        &self.db
    }
}

impl ClientStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            db: open_database(path, &ClientSchema)?,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: open_memory_database(&ClientSchema)?,
        })
    }

    // ------------------------------------------------------------------
    // system table

    pub(crate) fn put_meta(&self, key: &str, value: &dyn ToSql) -> Result<()> {
        self.execute_cached(
            "REPLACE INTO system (key, value) VALUES (:key, :value)",
            &[(":key", &key as &dyn ToSql), (":value", value)],
        )?;
        Ok(())
    }

    pub(crate) fn get_meta<T: FromSql>(&self, key: &str) -> Result<Option<T>> {
        Ok(self.try_query_one(
            "SELECT value FROM system WHERE key = :key",
            named_params! { ":key": key },
        )?)
    }

    pub fn last_max_usn(&self) -> Result<i64> {
        Ok(self.get_meta(schema::LAST_MAX_USN_KEY)?.unwrap_or(0))
    }

    pub fn set_last_max_usn(&self, usn: i64) -> Result<()> {
        self.put_meta(schema::LAST_MAX_USN_KEY, &usn)
    }

    pub fn last_sync_at(&self) -> Result<i64> {
        Ok(self.get_meta(schema::LAST_SYNC_AT_KEY)?.unwrap_or(0))
    }

    pub fn set_last_sync_at(&self, at: i64) -> Result<()> {
        self.put_meta(schema::LAST_SYNC_AT_KEY, &at)
    }

    pub fn api_endpoint(&self) -> Result<Option<String>> {
        self.get_meta(schema::API_ENDPOINT_KEY)
    }

    pub fn set_api_endpoint(&self, endpoint: &str) -> Result<()> {
        self.put_meta(schema::API_ENDPOINT_KEY, &endpoint)
    }

    pub fn session_key(&self) -> Result<Option<String>> {
        self.get_meta(schema::SESSION_KEY_KEY)
    }

    pub fn set_session(&self, key: &str, expiry: i64) -> Result<()> {
        self.put_meta(schema::SESSION_KEY_KEY, &key)?;
        self.put_meta(schema::SESSION_KEY_EXPIRY_KEY, &expiry)
    }

    // ------------------------------------------------------------------
    // local edits (every one of these marks the row dirty)

    pub fn add_book(&self, label: &str) -> Result<LocalBook> {
        if self.get_book_by_label(label)?.is_some() {
            return Err(ClientError::DuplicateLabel);
        }
        let uuid = new_uuid();
        self.execute_cached(
            "INSERT INTO books (uuid, label, usn, dirty, deleted) VALUES (:uuid, :label, 0, 1, 0)",
            named_params! { ":uuid": uuid, ":label": label },
        )?;
        self.get_book(&uuid)?.ok_or(ClientError::NotFound)
    }

    pub fn update_book_label(&self, uuid: &str, label: &str) -> Result<LocalBook> {
        if self.get_book(uuid)?.is_none() {
            return Err(ClientError::NotFound);
        }
        if let Some(other) = self.get_book_by_label(label)? {
            if other.uuid != uuid {
                return Err(ClientError::DuplicateLabel);
            }
        }
        self.execute_cached(
            "UPDATE books SET label = :label, dirty = 1, deleted = 0 WHERE uuid = :uuid",
            named_params! { ":label": label, ":uuid": uuid },
        )?;
        self.get_book(uuid)?.ok_or(ClientError::NotFound)
    }

    /// Remove a book and its notes locally. Rows the server has never seen
    /// (usn 0) are dropped outright; acknowledged rows become dirty
    /// tombstones so the deletion is sent on the next sync.
    pub fn remove_book(&self, uuid: &str) -> Result<()> {
        let book = self.get_book(uuid)?.ok_or(ClientError::NotFound)?;
        let tx = self.unchecked_transaction()?;
        tx.execute_cached(
            "DELETE FROM notes WHERE book_uuid = :book_uuid AND usn = 0",
            named_params! { ":book_uuid": uuid },
        )?;
        tx.execute_cached(
            "UPDATE notes SET deleted = 1, body = '', dirty = 1
             WHERE book_uuid = :book_uuid AND deleted = 0",
            named_params! { ":book_uuid": uuid },
        )?;
        if book.usn == 0 {
            tx.execute_cached(
                "DELETE FROM books WHERE uuid = :uuid",
                named_params! { ":uuid": uuid },
            )?;
        } else {
            tx.execute_cached(
                "UPDATE books SET deleted = 1, dirty = 1 WHERE uuid = :uuid",
                named_params! { ":uuid": uuid },
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn add_note(&self, book_uuid: &str, body: &str) -> Result<LocalNote> {
        if self.get_book(book_uuid)?.is_none() {
            return Err(ClientError::NotFound);
        }
        let uuid = new_uuid();
        self.execute_cached(
            "INSERT INTO notes (uuid, book_uuid, body, usn, dirty, deleted, added_on, edited_on)
             VALUES (:uuid, :book_uuid, :body, 0, 1, 0, :added_on, 0)",
            named_params! {
                ":uuid": uuid,
                ":book_uuid": book_uuid,
                ":body": body,
                ":added_on": clock::now_nanos(),
            },
        )?;
        self.get_note(&uuid)?.ok_or(ClientError::NotFound)
    }

    pub fn update_note(
        &self,
        uuid: &str,
        book_uuid: Option<&str>,
        body: Option<&str>,
    ) -> Result<LocalNote> {
        if self.get_note(uuid)?.is_none() {
            return Err(ClientError::NotFound);
        }
        if let Some(target) = book_uuid {
            if self.get_book(target)?.is_none() {
                return Err(ClientError::NotFound);
            }
        }
        self.execute_cached(
            "UPDATE notes SET
                 book_uuid = COALESCE(:book_uuid, book_uuid),
                 body = COALESCE(:body, body),
                 deleted = 0,
                 dirty = 1,
                 edited_on = :now
             WHERE uuid = :uuid",
            named_params! {
                ":book_uuid": book_uuid,
                ":body": body,
                ":now": clock::now_nanos(),
                ":uuid": uuid,
            },
        )?;
        self.get_note(uuid)?.ok_or(ClientError::NotFound)
    }

    pub fn remove_note(&self, uuid: &str) -> Result<()> {
        let note = self.get_note(uuid)?.ok_or(ClientError::NotFound)?;
        if note.usn == 0 {
            self.execute_cached(
                "DELETE FROM notes WHERE uuid = :uuid",
                named_params! { ":uuid": uuid },
            )?;
        } else {
            self.execute_cached(
                "UPDATE notes SET deleted = 1, body = '', dirty = 1 WHERE uuid = :uuid",
                named_params! { ":uuid": uuid },
            )?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // lookups

    pub fn get_book(&self, uuid: &str) -> Result<Option<LocalBook>> {
        self.try_query_row(
            "SELECT uuid, label, usn, dirty, deleted FROM books WHERE uuid = :uuid",
            named_params! { ":uuid": uuid },
            book_from_row,
        )
    }

    /// Look up a live book by label; tombstones don't participate.
    pub fn get_book_by_label(&self, label: &str) -> Result<Option<LocalBook>> {
        self.try_query_row(
            "SELECT uuid, label, usn, dirty, deleted FROM books
             WHERE label = :label AND deleted = 0",
            named_params! { ":label": label },
            book_from_row,
        )
    }

    pub fn get_note(&self, uuid: &str) -> Result<Option<LocalNote>> {
        self.try_query_row(
            "SELECT uuid, book_uuid, body, usn, dirty, deleted, added_on, edited_on
             FROM notes WHERE uuid = :uuid",
            named_params! { ":uuid": uuid },
            note_from_row,
        )
    }

    pub fn all_books(&self) -> Result<Vec<LocalBook>> {
        self.query_rows_and_then(
            "SELECT uuid, label, usn, dirty, deleted FROM books ORDER BY rowid",
            [],
            book_from_row,
        )
    }

    pub fn all_notes(&self) -> Result<Vec<LocalNote>> {
        self.query_rows_and_then(
            "SELECT uuid, book_uuid, body, usn, dirty, deleted, added_on, edited_on
             FROM notes ORDER BY rowid",
            [],
            note_from_row,
        )
    }

    pub fn live_labels(&self) -> Result<Vec<String>> {
        self.query_rows_and_then(
            "SELECT label FROM books WHERE deleted = 0",
            [],
            |row: &Row<'_>| -> Result<String> { Ok(row.get(0)?) },
        )
    }

    /// How many live rows exist at all; drives the empty-server prompt.
    pub fn count_live(&self) -> Result<i64> {
        let books: i64 = self.query_one("SELECT COUNT(*) FROM books WHERE deleted = 0")?;
        let notes: i64 = self.query_one("SELECT COUNT(*) FROM notes WHERE deleted = 0")?;
        Ok(books + notes)
    }

    pub fn has_dirty(&self) -> Result<bool> {
        let books: i64 = self.query_one("SELECT COUNT(*) FROM books WHERE dirty = 1")?;
        let notes: i64 = self.query_one("SELECT COUNT(*) FROM notes WHERE dirty = 1")?;
        Ok(books + notes > 0)
    }

    // ------------------------------------------------------------------
    // the dirty set, in send order

    pub fn dirty_new_books(&self) -> Result<Vec<LocalBook>> {
        self.query_rows_and_then(
            "SELECT uuid, label, usn, dirty, deleted FROM books
             WHERE dirty = 1 AND deleted = 0 AND usn = 0 ORDER BY rowid",
            [],
            book_from_row,
        )
    }

    pub fn dirty_updated_books(&self) -> Result<Vec<LocalBook>> {
        self.query_rows_and_then(
            "SELECT uuid, label, usn, dirty, deleted FROM books
             WHERE dirty = 1 AND deleted = 0 AND usn > 0 ORDER BY rowid",
            [],
            book_from_row,
        )
    }

    pub fn dirty_deleted_books(&self) -> Result<Vec<LocalBook>> {
        self.query_rows_and_then(
            "SELECT uuid, label, usn, dirty, deleted FROM books
             WHERE dirty = 1 AND deleted = 1 ORDER BY rowid",
            [],
            book_from_row,
        )
    }

    pub fn dirty_new_notes(&self) -> Result<Vec<LocalNote>> {
        self.query_rows_and_then(
            "SELECT uuid, book_uuid, body, usn, dirty, deleted, added_on, edited_on FROM notes
             WHERE dirty = 1 AND deleted = 0 AND usn = 0 ORDER BY rowid",
            [],
            note_from_row,
        )
    }

    pub fn dirty_updated_notes(&self) -> Result<Vec<LocalNote>> {
        self.query_rows_and_then(
            "SELECT uuid, book_uuid, body, usn, dirty, deleted, added_on, edited_on FROM notes
             WHERE dirty = 1 AND deleted = 0 AND usn > 0 ORDER BY rowid",
            [],
            note_from_row,
        )
    }

    pub fn dirty_deleted_notes(&self) -> Result<Vec<LocalNote>> {
        self.query_rows_and_then(
            "SELECT uuid, book_uuid, body, usn, dirty, deleted, added_on, edited_on FROM notes
             WHERE dirty = 1 AND deleted = 1 ORDER BY rowid",
            [],
            note_from_row,
        )
    }

    pub fn dirty_live_notes_for_book(&self, book_uuid: &str) -> Result<Vec<LocalNote>> {
        self.query_rows_and_then(
            "SELECT uuid, book_uuid, body, usn, dirty, deleted, added_on, edited_on FROM notes
             WHERE book_uuid = :book_uuid AND dirty = 1 AND deleted = 0 ORDER BY rowid",
            named_params! { ":book_uuid": book_uuid },
            note_from_row,
        )
    }

    // ------------------------------------------------------------------
    // server acknowledgements and pulled rows

    /// Overwrite (or insert) a book with what the server holds. Server wins;
    /// the row comes out clean.
    pub fn apply_server_book(&self, record: &BookRecord) -> Result<()> {
        self.execute_cached(
            "INSERT INTO books (uuid, label, usn, dirty, deleted)
             VALUES (:uuid, :label, :usn, 0, :deleted)
             ON CONFLICT(uuid) DO UPDATE SET
                 label = excluded.label,
                 usn = excluded.usn,
                 dirty = 0,
                 deleted = excluded.deleted",
            named_params! {
                ":uuid": record.uuid,
                ":label": record.label,
                ":usn": record.usn,
                ":deleted": record.deleted,
            },
        )?;
        Ok(())
    }

    pub fn apply_server_note(&self, record: &NoteRecord) -> Result<()> {
        self.execute_cached(
            "INSERT INTO notes (uuid, book_uuid, body, usn, dirty, deleted, added_on, edited_on)
             VALUES (:uuid, :book_uuid, :body, :usn, 0, :deleted, :added_on, :edited_on)
             ON CONFLICT(uuid) DO UPDATE SET
                 book_uuid = excluded.book_uuid,
                 body = excluded.body,
                 usn = excluded.usn,
                 dirty = 0,
                 deleted = excluded.deleted,
                 added_on = excluded.added_on,
                 edited_on = excluded.edited_on",
            named_params! {
                ":uuid": record.uuid,
                ":book_uuid": record.book_uuid,
                ":body": record.content,
                ":usn": record.usn,
                ":deleted": record.deleted,
                ":added_on": record.added_on,
                ":edited_on": record.edited_on,
            },
        )?;
        Ok(())
    }

    /// The server minted a different uuid for a book we created; adopt it,
    /// cascading into child notes.
    pub fn update_book_uuid(&self, old_uuid: &str, new_uuid: &str) -> Result<()> {
        let tx = self.unchecked_transaction()?;
        tx.execute_cached(
            "UPDATE books SET uuid = :new WHERE uuid = :old",
            named_params! { ":new": new_uuid, ":old": old_uuid },
        )?;
        tx.execute_cached(
            "UPDATE notes SET book_uuid = :new WHERE book_uuid = :old",
            named_params! { ":new": new_uuid, ":old": old_uuid },
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn update_note_uuid(&self, old_uuid: &str, new_uuid: &str) -> Result<()> {
        self.execute_cached(
            "UPDATE notes SET uuid = :new WHERE uuid = :old",
            named_params! { ":new": new_uuid, ":old": old_uuid },
        )?;
        Ok(())
    }

    /// Give a book a new label because its old one lost a collision; the row
    /// stays dirty so the rename is uploaded.
    pub fn rename_book(&self, uuid: &str, label: &str) -> Result<()> {
        self.execute_cached(
            "UPDATE books SET label = :label, dirty = 1 WHERE uuid = :uuid",
            named_params! { ":label": label, ":uuid": uuid },
        )?;
        Ok(())
    }

    /// Move a note under another book without touching its content. Used by
    /// the merge resolver; the note stays dirty.
    pub fn reassign_note_book(&self, uuid: &str, book_uuid: &str) -> Result<()> {
        self.execute_cached(
            "UPDATE notes SET book_uuid = :book_uuid, dirty = 1 WHERE uuid = :uuid",
            named_params! { ":book_uuid": book_uuid, ":uuid": uuid },
        )?;
        Ok(())
    }

    pub fn clear_book_dirty(&self, uuid: &str) -> Result<()> {
        self.execute_cached(
            "UPDATE books SET dirty = 0 WHERE uuid = :uuid",
            named_params! { ":uuid": uuid },
        )?;
        Ok(())
    }

    pub fn clear_note_dirty(&self, uuid: &str) -> Result<()> {
        self.execute_cached(
            "UPDATE notes SET dirty = 0 WHERE uuid = :uuid",
            named_params! { ":uuid": uuid },
        )?;
        Ok(())
    }

    /// Prepare for a full upload to a server that has none of our data: the
    /// cursor and every row's usn return to 0, live rows become dirty creates,
    /// and tombstones come clean since there is nothing to delete remotely.
    /// One transaction, so a failure can't leave the cursor half-reset.
    pub fn prepare_full_upload(&self) -> Result<()> {
        let tx = self.unchecked_transaction()?;
        tx.execute_cached(
            "UPDATE books SET usn = 0, dirty = CASE WHEN deleted = 0 THEN 1 ELSE 0 END",
            [],
        )?;
        tx.execute_cached(
            "UPDATE notes SET usn = 0, dirty = CASE WHEN deleted = 0 THEN 1 ELSE 0 END",
            [],
        )?;
        tx.execute_cached(
            "REPLACE INTO system (key, value) VALUES (:key, 0)",
            named_params! { ":key": schema::LAST_MAX_USN_KEY },
        )?;
        tx.commit()?;
        Ok(())
    }
}

fn book_from_row(row: &Row<'_>) -> Result<LocalBook> {
    Ok(LocalBook {
        uuid: row.get(0)?,
        label: row.get(1)?,
        usn: row.get(2)?,
        dirty: row.get(3)?,
        deleted: row.get(4)?,
    })
}

fn note_from_row(row: &Row<'_>) -> Result<LocalNote> {
    Ok(LocalNote {
        uuid: row.get(0)?,
        book_uuid: row.get(1)?,
        body: row.get(2)?,
        usn: row.get(3)?,
        dirty: row.get(4)?,
        deleted: row.get(5)?,
        added_on: row.get(6)?,
        edited_on: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_round_trip() {
        let storage = ClientStorage::open_in_memory().unwrap();
        assert_eq!(storage.last_max_usn().unwrap(), 0);
        storage.set_last_max_usn(42).unwrap();
        assert_eq!(storage.last_max_usn().unwrap(), 42);
        storage.set_last_sync_at(1_700_000_000).unwrap();
        assert_eq!(storage.last_sync_at().unwrap(), 1_700_000_000);
        storage.set_api_endpoint("https://dnote.example.com").unwrap();
        assert_eq!(
            storage.api_endpoint().unwrap().as_deref(),
            Some("https://dnote.example.com")
        );
    }

    #[test]
    fn test_local_edits_mark_dirty() {
        let storage = ClientStorage::open_in_memory().unwrap();
        let book = storage.add_book("js").unwrap();
        assert!(book.dirty);
        assert_eq!(book.usn, 0);
        let note = storage.add_note(&book.uuid, "hello").unwrap();
        assert!(note.dirty);
        assert!(note.added_on > 0);

        let edited = storage.update_note(&note.uuid, None, Some("bye")).unwrap();
        assert_eq!(edited.body, "bye");
        assert!(edited.edited_on > 0);
    }

    #[test]
    fn test_add_book_rejects_live_duplicate() {
        let storage = ClientStorage::open_in_memory().unwrap();
        storage.add_book("js").unwrap();
        assert!(matches!(
            storage.add_book("js"),
            Err(ClientError::DuplicateLabel)
        ));
    }

    #[test]
    fn test_remove_unsynced_book_drops_rows() {
        let storage = ClientStorage::open_in_memory().unwrap();
        let book = storage.add_book("js").unwrap();
        storage.add_note(&book.uuid, "x").unwrap();
        storage.remove_book(&book.uuid).unwrap();
        assert!(storage.all_books().unwrap().is_empty());
        assert!(storage.all_notes().unwrap().is_empty());
    }

    #[test]
    fn test_remove_synced_book_leaves_dirty_tombstones() {
        let storage = ClientStorage::open_in_memory().unwrap();
        let book = storage.add_book("js").unwrap();
        let note = storage.add_note(&book.uuid, "x").unwrap();
        // Pretend a sync acknowledged both rows.
        storage
            .apply_server_book(&BookRecord {
                uuid: book.uuid.clone(),
                usn: 1,
                label: "js".into(),
                deleted: false,
                added_on: 0,
                edited_on: 0,
            })
            .unwrap();
        storage
            .apply_server_note(&NoteRecord {
                uuid: note.uuid.clone(),
                book_uuid: book.uuid.clone(),
                usn: 2,
                content: "x".into(),
                deleted: false,
                added_on: 1,
                edited_on: 0,
                client: String::new(),
            })
            .unwrap();

        storage.remove_book(&book.uuid).unwrap();
        let book = storage.get_book(&book.uuid).unwrap().unwrap();
        assert!(book.deleted && book.dirty);
        let note = storage.get_note(&note.uuid).unwrap().unwrap();
        assert!(note.deleted && note.dirty);
        assert_eq!(note.body, "");
    }

    #[test]
    fn test_dirty_set_ordering() {
        let storage = ClientStorage::open_in_memory().unwrap();
        let js = storage.add_book("js").unwrap();
        let css = storage.add_book("css").unwrap();
        let new = storage.dirty_new_books().unwrap();
        assert_eq!(
            new.iter().map(|b| b.uuid.as_str()).collect::<Vec<_>>(),
            vec![js.uuid.as_str(), css.uuid.as_str()]
        );
        assert!(storage.dirty_updated_books().unwrap().is_empty());
        assert!(storage.dirty_deleted_books().unwrap().is_empty());
    }

    #[test]
    fn test_apply_server_book_clears_dirty_and_wins() {
        let storage = ClientStorage::open_in_memory().unwrap();
        let book = storage.add_book("js").unwrap();
        storage
            .apply_server_book(&BookRecord {
                uuid: book.uuid.clone(),
                usn: 7,
                label: "javascript".into(),
                deleted: false,
                added_on: 0,
                edited_on: 0,
            })
            .unwrap();
        let book = storage.get_book(&book.uuid).unwrap().unwrap();
        assert_eq!(book.label, "javascript");
        assert_eq!(book.usn, 7);
        assert!(!book.dirty);
    }

    #[test]
    fn test_update_book_uuid_cascades() {
        let storage = ClientStorage::open_in_memory().unwrap();
        let book = storage.add_book("js").unwrap();
        let note = storage.add_note(&book.uuid, "x").unwrap();
        storage.update_book_uuid(&book.uuid, "server-uuid").unwrap();
        assert!(storage.get_book(&book.uuid).unwrap().is_none());
        assert!(storage.get_book("server-uuid").unwrap().is_some());
        let note = storage.get_note(&note.uuid).unwrap().unwrap();
        assert_eq!(note.book_uuid, "server-uuid");
    }

    #[test]
    fn test_prepare_full_upload() {
        let storage = ClientStorage::open_in_memory().unwrap();
        let live = storage.add_book("js").unwrap();
        storage
            .apply_server_book(&BookRecord {
                uuid: live.uuid.clone(),
                usn: 3,
                label: "js".into(),
                deleted: false,
                added_on: 0,
                edited_on: 0,
            })
            .unwrap();
        storage
            .apply_server_book(&BookRecord {
                uuid: "dead".into(),
                usn: 4,
                label: "".into(),
                deleted: true,
                added_on: 0,
                edited_on: 0,
            })
            .unwrap();
        storage.remove_book(&live.uuid).unwrap(); // dirty tombstone now
        storage.set_last_max_usn(4).unwrap();

        storage.prepare_full_upload().unwrap();
        assert_eq!(storage.last_max_usn().unwrap(), 0);
        for book in storage.all_books().unwrap() {
            assert_eq!(book.usn, 0);
            assert!(!book.dirty, "tombstones have nothing to send");
        }
    }

    #[test]
    fn test_count_live_ignores_tombstones() {
        let storage = ClientStorage::open_in_memory().unwrap();
        let book = storage.add_book("js").unwrap();
        storage.add_note(&book.uuid, "x").unwrap();
        assert_eq!(storage.count_live().unwrap(), 2);
        storage
            .apply_server_book(&BookRecord {
                uuid: "dead".into(),
                usn: 9,
                label: "".into(),
                deleted: true,
                added_on: 0,
                edited_on: 0,
            })
            .unwrap();
        assert_eq!(storage.count_live().unwrap(), 2);
    }
}
