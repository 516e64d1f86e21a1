/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! One sync cycle: preflight against the server's state, send the dirty set,
//! drain the server's change log, then commit the cursor. Any error on the
//! way leaves the cursor and dirty flags as they were, so the next cycle
//! retries idempotently.

use super::{merge, Confirm};
use crate::api::SyncRemote;
use crate::error::*;
use crate::storage::ClientStorage;
use sql_support::ConnExt;
use std::collections::HashSet;
use sync_proto::{BookRecord, CreateNoteBody, NoteRecord, SyncFragmentResponse, UpdateNoteBody};
use sync_proto::DEFAULT_FRAGMENT_LIMIT;

const EMPTY_SERVER_PROMPT: &str =
    "The server has no data but this client has synced before. Continue uploading?";

/// How many label-conflict rounds the send phase tolerates before giving up.
const MAX_CONFLICT_RETRIES: u32 = 3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub uploaded: usize,
    pub downloaded: usize,
    pub cursor: i64,
}

pub struct SyncEngine<'a> {
    storage: &'a ClientStorage,
    remote: &'a dyn SyncRemote,
    confirm: &'a mut dyn Confirm,
    client_tag: String,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        storage: &'a ClientStorage,
        remote: &'a dyn SyncRemote,
        confirm: &'a mut dyn Confirm,
    ) -> Self {
        Self {
            storage,
            remote,
            confirm,
            client_tag: "cli".into(),
        }
    }

    pub fn with_client_tag(mut self, tag: &str) -> Self {
        self.client_tag = tag.into();
        self
    }

    pub fn sync(&mut self) -> Result<SyncSummary> {
        let state = self.remote.get_sync_state()?;
        let last_max_usn = self.storage.last_max_usn()?;
        let last_sync_at = self.storage.last_sync_at()?;

        let full_resync = state.full_sync_before > last_sync_at;
        let behind = state.max_usn > last_max_usn;
        let mut downloaded = 0;

        if state.max_usn == 0 && last_max_usn > 0 {
            // The server holds nothing, yet we have synced before: it was
            // wiped, or we were pointed at a different instance. Everything
            // we hold becomes a fresh upload -- but only with consent when
            // there is actually something live to upload.
            if self.storage.count_live()? > 0 && !self.confirm.confirm(EMPTY_SERVER_PROMPT)? {
                return Err(ClientError::SyncCancelled);
            }
            log::info!("server is empty; treating this cycle as a full upload");
            self.storage.prepare_full_upload()?;
        } else if full_resync {
            log::info!(
                "full sync forced (server watermark {} > last sync {})",
                state.full_sync_before,
                last_sync_at
            );
            self.storage.set_last_max_usn(0)?;
            downloaded += self.step_sync()?;
        } else if behind {
            // Pull first so label collisions are resolved before we send.
            downloaded += self.step_sync()?;
        }

        let uploaded = self.send_changes()?;

        // The preflight state is stale once we've uploaded. Re-read it,
        // drain anything another client interleaved, and only then commit
        // the cursor -- every server row at or below it is now local.
        let end_state = self.remote.get_sync_state()?;
        if end_state.max_usn > self.storage.last_max_usn()? {
            downloaded += self.step_sync()?;
        }
        // The drain may have advanced past end_state if yet another client
        // uploaded meanwhile; never move the cursor backwards.
        let cursor = self.storage.last_max_usn()?.max(end_state.max_usn);
        self.storage.set_last_max_usn(cursor)?;
        self.storage.set_last_sync_at(end_state.current_time)?;

        Ok(SyncSummary {
            uploaded,
            downloaded,
            cursor,
        })
    }

    // ------------------------------------------------------------------
    // send phase

    fn send_changes(&mut self) -> Result<usize> {
        let mut uploaded = 0;
        let mut conflicts = 0;
        loop {
            match self.send_dirty(&mut uploaded) {
                Ok(()) => return Ok(uploaded),
                Err(ClientError::DuplicateLabel) => {
                    conflicts += 1;
                    if conflicts > MAX_CONFLICT_RETRIES {
                        return Err(ClientError::ConflictIrrecoverable);
                    }
                    log::info!("book label conflict; pulling and merging (round {})", conflicts);
                    // The pull applies the conflicting server books, renaming
                    // our dirty ones out of the way; then the send resumes
                    // where it stopped -- acknowledged rows are clean again.
                    self.step_sync()?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn send_dirty(&mut self, uploaded: &mut usize) -> Result<()> {
        for book in self.storage.dirty_new_books()? {
            let record = self.remote.create_book(&book.label)?;
            if record.uuid != book.uuid {
                self.storage.update_book_uuid(&book.uuid, &record.uuid)?;
            }
            self.storage.apply_server_book(&record)?;
            *uploaded += 1;
        }
        for book in self.storage.dirty_updated_books()? {
            let record = self.remote.update_book(&book.uuid, Some(&book.label))?;
            self.storage.apply_server_book(&record)?;
            *uploaded += 1;
        }
        for book in self.storage.dirty_deleted_books()? {
            match self.remote.delete_book(&book.uuid) {
                Ok(record) => self.storage.apply_server_book(&record)?,
                // Gone on both sides already; nothing left to say.
                Err(ClientError::NotFound) => self.storage.clear_book_dirty(&book.uuid)?,
                Err(e) => return Err(e),
            }
            *uploaded += 1;
        }

        for note in self.storage.dirty_new_notes()? {
            let body = CreateNoteBody {
                book_uuid: note.book_uuid.clone(),
                content: note.body.clone(),
                added_on: Some(note.added_on),
                edited_on: (note.edited_on != 0).then_some(note.edited_on),
                client: Some(self.client_tag.clone()),
            };
            let record = self.remote.create_note(&body)?;
            if record.uuid != note.uuid {
                self.storage.update_note_uuid(&note.uuid, &record.uuid)?;
            }
            self.storage.apply_server_note(&record)?;
            *uploaded += 1;
        }
        for note in self.storage.dirty_updated_notes()? {
            let body = UpdateNoteBody {
                book_uuid: Some(note.book_uuid.clone()),
                content: Some(note.body.clone()),
            };
            let record = self.remote.update_note(&note.uuid, &body)?;
            self.storage.apply_server_note(&record)?;
            *uploaded += 1;
        }
        for note in self.storage.dirty_deleted_notes()? {
            match self.remote.delete_note(&note.uuid) {
                Ok(record) => self.storage.apply_server_note(&record)?,
                Err(ClientError::NotFound) => self.storage.clear_note_dirty(&note.uuid)?,
                Err(e) => return Err(e),
            }
            *uploaded += 1;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // pull phase

    /// Drain the server's change log fragment by fragment. Each fragment is
    /// applied and the cursor advanced in a single local transaction.
    fn step_sync(&mut self) -> Result<usize> {
        let mut downloaded = 0;
        loop {
            let after = self.storage.last_max_usn()?;
            let fragment = self
                .remote
                .get_sync_fragment(after, DEFAULT_FRAGMENT_LIMIT)?;
            let count = fragment.books.len() + fragment.notes.len();
            if count == 0 {
                break;
            }
            self.apply_fragment(&fragment)?;
            downloaded += count;
            if count < DEFAULT_FRAGMENT_LIMIT
                || self.storage.last_max_usn()? >= fragment.user_max_usn
            {
                break;
            }
        }
        Ok(downloaded)
    }

    fn apply_fragment(&mut self, fragment: &SyncFragmentResponse) -> Result<()> {
        let tx = self.storage.unchecked_transaction()?;
        // Labels arriving live in this fragment are part of the taken set
        // for any rename we have to make while applying it.
        let incoming_live: HashSet<&str> = fragment
            .books
            .iter()
            .filter(|b| !b.deleted)
            .map(|b| b.label.as_str())
            .collect();
        for book in &fragment.books {
            self.apply_book(book, &incoming_live)?;
        }
        for note in &fragment.notes {
            self.apply_note(note)?;
        }
        let cursor = self
            .storage
            .last_max_usn()?
            .max(fragment.current_max_usn);
        self.storage.set_last_max_usn(cursor)?;
        tx.commit()?;
        Ok(())
    }

    /// Server wins for the row itself; a local live book holding the same
    /// label under a different uuid is renamed out of the way and stays
    /// dirty so the rename is uploaded.
    fn apply_book(&self, record: &BookRecord, incoming_live: &HashSet<&str>) -> Result<()> {
        if !record.deleted {
            if let Some(existing) = self.storage.get_book_by_label(&record.label)? {
                if existing.uuid != record.uuid {
                    let local_live: HashSet<String> =
                        self.storage.live_labels()?.into_iter().collect();
                    let renamed = merge::next_available_label(&record.label, |candidate| {
                        local_live.contains(candidate) || incoming_live.contains(candidate)
                    });
                    log::info!(
                        "label {} taken by the server; local book becomes {}",
                        record.label,
                        renamed
                    );
                    self.storage.rename_book(&existing.uuid, &renamed)?;
                }
            }
        }
        self.storage.apply_server_book(record)?;
        if record.deleted {
            merge::reassign_orphaned_notes(self.storage, &record.uuid)?;
        }
        Ok(())
    }

    fn apply_note(&self, record: &NoteRecord) -> Result<()> {
        if let Some(local) = self.storage.get_note(&record.uuid)? {
            if record.deleted && local.dirty && !local.deleted {
                // The tombstone came from the server cascading a book
                // deletion while we hold an unsent edit; the edit survives,
                // already rebased onto the fallback book.
                let book_gone = self
                    .storage
                    .get_book(&record.book_uuid)?
                    .map_or(true, |b| b.deleted);
                if book_gone {
                    log::info!("keeping unsent edit of note {} over cascade tombstone", record.uuid);
                    return Ok(());
                }
            }
            self.storage.apply_server_note(record)?;
        } else if record.deleted || self.storage.get_book(&record.book_uuid)?.is_some() {
            self.storage.apply_server_note(record)?;
        } else {
            // Books order before their notes by usn, so this shouldn't
            // happen; don't let one stray row poison the cycle.
            log::warn!(
                "skipping note {} referencing unknown book {}",
                record.uuid,
                record.book_uuid
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) struct ScriptedConfirm {
        answers: Vec<bool>,
        pub asked: usize,
    }

    impl ScriptedConfirm {
        pub(crate) fn new(answers: &[bool]) -> Self {
            Self {
                answers: answers.to_vec(),
                asked: 0,
            }
        }
    }

    impl Confirm for ScriptedConfirm {
        fn confirm(&mut self, _question: &str) -> Result<bool> {
            let answer = self.answers.get(self.asked).copied().unwrap_or(false);
            self.asked += 1;
            Ok(answer)
        }
    }

    /// A remote that conflicts on every book create; drives the retry cap.
    struct AlwaysConflicts;

    impl SyncRemote for AlwaysConflicts {
        fn get_sync_state(&self) -> Result<sync_proto::SyncStateResponse> {
            Ok(sync_proto::SyncStateResponse {
                full_sync_before: 0,
                max_usn: 0,
                current_time: 1,
            })
        }
        fn get_sync_fragment(
            &self,
            _after_usn: i64,
            _limit: usize,
        ) -> Result<SyncFragmentResponse> {
            Ok(SyncFragmentResponse::default())
        }
        fn create_book(&self, _name: &str) -> Result<BookRecord> {
            Err(ClientError::DuplicateLabel)
        }
        fn update_book(&self, _uuid: &str, _name: Option<&str>) -> Result<BookRecord> {
            Err(ClientError::DuplicateLabel)
        }
        fn delete_book(&self, _uuid: &str) -> Result<BookRecord> {
            Err(ClientError::NotFound)
        }
        fn create_note(&self, _body: &CreateNoteBody) -> Result<NoteRecord> {
            Err(ClientError::NotFound)
        }
        fn update_note(&self, _uuid: &str, _body: &UpdateNoteBody) -> Result<NoteRecord> {
            Err(ClientError::NotFound)
        }
        fn delete_note(&self, _uuid: &str) -> Result<NoteRecord> {
            Err(ClientError::NotFound)
        }
    }

    #[test]
    fn test_repeated_conflicts_become_irrecoverable() {
        let storage = ClientStorage::open_in_memory().unwrap();
        storage.add_book("js").unwrap();
        let remote = AlwaysConflicts;
        let mut confirm = ScriptedConfirm::new(&[]);
        let mut engine = SyncEngine::new(&storage, &remote, &mut confirm);
        assert!(matches!(
            engine.sync(),
            Err(ClientError::ConflictIrrecoverable)
        ));
        // The book is still dirty, so the next cycle will retry.
        assert!(storage.get_book_by_label("js").unwrap().unwrap().dirty);
    }
}
