/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Conflict resolution: losing sides of a live-label collision get renamed
//! rather than lost, and notes orphaned by a remote book deletion fall back
//! to a local `trash` book.

use crate::error::*;
use crate::storage::{ClientStorage, LocalBook};

/// Where notes land when the book they reference was deleted remotely while
/// they still carried unsent local changes.
pub const FALLBACK_BOOK_LABEL: &str = "trash";

/// Pick the first `base_N` (N >= 2) the taken set doesn't contain. The taken
/// set is the union of live labels known locally and those arriving in the
/// fragment being applied.
pub fn next_available_label(base: &str, is_taken: impl Fn(&str) -> bool) -> String {
    let mut n: u64 = 2;
    loop {
        let candidate = format!("{}_{}", base, n);
        if !is_taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Find or create the local fallback book. A created one starts dirty with
/// usn 0, so the next send phase uploads it before any rebased note.
pub fn ensure_fallback_book(storage: &ClientStorage) -> Result<LocalBook> {
    match storage.get_book_by_label(FALLBACK_BOOK_LABEL)? {
        Some(book) => Ok(book),
        None => storage.add_book(FALLBACK_BOOK_LABEL),
    }
}

/// Rebase any dirty live note still pointing at `book_uuid` onto the fallback
/// book. Non-dirty notes need no help: the server's cascade already
/// tombstoned them and those tombstones arrive through the normal pull.
pub fn reassign_orphaned_notes(storage: &ClientStorage, book_uuid: &str) -> Result<usize> {
    let orphans = storage.dirty_live_notes_for_book(book_uuid)?;
    if orphans.is_empty() {
        return Ok(0);
    }
    let fallback = ensure_fallback_book(storage)?;
    let mut moved = 0;
    for note in &orphans {
        storage.reassign_note_book(&note.uuid, &fallback.uuid)?;
        moved += 1;
    }
    log::info!(
        "moved {} unsent note(s) from deleted book {} to {}",
        moved,
        book_uuid,
        FALLBACK_BOOK_LABEL
    );
    Ok(moved)
}
