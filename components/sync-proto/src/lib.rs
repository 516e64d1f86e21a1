/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Wire payloads shared by the dnote server and client.
//!
//! Everything here is plain JSON. Timestamps inside book and note payloads
//! are int64 nanoseconds so offline authorship time survives the round trip;
//! `current_time` and `full_sync_before` are int64 unix seconds. UUIDs are
//! canonical 36-character hyphenated lowercase.

pub mod clock;

use serde_derive::{Deserialize, Serialize};

/// How many changed rows a sync fragment carries when the caller doesn't say.
pub const DEFAULT_FRAGMENT_LIMIT: usize = 100;
/// The server rejects fragment requests asking for more than this.
pub const MAX_FRAGMENT_LIMIT: usize = 100;

/// Mint a fresh canonical uuid string.
pub fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A book as it travels over the wire. Deleted books have an empty label.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRecord {
    pub uuid: String,
    pub usn: i64,
    pub label: String,
    pub deleted: bool,
    pub added_on: i64,
    pub edited_on: i64,
}

/// A note as it travels over the wire. Deleted notes have empty content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteRecord {
    pub uuid: String,
    pub book_uuid: String,
    pub usn: i64,
    pub content: String,
    pub deleted: bool,
    pub added_on: i64,
    pub edited_on: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client: String,
}

/// `GET /v3/sync/state`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStateResponse {
    pub full_sync_before: i64,
    pub max_usn: i64,
    pub current_time: i64,
}

/// `GET /v3/sync/fragment`. `current_max_usn` is the highest usn contained in
/// this fragment (0 when it is empty); `user_max_usn` is the owner's max usn
/// at query time, which tells the puller when it has drained the log.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFragmentResponse {
    pub books: Vec<BookRecord>,
    pub notes: Vec<NoteRecord>,
    pub current_max_usn: i64,
    pub user_max_usn: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateBookBody {
    pub name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpdateBookBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateNoteBody {
    pub book_uuid: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_on: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_on: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpdateNoteBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BookResponse {
    pub book: BookRecord,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NoteResponse {
    pub note: NoteRecord,
}

/// Structured body for a 400 caused by a bad query parameter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParamErrorBody {
    pub key: String,
    pub value: String,
    pub message: String,
}

/// Generic error body for everything else.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_record_round_trip() {
        let note = NoteRecord {
            uuid: new_uuid(),
            book_uuid: new_uuid(),
            usn: 12,
            content: "# vim\nundo tree: g-".into(),
            deleted: false,
            added_on: 1_545_165_541_000_000_000,
            edited_on: 0,
            client: "cli".into(),
        };
        let json = serde_json::to_string(&note).unwrap();
        assert_eq!(serde_json::from_str::<NoteRecord>(&json).unwrap(), note);
    }

    #[test]
    fn test_client_tag_omitted_when_empty() {
        let note = NoteRecord {
            uuid: "b0c0c0c0-0000-4000-8000-000000000001".into(),
            book_uuid: "b0c0c0c0-0000-4000-8000-000000000002".into(),
            usn: 1,
            content: String::new(),
            deleted: true,
            added_on: 0,
            edited_on: 0,
            client: String::new(),
        };
        let json = serde_json::to_value(&note).unwrap();
        assert!(json.get("client").is_none());
    }

    #[test]
    fn test_partial_update_bodies_skip_missing_fields() {
        let body = UpdateNoteBody {
            book_uuid: None,
            content: Some("new".into()),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("book_uuid").is_none());
        assert_eq!(json["content"], "new");

        let parsed: UpdateNoteBody = serde_json::from_str("{}").unwrap();
        assert!(parsed.book_uuid.is_none() && parsed.content.is_none());
    }

    #[test]
    fn test_new_uuid_is_canonical() {
        let u = new_uuid();
        assert_eq!(u.len(), 36);
        assert_eq!(u, u.to_lowercase());
        assert_eq!(u.matches('-').count(), 4);
    }
}
