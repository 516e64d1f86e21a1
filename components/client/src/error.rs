/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("unauthorized; log in again")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    /// The server already holds a live book with this label.
    #[error("duplicate book label")]
    DuplicateLabel,

    /// The send phase kept hitting label conflicts after repeated merges.
    #[error("unable to resolve book label conflict")]
    ConflictIrrecoverable,

    /// The user declined the empty-server prompt; nothing was changed.
    #[error("sync cancelled")]
    SyncCancelled,

    #[error("network error: {0}")]
    Transport(String),

    #[error("unexpected server response ({status}): {message}")]
    Unexpected { status: u16, message: String },

    #[error("Error executing SQL: {0}")]
    SqlError(#[from] rusqlite::Error),

    #[error("Error opening database: {0}")]
    OpenDatabaseError(#[from] sql_support::open_database::Error),

    #[error("Error parsing JSON data: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Error parsing URL: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
