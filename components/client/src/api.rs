/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The transport seam of the sync engine: one method per server endpoint.
//! Production talks HTTP through `HttpRemote`; tests drive the engine with an
//! in-process implementation instead.

use crate::error::*;
use serde::de::DeserializeOwned;
use std::time::Duration;
use sync_proto::{
    BookRecord, BookResponse, CreateBookBody, CreateNoteBody, NoteRecord, NoteResponse,
    SyncFragmentResponse, SyncStateResponse, UpdateBookBody, UpdateNoteBody,
};
use url::Url;

pub trait SyncRemote {
    fn get_sync_state(&self) -> Result<SyncStateResponse>;
    fn get_sync_fragment(&self, after_usn: i64, limit: usize) -> Result<SyncFragmentResponse>;
    fn create_book(&self, name: &str) -> Result<BookRecord>;
    fn update_book(&self, uuid: &str, name: Option<&str>) -> Result<BookRecord>;
    fn delete_book(&self, uuid: &str) -> Result<BookRecord>;
    fn create_note(&self, body: &CreateNoteBody) -> Result<NoteRecord>;
    fn update_note(&self, uuid: &str, body: &UpdateNoteBody) -> Result<NoteRecord>;
    fn delete_note(&self, uuid: &str) -> Result<NoteRecord>;
}

const READ_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpRemote {
    http: reqwest::blocking::Client,
    base: Url,
    session_key: String,
}

impl HttpRemote {
    pub fn new(endpoint: &str, session_key: &str) -> Result<Self> {
        // `Url::join` treats a base without a trailing slash as a file.
        let mut endpoint = endpoint.to_string();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        let base = Url::parse(&endpoint)?;
        let http = reqwest::blocking::Client::builder()
            .timeout(READ_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base,
            session_key: session_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    fn execute<T: DeserializeOwned>(
        &self,
        builder: reqwest::blocking::RequestBuilder,
    ) -> Result<T> {
        let response = builder
            .header("Authorization", format!("Bearer {}", self.session_key))
            .send()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .map_err(|e| ClientError::Transport(e.to_string()));
        }
        Err(match status.as_u16() {
            401 => ClientError::Unauthorized,
            404 => ClientError::NotFound,
            409 => ClientError::DuplicateLabel,
            code => ClientError::Unexpected {
                status: code,
                message: response.text().unwrap_or_default(),
            },
        })
    }
}

impl SyncRemote for HttpRemote {
    fn get_sync_state(&self) -> Result<SyncStateResponse> {
        self.execute(self.http.get(self.url("v3/sync/state")?))
    }

    fn get_sync_fragment(&self, after_usn: i64, limit: usize) -> Result<SyncFragmentResponse> {
        let url = self.url("v3/sync/fragment")?;
        self.execute(self.http.get(url).query(&[
            ("after_usn", after_usn.to_string()),
            ("limit", limit.to_string()),
        ]))
    }

    fn create_book(&self, name: &str) -> Result<BookRecord> {
        let url = self.url("v3/books")?;
        let response: BookResponse = self.execute(
            self.http
                .post(url)
                .json(&CreateBookBody { name: name.into() }),
        )?;
        Ok(response.book)
    }

    fn update_book(&self, uuid: &str, name: Option<&str>) -> Result<BookRecord> {
        let url = self.url(&format!("v3/books/{}", uuid))?;
        let response: BookResponse = self.execute(self.http.patch(url).json(&UpdateBookBody {
            name: name.map(str::to_string),
        }))?;
        Ok(response.book)
    }

    fn delete_book(&self, uuid: &str) -> Result<BookRecord> {
        let url = self.url(&format!("v3/books/{}", uuid))?;
        let response: BookResponse = self.execute(self.http.delete(url))?;
        Ok(response.book)
    }

    fn create_note(&self, body: &CreateNoteBody) -> Result<NoteRecord> {
        let url = self.url("v3/notes")?;
        let response: NoteResponse = self.execute(self.http.post(url).json(body))?;
        Ok(response.note)
    }

    fn update_note(&self, uuid: &str, body: &UpdateNoteBody) -> Result<NoteRecord> {
        let url = self.url(&format!("v3/notes/{}", uuid))?;
        let response: NoteResponse = self.execute(self.http.patch(url).json(body))?;
        Ok(response.note)
    }

    fn delete_note(&self, uuid: &str) -> Result<NoteRecord> {
        let url = self.url(&format!("v3/notes/{}", uuid))?;
        let response: NoteResponse = self.execute(self.http.delete(url))?;
        Ok(response.note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gains_trailing_slash() {
        let remote = HttpRemote::new("https://dnote.example.com/api", "k").unwrap();
        assert_eq!(
            remote.url("v3/sync/state").unwrap().as_str(),
            "https://dnote.example.com/api/v3/sync/state"
        );
    }

    #[test]
    fn test_bad_endpoint_is_an_error() {
        assert!(matches!(
            HttpRemote::new("not a url", "k"),
            Err(ClientError::UrlParseError(_))
        ));
    }
}
