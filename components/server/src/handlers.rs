/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The wire surface: JSON sync endpoints on an axum router. Handlers hop to
//! the blocking pool for every store call so the async executor never parks
//! on SQLite.

use crate::error::StoreError;
use crate::store::Store;
use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_derive::Deserialize;
use std::sync::Arc;
use sync_proto::{
    BookResponse, CreateBookBody, CreateNoteBody, ErrorBody, NoteResponse, QueryParamErrorBody,
    SyncFragmentResponse, SyncStateResponse, UpdateBookBody, UpdateNoteBody,
};
use tower_http::trace::TraceLayer;

pub const SESSION_COOKIE: &str = "dnote-session";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
}

impl AppState {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v3/sync/state", get(get_sync_state))
        .route("/v3/sync/fragment", get(get_sync_fragment))
        .route("/v3/books", axum::routing::post(create_book))
        .route(
            "/v3/books/:uuid",
            axum::routing::patch(update_book).delete(delete_book),
        )
        .route("/v3/notes", axum::routing::post(create_note))
        .route(
            "/v3/notes/:uuid",
            axum::routing::patch(update_note).delete(delete_note),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        match &self {
            StoreError::DuplicateLabel => {
                error_response(StatusCode::CONFLICT, "duplicate book label")
            }
            StoreError::NotFound => error_response(StatusCode::NOT_FOUND, "not found"),
            StoreError::Unauthorized => error_response(StatusCode::UNAUTHORIZED, "unauthorized"),
            StoreError::BadRequest(msg) => error_response(StatusCode::BAD_REQUEST, msg),
            StoreError::QueryParam {
                key,
                value,
                message,
            } => (
                StatusCode::BAD_REQUEST,
                Json(QueryParamErrorBody {
                    key: key.clone(),
                    value: value.clone(),
                    message: message.clone(),
                }),
            )
                .into_response(),
            StoreError::SqlError(_) | StoreError::OpenDatabaseError(_) | StoreError::Internal(_) => {
                // SQL detail stays out of the response body.
                tracing::error!("storage failure: {}", self);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            }
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// The authenticated caller, resolved from `Authorization: Bearer <key>` or
/// the `dnote-session` cookie. Session lifecycle lives outside the sync core;
/// this only turns a key into an opaque `UserID`.
pub struct AuthedUser(pub i64);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthedUser {
    type Rejection = StoreError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, StoreError> {
        let key = session_key_from_parts(parts).ok_or(StoreError::Unauthorized)?;
        let store = state.store.clone();
        let user = run_blocking(move || store.get_user_by_api_key(&key)).await?;
        match user {
            Some(user) => Ok(AuthedUser(user.id)),
            None => Err(StoreError::Unauthorized),
        }
    }
}

fn session_key_from_parts(parts: &Parts) -> Option<String> {
    if let Some(auth) = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(key) = auth.strip_prefix("Bearer ") {
            if !key.is_empty() {
                return Some(key.to_string());
            }
        }
    }
    let cookies = parts.headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE && !value.is_empty()).then(|| value.to_string())
    })
}

async fn run_blocking<T, F>(f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn get_sync_state(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
) -> Result<Json<SyncStateResponse>, StoreError> {
    let store = state.store.clone();
    let sync_state = run_blocking(move || store.get_sync_state(user_id)).await?;
    Ok(Json(sync_state))
}

#[derive(Debug, Default, Deserialize)]
struct FragmentParams {
    after_usn: Option<String>,
    limit: Option<String>,
}

fn parse_query_param(key: &str, value: &str) -> Result<i64, StoreError> {
    value.parse::<i64>().ok().filter(|n| *n >= 0).ok_or_else(|| {
        StoreError::QueryParam {
            key: key.to_string(),
            value: value.to_string(),
            message: "expected a non-negative integer".to_string(),
        }
    })
}

async fn get_sync_fragment(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Query(params): Query<FragmentParams>,
) -> Result<Json<SyncFragmentResponse>, StoreError> {
    let after_usn = match &params.after_usn {
        Some(raw) => parse_query_param("after_usn", raw)?,
        None => 0,
    };
    let limit = match &params.limit {
        Some(raw) => Some(parse_query_param("limit", raw)? as usize),
        None => None,
    };
    let store = state.store.clone();
    let fragment = run_blocking(move || store.get_sync_fragment(user_id, after_usn, limit)).await?;
    Ok(Json(fragment))
}

async fn create_book(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Json(body): Json<CreateBookBody>,
) -> Result<(StatusCode, Json<BookResponse>), StoreError> {
    let store = state.store.clone();
    let book = run_blocking(move || store.create_book(user_id, &body.name)).await?;
    Ok((StatusCode::CREATED, Json(BookResponse { book })))
}

async fn update_book(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Path(uuid): Path<String>,
    Json(body): Json<UpdateBookBody>,
) -> Result<Json<BookResponse>, StoreError> {
    let store = state.store.clone();
    let book =
        run_blocking(move || store.update_book(user_id, &uuid, body.name.as_deref())).await?;
    Ok(Json(BookResponse { book }))
}

async fn delete_book(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Path(uuid): Path<String>,
) -> Result<Json<BookResponse>, StoreError> {
    let store = state.store.clone();
    let book = run_blocking(move || store.delete_book(user_id, &uuid)).await?;
    Ok(Json(BookResponse { book }))
}

async fn create_note(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Json(body): Json<CreateNoteBody>,
) -> Result<(StatusCode, Json<NoteResponse>), StoreError> {
    let store = state.store.clone();
    let note = run_blocking(move || {
        store.create_note(
            user_id,
            &body.book_uuid,
            &body.content,
            body.added_on,
            body.edited_on,
            body.client.as_deref().unwrap_or(""),
        )
    })
    .await?;
    Ok((StatusCode::CREATED, Json(NoteResponse { note })))
}

async fn update_note(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Path(uuid): Path<String>,
    Json(body): Json<UpdateNoteBody>,
) -> Result<Json<NoteResponse>, StoreError> {
    let store = state.store.clone();
    let note = run_blocking(move || {
        store.update_note(user_id, &uuid, body.book_uuid.as_deref(), body.content.as_deref())
    })
    .await?;
    Ok(Json(NoteResponse { note }))
}

async fn delete_note(
    State(state): State<AppState>,
    AuthedUser(user_id): AuthedUser,
    Path(uuid): Path<String>,
) -> Result<Json<NoteResponse>, StoreError> {
    let store = state.store.clone();
    let note = run_blocking(move || store.delete_note(user_id, &uuid)).await?;
    Ok(Json(NoteResponse { note }))
}
