/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

pub mod api;
pub mod error;
pub mod schema;
pub mod storage;
pub mod sync;

pub use api::{HttpRemote, SyncRemote};
pub use error::{ClientError, Result};
pub use storage::{ClientStorage, LocalBook, LocalNote};
pub use sync::{Confirm, StdinConfirm, SyncEngine, SyncSummary};
