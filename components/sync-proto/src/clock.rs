/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall clock in unix nanoseconds, the unit book/note timestamps use.
pub fn now_nanos() -> i64 {
    duration_since_epoch().as_nanos() as i64
}

/// Wall clock in unix seconds, the unit sync-state watermarks use.
pub fn now_secs() -> i64 {
    duration_since_epoch().as_secs() as i64
}

fn duration_since_epoch() -> std::time::Duration {
    // A clock before 1970 is a configuration problem we can't paper over.
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}
