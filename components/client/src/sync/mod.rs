/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

pub mod engine;
pub mod merge;

pub use engine::{SyncEngine, SyncSummary};

use crate::error::*;
use std::io::{BufRead, Write};

/// The engine's single interactive decision point. Production wires this to
/// stdin; tests script the answer.
pub trait Confirm {
    fn confirm(&mut self, question: &str) -> Result<bool>;
}

/// Reads one line from stdin; anything but an explicit yes declines.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        print!("{} (y/N): ", question);
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(matches!(line.trim(), "y" | "Y" | "yes"))
    }
}
