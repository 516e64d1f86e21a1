/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::path::PathBuf;

pub struct Config {
    pub db_path: PathBuf,
    pub port: u16,
}

impl Config {
    pub fn resolve(db: Option<PathBuf>, port: u16) -> Self {
        Self {
            db_path: db.unwrap_or_else(default_db_path),
            port,
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dnote")
        .join("server.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_db_path_wins() {
        let config = Config::resolve(Some(PathBuf::from("/tmp/x.db")), 4000);
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.port, 4000);
    }

    #[test]
    fn test_default_db_path_ends_with_server_db() {
        let config = Config::resolve(None, 3000);
        assert!(config.db_path.ends_with("dnote/server.db"));
    }
}
