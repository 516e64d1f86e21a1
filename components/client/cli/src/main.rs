/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

#![warn(rust_2018_idioms)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dnote_client::{ClientError, ClientStorage, HttpRemote, StdinConfirm, SyncEngine};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "dnote", about = "dnote client: capture notes and sync them")]
struct Cli {
    /// Path to the local database. Defaults to ~/.local/share/dnote/dnote.db.
    #[arg(long, short = 'd')]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store the server endpoint and session key for future syncs.
    Login {
        endpoint: String,
        session_key: String,
    },
    /// Create a book.
    AddBook { label: String },
    /// Add a note to a book.
    Add { book: String, content: String },
    /// List books and their live note counts.
    Ls,
    /// Run one sync cycle against the configured server.
    Sync,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dnote")
        .join("dnote.db")
}

fn run(cli: Cli) -> Result<()> {
    let db_path = cli.db_path.unwrap_or_else(default_db_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let storage = ClientStorage::open(&db_path)?;

    match cli.command {
        Command::Login {
            endpoint,
            session_key,
        } => {
            storage.set_api_endpoint(&endpoint)?;
            storage.set_session(&session_key, 0)?;
            println!("configured endpoint {}", endpoint);
        }
        Command::AddBook { label } => {
            let book = storage.add_book(&label)?;
            println!("added book {}", book.label);
        }
        Command::Add { book, content } => {
            let book = storage
                .get_book_by_label(&book)?
                .with_context(|| format!("no book named {}", book))?;
            storage.add_note(&book.uuid, &content)?;
            println!("added note to {}", book.label);
        }
        Command::Ls => {
            for book in storage.all_books()? {
                if book.deleted {
                    continue;
                }
                let notes = storage
                    .all_notes()?
                    .into_iter()
                    .filter(|n| n.book_uuid == book.uuid && !n.deleted)
                    .count();
                println!("{} ({})", book.label, notes);
            }
        }
        Command::Sync => {
            let endpoint = storage
                .api_endpoint()?
                .context("no server configured; run `dnote login` first")?;
            let session_key = storage
                .session_key()?
                .context("no session key; run `dnote login` first")?;
            let remote = HttpRemote::new(&endpoint, &session_key)?;
            let mut confirm = StdinConfirm;
            let mut engine = SyncEngine::new(&storage, &remote, &mut confirm);
            let summary = engine.sync()?;
            println!(
                "synced: {} sent, {} received, cursor {}",
                summary.uploaded, summary.downloaded, summary.cursor
            );
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // A declined prompt is a choice, not a failure.
            if matches!(
                e.downcast_ref::<ClientError>(),
                Some(ClientError::SyncCancelled)
            ) {
                println!("sync cancelled");
                return ExitCode::SUCCESS;
            }
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
