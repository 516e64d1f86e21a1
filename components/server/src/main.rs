/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use clap::Parser;
use dnote_server::{AppState, Store, StoreError};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::Config;

const WAL_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(5 * 60);
const VACUUM_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Parser)]
#[command(name = "dnote-server", about = "Self-hosted dnote sync server")]
struct Cli {
    /// Path to the server database. Defaults to $XDG_DATA_HOME/dnote/server.db.
    #[arg(long, env = "DNOTE_DB")]
    db: Option<PathBuf>,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Create a user, print the generated api key, and exit.
    #[arg(long)]
    add_user: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dnote_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::resolve(cli.db, cli.port);
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(Store::new(&config.db_path)?);
    tracing::info!("opened database at {}", config.db_path.display());

    if cli.add_user {
        let user = store.create_user(&sync_proto::new_uuid())?;
        println!("created user {} with api key {}", user.id, user.api_key);
        return Ok(());
    }

    spawn_maintenance(store.clone());

    let app = dnote_server::router(AppState::new(store));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Periodic WAL checkpoints keep the log bounded; a daily vacuum reclaims
/// space left behind by churned tombstones.
fn spawn_maintenance(store: Arc<Store>) {
    spawn_periodic(store.clone(), WAL_CHECKPOINT_INTERVAL, "wal checkpoint", |s| {
        s.checkpoint_wal()
    });
    spawn_periodic(store, VACUUM_INTERVAL, "vacuum", |s| s.vacuum());
}

fn spawn_periodic(
    store: Arc<Store>,
    period: Duration,
    name: &'static str,
    task: fn(&Store) -> Result<(), StoreError>,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick fires immediately; skip it.
        interval.tick().await;
        loop {
            interval.tick().await;
            let store = store.clone();
            let result = tokio::task::spawn_blocking(move || task(&store))
                .await
                .unwrap_or_else(|e| Err(StoreError::Internal(e.to_string())));
            match result {
                Ok(()) => tracing::debug!("{} completed", name),
                Err(e) => tracing::warn!("{} failed: {}", name, e),
            }
        }
    });
}
