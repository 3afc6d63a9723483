// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Archives every active event whose end date has passed. Meant to be run
//! periodically by an external scheduler.

use std::error::Error;

use cvctf_api::{config::Config, db};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    if config.database_url.is_none() {
        return Err("DATABASE_URL must be set to archive events".into());
    }
    let store = db::open_store(config.database_url.as_deref()).await?;

    let archived = store.archive_expired_events(chrono::Utc::now()).await?;
    for event in &archived {
        tracing::info!(
            event_id = event.id,
            name = %event.name,
            end_date = %event.end_date,
            "Archived expired event"
        );
    }
    tracing::info!("Archived {} expired event(s)", archived.len());
    Ok(())
}
