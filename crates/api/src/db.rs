// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use diesel::Connection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

pub mod memory;
pub mod models;
pub mod postgres;
pub mod schema;
pub mod store;

pub use store::{Store, StoreError, StoreResult};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub fn run_migrations(
    connection: &mut impl MigrationHarness<diesel::pg::Pg>,
) -> Result<(), StoreError> {
    connection
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| StoreError::Migration(e.to_string()))?;

    Ok(())
}

/// Opens the configured backend. With a database URL, pending migrations are
/// applied over a blocking connection before the async pool is built.
pub async fn open_store(database_url: Option<&str>) -> Result<Arc<dyn Store>, StoreError> {
    match database_url {
        Some(database_url) => {
            let url = database_url.to_string();
            tokio::task::spawn_blocking(move || {
                let mut pg_connection = diesel::pg::PgConnection::establish(&url)
                    .map_err(|e| StoreError::Pool(e.to_string()))?;
                run_migrations(&mut pg_connection)
            })
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))??;
            Ok(Arc::new(postgres::PgStore::connect(database_url).await?))
        }
        None => {
            tracing::warn!("DATABASE_URL is not set; using a volatile in-memory store");
            Ok(Arc::new(memory::MemoryStore::new()))
        }
    }
}
