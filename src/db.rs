use std::time::Duration;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

/// Opens the remote store's pool without waiting for the database. An
/// unreachable database at startup only means sessions fall back to local logs.
pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    let db = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect_lazy(database_url)
        .context("parse DATABASE_URL")?;

    match sqlx::migrate!("./migrations").run(&db).await {
        Ok(()) => info!("remote store migrations applied"),
        Err(e) => warn!(error = %e, "migrations not applied; remote store may be unreachable"),
    }
    Ok(db)
}
