//! # Database Journal
//!
//! Optional Postgres persistence via SQLx. When `DATABASE_URL` is set the
//! server journals pool configuration, leases and overage charges, and
//! replays them at startup. The in-memory coordinator stays authoritative;
//! without a database the server runs in-memory only.

pub mod charges;
pub mod leases;
pub mod pools;

use sqlx::postgres::{PgPool, PgPoolOptions};

/// Connect and run migrations.
///
/// Returns `None` when no URL is configured. Returns `Err` if the URL is
/// set but the connection or migration fails.
pub async fn init_pool(database_url: Option<&str>) -> Result<Option<PgPool>, sqlx::Error> {
    let Some(url) = database_url else {
        tracing::warn!(
            "DATABASE_URL not set, running in-memory only mode. \
             Leases will not survive restarts."
        );
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}

/// Column value that does not map back onto a domain type.
pub(crate) fn corrupt(table: &str, column: &str, detail: impl std::fmt::Display) -> sqlx::Error {
    sqlx::Error::Protocol(format!("invalid {table}.{column}: {detail}"))
}
