//! Backends for [`CredentialStore`](crate::session::CredentialStore) and
//! [`SessionCache`](crate::session::SessionCache).

pub mod memory;
pub mod postgres;

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// Connect to Postgres.
/// # Errors
/// Return error if the database is unreachable
pub async fn connect(dsn: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")
}
