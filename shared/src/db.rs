//! Database connection management.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::secrets::DatabaseCredentials;
use crate::{Config, Error, Result};

/// Create a database connection pool.
///
/// Connection count stays small: each Lambda instance handles one request at
/// a time, but the dispatcher runs up to `concurrency` workers against it.
pub async fn create_pool(config: &Config, credentials: &DatabaseCredentials) -> Result<PgPool> {
    let host = credentials.host.as_deref().unwrap_or(&config.db_host);
    let port = credentials.port.unwrap_or(5432);
    let db_name = credentials.dbname.as_deref().unwrap_or(&config.db_name);

    let database_url = format!(
        "postgres://{}:{}@{}:{}/{}",
        credentials.username, credentials.password, host, port, db_name
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.concurrency.clamp(2, 20) as u32)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&database_url)
        .await
        .map_err(Error::Database)?;

    Ok(pool)
}
