//! PostgreSQL-backed queue storage for browserq.
//!
//! The task queue is a plain table drained with
//! `FOR UPDATE SKIP LOCKED`, so any number of worker processes can pop
//! from the same queue without double-dispatch.

use sqlx::postgres::PgPoolOptions;

pub mod models;
pub mod repositories;

pub use repositories::{TaskQueueRepo, TaskResultRepo};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to prove the connection works.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the embedded migrations in `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
