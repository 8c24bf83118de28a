//! PostgreSQL persistence for the job queue.
//!
//! [`PgJobQueue`] implements [`melodia_core::queue::JobQueue`] on top of the
//! `jobs` table. Claims use `SELECT ... FOR UPDATE SKIP LOCKED`; every other
//! transition is a conditional `UPDATE` keyed on `(id, attempt, worker_id,
//! status_id)`.

pub mod models;
pub mod queue;
pub mod repositories;

use sqlx::postgres::PgPoolOptions;

pub use queue::PgJobQueue;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to verify the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await?;
    Ok(())
}

/// Apply pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
