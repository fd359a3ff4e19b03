//! `PostgreSQL` stores for seatkeeper.
//!
//! Implements the collaborator traits of `seatkeeper-core` on top of sqlx:
//!
//! - [`PostgresEventStore`]: events and their slot counter
//! - [`PostgresRegistrationStore`]: registrations and the guest directory
//! - [`PostgresRepairLog`]: deferred compensations
//!
//! Every conditional operation is a single statement. Reserve and release
//! are guarded `UPDATE`s, insert-if-absent leans on the partial unique index
//! over non-cancelled registrations, and status changes compare-and-set on
//! the current status. No explicit transactions or row locks are taken, so
//! any number of service instances can share one database.
//!
//! # Example
//!
//! ```ignore
//! use seatkeeper_postgres::{PostgresEventStore, connect, migrate};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = connect("postgres://localhost/seatkeeper", 10).await?;
//!     migrate(&pool).await?;
//!     let events = PostgresEventStore::new(pool);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod event_store;
mod registration_store;
mod repair_log;

pub use event_store::PostgresEventStore;
pub use registration_store::PostgresRegistrationStore;
pub use repair_log::{PostgresRepairLog, RepairStatus};

use seatkeeper_core::error::StoreError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if the database cannot be reached.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .map_err(|e| StoreError::Unavailable(format!("Failed to connect: {e}")))?;

    tracing::info!(max_connections, "Connected to PostgreSQL");
    Ok(pool)
}

/// Run the bundled migrations.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("Migration failed: {e}")))?;

    tracing::info!("Database migrations applied");
    Ok(())
}
