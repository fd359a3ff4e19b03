//! Resource management for infrastructure setup.
//!
//! Centralizes infrastructure initialization (database pool, migrations,
//! stores, clock) into a single `ResourceManager`, and builds the
//! coordinator and reconciler over those resources. Every collaborator is
//! passed in explicitly; nothing is looked up from process-wide state.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = Config::from_env()?;
//! let resources = ResourceManager::from_config(&config).await?;
//!
//! let coordinator = resources.coordinator();
//! let reconciler = resources.reconciler();
//! ```

use crate::config::Config;
use seatkeeper_core::environment::SystemClock;
use seatkeeper_core::error::StoreError;
use seatkeeper_postgres::{PostgresEventStore, PostgresRegistrationStore, PostgresRepairLog};
use seatkeeper_runtime::{Reconciler, ReservationCoordinator};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Errors raised while bringing resources up.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// The database could not be reached
    #[error("failed to connect to the database: {0}")]
    Connect(#[from] sqlx::Error),
    /// Migrations did not apply
    #[error("failed to prepare the schema: {0}")]
    Migrate(#[from] StoreError),
}

/// Central resource manager for all infrastructure components.
///
/// All resources are wrapped in `Arc` (or are cheap pool handles) so they can
/// be shared across tasks.
#[derive(Clone)]
pub struct ResourceManager {
    /// Service configuration
    pub config: Arc<Config>,

    /// System clock for timestamps and the open/closed check
    pub clock: Arc<SystemClock>,

    /// Connection pool shared by every store
    pub pool: PgPool,

    /// Events and their slot counters
    pub events: Arc<PostgresEventStore>,

    /// Registrations and the guest directory
    pub registrations: Arc<PostgresRegistrationStore>,

    /// Deferred compensations
    pub repairs: Arc<PostgresRepairLog>,
}

impl ResourceManager {
    /// Initialize all infrastructure resources from configuration.
    ///
    /// Connects the pool, runs migrations and wires the stores.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] if the database cannot be reached or the
    /// migrations fail.
    pub async fn from_config(config: &Config) -> Result<Self, BootstrapError> {
        info!(
            max_connections = config.postgres.max_connections,
            "Connecting to database..."
        );
        let pool = PgPoolOptions::new()
            .max_connections(config.postgres.max_connections)
            .min_connections(config.postgres.min_connections)
            .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
            .connect(&config.postgres.url)
            .await?;

        info!("Running migrations...");
        seatkeeper_postgres::migrate(&pool).await?;
        info!("Migrations complete");

        Ok(Self::from_pool(config, pool))
    }

    /// Wire resources over an already connected and migrated pool.
    #[must_use]
    pub fn from_pool(config: &Config, pool: PgPool) -> Self {
        Self {
            config: Arc::new(config.clone()),
            clock: Arc::new(SystemClock),
            events: Arc::new(PostgresEventStore::new(pool.clone())),
            registrations: Arc::new(PostgresRegistrationStore::new(pool.clone())),
            repairs: Arc::new(PostgresRepairLog::new(pool.clone())),
            pool,
        }
    }

    /// A coordinator over these resources.
    #[must_use]
    pub fn coordinator(&self) -> ReservationCoordinator {
        ReservationCoordinator::new(
            self.events.clone(),
            self.registrations.clone(),
            self.repairs.clone(),
            self.clock.clone(),
            self.config.coordinator_config(),
        )
    }

    /// A reconciler over these resources.
    #[must_use]
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.events.clone(),
            self.registrations.clone(),
            self.repairs.clone(),
            self.clock.clone(),
            self.config.reconciler_config(),
        )
    }
}
