//! # Seatkeeper Runtime
//!
//! The reservation engine proper: everything between a controller and the
//! stores.
//!
//! ## Core Components
//!
//! - **Identity Resolver**: request → canonical registrant (member or deduplicated guest)
//! - **Capacity Ledger**: atomic reserve/release and reconciliation of the slot counter
//! - **Reservation Coordinator**: race-free `register` / `unregister`, plus admin operations
//! - **Reconciler**: drains the repair log left by compensations that could not finish inline
//!
//! ## Example
//!
//! ```ignore
//! use seatkeeper_runtime::{CoordinatorConfig, ReservationCoordinator};
//!
//! let coordinator = ReservationCoordinator::new(
//!     event_store,
//!     registration_store,
//!     repair_log,
//!     Arc::new(SystemClock),
//!     CoordinatorConfig::default(),
//! );
//!
//! let registration = coordinator.register(event_id, &request).await?;
//! coordinator.unregister(event_id, &registration.identity).await?;
//! ```

pub mod coordinator;
pub mod ledger;
pub mod reconciler;
pub mod resolver;

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

pub use coordinator::{CoordinatorConfig, ReservationCoordinator, UnregisterOutcome};
pub use ledger::{CapacityLedger, ReconcileReport, ReleaseOutcome, ReserveOutcome};
pub use reconciler::{PassSummary, Reconciler, ReconcilerConfig};
pub use resolver::IdentityResolver;
pub use retry::RetryPolicy;

/// How the reconciler judges itself, as reported by [`Reconciler::health`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// The repair log is reachable and its backlog is small
    Healthy,
    /// The backlog has reached the configured threshold
    Degraded,
    /// The repair log cannot be read
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        })
    }
}

/// One health check result: a status, an optional reason and key/value details
/// such as the backlog size.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// The component that was checked
    pub component: String,
    /// Its status
    pub status: HealthStatus,
    /// Why it is not healthy
    pub message: Option<String>,
    /// Details in insertion order
    pub metadata: Vec<(String, String)>,
}

impl HealthCheck {
    fn with_status(component: impl Into<String>, status: HealthStatus, message: Option<String>) -> Self {
        Self {
            component: component.into(),
            status,
            message,
            metadata: Vec::new(),
        }
    }

    /// A healthy result
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self::with_status(component, HealthStatus::Healthy, None)
    }

    /// A degraded result with its reason
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(component, HealthStatus::Degraded, Some(message.into()))
    }

    /// An unhealthy result with its reason
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(component, HealthStatus::Unhealthy, Some(message.into()))
    }

    /// Attach a detail
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    /// Look up a detail by key
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
