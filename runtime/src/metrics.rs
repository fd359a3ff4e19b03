//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the reservation engine:
//! - Registration outcomes (confirmed, rejected by reason)
//! - Unregistration outcomes (cancelled, idempotent repeat)
//! - Capacity ledger operations
//! - Reconciliation runs and detected drift
//! - Repair log traffic and backlog
//!
//! # Example
//!
//! ```rust,no_run
//! use seatkeeper_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Start metrics server on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and spawn the HTTP listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built (for example the address
    /// cannot be bound).
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this logs a
    /// warning and leaves the existing recorder in place.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                tokio::spawn(async move {
                    if let Err(_error) = exporter.await {
                        // ExporterError (metrics-exporter-prometheus 0.15) implements neither Debug nor Display.
                        tracing::error!("Metrics exporter stopped");
                    }
                });
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(_) => {
                tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                Ok(())
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Registration
    describe_counter!(
        "seatkeeper.register.confirmed",
        "Registrations that ended holding a slot"
    );
    describe_counter!(
        "seatkeeper.register.rejected",
        "Registrations refused, labelled by reason"
    );
    describe_counter!(
        "seatkeeper.unregister.cancelled",
        "Registrations cancelled and their slot released"
    );
    describe_counter!(
        "seatkeeper.unregister.idempotent",
        "Unregister requests for an already cancelled registration"
    );

    // Capacity ledger
    describe_counter!("seatkeeper.ledger.reserved", "Slots taken by a conditional decrement");
    describe_counter!(
        "seatkeeper.ledger.exhausted",
        "Reserve attempts that found no slot left"
    );
    describe_counter!(
        "seatkeeper.ledger.released",
        "Slots returned by a conditional increment"
    );
    describe_counter!(
        "seatkeeper.ledger.clamped",
        "Releases that hit the capacity ceiling and were dropped"
    );

    // Reconciliation
    describe_counter!("seatkeeper.reconcile.runs", "Events reconciled");
    describe_counter!(
        "seatkeeper.reconcile.drift",
        "Reconciliations that found the slot counter out of date"
    );

    // Repair log
    describe_counter!("seatkeeper.repair.recorded", "Compensations deferred to the repair log");
    describe_counter!("seatkeeper.repair.resolved", "Repairs completed by the reconciler");
    describe_counter!("seatkeeper.repair.failed", "Repair attempts that failed again");
    describe_gauge!("seatkeeper.repair.pending", "Unresolved repairs");

    // Retry
    describe_counter!("seatkeeper.retry.attempts", "Compensation retry attempts");
    describe_counter!("seatkeeper.retry.successes", "Compensations that succeeded after retrying");
    describe_counter!("seatkeeper.retry.exhausted", "Compensations that exhausted their retries");
}

/// Registration metrics recorder.
pub struct RegistrationMetrics;

impl RegistrationMetrics {
    /// Record a confirmed registration.
    pub fn record_confirmed() {
        counter!("seatkeeper.register.confirmed").increment(1);
    }

    /// Record a refused registration.
    pub fn record_rejected(reason: &'static str) {
        counter!("seatkeeper.register.rejected", "reason" => reason).increment(1);
    }

    /// Record a cancellation that released a slot.
    pub fn record_cancelled() {
        counter!("seatkeeper.unregister.cancelled").increment(1);
    }

    /// Record a repeated unregister.
    pub fn record_idempotent() {
        counter!("seatkeeper.unregister.idempotent").increment(1);
    }
}

/// Capacity ledger metrics recorder.
pub struct LedgerMetrics;

impl LedgerMetrics {
    /// Record a slot reserved.
    pub fn record_reserved() {
        counter!("seatkeeper.ledger.reserved").increment(1);
    }

    /// Record a reserve that found no slot.
    pub fn record_exhausted() {
        counter!("seatkeeper.ledger.exhausted").increment(1);
    }

    /// Record a slot released.
    pub fn record_released() {
        counter!("seatkeeper.ledger.released").increment(1);
    }

    /// Record a release dropped at the capacity ceiling.
    pub fn record_clamped() {
        counter!("seatkeeper.ledger.clamped").increment(1);
    }

    /// Record a reconciliation, and whether the counter had drifted.
    pub fn record_reconcile(drifted: bool) {
        counter!("seatkeeper.reconcile.runs").increment(1);
        if drifted {
            counter!("seatkeeper.reconcile.drift").increment(1);
        }
    }
}

/// Repair log metrics recorder.
pub struct RepairMetrics;

impl RepairMetrics {
    /// Record a repair deferred to the log.
    pub fn record_recorded() {
        counter!("seatkeeper.repair.recorded").increment(1);
    }

    /// Record a repair completed.
    pub fn record_resolved() {
        counter!("seatkeeper.repair.resolved").increment(1);
    }

    /// Record a repair attempt that failed.
    pub fn record_failed() {
        counter!("seatkeeper.repair.failed").increment(1);
    }

    /// Record the current backlog.
    #[allow(clippy::cast_precision_loss)] // backlog sizes are far below 2^53
    pub fn record_pending(pending: u64) {
        gauge!("seatkeeper.repair.pending").set(pending as f64);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("seatkeeper.retry.attempts").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("seatkeeper.retry.successes").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("seatkeeper.retry.exhausted").increment(1);
    }
}
