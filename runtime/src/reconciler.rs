//! Background reconciliation: drain the repair log.
//!
//! Compensations the coordinator could not finish inline (a revoke or a
//! release that kept failing) are recorded as repairs. The reconciler works
//! through them in recording order:
//!
//! - `RollbackRegistration`: compare-and-set the orphaned registration from
//!   Confirmed to Cancelled (already Cancelled counts as done), then reconcile
//!   its event
//! - `ReconcileEvent`: reconcile the event
//! - `UnsettledRegistration`: left behind by a `register` that never
//!   finished. Skipped while younger than `unsettled_grace`, since its
//!   register may still be running. After that, if the event holds more
//!   active registrations than capacity, the registration is cancelled; the
//!   event is reconciled either way
//!
//! A repair that fails stays pending with its attempt count bumped. The
//! periodic pass only touches events named by repairs; sweeping every event
//! is [`Reconciler::reconcile_all`], an explicit administrative action.

use crate::HealthCheck;
use crate::ledger::{CapacityLedger, ReconcileReport};
use crate::metrics::RepairMetrics;
use seatkeeper_core::environment::Clock;
use seatkeeper_core::error::{ReservationError, Result, StoreError};
use seatkeeper_core::lifecycle::RegistrationStatus;
use seatkeeper_core::store::{EventStore, RegistrationStore, Repair, RepairEntry, RepairLog};
use seatkeeper_core::types::{EventId, RegistrationId};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Tunables for the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Repairs taken per pass
    pub batch_size: usize,
    /// Pending repairs at which health turns degraded
    pub degraded_threshold: u64,
    /// Age before an unsettled registration is treated as abandoned
    pub unsettled_grace: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            degraded_threshold: 10,
            unsettled_grace: Duration::from_secs(60),
        }
    }
}

/// Counts from one [`Reconciler::run_once`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Repairs taken from the log
    pub processed: usize,
    /// Repairs completed
    pub resolved: usize,
    /// Repairs that failed again
    pub failed: usize,
    /// Unsettled registrations left alone because their register may still be running
    pub skipped: usize,
}

/// Drains the repair log and reconciles slot counters.
pub struct Reconciler {
    events: Arc<dyn EventStore>,
    registrations: Arc<dyn RegistrationStore>,
    repairs: Arc<dyn RepairLog>,
    clock: Arc<dyn Clock>,
    ledger: CapacityLedger,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Wire a reconciler over its collaborators.
    #[must_use]
    pub fn new(
        events: Arc<dyn EventStore>,
        registrations: Arc<dyn RegistrationStore>,
        repairs: Arc<dyn RepairLog>,
        clock: Arc<dyn Clock>,
        config: ReconcilerConfig,
    ) -> Self {
        let ledger = CapacityLedger::new(Arc::clone(&events), Arc::clone(&registrations));
        Self {
            events,
            registrations,
            repairs,
            clock,
            ledger,
            config,
        }
    }

    /// Process up to `batch_size` pending repairs.
    ///
    /// # Errors
    ///
    /// [`ReservationError::StoreUnavailable`] if the repair log cannot be read.
    /// Failures of individual repairs are recorded on the repair, not returned.
    pub async fn run_once(&self) -> Result<PassSummary> {
        let entries = self.repairs.pending(self.config.batch_size).await?;
        let mut summary = PassSummary::default();

        for entry in entries {
            if self.in_grace(&entry) {
                summary.skipped += 1;
                continue;
            }
            summary.processed += 1;
            if self.process(&entry).await {
                summary.resolved += 1;
            } else {
                summary.failed += 1;
            }
        }

        if let Ok(pending) = self.repairs.count_pending().await {
            RepairMetrics::record_pending(pending);
        }
        if summary.processed > 0 {
            tracing::info!(
                processed = summary.processed,
                resolved = summary.resolved,
                failed = summary.failed,
                "Reconciliation pass finished"
            );
        }
        Ok(summary)
    }

    fn in_grace(&self, entry: &RepairEntry) -> bool {
        if !matches!(entry.repair, Repair::UnsettledRegistration { .. }) {
            return false;
        }
        // A timestamp ahead of our clock counts as young.
        let age = (self.clock.now() - entry.recorded_at).to_std();
        !matches!(age, Ok(age) if age >= self.config.unsettled_grace)
    }

    async fn process(&self, entry: &RepairEntry) -> bool {
        match self.apply(&entry.repair).await {
            Ok(()) => {
                if let Err(error) = self.repairs.mark_resolved(entry.id).await {
                    // Repairs are idempotent; it will simply run again.
                    tracing::warn!(
                        repair_id = %entry.id,
                        %error,
                        "Could not mark repair resolved"
                    );
                }
                RepairMetrics::record_resolved();
                tracing::debug!(
                    repair_id = %entry.id,
                    kind = entry.repair.kind(),
                    "Repair resolved"
                );
                true
            }
            Err(error) => {
                RepairMetrics::record_failed();
                tracing::warn!(
                    repair_id = %entry.id,
                    kind = entry.repair.kind(),
                    attempts = entry.attempts + 1,
                    %error,
                    "Repair failed"
                );
                let marked = self.repairs.mark_failed(entry.id, error.to_string()).await;
                if let Err(mark_error) = marked {
                    tracing::warn!(
                        repair_id = %entry.id,
                        error = %mark_error,
                        "Could not mark repair failed"
                    );
                }
                false
            }
        }
    }

    async fn apply(&self, repair: &Repair) -> Result<()> {
        match *repair {
            Repair::RollbackRegistration {
                registration_id, ..
            } => self.cancel(registration_id).await?,
            Repair::UnsettledRegistration {
                registration_id,
                event_id,
            } => {
                if self.overbooked(event_id).await? {
                    self.cancel(registration_id).await?;
                }
            }
            Repair::ReconcileEvent { .. } => {}
        }

        match self.ledger.reconcile(repair.event_id()).await {
            Ok(_) | Err(ReservationError::EventNotFound(_)) => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Confirmed to Cancelled. Already moved, or gone, counts as done.
    async fn cancel(&self, registration_id: RegistrationId) -> Result<()> {
        match self
            .registrations
            .update_status(
                registration_id,
                RegistrationStatus::Confirmed,
                RegistrationStatus::Cancelled,
                self.clock.now(),
            )
            .await
        {
            Ok(true) => {
                tracing::info!(%registration_id, "Orphaned registration revoked");
                Ok(())
            }
            Ok(false) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn overbooked(&self, event_id: EventId) -> Result<bool> {
        let Some(event) = self.events.get(event_id).await? else {
            return Ok(false);
        };
        let active = self.registrations.count_active(event_id).await?;
        Ok(active > u64::from(event.capacity.get()))
    }

    /// Reconcile every known event. Failures are logged and recorded as
    /// repairs; the reports of the events that succeeded are returned.
    ///
    /// # Errors
    ///
    /// [`ReservationError::StoreUnavailable`] if the event list cannot be read.
    #[tracing::instrument(skip_all)]
    pub async fn reconcile_all(&self) -> Result<Vec<ReconcileReport>> {
        let event_ids = self.events.list_event_ids().await?;
        let mut reports = Vec::with_capacity(event_ids.len());

        for event_id in event_ids {
            match self.ledger.reconcile(event_id).await {
                Ok(report) => reports.push(report),
                Err(ReservationError::EventNotFound(_)) => {}
                Err(error) => {
                    tracing::warn!(%event_id, %error, "Reconciliation failed");
                    if self
                        .repairs
                        .record(Repair::ReconcileEvent { event_id })
                        .await
                        .is_ok()
                    {
                        RepairMetrics::record_recorded();
                    }
                }
            }
        }

        let drifted = reports.iter().filter(|r| r.drifted()).count();
        tracing::info!(events = reports.len(), drifted, "Full reconciliation finished");
        Ok(reports)
    }

    /// Run [`Reconciler::run_once`] every `interval` until `shutdown` resolves.
    pub async fn run<S>(&self, interval: Duration, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(interval_secs = interval.as_secs_f64(), "Reconciler started");
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Reconciler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(error) = self.run_once().await {
                        tracing::error!(%error, "Reconciliation pass failed");
                    }
                }
            }
        }
    }

    /// Health of the repair backlog.
    pub async fn health(&self) -> HealthCheck {
        match self.repairs.count_pending().await {
            Ok(pending) if pending >= self.config.degraded_threshold => HealthCheck::degraded(
                "reconciler",
                format!("{pending} repairs pending"),
            )
            .with_metadata("pending_repairs", pending.to_string()),
            Ok(pending) => HealthCheck::healthy("reconciler")
                .with_metadata("pending_repairs", pending.to_string()),
            Err(error) => {
                HealthCheck::unhealthy("reconciler", format!("repair log unreachable: {error}"))
            }
        }
    }
}
