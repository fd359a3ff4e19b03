//! Capacity ledger: the only code that moves an event's slot counter.
//!
//! ```text
//! reserve     slots -= 1  iff slots > 0                      (one conditional update)
//! release     slots += 1  iff slots + 1 <= capacity          (one conditional update)
//! reconcile   slots  = max(capacity - active, 0)             (direct overwrite)
//! ```
//!
//! Reserve and release never read-then-write. Reconcile is the one direct
//! write; it recomputes the counter from the authoritative set of active
//! registrations. When capacity has been cut below the number of active
//! registrations the counter is clamped to zero and the registrations are
//! left alone.

use crate::metrics::LedgerMetrics;
use seatkeeper_core::error::{ReservationError, Result, StoreError};
use seatkeeper_core::store::{EventStore, RegistrationStore};
use seatkeeper_core::types::{Capacity, EventId};
use std::sync::Arc;

/// Result of [`CapacityLedger::reserve`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// One slot was taken.
    Reserved,
    /// No slot was left. An expected outcome, not a fault.
    CapacityExhausted,
}

/// Result of [`CapacityLedger::release`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// One slot was given back.
    Released,
    /// The counter was already at capacity; the release was dropped.
    Clamped,
}

/// What a reconciliation found and wrote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Reconciled event
    pub event_id: EventId,
    /// Capacity at reconciliation time
    pub capacity: Capacity,
    /// Active registrations counted
    pub active: u64,
    /// Counter before the overwrite
    pub previous_slots: u32,
    /// Counter written
    pub slots: u32,
    /// More active registrations than capacity (counter pinned at zero)
    pub clamped: bool,
}

impl ReconcileReport {
    /// Whether the stored counter disagreed with the recomputed one.
    #[must_use]
    pub const fn drifted(&self) -> bool {
        self.previous_slots != self.slots
    }
}

/// Atomic reserve/release plus reconciliation over the Event Store counter.
#[derive(Clone)]
pub struct CapacityLedger {
    events: Arc<dyn EventStore>,
    registrations: Arc<dyn RegistrationStore>,
}

impl CapacityLedger {
    /// Create a ledger over the given stores.
    #[must_use]
    pub fn new(events: Arc<dyn EventStore>, registrations: Arc<dyn RegistrationStore>) -> Self {
        Self {
            events,
            registrations,
        }
    }

    /// Take one slot of `event_id`.
    ///
    /// # Errors
    ///
    /// Returns the store error if the conditional decrement could not be executed.
    pub async fn reserve(&self, event_id: EventId) -> std::result::Result<ReserveOutcome, StoreError> {
        if self.events.conditional_decrement_slots(event_id).await? {
            LedgerMetrics::record_reserved();
            tracing::debug!(%event_id, "Slot reserved");
            Ok(ReserveOutcome::Reserved)
        } else {
            LedgerMetrics::record_exhausted();
            tracing::debug!(%event_id, "No slot left");
            Ok(ReserveOutcome::CapacityExhausted)
        }
    }

    /// Give one slot of `event_id` back, never exceeding `capacity`.
    ///
    /// # Errors
    ///
    /// Returns the store error if the conditional increment could not be executed.
    pub async fn release(
        &self,
        event_id: EventId,
        capacity: Capacity,
    ) -> std::result::Result<ReleaseOutcome, StoreError> {
        if self
            .events
            .conditional_increment_slots(event_id, capacity.get())
            .await?
        {
            LedgerMetrics::record_released();
            tracing::debug!(%event_id, "Slot released");
            Ok(ReleaseOutcome::Released)
        } else {
            LedgerMetrics::record_clamped();
            tracing::warn!(%event_id, %capacity, "Release dropped: counter already at capacity");
            Ok(ReleaseOutcome::Clamped)
        }
    }

    /// Recompute and overwrite the counter of `event_id`.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::EventNotFound`]: no such event
    /// - [`ReservationError::StoreUnavailable`]: a store call failed
    pub async fn reconcile(&self, event_id: EventId) -> Result<ReconcileReport> {
        let event = self
            .events
            .get(event_id)
            .await?
            .ok_or(ReservationError::EventNotFound(event_id))?;
        let active = self.registrations.count_active(event_id).await?;
        let slots = event.capacity.remaining_after(active);

        self.events
            .set_slots(event_id, slots)
            .await
            .map_err(|error| match error {
                StoreError::NotFound(_) => ReservationError::EventNotFound(event_id),
                other => other.into(),
            })?;

        let report = ReconcileReport {
            event_id,
            capacity: event.capacity,
            active,
            previous_slots: event.available_slots,
            slots,
            clamped: active > u64::from(event.capacity.get()),
        };
        LedgerMetrics::record_reconcile(report.drifted());

        if report.clamped {
            tracing::warn!(
                %event_id,
                capacity = %report.capacity,
                active,
                "More active registrations than capacity; slots pinned at zero"
            );
        }
        if report.drifted() {
            tracing::info!(
                %event_id,
                previous_slots = report.previous_slots,
                slots,
                "Slot counter corrected"
            );
        } else {
            tracing::debug!(%event_id, slots, "Slot counter already consistent");
        }

        Ok(report)
    }
}
