//! Reservation coordinator: the single entry point controllers call.
//!
//! # Register
//!
//! ```text
//! load event ─▶ open? guests allowed? ─▶ resolve identity ─▶ active already? (fast path)
//!     ─▶ insert_if_absent(Confirmed)      uniqueness: the authoritative race-closer
//!     ─▶ ledger.reserve                   capacity: second, independent atomic step
//!           └─ exhausted ─▶ revoke the inserted row (retried), else record a repair
//!     ─▶ still active?                    a concurrent unregister may have cancelled it
//! ```
//!
//! The registration row is committed before the counter moves, so identity
//! uniqueness rests on one conditional insert and capacity on one conditional
//! decrement. Nothing here locks; concurrent callers on any number of
//! instances are serialised by the stores alone.
//!
//! Everything from the insert onwards runs on its own task, so a caller that
//! gives up (timeout, dropped connection) cannot stop it between the insert
//! and the reserve. An `UnsettledRegistration` repair is recorded before the
//! insert and resolved once the slot is settled; if the process dies in
//! between, the reconciler picks it up after a grace period.
//!
//! # Unregister
//!
//! A compare-and-set from `Confirmed` to `Cancelled` decides which caller owns
//! the cancellation; only that caller releases the slot, exactly once. A
//! release that keeps failing is recorded in the repair log and healed by
//! reconciliation. Until then the counter under-reports availability, which
//! never oversells. The same goes for an event whose capacity was cut below
//! its active registrations: its slot stays closed and reconciliation
//! reopens it once the event is back under capacity.

use crate::ledger::{CapacityLedger, ReconcileReport, ReleaseOutcome, ReserveOutcome};
use crate::metrics::{RegistrationMetrics, RepairMetrics};
use crate::resolver::IdentityResolver;
use crate::retry::{RetryPolicy, retry_with_predicate};
use seatkeeper_core::environment::Clock;
use seatkeeper_core::error::{ReservationError, Result, StoreError};
use seatkeeper_core::identity::{
    IdentityKey, NormalizedEmail, RegistrantIdentity, RegistrationRequest,
};
use seatkeeper_core::lifecycle::{RegistrationStatus, Transition};
use seatkeeper_core::store::{
    EventStore, InsertOutcome, RegistrationStore, Repair, RepairId, RepairLog,
};
use seatkeeper_core::types::{Capacity, Event, EventId, Registration};
use std::sync::Arc;
use tracing::Instrument;

/// Tunables for the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Backoff for compensation steps (revoke after exhaustion, release after cancel)
    pub compensation_retry: RetryPolicy,
    /// Bound on the guest lookup/insert/re-fetch cycle
    pub guest_resolution_attempts: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            compensation_retry: RetryPolicy::builder().jitter(true).build(),
            guest_resolution_attempts: 3,
        }
    }
}

/// Successful outcomes of [`ReservationCoordinator::unregister`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnregisterOutcome {
    /// This call cancelled the registration and released its slot.
    Cancelled(Registration),
    /// The registration was already cancelled; nothing was released.
    AlreadyCancelled,
}

/// How a compensation step ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Compensation {
    /// Done inline.
    Applied,
    /// Left to the reconciler through the repair log.
    Deferred,
    /// Neither done nor recorded.
    Lost,
}

/// Orchestrates identity resolution, the registration lifecycle and the
/// capacity ledger into race-free register and unregister operations.
#[derive(Clone)]
pub struct ReservationCoordinator {
    events: Arc<dyn EventStore>,
    registrations: Arc<dyn RegistrationStore>,
    repairs: Arc<dyn RepairLog>,
    clock: Arc<dyn Clock>,
    resolver: IdentityResolver,
    ledger: CapacityLedger,
    config: CoordinatorConfig,
}

impl ReservationCoordinator {
    /// Wire a coordinator over its collaborators.
    #[must_use]
    pub fn new(
        events: Arc<dyn EventStore>,
        registrations: Arc<dyn RegistrationStore>,
        repairs: Arc<dyn RepairLog>,
        clock: Arc<dyn Clock>,
        config: CoordinatorConfig,
    ) -> Self {
        let resolver =
            IdentityResolver::new(Arc::clone(&registrations), config.guest_resolution_attempts);
        let ledger = CapacityLedger::new(Arc::clone(&events), Arc::clone(&registrations));
        Self {
            events,
            registrations,
            repairs,
            clock,
            resolver,
            ledger,
            config,
        }
    }

    /// Register the requester for `event_id`.
    ///
    /// The returned registration is normally `Confirmed`. It comes back
    /// `Cancelled` when an `unregister` for the same registrant cancelled it
    /// before this call finished.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::EventNotFound`]
    /// - [`ReservationError::EventNotAccepting`]: closed, or private and the requester is a guest
    /// - [`ReservationError::InvalidIdentity`]
    /// - [`ReservationError::AlreadyRegistered`]
    /// - [`ReservationError::NoAvailableSlots`]
    /// - [`ReservationError::StoreUnavailable`]
    #[tracing::instrument(skip_all, fields(event_id = %event_id, guest = request.is_guest()))]
    pub async fn register(
        &self,
        event_id: EventId,
        request: &RegistrationRequest,
    ) -> Result<Registration> {
        let result = self.try_register(event_id, request).await;
        match &result {
            Ok(registration) if registration.status.is_active() => {
                RegistrationMetrics::record_confirmed();
                tracing::info!(
                    registration_id = %registration.id,
                    identity = %registration.identity.key(),
                    "Registration confirmed"
                );
            }
            Ok(registration) => {
                tracing::info!(
                    registration_id = %registration.id,
                    "Registration cancelled before it completed"
                );
            }
            Err(error) => {
                RegistrationMetrics::record_rejected(error.reason());
                if error.is_user_facing() {
                    tracing::warn!(%error, "Registration refused");
                } else {
                    tracing::error!(%error, "Registration failed");
                }
            }
        }
        result
    }

    async fn try_register(
        &self,
        event_id: EventId,
        request: &RegistrationRequest,
    ) -> Result<Registration> {
        let event = self.load_event(event_id).await?;
        let now = self.clock.now();
        if !event.is_open_at(now) {
            return Err(ReservationError::EventNotAccepting {
                event_id,
                reason: "registration closed".to_string(),
            });
        }
        if request.is_guest() && !event.is_public {
            return Err(ReservationError::EventNotAccepting {
                event_id,
                reason: "event is not open to guests".to_string(),
            });
        }

        let identity = self.resolver.resolve(request).await?;
        let key = identity.key();

        // Fast path only; the conditional insert below is what closes the race.
        if self
            .registrations
            .find_active(event_id, key.clone())
            .await?
            .is_some()
        {
            return Err(ReservationError::AlreadyRegistered {
                event_id,
                identity: key,
            });
        }

        let registration = Registration::confirmed(event_id, identity, now);
        let coordinator = self.clone();
        let commit = async move { coordinator.commit(registration).await };
        tokio::spawn(commit.instrument(tracing::Span::current()))
            .await
            .map_err(|error| {
                ReservationError::StoreUnavailable(format!("registration task failed: {error}"))
            })?
    }

    /// Insert, reserve and compensate, bracketed by an `UnsettledRegistration`
    /// repair that is resolved only once the slot is settled.
    async fn commit(&self, registration: Registration) -> Result<Registration> {
        let unsettled = self
            .repairs
            .record(Repair::UnsettledRegistration {
                registration_id: registration.id,
                event_id: registration.event_id,
            })
            .await?;

        let (result, settled) = self.insert_and_reserve(registration).await;
        if settled {
            self.resolve_unsettled(unsettled).await;
        }
        result
    }

    /// Returns the outcome and whether the counter is known to be settled.
    async fn insert_and_reserve(&self, registration: Registration) -> (Result<Registration>, bool) {
        let event_id = registration.event_id;
        let key = registration.identity.key();

        match self.registrations.insert_if_absent(registration.clone()).await {
            Ok(InsertOutcome::Inserted) => {}
            Ok(InsertOutcome::DuplicateKey) => {
                return (
                    Err(ReservationError::AlreadyRegistered {
                        event_id,
                        identity: key,
                    }),
                    true,
                );
            }
            // The insert may have landed; the reconciler checks after the grace period.
            Err(error) => return (Err(error.into()), false),
        }

        match self.ledger.reserve(event_id).await {
            Ok(ReserveOutcome::Reserved) => self.confirm_still_active(registration).await,
            Ok(ReserveOutcome::CapacityExhausted) => {
                let settled = self.revoke(&registration).await != Compensation::Lost;
                (Err(ReservationError::NoAvailableSlots(event_id)), settled)
            }
            Err(error) => {
                // The decrement may or may not have applied.
                tracing::error!(%error, "Reserve failed after insert; revoking");
                let settled = match self.revoke(&registration).await {
                    Compensation::Applied => {
                        self.record_repair(Repair::ReconcileEvent { event_id }).await
                    }
                    Compensation::Deferred => true,
                    Compensation::Lost => false,
                };
                (Err(error.into()), settled)
            }
        }
    }

    /// An `unregister` may have cancelled the row between insert and reserve.
    /// Its release then found no slot to give back, so the one just taken is
    /// surplus; reconciliation returns it.
    async fn confirm_still_active(
        &self,
        mut registration: Registration,
    ) -> (Result<Registration>, bool) {
        let key = registration.identity.key();
        match self.registrations.find_active(registration.event_id, key).await {
            Ok(Some(active)) if active.id == registration.id => (Ok(registration), true),
            Ok(_) => {
                tracing::warn!(
                    registration_id = %registration.id,
                    "Registration cancelled while its slot was being reserved"
                );
                let settled = self
                    .record_repair(Repair::ReconcileEvent {
                        event_id: registration.event_id,
                    })
                    .await;
                let cancelled = registration
                    .apply(Transition::Unregister, self.clock.now())
                    .map(|_| registration);
                (cancelled, settled)
            }
            Err(error) => {
                tracing::warn!(
                    registration_id = %registration.id,
                    %error,
                    "Could not re-check registration after reserve"
                );
                (Ok(registration), false)
            }
        }
    }

    async fn resolve_unsettled(&self, id: RepairId) {
        if let Err(error) = self.repairs.mark_resolved(id).await {
            // Left pending, it is replayed once the grace period is over.
            tracing::warn!(repair_id = %id, %error, "Could not resolve unsettled registration");
        }
    }

    /// Cancel `identity`'s registration for `event_id` and release its slot.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::EventNotFound`]
    /// - [`ReservationError::NotRegistered`]: the identity never registered
    /// - [`ReservationError::InvalidTransition`]: the active registration cannot be cancelled
    /// - [`ReservationError::StoreUnavailable`]
    #[tracing::instrument(skip_all, fields(event_id = %event_id, identity = %identity.key()))]
    pub async fn unregister(
        &self,
        event_id: EventId,
        identity: &RegistrantIdentity,
    ) -> Result<UnregisterOutcome> {
        let event = self.load_event(event_id).await?;
        let key = identity.key();

        let Some(active) = self.registrations.find_active(event_id, key.clone()).await? else {
            let latest = self.registrations.find_latest(event_id, key.clone()).await?;
            return match latest {
                Some(registration) if registration.status == RegistrationStatus::Cancelled => {
                    RegistrationMetrics::record_idempotent();
                    tracing::info!(registration_id = %registration.id, "Already cancelled");
                    Ok(UnregisterOutcome::AlreadyCancelled)
                }
                _ => Err(ReservationError::NotRegistered {
                    event_id,
                    identity: key,
                }),
            };
        };

        let mut cancelled = active.clone();
        cancelled.apply(Transition::Unregister, self.clock.now())?;

        let won = self
            .registrations
            .update_status(
                active.id,
                active.status,
                cancelled.status,
                cancelled.updated_at,
            )
            .await?;
        if !won {
            RegistrationMetrics::record_idempotent();
            tracing::info!(
                registration_id = %active.id,
                "Cancelled concurrently by another request"
            );
            return Ok(UnregisterOutcome::AlreadyCancelled);
        }

        self.release_slot(&event).await;
        RegistrationMetrics::record_cancelled();
        tracing::info!(registration_id = %cancelled.id, "Registration cancelled");
        Ok(UnregisterOutcome::Cancelled(cancelled))
    }

    /// [`ReservationCoordinator::unregister`] for a raw request. A guest the
    /// directory has never seen is [`ReservationError::NotRegistered`].
    ///
    /// # Errors
    ///
    /// As [`ReservationCoordinator::unregister`], plus
    /// [`ReservationError::InvalidIdentity`] for a malformed request.
    pub async fn unregister_request(
        &self,
        event_id: EventId,
        request: &RegistrationRequest,
    ) -> Result<UnregisterOutcome> {
        match self.resolver.lookup(request).await? {
            Some(identity) => self.unregister(event_id, &identity).await,
            None => {
                self.load_event(event_id).await?;
                Err(ReservationError::NotRegistered {
                    event_id,
                    identity: unknown_guest_key(request),
                })
            }
        }
    }

    /// Active registrations of `event_id`, oldest first.
    ///
    /// # Errors
    ///
    /// [`ReservationError::EventNotFound`] or [`ReservationError::StoreUnavailable`].
    pub async fn list_active_registrations(&self, event_id: EventId) -> Result<Vec<Registration>> {
        self.load_event(event_id).await?;
        Ok(self.registrations.list_active(event_id).await?)
    }

    /// Administrative capacity edit, followed by reconciliation.
    ///
    /// Existing registrations are never cancelled; if the new capacity is
    /// below the active count, the counter is pinned at zero until enough
    /// cancellations come in.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::InvalidCapacity`]: zero capacity
    /// - [`ReservationError::EventNotFound`]
    /// - [`ReservationError::StoreUnavailable`]
    #[tracing::instrument(skip_all, fields(event_id = %event_id, capacity = new_capacity))]
    pub async fn update_capacity(
        &self,
        event_id: EventId,
        new_capacity: u32,
    ) -> Result<ReconcileReport> {
        let capacity = Capacity::new(new_capacity)?;
        self.events
            .update_capacity(event_id, capacity, self.clock.now())
            .await
            .map_err(|error| match error {
                StoreError::NotFound(_) => ReservationError::EventNotFound(event_id),
                other => other.into(),
            })?;
        tracing::info!("Capacity updated");
        self.ledger.reconcile(event_id).await
    }

    /// Recompute the slot counter of `event_id` from its active registrations.
    ///
    /// # Errors
    ///
    /// [`ReservationError::EventNotFound`] or [`ReservationError::StoreUnavailable`].
    pub async fn reconcile(&self, event_id: EventId) -> Result<ReconcileReport> {
        self.ledger.reconcile(event_id).await
    }

    async fn load_event(&self, event_id: EventId) -> Result<Event> {
        self.events
            .get(event_id)
            .await?
            .ok_or(ReservationError::EventNotFound(event_id))
    }

    /// Undo an inserted registration that got no slot.
    async fn revoke(&self, registration: &Registration) -> Compensation {
        let Ok(revoked) = registration.plan(Transition::Revoke) else {
            return Compensation::Applied;
        };
        let result = retry_with_predicate(
            &self.config.compensation_retry,
            || {
                self.registrations.update_status(
                    registration.id,
                    registration.status,
                    revoked,
                    self.clock.now(),
                )
            },
            StoreError::is_transient,
        )
        .await;

        match result {
            Ok(_) => {
                tracing::debug!(registration_id = %registration.id, "Registration revoked");
                Compensation::Applied
            }
            Err(error) => {
                tracing::error!(
                    registration_id = %registration.id,
                    %error,
                    "Could not revoke registration; deferring to reconciliation"
                );
                let recorded = self
                    .record_repair(Repair::RollbackRegistration {
                        registration_id: registration.id,
                        event_id: registration.event_id,
                    })
                    .await;
                if recorded {
                    Compensation::Deferred
                } else {
                    Compensation::Lost
                }
            }
        }
    }

    async fn release_slot(&self, event: &Event) {
        // An event overbooked by a capacity cut keeps its counter at zero
        // until enough cancellations bring it back under capacity.
        match self.registrations.count_active(event.id).await {
            Ok(active) if active >= u64::from(event.capacity.get()) => {
                tracing::warn!(
                    event_id = %event.id,
                    active,
                    capacity = %event.capacity,
                    "Event still at capacity after cancellation; slot stays closed"
                );
                self.record_repair(Repair::ReconcileEvent { event_id: event.id })
                    .await;
                return;
            }
            Ok(_) => {}
            Err(error) => {
                tracing::error!(
                    event_id = %event.id,
                    %error,
                    "Could not count active registrations; deferring release to reconciliation"
                );
                self.record_repair(Repair::ReconcileEvent { event_id: event.id })
                    .await;
                return;
            }
        }

        let result = retry_with_predicate(
            &self.config.compensation_retry,
            || self.ledger.release(event.id, event.capacity),
            StoreError::is_transient,
        )
        .await;

        match result {
            Ok(ReleaseOutcome::Released) => {}
            Ok(ReleaseOutcome::Clamped) => {
                // Nothing to give back although this call cancelled an active
                // registration: the counter has drifted.
                self.record_repair(Repair::ReconcileEvent { event_id: event.id })
                    .await;
            }
            Err(error) => {
                tracing::error!(
                    event_id = %event.id,
                    %error,
                    "Could not release slot; deferring to reconciliation"
                );
                self.record_repair(Repair::ReconcileEvent { event_id: event.id })
                    .await;
            }
        }
    }

    /// Returns whether the repair made it into the log.
    async fn record_repair(&self, repair: Repair) -> bool {
        match self.repairs.record(repair.clone()).await {
            Ok(id) => {
                RepairMetrics::record_recorded();
                tracing::warn!(repair_id = %id, kind = repair.kind(), "Repair recorded");
                true
            }
            Err(error) => {
                // Only a full reconciliation sweep can heal this now.
                tracing::error!(
                    kind = repair.kind(),
                    event_id = %repair.event_id(),
                    %error,
                    "Could not record repair"
                );
                false
            }
        }
    }
}

fn unknown_guest_key(request: &RegistrationRequest) -> IdentityKey {
    let email = request
        .guest
        .as_ref()
        .and_then(|contact| NormalizedEmail::parse(&contact.email).ok())
        .map_or_else(String::new, |email| email.as_str().to_string());
    IdentityKey::from_raw(format!("guest:{email}"))
}
