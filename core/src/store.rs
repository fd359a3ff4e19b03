//! Collaborator traits: the Event Store, the Registration Store (with its guest
//! directory) and the Repair Log.
//!
//! # Design
//!
//! Correctness of the engine rests entirely on the atomic conditional
//! operations these traits promise. Nothing in the engine locks in-process;
//! callers may be spread over many service instances. Implementations must
//! therefore make each of the following a single indivisible step:
//!
//! - [`EventStore::conditional_decrement_slots`]: `slots -= 1` only if `slots > 0`
//! - [`EventStore::conditional_increment_slots`]: `slots += 1` only if the result stays within capacity
//! - [`RegistrationStore::insert_if_absent`]: insert only if no active record exists for `(event, identity)`
//! - [`RegistrationStore::update_status`]: change status only if it still equals the expected one
//! - [`RegistrationStore::insert_guest_if_absent`]: insert only if neither email nor phone is taken
//!
//! # Implementations
//!
//! - `PostgresEventStore`, `PostgresRegistrationStore`, `PostgresRepairLog` (in `seatkeeper-postgres`)
//! - `InMemoryEventStore`, `InMemoryRegistrationStore`, `InMemoryRepairLog` (in `seatkeeper-testing`)
//!
//! # Dyn Compatibility
//!
//! These traits return `Pin<Box<dyn Future>>` instead of using `async fn` so
//! they can be injected as `Arc<dyn EventStore>` and friends.

use crate::error::StoreError;
use crate::identity::{
    GuestIdentity, IdentityKey, NormalizedEmail, NormalizedPhone, ValidatedGuest,
};
use crate::lifecycle::RegistrationStatus;
use crate::types::{Capacity, Event, EventId, Registration, RegistrationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by every store call.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Result of a conditional insert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The row was written.
    Inserted,
    /// A conflicting row already exists; nothing was written.
    DuplicateKey,
}

/// Durable event metadata and the available-slot counter.
pub trait EventStore: Send + Sync {
    /// Load an event. `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: backend failure
    /// - `Corrupted`: stored row is not a valid event
    fn get(&self, event_id: EventId) -> StoreFuture<'_, Option<Event>>;

    /// Atomically decrement `available_slots` if it is greater than zero.
    ///
    /// Returns `true` if a slot was taken, `false` if none was left (or the
    /// event does not exist).
    ///
    /// # Errors
    ///
    /// `Unavailable` on backend failure.
    fn conditional_decrement_slots(&self, event_id: EventId) -> StoreFuture<'_, bool>;

    /// Atomically increment `available_slots` if the result would not exceed
    /// `min(capacity, capacity_ceiling)`.
    ///
    /// Returns `true` if a slot was given back, `false` if the counter was
    /// already at the ceiling.
    ///
    /// # Errors
    ///
    /// `Unavailable` on backend failure.
    fn conditional_increment_slots(
        &self,
        event_id: EventId,
        capacity_ceiling: u32,
    ) -> StoreFuture<'_, bool>;

    /// Overwrite the counter. Reserved for reconciliation.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no such event
    /// - `Unavailable`: backend failure
    fn set_slots(&self, event_id: EventId, value: u32) -> StoreFuture<'_, ()>;

    /// Administrative capacity edit. Leaves the counter alone; callers
    /// reconcile afterwards.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no such event
    /// - `Unavailable`: backend failure
    fn update_capacity(
        &self,
        event_id: EventId,
        capacity: Capacity,
        updated_at: DateTime<Utc>,
    ) -> StoreFuture<'_, ()>;

    /// Every known event id, for full reconciliation sweeps.
    ///
    /// # Errors
    ///
    /// `Unavailable` on backend failure.
    fn list_event_ids(&self) -> StoreFuture<'_, Vec<EventId>>;
}

/// Durable registrations plus the guest directory.
pub trait RegistrationStore: Send + Sync {
    /// Insert `registration` unless an active record already exists for
    /// `(registration.event_id, registration.identity.key())`.
    ///
    /// # Errors
    ///
    /// `Unavailable` on backend failure.
    fn insert_if_absent(&self, registration: Registration) -> StoreFuture<'_, InsertOutcome>;

    /// The active (Pending or Confirmed) registration of `identity` for `event_id`, if any.
    ///
    /// # Errors
    ///
    /// `Unavailable` or `Corrupted`.
    fn find_active(
        &self,
        event_id: EventId,
        identity: IdentityKey,
    ) -> StoreFuture<'_, Option<Registration>>;

    /// The most recent registration of `identity` for `event_id`, whatever its status.
    ///
    /// # Errors
    ///
    /// `Unavailable` or `Corrupted`.
    fn find_latest(
        &self,
        event_id: EventId,
        identity: IdentityKey,
    ) -> StoreFuture<'_, Option<Registration>>;

    /// Compare-and-set the status of a registration.
    ///
    /// Returns `true` if the status was `expected` and is now `new`, `false`
    /// if the record was not in `expected` (someone else moved it first).
    ///
    /// # Errors
    ///
    /// - `NotFound`: no such registration
    /// - `Unavailable`: backend failure
    fn update_status(
        &self,
        registration_id: RegistrationId,
        expected: RegistrationStatus,
        new: RegistrationStatus,
        updated_at: DateTime<Utc>,
    ) -> StoreFuture<'_, bool>;

    /// Active registrations of an event, oldest first.
    ///
    /// # Errors
    ///
    /// `Unavailable` or `Corrupted`.
    fn list_active(&self, event_id: EventId) -> StoreFuture<'_, Vec<Registration>>;

    /// Number of active registrations of an event.
    ///
    /// # Errors
    ///
    /// `Unavailable` on backend failure.
    fn count_active(&self, event_id: EventId) -> StoreFuture<'_, u64>;

    /// A guest whose stored email equals `email` or whose stored phone equals `phone`.
    ///
    /// # Errors
    ///
    /// `Unavailable` or `Corrupted`.
    fn lookup_guest_by_email_or_phone(
        &self,
        email: NormalizedEmail,
        phone: NormalizedPhone,
    ) -> StoreFuture<'_, Option<GuestIdentity>>;

    /// Create a guest record unless its email or phone is already taken.
    ///
    /// # Errors
    ///
    /// `Unavailable` on backend failure.
    fn insert_guest_if_absent(
        &self,
        guest: GuestIdentity,
        contact: ValidatedGuest,
    ) -> StoreFuture<'_, InsertOutcome>;
}

// ============================================================================
// Repair log
// ============================================================================

/// Identifier of a repair log entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepairId(i64);

impl RepairId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RepairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A compensation that could not be completed inline and is left to the
/// background reconciliation pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Repair {
    /// `register` inserted this record but found no slot, and could not revoke it.
    RollbackRegistration {
        /// Record to revoke
        registration_id: RegistrationId,
        /// Its event, reconciled afterwards
        event_id: EventId,
    },
    /// The slot counter of this event may be stale (failed release, partial failure).
    ReconcileEvent {
        /// Event to reconcile
        event_id: EventId,
    },
    /// Recorded before `register` inserts this record and resolved once its
    /// slot is settled. Still pending means the register never finished.
    UnsettledRegistration {
        /// Record that may hold no slot
        registration_id: RegistrationId,
        /// Its event
        event_id: EventId,
    },
}

impl Repair {
    /// The event this repair ends up reconciling.
    #[must_use]
    pub const fn event_id(&self) -> EventId {
        match self {
            Self::RollbackRegistration { event_id, .. }
            | Self::ReconcileEvent { event_id }
            | Self::UnsettledRegistration { event_id, .. } => *event_id,
        }
    }

    /// Storage tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RollbackRegistration { .. } => "rollback_registration",
            Self::ReconcileEvent { .. } => "reconcile_event",
            Self::UnsettledRegistration { .. } => "unsettled_registration",
        }
    }
}

/// A pending entry of the repair log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepairEntry {
    /// Log id
    pub id: RepairId,
    /// What to repair
    pub repair: Repair,
    /// Failed processing attempts so far
    pub attempts: u32,
    /// Error of the last failed attempt
    pub last_error: Option<String>,
    /// When the repair was recorded
    pub recorded_at: DateTime<Utc>,
}

/// Durable list of deferred compensations.
pub trait RepairLog: Send + Sync {
    /// Append a repair.
    ///
    /// # Errors
    ///
    /// `Unavailable` on backend failure.
    fn record(&self, repair: Repair) -> StoreFuture<'_, RepairId>;

    /// Up to `limit` unresolved repairs, oldest first.
    ///
    /// # Errors
    ///
    /// `Unavailable` or `Corrupted`.
    fn pending(&self, limit: usize) -> StoreFuture<'_, Vec<RepairEntry>>;

    /// The repair succeeded and leaves the pending list.
    ///
    /// # Errors
    ///
    /// `Unavailable` on backend failure.
    fn mark_resolved(&self, id: RepairId) -> StoreFuture<'_, ()>;

    /// The repair failed again; it stays pending with its attempt count bumped.
    ///
    /// # Errors
    ///
    /// `Unavailable` on backend failure.
    fn mark_failed(&self, id: RepairId, error: String) -> StoreFuture<'_, ()>;

    /// Number of unresolved repairs.
    ///
    /// # Errors
    ///
    /// `Unavailable` on backend failure.
    fn count_pending(&self) -> StoreFuture<'_, u64>;
}
