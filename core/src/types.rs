//! Identifiers and value objects shared by every component.

use crate::error::ReservationError;
use crate::identity::RegistrantIdentity;
use crate::lifecycle::RegistrationStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random `EventId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EventId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a registration record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationId(Uuid);

impl RegistrationId {
    /// Creates a new random `RegistrationId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `RegistrationId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RegistrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an authenticated member account
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(Uuid);

impl AccountId {
    /// Creates a new random `AccountId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `AccountId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a stored guest record in the guest directory
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuestId(Uuid);

impl GuestId {
    /// Creates a new random `GuestId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `GuestId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for GuestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GuestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Capacity
// ============================================================================

/// Total number of slots an event offers. Always positive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Capacity(u32);

impl Capacity {
    /// Validate and wrap a capacity.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::InvalidCapacity`] for zero.
    pub fn new(value: u32) -> Result<Self, ReservationError> {
        if value == 0 {
            return Err(ReservationError::InvalidCapacity(
                "capacity must be greater than 0".to_string(),
            ));
        }
        Ok(Self(value))
    }

    /// The raw slot count.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Slots left once `active` registrations are accounted for, clamped to `0..=capacity`.
    #[must_use]
    pub fn remaining_after(self, active: u64) -> u32 {
        let capacity = u64::from(self.0);
        // `capacity - active` is at most `capacity`, which fits in u32.
        u32::try_from(capacity.saturating_sub(active)).unwrap_or(0)
    }
}

impl TryFrom<u32> for Capacity {
    type Error = ReservationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Capacity> for u32 {
    fn from(capacity: Capacity) -> Self {
        capacity.0
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Event
// ============================================================================

/// Event metadata as owned by the Event Store.
///
/// `available_slots` is a cached counter. It is only ever changed through the
/// ledger (`reserve`, `release`, reconciliation) and always satisfies
/// `0 <= available_slots <= capacity`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier
    pub id: EventId,
    /// Display title
    pub title: String,
    /// Total slots
    pub capacity: Capacity,
    /// Slots not yet held by an active registration
    pub available_slots: u32,
    /// Guests may register only for public events
    pub is_public: bool,
    /// Registration closes once the event starts
    pub starts_at: DateTime<Utc>,
    /// Last metadata change
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// A fresh event with every slot available.
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        capacity: Capacity,
        is_public: bool,
        starts_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            title: title.into(),
            capacity,
            available_slots: capacity.get(),
            is_public,
            starts_at,
            updated_at: now,
        }
    }

    /// Whether registrations are still taken at `now`.
    #[must_use]
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        now < self.starts_at
    }
}

// ============================================================================
// Registration
// ============================================================================

/// One registrant's reservation of one slot of one event.
///
/// Records are never deleted; cancellation is a status change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Registration identifier
    pub id: RegistrationId,
    /// Event the slot belongs to
    pub event_id: EventId,
    /// Who holds the slot
    pub identity: RegistrantIdentity,
    /// Lifecycle state
    pub status: RegistrationStatus,
    /// When the record was created
    pub registered_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl Registration {
    /// Whether this record currently holds (or is about to hold) a slot.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.status.is_active()
    }
}
