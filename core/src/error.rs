//! Error taxonomy for the reservation engine.
//!
//! Two layers:
//!
//! - [`StoreError`]: what a collaborator store reports (transient outage, corrupt row).
//! - [`ReservationError`]: what callers of the coordinator see.
//!
//! Every variant except [`ReservationError::StoreUnavailable`] is a terminal,
//! user-facing outcome. Retrying it would not change the answer.

use crate::identity::IdentityKey;
use crate::lifecycle::{RegistrationStatus, Transition};
use crate::types::{EventId, RegistrationId};
use thiserror::Error;

/// Result alias for coordinator-level operations.
pub type Result<T> = std::result::Result<T, ReservationError>;

/// Errors reported by the Event Store, Registration Store and Repair Log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached or the query failed transiently.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded into a domain value.
    #[error("Corrupted record: {0}")]
    Corrupted(String),

    /// A keyed write targeted a row that does not exist.
    #[error("Record not found: {0}")]
    NotFound(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Outcomes of `register`, `unregister` and the admin operations that are not success.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReservationError {
    /// The event does not exist.
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    /// The event exists but refuses this registration (private to guests, or closed).
    #[error("Event {event_id} is not accepting registrations: {reason}")]
    EventNotAccepting {
        /// The event that refused.
        event_id: EventId,
        /// Why it refused.
        reason: String,
    },

    /// Missing credentials or malformed guest contact details.
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// The identity already holds an active registration for the event.
    #[error("{identity} is already registered for event {event_id}")]
    AlreadyRegistered {
        /// The event.
        event_id: EventId,
        /// Canonical key of the registrant.
        identity: IdentityKey,
    },

    /// The identity never registered for the event.
    #[error("{identity} is not registered for event {event_id}")]
    NotRegistered {
        /// The event.
        event_id: EventId,
        /// Canonical key of the registrant.
        identity: IdentityKey,
    },

    /// Every slot of the event is taken.
    #[error("No available slots for event {0}")]
    NoAvailableSlots(EventId),

    /// The requested lifecycle transition is not legal from the current state.
    #[error("Invalid transition {transition:?} from {from:?} for registration {registration_id:?}")]
    InvalidTransition {
        /// Registration concerned, if one exists yet.
        registration_id: Option<RegistrationId>,
        /// State the registration was in (`None` = no registration).
        from: Option<RegistrationStatus>,
        /// The attempted transition.
        transition: Transition,
    },

    /// An administrative capacity edit carried an unusable value.
    #[error("Invalid capacity: {0}")]
    InvalidCapacity(String),

    /// Transient infrastructure failure.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl ReservationError {
    /// Only infrastructure failures are worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Terminal outcomes that should be shown to the registrant as-is.
    #[must_use]
    pub const fn is_user_facing(&self) -> bool {
        !self.is_retryable()
    }

    /// Short, stable label for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::EventNotFound(_) => "event_not_found",
            Self::EventNotAccepting { .. } => "event_not_accepting",
            Self::InvalidIdentity(_) => "invalid_identity",
            Self::AlreadyRegistered { .. } => "already_registered",
            Self::NotRegistered { .. } => "not_registered",
            Self::NoAvailableSlots(_) => "no_available_slots",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::InvalidCapacity(_) => "invalid_capacity",
            Self::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

impl From<StoreError> for ReservationError {
    fn from(error: StoreError) -> Self {
        Self::StoreUnavailable(error.to_string())
    }
}
