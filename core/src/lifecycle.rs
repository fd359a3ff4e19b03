//! Registration state machine.
//!
//! ```text
//!   (none | Cancelled) ── Register ──▶ Confirmed ── Unregister ──▶ Cancelled
//!                                          │
//!                                          └────── Revoke ───────▶ Cancelled
//!
//!   Pending ── Confirm ──▶ Confirmed      (modelled, not entered today)
//! ```
//!
//! The machine is pure: it decides the next status or refuses with
//! [`ReservationError::InvalidTransition`], and never touches storage. A
//! Cancelled record is terminal; registering again creates a new record.

use crate::error::ReservationError;
use crate::identity::RegistrantIdentity;
use crate::types::{EventId, Registration, RegistrationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of a single registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationStatus {
    /// Awaiting a further step before it holds a slot. Unused by current flows.
    Pending,
    /// Holds one slot of the event.
    Confirmed,
    /// Gave its slot back. Terminal.
    Cancelled,
}

impl RegistrationStatus {
    /// Whether a record in this state blocks a new registration of the same identity.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested lifecycle changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    /// Take a slot for an identity that holds none.
    Register,
    /// Promote a pending registration.
    Confirm,
    /// Registrant gives the slot back.
    Unregister,
    /// Compensation: the registration was inserted but no slot could be reserved.
    Revoke,
}

/// Decide the status that `transition` leads to from `from` (`None` = no record yet).
///
/// # Errors
///
/// Returns [`ReservationError::InvalidTransition`] when the move is illegal,
/// for example cancelling an already cancelled registration or registering
/// over a confirmed one.
pub fn next_status(
    registration_id: Option<RegistrationId>,
    from: Option<RegistrationStatus>,
    transition: Transition,
) -> Result<RegistrationStatus, ReservationError> {
    use RegistrationStatus::{Cancelled, Confirmed, Pending};

    let next = match (from, transition) {
        (None | Some(Cancelled), Transition::Register) => Some(Confirmed),
        (Some(Pending), Transition::Confirm) => Some(Confirmed),
        (Some(Confirmed), Transition::Unregister | Transition::Revoke) => Some(Cancelled),
        _ => None,
    };

    next.ok_or(ReservationError::InvalidTransition {
        registration_id,
        from,
        transition,
    })
}

impl Registration {
    /// A brand-new confirmed record for `identity`, as produced by the `Register` transition.
    #[must_use]
    pub fn confirmed(
        event_id: EventId,
        identity: RegistrantIdentity,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RegistrationId::new(),
            event_id,
            identity,
            status: RegistrationStatus::Confirmed,
            registered_at: now,
            updated_at: now,
        }
    }

    /// Work out the status this record would move to, without changing it.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::InvalidTransition`] if the move is illegal.
    pub fn plan(&self, transition: Transition) -> Result<RegistrationStatus, ReservationError> {
        next_status(Some(self.id), Some(self.status), transition)
    }

    /// Apply a transition in memory. On error the record is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::InvalidTransition`] if the move is illegal.
    pub fn apply(
        &mut self,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<RegistrationStatus, ReservationError> {
        let next = self.plan(transition)?;
        self.status = next;
        self.updated_at = now;
        Ok(next)
    }
}
