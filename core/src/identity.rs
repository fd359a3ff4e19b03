//! Registrant identity: who holds a reservation.
//!
//! A registrant is either an authenticated member (keyed by account id) or a
//! guest (keyed by the stored guest record that owns their email and phone).
//! Everything downstream of identity resolution treats both the same way,
//! through [`RegistrantIdentity::key`].
//!
//! This module holds only the pure parts: request shapes, contact
//! normalisation and the identity sum type. The lookup-or-create against the
//! guest directory lives in the runtime's resolver.

use crate::error::ReservationError;
use crate::types::{AccountId, GuestId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum number of digits a phone number must keep after normalisation.
pub const MIN_PHONE_DIGITS: usize = 10;

/// Upper bound on email length, matching common RFC 5321 limits.
const MAX_EMAIL_LEN: usize = 254;

// ============================================================================
// Inbound request
// ============================================================================

/// Contact details a guest submits with a registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestContact {
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Raw email as typed
    pub email: String,
    /// Raw phone as typed
    pub phone: String,
}

/// What a controller hands to the coordinator.
///
/// An authenticated account id wins over guest contact details.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    /// Set when the caller is an authenticated member
    pub account_id: Option<AccountId>,
    /// Set when the caller registers as a guest
    pub guest: Option<GuestContact>,
}

impl RegistrationRequest {
    /// Request on behalf of an authenticated member.
    #[must_use]
    pub const fn member(account_id: AccountId) -> Self {
        Self {
            account_id: Some(account_id),
            guest: None,
        }
    }

    /// Request on behalf of an anonymous guest.
    #[must_use]
    pub const fn guest(contact: GuestContact) -> Self {
        Self {
            account_id: None,
            guest: Some(contact),
        }
    }

    /// True when the request will resolve to a guest identity.
    #[must_use]
    pub const fn is_guest(&self) -> bool {
        self.account_id.is_none()
    }
}

// ============================================================================
// Normalised contact values
// ============================================================================

/// Trimmed, lower-cased, shape-checked email address.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedEmail(String);

impl NormalizedEmail {
    /// Normalise and validate an email address.
    ///
    /// Accepts the `local@domain` shape: exactly one `@`, a non-empty local
    /// part, a domain with at least one dot and no empty labels, no whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::InvalidIdentity`] when the shape is wrong.
    pub fn parse(raw: &str) -> Result<Self, ReservationError> {
        let email = raw.trim().to_lowercase();

        if email.is_empty() || email.len() > MAX_EMAIL_LEN {
            return Err(invalid("email must be between 1 and 254 characters"));
        }
        if email.chars().any(char::is_whitespace) {
            return Err(invalid("email must not contain whitespace"));
        }

        let Some((local, domain)) = email.split_once('@') else {
            return Err(invalid("email must contain '@'"));
        };
        if local.is_empty() || domain.contains('@') {
            return Err(invalid("email must have exactly one '@' and a local part"));
        }
        if !domain.contains('.') || domain.split('.').any(str::is_empty) {
            return Err(invalid("email domain must contain a dot between labels"));
        }

        Ok(Self(email))
    }

    /// Wrap a value that was normalised before it was stored.
    #[must_use]
    pub const fn from_stored(email: String) -> Self {
        Self(email)
    }

    /// The normalised address.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedEmail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Phone number reduced to its digits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedPhone(String);

impl NormalizedPhone {
    /// Normalise and validate a phone number.
    ///
    /// Strips one optional leading `+` and the separators space, `-`, `.`,
    /// `(` and `)`. What remains must be ASCII digits, at least
    /// [`MIN_PHONE_DIGITS`] of them.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::InvalidIdentity`] for other characters or too few digits.
    pub fn parse(raw: &str) -> Result<Self, ReservationError> {
        let trimmed = raw.trim();
        let body = trimmed.strip_prefix('+').unwrap_or(trimmed);

        let mut digits = String::with_capacity(body.len());
        for c in body.chars() {
            match c {
                '0'..='9' => digits.push(c),
                ' ' | '-' | '.' | '(' | ')' => {}
                other => {
                    return Err(invalid(&format!(
                        "phone contains unexpected character '{other}'"
                    )));
                }
            }
        }

        if digits.len() < MIN_PHONE_DIGITS {
            return Err(invalid(&format!(
                "phone must contain at least {MIN_PHONE_DIGITS} digits"
            )));
        }

        Ok(Self(digits))
    }

    /// Wrap a value that was normalised before it was stored.
    #[must_use]
    pub const fn from_stored(phone: String) -> Self {
        Self(phone)
    }

    /// The digit string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedPhone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn invalid(reason: &str) -> ReservationError {
    ReservationError::InvalidIdentity(reason.to_string())
}

/// A guest contact that passed validation, ready for the guest directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedGuest {
    /// Given name, trimmed
    pub first_name: String,
    /// Family name, trimmed
    pub last_name: String,
    /// Normalised email
    pub email: NormalizedEmail,
    /// Normalised phone
    pub phone: NormalizedPhone,
}

impl ValidatedGuest {
    /// Validate a raw guest contact.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::InvalidIdentity`] if a name is blank or the
    /// email or phone is malformed.
    pub fn validate(contact: &GuestContact) -> Result<Self, ReservationError> {
        let first_name = contact.first_name.trim();
        let last_name = contact.last_name.trim();
        if first_name.is_empty() {
            return Err(invalid("guest first name is required"));
        }
        if last_name.is_empty() {
            return Err(invalid("guest last name is required"));
        }

        Ok(Self {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: NormalizedEmail::parse(&contact.email)?,
            phone: NormalizedPhone::parse(&contact.phone)?,
        })
    }
}

// ============================================================================
// Canonical identity
// ============================================================================

/// A guest as recorded in the guest directory. The first writer's contact
/// details are authoritative.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuestIdentity {
    /// Stored guest record
    pub guest_id: GuestId,
    /// Email stored with the record
    pub email: NormalizedEmail,
    /// Phone stored with the record
    pub phone: NormalizedPhone,
}

/// Canonical registrant used to enforce one active registration per event.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrantIdentity {
    /// Authenticated account holder
    Member {
        /// The member's account
        account_id: AccountId,
    },
    /// Deduplicated anonymous guest
    Guest(GuestIdentity),
}

impl RegistrantIdentity {
    /// The uniqueness key stores index registrations by.
    #[must_use]
    pub fn key(&self) -> IdentityKey {
        match self {
            Self::Member { account_id } => IdentityKey(format!("member:{account_id}")),
            Self::Guest(guest) => IdentityKey(format!("guest:{}", guest.guest_id)),
        }
    }

    /// Account id, for member identities.
    #[must_use]
    pub const fn account_id(&self) -> Option<AccountId> {
        match self {
            Self::Member { account_id } => Some(*account_id),
            Self::Guest(_) => None,
        }
    }

    /// Guest record id, for guest identities.
    #[must_use]
    pub const fn guest_id(&self) -> Option<GuestId> {
        match self {
            Self::Member { .. } => None,
            Self::Guest(guest) => Some(guest.guest_id),
        }
    }
}

/// Stable string key for a [`RegistrantIdentity`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Rebuild a key read back from storage.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
