//! Identity resolution: turn a registration request into the canonical
//! registrant the uniqueness invariant is keyed on.
//!
//! Members resolve to their account. Guests resolve through the guest
//! directory: an existing record matching the normalised email *or* phone is
//! reused as-is (first writer wins), otherwise a new one is created with a
//! conditional insert. A duplicate-key answer means a concurrent submission
//! created the record first, so the resolver re-fetches it instead of failing.

use seatkeeper_core::error::{ReservationError, Result};
use seatkeeper_core::identity::{
    GuestIdentity, RegistrantIdentity, RegistrationRequest, ValidatedGuest,
};
use seatkeeper_core::store::{InsertOutcome, RegistrationStore};
use seatkeeper_core::types::GuestId;
use std::sync::Arc;

/// Maps inbound requests to [`RegistrantIdentity`] values.
#[derive(Clone)]
pub struct IdentityResolver {
    registrations: Arc<dyn RegistrationStore>,
    max_attempts: u32,
}

impl IdentityResolver {
    /// Create a resolver. `max_attempts` bounds the lookup/insert/re-fetch
    /// cycle for guests (at least one attempt is always made).
    #[must_use]
    pub fn new(registrations: Arc<dyn RegistrationStore>, max_attempts: u32) -> Self {
        Self {
            registrations,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Resolve `request`, creating a guest record if none matches.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::InvalidIdentity`]: no account id and no (valid) guest contact
    /// - [`ReservationError::StoreUnavailable`]: the guest directory failed, or a
    ///   conflicting guest row kept vanishing between insert and re-fetch
    pub async fn resolve(&self, request: &RegistrationRequest) -> Result<RegistrantIdentity> {
        if let Some(account_id) = request.account_id {
            return Ok(RegistrantIdentity::Member { account_id });
        }
        let guest = Self::validated_guest(request)?;

        for attempt in 1..=self.max_attempts {
            if let Some(existing) = self.lookup_guest(&guest).await? {
                return Ok(RegistrantIdentity::Guest(existing));
            }

            let candidate = GuestIdentity {
                guest_id: GuestId::new(),
                email: guest.email.clone(),
                phone: guest.phone.clone(),
            };
            match self
                .registrations
                .insert_guest_if_absent(candidate.clone(), guest.clone())
                .await?
            {
                InsertOutcome::Inserted => {
                    tracing::debug!(guest_id = %candidate.guest_id, "Created guest record");
                    return Ok(RegistrantIdentity::Guest(candidate));
                }
                InsertOutcome::DuplicateKey => {
                    if let Some(existing) = self.lookup_guest(&guest).await? {
                        tracing::debug!(
                            guest_id = %existing.guest_id,
                            "Guest created concurrently, reusing it"
                        );
                        return Ok(RegistrantIdentity::Guest(existing));
                    }
                    tracing::warn!(attempt, "Conflicting guest record vanished, retrying");
                }
            }
        }

        Err(ReservationError::StoreUnavailable(format!(
            "guest record could not be resolved after {} attempts",
            self.max_attempts
        )))
    }

    /// Resolve `request` without creating anything. `Ok(None)` for a guest
    /// the directory has never seen.
    ///
    /// # Errors
    ///
    /// Same as [`IdentityResolver::resolve`], minus the vanished-row case.
    pub async fn lookup(&self, request: &RegistrationRequest) -> Result<Option<RegistrantIdentity>> {
        if let Some(account_id) = request.account_id {
            return Ok(Some(RegistrantIdentity::Member { account_id }));
        }
        let guest = Self::validated_guest(request)?;
        Ok(self
            .lookup_guest(&guest)
            .await?
            .map(RegistrantIdentity::Guest))
    }

    fn validated_guest(request: &RegistrationRequest) -> Result<ValidatedGuest> {
        let contact = request.guest.as_ref().ok_or_else(|| {
            ReservationError::InvalidIdentity(
                "an account id or guest contact details are required".to_string(),
            )
        })?;
        ValidatedGuest::validate(contact)
    }

    async fn lookup_guest(&self, guest: &ValidatedGuest) -> Result<Option<GuestIdentity>> {
        Ok(self
            .registrations
            .lookup_guest_by_email_or_phone(guest.email.clone(), guest.phone.clone())
            .await?)
    }
}
