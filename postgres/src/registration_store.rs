//! Registrations table and the guest directory.

use crate::error::{corrupted, is_unique_violation, store_error};
use chrono::{DateTime, Utc};
use seatkeeper_core::error::StoreError;
use seatkeeper_core::identity::{
    GuestIdentity, IdentityKey, NormalizedEmail, NormalizedPhone, RegistrantIdentity,
    ValidatedGuest,
};
use seatkeeper_core::lifecycle::RegistrationStatus;
use seatkeeper_core::store::{InsertOutcome, RegistrationStore, StoreFuture};
use seatkeeper_core::types::{AccountId, EventId, GuestId, Registration, RegistrationId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const SELECT_REGISTRATION: &str = r"
    SELECT r.id, r.event_id, r.identity_key, r.account_id, r.guest_id, r.status,
           r.registered_at, r.updated_at,
           g.email AS guest_email, g.phone AS guest_phone
    FROM registrations r
    LEFT JOIN guests g ON g.guest_id = r.guest_id
";

/// `PostgreSQL`-backed [`RegistrationStore`].
///
/// Registrations carry their identity twice: as the typed `account_id` or
/// `guest_id` column, and as the `identity_key` text the partial unique
/// index is built on.
#[derive(Clone)]
pub struct PostgresRegistrationStore {
    pool: PgPool,
}

impl PostgresRegistrationStore {
    /// Create a store over the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        operation: &'static str,
        filter: &str,
        event_id: EventId,
        identity: &IdentityKey,
    ) -> Result<Option<Registration>, StoreError> {
        let sql = format!("{SELECT_REGISTRATION} {filter}");
        let row = sqlx::query(&sql)
            .bind(event_id.as_uuid())
            .bind(identity.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error(operation, e))?;

        row.as_ref().map(Self::row_to_registration).transpose()
    }

    fn row_to_registration(row: &PgRow) -> Result<Registration, StoreError> {
        let decode = |e| store_error("decode_registration", e);

        let id: Uuid = row.try_get("id").map_err(decode)?;
        let status: String = row.try_get("status").map_err(decode)?;
        let status = RegistrationStatus::parse(&status)
            .ok_or_else(|| corrupted(format!("registration {id} has unknown status '{status}'")))?;

        let account_id: Option<Uuid> = row.try_get("account_id").map_err(decode)?;
        let guest_id: Option<Uuid> = row.try_get("guest_id").map_err(decode)?;
        let identity = match (account_id, guest_id) {
            (Some(account_id), None) => RegistrantIdentity::Member {
                account_id: AccountId::from_uuid(account_id),
            },
            (None, Some(guest_id)) => {
                let email: Option<String> = row.try_get("guest_email").map_err(decode)?;
                let phone: Option<String> = row.try_get("guest_phone").map_err(decode)?;
                let (Some(email), Some(phone)) = (email, phone) else {
                    return Err(corrupted(format!(
                        "registration {id} references missing guest {guest_id}"
                    )));
                };
                RegistrantIdentity::Guest(GuestIdentity {
                    guest_id: GuestId::from_uuid(guest_id),
                    email: NormalizedEmail::from_stored(email),
                    phone: NormalizedPhone::from_stored(phone),
                })
            }
            _ => {
                return Err(corrupted(format!(
                    "registration {id} must reference exactly one of account or guest"
                )));
            }
        };

        let stored_key: String = row.try_get("identity_key").map_err(decode)?;
        if stored_key != identity.key().as_str() {
            return Err(corrupted(format!(
                "registration {id} identity key '{stored_key}' does not match its identity"
            )));
        }

        Ok(Registration {
            id: RegistrationId::from_uuid(id),
            event_id: EventId::from_uuid(row.try_get("event_id").map_err(decode)?),
            identity,
            status,
            registered_at: row.try_get("registered_at").map_err(decode)?,
            updated_at: row.try_get("updated_at").map_err(decode)?,
        })
    }
}

impl RegistrationStore for PostgresRegistrationStore {
    fn insert_if_absent(&self, registration: Registration) -> StoreFuture<'_, InsertOutcome> {
        Box::pin(async move {
            let key = registration.identity.key();
            let result = sqlx::query(
                r"
                INSERT INTO registrations
                    (id, event_id, identity_key, account_id, guest_id, status, registered_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (event_id, identity_key) WHERE status <> 'cancelled' DO NOTHING
                ",
            )
            .bind(registration.id.as_uuid())
            .bind(registration.event_id.as_uuid())
            .bind(key.as_str())
            .bind(registration.identity.account_id().map(|id| *id.as_uuid()))
            .bind(registration.identity.guest_id().map(|id| *id.as_uuid()))
            .bind(registration.status.as_str())
            .bind(registration.registered_at)
            .bind(registration.updated_at)
            .execute(&self.pool)
            .await;

            match result {
                Ok(done) if done.rows_affected() == 1 => Ok(InsertOutcome::Inserted),
                Ok(_) => Ok(InsertOutcome::DuplicateKey),
                // A retried request reusing the registration id.
                Err(e) if is_unique_violation(&e) => Ok(InsertOutcome::DuplicateKey),
                Err(e) => Err(store_error("insert_registration", e)),
            }
        })
    }

    fn find_active(
        &self,
        event_id: EventId,
        identity: IdentityKey,
    ) -> StoreFuture<'_, Option<Registration>> {
        Box::pin(async move {
            self.fetch_one_where(
                "find_active",
                "WHERE r.event_id = $1 AND r.identity_key = $2 AND r.status <> 'cancelled' LIMIT 1",
                event_id,
                &identity,
            )
            .await
        })
    }

    fn find_latest(
        &self,
        event_id: EventId,
        identity: IdentityKey,
    ) -> StoreFuture<'_, Option<Registration>> {
        Box::pin(async move {
            self.fetch_one_where(
                "find_latest",
                "WHERE r.event_id = $1 AND r.identity_key = $2 ORDER BY r.seq DESC LIMIT 1",
                event_id,
                &identity,
            )
            .await
        })
    }

    fn update_status(
        &self,
        registration_id: RegistrationId,
        expected: RegistrationStatus,
        new: RegistrationStatus,
        updated_at: DateTime<Utc>,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let row: Option<(bool,)> = sqlx::query_as(
                r"
                WITH target AS (
                    SELECT id FROM registrations WHERE id = $1
                ), updated AS (
                    UPDATE registrations
                    SET status = $3, updated_at = $4
                    WHERE id = $1 AND status = $2
                    RETURNING id
                )
                SELECT EXISTS (SELECT 1 FROM updated)
                FROM target
                ",
            )
            .bind(registration_id.as_uuid())
            .bind(expected.as_str())
            .bind(new.as_str())
            .bind(updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("update_status", e))?;

            match row {
                Some((changed,)) => Ok(changed),
                None => Err(StoreError::NotFound(format!("registration {registration_id}"))),
            }
        })
    }

    fn list_active(&self, event_id: EventId) -> StoreFuture<'_, Vec<Registration>> {
        Box::pin(async move {
            let sql = format!(
                "{SELECT_REGISTRATION} WHERE r.event_id = $1 AND r.status <> 'cancelled' ORDER BY r.seq"
            );
            let rows = sqlx::query(&sql)
                .bind(event_id.as_uuid())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| store_error("list_active", e))?;

            rows.iter().map(Self::row_to_registration).collect()
        })
    }

    fn count_active(&self, event_id: EventId) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let (count,): (i64,) = sqlx::query_as(
                r"
                SELECT COUNT(*)
                FROM registrations
                WHERE event_id = $1 AND status <> 'cancelled'
                ",
            )
            .bind(event_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_error("count_active", e))?;

            u64::try_from(count).map_err(|_| corrupted(format!("negative count {count}")))
        })
    }

    fn lookup_guest_by_email_or_phone(
        &self,
        email: NormalizedEmail,
        phone: NormalizedPhone,
    ) -> StoreFuture<'_, Option<GuestIdentity>> {
        Box::pin(async move {
            let row: Option<(Uuid, String, String)> = sqlx::query_as(
                r"
                SELECT guest_id, email, phone
                FROM guests
                WHERE email = $1 OR phone = $2
                ORDER BY seq
                LIMIT 1
                ",
            )
            .bind(email.as_str())
            .bind(phone.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("lookup_guest", e))?;

            Ok(row.map(|(guest_id, email, phone)| GuestIdentity {
                guest_id: GuestId::from_uuid(guest_id),
                email: NormalizedEmail::from_stored(email),
                phone: NormalizedPhone::from_stored(phone),
            }))
        })
    }

    fn insert_guest_if_absent(
        &self,
        guest: GuestIdentity,
        contact: ValidatedGuest,
    ) -> StoreFuture<'_, InsertOutcome> {
        Box::pin(async move {
            // No conflict target: a clash on id, email or phone all mean
            // the guest already exists.
            let result = sqlx::query(
                r"
                INSERT INTO guests (guest_id, first_name, last_name, email, phone)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT DO NOTHING
                ",
            )
            .bind(guest.guest_id.as_uuid())
            .bind(&contact.first_name)
            .bind(&contact.last_name)
            .bind(guest.email.as_str())
            .bind(guest.phone.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("insert_guest", e))?;

            if result.rows_affected() == 1 {
                tracing::debug!(guest_id = %guest.guest_id, "Guest record inserted");
                Ok(InsertOutcome::Inserted)
            } else {
                Ok(InsertOutcome::DuplicateKey)
            }
        })
    }
}
