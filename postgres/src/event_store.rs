//! Events table and the slot counter.

use crate::error::{corrupted, from_db_int, store_error, to_db_int};
use chrono::{DateTime, Utc};
use seatkeeper_core::error::StoreError;
use seatkeeper_core::store::{EventStore, StoreFuture};
use seatkeeper_core::types::{Capacity, Event, EventId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// `PostgreSQL`-backed [`EventStore`].
///
/// Reserve and release are each one guarded `UPDATE`; Postgres row locking
/// serialises concurrent updates of the same event, and the guard is
/// re-evaluated against the committed value, so no two callers can take the
/// same last slot.
///
/// # Example
///
/// ```no_run
/// use seatkeeper_postgres::PostgresEventStore;
/// use seatkeeper_core::store::EventStore;
/// use seatkeeper_core::types::EventId;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let events = PostgresEventStore::new(pool);
/// let taken = events.conditional_decrement_slots(EventId::new()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Create a store over the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a new event. Event authoring lives outside the engine; this
    /// is for provisioning and tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the insert fails.
    pub async fn create(&self, event: &Event) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO events (id, title, capacity, available_slots, is_public, starts_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(event.id.as_uuid())
        .bind(&event.title)
        .bind(to_db_int(event.capacity.get())?)
        .bind(to_db_int(event.available_slots)?)
        .bind(event.is_public)
        .bind(event.starts_at)
        .bind(event.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("create_event", e))?;

        tracing::info!(event_id = %event.id, capacity = %event.capacity, "Event created");
        Ok(())
    }

    fn row_to_event(row: &PgRow) -> Result<Event, StoreError> {
        let decode = |e| store_error("decode_event", e);
        let capacity: i32 = row.try_get("capacity").map_err(decode)?;
        let slots: i32 = row.try_get("available_slots").map_err(decode)?;
        let capacity = Capacity::new(from_db_int("capacity", capacity)?).map_err(corrupted)?;

        Ok(Event {
            id: EventId::from_uuid(row.try_get("id").map_err(decode)?),
            title: row.try_get("title").map_err(decode)?,
            capacity,
            available_slots: from_db_int("available_slots", slots)?,
            is_public: row.try_get("is_public").map_err(decode)?,
            starts_at: row.try_get("starts_at").map_err(decode)?,
            updated_at: row.try_get("updated_at").map_err(decode)?,
        })
    }
}

impl EventStore for PostgresEventStore {
    fn get(&self, event_id: EventId) -> StoreFuture<'_, Option<Event>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT id, title, capacity, available_slots, is_public, starts_at, updated_at
                FROM events
                WHERE id = $1
                ",
            )
            .bind(event_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("get_event", e))?;

            row.as_ref().map(Self::row_to_event).transpose()
        })
    }

    fn conditional_decrement_slots(&self, event_id: EventId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE events
                SET available_slots = available_slots - 1
                WHERE id = $1 AND available_slots > 0
                ",
            )
            .bind(event_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("decrement_slots", e))?;

            Ok(result.rows_affected() == 1)
        })
    }

    fn conditional_increment_slots(
        &self,
        event_id: EventId,
        capacity_ceiling: u32,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE events
                SET available_slots = available_slots + 1
                WHERE id = $1 AND available_slots < LEAST(capacity, $2)
                ",
            )
            .bind(event_id.as_uuid())
            .bind(to_db_int(capacity_ceiling)?)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("increment_slots", e))?;

            Ok(result.rows_affected() == 1)
        })
    }

    fn set_slots(&self, event_id: EventId, value: u32) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE events
                SET available_slots = LEAST($2, capacity)
                WHERE id = $1
                ",
            )
            .bind(event_id.as_uuid())
            .bind(to_db_int(value)?)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("set_slots", e))?;

            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound(format!("event {event_id}")));
            }
            Ok(())
        })
    }

    fn update_capacity(
        &self,
        event_id: EventId,
        capacity: Capacity,
        updated_at: DateTime<Utc>,
    ) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE events
                SET capacity = $2,
                    available_slots = LEAST(available_slots, $2),
                    updated_at = $3
                WHERE id = $1
                ",
            )
            .bind(event_id.as_uuid())
            .bind(to_db_int(capacity.get())?)
            .bind(updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("update_capacity", e))?;

            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound(format!("event {event_id}")));
            }
            Ok(())
        })
    }

    fn list_event_ids(&self) -> StoreFuture<'_, Vec<EventId>> {
        Box::pin(async move {
            let ids: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM events ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| store_error("list_event_ids", e))?;

            Ok(ids.into_iter().map(|(id,)| EventId::from_uuid(id)).collect())
        })
    }
}
