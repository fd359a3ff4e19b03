//! In-memory store implementations for fast, deterministic testing.
//!
//! - [`InMemoryEventStore`]: events and slot counters
//! - [`InMemoryRegistrationStore`]: registrations plus the guest directory
//! - [`InMemoryRepairLog`]: deferred compensations
//!
//! Each conditional operation runs entirely under one write lock, which gives
//! the same atomicity the production stores get from single SQL statements.
//! Locks are never held across an `.await`.

use crate::mocks::FixedClock;
use chrono::{DateTime, Utc};
use seatkeeper_core::environment::Clock;
use seatkeeper_core::error::StoreError;
use seatkeeper_core::identity::{
    GuestIdentity, IdentityKey, NormalizedEmail, NormalizedPhone, ValidatedGuest,
};
use seatkeeper_core::lifecycle::RegistrationStatus;
use seatkeeper_core::store::{
    EventStore, InsertOutcome, RegistrationStore, Repair, RepairEntry, RepairId, RepairLog,
    StoreFuture,
};
use seatkeeper_core::types::{Capacity, Event, EventId, Registration, RegistrationId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// ============================================================================
// Event store
// ============================================================================

/// In-memory event store.
///
/// # Example
///
/// ```
/// use seatkeeper_testing::InMemoryEventStore;
/// use seatkeeper_testing::helpers::open_event;
/// use seatkeeper_core::store::EventStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryEventStore::new();
/// let event = open_event(1);
/// store.insert(event.clone());
///
/// assert!(store.conditional_decrement_slots(event.id).await?);
/// assert!(!store.conditional_decrement_slots(event.id).await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<HashMap<EventId, Event>>>,
}

impl InMemoryEventStore {
    /// Create a new empty event store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed (or replace) an event.
    pub fn insert(&self, event: Event) {
        self.write().insert(event.id, event);
    }

    /// Current event snapshot.
    #[must_use]
    pub fn event(&self, event_id: EventId) -> Option<Event> {
        self.read().get(&event_id).cloned()
    }

    /// Current slot counter.
    #[must_use]
    pub fn slots(&self, event_id: EventId) -> Option<u32> {
        self.read().get(&event_id).map(|event| event.available_slots)
    }

    /// Overwrite the counter without any bound check, to simulate drift.
    pub fn corrupt_slots(&self, event_id: EventId, value: u32) {
        if let Some(event) = self.write().get_mut(&event_id) {
            event.available_slots = value;
        }
    }

    /// Number of stored events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no events are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<EventId, Event>> {
        self.events.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<EventId, Event>> {
        self.events.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventStore for InMemoryEventStore {
    fn get(&self, event_id: EventId) -> StoreFuture<'_, Option<Event>> {
        Box::pin(async move { Ok(self.event(event_id)) })
    }

    fn conditional_decrement_slots(&self, event_id: EventId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut events = self.write();
            Ok(match events.get_mut(&event_id) {
                Some(event) if event.available_slots > 0 => {
                    event.available_slots -= 1;
                    true
                }
                _ => false,
            })
        })
    }

    fn conditional_increment_slots(
        &self,
        event_id: EventId,
        capacity_ceiling: u32,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut events = self.write();
            Ok(match events.get_mut(&event_id) {
                Some(event)
                    if event.available_slots < event.capacity.get().min(capacity_ceiling) =>
                {
                    event.available_slots += 1;
                    true
                }
                _ => false,
            })
        })
    }

    fn set_slots(&self, event_id: EventId, value: u32) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut events = self.write();
            let event = events
                .get_mut(&event_id)
                .ok_or_else(|| StoreError::NotFound(format!("event {event_id}")))?;
            event.available_slots = value.min(event.capacity.get());
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
            let mut events = self.write();
            let event = events
                .get_mut(&event_id)
                .ok_or_else(|| StoreError::NotFound(format!("event {event_id}")))?;
            event.capacity = capacity;
            event.available_slots = event.available_slots.min(capacity.get());
            event.updated_at = updated_at;
            Ok(())
        })
    }

    fn list_event_ids(&self) -> StoreFuture<'_, Vec<EventId>> {
        Box::pin(async move {
            let mut ids: Vec<EventId> = self.read().keys().copied().collect();
            ids.sort();
            Ok(ids)
        })
    }
}

// ============================================================================
// Registration store
// ============================================================================

/// A guest directory row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuestRecord {
    /// Identity handed out to registrations
    pub identity: GuestIdentity,
    /// Given name as first submitted
    pub first_name: String,
    /// Family name as first submitted
    pub last_name: String,
}

#[derive(Debug, Default)]
struct Registry {
    // Insertion order doubles as registration order.
    registrations: Vec<Registration>,
    guests: Vec<GuestRecord>,
}

impl Registry {
    fn matching<'a>(
        &'a self,
        event_id: EventId,
        identity: &'a IdentityKey,
    ) -> impl DoubleEndedIterator<Item = &'a Registration> + 'a {
        self.registrations
            .iter()
            .filter(move |r| r.event_id == event_id && r.identity.key() == *identity)
    }
}

/// In-memory registration store with its guest directory.
///
/// Uniqueness of `(event, identity)` among active registrations, and of
/// guest email and phone, is checked and written under the same lock.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRegistrationStore {
    registry: Arc<RwLock<Registry>>,
}

impl InMemoryRegistrationStore {
    /// Create a new empty registration store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every registration ever written, in insertion order.
    #[must_use]
    pub fn registrations(&self) -> Vec<Registration> {
        self.read().registrations.clone()
    }

    /// Active registrations of an event, without going through the trait.
    #[must_use]
    pub fn active_count(&self, event_id: EventId) -> usize {
        self.read()
            .registrations
            .iter()
            .filter(|r| r.event_id == event_id && r.is_active())
            .count()
    }

    /// Seed a registration directly, bypassing uniqueness checks.
    pub fn seed(&self, registration: Registration) {
        self.write().registrations.push(registration);
    }

    /// The guest directory.
    #[must_use]
    pub fn guests(&self) -> Vec<GuestRecord> {
        self.read().guests.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RegistrationStore for InMemoryRegistrationStore {
    fn insert_if_absent(&self, registration: Registration) -> StoreFuture<'_, InsertOutcome> {
        Box::pin(async move {
            let mut registry = self.write();
            let key = registration.identity.key();
            if registry
                .matching(registration.event_id, &key)
                .any(Registration::is_active)
            {
                return Ok(InsertOutcome::DuplicateKey);
            }
            registry.registrations.push(registration);
            Ok(InsertOutcome::Inserted)
        })
    }

    fn find_active(
        &self,
        event_id: EventId,
        identity: IdentityKey,
    ) -> StoreFuture<'_, Option<Registration>> {
        Box::pin(async move {
            let registry = self.read();
            let found = registry
                .matching(event_id, &identity)
                .find(|r| r.is_active())
                .cloned();
            Ok(found)
        })
    }

    fn find_latest(
        &self,
        event_id: EventId,
        identity: IdentityKey,
    ) -> StoreFuture<'_, Option<Registration>> {
        Box::pin(async move {
            let registry = self.read();
            let found = registry.matching(event_id, &identity).next_back().cloned();
            Ok(found)
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
            let mut registry = self.write();
            let registration = registry
                .registrations
                .iter_mut()
                .find(|r| r.id == registration_id)
                .ok_or_else(|| StoreError::NotFound(format!("registration {registration_id}")))?;
            if registration.status != expected {
                return Ok(false);
            }
            registration.status = new;
            registration.updated_at = updated_at;
            Ok(true)
        })
    }

    fn list_active(&self, event_id: EventId) -> StoreFuture<'_, Vec<Registration>> {
        Box::pin(async move {
            let active = self
                .read()
                .registrations
                .iter()
                .filter(|r| r.event_id == event_id && r.is_active())
                .cloned()
                .collect();
            Ok(active)
        })
    }

    fn count_active(&self, event_id: EventId) -> StoreFuture<'_, u64> {
        Box::pin(async move { Ok(self.active_count(event_id) as u64) })
    }

    fn lookup_guest_by_email_or_phone(
        &self,
        email: NormalizedEmail,
        phone: NormalizedPhone,
    ) -> StoreFuture<'_, Option<GuestIdentity>> {
        Box::pin(async move {
            let found = self
                .read()
                .guests
                .iter()
                .find(|g| g.identity.email == email || g.identity.phone == phone)
                .map(|g| g.identity.clone());
            Ok(found)
        })
    }

    fn insert_guest_if_absent(
        &self,
        guest: GuestIdentity,
        contact: ValidatedGuest,
    ) -> StoreFuture<'_, InsertOutcome> {
        Box::pin(async move {
            let mut registry = self.write();
            let taken = registry.guests.iter().any(|g| {
                g.identity.guest_id == guest.guest_id
                    || g.identity.email == guest.email
                    || g.identity.phone == guest.phone
            });
            if taken {
                return Ok(InsertOutcome::DuplicateKey);
            }
            registry.guests.push(GuestRecord {
                identity: guest,
                first_name: contact.first_name,
                last_name: contact.last_name,
            });
            Ok(InsertOutcome::Inserted)
        })
    }
}

// ============================================================================
// Repair log
// ============================================================================

#[derive(Debug, Default)]
struct RepairBook {
    next_id: i64,
    entries: Vec<(RepairEntry, bool)>,
}

/// In-memory repair log.
///
/// Entries are never removed; resolving one only hides it from
/// [`RepairLog::pending`], so tests can inspect the full history.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRepairLog {
    book: Arc<Mutex<RepairBook>>,
    clock: Option<FixedClock>,
}

impl InMemoryRepairLog {
    /// Create a new empty repair log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A log that stamps `recorded_at` from `clock` instead of the wall clock,
    /// so entry ages line up with a reconciler on the same clock.
    #[must_use]
    pub fn with_clock(clock: FixedClock) -> Self {
        Self {
            clock: Some(clock),
            ..Self::default()
        }
    }

    /// Every entry with its resolved flag, in recording order.
    #[must_use]
    pub fn entries(&self) -> Vec<(RepairEntry, bool)> {
        self.lock().entries.clone()
    }

    /// Unresolved entries, without going through the trait.
    #[must_use]
    pub fn pending_repairs(&self) -> Vec<Repair> {
        self.lock()
            .entries
            .iter()
            .filter(|(_, resolved)| !resolved)
            .map(|(entry, _)| entry.repair.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, RepairBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_entry(
        &self,
        id: RepairId,
        f: impl FnOnce(&mut RepairEntry, &mut bool),
    ) -> Result<(), StoreError> {
        let mut book = self.lock();
        let (entry, resolved) = book
            .entries
            .iter_mut()
            .find(|(entry, _)| entry.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("repair {id}")))?;
        f(entry, resolved);
        Ok(())
    }
}

impl RepairLog for InMemoryRepairLog {
    fn record(&self, repair: Repair) -> StoreFuture<'_, RepairId> {
        Box::pin(async move {
            let recorded_at = self.clock.as_ref().map_or_else(Utc::now, Clock::now);
            let mut book = self.lock();
            book.next_id += 1;
            let id = RepairId::new(book.next_id);
            book.entries.push((
                RepairEntry {
                    id,
                    repair,
                    attempts: 0,
                    last_error: None,
                    recorded_at,
                },
                false,
            ));
            Ok(id)
        })
    }

    fn pending(&self, limit: usize) -> StoreFuture<'_, Vec<RepairEntry>> {
        Box::pin(async move {
            let pending = self
                .lock()
                .entries
                .iter()
                .filter(|(_, resolved)| !resolved)
                .take(limit)
                .map(|(entry, _)| entry.clone())
                .collect();
            Ok(pending)
        })
    }

    fn mark_resolved(&self, id: RepairId) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.with_entry(id, |_, resolved| *resolved = true) })
    }

    fn mark_failed(&self, id: RepairId, error: String) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.with_entry(id, |entry, _| {
                entry.attempts += 1;
                entry.last_error = Some(error);
            })
        })
    }

    fn count_pending(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let count = self.lock().entries.iter().filter(|(_, resolved)| !resolved).count();
            Ok(count as u64)
        })
    }
}
