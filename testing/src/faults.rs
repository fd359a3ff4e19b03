//! Fault injection for store-backed tests.
//!
//! Wrap any store in a `Faulty*` decorator sharing one [`FaultPlan`], then
//! script which calls fail with [`StoreError::Unavailable`], stall for a
//! while before reaching the store, or, for lookups, come back empty as if
//! the row had vanished.
//!
//! ```
//! use seatkeeper_testing::{FaultPlan, FaultyEventStore, InMemoryEventStore, StoreOp};
//! use seatkeeper_core::store::EventStore;
//! use seatkeeper_core::types::EventId;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let plan = FaultPlan::new();
//! let store = FaultyEventStore::new(Arc::new(InMemoryEventStore::new()), plan.clone());
//!
//! plan.fail_next(StoreOp::GetEvent, 1);
//! assert!(store.get(EventId::new()).await.is_err());
//! assert!(store.get(EventId::new()).await.is_ok());
//! assert_eq!(plan.calls(StoreOp::GetEvent), 2);
//! # }
//! ```

use chrono::{DateTime, Utc};
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
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Store calls that can be scripted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum StoreOp {
    GetEvent,
    DecrementSlots,
    IncrementSlots,
    SetSlots,
    UpdateCapacity,
    ListEventIds,
    InsertRegistration,
    FindActive,
    FindLatest,
    UpdateStatus,
    ListActive,
    CountActive,
    LookupGuest,
    InsertGuest,
    RecordRepair,
    PendingRepairs,
    ResolveRepair,
    FailRepair,
    CountRepairs,
}

#[derive(Debug, Default)]
struct Script {
    failures: u32,
    always: bool,
    misses: u32,
    delay: Option<Duration>,
    calls: usize,
}

/// Shared script of injected faults, cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct FaultPlan {
    scripts: Arc<Mutex<HashMap<StoreOp, Script>>>,
}

impl FaultPlan {
    /// A plan that injects nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `times` calls of `op` fail with `Unavailable`.
    pub fn fail_next(&self, op: StoreOp, times: u32) {
        self.lock().entry(op).or_default().failures += times;
    }

    /// Every call of `op` fails until [`FaultPlan::heal`].
    pub fn fail_always(&self, op: StoreOp) {
        self.lock().entry(op).or_default().always = true;
    }

    /// The next `times` calls of `op` report nothing found. Only affects
    /// lookups ([`StoreOp::GetEvent`], [`StoreOp::FindActive`],
    /// [`StoreOp::FindLatest`], [`StoreOp::LookupGuest`]).
    pub fn miss_next(&self, op: StoreOp, times: u32) {
        self.lock().entry(op).or_default().misses += times;
    }

    /// Every call of `op` sleeps for `delay` before reaching the store, until
    /// [`FaultPlan::heal`].
    pub fn delay(&self, op: StoreOp, delay: Duration) {
        self.lock().entry(op).or_default().delay = Some(delay);
    }

    /// Stop injecting faults into `op`.
    pub fn heal(&self, op: StoreOp) {
        if let Some(script) = self.lock().get_mut(&op) {
            script.failures = 0;
            script.always = false;
            script.misses = 0;
            script.delay = None;
        }
    }

    /// Stop injecting faults everywhere.
    pub fn heal_all(&self) {
        for script in self.lock().values_mut() {
            script.failures = 0;
            script.always = false;
            script.misses = 0;
            script.delay = None;
        }
    }

    /// How many times `op` was called, faulted or not.
    #[must_use]
    pub fn calls(&self, op: StoreOp) -> usize {
        self.lock().get(&op).map_or(0, |script| script.calls)
    }

    async fn enter(&self, op: StoreOp) -> Result<(), StoreError> {
        if let Some(delay) = self.check(op)? {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    fn check(&self, op: StoreOp) -> Result<Option<Duration>, StoreError> {
        let mut scripts = self.lock();
        let script = scripts.entry(op).or_default();
        script.calls += 1;
        if script.always {
            return Err(StoreError::Unavailable(format!("injected outage: {op:?}")));
        }
        if script.failures > 0 {
            script.failures -= 1;
            return Err(StoreError::Unavailable(format!("injected failure: {op:?}")));
        }
        Ok(script.delay)
    }

    fn take_miss(&self, op: StoreOp) -> bool {
        let mut scripts = self.lock();
        match scripts.get_mut(&op) {
            Some(script) if script.misses > 0 => {
                script.misses -= 1;
                true
            }
            _ => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<StoreOp, Script>> {
        self.scripts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// [`EventStore`] decorator driven by a [`FaultPlan`].
#[derive(Clone)]
pub struct FaultyEventStore {
    inner: Arc<dyn EventStore>,
    plan: FaultPlan,
}

impl FaultyEventStore {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn EventStore>, plan: FaultPlan) -> Self {
        Self { inner, plan }
    }
}

impl EventStore for FaultyEventStore {
    fn get(&self, event_id: EventId) -> StoreFuture<'_, Option<Event>> {
        Box::pin(async move {
            self.plan.enter(StoreOp::GetEvent).await?;
            if self.plan.take_miss(StoreOp::GetEvent) {
                return Ok(None);
            }
            self.inner.get(event_id).await
        })
    }

    fn conditional_decrement_slots(&self, event_id: EventId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.plan.enter(StoreOp::DecrementSlots).await?;
            self.inner.conditional_decrement_slots(event_id).await
        })
    }

    fn conditional_increment_slots(
        &self,
        event_id: EventId,
        capacity_ceiling: u32,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.plan.enter(StoreOp::IncrementSlots).await?;
            self.inner
                .conditional_increment_slots(event_id, capacity_ceiling)
                .await
        })
    }

    fn set_slots(&self, event_id: EventId, value: u32) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.plan.enter(StoreOp::SetSlots).await?;
            self.inner.set_slots(event_id, value).await
        })
    }

    fn update_capacity(
        &self,
        event_id: EventId,
        capacity: Capacity,
        updated_at: DateTime<Utc>,
    ) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.plan.enter(StoreOp::UpdateCapacity).await?;
            self.inner.update_capacity(event_id, capacity, updated_at).await
        })
    }

    fn list_event_ids(&self) -> StoreFuture<'_, Vec<EventId>> {
        Box::pin(async move {
            self.plan.enter(StoreOp::ListEventIds).await?;
            self.inner.list_event_ids().await
        })
    }
}

/// [`RegistrationStore`] decorator driven by a [`FaultPlan`].
#[derive(Clone)]
pub struct FaultyRegistrationStore {
    inner: Arc<dyn RegistrationStore>,
    plan: FaultPlan,
}

impl FaultyRegistrationStore {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn RegistrationStore>, plan: FaultPlan) -> Self {
        Self { inner, plan }
    }
}

impl RegistrationStore for FaultyRegistrationStore {
    fn insert_if_absent(&self, registration: Registration) -> StoreFuture<'_, InsertOutcome> {
        Box::pin(async move {
            self.plan.enter(StoreOp::InsertRegistration).await?;
            self.inner.insert_if_absent(registration).await
        })
    }

    fn find_active(
        &self,
        event_id: EventId,
        identity: IdentityKey,
    ) -> StoreFuture<'_, Option<Registration>> {
        Box::pin(async move {
            self.plan.enter(StoreOp::FindActive).await?;
            if self.plan.take_miss(StoreOp::FindActive) {
                return Ok(None);
            }
            self.inner.find_active(event_id, identity).await
        })
    }

    fn find_latest(
        &self,
        event_id: EventId,
        identity: IdentityKey,
    ) -> StoreFuture<'_, Option<Registration>> {
        Box::pin(async move {
            self.plan.enter(StoreOp::FindLatest).await?;
            if self.plan.take_miss(StoreOp::FindLatest) {
                return Ok(None);
            }
            self.inner.find_latest(event_id, identity).await
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
            self.plan.enter(StoreOp::UpdateStatus).await?;
            self.inner
                .update_status(registration_id, expected, new, updated_at)
                .await
        })
    }

    fn list_active(&self, event_id: EventId) -> StoreFuture<'_, Vec<Registration>> {
        Box::pin(async move {
            self.plan.enter(StoreOp::ListActive).await?;
            self.inner.list_active(event_id).await
        })
    }

    fn count_active(&self, event_id: EventId) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            self.plan.enter(StoreOp::CountActive).await?;
            self.inner.count_active(event_id).await
        })
    }

    fn lookup_guest_by_email_or_phone(
        &self,
        email: NormalizedEmail,
        phone: NormalizedPhone,
    ) -> StoreFuture<'_, Option<GuestIdentity>> {
        Box::pin(async move {
            self.plan.enter(StoreOp::LookupGuest).await?;
            if self.plan.take_miss(StoreOp::LookupGuest) {
                return Ok(None);
            }
            self.inner.lookup_guest_by_email_or_phone(email, phone).await
        })
    }

    fn insert_guest_if_absent(
        &self,
        guest: GuestIdentity,
        contact: ValidatedGuest,
    ) -> StoreFuture<'_, InsertOutcome> {
        Box::pin(async move {
            self.plan.enter(StoreOp::InsertGuest).await?;
            self.inner.insert_guest_if_absent(guest, contact).await
        })
    }
}

/// [`RepairLog`] decorator driven by a [`FaultPlan`].
#[derive(Clone)]
pub struct FaultyRepairLog {
    inner: Arc<dyn RepairLog>,
    plan: FaultPlan,
}

impl FaultyRepairLog {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn RepairLog>, plan: FaultPlan) -> Self {
        Self { inner, plan }
    }
}

impl RepairLog for FaultyRepairLog {
    fn record(&self, repair: Repair) -> StoreFuture<'_, RepairId> {
        Box::pin(async move {
            self.plan.enter(StoreOp::RecordRepair).await?;
            self.inner.record(repair).await
        })
    }

    fn pending(&self, limit: usize) -> StoreFuture<'_, Vec<RepairEntry>> {
        Box::pin(async move {
            self.plan.enter(StoreOp::PendingRepairs).await?;
            self.inner.pending(limit).await
        })
    }

    fn mark_resolved(&self, id: RepairId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.plan.enter(StoreOp::ResolveRepair).await?;
            self.inner.mark_resolved(id).await
        })
    }

    fn mark_failed(&self, id: RepairId, error: String) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.plan.enter(StoreOp::FailRepair).await?;
            self.inner.mark_failed(id, error).await
        })
    }

    fn count_pending(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            self.plan.enter(StoreOp::CountRepairs).await?;
            self.inner.count_pending().await
        })
    }
}
