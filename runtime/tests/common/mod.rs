//! Shared wiring for the runtime integration tests.

#![allow(dead_code)] // Not every test file uses every helper

use seatkeeper_core::types::Event;
use seatkeeper_runtime::{
    CoordinatorConfig, Reconciler, ReconcilerConfig, ReservationCoordinator, RetryPolicy,
};
use seatkeeper_testing::{
    FaultPlan, FaultyEventStore, FaultyRegistrationStore, FaultyRepairLog, InMemoryEventStore,
    InMemoryRegistrationStore, InMemoryRepairLog, test_clock,
};
use std::sync::Arc;
use std::time::Duration;

/// In-memory stores behind fault injectors, plus a coordinator and a
/// reconciler wired over them.
pub struct Harness {
    pub events: InMemoryEventStore,
    pub registrations: InMemoryRegistrationStore,
    pub repairs: InMemoryRepairLog,
    pub plan: FaultPlan,
    pub coordinator: Arc<ReservationCoordinator>,
    pub reconciler: Reconciler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_reconciler_config(ReconcilerConfig::default())
    }

    /// A harness whose reconciler treats every unsettled registration as abandoned.
    pub fn without_grace() -> Self {
        Self::with_reconciler_config(ReconcilerConfig {
            unsettled_grace: Duration::ZERO,
            ..ReconcilerConfig::default()
        })
    }

    pub fn with_reconciler_config(reconciler_config: ReconcilerConfig) -> Self {
        seatkeeper_testing::helpers::init_tracing();

        let events = InMemoryEventStore::new();
        let registrations = InMemoryRegistrationStore::new();
        let repairs = InMemoryRepairLog::with_clock(test_clock());
        let plan = FaultPlan::new();

        let event_store = Arc::new(FaultyEventStore::new(Arc::new(events.clone()), plan.clone()));
        let registration_store = Arc::new(FaultyRegistrationStore::new(
            Arc::new(registrations.clone()),
            plan.clone(),
        ));
        let repair_log = Arc::new(FaultyRepairLog::new(Arc::new(repairs.clone()), plan.clone()));

        let config = CoordinatorConfig {
            compensation_retry: fast_retry(),
            guest_resolution_attempts: 3,
        };
        let coordinator = Arc::new(ReservationCoordinator::new(
            event_store.clone(),
            registration_store.clone(),
            repair_log.clone(),
            Arc::new(test_clock()),
            config,
        ));
        let reconciler = Reconciler::new(
            event_store,
            registration_store,
            repair_log,
            Arc::new(test_clock()),
            reconciler_config,
        );

        Self {
            events,
            registrations,
            repairs,
            plan,
            coordinator,
            reconciler,
        }
    }

    /// Insert `event` and return it.
    pub fn with_event(&self, event: Event) -> Event {
        self.events.insert(event.clone());
        event
    }

    pub fn slots(&self, event: &Event) -> u32 {
        self.events.slots(event.id).unwrap_or_default()
    }

    /// `available_slots + active == capacity`, or slots pinned at zero when
    /// capacity was cut below the active count.
    pub fn assert_conserved(&self, event: &Event) {
        let stored = self.events.event(event.id).unwrap_or_else(|| event.clone());
        let active = self.registrations.active_count(event.id) as u64;
        let capacity = u64::from(stored.capacity.get());
        let expected = capacity.saturating_sub(active);
        assert_eq!(
            u64::from(stored.available_slots),
            expected,
            "slots={} active={active} capacity={capacity}",
            stored.available_slots
        );
    }
}

/// Three attempts, no waiting worth mentioning.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(2)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(2))
        .build()
}
