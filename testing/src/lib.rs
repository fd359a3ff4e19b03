//! # Seatkeeper Testing
//!
//! Testing utilities for the seatkeeper reservation engine.
//!
//! This crate provides:
//! - In-memory implementations of the store traits (atomic under a single lock)
//! - Fault-injecting wrappers that make any store fail or miss on demand
//! - A fixed clock and fixtures for events, members and guests
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```ignore
//! use seatkeeper_testing::{InMemoryEventStore, InMemoryRegistrationStore, InMemoryRepairLog, test_clock};
//! use seatkeeper_testing::helpers::{open_event, member_request};
//!
//! #[tokio::test]
//! async fn registers_a_member() {
//!     let events = Arc::new(InMemoryEventStore::new());
//!     let event = open_event(10);
//!     events.insert(event.clone());
//!
//!     let coordinator = ReservationCoordinator::new(/* stores, clock, config */);
//!     let registration = coordinator.register(event.id, &member_request()).await.unwrap();
//!     assert_eq!(events.slots(event.id), Some(9));
//! }
//! ```

use chrono::{DateTime, Utc};
use seatkeeper_core::environment::Clock;

pub mod faults;
pub mod stores;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use seatkeeper_testing::mocks::FixedClock;
    /// use seatkeeper_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Fixtures for events and registrants.
///
/// Every event fixture starts a week after [`test_clock`] so it is open
/// unless a test says otherwise.
pub mod helpers {
    use super::test_clock;
    use chrono::Duration;
    use seatkeeper_core::environment::Clock;
    use seatkeeper_core::identity::{GuestContact, RegistrationRequest};
    use seatkeeper_core::types::{AccountId, Capacity, Event};

    /// Public event with every slot free.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn open_event(capacity: u32) -> Event {
        event(capacity, true, Duration::days(7))
    }

    /// Members-only event with every slot free.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn private_event(capacity: u32) -> Event {
        event(capacity, false, Duration::days(7))
    }

    /// Public event that started an hour before [`test_clock`].
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn started_event(capacity: u32) -> Event {
        event(capacity, true, Duration::hours(-1))
    }

    #[allow(clippy::expect_used)]
    fn event(capacity: u32, is_public: bool, starts_in: Duration) -> Event {
        let now = test_clock().now();
        let capacity = Capacity::new(capacity).expect("fixture capacity must be positive");
        Event::new(
            format!("Fixture event ({capacity} seats)"),
            capacity,
            is_public,
            now + starts_in,
            now,
        )
    }

    /// Request from a fresh member account.
    #[must_use]
    pub fn member_request() -> RegistrationRequest {
        RegistrationRequest::member(AccountId::new())
    }

    /// Valid guest contact, unique per `n`.
    #[must_use]
    pub fn guest_contact(n: u32) -> GuestContact {
        GuestContact {
            first_name: "Guest".to_string(),
            last_name: format!("Number{n}"),
            email: format!("Guest{n}@Example.com"),
            phone: format!("+1 (555) {n:07}"),
        }
    }

    /// Registration request for [`guest_contact`]`(n)`.
    #[must_use]
    pub fn guest_request(n: u32) -> RegistrationRequest {
        RegistrationRequest::guest(guest_contact(n))
    }

    /// Install a `tracing` subscriber that writes through the test harness.
    ///
    /// Safe to call from every test; only the first call installs it.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn,seatkeeper=debug".into()),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// One step of a randomised register/unregister workload.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum LedgerOp {
        /// Registrant `n` registers.
        Register(usize),
        /// Registrant `n` unregisters.
        Unregister(usize),
    }

    impl LedgerOp {
        /// The registrant index this step acts for.
        #[must_use]
        pub const fn registrant(self) -> usize {
            match self {
                Self::Register(n) | Self::Unregister(n) => n,
            }
        }
    }

    /// Sequences of up to `max_len` steps over `registrants` distinct registrants.
    pub fn ledger_ops(registrants: usize, max_len: usize) -> impl Strategy<Value = Vec<LedgerOp>> {
        let op = prop_oneof![
            3 => (0..registrants).prop_map(LedgerOp::Register),
            2 => (0..registrants).prop_map(LedgerOp::Unregister),
        ];
        proptest::collection::vec(op, 0..=max_len)
    }

    /// Emails with random casing and surrounding whitespace.
    pub fn messy_email() -> impl Strategy<Value = String> {
        ("[a-zA-Z0-9]{1,12}", "[a-zA-Z]{1,10}", "(com|org|net|io)", " {0,3}", " {0,3}")
            .prop_map(|(local, domain, tld, lead, trail)| {
                format!("{lead}{local}@{domain}.{tld}{trail}")
            })
    }

    /// Phone numbers of 10-15 digits dressed up with separators and an optional `+`.
    pub fn messy_phone() -> impl Strategy<Value = String> {
        ("[0-9]{10,15}", any::<bool>(), any::<bool>()).prop_map(|(digits, plus, dashed)| {
            let body = if dashed {
                digits
                    .chars()
                    .enumerate()
                    .map(|(i, c)| if i > 0 && i % 3 == 0 { format!("-{c}") } else { c.to_string() })
                    .collect::<String>()
            } else {
                digits
            };
            if plus { format!("+{body}") } else { body }
        })
    }
}

// Re-export commonly used items
pub use faults::{FaultPlan, FaultyEventStore, FaultyRegistrationStore, FaultyRepairLog, StoreOp};
pub use mocks::{FixedClock, test_clock};
pub use stores::{InMemoryEventStore, InMemoryRegistrationStore, InMemoryRepairLog};
