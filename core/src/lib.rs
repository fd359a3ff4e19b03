//! # Seatkeeper Core
//!
//! Domain types, identity rules and collaborator traits for the seatkeeper
//! event capacity reservation engine.
//!
//! The engine admits registrations to capacity-limited events and guarantees
//! that, under any interleaving of concurrent requests, an event never holds
//! more active registrations than its capacity and no identity holds two
//! active registrations for the same event.
//!
//! ## Core Concepts
//!
//! - **Event**: capacity plus a cached `available_slots` counter
//! - **Registration**: one identity's claim on one slot, moved through a small state machine
//! - **Identity**: an authenticated member or a guest resolved by normalised email/phone
//! - **Stores**: atomic conditional operations the engine's correctness rests on
//!
//! ## Architecture Principles
//!
//! - Pure decisions in this crate (identity validation, lifecycle transitions)
//! - All I/O behind dyn-compatible traits ([`store::EventStore`], [`store::RegistrationStore`], [`store::RepairLog`])
//! - Time injected through [`environment::Clock`]
//! - No in-process locking: atomicity lives in the stores
//!
//! ## Example
//!
//! ```
//! use seatkeeper_core::identity::{GuestContact, ValidatedGuest};
//!
//! let guest = ValidatedGuest::validate(&GuestContact {
//!     first_name: "Ada".into(),
//!     last_name: "Lovelace".into(),
//!     email: "  Ada@Example.COM ".into(),
//!     phone: "+1 (555) 010-9999".into(),
//! })
//! .expect("valid contact");
//!
//! assert_eq!(guest.email.as_str(), "ada@example.com");
//! assert_eq!(guest.phone.as_str(), "15550109999");
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod store;
pub mod types;

pub use error::{ReservationError, Result, StoreError};
pub use identity::{
    GuestContact, GuestIdentity, IdentityKey, NormalizedEmail, NormalizedPhone,
    RegistrantIdentity, RegistrationRequest, ValidatedGuest,
};
pub use lifecycle::{RegistrationStatus, Transition};
pub use store::{
    EventStore, InsertOutcome, RegistrationStore, Repair, RepairEntry, RepairId, RepairLog,
    StoreFuture,
};
pub use types::{AccountId, Capacity, Event, EventId, GuestId, Registration, RegistrationId};

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected into
/// the coordinator and reconciler.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
