//! Integration tests for register / unregister and the admin operations
//!
//! Every test runs the coordinator over in-memory stores wrapped in fault
//! injectors, so partial failures can be scripted per store call.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect
#![allow(clippy::panic)] // Tests can panic on the wrong variant

mod common;

use common::Harness;
use seatkeeper_core::environment::Clock;
use seatkeeper_core::error::ReservationError;
use seatkeeper_core::identity::{IdentityKey, RegistrantIdentity, RegistrationRequest};
use seatkeeper_core::lifecycle::RegistrationStatus;
use seatkeeper_core::store::Repair;
use seatkeeper_core::types::{AccountId, EventId, Registration};
use seatkeeper_runtime::UnregisterOutcome;
use seatkeeper_testing::{StoreOp, test_clock};
use seatkeeper_testing::helpers::{
    guest_contact, guest_request, member_request, open_event, private_event, started_event,
};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Register
// ============================================================================

#[tokio::test]
async fn test_member_registration_takes_a_slot() {
    let h = Harness::new();
    let event = h.with_event(open_event(3));
    let account_id = AccountId::new();

    let registration = h
        .coordinator
        .register(event.id, &RegistrationRequest::member(account_id))
        .await
        .unwrap();

    assert_eq!(registration.status, RegistrationStatus::Confirmed);
    assert_eq!(registration.identity, RegistrantIdentity::Member { account_id });
    assert_eq!(registration.event_id, event.id);
    assert_eq!(h.slots(&event), 2);
    h.assert_conserved(&event);
}

#[tokio::test]
async fn test_duplicate_member_registration_is_refused() {
    let h = Harness::new();
    let event = h.with_event(open_event(3));
    let request = member_request();

    h.coordinator.register(event.id, &request).await.unwrap();
    let second = h.coordinator.register(event.id, &request).await;

    assert!(matches!(
        second,
        Err(ReservationError::AlreadyRegistered { event_id, .. }) if event_id == event.id
    ));
    assert_eq!(h.slots(&event), 2);
    assert_eq!(h.registrations.registrations().len(), 1);
}

#[tokio::test]
async fn test_duplicate_guest_submission_is_refused() {
    let h = Harness::new();
    let event = h.with_event(open_event(3));

    h.coordinator.register(event.id, &guest_request(1)).await.unwrap();

    // Same person, retyped email casing and a differently formatted phone.
    let mut retyped = guest_contact(1);
    retyped.email = "  GUEST1@EXAMPLE.COM ".to_string();
    retyped.phone = "1-555-000-0001".to_string();
    let second = h
        .coordinator
        .register(event.id, &RegistrationRequest::guest(retyped))
        .await;

    assert!(matches!(second, Err(ReservationError::AlreadyRegistered { .. })));
    assert_eq!(h.slots(&event), 2);
    assert_eq!(h.registrations.guests().len(), 1);
}

#[tokio::test]
async fn test_guest_matching_on_phone_only_is_the_same_registrant() {
    let h = Harness::new();
    let event = h.with_event(open_event(3));
    let first = h.coordinator.register(event.id, &guest_request(1)).await.unwrap();

    let mut other_email = guest_contact(1);
    other_email.email = "someone.else@example.com".to_string();
    let second = h
        .coordinator
        .register(event.id, &RegistrationRequest::guest(other_email))
        .await;

    match second {
        Err(ReservationError::AlreadyRegistered { identity, .. }) => {
            assert_eq!(identity, first.identity.key());
        }
        other => panic!("expected AlreadyRegistered, got {other:?}"),
    }
}

#[tokio::test]
async fn test_full_event_refuses_and_revokes() {
    let h = Harness::new();
    let event = h.with_event(open_event(1));

    h.coordinator.register(event.id, &member_request()).await.unwrap();
    let refused = h.coordinator.register(event.id, &member_request()).await;

    assert_eq!(refused, Err(ReservationError::NoAvailableSlots(event.id)));
    assert_eq!(h.slots(&event), 0);
    assert_eq!(h.registrations.active_count(event.id), 1);

    // The losing row was inserted, then revoked.
    let statuses: Vec<_> = h
        .registrations
        .registrations()
        .iter()
        .map(|r| r.status)
        .collect();
    assert_eq!(
        statuses,
        vec![RegistrationStatus::Confirmed, RegistrationStatus::Cancelled]
    );
    assert!(h.repairs.pending_repairs().is_empty());
    h.assert_conserved(&event);
}

#[tokio::test]
async fn test_guest_refused_by_private_event() {
    let h = Harness::new();
    let event = h.with_event(private_event(5));

    let result = h.coordinator.register(event.id, &guest_request(1)).await;

    assert!(matches!(result, Err(ReservationError::EventNotAccepting { .. })));
    assert!(h.registrations.guests().is_empty());
    assert_eq!(h.slots(&event), 5);
}

#[tokio::test]
async fn test_member_accepted_by_private_event() {
    let h = Harness::new();
    let event = h.with_event(private_event(5));

    h.coordinator.register(event.id, &member_request()).await.unwrap();
    assert_eq!(h.slots(&event), 4);
}

#[tokio::test]
async fn test_started_event_is_closed() {
    let h = Harness::new();
    let event = h.with_event(started_event(5));

    let result = h.coordinator.register(event.id, &member_request()).await;

    assert!(matches!(result, Err(ReservationError::EventNotAccepting { .. })));
    assert_eq!(h.slots(&event), 5);
}

#[tokio::test]
async fn test_unknown_event() {
    let h = Harness::new();
    let missing = EventId::new();

    let result = h.coordinator.register(missing, &member_request()).await;
    assert_eq!(result, Err(ReservationError::EventNotFound(missing)));
}

#[tokio::test]
async fn test_request_without_identity_is_invalid() {
    let h = Harness::new();
    let event = h.with_event(open_event(5));

    let result = h
        .coordinator
        .register(event.id, &RegistrationRequest::default())
        .await;

    assert!(matches!(result, Err(ReservationError::InvalidIdentity(_))));
    assert_eq!(h.slots(&event), 5);
}

#[tokio::test]
async fn test_malformed_guest_email_is_invalid() {
    let h = Harness::new();
    let event = h.with_event(open_event(5));
    let mut contact = guest_contact(1);
    contact.email = "not-an-email".to_string();

    let result = h
        .coordinator
        .register(event.id, &RegistrationRequest::guest(contact))
        .await;

    assert!(matches!(result, Err(ReservationError::InvalidIdentity(_))));
    assert!(h.registrations.guests().is_empty());
}

#[tokio::test]
async fn test_store_outage_is_retryable() {
    let h = Harness::new();
    let event = h.with_event(open_event(5));
    h.plan.fail_next(StoreOp::GetEvent, 1);

    let result = h.coordinator.register(event.id, &member_request()).await;

    let error = result.unwrap_err();
    assert!(error.is_retryable());
    assert!(!error.is_user_facing());
    assert_eq!(h.slots(&event), 5);
}

#[tokio::test]
async fn test_reserve_failure_revokes_and_schedules_reconciliation() {
    let h = Harness::new();
    let event = h.with_event(open_event(5));
    h.plan.fail_next(StoreOp::DecrementSlots, 1);

    let result = h.coordinator.register(event.id, &member_request()).await;

    assert!(matches!(result, Err(ReservationError::StoreUnavailable(_))));
    assert_eq!(h.registrations.active_count(event.id), 0);
    assert_eq!(
        h.repairs.pending_repairs(),
        vec![Repair::ReconcileEvent { event_id: event.id }]
    );
    h.assert_conserved(&event);
}

#[tokio::test]
async fn test_failed_revoke_is_recorded_for_rollback() {
    let h = Harness::new();
    let event = h.with_event(open_event(1));
    h.coordinator.register(event.id, &member_request()).await.unwrap();

    h.plan.fail_always(StoreOp::UpdateStatus);
    let refused = h.coordinator.register(event.id, &member_request()).await;

    assert_eq!(refused, Err(ReservationError::NoAvailableSlots(event.id)));
    // Initial attempt plus two retries
    assert_eq!(h.plan.calls(StoreOp::UpdateStatus), 3);

    let orphan = h.registrations.registrations()[1].clone();
    assert_eq!(orphan.status, RegistrationStatus::Confirmed);
    assert_eq!(
        h.repairs.pending_repairs(),
        vec![Repair::RollbackRegistration {
            registration_id: orphan.id,
            event_id: event.id,
        }]
    );
}

#[tokio::test]
async fn test_reregistration_after_cancel_is_a_new_record() {
    let h = Harness::new();
    let event = h.with_event(open_event(2));
    let request = member_request();

    let first = h.coordinator.register(event.id, &request).await.unwrap();
    h.coordinator.unregister(event.id, &first.identity).await.unwrap();
    let second = h.coordinator.register(event.id, &request).await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(first.identity, second.identity);
    assert_eq!(h.registrations.registrations().len(), 2);
    assert_eq!(h.slots(&event), 1);
    h.assert_conserved(&event);
}

#[tokio::test]
async fn test_abandoned_register_still_settles_its_slot() {
    let h = Harness::new();
    let event = h.with_event(open_event(1));

    // The caller gives up while its reserve is stalled.
    h.plan.delay(StoreOp::DecrementSlots, Duration::from_millis(100));
    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        h.coordinator.register(event.id, &member_request()),
    )
    .await;
    assert!(abandoned.is_err());

    // Someone else takes the only slot in the meantime.
    h.plan.heal(StoreOp::DecrementSlots);
    let winner = h.coordinator.register(event.id, &member_request()).await.unwrap();

    // The abandoned register finishes on its own and revokes its row.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let active = h.coordinator.list_active_registrations(event.id).await.unwrap();
    assert_eq!(active, vec![winner]);
    assert_eq!(h.slots(&event), 0);
    assert!(h.repairs.pending_repairs().is_empty());
    h.assert_conserved(&event);
}

#[tokio::test]
async fn test_register_records_and_resolves_its_unsettled_marker() {
    let h = Harness::new();
    let event = h.with_event(open_event(2));

    let registration = h.coordinator.register(event.id, &member_request()).await.unwrap();

    let entries = h.repairs.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].0.repair,
        Repair::UnsettledRegistration {
            registration_id: registration.id,
            event_id: event.id,
        }
    );
    assert!(entries[0].1);
}

#[tokio::test]
async fn test_unreachable_repair_log_refuses_before_inserting() {
    let h = Harness::new();
    let event = h.with_event(open_event(2));
    h.plan.fail_next(StoreOp::RecordRepair, 1);

    let result = h.coordinator.register(event.id, &member_request()).await;

    assert!(matches!(result, Err(ReservationError::StoreUnavailable(_))));
    assert!(h.registrations.registrations().is_empty());
    assert_eq!(h.slots(&event), 2);
}

#[tokio::test]
async fn test_unverified_registration_stays_marked_unsettled() {
    let h = Harness::new();
    let event = h.with_event(open_event(2));
    let event_id = event.id;

    h.plan.delay(StoreOp::DecrementSlots, Duration::from_millis(50));
    let coordinator = Arc::clone(&h.coordinator);
    let task = tokio::spawn(async move { coordinator.register(event_id, &member_request()).await });

    // Past the fast-path check; the next lookup is the re-check after reserve.
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.plan.fail_next(StoreOp::FindActive, 1);
    let registration = task.await.unwrap().unwrap();

    assert_eq!(registration.status, RegistrationStatus::Confirmed);
    assert_eq!(
        h.repairs.pending_repairs(),
        vec![Repair::UnsettledRegistration {
            registration_id: registration.id,
            event_id,
        }]
    );

    // Young markers are left for their register to finish.
    let summary = h.reconciler.run_once().await.unwrap();
    assert_eq!((summary.processed, summary.skipped), (0, 1));
    h.assert_conserved(&event);
}

// ============================================================================
// Unregister
// ============================================================================

#[tokio::test]
async fn test_unregister_frees_the_slot() {
    let h = Harness::new();
    let event = h.with_event(open_event(1));
    let registration = h.coordinator.register(event.id, &member_request()).await.unwrap();
    assert_eq!(h.slots(&event), 0);

    let outcome = h
        .coordinator
        .unregister(event.id, &registration.identity)
        .await
        .unwrap();

    match outcome {
        UnregisterOutcome::Cancelled(cancelled) => {
            assert_eq!(cancelled.id, registration.id);
            assert_eq!(cancelled.status, RegistrationStatus::Cancelled);
        }
        UnregisterOutcome::AlreadyCancelled => panic!("expected a cancellation"),
    }
    assert_eq!(h.slots(&event), 1);

    // The freed slot is immediately usable.
    h.coordinator.register(event.id, &member_request()).await.unwrap();
    h.assert_conserved(&event);
}

#[tokio::test]
async fn test_unregister_twice_is_idempotent() {
    let h = Harness::new();
    let event = h.with_event(open_event(2));
    let registration = h.coordinator.register(event.id, &member_request()).await.unwrap();

    h.coordinator
        .unregister(event.id, &registration.identity)
        .await
        .unwrap();
    let again = h
        .coordinator
        .unregister(event.id, &registration.identity)
        .await
        .unwrap();

    assert_eq!(again, UnregisterOutcome::AlreadyCancelled);
    assert_eq!(h.slots(&event), 2);
}

#[tokio::test]
async fn test_unregister_without_registration() {
    let h = Harness::new();
    let event = h.with_event(open_event(2));
    let identity = RegistrantIdentity::Member {
        account_id: AccountId::new(),
    };

    let result = h.coordinator.unregister(event.id, &identity).await;

    assert_eq!(
        result,
        Err(ReservationError::NotRegistered {
            event_id: event.id,
            identity: identity.key(),
        })
    );
}

#[tokio::test]
async fn test_unregister_unknown_event() {
    let h = Harness::new();
    let identity = RegistrantIdentity::Member {
        account_id: AccountId::new(),
    };
    let missing = EventId::new();

    let result = h.coordinator.unregister(missing, &identity).await;
    assert_eq!(result, Err(ReservationError::EventNotFound(missing)));
}

#[tokio::test]
async fn test_unregister_pending_registration_is_invalid() {
    let h = Harness::new();
    let event = h.with_event(open_event(2));
    let mut pending = Registration::confirmed(
        event.id,
        RegistrantIdentity::Member {
            account_id: AccountId::new(),
        },
        test_clock().now(),
    );
    pending.status = RegistrationStatus::Pending;
    h.registrations.seed(pending.clone());

    let result = h.coordinator.unregister(event.id, &pending.identity).await;

    assert!(matches!(
        result,
        Err(ReservationError::InvalidTransition {
            from: Some(RegistrationStatus::Pending),
            ..
        })
    ));
    assert_eq!(h.slots(&event), 2);
}

#[tokio::test]
async fn test_unregister_request_for_guest() {
    let h = Harness::new();
    let event = h.with_event(open_event(2));
    h.coordinator.register(event.id, &guest_request(7)).await.unwrap();

    let outcome = h
        .coordinator
        .unregister_request(event.id, &guest_request(7))
        .await
        .unwrap();

    assert!(matches!(outcome, UnregisterOutcome::Cancelled(_)));
    assert_eq!(h.slots(&event), 2);
}

#[tokio::test]
async fn test_unregister_request_for_unknown_guest() {
    let h = Harness::new();
    let event = h.with_event(open_event(2));

    let result = h
        .coordinator
        .unregister_request(event.id, &guest_request(7))
        .await;

    assert_eq!(
        result,
        Err(ReservationError::NotRegistered {
            event_id: event.id,
            identity: IdentityKey::from_raw("guest:guest7@example.com"),
        })
    );
    // Looking a guest up never creates one.
    assert!(h.registrations.guests().is_empty());
}

#[tokio::test]
async fn test_failed_release_is_recorded_for_reconciliation() {
    let h = Harness::new();
    let event = h.with_event(open_event(1));
    let registration = h.coordinator.register(event.id, &member_request()).await.unwrap();

    h.plan.fail_always(StoreOp::IncrementSlots);
    let outcome = h
        .coordinator
        .unregister(event.id, &registration.identity)
        .await
        .unwrap();

    // The cancellation stands; only the counter lags behind.
    assert!(matches!(outcome, UnregisterOutcome::Cancelled(_)));
    assert_eq!(h.registrations.active_count(event.id), 0);
    assert_eq!(h.slots(&event), 0);
    assert_eq!(
        h.repairs.pending_repairs(),
        vec![Repair::ReconcileEvent { event_id: event.id }]
    );

    h.plan.heal_all();
    let summary = h.reconciler.run_once().await.unwrap();
    assert_eq!(summary.resolved, 1);
    assert_eq!(h.slots(&event), 1);
}

#[tokio::test]
async fn test_unregister_racing_an_inflight_register_leaves_no_drift() {
    let h = Harness::new();
    let event = h.with_event(open_event(3));
    let event_id = event.id;
    let request = member_request();
    let identity = RegistrantIdentity::Member {
        account_id: request.account_id.unwrap(),
    };

    // The register has inserted its row and is stalled on the reserve.
    h.plan.delay(StoreOp::DecrementSlots, Duration::from_millis(80));
    let coordinator = Arc::clone(&h.coordinator);
    let register = tokio::spawn(async move { coordinator.register(event_id, &request).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let outcome = h.coordinator.unregister(event_id, &identity).await.unwrap();
    assert!(matches!(outcome, UnregisterOutcome::Cancelled(_)));

    let registration = register.await.unwrap().unwrap();
    assert_eq!(registration.status, RegistrationStatus::Cancelled);
    assert_eq!(h.registrations.active_count(event_id), 0);

    // The slot taken for the cancelled row is owed back, and recorded as such.
    assert_eq!(h.slots(&event), 2);
    assert!(
        h.repairs
            .pending_repairs()
            .contains(&Repair::ReconcileEvent { event_id })
    );

    h.plan.heal_all();
    h.reconciler.run_once().await.unwrap();
    assert_eq!(h.slots(&event), 3);
    assert!(h.repairs.pending_repairs().is_empty());
}

#[tokio::test]
async fn test_release_with_nothing_to_give_back_is_recorded() {
    let h = Harness::new();
    let event = h.with_event(open_event(2));
    let registration = h.coordinator.register(event.id, &member_request()).await.unwrap();
    // The counter already claims every slot is free.
    h.events.corrupt_slots(event.id, 2);

    h.coordinator
        .unregister(event.id, &registration.identity)
        .await
        .unwrap();

    assert_eq!(
        h.repairs.pending_repairs(),
        vec![Repair::ReconcileEvent { event_id: event.id }]
    );
}

#[tokio::test]
async fn test_cancellation_frees_a_slot_for_the_next_registrant() {
    let h = Harness::new();
    let event = h.with_event(open_event(5));
    let a = h.coordinator.register(event.id, &member_request()).await.unwrap();
    h.events.corrupt_slots(event.id, 0);

    let refused = h.coordinator.register(event.id, &member_request()).await;
    assert_eq!(refused, Err(ReservationError::NoAvailableSlots(event.id)));

    h.coordinator.unregister(event.id, &a.identity).await.unwrap();
    assert_eq!(h.slots(&event), 1);

    let b = h.coordinator.register(event.id, &member_request()).await.unwrap();
    assert_eq!(b.status, RegistrationStatus::Confirmed);
    assert_eq!(h.slots(&event), 0);
}

// ============================================================================
// Admin
// ============================================================================

#[tokio::test]
async fn test_list_active_registrations_in_order() {
    let h = Harness::new();
    let event = h.with_event(open_event(5));

    let first = h.coordinator.register(event.id, &member_request()).await.unwrap();
    let second = h.coordinator.register(event.id, &guest_request(1)).await.unwrap();
    let third = h.coordinator.register(event.id, &member_request()).await.unwrap();
    h.coordinator.unregister(event.id, &second.identity).await.unwrap();

    let active = h.coordinator.list_active_registrations(event.id).await.unwrap();
    let ids: Vec<_> = active.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![first.id, third.id]);
}

#[tokio::test]
async fn test_capacity_cut_below_active_keeps_registrations() {
    let h = Harness::new();
    let event = h.with_event(open_event(3));
    let mut registrations = Vec::new();
    for _ in 0..3 {
        registrations.push(h.coordinator.register(event.id, &member_request()).await.unwrap());
    }

    let report = h.coordinator.update_capacity(event.id, 1).await.unwrap();

    assert!(report.clamped);
    assert_eq!(report.slots, 0);
    assert_eq!(report.active, 3);
    assert_eq!(h.registrations.active_count(event.id), 3);
    assert!(matches!(
        h.coordinator.register(event.id, &member_request()).await,
        Err(ReservationError::NoAvailableSlots(_))
    ));

    // Still overbooked after one cancellation: the slot stays closed.
    h.coordinator
        .unregister(event.id, &registrations[0].identity)
        .await
        .unwrap();
    assert_eq!(h.slots(&event), 0);
    assert!(matches!(
        h.coordinator.register(event.id, &member_request()).await,
        Err(ReservationError::NoAvailableSlots(_))
    ));

    // At capacity after the second one; reconciliation agrees the slot stays closed.
    h.coordinator
        .unregister(event.id, &registrations[1].identity)
        .await
        .unwrap();
    h.reconciler.run_once().await.unwrap();
    assert_eq!(h.slots(&event), 0);
    h.coordinator
        .unregister(event.id, &registrations[2].identity)
        .await
        .unwrap();
    assert_eq!(h.slots(&event), 1);
    h.assert_conserved(&event);
}

#[tokio::test]
async fn test_capacity_raise_opens_slots() {
    let h = Harness::new();
    let event = h.with_event(open_event(1));
    h.coordinator.register(event.id, &member_request()).await.unwrap();

    let report = h.coordinator.update_capacity(event.id, 4).await.unwrap();

    assert!(!report.clamped);
    assert_eq!(report.previous_slots, 0);
    assert_eq!(report.slots, 3);
    h.assert_conserved(&event);
}

#[tokio::test]
async fn test_zero_capacity_is_rejected() {
    let h = Harness::new();
    let event = h.with_event(open_event(1));

    let result = h.coordinator.update_capacity(event.id, 0).await;

    assert!(matches!(result, Err(ReservationError::InvalidCapacity(_))));
    assert_eq!(h.slots(&event), 1);
}

#[tokio::test]
async fn test_capacity_update_for_unknown_event() {
    let h = Harness::new();
    let missing = EventId::new();

    let result = h.coordinator.update_capacity(missing, 3).await;
    assert_eq!(result, Err(ReservationError::EventNotFound(missing)));
}
