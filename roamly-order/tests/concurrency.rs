mod common;

use chrono::Duration;
use common::{date, t0, Harness};
use roamly_core::{BookingError, BookingStatus, PolicyTier};
use roamly_order::{HoldExpirationSweeper, HoldReleaser};
use roamly_shared::ManualClock;
use std::sync::Arc;
use uuid::Uuid;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_holds_never_oversell() {
    let h = Arc::new(Harness::new(PolicyTier::Moderate));
    let package_id = Uuid::new_v4();
    let departure = date(2025, 6, 20);
    let key = h.provision_departure(package_id, departure, 10).await;

    let mut quotes = Vec::new();
    for _ in 0..20 {
        let receipt = h
            .machine
            .create_quote(h.guest, h.tour_request(package_id, departure, 3), t0())
            .await
            .unwrap();
        quotes.push(receipt.booking.id);
    }

    let mut handles = Vec::new();
    for id in quotes {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            h.machine.create_hold(h.guest, id, t0()).await
        }));
    }

    let mut held = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(booking) => {
                assert_eq!(booking.status, BookingStatus::Hold);
                held += 1;
            }
            Err(BookingError::InsufficientInventory { requested, .. }) => {
                assert_eq!(requested, 3);
                refused += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(held, 3);
    assert_eq!(refused, 17);
    assert_eq!(h.store.unit(&key).await.unwrap().available_units, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sweeper_and_authorization_race_has_one_winner() {
    let h = Harness::new(PolicyTier::Flexible);
    let package_id = Uuid::new_v4();
    let departure = date(2025, 7, 1);
    let key = h.provision_departure(package_id, departure, 10).await;

    let quote = h
        .machine
        .create_quote(h.guest, h.tour_request(package_id, departure, 2), t0())
        .await
        .unwrap();
    let id = quote.booking.id;
    h.machine.create_hold(h.guest, id, t0()).await.unwrap();

    // Exactly at expiry the hold is already dead for both sides
    let at_expiry = t0() + Duration::minutes(10);
    let releaser: Arc<dyn HoldReleaser> = h.machine.clone();
    let sweeper = HoldExpirationSweeper::new(
        releaser,
        Arc::new(h.store.clone()),
        Arc::new(ManualClock::new(at_expiry + Duration::seconds(1))),
        std::time::Duration::from_secs(60),
    );

    let machine = h.machine.clone();
    let guest = h.guest;
    let authorize = tokio::spawn(async move {
        machine
            .authorize_payment(id, guest, common::visa(), at_expiry)
            .await
    });
    let sweep = tokio::spawn(async move { sweeper.sweep_once().await });

    let authorized = authorize.await.unwrap();
    let report = sweep.await.unwrap().unwrap();

    // Depending on who reads first: an expired hold, or one already released
    assert!(matches!(
        authorized,
        Err(BookingError::ExpiredHold(_))
            | Err(BookingError::StateConflict {
                actual: BookingStatus::ExpiredHold,
                ..
            })
    ));
    assert_eq!(report.released, 1);
    assert_eq!(
        h.machine.get_booking(id).await.unwrap().status,
        BookingStatus::ExpiredHold
    );
    assert_eq!(h.store.unit(&key).await.unwrap().available_units, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_confirms_post_ledger_once() {
    let h = Arc::new(Harness::new(PolicyTier::Strict));
    let package_id = Uuid::new_v4();
    let departure = date(2025, 8, 10);
    h.provision_departure(package_id, departure, 10).await;

    let quote = h
        .machine
        .create_quote(h.guest, h.tour_request(package_id, departure, 2), t0())
        .await
        .unwrap();
    let id = quote.booking.id;
    h.machine.create_hold(h.guest, id, t0()).await.unwrap();
    h.machine
        .authorize_payment(id, h.guest, common::visa(), t0())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            h.machine.confirm_booking(id, t0() + Duration::minutes(1)).await
        }));
    }
    let mut confirmed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => confirmed += 1,
            Err(BookingError::StateConflict { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(confirmed, 1);
    assert_eq!(
        h.machine.accounting().entries_for_booking(id).await.unwrap().len(),
        3
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_authorizations_losers_are_not_retryable() {
    let h = Arc::new(Harness::new(PolicyTier::Flexible));
    let package_id = Uuid::new_v4();
    let departure = date(2025, 9, 12);
    h.provision_departure(package_id, departure, 10).await;

    let quote = h
        .machine
        .create_quote(h.guest, h.tour_request(package_id, departure, 2), t0())
        .await
        .unwrap();
    let id = quote.booking.id;
    h.machine.create_hold(h.guest, id, t0()).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            h.machine
                .authorize_payment(id, h.guest, common::visa(), t0() + Duration::minutes(1))
                .await
        }));
    }

    let mut authorized = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => authorized += 1,
            Err(err) => {
                // Either lost at the payment insert or read the booking after the winner
                assert!(
                    matches!(
                        err,
                        BookingError::Validation(_)
                            | BookingError::StateConflict {
                                actual: BookingStatus::PaymentPending,
                                ..
                            }
                    ),
                    "unexpected error: {err}"
                );
                assert!(!err.is_retryable());
            }
        }
    }

    assert_eq!(authorized, 1);
    assert_eq!(
        h.machine.get_booking(id).await.unwrap().status,
        BookingStatus::PaymentPending
    );
}
