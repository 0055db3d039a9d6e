mod common;

use chrono::{Duration, NaiveDate};
use common::{t0, Harness};
use roamly_core::{
    Account, BookedItem, BookingError, BookingStatus, BookingStore, EntryType, LedgerQuery,
    PaymentStatus, PolicyTier,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn departure() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 4, 15).unwrap()
}

fn days_before_departure(days: i64) -> chrono::DateTime<chrono::Utc> {
    BookedItem::Tour(roamly_core::TourSeats {
        package_id: Uuid::nil(),
        departure_date: departure(),
        seats: 1,
    })
    .service_start()
        - Duration::days(days)
}

#[tokio::test]
async fn test_flexible_guest_cancel_two_days_out_refunds_everything() {
    let h = Harness::new(PolicyTier::Flexible);
    let booking = h.confirmed_tour(departure(), 2).await;
    assert_eq!(booking.total_price, dec!(200));

    let cancelled = h
        .machine
        .cancel_by_guest(booking.id, h.guest, days_before_departure(2))
        .await
        .unwrap();
    assert_eq!(cancelled.booking.status, BookingStatus::CancelledByGuest);
    assert_eq!(cancelled.booking.cancelled_at, Some(days_before_departure(2)));
    assert_eq!(cancelled.refund.refund_amount, dec!(200));
    assert_eq!(cancelled.refund.platform_fee, Decimal::ZERO);
    assert_eq!(cancelled.refund.days_until_service, 2);

    let accounting = h.machine.accounting();
    assert_eq!(accounting.provider_earnings(h.provider).await.unwrap(), Decimal::ZERO);
    assert_eq!(accounting.platform_revenue().await.unwrap(), Decimal::ZERO);
    assert_eq!(
        accounting.get_account_balance(&Account::Traveler(h.guest)).await.unwrap(),
        Decimal::ZERO
    );
    let payment = h.store.get_payment(booking.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);
}

#[tokio::test]
async fn test_moderate_guest_cancel_three_days_out_refunds_half() {
    let h = Harness::new(PolicyTier::Moderate);
    let booking = h.confirmed_tour(departure(), 3).await;
    assert_eq!(booking.total_price, dec!(300));

    let cancelled = h
        .machine
        .cancel_by_guest(booking.id, h.guest, days_before_departure(3))
        .await
        .unwrap();
    assert_eq!(cancelled.refund.refund_amount, dec!(150));
    assert_eq!(cancelled.refund.platform_fee, dec!(150));
    assert_eq!(cancelled.refund.refund_percentage, dec!(50));

    let accounting = h.machine.accounting();
    // Confirmation 255 / 45, half reversed
    assert_eq!(accounting.provider_earnings(h.provider).await.unwrap(), dec!(127.50));
    assert_eq!(accounting.platform_revenue().await.unwrap(), dec!(22.50));
    assert_eq!(
        accounting.get_account_balance(&Account::Traveler(h.guest)).await.unwrap(),
        dec!(-150)
    );
    assert_eq!(
        accounting.get_account_balance(&Account::PlatformEscrow).await.unwrap(),
        Decimal::ZERO
    );

    let refunds = accounting
        .entries_for_account(
            &LedgerQuery::for_account(Account::Provider(h.provider))
                .with_type(EntryType::RefundProcessed),
        )
        .await
        .unwrap();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount, dec!(127.50));
    let fraction: Decimal = refunds[0].metadata["refund_fraction"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(fraction, dec!(0.5));

    let payment = h.store.get_payment(booking.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::PartiallyRefunded);
    assert_eq!(h.gateway.refunds().len(), 1);
}

#[tokio::test]
async fn test_provider_cancel_of_non_refundable_returns_everything() {
    let h = Harness::new(PolicyTier::NonRefundable);
    let booking = h.confirmed_tour(departure(), 5).await;
    assert_eq!(booking.total_price, dec!(500));

    let cancelled = h
        .machine
        .cancel_by_provider(booking.id, h.provider, days_before_departure(1))
        .await
        .unwrap();
    assert_eq!(cancelled.booking.status, BookingStatus::CancelledByProvider);
    assert_eq!(cancelled.refund.refund_amount, dec!(500));
    assert!(cancelled.refund.eligible_for_refund);
    assert_eq!(h.machine.accounting().platform_revenue().await.unwrap(), Decimal::ZERO);
}

#[tokio::test]
async fn test_non_refundable_guest_cancel_posts_no_reversal() {
    let h = Harness::new(PolicyTier::NonRefundable);
    let booking = h.confirmed_tour(departure(), 2).await;

    let cancelled = h
        .machine
        .cancel_by_guest(booking.id, h.guest, days_before_departure(20))
        .await
        .unwrap();
    assert_eq!(cancelled.booking.status, BookingStatus::CancelledByGuest);
    assert_eq!(cancelled.refund.refund_amount, Decimal::ZERO);
    assert!(!cancelled.refund.eligible_for_refund);
    assert!(h.gateway.refunds().is_empty());
    assert_eq!(
        h.machine.accounting().entries_for_booking(booking.id).await.unwrap().len(),
        3
    );
    assert_eq!(h.machine.accounting().provider_earnings(h.provider).await.unwrap(), dec!(170));
}

#[tokio::test]
async fn test_cancel_requires_the_right_party() {
    let h = Harness::new(PolicyTier::Flexible);
    let booking = h.confirmed_tour(departure(), 2).await;

    assert!(matches!(
        h.machine
            .cancel_by_guest(booking.id, h.provider, days_before_departure(5))
            .await,
        Err(BookingError::OwnershipViolation { .. })
    ));
    assert!(matches!(
        h.machine
            .cancel_by_provider(booking.id, h.guest, days_before_departure(5))
            .await,
        Err(BookingError::OwnershipViolation { .. })
    ));
    assert_eq!(
        h.machine.get_booking(booking.id).await.unwrap().status,
        BookingStatus::Confirmed
    );
}

#[tokio::test]
async fn test_cancel_requires_confirmed() {
    let h = Harness::new(PolicyTier::Flexible);
    let package_id = Uuid::new_v4();
    h.provision_departure(package_id, departure(), 10).await;
    let quote = h
        .machine
        .create_quote(h.guest, h.tour_request(package_id, departure(), 2), t0())
        .await
        .unwrap();
    h.machine.create_hold(h.guest, quote.booking.id, t0()).await.unwrap();

    let err = h
        .machine
        .cancel_by_guest(quote.booking.id, h.guest, t0())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BookingError::StateConflict {
            expected: BookingStatus::Confirmed,
            actual: BookingStatus::Hold,
            ..
        }
    ));

    let cancelled = h.confirmed_tour(departure(), 1).await;
    h.machine
        .cancel_by_guest(cancelled.id, h.guest, days_before_departure(3))
        .await
        .unwrap();
    assert!(matches!(
        h.machine
            .cancel_by_provider(cancelled.id, h.provider, days_before_departure(3))
            .await,
        Err(BookingError::StateConflict {
            actual: BookingStatus::CancelledByGuest,
            ..
        })
    ));
}

#[tokio::test]
async fn test_cancellation_keeps_inventory_consumed() {
    let h = Harness::new(PolicyTier::Flexible);
    let package_id = Uuid::new_v4();
    let key = h.provision_departure(package_id, departure(), 10).await;
    let quote = h
        .machine
        .create_quote(h.guest, h.tour_request(package_id, departure(), 4), t0())
        .await
        .unwrap();
    let id = quote.booking.id;
    h.machine.create_hold(h.guest, id, t0()).await.unwrap();
    h.machine
        .authorize_payment(id, h.guest, common::visa(), t0())
        .await
        .unwrap();
    h.machine.confirm_booking(id, t0()).await.unwrap();

    h.machine
        .cancel_by_guest(id, h.guest, days_before_departure(10))
        .await
        .unwrap();
    assert_eq!(h.store.unit(&key).await.unwrap().available_units, 6);
}

#[tokio::test]
async fn test_refund_outage_leaves_booking_confirmed() {
    let h = Harness::new(PolicyTier::Flexible);
    let booking = h.confirmed_tour(departure(), 2).await;

    h.gateway.set_refund_outage(true);
    let err = h
        .machine
        .cancel_by_guest(booking.id, h.guest, days_before_departure(4))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(
        h.machine.get_booking(booking.id).await.unwrap().status,
        BookingStatus::Confirmed
    );
    assert_eq!(
        h.store
            .ledger_entries(&LedgerQuery::for_booking(booking.id))
            .await
            .unwrap()
            .len(),
        3
    );

    h.gateway.set_refund_outage(false);
    h.machine
        .cancel_by_guest(booking.id, h.guest, days_before_departure(4))
        .await
        .unwrap();
    assert_eq!(h.gateway.refunds().len(), 1);
}

#[tokio::test]
async fn test_retried_cancel_posts_what_the_gateway_refunded() {
    let h = Harness::new(PolicyTier::Moderate);
    let booking = h.confirmed_tour(departure(), 3).await;

    // Ten days out the refund is full; the posting then fails
    h.faults.fail_next_refund();
    let err = h
        .machine
        .cancel_by_guest(booking.id, h.guest, days_before_departure(10))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Store(_)));
    assert!(err.is_retryable());
    assert_eq!(
        h.machine.get_booking(booking.id).await.unwrap().status,
        BookingStatus::Confirmed
    );
    let payment = h.store.get_payment(booking.id).await.unwrap().unwrap();
    assert_eq!(payment.refunded_amount, dec!(300));
    assert_eq!(payment.status, PaymentStatus::Refunded);

    // By the retry the policy would only return half
    let cancelled = h
        .machine
        .cancel_by_guest(booking.id, h.guest, days_before_departure(3))
        .await
        .unwrap();
    assert_eq!(cancelled.booking.status, BookingStatus::CancelledByGuest);
    assert_eq!(cancelled.refund.refund_amount, dec!(300));
    assert_eq!(cancelled.refund.platform_fee, Decimal::ZERO);
    assert_eq!(h.gateway.refunds().len(), 1);

    let accounting = h.machine.accounting();
    assert_eq!(
        accounting.get_account_balance(&Account::Traveler(h.guest)).await.unwrap(),
        Decimal::ZERO
    );
    assert_eq!(accounting.provider_earnings(h.provider).await.unwrap(), Decimal::ZERO);
    assert_eq!(accounting.platform_revenue().await.unwrap(), Decimal::ZERO);
    assert_eq!(
        accounting.get_account_balance(&Account::PlatformEscrow).await.unwrap(),
        Decimal::ZERO
    );
}

#[tokio::test]
async fn test_retried_partial_cancel_refunds_once() {
    let h = Harness::new(PolicyTier::Moderate);
    let booking = h.confirmed_tour(departure(), 3).await;

    h.faults.fail_next_refund();
    assert!(h
        .machine
        .cancel_by_guest(booking.id, h.guest, days_before_departure(3))
        .await
        .is_err());

    let cancelled = h
        .machine
        .cancel_by_guest(booking.id, h.guest, days_before_departure(3))
        .await
        .unwrap();
    assert_eq!(cancelled.refund.refund_amount, dec!(150));
    assert_eq!(h.gateway.refunds().len(), 1);
    assert_eq!(
        h.machine
            .accounting()
            .get_account_balance(&Account::Traveler(h.guest))
            .await
            .unwrap(),
        dec!(-150)
    );
    assert_eq!(
        h.machine.accounting().entries_for_booking(booking.id).await.unwrap().len(),
        6
    );
}
