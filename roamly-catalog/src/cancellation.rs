use chrono::{DateTime, Utc};
use roamly_core::{CancellationPolicy, PolicyTier};
use roamly_shared::money::{ratio, round_money};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const SECONDS_PER_DAY: i64 = 86_400;

/// Refund breakdown for one cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundCalculation {
    pub policy_tier: PolicyTier,
    pub policy_name: String,
    pub days_until_service: i64,
    pub total_paid: Decimal,
    pub refund_amount: Decimal,
    /// Portion of the payment the platform keeps.
    pub platform_fee: Decimal,
    /// 0 to 100.
    pub refund_percentage: Decimal,
    pub eligible_for_refund: bool,
    pub service_start: DateTime<Utc>,
    pub cancelled_at: DateTime<Utc>,
}

/// Maps (tier, days until service, amount paid) to a refund.
#[derive(Debug, Clone)]
pub struct CancellationPolicyEngine {
    partial_refund_ratio: Decimal,
}

impl CancellationPolicyEngine {
    pub fn new(partial_refund_ratio: Decimal) -> Self {
        Self {
            partial_refund_ratio,
        }
    }

    /// Whole days between the cancellation and the service start, floored.
    /// Negative once the service date has passed.
    pub fn days_until_service(service_start: DateTime<Utc>, at: DateTime<Utc>) -> i64 {
        (service_start - at).num_seconds().div_euclid(SECONDS_PER_DAY)
    }

    /// Share of the payment returned for `tier` at `days` before service.
    pub fn refund_fraction(&self, tier: &PolicyTier, days: i64) -> Decimal {
        let partial = self.partial_refund_ratio;
        match tier {
            PolicyTier::Flexible if days >= 1 => Decimal::ONE,
            PolicyTier::Flexible => Decimal::ZERO,
            PolicyTier::Moderate if days >= 7 => Decimal::ONE,
            PolicyTier::Moderate if days >= 1 => partial,
            PolicyTier::Moderate => Decimal::ZERO,
            PolicyTier::Strict if days >= 30 => Decimal::ONE,
            PolicyTier::Strict if days >= 7 => partial,
            PolicyTier::Strict => Decimal::ZERO,
            PolicyTier::NonRefundable => Decimal::ZERO,
            PolicyTier::Unrecognized(label) => {
                warn!(tier = %label, "Unknown cancellation policy tier, refunding nothing");
                Decimal::ZERO
            }
        }
    }

    /// Guest-initiated cancellation priced against the booking's policy snapshot.
    pub fn calculate(
        &self,
        policy: &CancellationPolicy,
        service_start: DateTime<Utc>,
        total_paid: Decimal,
        at: DateTime<Utc>,
    ) -> RefundCalculation {
        let days = Self::days_until_service(service_start, at);
        let fraction = self.refund_fraction(&policy.tier, days);
        let refund_amount = round_money(total_paid * fraction).min(total_paid);
        let calculation = build(policy, service_start, total_paid, refund_amount, days, at);

        info!(
            tier = %policy.tier,
            days_until_service = days,
            refund_percentage = %calculation.refund_percentage,
            refund_amount = %refund_amount,
            "Refund calculated"
        );
        calculation
    }

    /// Provider-initiated cancellation: always the full amount, whatever the tier.
    pub fn full_refund(
        &self,
        policy: &CancellationPolicy,
        service_start: DateTime<Utc>,
        total_paid: Decimal,
        at: DateTime<Utc>,
    ) -> RefundCalculation {
        self.settled(policy, service_start, total_paid, total_paid, at)
    }

    /// Breakdown for a refund whose amount is already fixed, such as money
    /// the gateway returned on an earlier attempt. Capped at `total_paid`.
    pub fn settled(
        &self,
        policy: &CancellationPolicy,
        service_start: DateTime<Utc>,
        total_paid: Decimal,
        refund_amount: Decimal,
        at: DateTime<Utc>,
    ) -> RefundCalculation {
        let days = Self::days_until_service(service_start, at);
        build(policy, service_start, total_paid, refund_amount.min(total_paid), days, at)
    }
}

fn build(
    policy: &CancellationPolicy,
    service_start: DateTime<Utc>,
    total_paid: Decimal,
    refund_amount: Decimal,
    days: i64,
    at: DateTime<Utc>,
) -> RefundCalculation {
    RefundCalculation {
        policy_tier: policy.tier.clone(),
        policy_name: policy.name.clone(),
        days_until_service: days,
        total_paid,
        refund_amount,
        platform_fee: total_paid - refund_amount,
        refund_percentage: round_money(ratio(refund_amount, total_paid) * Decimal::ONE_HUNDRED),
        eligible_for_refund: refund_amount > Decimal::ZERO,
        service_start,
        cancelled_at: at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn engine() -> CancellationPolicyEngine {
        CancellationPolicyEngine::new(dec!(0.5))
    }

    fn service_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 20, 0, 0, 0).unwrap()
    }

    fn policy(tier: PolicyTier) -> CancellationPolicy {
        CancellationPolicy::new(tier, "test policy")
    }

    #[test]
    fn test_flexible_two_days_out_is_full_refund() {
        let start = service_start();
        let calc = engine().calculate(
            &policy(PolicyTier::Flexible),
            start,
            dec!(200),
            start - Duration::days(2),
        );
        assert_eq!(calc.refund_amount, dec!(200));
        assert_eq!(calc.platform_fee, dec!(0));
        assert_eq!(calc.refund_percentage, dec!(100));
        assert!(calc.eligible_for_refund);
    }

    #[test]
    fn test_moderate_three_days_out_is_half() {
        let start = service_start();
        let calc = engine().calculate(
            &policy(PolicyTier::Moderate),
            start,
            dec!(300),
            start - Duration::days(3),
        );
        assert_eq!(calc.refund_amount, dec!(150));
        assert_eq!(calc.platform_fee, dec!(150));
        assert_eq!(calc.refund_percentage, dec!(50));
    }

    #[test]
    fn test_strict_windows() {
        let e = engine();
        assert_eq!(e.refund_fraction(&PolicyTier::Strict, 30), Decimal::ONE);
        assert_eq!(e.refund_fraction(&PolicyTier::Strict, 29), dec!(0.5));
        assert_eq!(e.refund_fraction(&PolicyTier::Strict, 7), dec!(0.5));
        assert_eq!(e.refund_fraction(&PolicyTier::Strict, 6), Decimal::ZERO);
    }

    #[test]
    fn test_non_refundable_and_unknown_tiers_refund_nothing() {
        let start = service_start();
        let early = start - Duration::days(90);
        for tier in [PolicyTier::NonRefundable, PolicyTier::from("SUPER_FLEX")] {
            let calc = engine().calculate(&policy(tier), start, dec!(500), early);
            assert_eq!(calc.refund_amount, Decimal::ZERO);
            assert_eq!(calc.platform_fee, dec!(500));
            assert!(!calc.eligible_for_refund);
        }
    }

    #[test]
    fn test_provider_refund_ignores_tier() {
        let start = service_start();
        let calc = engine().full_refund(
            &policy(PolicyTier::NonRefundable),
            start,
            dec!(500),
            start - Duration::hours(3),
        );
        assert_eq!(calc.refund_amount, dec!(500));
        assert_eq!(calc.platform_fee, Decimal::ZERO);
    }

    #[test]
    fn test_days_are_floored() {
        let start = service_start();
        let just_under_a_day = start - Duration::hours(23);
        assert_eq!(CancellationPolicyEngine::days_until_service(start, just_under_a_day), 0);
        let after_start = start + Duration::hours(1);
        assert_eq!(CancellationPolicyEngine::days_until_service(start, after_start), -1);
    }

    #[test]
    fn test_settled_keeps_the_given_amount() {
        let start = service_start();
        let calc = engine().settled(
            &policy(PolicyTier::Moderate),
            start,
            dec!(300),
            dec!(300),
            start - Duration::days(3),
        );
        assert_eq!(calc.refund_amount, dec!(300));
        assert_eq!(calc.platform_fee, Decimal::ZERO);
        assert_eq!(calc.days_until_service, 3);

        let capped = engine().settled(
            &policy(PolicyTier::Strict),
            start,
            dec!(100),
            dec!(120),
            start - Duration::days(40),
        );
        assert_eq!(capped.refund_amount, dec!(100));
    }

    #[test]
    fn test_partial_ratio_is_injected() {
        let engine = CancellationPolicyEngine::new(dec!(0.25));
        assert_eq!(engine.refund_fraction(&PolicyTier::Moderate, 3), dec!(0.25));
    }

    fn tier_strategy() -> impl Strategy<Value = PolicyTier> {
        prop_oneof![
            Just(PolicyTier::Flexible),
            Just(PolicyTier::Moderate),
            Just(PolicyTier::Strict),
            Just(PolicyTier::NonRefundable),
        ]
    }

    proptest! {
        #[test]
        fn refund_never_shrinks_as_notice_grows(
            tier in tier_strategy(),
            cents in 0i64..10_000_000,
            hours_a in -48i64..2_000,
            hours_b in -48i64..2_000,
        ) {
            let start = service_start();
            let total = Decimal::new(cents, 2);
            let (near, far) = if hours_a <= hours_b { (hours_a, hours_b) } else { (hours_b, hours_a) };
            let e = engine();
            let p = policy(tier);
            let close = e.calculate(&p, start, total, start - Duration::hours(near));
            let early = e.calculate(&p, start, total, start - Duration::hours(far));
            prop_assert!(early.refund_amount >= close.refund_amount);
            prop_assert!(early.refund_amount <= total);
            prop_assert_eq!(close.refund_amount + close.platform_fee, total);
        }
    }
}
