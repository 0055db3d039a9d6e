use rust_decimal::prelude::RoundingStrategy;
use rust_decimal::Decimal;

/// Minor-unit precision for every stored amount.
pub const MONEY_SCALE: u32 = 2;

/// Round to the ledger's money precision, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `part / whole`, or zero when `whole` is zero.
pub fn ratio(part: Decimal, whole: Decimal) -> Decimal {
    if whole.is_zero() {
        Decimal::ZERO
    } else {
        part / whole
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_money_half_away_from_zero() {
        assert_eq!(round_money(dec!(10.005)), dec!(10.01));
        assert_eq!(round_money(dec!(10.004)), dec!(10.00));
        assert_eq!(round_money(dec!(-0.125)), dec!(-0.13));
    }

    #[test]
    fn test_ratio_of_zero_whole() {
        assert_eq!(ratio(dec!(5), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(ratio(dec!(150), dec!(300)), dec!(0.5));
    }
}
