//! Trade fee calculation
//!
//! Rates are exact decimals; fees are never computed in binary floating point.
//!
//! | side | maker  | taker  |
//! |------|--------|--------|
//! | BUY  | 0.10%  | 0.20%  |
//! | SELL | 0.15%  | 0.25%  |

use rust_decimal::Decimal;

use crate::error::{ExchangeError, Result};
use crate::models::OrderSide;

/// BUY maker rate (0.001)
pub const BUY_MAKER_FEE: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

/// BUY taker rate (0.002)
pub const BUY_TAKER_FEE: Decimal = Decimal::from_parts(2, 0, 0, false, 3);

/// SELL maker rate (0.0015)
pub const SELL_MAKER_FEE: Decimal = Decimal::from_parts(15, 0, 0, false, 4);

/// SELL taker rate (0.0025)
pub const SELL_TAKER_FEE: Decimal = Decimal::from_parts(25, 0, 0, false, 4);

/// Default platform fee on sell-with-address settlements (0.008)
pub const DEFAULT_PLATFORM_FEE: Decimal = Decimal::from_parts(8, 0, 0, false, 3);

/// Fee rate for an order by side and maker role
#[inline]
pub fn fee_rate(side: OrderSide, is_maker: bool) -> Decimal {
    match (side, is_maker) {
        (OrderSide::Buy, true) => BUY_MAKER_FEE,
        (OrderSide::Buy, false) => BUY_TAKER_FEE,
        (OrderSide::Sell, true) => SELL_MAKER_FEE,
        (OrderSide::Sell, false) => SELL_TAKER_FEE,
    }
}

/// `quantity * price`, rejected when it does not fit in a `Decimal`
pub fn notional(quantity: Decimal, price: Decimal) -> Result<Decimal> {
    quantity.checked_mul(price).ok_or_else(|| {
        ExchangeError::Validation(format!("{} x {} is out of range", quantity, price))
    })
}

fn apply_rate(value: Decimal, rate: Decimal) -> Result<Decimal> {
    value
        .checked_mul(rate)
        .map(|fee| fee.normalize())
        .ok_or_else(|| ExchangeError::Validation(format!("fee on {} is out of range", value)))
}

/// Fee owed on `quantity` units traded at `price`.
///
/// # Example
/// ```
/// use p2p_exchange::fee::trade_fee;
/// use p2p_exchange::models::OrderSide;
/// use rust_decimal::Decimal;
///
/// // 4 BTC at 100, BUY taker: 4 * 100 * 0.002 = 0.8
/// let fee = trade_fee(Decimal::from(4), Decimal::from(100), OrderSide::Buy, false).unwrap();
/// assert_eq!(fee, Decimal::new(8, 1));
/// ```
pub fn trade_fee(
    quantity: Decimal,
    price: Decimal,
    side: OrderSide,
    is_maker: bool,
) -> Result<Decimal> {
    apply_rate(notional(quantity, price)?, fee_rate(side, is_maker))
}

/// Platform fee for a direct sale: `quantity * price * rate`
pub fn platform_fee(quantity: Decimal, price: Decimal, rate: Decimal) -> Result<Decimal> {
    apply_rate(notional(quantity, price)?, rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rate_table() {
        assert_eq!(fee_rate(OrderSide::Buy, true), dec!(0.001));
        assert_eq!(fee_rate(OrderSide::Buy, false), dec!(0.002));
        assert_eq!(fee_rate(OrderSide::Sell, true), dec!(0.0015));
        assert_eq!(fee_rate(OrderSide::Sell, false), dec!(0.0025));
        assert_eq!(DEFAULT_PLATFORM_FEE, dec!(0.008));
    }

    #[test]
    fn test_trade_fee_is_exact() {
        assert_eq!(trade_fee(dec!(4), dec!(100), OrderSide::Buy, false).unwrap(), dec!(0.8));
        assert_eq!(trade_fee(dec!(4), dec!(100), OrderSide::Sell, true).unwrap(), dec!(0.6));
        // 0.1 * 0.3 would drift in f64
        assert_eq!(
            trade_fee(dec!(0.1), dec!(0.3), OrderSide::Sell, false).unwrap(),
            dec!(0.000075)
        );
    }

    #[test]
    fn test_zero_quantity_zero_fee() {
        assert_eq!(
            trade_fee(Decimal::ZERO, dec!(100), OrderSide::Buy, true).unwrap(),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_platform_fee() {
        assert_eq!(platform_fee(dec!(2), dec!(50), DEFAULT_PLATFORM_FEE).unwrap(), dec!(0.8));
    }

    #[test]
    fn test_no_overflow() {
        let huge = dec!(1000000000000000);
        assert!(matches!(notional(huge, huge), Err(ExchangeError::Validation(_))));
        assert!(matches!(
            trade_fee(huge, huge, OrderSide::Buy, false),
            Err(ExchangeError::Validation(_))
        ));
        assert!(platform_fee(huge, huge, DEFAULT_PLATFORM_FEE).is_err());
        assert_eq!(notional(Decimal::MAX, Decimal::ONE).unwrap(), Decimal::MAX);
    }
}
