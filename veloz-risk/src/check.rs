use derive_more::Constructor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use veloz_instrument::Side;

/// General interface for implementing simple risk checks.
///
/// See [`CheckHigherThan`] for a simple example.
pub trait RiskCheck {
    type Input;
    type Error;

    /// Returns the name of the risk check.
    fn name() -> &'static str;

    /// Performs the risk check on the provided `Input`.
    fn check(&self, input: &Self::Input) -> Result<(), Self::Error>;
}

/// General risk check that validates if an input value exceeds an upper limit.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize, Constructor)]
pub struct CheckHigherThan<T> {
    /// The upper limit value; check passes if input is <= limit.
    pub limit: T,
}

impl<T> RiskCheck for CheckHigherThan<T>
where
    T: Clone + PartialOrd,
{
    type Input = T;
    type Error = CheckFailHigherThan<T>;

    fn name() -> &'static str {
        "CheckHigherThan"
    }

    fn check(&self, input: &Self::Input) -> Result<(), Self::Error> {
        if *input <= self.limit {
            Ok(())
        } else {
            Err(CheckFailHigherThan {
                limit: self.limit.clone(),
                input: input.clone(),
            })
        }
    }
}

/// Error returned when a [`CheckHigherThan`] validation fails.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize, Constructor, Error,
)]
#[error("CheckHigherThanFailed: input {input} > limit {limit}")]
pub struct CheckFailHigherThan<T> {
    /// The limit value that was exceeded.
    pub limit: T,

    /// The input value that caused the check to fail.
    pub input: T,
}

/// Calculates the notional value in quote asset given the quantity, price and contract
/// multiplier.
///
/// Returns None if overflow has occurred.
pub fn calculate_quote_notional(
    quantity: Decimal,
    price: Decimal,
    contract_multiplier: Decimal,
) -> Option<Decimal> {
    quantity.checked_mul(price)?.checked_mul(contract_multiplier)
}

/// Calculates the absolute fractional difference between two values (eg/ prices).
///
/// Returns a `Decimal` representing the fraction (eg/ 0.05 for a 5% difference). Will be
/// None if overflow has occurred or `other` is zero.
pub fn calculate_abs_percent_difference(current: Decimal, other: Decimal) -> Option<Decimal> {
    let diff = current.checked_sub(other)?.abs();
    diff.checked_div(other.abs())
}

/// Signed position delta of a quantity on the given side.
pub fn signed_quantity(side: Side, quantity: Decimal) -> Decimal {
    match side {
        Side::Buy => quantity,
        Side::Sell => -quantity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_check_higher_than() {
        let check = CheckHigherThan::new(dec!(10));

        assert!(check.check(&dec!(10)).is_ok());
        assert!(check.check(&dec!(9.99)).is_ok());
        assert_eq!(
            check.check(&dec!(10.01)),
            Err(CheckFailHigherThan::new(dec!(10), dec!(10.01)))
        );
    }

    #[test]
    fn test_abs_percent_difference() {
        struct TestCase {
            current: Decimal,
            other: Decimal,
            expected: Option<Decimal>,
        }

        let tests = vec![
            TestCase {
                // TC0: 5% above
                current: dec!(105),
                other: dec!(100),
                expected: Some(dec!(0.05)),
            },
            TestCase {
                // TC1: 5% below is the same absolute fraction
                current: dec!(95),
                other: dec!(100),
                expected: Some(dec!(0.05)),
            },
            TestCase {
                // TC2: division by zero
                current: dec!(95),
                other: dec!(0),
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(
                calculate_abs_percent_difference(test.current, test.other),
                test.expected,
                "TC{index} failed"
            );
        }
    }
}
