use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::str::FromStr;
use thiserror::Error;

/// Fixed-point decimal with 4 decimal places, stored as a scaled integer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(i64);

/// Error returned when a decimal string is not a valid [`Amount`].
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid amount '{0}'")]
pub struct AmountParseError(pub String);

impl Amount {
    const SCALE: i64 = 10_000;
    const DECIMALS: usize = 4;

    pub const ZERO: Amount = Amount(0);

    pub fn from_scaled(value: i64) -> Self {
        Amount(value)
    }

    /// Whole units, e.g. `Amount::from_units(500)` is `500.0000`.
    pub fn from_units(units: i64) -> Self {
        Amount(units * Self::SCALE)
    }

    pub fn scaled(self) -> i64 {
        self.0
    }

    /// `None` on overflow.
    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Round half away from zero to hundredths, returned as a count of cents.
    pub fn to_cents(self) -> i64 {
        let per_cent = Self::SCALE / 100;
        let rem = self.0 % per_cent;
        let base = self.0 / per_cent;
        if rem.abs() * 2 >= per_cent {
            base + self.0.signum()
        } else {
            base
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        let whole = abs / Self::SCALE;
        let frac = abs % Self::SCALE;
        write!(f, "{sign}{whole}.{frac:04}")
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AmountParseError(s.to_string());
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if frac.len() > Self::DECIMALS
            || !whole.bytes().all(|b| b.is_ascii_digit())
            || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let mut frac_scaled: i64 = if frac.is_empty() {
            0
        } else {
            frac.parse().map_err(|_| invalid())?
        };
        for _ in frac.len()..Self::DECIMALS {
            frac_scaled *= 10;
        }

        let value = whole
            .checked_mul(Self::SCALE)
            .and_then(|w| w.checked_add(frac_scaled))
            .ok_or_else(invalid)?;
        Ok(Amount(if negative { -value } else { value }))
    }
}

// Plain operators saturate at the `i64` bounds.
impl std::ops::Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::Sub for Amount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Amount(self.0.saturating_sub(rhs.0))
    }
}

impl std::ops::AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl std::ops::SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_sub(rhs.0);
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, |acc, a| acc + a)
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_scaled_preserves_value() {
        let amount = Amount::from_scaled(123456);
        assert_eq!(amount, Amount(123456));
    }

    #[test]
    fn checked_arithmetic_reports_overflow() {
        let big: Amount = "500000000000000".parse().unwrap();
        assert_eq!(big.checked_add(Amount::from_units(1)), Some(big + Amount::from_units(1)));
        assert_eq!(big.checked_add(big), None);
        assert_eq!(Amount::ZERO.checked_sub(big), Some(Amount::from_scaled(-big.scaled())));
    }

    #[test]
    fn plain_arithmetic_saturates() {
        let big: Amount = "500000000000000".parse().unwrap();
        assert_eq!(big + big, Amount::from_scaled(i64::MAX));
        assert_eq!([big, big, big].iter().sum::<Amount>(), Amount::from_scaled(i64::MAX));
        let mut total = Amount::from_scaled(i64::MIN);
        total -= big;
        assert_eq!(total, Amount::from_scaled(i64::MIN));
    }

    #[test]
    fn from_units_scales() {
        assert_eq!(Amount::from_units(500), Amount::from_scaled(5_000_000));
    }

    #[test]
    fn parse_exact_decimals() {
        assert_eq!("500".parse::<Amount>(), Ok(Amount::from_units(500)));
        assert_eq!("500.00".parse::<Amount>(), Ok(Amount::from_units(500)));
        assert_eq!("0.0001".parse::<Amount>(), Ok(Amount::from_scaled(1)));
        assert_eq!(" 12.5 ".parse::<Amount>(), Ok(Amount::from_scaled(125_000)));
        assert_eq!(".5".parse::<Amount>(), Ok(Amount::from_scaled(5_000)));
        assert_eq!("-3.25".parse::<Amount>(), Ok(Amount::from_scaled(-32_500)));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("".parse::<Amount>().is_err());
        assert!(".".parse::<Amount>().is_err());
        assert!("1.23456".parse::<Amount>().is_err());
        assert!("12a".parse::<Amount>().is_err());
        assert!("1.2.3".parse::<Amount>().is_err());
        assert!("99999999999999999999".parse::<Amount>().is_err());
    }

    #[test]
    fn display_formats() {
        assert_eq!(Amount::from_scaled(1_000_000).to_string(), "100.0000");
        assert_eq!(Amount::from_scaled(1).to_string(), "0.0001");
        assert_eq!(Amount::from_scaled(-502_500).to_string(), "-50.2500");
        assert_eq!(Amount::default().to_string(), "0.0000");
    }

    #[test]
    fn to_cents_rounds_half_away_from_zero() {
        assert_eq!(Amount::from_scaled(12_345).to_cents(), 123);
        assert_eq!(Amount::from_scaled(12_350).to_cents(), 124);
        assert_eq!(Amount::from_scaled(-12_350).to_cents(), -124);
        assert_eq!(Amount::from_units(5).to_cents(), 500);
    }

    #[test]
    fn arithmetic() {
        let mut a = Amount::from_scaled(100);
        a += Amount::from_scaled(50);
        assert_eq!(a, Amount::from_scaled(150));
        a -= Amount::from_scaled(30);
        assert_eq!(a, Amount::from_scaled(120));
        assert_eq!(a - Amount::from_scaled(200), Amount::from_scaled(-80));
        assert!((a - Amount::from_scaled(200)).is_negative());
        assert!(a.is_positive());
    }

    #[test]
    fn sums() {
        let amounts = [Amount::from_units(1), Amount::from_units(2), Amount::from_units(3)];
        assert_eq!(amounts.iter().sum::<Amount>(), Amount::from_units(6));
        assert_eq!(amounts.into_iter().sum::<Amount>(), Amount::from_units(6));
    }

    #[test]
    fn serializes_as_scaled_integer() {
        let json = serde_json::to_string(&Amount::from_units(2)).unwrap();
        assert_eq!(json, "20000");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Amount::from_units(2));
    }
}
