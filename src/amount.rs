//! Exact wei arithmetic.
//!
//! Every amount crossing the service boundary is a base-unit (wei) integer
//! encoded as a decimal string.  Wei values routinely exceed the 53-bit
//! range that survives a round-trip through an f64, so all arithmetic goes
//! through [`BigUint`] and nothing is ever parsed as a float.

use std::fmt;

use num_bigint::BigUint;

use crate::errors::{LedgerError, Result};

/// A non-negative on-chain amount in the smallest native unit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Amount(BigUint);

impl Amount {
    /// Parse a base-10 string, e.g. `"1000000000000000000"`.
    pub fn from_dec_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(LedgerError::Amount("empty amount".to_string()));
        }
        trimmed
            .parse::<BigUint>()
            .map(Amount)
            .map_err(|_| LedgerError::Amount(format!("not a decimal integer: {s:?}")))
    }

    /// Parse a JSON-RPC hex quantity, e.g. `"0xde0b6b3a7640000"`.
    pub fn from_hex_quantity(s: &str) -> Result<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        if digits.is_empty() {
            return Err(LedgerError::Amount(format!("empty hex quantity: {s:?}")));
        }
        BigUint::parse_bytes(digits.as_bytes(), 16)
            .map(Amount)
            .ok_or_else(|| LedgerError::Amount(format!("not a hex quantity: {s:?}")))
    }

    /// Render as a JSON-RPC hex quantity.
    pub fn to_hex_quantity(&self) -> String {
        format!("0x{:x}", self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == BigUint::default()
    }

    /// Exact sum.
    pub fn plus(&self, other: &Amount) -> Amount {
        Amount(&self.0 + &other.0)
    }

    /// `|self - other|`
    pub fn abs_diff(&self, other: &Amount) -> Amount {
        if self.0 >= other.0 {
            Amount(&self.0 - &other.0)
        } else {
            Amount(&other.0 - &self.0)
        }
    }

    /// One percent of the amount, rounded down.
    pub fn one_percent(&self) -> Amount {
        Amount(&self.0 / 100u32)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl serde::Serialize for Amount {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Amount {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Amount::from_dec_str(&s).map_err(serde::de::Error::custom)
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_strings() {
        let one_eth = Amount::from_dec_str("1000000000000000000").unwrap();
        assert_eq!(one_eth.to_string(), "1000000000000000000");
        assert!(Amount::from_dec_str("0").unwrap().is_zero());
    }

    #[test]
    fn rejects_non_integers() {
        assert!(Amount::from_dec_str("").is_err());
        assert!(Amount::from_dec_str("1.5").is_err());
        assert!(Amount::from_dec_str("-3").is_err());
        assert!(Amount::from_dec_str("0x10").is_err());
    }

    #[test]
    fn parses_hex_quantities() {
        let one_eth = Amount::from_hex_quantity("0xde0b6b3a7640000").unwrap();
        assert_eq!(one_eth.to_string(), "1000000000000000000");
        assert_eq!(one_eth.to_hex_quantity(), "0xde0b6b3a7640000");
        assert!(Amount::from_hex_quantity("0x").is_err());
        assert!(Amount::from_hex_quantity("0xzz").is_err());
    }

    #[test]
    fn addition_is_exact_past_f64_precision() {
        // 9007199254740993 = 2^53 + 1, the first integer an f64 cannot hold.
        let a = Amount::from_dec_str("9007199254740993").unwrap();
        let b = Amount::from_dec_str("1000000000000000000").unwrap();
        assert_eq!(a.plus(&b).to_string(), "1009007199254740993");
    }

    #[test]
    fn abs_diff_is_symmetric() {
        let a = Amount::from_dec_str("150").unwrap();
        let b = Amount::from_dec_str("100").unwrap();
        let fifty = Amount::from_dec_str("50").unwrap();
        assert_eq!(a.abs_diff(&b), fifty);
        assert_eq!(b.abs_diff(&a), fifty);
    }

    #[test]
    fn one_percent_rounds_down() {
        let expected = Amount::from_dec_str("1000000000000000000").unwrap();
        assert_eq!(expected.one_percent().to_string(), "10000000000000000");
        let small = Amount::from_dec_str("99").unwrap();
        assert!(small.one_percent().is_zero());
    }
}
