//! Core identifier and arithmetic types shared across the stpool crates

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Sequential operator identifier, never reused.
pub type OperatorId = u64;

/// Lookup key for a validator account held by the hub.
pub type ValidatorId = u64;

/// Monotonic withdrawal ticket identifier.
pub type TicketId = u64;

/// Nonce returned by a validator account for a pending undelegation.
pub type UnbondNonce = u64;

/// Epoch counter supplied by the epoch oracle.
pub type Epoch = u64;

/// Denominator for basis-point rates.
pub const BASIS_POINTS: u64 = 10_000;

/// Applies a basis-point rate to an amount with a widened intermediate.
pub fn apply_bps(amount: u64, bps: u16) -> u64 {
    ((amount as u128 * bps as u128) / BASIS_POINTS as u128) as u64
}

/// Proportional conversion `amount * numerator / denominator` widened to
/// u128 so share-price math cannot overflow at u64 scale.
pub fn mul_div(amount: u64, numerator: u64, denominator: u64) -> u64 {
    if denominator == 0 {
        return amount;
    }
    ((amount as u128 * numerator as u128) / denominator as u128) as u64
}

/// A 20-byte account address on the target network.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn new(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }

    /// Deterministic address from a small integer, used by tests and the
    /// simulated chain.
    pub fn from_low_u64(value: u64) -> Self {
        let mut bytes = [0u8; 20];
        bytes[12..20].copy_from_slice(&value.to_be_bytes());
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let hex = s.strip_prefix("0x").unwrap_or(s);
        if hex.len() != 40 {
            return Err(format!("expected 40 hex chars, got {}", hex.len()));
        }
        let mut bytes = [0u8; 20];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|e| e.to_string())?;
            bytes[i] = u8::from_str_radix(pair, 16).map_err(|e| e.to_string())?;
        }
        Ok(Address(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_roundtrip() {
        let addr = Address::from_low_u64(42);
        let text = addr.to_string();
        assert!(text.starts_with("0x"));
        assert_eq!(text.parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn mul_div_widens() {
        // u64::MAX / 2 * 2 would overflow without the u128 intermediate
        let half = u64::MAX / 2;
        assert_eq!(mul_div(half, 2, 1), half * 2);
        assert_eq!(mul_div(100, 0, 5), 0);
        assert_eq!(mul_div(100, 3, 0), 100);
    }

    #[test]
    fn bps_math() {
        assert_eq!(apply_bps(10, 1000), 1);
        assert_eq!(apply_bps(0, 1000), 0);
        assert_eq!(apply_bps(10_000, 10_000), 10_000);
    }
}
