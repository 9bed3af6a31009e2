use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// A 20-byte EVM address, held as lowercase `0x`-prefixed hex so that
/// semantically identical addresses compare and hash equal regardless of
/// the checksum casing callers use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

impl Address {
    pub fn zero() -> Address {
        Address(ZERO_ADDRESS.to_owned())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == ZERO_ADDRESS
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex digits without the `0x` prefix.
    pub fn hex_digits(&self) -> &str {
        &self.0[2..]
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Address, Error> {
        let body = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| {
                Error::Decode(format!("address missing 0x prefix: {}", s))
            })?;

        if body.len() != 40 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::Decode(format!("malformed address: {}", s)));
        }

        Ok(Address(format!("0x{}", body.to_ascii_lowercase())))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Address, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Address::from_str(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case() {
        let a: Address =
            "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2".parse().unwrap();
        let b: Address =
            "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");
    }

    #[test]
    fn rejects_malformed() {
        assert!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"
            .parse::<Address>()
            .is_err());
        assert!("0x1234".parse::<Address>().is_err());
        assert!("0xzz2aaa39b223fe8d0a0e5c4f27ead9083c756cc2"
            .parse::<Address>()
            .is_err());
    }

    #[test]
    fn zero_detection() {
        assert!(Address::zero().is_zero());
        let a: Address = ZERO_ADDRESS.parse().unwrap();
        assert!(a.is_zero());
    }
}
