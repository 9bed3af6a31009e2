use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Address;

/// Which leg of the resolution chain produced a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriceSource {
    StablecoinOverride,
    OraclePrimary,
    OracleFallback,
}

/// A resolved USD unit price for a token. Quotes are never mutated; a fresher
/// resolution supersedes the cached one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceQuote {
    pub token: Address,
    pub price: BigDecimal,
    pub source: PriceSource,
    pub resolved_at: DateTime<Utc>,
}

impl PriceQuote {
    pub fn new(token: Address, price: BigDecimal, source: PriceSource) -> PriceQuote {
        PriceQuote {
            token,
            price,
            source,
            resolved_at: Utc::now(),
        }
    }
}
