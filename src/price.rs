use std::collections::HashMap;
use std::sync::Arc;

use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use chrono::Utc;
use tracing::{debug, warn};

use crate::cache::{CacheStore, TtlClass};
use crate::cache_keys::price_key;
use crate::error::Error;
use crate::helpers::scale_amount;
use crate::provider::http::FallbackPriceSource;
use crate::provider::query::ContractQueries;
use crate::types::{Address, PriceQuote, PriceSource};

#[derive(Debug, Clone)]
pub struct PriceSettings {
    pub feed_registry: Address,
    pub native_token: Address,
    pub native_usd_feed: Option<Address>,
    pub stable_tokens: HashMap<Address, BigDecimal>,
    pub coingecko_ids: HashMap<Address, String>,
    pub feed_overrides: HashMap<Address, Address>,
    pub max_feed_age: i64,
    pub usd_sanity_bound: BigDecimal,
}

/// Resolves a token to a USD unit price through a fixed chain: configured
/// stablecoin pegs, then the cached spot, then the on-chain oracle, then the
/// off-chain fallback. Only resolved quotes enter the cache.
pub struct PriceResolver {
    settings: PriceSettings,
    queries: ContractQueries,
    fallback: Arc<dyn FallbackPriceSource>,
    cache: CacheStore,
}

impl PriceResolver {
    pub fn new(
        settings: PriceSettings,
        queries: ContractQueries,
        fallback: Arc<dyn FallbackPriceSource>,
        cache: CacheStore,
    ) -> PriceResolver {
        PriceResolver { settings, queries, fallback, cache }
    }

    pub async fn resolve(&self, token: &Address) -> Result<PriceQuote, Error> {
        if let Some(price) = self.settings.stable_tokens.get(token) {
            return Ok(PriceQuote::new(
                token.clone(),
                price.clone(),
                PriceSource::StablecoinOverride,
            ));
        }

        let key = price_key(token);
        if let Some(quote) = self.cache.get::<PriceQuote>(&key).await {
            return Ok(quote);
        }

        let quote = match self.oracle_price(token).await {
            Ok(price) => PriceQuote::new(
                token.clone(),
                price,
                PriceSource::OraclePrimary,
            ),
            Err(error) => {
                debug!(
                    "Oracle miss for {}, trying fallback: {}",
                    token.as_str(),
                    error
                );
                let price =
                    self.fallback_price(token).await.map_err(|error| {
                        warn!(
                            "Fallback miss for {}: {}",
                            token.as_str(),
                            error
                        );
                        Error::PriceUnavailable(token.as_str().to_owned())
                    })?;
                PriceQuote::new(token.clone(), price, PriceSource::OracleFallback)
            },
        };

        if quote.price > self.settings.usd_sanity_bound {
            warn!(
                "Quote for {} exceeds the sanity bound: {} USD",
                token.as_str(),
                quote.price
            );
        }

        self.cache.put(&key, &quote, TtlClass::SpotPrice).await;

        Ok(quote)
    }

    /// On-chain leg. Overridden feeds and the native token bypass the
    /// registry; everything else looks its feed up there. A non-positive or
    /// stale round is a miss, not a fault.
    async fn oracle_price(&self, token: &Address) -> Result<BigDecimal, Error> {
        let feed = match self.settings.feed_overrides.get(token) {
            Some(feed) => feed.clone(),
            None => match (&self.settings.native_usd_feed, token) {
                (Some(feed), t) if *t == self.settings.native_token => {
                    feed.clone()
                },
                _ => {
                    self.queries
                        .usd_feed(&self.settings.feed_registry, token)
                        .await?
                },
            },
        };

        let (answer, updated_at) =
            self.queries.latest_round_data(&feed).await?;

        if answer <= Zero::zero() {
            return Err(Error::NotFound(format!(
                "feed {} answered non-positive",
                feed.as_str()
            )));
        }

        let updated = updated_at.to_i64().ok_or_else(|| {
            Error::Decode(format!("feed {} timestamp overflow", feed.as_str()))
        })?;
        let age = Utc::now().timestamp() - updated;
        if age > self.settings.max_feed_age {
            return Err(Error::NotFound(format!(
                "feed {} is stale ({}s old)",
                feed.as_str(),
                age
            )));
        }

        let decimals = self.queries.token_decimals(&feed).await?;

        Ok(scale_amount(&answer, decimals))
    }

    /// Off-chain leg: native/USD times token/native, or native/USD alone for
    /// the native token itself.
    async fn fallback_price(&self, token: &Address) -> Result<BigDecimal, Error> {
        let native_usd = self.fallback.native_usd().await?;

        if *token == self.settings.native_token {
            return Ok(native_usd);
        }

        let id = self.settings.coingecko_ids.get(token).ok_or_else(|| {
            Error::PriceUnavailable(format!(
                "{} has no fallback listing",
                token.as_str()
            ))
        })?;
        let in_native = self.fallback.token_in_native(id).await?;

        Ok(native_usd * in_native)
    }
}
