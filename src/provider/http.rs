use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Error;

/// Off-chain quote source used when no on-chain feed covers a token. Quotes
/// come back as two legs, native/USD and token/native, multiplied by the
/// resolver.
#[async_trait]
pub trait FallbackPriceSource: Send + Sync {
    async fn native_usd(&self) -> Result<BigDecimal, Error>;
    async fn token_in_native(&self, id: &str) -> Result<BigDecimal, Error>;
}

/// CoinGecko `simple/price` client. All requests share one throttle so the
/// free tier's rate limit is never tripped by a burst of fallback lookups.
pub struct Http {
    client: Client,
    host: String,
    native_id: String,
    native_currency: String,
    throttle: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl Http {
    pub fn new(
        host: String,
        native_id: String,
        native_currency: String,
        timeout: Duration,
        throttle: Duration,
    ) -> Result<Http, Error> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Http {
            client,
            host,
            native_id,
            native_currency,
            throttle,
            last_request: Mutex::new(None),
        })
    }

    async fn wait_for_slot(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.throttle {
                tokio::time::sleep(self.throttle - elapsed).await;
            }
        }

        *last = Some(Instant::now());
    }

    async fn simple_price(
        &self,
        id: &str,
        vs_currency: &str,
    ) -> Result<BigDecimal, Error> {
        self.wait_for_slot().await;

        let url = format!(
            "{}/api/v3/simple/price?ids={}&vs_currencies={}",
            self.host, id, vs_currency
        );
        debug!("Fallback quote request: {}", url);

        let body: Value = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let number = body
            .get(id)
            .and_then(|entry| entry.get(vs_currency))
            .and_then(Value::as_number)
            .ok_or_else(|| {
                Error::PriceUnavailable(format!("{} in {}", id, vs_currency))
            })?;

        Ok(BigDecimal::from_str(&number.to_string())?)
    }
}

#[async_trait]
impl FallbackPriceSource for Http {
    async fn native_usd(&self) -> Result<BigDecimal, Error> {
        self.simple_price(&self.native_id, "usd").await
    }

    async fn token_in_native(&self, id: &str) -> Result<BigDecimal, Error> {
        self.simple_price(id, &self.native_currency).await
    }
}
