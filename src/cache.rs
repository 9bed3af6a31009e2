use std::str::FromStr;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{info, warn};

use crate::error::Error;

/// Retention class of a cached row. Contract wiring changes rarely, feed
/// mappings almost never, spot prices constantly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    ContractState,
    FeedMapping,
    SpotPrice,
}

/// Per-class retention in seconds, loaded from configuration.
#[derive(Debug, Clone, Copy)]
pub struct TtlSettings {
    pub contract_ttl: u64,
    pub feed_ttl: u64,
    pub price_ttl: u64,
}

impl TtlSettings {
    fn secs(&self, class: TtlClass) -> u64 {
        match class {
            TtlClass::ContractState => self.contract_ttl,
            TtlClass::FeedMapping => self.feed_ttl,
            TtlClass::SpotPrice => self.price_ttl,
        }
    }
}

/// Durable read-through cache over a local sqlite file. Every value is stored
/// as serialized JSON with its own expiry; a disabled or broken cache always
/// degrades to a miss so lookups fall through to the chain.
#[derive(Clone)]
pub struct CacheStore {
    pool: Option<SqlitePool>,
    ttl: TtlSettings,
}

impl CacheStore {
    pub async fn new(
        database_url: Option<&str>,
        ttl: TtlSettings,
    ) -> Result<CacheStore, Error> {
        let pool = match database_url {
            Some(url) => {
                let options = SqliteConnectOptions::from_str(url)
                    .map_err(|error| {
                        Error::CacheUnavailable(error.to_string())
                    })?
                    .create_if_missing(true);
                let pool = SqlitePoolOptions::new()
                    .max_connections(4)
                    .connect_with(options)
                    .await
                    .map_err(|error| {
                        Error::CacheUnavailable(error.to_string())
                    })?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS call_cache (
                        cache_key  TEXT    NOT NULL PRIMARY KEY,
                        value      TEXT    NOT NULL,
                        ttl_secs   INTEGER NOT NULL,
                        stored_at  INTEGER NOT NULL
                    )
                    "#,
                )
                .execute(&pool)
                .await
                .map_err(|error| Error::CacheUnavailable(error.to_string()))?;

                info!("Cache store ready at {}", url);
                Some(pool)
            },
            None => {
                info!("Cache store disabled");
                None
            },
        };

        Ok(CacheStore { pool, ttl })
    }

    pub fn is_enabled(&self) -> bool {
        self.pool.is_some()
    }

    /// Looks a key up, treating expired rows and any storage or decode
    /// failure as a miss.
    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        self.get_with_now(key, Utc::now().timestamp()).await
    }

    async fn get_with_now<T>(&self, key: &str, now: i64) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let pool = self.pool.as_ref()?;

        let row: Option<(String, i64, i64)> = match sqlx::query_as(
            "SELECT value, ttl_secs, stored_at FROM call_cache WHERE cache_key = $1",
        )
        .bind(key)
        .fetch_optional(pool)
        .await
        {
            Ok(row) => row,
            Err(error) => {
                warn!("Cache read failed for {}: {}", key, error);
                return None;
            },
        };

        let (value, ttl_secs, stored_at) = row?;

        if now >= stored_at + ttl_secs {
            return None;
        }

        match serde_json::from_str(&value) {
            Ok(decoded) => Some(decoded),
            Err(error) => {
                warn!("Cache row for {} failed to decode: {}", key, error);
                None
            },
        }
    }

    /// Stores a value under the retention of its class. A write failure is
    /// logged and swallowed; the caller already holds the fresh value.
    pub async fn put<T>(&self, key: &str, value: &T, class: TtlClass)
    where
        T: Serialize,
    {
        let Some(pool) = self.pool.as_ref() else {
            return;
        };

        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(error) => {
                warn!("Cache value for {} failed to encode: {}", key, error);
                return;
            },
        };

        let result = sqlx::query(
            r#"
            INSERT INTO call_cache (cache_key, value, ttl_secs, stored_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (cache_key)
            DO UPDATE SET value = $2, ttl_secs = $3, stored_at = $4
            "#,
        )
        .bind(key)
        .bind(encoded)
        .bind(self.ttl.secs(class) as i64)
        .bind(Utc::now().timestamp())
        .execute(pool)
        .await;

        if let Err(error) = result {
            warn!("Cache write failed for {}: {}", key, error);
        }
    }

    /// Deletes rows past their expiry. Returns the number of rows removed.
    pub async fn sweep_expired(&self) -> Result<u64, Error> {
        let Some(pool) = self.pool.as_ref() else {
            return Ok(0);
        };

        let result = sqlx::query(
            "DELETE FROM call_cache WHERE stored_at + ttl_secs <= $1",
        )
        .bind(Utc::now().timestamp())
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }
}
