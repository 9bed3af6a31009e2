use std::{
    collections::HashMap,
    env, fs,
    ops::Deref,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use bigdecimal::BigDecimal;

use crate::{
    cache::{CacheStore, TtlSettings},
    error::Error,
    helpers::parse_tuple_string,
    price::{PriceResolver, PriceSettings},
    provider::http::Http,
    provider::query::ContractQueries,
    provider::rpc::{Endpoint, EndpointPool, HttpTransport, PoolSettings},
    types::Address,
    vaults::{VaultService, VaultSettings},
};

#[derive(Debug)]
pub struct AppState<T>(Arc<T>);

impl<T> AppState<T> {
    pub fn new(state: T) -> AppState<T> {
        AppState(Arc::new(state))
    }
}

impl<T> Clone for AppState<T> {
    fn clone(&self) -> AppState<T> {
        AppState(Arc::clone(&self.0))
    }
}

impl<T> Deref for AppState<T> {
    type Target = Arc<T>;

    fn deref(&self) -> &Arc<T> {
        &self.0
    }
}

pub struct State {
    pub config: Config,
    pub cache: CacheStore,
    pub pool: Arc<EndpointPool>,
    pub queries: ContractQueries,
    pub prices: Arc<PriceResolver>,
    pub vaults: VaultService,
}

impl State {
    pub async fn new(config: Config) -> Result<State, Error> {
        let transport =
            Arc::new(HttpTransport::new(Duration::from_secs(config.timeout))?);
        let pool = Arc::new(EndpointPool::new(
            config.rpc_endpoints.clone(),
            PoolSettings {
                max_consecutive_errors: config.max_consecutive_errors,
                max_retries: config.max_retries,
                retry_delay: Duration::from_millis(config.retry_delay),
                endpoint_cooldown: Duration::from_secs(
                    config.endpoint_cooldown,
                ),
                rate_limit_cooldown: Duration::from_secs(
                    config.rate_limit_cooldown,
                ),
            },
            transport,
        )?);

        let cache = CacheStore::new(
            config
                .cache_enabled
                .then_some(config.cache_database_url.as_str()),
            TtlSettings {
                contract_ttl: config.contract_ttl,
                feed_ttl: config.feed_ttl,
                price_ttl: config.price_ttl,
            },
        )
        .await?;

        let queries = ContractQueries::new(Arc::clone(&pool), cache.clone());

        let fallback = Arc::new(Http::new(
            config.coingecko_host.clone(),
            config.native_coingecko_id.clone(),
            config.native_vs_currency.clone(),
            Duration::from_secs(config.timeout),
            Duration::from_millis(config.fallback_throttle_ms),
        )?);

        let prices = Arc::new(PriceResolver::new(
            PriceSettings {
                feed_registry: config.feed_registry_contract.clone(),
                native_token: config.native_token.clone(),
                native_usd_feed: config.native_usd_feed.clone(),
                stable_tokens: config.stable_tokens.clone(),
                coingecko_ids: config.coingecko_ids.clone(),
                feed_overrides: config.feed_overrides.clone(),
                max_feed_age: config.max_feed_age,
                usd_sanity_bound: config.usd_sanity_bound.clone(),
            },
            queries.clone(),
            fallback,
            cache.clone(),
        ));

        let vaults = VaultService::new(
            VaultSettings {
                factory: config.factory_contract.clone(),
                vault_discovery_batch: config.vault_discovery_batch,
                loan_processing_batch: config.loan_processing_batch,
                discovery_timeout: Duration::from_secs(
                    config.discovery_timeout,
                ),
                usd_sanity_bound: config.usd_sanity_bound.clone(),
            },
            queries.clone(),
            Arc::clone(&prices),
        );

        Ok(State { config, cache, pool, queries, prices, vaults })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_endpoints: Vec<Endpoint>,
    pub factory_contract: Address,
    pub feed_registry_contract: Address,
    pub native_token: Address,
    pub native_usd_feed: Option<Address>,
    pub native_coingecko_id: String,
    pub native_vs_currency: String,
    pub coingecko_host: String,
    pub stable_tokens: HashMap<Address, BigDecimal>,
    pub coingecko_ids: HashMap<Address, String>,
    pub feed_overrides: HashMap<Address, Address>,
    pub vault_discovery_batch: usize,
    pub loan_processing_batch: usize,
    pub max_consecutive_errors: u32,
    pub max_retries: u32,
    pub retry_delay: u64,
    pub endpoint_cooldown: u64,
    pub rate_limit_cooldown: u64,
    pub cache_enabled: bool,
    pub cache_database_url: String,
    pub cache_cleanup_interval: u64,
    pub contract_ttl: u64,
    pub feed_ttl: u64,
    pub price_ttl: u64,
    pub timeout: u64,
    pub discovery_timeout: u64,
    pub fallback_throttle_ms: u64,
    pub max_feed_age: i64,
    pub aggregation_interval: u64,
    pub usd_sanity_bound: BigDecimal,
}

pub fn get_configuration() -> Result<Config, Error> {
    let rpc_endpoints = get_rpc_endpoints()?;
    let factory_contract = env::var("FACTORY_CONTRACT")?.parse()?;
    let feed_registry_contract = env::var("FEED_REGISTRY_CONTRACT")?.parse()?;
    let native_token = env::var("NATIVE_TOKEN")?.parse()?;

    let native_usd_feed = match env::var("NATIVE_USD_FEED") {
        Ok(value) if !value.is_empty() => Some(value.parse()?),
        _ => None,
    };

    let native_coingecko_id = env::var("NATIVE_COINGECKO_ID")?;
    let native_vs_currency = env::var("NATIVE_VS_CURRENCY")?;
    let coingecko_host = env::var("COINGECKO_HOST")?;

    let stable_tokens = get_stable_tokens()?;
    let coingecko_ids = get_coingecko_ids()?;
    let feed_overrides = get_feed_overrides()?;

    let vault_discovery_batch = env::var("VAULT_DISCOVERY_BATCH")?.parse()?;
    let loan_processing_batch = env::var("LOAN_PROCESSING_BATCH")?.parse()?;
    let max_consecutive_errors = env::var("MAX_CONSECUTIVE_ERRORS")?.parse()?;
    let max_retries = env::var("MAX_RETRIES")?.parse()?;
    let retry_delay = env::var("RETRY_DELAY_MS")?.parse()?;
    let endpoint_cooldown = env::var("ENDPOINT_COOLDOWN_IN_SEC")?.parse()?;
    let rate_limit_cooldown =
        env::var("RATE_LIMIT_COOLDOWN_IN_SEC")?.parse()?;
    let cache_enabled = env::var("CACHE_ENABLED")?.parse()?;
    let cache_database_url = env::var("CACHE_DATABASE_URL")?;
    let cache_cleanup_interval =
        env::var("CACHE_CLEANUP_INTERVAL_IN_SEC")?.parse()?;
    let contract_ttl = env::var("CONTRACT_TTL_IN_SEC")?.parse()?;
    let feed_ttl = env::var("FEED_TTL_IN_SEC")?.parse()?;
    let price_ttl = env::var("PRICE_TTL_IN_SEC")?.parse()?;
    let timeout = env::var("TIMEOUT")?.parse()?;
    let discovery_timeout = env::var("DISCOVERY_TIMEOUT_IN_SEC")?.parse()?;
    let fallback_throttle_ms = env::var("FALLBACK_THROTTLE_MS")?.parse()?;
    let max_feed_age = env::var("MAX_FEED_AGE_IN_SEC")?.parse()?;
    let aggregation_interval =
        env::var("AGGREGATION_INTERVAL_IN_SEC")?.parse()?;
    let usd_sanity_bound =
        BigDecimal::from_str(&env::var("USD_SANITY_BOUND")?)?;

    let config = Config {
        rpc_endpoints,
        factory_contract,
        feed_registry_contract,
        native_token,
        native_usd_feed,
        native_coingecko_id,
        native_vs_currency,
        coingecko_host,
        stable_tokens,
        coingecko_ids,
        feed_overrides,
        vault_discovery_batch,
        loan_processing_batch,
        max_consecutive_errors,
        max_retries,
        retry_delay,
        endpoint_cooldown,
        rate_limit_cooldown,
        cache_enabled,
        cache_database_url,
        cache_cleanup_interval,
        contract_ttl,
        feed_ttl,
        price_ttl,
        timeout,
        discovery_timeout,
        fallback_throttle_ms,
        max_feed_age,
        aggregation_interval,
        usd_sanity_bound,
    };

    Ok(config)
}

pub fn set_configuration() -> Result<(), Error> {
    let config_file: &str = ".env";
    let app_config_file: &str = "app.conf";

    let directory = env!("CARGO_MANIFEST_DIR");
    let path = format!("{}/{}", directory, config_file);
    let app_config_path = format!("{}/{}", directory, app_config_file);

    let config_string = fs::read_to_string(path)?;
    let app_config_string = fs::read_to_string(app_config_path)?;

    parse_config_string(config_string)?;
    parse_config_string(app_config_string)?;

    Ok(())
}

fn parse_config_string(config: String) -> Result<(), Error> {
    let params: Vec<Option<(&str, &str)>> = config
        .split('\n')
        .map(|s| {
            let element = s.find('=');
            if let Some(e) = element {
                return Some(s.split_at(e));
            }
            None
        })
        .map(|value| {
            if let Some((k, v)) = value {
                return Some((k, &v[1..]));
            }
            None
        })
        .collect();

    for (key, value) in params.into_iter().flatten() {
        std::env::set_var(key, value);
    }

    Ok(())
}

fn get_rpc_endpoints() -> Result<Vec<Endpoint>, Error> {
    let mut data: Vec<Endpoint> = Vec::new();
    let endpoints = parse_tuple_string(env::var("RPC_ENDPOINTS")?);

    for c in endpoints {
        let items: Vec<&str> = c.split(',').collect();
        if items.len() != 3 {
            return Err(Error::ConfigurationError(format!(
                "malformed endpoint tuple: {}",
                c
            )));
        }
        url::Url::parse(items[1])?;
        data.push(Endpoint {
            name: items[0].to_owned(),
            url: items[1].to_owned(),
            priority: items[2].parse()?,
        });
    }

    Ok(data)
}

fn get_stable_tokens() -> Result<HashMap<Address, BigDecimal>, Error> {
    let mut data: HashMap<Address, BigDecimal> = HashMap::new();
    let tokens = parse_tuple_string(env::var("STABLE_TOKENS")?);

    for c in tokens {
        let items: Vec<&str> = c.split(',').collect();
        if items.len() != 2 {
            return Err(Error::ConfigurationError(format!(
                "malformed stable token tuple: {}",
                c
            )));
        }
        data.insert(items[0].parse()?, BigDecimal::from_str(items[1])?);
    }

    Ok(data)
}

fn get_coingecko_ids() -> Result<HashMap<Address, String>, Error> {
    let mut data: HashMap<Address, String> = HashMap::new();
    let ids = parse_tuple_string(env::var("COINGECKO_IDS")?);

    for c in ids {
        let items: Vec<&str> = c.split(',').collect();
        if items.len() != 2 {
            return Err(Error::ConfigurationError(format!(
                "malformed listing tuple: {}",
                c
            )));
        }
        data.insert(items[0].parse()?, items[1].to_owned());
    }

    Ok(data)
}

fn get_feed_overrides() -> Result<HashMap<Address, Address>, Error> {
    let mut data: HashMap<Address, Address> = HashMap::new();
    let overrides = parse_tuple_string(env::var("FEED_OVERRIDES")?);

    for c in overrides {
        let items: Vec<&str> = c.split(',').collect();
        if items.len() != 2 {
            return Err(Error::ConfigurationError(format!(
                "malformed feed override tuple: {}",
                c
            )));
        }
        data.insert(items[0].parse()?, items[1].parse()?);
    }

    Ok(data)
}
