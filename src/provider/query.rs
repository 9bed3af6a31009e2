use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::num_bigint::BigInt;
use tracing::debug;

use crate::cache::{CacheStore, TtlClass};
use crate::cache_keys::{call_key, feed_key};
use crate::error::Error;
use crate::helpers::{
    decode_words, encode_word_address, encode_word_uint, signed_word,
    word_to_address,
};
use crate::provider::rpc::EndpointPool;
use crate::types::{Address, CallArg, CallValue, EthCall, Function, RetKind};

/// Denomination pseudo-address the oracle registry uses for USD quotes.
pub const USD_QUOTE: &str = "0x0000000000000000000000000000000000000348";

/// Factories ship under two ABI generations; snake_case is the canonical
/// name and always keys the cache.
pub const MARKET_COUNT: &[Function] = &[
    Function { name: "market_count", selector: "0xaf21ef90", returns: RetKind::Uint },
    Function { name: "marketCount", selector: "0xec979082", returns: RetKind::Uint },
];

pub const CONTROLLERS: &[Function] = &[Function {
    name: "controllers",
    selector: "0x02c2c1c5",
    returns: RetKind::Address,
}];

pub const BORROWED_TOKEN: &[Function] = &[
    Function {
        name: "borrowed_token",
        selector: "0x6a1ca9dd",
        returns: RetKind::Address,
    },
    Function {
        name: "borrowedToken",
        selector: "0xb79f6cff",
        returns: RetKind::Address,
    },
];

pub const COLLATERAL_TOKEN: &[Function] = &[
    Function {
        name: "collateral_token",
        selector: "0xb2016bd4",
        returns: RetKind::Address,
    },
    Function {
        name: "collateralToken",
        selector: "0xb2f5a54c",
        returns: RetKind::Address,
    },
];

pub const LOANS: &[Function] = &[Function {
    name: "loans",
    selector: "0x99fbab88",
    returns: RetKind::Address,
}];

pub const USER_STATE: &[Function] = &[Function {
    name: "user_state",
    selector: "0xec74c0a8",
    returns: RetKind::Words(4),
}];

pub const DECIMALS: &[Function] = &[Function {
    name: "decimals",
    selector: "0x313ce567",
    returns: RetKind::Uint,
}];

pub const GET_FEED: &[Function] = &[Function {
    name: "getFeed",
    selector: "0xd2edb6dd",
    returns: RetKind::Address,
}];

pub const LATEST_ROUND_DATA: &[Function] = &[Function {
    name: "latestRoundData",
    selector: "0xfeaf968c",
    returns: RetKind::Words(5),
}];

fn encode_call(to: &Address, function: &Function, args: &[CallArg]) -> EthCall {
    let mut data = function.selector.to_owned();

    for arg in args {
        match arg {
            CallArg::Address(address) => data.push_str(&encode_word_address(address)),
            CallArg::Uint(value) => data.push_str(&encode_word_uint(*value)),
        }
    }

    EthCall { to: to.clone(), data }
}

fn decode_return(function: &Function, data: &str) -> Result<CallValue, Error> {
    match function.returns {
        RetKind::Address => Ok(CallValue::Address(word_to_address(data, 0)?)),
        RetKind::Uint => {
            let words = decode_words(data)?;
            let word = words.first().ok_or_else(|| {
                Error::Decode(format!("{} returned no data", function.name))
            })?;
            Ok(CallValue::Uint(word.to_str_radix(10)))
        },
        RetKind::Words(count) => {
            let words = decode_words(data)?;
            if words.len() < count {
                return Err(Error::Decode(format!(
                    "{} returned {} words, expected {}",
                    function.name,
                    words.len(),
                    count
                )));
            }
            Ok(CallValue::Words(
                words.iter().take(count).map(|w| w.to_str_radix(10)).collect(),
            ))
        },
    }
}

/// A revert without a reason string is how proxies and older runtimes signal
/// an unknown function; reasoned reverts are real contract faults.
fn is_missing_function(error: &Error) -> bool {
    match error {
        Error::FatalContract(message) => {
            message.to_lowercase().trim() == "execution reverted"
        },
        _ => false,
    }
}

/// Typed view-call layer over the endpoint pool with read-through caching.
#[derive(Clone)]
pub struct ContractQueries {
    pool: Arc<EndpointPool>,
    cache: CacheStore,
}

impl ContractQueries {
    pub fn new(pool: Arc<EndpointPool>, cache: CacheStore) -> ContractQueries {
        ContractQueries { pool, cache }
    }

    /// Calls the first candidate the contract actually implements. Empty
    /// return data or a reasonless revert moves on to the next name; any
    /// other failure propagates. `ttl` of `None` always hits the chain.
    async fn call_any(
        &self,
        contract: &Address,
        candidates: &[Function],
        args: &[CallArg],
        ttl: Option<TtlClass>,
    ) -> Result<CallValue, Error> {
        let key = call_key(contract, candidates[0].name, args);

        if ttl.is_some() {
            if let Some(value) = self.cache.get::<CallValue>(&key).await {
                return Ok(value);
            }
        }

        let mut missing = 0;
        for function in candidates {
            let call = encode_call(contract, function, args);

            let data = match self.pool.execute(&call).await {
                Ok(data) => data,
                Err(error) if is_missing_function(&error) => {
                    debug!(
                        "{} does not answer {}, trying next name",
                        contract.as_str(),
                        function.name
                    );
                    missing += 1;
                    continue;
                },
                Err(error) => return Err(error),
            };

            if data == "0x" || data.is_empty() {
                missing += 1;
                continue;
            }

            let value = decode_return(function, &data)?;

            if let Some(class) = ttl {
                self.cache.put(&key, &value, class).await;
            }

            return Ok(value);
        }

        Err(Error::FatalContract(format!(
            "{} implements none of {} candidate name(s) for {}",
            contract.as_str(),
            missing,
            candidates[0].name
        )))
    }

    pub async fn market_count(&self, factory: &Address) -> Result<u64, Error> {
        self.call_any(factory, MARKET_COUNT, &[], Some(TtlClass::ContractState))
            .await?
            .as_u64()
    }

    pub async fn controller_at(
        &self,
        factory: &Address,
        index: u64,
    ) -> Result<Address, Error> {
        let value = self
            .call_any(
                factory,
                CONTROLLERS,
                &[CallArg::Uint(index)],
                Some(TtlClass::ContractState),
            )
            .await?;
        let address = value.as_address()?;

        if address.is_zero() {
            return Err(Error::NotFound(format!(
                "no controller at index {}",
                index
            )));
        }

        Ok(address.clone())
    }

    pub async fn borrowed_token(&self, vault: &Address) -> Result<Address, Error> {
        let value = self
            .call_any(vault, BORROWED_TOKEN, &[], Some(TtlClass::ContractState))
            .await?;
        Ok(value.as_address()?.clone())
    }

    pub async fn collateral_token(
        &self,
        vault: &Address,
    ) -> Result<Address, Error> {
        let value = self
            .call_any(vault, COLLATERAL_TOKEN, &[], Some(TtlClass::ContractState))
            .await?;
        Ok(value.as_address()?.clone())
    }

    pub async fn token_decimals(&self, token: &Address) -> Result<u32, Error> {
        let value = self
            .call_any(token, DECIMALS, &[], Some(TtlClass::ContractState))
            .await?
            .as_u64()?;

        u32::try_from(value).map_err(|_| {
            Error::Decode(format!("decimals out of range: {}", value))
        })
    }

    /// Borrower at an enumeration slot. The zero address is the contract's
    /// end-of-list sentinel, surfaced as `NotFound`. Never cached; the list
    /// mutates with every borrow and repayment.
    pub async fn loan_at(
        &self,
        vault: &Address,
        index: u64,
    ) -> Result<Address, Error> {
        let value = self
            .call_any(vault, LOANS, &[CallArg::Uint(index)], None)
            .await?;
        let address = value.as_address()?;

        if address.is_zero() {
            return Err(Error::NotFound(format!("no loan at index {}", index)));
        }

        Ok(address.clone())
    }

    /// Raw (collateral, debt) amounts for one borrower, never cached.
    pub async fn user_state(
        &self,
        vault: &Address,
        user: &Address,
    ) -> Result<(BigInt, BigInt), Error> {
        let value = self
            .call_any(
                vault,
                USER_STATE,
                &[CallArg::Address(user.clone())],
                None,
            )
            .await?;

        Ok((value.word_bigint(0)?, value.word_bigint(2)?))
    }

    /// USD feed for a token from the oracle registry, cached per token under
    /// the long feed retention. The registry reverts for unlisted tokens,
    /// which is an expected miss here.
    pub async fn usd_feed(
        &self,
        registry: &Address,
        token: &Address,
    ) -> Result<Address, Error> {
        let key = feed_key(token);

        if let Some(feed) = self.cache.get::<Address>(&key).await {
            return Ok(feed);
        }

        let quote = Address::from_str(USD_QUOTE)?;
        let result = self
            .call_any(
                registry,
                GET_FEED,
                &[CallArg::Address(token.clone()), CallArg::Address(quote)],
                None,
            )
            .await;

        match result {
            Ok(value) => {
                let address = value.as_address()?;
                if address.is_zero() {
                    return Err(Error::NotFound(format!(
                        "no USD feed for {}",
                        token.as_str()
                    )));
                }
                self.cache.put(&key, address, TtlClass::FeedMapping).await;
                Ok(address.clone())
            },
            Err(Error::FatalContract(_)) => Err(Error::NotFound(format!(
                "no USD feed for {}",
                token.as_str()
            ))),
            Err(error) => Err(error),
        }
    }

    /// Latest oracle round: (round id, answer, started at, updated at,
    /// answered in round). The answer is an int256, so its word is
    /// sign-restored. Price-layer caching applies, not call caching.
    pub async fn latest_round_data(
        &self,
        feed: &Address,
    ) -> Result<(BigInt, BigInt), Error> {
        let value = self
            .call_any(feed, LATEST_ROUND_DATA, &[], None)
            .await?;

        Ok((signed_word(&value.word_bigint(1)?), value.word_bigint(3)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, TtlSettings};
    use crate::provider::rpc::testing::*;
    use crate::provider::rpc::{Endpoint, EndpointPool, PoolSettings, RpcTransport};
    use crate::types::RpcRequest;
    use std::time::Duration;

    fn word_uint(value: u64) -> String {
        format!("{:0>64x}", value)
    }

    fn word_address(digits: &str) -> String {
        format!("{:0>64}", digits)
    }

    async fn queries(transport: Arc<dyn RpcTransport>) -> ContractQueries {
        let pool = EndpointPool::new(
            vec![Endpoint {
                name: String::from("test"),
                url: String::from("http://test"),
                priority: 0,
            }],
            PoolSettings {
                max_consecutive_errors: 3,
                max_retries: 1,
                retry_delay: Duration::from_millis(1),
                endpoint_cooldown: Duration::from_secs(60),
                rate_limit_cooldown: Duration::from_secs(60),
            },
            transport,
        )
        .unwrap();
        let cache = CacheStore::new(
            Some("sqlite::memory:"),
            TtlSettings { contract_ttl: 300, feed_ttl: 604_800, price_ttl: 60 },
        )
        .await
        .unwrap();

        ContractQueries::new(Arc::new(pool), cache)
    }

    fn factory() -> Address {
        "0xB9fC157394Af804a3578134A6585C0dc9cc990d4".parse().unwrap()
    }

    #[test]
    fn encodes_selector_and_arguments() {
        let call = encode_call(
            &factory(),
            &CONTROLLERS[0],
            &[CallArg::Uint(3)],
        );
        assert_eq!(call.data, format!("0x02c2c1c5{}", word_uint(3)));
        assert_eq!(call.to, factory());
    }

    #[tokio::test]
    async fn falls_back_to_camel_case_name() {
        let transport = Arc::new(MockTransport::new(|_, request: &RpcRequest| {
            let data = request_data(request);
            if data.starts_with(MARKET_COUNT[0].selector) {
                Ok(ok_response("0x"))
            } else if data.starts_with(MARKET_COUNT[1].selector) {
                Ok(ok_response(&format!("0x{}", word_uint(5))))
            } else {
                Ok(error_response(3, "execution reverted"))
            }
        }));
        let queries = queries(transport.clone()).await;

        assert_eq!(queries.market_count(&factory()).await.unwrap(), 5);
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn reasonless_revert_tries_next_name() {
        let transport = Arc::new(MockTransport::new(|_, request: &RpcRequest| {
            let data = request_data(request);
            if data.starts_with(BORROWED_TOKEN[0].selector) {
                Ok(error_response(3, "execution reverted"))
            } else {
                Ok(ok_response(&format!(
                    "0x{}",
                    word_address("00000000000000000000000000000000deadbeef")
                )))
            }
        }));
        let queries = queries(transport).await;

        let token = queries.borrowed_token(&factory()).await.unwrap();
        assert_eq!(
            token.as_str(),
            "0x00000000000000000000000000000000deadbeef"
        );
    }

    #[tokio::test]
    async fn reasoned_revert_is_fatal() {
        let transport = Arc::new(MockTransport::new(|_, _: &RpcRequest| {
            Ok(error_response(3, "execution reverted: paused"))
        }));
        let queries = queries(transport).await;

        assert!(matches!(
            queries.borrowed_token(&factory()).await,
            Err(Error::FatalContract(_))
        ));
    }

    #[tokio::test]
    async fn neither_name_answering_is_fatal() {
        let transport = Arc::new(MockTransport::new(|_, _: &RpcRequest| {
            Ok(ok_response("0x"))
        }));
        let queries = queries(transport).await;

        assert!(matches!(
            queries.market_count(&factory()).await,
            Err(Error::FatalContract(_))
        ));
    }

    #[tokio::test]
    async fn cached_calls_skip_the_chain() {
        let transport = Arc::new(MockTransport::new(|_, _: &RpcRequest| {
            Ok(ok_response(&format!("0x{}", word_uint(2))))
        }));
        let queries = queries(transport.clone()).await;

        assert_eq!(queries.market_count(&factory()).await.unwrap(), 2);
        assert_eq!(queries.market_count(&factory()).await.unwrap(), 2);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn loan_enumeration_is_never_cached() {
        let transport = Arc::new(MockTransport::new(|_, _: &RpcRequest| {
            Ok(ok_response(&format!(
                "0x{}",
                word_address("00000000000000000000000000000000deadbeef")
            )))
        }));
        let queries = queries(transport.clone()).await;

        queries.loan_at(&factory(), 0).await.unwrap();
        queries.loan_at(&factory(), 0).await.unwrap();
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn zero_address_ends_enumeration() {
        let transport = Arc::new(MockTransport::new(|_, _: &RpcRequest| {
            Ok(ok_response(&format!("0x{}", word_uint(0))))
        }));
        let queries = queries(transport).await;

        assert!(queries.loan_at(&factory(), 7).await.unwrap_err().is_not_found());
        assert!(queries
            .controller_at(&factory(), 7)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn user_state_maps_collateral_and_debt_words() {
        let transport = Arc::new(MockTransport::new(|_, _: &RpcRequest| {
            Ok(ok_response(&format!(
                "0x{}{}{}{}",
                word_uint(1_500),
                word_uint(0),
                word_uint(900),
                word_uint(1)
            )))
        }));
        let queries = queries(transport).await;

        let user: Address =
            "0x00000000000000000000000000000000deadbeef".parse().unwrap();
        let (collateral, debt) =
            queries.user_state(&factory(), &user).await.unwrap();
        assert_eq!(collateral, BigInt::from(1_500));
        assert_eq!(debt, BigInt::from(900));
    }

    #[tokio::test]
    async fn feed_mappings_cached_per_token() {
        let transport = Arc::new(MockTransport::new(|_, _: &RpcRequest| {
            Ok(ok_response(&format!(
                "0x{}",
                word_address("00000000000000000000000000000000000feed1")
            )))
        }));
        let queries = queries(transport.clone()).await;

        let token: Address =
            "0x00000000000000000000000000000000deadbeef".parse().unwrap();
        let first = queries.usd_feed(&factory(), &token).await.unwrap();
        let second = queries.usd_feed(&factory(), &token).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first.as_str(),
            "0x00000000000000000000000000000000000feed1"
        );
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn round_answer_keeps_its_sign() {
        let now = 1_700_000_000u64;
        let transport = Arc::new(MockTransport::new(move |_, _: &RpcRequest| {
            Ok(ok_response(&format!(
                "0x{}{}{}{}{}",
                word_uint(1),
                "f".repeat(64),
                word_uint(now),
                word_uint(now),
                word_uint(1)
            )))
        }));
        let queries = queries(transport).await;

        let feed: Address =
            "0x00000000000000000000000000000000000feed1".parse().unwrap();
        let (answer, updated_at) =
            queries.latest_round_data(&feed).await.unwrap();
        assert_eq!(answer, BigInt::from(-1));
        assert_eq!(updated_at, BigInt::from(now));
    }

    #[tokio::test]
    async fn missing_feed_is_not_found() {
        let transport = Arc::new(MockTransport::new(|_, _: &RpcRequest| {
            Ok(error_response(3, "execution reverted: Feed not found"))
        }));
        let queries = queries(transport).await;

        let token: Address =
            "0x00000000000000000000000000000000deadbeef".parse().unwrap();
        assert!(queries
            .usd_feed(&factory(), &token)
            .await
            .unwrap_err()
            .is_not_found());
    }
}
