use std::future::Future;
use std::str::FromStr;

use bigdecimal::num_bigint::BigInt;
use bigdecimal::BigDecimal;
use futures::{stream, StreamExt};

use crate::error::Error;
use crate::types::Address;

/// Splits a `"(a,b,c),(d,e,f)"` configuration value into its tuple bodies.
pub fn parse_tuple_string(data: String) -> Vec<String> {
    if data.is_empty() {
        return Vec::new();
    }

    let str = &data[1..];
    let splited = str.split(",(");
    let mut items: Vec<String> = Vec::new();

    for c in splited {
        if let Some(index) = c.find(')') {
            let tuple_data = &c[0..index];
            items.push(tuple_data.to_owned());
        }
    }

    items
}

/// ABI-encodes an unsigned integer as a single 32-byte word.
pub fn encode_word_uint(value: u64) -> String {
    format!("{:0>64x}", value)
}

/// ABI-encodes an address as a single left-padded 32-byte word.
pub fn encode_word_address(address: &Address) -> String {
    format!("{:0>64}", address.hex_digits())
}

/// Splits `0x`-prefixed return data into 32-byte words parsed as unsigned
/// big integers. Empty data yields an empty vector; partial words are a
/// decode fault.
pub fn decode_words(data: &str) -> Result<Vec<BigInt>, Error> {
    let body = data
        .strip_prefix("0x")
        .ok_or_else(|| Error::Decode(format!("missing 0x prefix: {}", data)))?;

    if body.len() % 64 != 0 {
        return Err(Error::Decode(format!(
            "return data is not word aligned ({} hex chars)",
            body.len()
        )));
    }

    let mut words = Vec::with_capacity(body.len() / 64);
    for chunk in 0..body.len() / 64 {
        let word = &body[chunk * 64..(chunk + 1) * 64];
        let value = BigInt::parse_bytes(word.as_bytes(), 16)
            .ok_or_else(|| Error::Decode(format!("malformed word: {}", word)))?;
        words.push(value);
    }

    Ok(words)
}

/// Extracts the address held in the low 20 bytes of a 32-byte word.
pub fn word_to_address(data: &str, index: usize) -> Result<Address, Error> {
    let body = data
        .strip_prefix("0x")
        .ok_or_else(|| Error::Decode(format!("missing 0x prefix: {}", data)))?;
    let start = index * 64;
    let word = body.get(start..start + 64).ok_or_else(|| {
        Error::Decode(format!("return data has no word {}", index))
    })?;

    Address::from_str(&format!("0x{}", &word[24..]))
}

/// Converts a raw on-chain amount into a token-denominated decimal by the
/// token's decimal scale.
pub fn scale_amount(raw: &BigInt, decimals: u32) -> BigDecimal {
    BigDecimal::new(raw.clone(), decimals.into())
}

/// Reinterprets a 32-byte word as a two's-complement signed integer. Words
/// decode as unsigned magnitudes; int256 fields need the sign restored.
pub fn signed_word(value: &BigInt) -> BigInt {
    if value.bits() == 256 {
        value - (BigInt::from(1) << 256u32)
    } else {
        value.clone()
    }
}

/// Runs independent lookups with bounded concurrency, collecting every
/// outcome at its request index so downstream aggregation is deterministic
/// regardless of completion order. One failing lookup never cancels its
/// siblings.
pub async fn buffered_batch<T, F>(
    futures: Vec<F>,
    width: usize,
) -> Vec<Result<T, Error>>
where
    F: Future<Output = Result<T, Error>>,
{
    stream::iter(futures)
        .buffered(width.max(1))
        .collect::<Vec<_>>()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuple_string_parsing() {
        let items = parse_tuple_string(String::from(
            "(local,http://127.0.0.1:8545,0),(infura,https://mainnet.example,1)",
        ));
        assert_eq!(
            items,
            vec![
                "local,http://127.0.0.1:8545,0",
                "infura,https://mainnet.example,1"
            ]
        );
        assert!(parse_tuple_string(String::new()).is_empty());
    }

    #[test]
    fn word_encoding() {
        assert_eq!(
            encode_word_uint(7),
            "0000000000000000000000000000000000000000000000000000000000000007"
        );
        let addr: Address =
            "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2".parse().unwrap();
        assert_eq!(
            encode_word_address(&addr),
            "000000000000000000000000c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"
        );
    }

    #[test]
    fn word_decoding() {
        let data = "0x0000000000000000000000000000000000000000000000000000000000000064";
        let words = decode_words(data).unwrap();
        assert_eq!(words, vec![BigInt::from(100)]);

        assert!(decode_words("0x1234").is_err());
        assert!(decode_words("64").is_err());
        assert!(decode_words("0x").unwrap().is_empty());
    }

    #[test]
    fn address_from_word() {
        let data = "0x000000000000000000000000c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";
        let addr = word_to_address(data, 0).unwrap();
        assert_eq!(addr.as_str(), "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");
        assert!(word_to_address(data, 1).is_err());
    }

    #[test]
    fn signed_word_reinterpretation() {
        let minus_one = (BigInt::from(1) << 256u32) - 1;
        assert_eq!(signed_word(&minus_one), BigInt::from(-1));

        let int256_min = BigInt::from(1) << 255u32;
        assert_eq!(signed_word(&int256_min), -(BigInt::from(1) << 255u32));

        assert_eq!(signed_word(&BigInt::from(42)), BigInt::from(42));
        assert_eq!(signed_word(&BigInt::from(0)), BigInt::from(0));
    }

    #[test]
    fn amount_scaling() {
        use std::str::FromStr;

        let raw = BigInt::from(100_000_000u64);
        assert_eq!(
            scale_amount(&raw, 6),
            BigDecimal::from_str("100").unwrap()
        );
        assert_eq!(
            scale_amount(&BigInt::from(1u8), 18),
            BigDecimal::from_str("0.000000000000000001").unwrap()
        );
        assert_eq!(scale_amount(&BigInt::from(5u8), 0), BigDecimal::from(5));
    }

    #[tokio::test]
    async fn batch_preserves_request_order() {
        use std::time::Duration;

        async fn delayed(delay: u64, value: u8) -> Result<u8, Error> {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(value)
        }

        let results = buffered_batch(
            vec![delayed(30, 1), delayed(5, 2), delayed(15, 3)],
            2,
        )
        .await;

        let values: Vec<u8> =
            results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn batch_collects_failures_independently() {
        async fn outcome(fail: bool, value: u8) -> Result<u8, Error> {
            if fail {
                Err(Error::TransientUpstream(String::from("boom")))
            } else {
                Ok(value)
            }
        }

        let results = buffered_batch(
            vec![outcome(false, 1), outcome(true, 2), outcome(false, 3)],
            4,
        )
        .await;

        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert_eq!(*results[2].as_ref().unwrap(), 3);
    }
}
