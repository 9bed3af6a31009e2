use crate::types::{Address, CallArg};

/// Key for a cached contract view call. Arguments are rendered in canonical
/// form so the same logical call always lands on the same row.
pub fn call_key(contract: &Address, function: &str, args: &[CallArg]) -> String {
    let mut key = format!("{}:{}", contract.as_str(), function);

    for arg in args {
        key.push(':');
        key.push_str(&arg.canonical());
    }

    key
}

/// Key for a cached USD spot price.
pub fn price_key(token: &Address) -> String {
    format!("price:usd:{}", token.as_str())
}

/// Key for a cached token-to-feed mapping from the oracle registry.
pub fn feed_key(token: &Address) -> String {
    format!("feed:usd:{}", token.as_str())
}
