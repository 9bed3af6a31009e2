use bigdecimal::num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::types::Address;

/// A contract view function: primary selector plus the shape of its return
/// data. `name` is the canonical (cache-key) name; the selector is the
/// 4-byte dispatch value carried the same way the upstream ABI files ship it.
#[derive(Debug, Clone, Copy)]
pub struct Function {
    pub name: &'static str,
    pub selector: &'static str,
    pub returns: RetKind,
}

/// Return-data shape of a view call.
#[derive(Debug, Clone, Copy)]
pub enum RetKind {
    Address,
    Uint,
    /// Fixed tuple of `n` 32-byte words, each decoded as an unsigned integer.
    Words(usize),
}

/// Argument to a view call, ABI-encoded as a single 32-byte word.
#[derive(Debug, Clone)]
pub enum CallArg {
    Address(Address),
    Uint(u64),
}

impl CallArg {
    /// Canonical text used inside cache keys.
    pub fn canonical(&self) -> String {
        match self {
            CallArg::Address(a) => a.as_str().to_owned(),
            CallArg::Uint(v) => v.to_string(),
        }
    }
}

/// Decoded return value of a view call. Integers are kept as decimal strings
/// so heterogeneous widths round-trip exactly through the serialized cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CallValue {
    Address(Address),
    Uint(String),
    Words(Vec<String>),
}

impl CallValue {
    pub fn as_address(&self) -> Result<&Address, Error> {
        match self {
            CallValue::Address(a) => Ok(a),
            other => {
                Err(Error::Decode(format!("expected address, got {:?}", other)))
            },
        }
    }

    pub fn as_bigint(&self) -> Result<BigInt, Error> {
        match self {
            CallValue::Uint(v) => BigInt::parse_bytes(v.as_bytes(), 10)
                .ok_or_else(|| {
                    Error::Decode(format!("malformed uint: {}", v))
                }),
            other => {
                Err(Error::Decode(format!("expected uint, got {:?}", other)))
            },
        }
    }

    pub fn as_u64(&self) -> Result<u64, Error> {
        match self {
            CallValue::Uint(v) => v
                .parse()
                .map_err(|_| Error::Decode(format!("uint out of range: {}", v))),
            other => {
                Err(Error::Decode(format!("expected uint, got {:?}", other)))
            },
        }
    }

    pub fn word_bigint(&self, index: usize) -> Result<BigInt, Error> {
        match self {
            CallValue::Words(words) => {
                let word = words.get(index).ok_or_else(|| {
                    Error::Decode(format!(
                        "tuple has {} words, wanted index {}",
                        words.len(),
                        index
                    ))
                })?;
                BigInt::parse_bytes(word.as_bytes(), 10).ok_or_else(|| {
                    Error::Decode(format!("malformed uint: {}", word))
                })
            },
            other => {
                Err(Error::Decode(format!("expected tuple, got {:?}", other)))
            },
        }
    }
}

/// One `eth_call` against a deployed contract.
#[derive(Debug, Clone)]
pub struct EthCall {
    pub to: Address,
    pub data: String,
}

#[derive(Debug, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    pub params: Value,
}

impl RpcRequest {
    pub fn eth_call(call: &EthCall, id: u64) -> RpcRequest {
        RpcRequest {
            jsonrpc: "2.0",
            id,
            method: "eth_call",
            params: serde_json::json!([
                { "to": call.to.as_str(), "data": call.data },
                "latest"
            ]),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcReply {
    pub result: Option<Value>,
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
}
