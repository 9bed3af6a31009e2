pub mod http;
pub mod query;
pub mod rpc;
