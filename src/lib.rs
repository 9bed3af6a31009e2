pub mod cache;
pub mod cache_keys;
pub mod configuration;
pub mod error;
pub mod handler;
pub mod helpers;
pub mod price;
pub mod provider;
pub mod types;
pub mod vaults;
