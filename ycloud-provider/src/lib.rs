//! ycloud Yandex Cloud Provider
//!
//! Resources, data sources and sweepers on top of `ycloud-core`.
//!
//! ## Module Structure
//!
//! - `api` - Service traits, REST and S3 clients, wire types
//! - `resources` - Resource and data source definitions
//! - `provider` - YandexProvider implementation
//! - `sweeper` - Cleanup of objects leaked by acceptance runs
//! - `utils` - Naming and validation helpers

pub mod api;
pub mod provider;
pub mod resources;
pub mod sweeper;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-export main types
pub use provider::YandexProvider;
pub use resources::Clients;
