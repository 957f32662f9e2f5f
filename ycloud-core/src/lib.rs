//! ycloud Core
//!
//! Building blocks of the Yandex Cloud provider: the attribute model, schemas,
//! the operation waiter, and the CRUD lifecycle every resource is built on.

pub mod config;
pub mod differ;
pub mod error;
pub mod lifecycle;
pub mod operation;
pub mod provider;
pub mod resource;
pub mod retry;
pub mod schema;

#[cfg(test)]
mod testing;
