//! Durable storage for the task queue: schema, connection pooling, and
//! typed query functions over the `tasks`, `run_history`, and
//! `registered_groups` tables.

pub mod config;
pub mod error;
pub mod models;
pub mod pool;
pub mod queries;

pub use error::{StoreError, StoreResult};
