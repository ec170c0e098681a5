//! ClickHouse access for the Beacon ETL engine: client wrapper, retry
//! discipline, session settings, and the store boundary trait.

pub mod client;
pub mod config;
pub mod retry;
pub mod session;
pub mod store;

pub use client::*;
pub use config::*;
pub use retry::{is_retriable_message, run_with_retry, RetryPolicy};
pub use session::*;
pub use store::Store;
