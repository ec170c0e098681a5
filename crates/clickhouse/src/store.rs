//! The store boundary consumed by generic execution paths.

use async_trait::async_trait;

use beacon_core::Result;

use crate::client::ClickHouseClient;

/// The contract the engine needs from the analytical store.
///
/// `ClickHouseClient` is the production implementation; scenario tests
/// substitute a scripted store. Retry and backoff are the implementor's
/// concern, so callers issue each operation exactly once.
#[async_trait]
pub trait Store: Send + Sync {
    /// Runs a statement that returns no rows.
    async fn command(&self, sql: &str, desc: &str) -> Result<()>;

    /// Runs a single-column, at-most-one-row string projection.
    async fn fetch_scalar(&self, sql: &str, desc: &str) -> Result<Option<String>>;

    /// Cheap liveness probe.
    async fn health_check(&self) -> Result<()>;
}

#[async_trait]
impl Store for ClickHouseClient {
    async fn command(&self, sql: &str, desc: &str) -> Result<()> {
        ClickHouseClient::command(self, sql, desc).await
    }

    async fn fetch_scalar(&self, sql: &str, desc: &str) -> Result<Option<String>> {
        self.fetch_optional::<String>(sql, desc).await
    }

    async fn health_check(&self) -> Result<()> {
        ClickHouseClient::health_check(self).await
    }
}
