//! ClickHouse client wrapper.
//!
//! Every operation issued through this wrapper passes through the retry
//! executor; callers never talk to the raw driver for engine work.

use clickhouse::Client;
use serde::Deserialize;
use tracing::info;

use beacon_core::{Error, Result};

use crate::config::ClickHouseConfig;
use crate::retry::{run_with_retry, RetryPolicy};

/// ClickHouse client wrapper with a baked-in retry policy.
#[derive(Clone)]
pub struct ClickHouseClient {
    inner: Client,
    config: ClickHouseConfig,
    retry: RetryPolicy,
}

impl ClickHouseClient {
    /// Creates a new ClickHouse client.
    pub fn new(config: ClickHouseConfig) -> Result<Self> {
        let mut client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database);

        if let Some(ref user) = config.username {
            client = client.with_user(user);
        }

        if let Some(ref pass) = config.password {
            client = client.with_password(pass);
        }

        info!(
            url = %config.url,
            database = %config.database,
            "Created ClickHouse client"
        );

        let retry = config.retry_policy();
        Ok(Self {
            inner: client,
            config,
            retry,
        })
    }

    /// Returns the inner clickhouse client.
    pub fn inner(&self) -> &Client {
        &self.inner
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClickHouseConfig {
        &self.config
    }

    /// Runs a statement that returns no rows (DDL, `INSERT ... SELECT`, `SET`).
    pub async fn command(&self, sql: &str, desc: &str) -> Result<()> {
        let inner = &self.inner;
        run_with_retry(&self.retry, desc, move || async move {
            inner
                .query(sql)
                .execute()
                .await
                .map_err(|e| Error::store(format!("{}: {}", desc, e)))
        })
        .await
    }

    /// Fetches all rows of a typed query.
    pub async fn fetch_all<T>(&self, sql: &str, desc: &str) -> Result<Vec<T>>
    where
        T: clickhouse::Row + for<'b> Deserialize<'b>,
    {
        let inner = &self.inner;
        run_with_retry(&self.retry, desc, move || async move {
            inner
                .query(sql)
                .fetch_all::<T>()
                .await
                .map_err(|e| Error::store(format!("{}: {}", desc, e)))
        })
        .await
    }

    /// Fetches exactly one row of a typed query.
    pub async fn fetch_one<T>(&self, sql: &str, desc: &str) -> Result<T>
    where
        T: clickhouse::Row + for<'b> Deserialize<'b>,
    {
        let inner = &self.inner;
        run_with_retry(&self.retry, desc, move || async move {
            inner
                .query(sql)
                .fetch_one::<T>()
                .await
                .map_err(|e| Error::store(format!("{}: {}", desc, e)))
        })
        .await
    }

    /// Fetches at most one row of a typed query.
    pub async fn fetch_optional<T>(&self, sql: &str, desc: &str) -> Result<Option<T>>
    where
        T: clickhouse::Row + for<'b> Deserialize<'b>,
    {
        let inner = &self.inner;
        run_with_retry(&self.retry, desc, move || async move {
            inner
                .query(sql)
                .fetch_optional::<T>()
                .await
                .map_err(|e| Error::store(format!("{}: {}", desc, e)))
        })
        .await
    }

    /// Cheap liveness probe. Failure here is fatal for a run.
    pub async fn health_check(&self) -> Result<()> {
        self.inner
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .map(|_| ())
            .map_err(|e| Error::health(e.to_string()))
    }
}
