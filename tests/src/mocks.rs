//! Mock implementations for testing.

use async_trait::async_trait;
use parking_lot::Mutex;

use beacon_clickhouse::Store;
use beacon_core::{Error, Result};

/// Scripted store that records every statement and can fail selected ones.
///
/// Implements the same `Store` trait as the real client, so the generic
/// execution paths (watermark bookkeeping, backfill groups) run against it
/// unchanged. Failures are reported with a transient-looking message; the
/// mock itself never retries, matching the real client's contract of one
/// settled outcome per call.
#[derive(Default)]
pub struct MockStore {
    /// Every command statement issued, in issue order.
    commands: Mutex<Vec<String>>,
    /// Result returned by the next `fetch_scalar` calls.
    scalar: Mutex<Option<String>>,
    /// Statements containing any of these markers fail.
    fail_markers: Mutex<Vec<String>>,
    /// Health probe outcome.
    unhealthy: Mutex<bool>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded command statements.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    /// Recorded commands containing `marker`.
    pub fn commands_containing(&self, marker: &str) -> Vec<String> {
        self.commands
            .lock()
            .iter()
            .filter(|sql| sql.contains(marker))
            .cloned()
            .collect()
    }

    /// Scripts the next watermark read.
    pub fn set_scalar(&self, value: Option<&str>) {
        *self.scalar.lock() = value.map(str::to_string);
    }

    /// Any command whose statement contains `marker` will fail.
    pub fn fail_statements_containing(&self, marker: &str) {
        self.fail_markers.lock().push(marker.to_string());
    }

    pub fn set_unhealthy(&self, unhealthy: bool) {
        *self.unhealthy.lock() = unhealthy;
    }
}

#[async_trait]
impl Store for MockStore {
    async fn command(&self, sql: &str, _desc: &str) -> Result<()> {
        let failing = self
            .fail_markers
            .lock()
            .iter()
            .any(|marker| sql.contains(marker));

        if failing {
            return Err(Error::store("socket hang up"));
        }

        self.commands.lock().push(sql.to_string());
        Ok(())
    }

    async fn fetch_scalar(&self, _sql: &str, _desc: &str) -> Result<Option<String>> {
        Ok(self.scalar.lock().clone())
    }

    async fn health_check(&self) -> Result<()> {
        if *self.unhealthy.lock() {
            Err(Error::health("mock store down"))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_store_records_commands() {
        let mock = MockStore::new();
        mock.command("INSERT INTO t VALUES (1)", "test").await.unwrap();

        assert_eq!(mock.commands().len(), 1);
        assert_eq!(mock.commands_containing("INSERT INTO t").len(), 1);
    }

    #[tokio::test]
    async fn test_mock_store_failure_markers() {
        let mock = MockStore::new();
        mock.fail_statements_containing("poison");

        assert!(mock.command("SELECT poison", "test").await.is_err());
        assert!(mock.command("SELECT fine", "test").await.is_ok());
        // Failed statements are not recorded as applied.
        assert_eq!(mock.commands().len(), 1);
    }
}
