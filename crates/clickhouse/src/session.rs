//! Session-level execution settings applied at the start of every run.
//!
//! These are an explicit configuration object handed to the orchestrator,
//! not ambient connection state: the whole set is applied as one `SET`
//! statement through the retry executor before any transform runs.

use serde::{Deserialize, Serialize};

/// ClickHouse session settings for heavy transform queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    pub max_threads: u32,
    pub max_memory_usage: u64,
    pub max_bytes_before_external_group_by: u64,
    pub max_bytes_before_external_sort: u64,
    pub distributed_aggregation_memory_efficient: bool,
    /// Comma-separated algorithm preference list, first supported wins.
    pub join_algorithm: String,
    pub join_use_nulls: bool,
    /// Per-query execution ceiling in seconds; the store enforces it, the
    /// orchestrator carries no separate run-level deadline.
    pub max_execution_time: u64,
    pub max_insert_block_size: u64,
    pub send_timeout: u64,
    pub receive_timeout: u64,
    pub connect_timeout: u64,
    pub async_insert: bool,
    pub wait_for_async_insert: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_threads: 8,
            max_memory_usage: 42_000_000_000,
            max_bytes_before_external_group_by: 4_000_000_000,
            max_bytes_before_external_sort: 4_000_000_000,
            distributed_aggregation_memory_efficient: true,
            join_algorithm: "parallel_hash, grace_hash, partial_merge, hash".to_string(),
            join_use_nulls: true,
            max_execution_time: 3600,
            max_insert_block_size: 1_000_000,
            send_timeout: 600,
            receive_timeout: 600,
            connect_timeout: 60,
            async_insert: true,
            wait_for_async_insert: false,
        }
    }
}

impl SessionSettings {
    /// Renders the whole set as a single `SET` statement.
    pub fn to_sql(&self) -> String {
        format!(
            "SET\n    \
             max_threads = {},\n    \
             max_memory_usage = {},\n    \
             max_bytes_before_external_group_by = {},\n    \
             max_bytes_before_external_sort = {},\n    \
             distributed_aggregation_memory_efficient = {},\n    \
             join_algorithm = '{}',\n    \
             join_use_nulls = {},\n    \
             max_execution_time = {},\n    \
             max_insert_block_size = {},\n    \
             send_timeout = {},\n    \
             receive_timeout = {},\n    \
             connect_timeout = {},\n    \
             async_insert = {},\n    \
             wait_for_async_insert = {}",
            self.max_threads,
            self.max_memory_usage,
            self.max_bytes_before_external_group_by,
            self.max_bytes_before_external_sort,
            self.distributed_aggregation_memory_efficient as u8,
            self.join_algorithm.replace('\'', "\\'"),
            self.join_use_nulls as u8,
            self.max_execution_time,
            self.max_insert_block_size,
            self.send_timeout,
            self.receive_timeout,
            self.connect_timeout,
            self.async_insert as u8,
            self.wait_for_async_insert as u8,
        )
    }
}
