// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Defaults shared by the configuration and the pipeline stages.

pub const DEFAULT_APP_NAME: &str = "eventlog-shipper";

/// Collection names are `{prefix}{YYYY.MM}`.
pub const DEFAULT_INDEX_PREFIX: &str = "beat_log1c_";
pub const DEFAULT_DOC_TYPE: &str = "job";
pub const DEFAULT_SINK_TIMEOUT_SECS: u64 = 15;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Total delivery attempts per event, the first one included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// The n-th retry waits n times this step.
pub const DEFAULT_BACKOFF_STEP_MS: u64 = 2_000;

/// Deliveries between two statistics lines of a worker.
pub const STATS_REPORT_INTERVAL: u64 = 100;

/// Record timestamps are local time of the servers writing them (UTC+3).
pub const DEFAULT_UTC_OFFSET_SECS: i32 = 3 * 3_600;
pub const DEFAULT_LOG_EXTENSION: &str = "lgp";
pub const DEFAULT_METADATA_FILE: &str = "1Cv8.lgf";

pub const DEFAULT_RESTART_DELAY_SECS: u64 = 60;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;
pub const DEFAULT_METRICS_PORT: u16 = 54_545;
