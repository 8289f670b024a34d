// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metric names and recording helpers.
//!
//! Recording goes through the `metrics` facade; without an installed
//! recorder every call is a no-op.

use std::time::Duration;

use metrics::{counter, gauge};

pub const TAIL_READ_SECONDS: &str = "eventlog_tail_read_seconds";
pub const RECORDS_PARSED: &str = "eventlog_records_parsed_total";
pub const RECORDS_MALFORMED: &str = "eventlog_records_malformed_total";
pub const EVENTS_ENQUEUED: &str = "eventlog_events_enqueued_total";
pub const PIPELINE_FAILURES: &str = "eventlog_pipeline_failures_total";
pub const DELIVERIES: &str = "eventlog_deliveries_total";
pub const DELIVERIES_DROPPED: &str = "eventlog_deliveries_dropped_total";

/// Duration of the last tail read of a source.
pub fn record_tail_read(source: &str, elapsed: Duration) {
    gauge!(TAIL_READ_SECONDS, "source" => source.to_string()).set(elapsed.as_secs_f64());
}

pub fn record_parsed(source: &str) {
    counter!(RECORDS_PARSED, "source" => source.to_string()).increment(1);
}

pub fn record_malformed(source: &str) {
    counter!(RECORDS_MALFORMED, "source" => source.to_string()).increment(1);
}

pub fn record_enqueued(source: &str) {
    counter!(EVENTS_ENQUEUED, "source" => source.to_string()).increment(1);
}

pub fn record_pipeline_failure(source: &str) {
    counter!(PIPELINE_FAILURES, "source" => source.to_string()).increment(1);
}

/// A finished delivery; `status` is 0 when no response was received.
pub fn record_delivery(status: u16) {
    counter!(DELIVERIES, "status" => status.to_string()).increment(1);
}

pub fn record_dropped() {
    counter!(DELIVERIES_DROPPED).increment(1);
}
