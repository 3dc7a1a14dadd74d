// Copyright 2025 Docrelay Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Metrics instrumentation for replication runs.
//!
//! Uses the `metrics` facade, so any exporter (Prometheus, StatsD, ...) can be
//! installed by the binary. Without a recorder every call is a no-op.
//!
//! All names carry the `docrelay_` prefix and follow Prometheus conventions
//! (`_total` for counters, unit suffix for histograms). Labels are kept to
//! low-cardinality values: collection, operation, sink name and error type.
//!
//! ```rust
//! use docrelay_core::metrics::{self, ErrorCategory};
//!
//! metrics::increment_events_processed("orders", "insert");
//! metrics::increment_sink_failures("elasticsearch", ErrorCategory::Connection);
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

#[doc(hidden)]
pub const METRIC_PREFIX: &str = "docrelay";

#[doc(hidden)]
pub const EVENTS_PROCESSED_TOTAL: &str = "docrelay_events_processed_total";

#[doc(hidden)]
pub const EVENTS_SKIPPED_TOTAL: &str = "docrelay_events_skipped_total";

#[doc(hidden)]
pub const SINK_DELIVERIES_TOTAL: &str = "docrelay_sink_deliveries_total";

#[doc(hidden)]
pub const SINK_FAILURES_TOTAL: &str = "docrelay_sink_failures_total";

#[doc(hidden)]
pub const SINK_DELIVERY_DURATION_SECONDS: &str = "docrelay_sink_delivery_duration_seconds";

#[doc(hidden)]
pub const CHECKPOINT_COMMITS_TOTAL: &str = "docrelay_checkpoint_commits_total";

#[doc(hidden)]
pub const HISTORY_LOST_TOTAL: &str = "docrelay_history_lost_total";

#[doc(hidden)]
pub const BATCH_UPLOAD_BYTES: &str = "docrelay_batch_upload_bytes";

#[doc(hidden)]
pub const RUN_DURATION_SECONDS: &str = "docrelay_run_duration_seconds";

#[doc(hidden)]
pub const LAST_RUN_STATUS: &str = "docrelay_last_run_status";

/// Registers descriptions for all metrics.
///
/// Call once after installing a recorder.
pub fn init_metrics() {
    describe_counter!(
        EVENTS_PROCESSED_TOTAL,
        "Total number of change events fanned out to every required sink"
    );
    describe_counter!(
        EVENTS_SKIPPED_TOTAL,
        "Total number of change events observed but not replicated"
    );
    describe_counter!(
        SINK_DELIVERIES_TOTAL,
        "Total number of successful payload deliveries per sink"
    );
    describe_counter!(
        SINK_FAILURES_TOTAL,
        "Total number of failed payload deliveries per sink"
    );
    describe_counter!(
        CHECKPOINT_COMMITS_TOTAL,
        "Total number of checkpoint writes"
    );
    describe_counter!(
        HISTORY_LOST_TOTAL,
        "Total number of runs that found the checkpoint outside the retained history"
    );

    describe_histogram!(
        SINK_DELIVERY_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time taken to deliver one payload to one sink"
    );
    describe_histogram!(
        BATCH_UPLOAD_BYTES,
        metrics::Unit::Bytes,
        "Size of each uploaded batch file"
    );
    describe_histogram!(
        RUN_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Wall time of one replication run"
    );

    describe_gauge!(
        LAST_RUN_STATUS,
        "Status of the last run: 0=success, 1=no events, 2=failure"
    );
}

/// Increments the count of replicated events.
pub fn increment_events_processed(collection: &str, operation: &str) {
    counter!(EVENTS_PROCESSED_TOTAL, "collection" => collection.to_string(), "operation" => operation.to_string())
        .increment(1);
}

/// Increments the count of observed events that were not replicated.
pub fn increment_events_skipped(collection: &str, operation: &str) {
    counter!(EVENTS_SKIPPED_TOTAL, "collection" => collection.to_string(), "operation" => operation.to_string())
        .increment(1);
}

/// Increments the count of successful deliveries to `sink`.
pub fn increment_sink_deliveries(sink: &str) {
    counter!(SINK_DELIVERIES_TOTAL, "sink" => sink.to_string()).increment(1);
}

/// Increments the count of failed deliveries to `sink`.
pub fn increment_sink_failures(sink: &str, error_category: ErrorCategory) {
    counter!(
        SINK_FAILURES_TOTAL,
        "sink" => sink.to_string(),
        "error_type" => error_category.as_str()
    )
    .increment(1);
}

/// Records how long one delivery took.
pub fn record_sink_delivery_duration(duration: Duration, sink: &str) {
    histogram!(SINK_DELIVERY_DURATION_SECONDS, "sink" => sink.to_string())
        .record(duration.as_secs_f64());
}

/// Increments the count of checkpoint writes.
pub fn increment_checkpoint_commits(collection: &str) {
    counter!(CHECKPOINT_COMMITS_TOTAL, "collection" => collection.to_string()).increment(1);
}

/// Increments the count of runs that lost their position in the history.
pub fn increment_history_lost(collection: &str) {
    counter!(HISTORY_LOST_TOTAL, "collection" => collection.to_string()).increment(1);
}

/// Records the size of an uploaded batch.
#[allow(clippy::cast_precision_loss)]
pub fn record_batch_upload(sink: &str, bytes: usize) {
    histogram!(BATCH_UPLOAD_BYTES, "sink" => sink.to_string()).record(bytes as f64);
}

/// Records the wall time of one run.
pub fn record_run_duration(duration: Duration, collection: &str) {
    histogram!(RUN_DURATION_SECONDS, "collection" => collection.to_string())
        .record(duration.as_secs_f64());
}

/// Sets the last run status gauge.
pub fn set_last_run_status(status: RunStatusGauge) {
    gauge!(LAST_RUN_STATUS).set(f64::from(status as u8));
}

/// Values of the `last_run_status` gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunStatusGauge {
    /// Events were replicated and committed.
    Success = 0,
    /// Nothing to replicate.
    NoEvents = 1,
    /// The run failed.
    Failure = 2,
}

/// Error categories for metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network, TCP or DNS failure
    Connection,
    /// Encoding failure
    Serialization,
    /// Rejected write
    Write,
    /// Invalid configuration
    Configuration,
    /// Unclassified
    Unknown,
}

impl ErrorCategory {
    /// Returns the category as a static label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection_error",
            Self::Serialization => "serialization_error",
            Self::Write => "write_error",
            Self::Configuration => "configuration_error",
            Self::Unknown => "unknown_error",
        }
    }
}

impl From<&crate::sink::SinkError> for ErrorCategory {
    fn from(err: &crate::sink::SinkError) -> Self {
        use crate::sink::SinkError;
        match err {
            SinkError::ConnectionError { .. } => Self::Connection,
            SinkError::SerializationError { .. } => Self::Serialization,
            SinkError::WriteError { .. } => Self::Write,
            SinkError::ConfigurationError { .. } => Self::Configuration,
            SinkError::Other { .. } => Self::Unknown,
        }
    }
}

/// Records the elapsed time when dropped.
///
/// ```rust
/// use docrelay_core::metrics::Timer;
///
/// {
///     let _timer = Timer::new("kinesis", |duration, sink| {
///         docrelay_core::metrics::record_sink_delivery_duration(duration, sink);
///     });
///     // ... delivery ...
/// }
/// ```
pub struct Timer<F>
where
    F: FnOnce(Duration, &str),
{
    start: std::time::Instant,
    label: String,
    record_fn: Option<F>,
}

impl<F> Timer<F>
where
    F: FnOnce(Duration, &str),
{
    /// Starts a timer labelled `label`.
    pub fn new(label: impl Into<String>, record_fn: F) -> Self {
        Self {
            start: std::time::Instant::now(),
            label: label.into(),
            record_fn: Some(record_fn),
        }
    }
}

impl<F> Drop for Timer<F>
where
    F: FnOnce(Duration, &str),
{
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        if let Some(record_fn) = self.record_fn.take() {
            record_fn(duration, &self.label);
        }
    }
}
