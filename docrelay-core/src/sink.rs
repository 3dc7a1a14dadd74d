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

//! Sink trait and error types.
//!
//! A [`Sink`] receives every normalized [`ReplicationPayload`] of a run and
//! delivers it to one external system: a search index, a batch object store,
//! a record stream, a log topic or a notification topic.
//!
//! Sinks that deliver immediately only implement [`Sink::deliver`]. Sinks that
//! accumulate a batch also implement [`Sink::flush`], which publishes the
//! batch as a single unit, and [`Sink::abort`], which discards it.
//!
//! # Implementing a Sink
//!
//! ```rust
//! use docrelay_core::normalize::ReplicationPayload;
//! use docrelay_core::sink::{Sink, SinkError, SinkKind, SinkMetadata};
//! use async_trait::async_trait;
//!
//! /// Prints every payload as a JSON line.
//! pub struct StdoutSink;
//!
//! #[async_trait]
//! impl Sink for StdoutSink {
//!     fn kind(&self) -> SinkKind {
//!         SinkKind::Log
//!     }
//!
//!     async fn deliver(&mut self, payload: &ReplicationPayload) -> Result<(), SinkError> {
//!         let json = payload
//!             .to_json()
//!             .map_err(|e| SinkError::serialization(e, "Failed to serialize payload"))?;
//!         println!("{json}");
//!         Ok(())
//!     }
//!
//!     fn metadata(&self) -> SinkMetadata {
//!         SinkMetadata::new("stdout", SinkKind::Log)
//!     }
//! }
//! ```

use crate::normalize::ReplicationPayload;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Category of a sink. Determines its default delivery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    /// Keyed document index (upsert on write, delete on delete)
    Index,

    /// Batch file published once per run
    BatchFile,

    /// Keyed record stream
    Stream,

    /// Keyed log topic
    Log,

    /// Notification topic
    Notification,
}

impl SinkKind {
    /// Returns the label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::BatchFile => "batch_file",
            Self::Stream => "stream",
            Self::Log => "log",
            Self::Notification => "notification",
        }
    }
}

impl std::fmt::Display for SinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur when delivering to a sink.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Connection to the sink failed.
    #[error("Connection error: {message}")]
    ConnectionError {
        /// Human-readable error message
        message: String,
        /// The underlying connection error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The payload could not be encoded for the sink.
    #[error("Serialization error: {message}")]
    SerializationError {
        /// Human-readable error message
        message: String,
        /// The underlying serialization error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The sink rejected the write.
    #[error("Write error: {message}")]
    WriteError {
        /// Human-readable error message
        message: String,
        /// Whether this specific write error is retryable
        retryable: bool,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid sink configuration.
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Human-readable error message
        message: String,
        /// Configuration parameter name if applicable
        parameter: Option<String>,
    },

    /// Anything else.
    #[error("Sink error: {message}")]
    Other {
        /// Human-readable error message
        message: String,
        /// Whether this error is retryable
        retryable: bool,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl SinkError {
    /// Creates a connection error from any error type.
    #[must_use]
    pub fn connection(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::ConnectionError {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a connection error with a custom message.
    #[must_use]
    pub fn connection_msg(message: impl Into<String>) -> Self {
        Self::ConnectionError {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a serialization error from any error type.
    #[must_use]
    pub fn serialization(
        source: impl std::error::Error + Send + Sync + 'static,
        message: impl Into<String>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a write error with retryability information.
    #[must_use]
    pub fn write(source: impl std::error::Error + Send + Sync + 'static, retryable: bool) -> Self {
        Self::WriteError {
            message: source.to_string(),
            retryable,
            source: Some(Box::new(source)),
        }
    }

    /// Creates a write error with a custom message.
    #[must_use]
    pub fn write_msg(message: impl Into<String>, retryable: bool) -> Self {
        Self::WriteError {
            message: message.into(),
            retryable,
            source: None,
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>, parameter: Option<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
            parameter,
        }
    }

    /// Creates a generic error.
    #[must_use]
    pub fn other(source: impl std::error::Error + Send + Sync + 'static, retryable: bool) -> Self {
        Self::Other {
            message: source.to_string(),
            retryable,
            source: Some(Box::new(source)),
        }
    }

    /// Returns whether a later attempt could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionError { .. } => true,
            Self::SerializationError { .. } | Self::ConfigurationError { .. } => false,
            Self::WriteError { retryable, .. } | Self::Other { retryable, .. } => *retryable,
        }
    }

    /// Returns true when the cached connection should be dropped.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::ConnectionError { .. })
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::ConnectionError { .. } => "connection",
            Self::SerializationError { .. } => "serialization",
            Self::WriteError { .. } => "write",
            Self::ConfigurationError { .. } => "configuration",
            Self::Other { .. } => "other",
        }
    }
}

/// Descriptive information about a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkMetadata {
    /// Human-readable sink name (e.g. "elasticsearch", "s3")
    pub name: String,

    /// Sink category
    pub kind: SinkKind,

    /// Additional sink-specific properties
    pub properties: HashMap<String, String>,
}

impl SinkMetadata {
    /// Creates new metadata.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: SinkKind) -> Self {
        Self {
            name: name.into(),
            kind,
            properties: HashMap::new(),
        }
    }

    /// Adds a custom property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// A replication target.
///
/// Payloads arrive in source order, one call to [`deliver`](Self::deliver)
/// per replicated event. Implementations must be `Send + Sync` so the
/// dispatcher can hold them as trait objects across await points.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Returns the sink category.
    fn kind(&self) -> SinkKind;

    /// Delivers one payload.
    ///
    /// Immediate sinks write through; batch sinks append to their buffer.
    ///
    /// # Errors
    ///
    /// Returns a [`SinkError`] when the payload could not be delivered.
    async fn deliver(&mut self, payload: &ReplicationPayload) -> Result<(), SinkError>;

    /// Publishes anything buffered since the last flush.
    ///
    /// Called once at the end of a run that processed at least one event.
    /// Must be all-or-nothing for batch sinks.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffered data could not be published.
    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Discards anything buffered since the last flush.
    async fn abort(&mut self) {}

    /// Releases connections and other long-lived resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink could not be closed cleanly.
    async fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Returns descriptive information about this sink.
    fn metadata(&self) -> SinkMetadata {
        SinkMetadata::new("unknown", self.kind())
    }
}

#[derive(Debug, Default)]
struct MockSinkState {
    delivered: Vec<ReplicationPayload>,
    buffered: Vec<ReplicationPayload>,
    flush_count: usize,
    abort_count: usize,
    close_count: usize,
}

/// In-memory sink for testing.
///
/// Records every delivered payload. Batch-kind mocks buffer deliveries until
/// [`flush`](Sink::flush) and drop them on [`abort`](Sink::abort). Inspection
/// goes through a [`MockSinkHandle`] that stays valid after the sink is moved
/// into a dispatcher.
///
/// ```rust
/// use docrelay_core::sink::{MockSink, SinkKind};
///
/// let sink = MockSink::new(SinkKind::Index).with_name("search");
/// let handle = sink.handle();
/// assert_eq!(handle.delivered_count(), 0);
/// ```
#[derive(Debug)]
pub struct MockSink {
    name: String,
    kind: SinkKind,
    fail_deliveries_after: Option<usize>,
    fail_flush: bool,
    state: Arc<Mutex<MockSinkState>>,
}

/// Shared view of a [`MockSink`]'s recorded activity.
#[derive(Debug, Clone)]
pub struct MockSinkHandle {
    state: Arc<Mutex<MockSinkState>>,
}

impl MockSink {
    /// Creates a new mock of the given kind.
    #[must_use]
    pub fn new(kind: SinkKind) -> Self {
        Self {
            name: format!("mock-{kind}"),
            kind,
            fail_deliveries_after: None,
            fail_flush: false,
            state: Arc::default(),
        }
    }

    /// Sets the reported sink name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Fails every delivery.
    #[must_use]
    pub const fn with_delivery_failures(mut self) -> Self {
        self.fail_deliveries_after = Some(0);
        self
    }

    /// Accepts `count` deliveries, then fails every later one.
    #[must_use]
    pub const fn failing_after(mut self, count: usize) -> Self {
        self.fail_deliveries_after = Some(count);
        self
    }

    /// Fails every flush.
    #[must_use]
    pub const fn with_flush_failures(mut self) -> Self {
        self.fail_flush = true;
        self
    }

    /// Returns a handle for inspecting recorded activity.
    #[must_use]
    pub fn handle(&self) -> MockSinkHandle {
        MockSinkHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockSinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MockSinkHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, MockSinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns every payload that reached the sink's target.
    ///
    /// For batch-kind mocks this only includes flushed payloads.
    #[must_use]
    pub fn delivered(&self) -> Vec<ReplicationPayload> {
        self.lock().delivered.clone()
    }

    /// Returns the number of payloads that reached the sink's target.
    #[must_use]
    pub fn delivered_count(&self) -> usize {
        self.lock().delivered.len()
    }

    /// Returns the number of payloads waiting for a flush.
    #[must_use]
    pub fn buffered_count(&self) -> usize {
        self.lock().buffered.len()
    }

    /// Returns the number of flush calls.
    #[must_use]
    pub fn flush_count(&self) -> usize {
        self.lock().flush_count
    }

    /// Returns the number of abort calls.
    #[must_use]
    pub fn abort_count(&self) -> usize {
        self.lock().abort_count
    }

    /// Returns the number of close calls.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.lock().close_count
    }
}

#[async_trait]
impl Sink for MockSink {
    fn kind(&self) -> SinkKind {
        self.kind
    }

    async fn deliver(&mut self, payload: &ReplicationPayload) -> Result<(), SinkError> {
        let kind = self.kind;
        let limit = self.fail_deliveries_after;
        let mut state = self.lock();

        let accepted = state.delivered.len() + state.buffered.len();
        if limit.is_some_and(|limit| accepted >= limit) {
            return Err(SinkError::write_msg("Simulated delivery failure", true));
        }

        if kind == SinkKind::BatchFile {
            state.buffered.push(payload.clone());
        } else {
            state.delivered.push(payload.clone());
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        let fail = self.fail_flush;
        let mut state = self.lock();
        state.flush_count += 1;

        if fail {
            return Err(SinkError::write_msg("Simulated flush failure", true));
        }

        let batch = std::mem::take(&mut state.buffered);
        state.delivered.extend(batch);
        Ok(())
    }

    async fn abort(&mut self) {
        let mut state = self.lock();
        state.abort_count += 1;
        state.buffered.clear();
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.lock().close_count += 1;
        Ok(())
    }

    fn metadata(&self) -> SinkMetadata {
        SinkMetadata::new(self.name.clone(), self.kind).with_property("mock", "true")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::OperationType;
    use serde_json::Map;

    fn payload(id: &str) -> ReplicationPayload {
        ReplicationPayload {
            id: id.to_string(),
            operation: OperationType::Insert,
            timestamp: 100,
            timestamp_readable: "1970-01-01T00:01:40Z".to_string(),
            fields: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_mock_sink_records_deliveries() {
        let mut sink = MockSink::new(SinkKind::Index);
        let handle = sink.handle();

        sink.deliver(&payload("a")).await.unwrap();
        sink.deliver(&payload("b")).await.unwrap();

        assert_eq!(handle.delivered_count(), 2);
        assert_eq!(handle.delivered()[1].id, "b");
    }

    #[tokio::test]
    async fn test_batch_mock_publishes_on_flush() {
        let mut sink = MockSink::new(SinkKind::BatchFile);
        let handle = sink.handle();

        sink.deliver(&payload("a")).await.unwrap();
        assert_eq!(handle.delivered_count(), 0);
        assert_eq!(handle.buffered_count(), 1);

        sink.flush().await.unwrap();
        assert_eq!(handle.delivered_count(), 1);
        assert_eq!(handle.buffered_count(), 0);
        assert_eq!(handle.flush_count(), 1);
    }

    #[tokio::test]
    async fn test_batch_mock_abort_discards_buffer() {
        let mut sink = MockSink::new(SinkKind::BatchFile);
        let handle = sink.handle();

        sink.deliver(&payload("a")).await.unwrap();
        sink.abort().await;
        sink.flush().await.unwrap();

        assert_eq!(handle.delivered_count(), 0);
        assert_eq!(handle.abort_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_sink_failing_after() {
        let mut sink = MockSink::new(SinkKind::Stream).failing_after(1);

        sink.deliver(&payload("a")).await.unwrap();
        let err = sink.deliver(&payload("b")).await.unwrap_err();

        assert!(matches!(err, SinkError::WriteError { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_mock_sink_flush_failure() {
        let mut sink = MockSink::new(SinkKind::BatchFile).with_flush_failures();
        let handle = sink.handle();

        sink.deliver(&payload("a")).await.unwrap();
        assert!(sink.flush().await.is_err());
        assert_eq!(handle.delivered_count(), 0);
    }

    #[tokio::test]
    async fn test_mock_sink_metadata() {
        let sink = MockSink::new(SinkKind::Notification).with_name("alerts");
        let meta = sink.metadata();

        assert_eq!(meta.name, "alerts");
        assert_eq!(meta.kind, SinkKind::Notification);
        assert_eq!(meta.properties.get("mock"), Some(&"true".to_string()));
    }

    #[test]
    fn test_sink_error_classification() {
        assert!(SinkError::connection_msg("down").is_retryable());
        assert!(SinkError::connection_msg("down").is_connection());
        assert!(!SinkError::serialization(std::io::Error::other("bad"), "bad").is_retryable());
        assert!(SinkError::write_msg("throttled", true).is_retryable());
        assert!(!SinkError::write_msg("forbidden", false).is_retryable());
        assert!(!SinkError::configuration("missing", Some("bucket".into())).is_retryable());
        assert_eq!(SinkError::write_msg("x", false).label(), "write");
    }
}
