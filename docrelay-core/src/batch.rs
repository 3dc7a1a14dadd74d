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

//! Batch file sink.
//!
//! [`BatchFileSink`] appends each payload to an in-memory JSON Lines buffer
//! and publishes the whole buffer as one object on [`Sink::flush`]. Storage is
//! delegated to a [`BatchUploader`], so the same accumulation logic serves any
//! object store.

use crate::event::Namespace;
use crate::normalize::ReplicationPayload;
use crate::sink::{Sink, SinkError, SinkKind, SinkMetadata};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Object store that receives finished batches.
#[async_trait]
pub trait BatchUploader: Send + Sync {
    /// Returns the object path for a batch of `namespace` closed at `closed_at`.
    fn destination_path(&self, namespace: &Namespace, closed_at: DateTime<Utc>) -> String;

    /// Uploads one complete batch to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the object was not stored.
    async fn upload_batch(&self, body: Vec<u8>, path: &str) -> Result<(), SinkError>;

    /// Short name for logs and metrics.
    fn name(&self) -> &str {
        "batch"
    }
}

/// JSON Lines buffer for one run.
#[derive(Debug, Default, Clone)]
pub struct BatchAccumulator {
    buffer: Vec<u8>,
    records: usize,
}

impl BatchAccumulator {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one payload as a JSON line.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn append(&mut self, payload: &ReplicationPayload) -> Result<(), SinkError> {
        let line = payload
            .to_json_line()
            .map_err(|e| SinkError::serialization(e, "Failed to serialize batch line"))?;
        self.buffer.extend_from_slice(&line);
        self.records += 1;
        Ok(())
    }

    /// Number of buffered records.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.records
    }

    /// Returns true when nothing is buffered.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Size of the buffered body in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Takes the buffered body, leaving the accumulator empty.
    pub fn take(&mut self) -> Vec<u8> {
        self.records = 0;
        std::mem::take(&mut self.buffer)
    }

    /// Drops the buffered body.
    pub fn clear(&mut self) {
        self.records = 0;
        self.buffer.clear();
    }
}

/// Sink that publishes one JSON Lines object per run.
pub struct BatchFileSink {
    namespace: Namespace,
    uploader: Arc<dyn BatchUploader>,
    accumulator: BatchAccumulator,
}

impl BatchFileSink {
    /// Creates a batch sink for `namespace` backed by `uploader`.
    pub fn new(namespace: Namespace, uploader: Arc<dyn BatchUploader>) -> Self {
        Self {
            namespace,
            uploader,
            accumulator: BatchAccumulator::new(),
        }
    }

    /// Number of records waiting for the next flush.
    #[must_use]
    pub const fn pending(&self) -> usize {
        self.accumulator.len()
    }
}

#[async_trait]
impl Sink for BatchFileSink {
    fn kind(&self) -> SinkKind {
        SinkKind::BatchFile
    }

    async fn deliver(&mut self, payload: &ReplicationPayload) -> Result<(), SinkError> {
        self.accumulator.append(payload)
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        if self.accumulator.is_empty() {
            debug!(namespace = %self.namespace, "Batch empty, nothing to upload");
            return Ok(());
        }

        let records = self.accumulator.len();
        let path = self.uploader.destination_path(&self.namespace, Utc::now());
        let body = self.accumulator.take();
        let bytes = body.len();

        match self.uploader.upload_batch(body, &path).await {
            Ok(()) => {
                crate::metrics::record_batch_upload(self.uploader.name(), bytes);
                info!(path = %path, records, bytes, "Uploaded batch file");
                Ok(())
            }
            Err(e) => {
                warn!(path = %path, records, error = %e, "Batch upload failed, batch discarded");
                Err(e)
            }
        }
    }

    async fn abort(&mut self) {
        if !self.accumulator.is_empty() {
            debug!(
                namespace = %self.namespace,
                records = self.accumulator.len(),
                "Discarding unpublished batch"
            );
        }
        self.accumulator.clear();
    }

    fn metadata(&self) -> SinkMetadata {
        SinkMetadata::new(self.uploader.name(), SinkKind::BatchFile)
            .with_property("namespace", self.namespace.full_name())
    }
}

impl Drop for BatchFileSink {
    fn drop(&mut self) {
        if !self.accumulator.is_empty() {
            warn!(
                records = self.accumulator.len(),
                "BatchFileSink dropped with unpublished records"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::OperationType;
    use serde_json::Map;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingUploader {
        uploads: Mutex<Vec<(String, Vec<u8>)>>,
        fail: bool,
    }

    #[async_trait]
    impl BatchUploader for RecordingUploader {
        fn destination_path(&self, namespace: &Namespace, closed_at: DateTime<Utc>) -> String {
            format!(
                "{}/{}/{}.jsonl",
                namespace.database,
                namespace.collection,
                closed_at.timestamp()
            )
        }

        async fn upload_batch(&self, body: Vec<u8>, path: &str) -> Result<(), SinkError> {
            if self.fail {
                return Err(SinkError::write_msg("bucket unavailable", true));
            }
            self.uploads.lock().unwrap().push((path.to_string(), body));
            Ok(())
        }
    }

    fn payload(id: &str) -> ReplicationPayload {
        ReplicationPayload {
            id: id.to_string(),
            operation: OperationType::Delete,
            timestamp: 1,
            timestamp_readable: "1970-01-01T00:00:01Z".to_string(),
            fields: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_flush_uploads_one_object_with_all_lines() {
        let uploader = Arc::new(RecordingUploader::default());
        let mut sink = BatchFileSink::new(Namespace::new("shop", "orders"), uploader.clone());

        sink.deliver(&payload("a")).await.unwrap();
        sink.deliver(&payload("b")).await.unwrap();
        sink.deliver(&payload("c")).await.unwrap();
        assert_eq!(sink.pending(), 3);

        sink.flush().await.unwrap();

        let uploads = uploader.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert!(uploads[0].0.starts_with("shop/orders/"));
        let body = String::from_utf8(uploads[0].1.clone()).unwrap();
        assert_eq!(body.lines().count(), 3);
        assert!(body.ends_with('\n'));
        assert_eq!(sink.pending(), 0);
    }

    #[tokio::test]
    async fn test_empty_flush_uploads_nothing() {
        let uploader = Arc::new(RecordingUploader::default());
        let mut sink = BatchFileSink::new(Namespace::new("a", "b"), uploader.clone());

        sink.flush().await.unwrap();
        assert!(uploader.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_abort_discards_buffer() {
        let uploader = Arc::new(RecordingUploader::default());
        let mut sink = BatchFileSink::new(Namespace::new("a", "b"), uploader.clone());

        sink.deliver(&payload("a")).await.unwrap();
        sink.abort().await;
        sink.flush().await.unwrap();

        assert!(uploader.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_upload_surfaces_error() {
        let uploader = Arc::new(RecordingUploader {
            fail: true,
            ..Default::default()
        });
        let mut sink = BatchFileSink::new(Namespace::new("a", "b"), uploader);

        sink.deliver(&payload("a")).await.unwrap();
        let err = sink.flush().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(sink.pending(), 0);
    }
}
