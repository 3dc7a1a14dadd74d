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

//! Kinesis stream sink.
//!
//! Publishes every payload with `PutRecord`, using the document id as the
//! partition key so all changes to one document land on the same shard in
//! order.

use crate::aws::{service_error, AwsSettings};
use async_trait::async_trait;
use aws_sdk_kinesis::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_kinesis::operation::put_record::PutRecordError;
use aws_sdk_kinesis::primitives::Blob;
use aws_sdk_kinesis::Client as KinesisClient;
use docrelay_core::normalize::ReplicationPayload;
use docrelay_core::sink::{Sink, SinkError, SinkKind, SinkMetadata};
use tracing::{debug, info};

/// Longest partition key Kinesis accepts, in characters.
pub const MAX_PARTITION_KEY_CHARS: usize = 256;

/// Stream sink writing to a Kinesis data stream.
pub struct KinesisSink {
    client: KinesisClient,
    stream_name: String,
}

impl KinesisSink {
    /// Loads AWS configuration and creates the client.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the stream name is empty.
    pub async fn new(
        stream_name: impl Into<String>,
        settings: &AwsSettings,
    ) -> Result<Self, SinkError> {
        let sdk_config = settings.load().await;
        Self::with_client(KinesisClient::new(&sdk_config), stream_name)
    }

    /// Creates a sink around an existing client.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the stream name is empty.
    pub fn with_client(
        client: KinesisClient,
        stream_name: impl Into<String>,
    ) -> Result<Self, SinkError> {
        let stream_name = stream_name.into();
        if stream_name.is_empty() {
            return Err(SinkError::configuration(
                "stream name is required",
                Some("stream_name".to_string()),
            ));
        }

        info!(stream = %stream_name, "Kinesis sink initialized");
        Ok(Self {
            client,
            stream_name,
        })
    }

    fn classify_error(error: SdkError<PutRecordError>) -> SinkError {
        match error {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => SinkError::connection(error),
            SdkError::ServiceError(ref service_err) => {
                let code = service_err.err().code().map(str::to_owned);
                service_error(code.as_deref(), error)
            }
            SdkError::ConstructionFailure(_) => {
                SinkError::configuration(error.to_string(), Some("kinesis_client".to_string()))
            }
            _ => SinkError::other(error, false),
        }
    }
}

/// Returns the partition key for a document id.
///
/// Ids longer than the Kinesis limit are truncated on a character boundary.
#[must_use]
pub fn partition_key(id: &str) -> &str {
    match id.char_indices().nth(MAX_PARTITION_KEY_CHARS) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

#[async_trait]
impl Sink for KinesisSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Stream
    }

    async fn deliver(&mut self, payload: &ReplicationPayload) -> Result<(), SinkError> {
        let data = payload
            .to_json()
            .map_err(|e| SinkError::serialization(e, "Failed to encode payload"))?;

        let output = self
            .client
            .put_record()
            .stream_name(&self.stream_name)
            .partition_key(partition_key(&payload.id))
            .data(Blob::new(data.into_bytes()))
            .send()
            .await
            .map_err(Self::classify_error)?;

        debug!(
            id = %payload.id,
            shard = %output.shard_id(),
            sequence = %output.sequence_number(),
            "Published record"
        );
        Ok(())
    }

    fn metadata(&self) -> SinkMetadata {
        SinkMetadata::new("kinesis", SinkKind::Stream).with_property("stream", &self.stream_name)
    }
}
