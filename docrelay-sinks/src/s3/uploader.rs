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

//! `PutObject`-backed [`BatchUploader`].

use crate::aws::{service_error, AwsSettings};
use crate::s3::config::{Compression, S3Config};
use async_trait::async_trait;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::put_object::PutObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use docrelay_core::batch::BatchUploader;
use docrelay_core::event::Namespace;
use docrelay_core::sink::SinkError;
use tracing::{debug, error, info};

/// Content type of uploaded batches.
const CONTENT_TYPE: &str = "application/x-ndjson";

/// Uploads finished batches to S3.
///
/// One instance serves every run of the process; the SDK client keeps its
/// connection pool between runs.
pub struct S3Uploader {
    client: S3Client,
    config: S3Config,
}

impl S3Uploader {
    /// Loads AWS configuration and creates the S3 client.
    ///
    /// Credentials come from the default provider chain.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the configuration is invalid.
    pub async fn new(config: S3Config) -> Result<Self, SinkError> {
        info!(bucket = %config.bucket, region = ?config.region, "Initializing S3 uploader");
        if config.bucket.is_empty() {
            return Err(SinkError::configuration(
                "bucket is required",
                Some("bucket".to_string()),
            ));
        }

        let settings = AwsSettings {
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
        };
        let sdk_config = settings.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config).retry_config(
            aws_sdk_s3::config::retry::RetryConfig::standard().with_max_attempts(config.max_retries),
        );
        if config.force_path_style {
            debug!("Using path-style S3 addressing");
            builder = builder.force_path_style(true);
        }

        Ok(Self::with_client(S3Client::from_conf(builder.build()), config))
    }

    /// Creates an uploader around an existing client.
    pub fn with_client(client: S3Client, config: S3Config) -> Self {
        Self { client, config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &S3Config {
        &self.config
    }

    fn compress(&self, data: Vec<u8>) -> Result<Vec<u8>, SinkError> {
        match self.config.compression {
            Compression::None => Ok(data),
            #[cfg(feature = "gzip")]
            Compression::Gzip => compress_gzip(&data),
        }
    }

    fn classify_s3_error(error: SdkError<PutObjectError>) -> SinkError {
        match error {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => SinkError::connection(error),
            SdkError::ServiceError(ref service_err) => {
                let code = service_err.err().code().map(str::to_owned);
                service_error(code.as_deref(), error)
            }
            SdkError::ConstructionFailure(_) => {
                SinkError::configuration(error.to_string(), Some("s3_client".to_string()))
            }
            _ => SinkError::other(error, false),
        }
    }
}

#[cfg(feature = "gzip")]
fn compress_gzip(data: &[u8]) -> Result<Vec<u8>, SinkError> {
    use flate2::write::GzEncoder;
    use flate2::Compression as GzCompression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), GzCompression::default());
    encoder
        .write_all(data)
        .map_err(|e| SinkError::serialization(e, "Failed to compress with gzip"))?;
    encoder
        .finish()
        .map_err(|e| SinkError::serialization(e, "Failed to finalize gzip compression"))
}

#[async_trait]
impl BatchUploader for S3Uploader {
    fn destination_path(&self, namespace: &Namespace, closed_at: DateTime<Utc>) -> String {
        self.config.key_strategy.generate_key(
            self.config.prefix.as_deref(),
            namespace,
            &closed_at,
            self.config.compression.extension(),
        )
    }

    async fn upload_batch(&self, body: Vec<u8>, path: &str) -> Result<(), SinkError> {
        let raw_size = body.len();
        let data = self.compress(body)?;
        debug!(
            bucket = %self.config.bucket,
            key = %path,
            raw_size,
            stored_size = data.len(),
            "Uploading batch"
        );

        let mut request = self
            .client
            .put_object()
            .bucket(&self.config.bucket)
            .key(path)
            .content_type(CONTENT_TYPE)
            .body(ByteStream::from(data));
        if let Some(encoding) = self.config.compression.encoding() {
            request = request.content_encoding(encoding);
        }

        match request.send().await {
            Ok(_) => {
                info!(bucket = %self.config.bucket, key = %path, "Uploaded batch");
                Ok(())
            }
            Err(e) => {
                error!(bucket = %self.config.bucket, key = %path, error = %e, "Batch upload failed");
                Err(Self::classify_s3_error(e))
            }
        }
    }

    fn name(&self) -> &str {
        "s3"
    }
}
