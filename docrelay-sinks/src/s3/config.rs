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

//! S3 uploader configuration.

use crate::s3::key_gen::KeyGenerationStrategy;
use docrelay_core::sink::SinkError;

/// Compression applied to a batch before upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Plain JSON Lines.
    #[default]
    None,

    /// Gzip (RFC 1952), default level. Adds `.gz` to the key.
    #[cfg(feature = "gzip")]
    Gzip,
}

impl Compression {
    /// Returns the key suffix for this compression (with the dot).
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            #[cfg(feature = "gzip")]
            Self::Gzip => ".gz",
        }
    }

    /// Returns the Content-Encoding header value.
    #[must_use]
    pub const fn encoding(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            #[cfg(feature = "gzip")]
            Self::Gzip => Some("gzip"),
        }
    }

    /// Short name for logs and metadata.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            #[cfg(feature = "gzip")]
            Self::Gzip => "gzip",
        }
    }
}

/// Configuration for [`S3Uploader`](crate::s3::S3Uploader).
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Bucket name (required).
    pub bucket: String,

    /// Region override. `None` uses the default provider chain.
    pub region: Option<String>,

    /// Key prefix. A `/` is inserted between the prefix and the rest of the
    /// key unless the prefix already ends with one.
    pub prefix: Option<String>,

    /// Compression (default: none).
    pub compression: Compression,

    /// Key layout (default: [`KeyGenerationStrategy::CollectionEpoch`]).
    pub key_strategy: KeyGenerationStrategy,

    /// Maximum SDK attempts for a `PutObject` (default: 3).
    pub max_retries: u32,

    /// Custom endpoint URL for S3-compatible storage.
    pub endpoint_url: Option<String>,

    /// Path-style addressing, required by LocalStack and MinIO.
    pub force_path_style: bool,
}

impl S3Config {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> S3ConfigBuilder {
        S3ConfigBuilder::default()
    }
}

/// Builder for [`S3Config`].
#[derive(Debug, Default)]
pub struct S3ConfigBuilder {
    bucket: Option<String>,
    region: Option<String>,
    prefix: Option<String>,
    compression: Option<Compression>,
    key_strategy: Option<KeyGenerationStrategy>,
    max_retries: Option<u32>,
    endpoint_url: Option<String>,
    force_path_style: Option<bool>,
}

impl S3ConfigBuilder {
    /// Sets the bucket name (required).
    #[must_use]
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Sets the region.
    #[must_use]
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Sets the key prefix.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Sets the compression.
    #[must_use]
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Sets the key layout.
    #[must_use]
    pub fn key_strategy(mut self, strategy: KeyGenerationStrategy) -> Self {
        self.key_strategy = Some(strategy);
        self
    }

    /// Sets the maximum number of SDK attempts.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Sets a custom endpoint URL.
    #[must_use]
    pub fn endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    /// Forces path-style addressing.
    #[must_use]
    pub fn force_path_style(mut self, force: bool) -> Self {
        self.force_path_style = Some(force);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket is missing or empty, the region is
    /// empty, or `max_retries` is zero.
    pub fn build(self) -> Result<S3Config, SinkError> {
        let bucket = self.bucket.unwrap_or_default();
        if bucket.is_empty() {
            return Err(SinkError::configuration(
                "bucket is required",
                Some("bucket".to_string()),
            ));
        }

        if self.region.as_deref() == Some("") {
            return Err(SinkError::configuration(
                "region cannot be empty",
                Some("region".to_string()),
            ));
        }

        let max_retries = self.max_retries.unwrap_or(3);
        if max_retries == 0 {
            return Err(SinkError::configuration(
                "max_retries must be at least 1",
                Some("max_retries".to_string()),
            ));
        }

        Ok(S3Config {
            bucket,
            region: self.region,
            prefix: self.prefix.filter(|p| !p.is_empty()),
            compression: self.compression.unwrap_or_default(),
            key_strategy: self.key_strategy.unwrap_or_default(),
            max_retries,
            endpoint_url: self.endpoint_url,
            force_path_style: self.force_path_style.unwrap_or(false),
        })
    }
}
