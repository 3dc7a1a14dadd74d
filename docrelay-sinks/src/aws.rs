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

//! Shared AWS SDK setup.
//!
//! All AWS-backed sinks load their SDK configuration the same way: the
//! default credential chain, an optional region override and an optional
//! endpoint override for LocalStack or other compatible services.

use docrelay_core::sink::SinkError;
use tracing::debug;

/// Region and endpoint overrides for an AWS client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwsSettings {
    /// Region override. `None` uses the default provider chain (`AWS_REGION`, profile, IMDS).
    pub region: Option<String>,

    /// Custom endpoint URL, e.g. `http://localhost:4566` for LocalStack.
    pub endpoint_url: Option<String>,
}

impl AwsSettings {
    /// Creates settings with a region override.
    #[must_use]
    pub fn with_region(region: impl Into<String>) -> Self {
        Self {
            region: Some(region.into()),
            endpoint_url: None,
        }
    }

    /// Loads the SDK configuration.
    pub async fn load(&self) -> aws_config::SdkConfig {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = &self.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(endpoint_url) = &self.endpoint_url {
            debug!(endpoint_url = %endpoint_url, "Using custom AWS endpoint");
            loader = loader.endpoint_url(endpoint_url);
        }

        loader.load().await
    }
}

/// Service error codes that clear up on their own.
const RETRYABLE_CODES: [&str; 7] = [
    "SlowDown",
    "ServiceUnavailable",
    "InternalError",
    "ThrottlingException",
    "Throttling",
    "ProvisionedThroughputExceededException",
    "KMSThrottlingException",
];

/// Maps an AWS service error to a write error.
pub(crate) fn service_error(
    code: Option<&str>,
    source: impl std::error::Error + Send + Sync + 'static,
) -> SinkError {
    let retryable = code.is_some_and(|code| RETRYABLE_CODES.contains(&code));
    SinkError::write(source, retryable)
}
