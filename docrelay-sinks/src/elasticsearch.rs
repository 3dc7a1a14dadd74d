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

//! Elasticsearch index sink.
//!
//! Writes each payload as a document through the REST API:
//!
//! - insert / update / replace: `PUT {url}/{index}/_doc/{id}` with the
//!   payload JSON as body, replacing the whole document
//! - delete: `DELETE {url}/{index}/_doc/{id}`
//!
//! A 404 on delete counts as success, so replaying a delete after a
//! checkpoint rollback is harmless.
//!
//! # Example
//!
//! ```rust,ignore
//! use docrelay_sinks::elasticsearch::{ElasticsearchConfig, ElasticsearchSink};
//! use std::time::Duration;
//!
//! let config = ElasticsearchConfig::builder()
//!     .url("https://search.internal:9200")
//!     .index("orders")
//!     .basic_auth("replicator", "secret")
//!     .timeout(Duration::from_secs(10))
//!     .build()?;
//!
//! let sink = ElasticsearchSink::new(config)?;
//! ```

use async_trait::async_trait;
use docrelay_core::normalize::ReplicationPayload;
use docrelay_core::sink::{Sink, SinkError, SinkKind, SinkMetadata};
use reqwest::{Client, Method, StatusCode, Url};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for [`ElasticsearchSink`].
#[derive(Clone)]
pub struct ElasticsearchConfig {
    /// Base URL of the cluster, e.g. `https://search.internal:9200`
    pub url: Url,

    /// Target index
    pub index: String,

    /// Optional basic-auth user name and password
    pub credentials: Option<(String, String)>,

    /// Per-request timeout
    pub timeout: Duration,
}

impl std::fmt::Debug for ElasticsearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticsearchConfig")
            .field("url", &self.url.as_str())
            .field("index", &self.index)
            .field("user", &self.credentials.as_ref().map(|(user, _)| user))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ElasticsearchConfig {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> ElasticsearchConfigBuilder {
        ElasticsearchConfigBuilder::default()
    }

    /// Returns the document URL for `id`.
    ///
    /// The index and id are appended as path segments, so reserved
    /// characters in ids are percent-encoded.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the base URL cannot carry a path.
    pub fn document_url(&self, id: &str) -> Result<Url, SinkError> {
        let mut url = self.url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                SinkError::configuration(
                    format!("Elasticsearch URL cannot be a base: {}", self.url),
                    Some("url".to_string()),
                )
            })?
            .pop_if_empty()
            .extend([self.index.as_str(), "_doc", id]);
        Ok(url)
    }
}

/// Builder for [`ElasticsearchConfig`].
#[derive(Debug, Default)]
pub struct ElasticsearchConfigBuilder {
    url: Option<String>,
    index: Option<String>,
    credentials: Option<(String, String)>,
    timeout: Option<Duration>,
}

impl ElasticsearchConfigBuilder {
    /// Sets the cluster URL (required).
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the target index (required).
    #[must_use]
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Enables basic authentication.
    #[must_use]
    pub fn basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    /// Sets the request timeout (default: 30 seconds).
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is missing or invalid, or the index is
    /// missing or empty.
    pub fn build(self) -> Result<ElasticsearchConfig, SinkError> {
        let raw_url = self
            .url
            .ok_or_else(|| SinkError::configuration("url is required", Some("url".to_string())))?;
        let url = Url::parse(&raw_url).map_err(|e| {
            SinkError::configuration(
                format!("invalid Elasticsearch URL: {e}"),
                Some("url".to_string()),
            )
        })?;

        let index = self.index.unwrap_or_default();
        if index.is_empty() {
            return Err(SinkError::configuration(
                "index is required",
                Some("index".to_string()),
            ));
        }

        Ok(ElasticsearchConfig {
            url,
            index,
            credentials: self.credentials,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
        })
    }
}

/// Index sink writing to Elasticsearch.
pub struct ElasticsearchSink {
    client: Client,
    config: ElasticsearchConfig,
}

impl ElasticsearchSink {
    /// Creates the sink and its HTTP client.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(config: ElasticsearchConfig) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                SinkError::configuration(
                    format!("failed to build HTTP client: {e}"),
                    Some("http_client".to_string()),
                )
            })?;

        info!(url = %config.url, index = %config.index, "Elasticsearch sink initialized");
        Ok(Self { client, config })
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<String>,
        allow_not_found: bool,
    ) -> Result<StatusCode, SinkError> {
        let mut request = self.client.request(method, url);
        if let Some((user, password)) = &self.config.credentials {
            request = request.basic_auth(user, Some(password));
        }
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        if status.is_success() || (allow_not_found && status == StatusCode::NOT_FOUND) {
            return Ok(status);
        }

        let detail = response.text().await.unwrap_or_default();
        Err(status_error(status, &detail))
    }
}

fn classify_transport_error(error: reqwest::Error) -> SinkError {
    if error.is_connect() || error.is_timeout() || error.is_request() {
        SinkError::connection(error)
    } else {
        SinkError::other(error, false)
    }
}

/// Maps an unsuccessful response status to a sink error.
fn status_error(status: StatusCode, detail: &str) -> SinkError {
    let message = format!("Elasticsearch returned {status}: {detail}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SinkError::configuration(message, Some("credentials".to_string()))
        }
        StatusCode::TOO_MANY_REQUESTS => SinkError::write_msg(message, true),
        s if s.is_server_error() => SinkError::write_msg(message, true),
        _ => SinkError::write_msg(message, false),
    }
}

#[async_trait]
impl Sink for ElasticsearchSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Index
    }

    async fn deliver(&mut self, payload: &ReplicationPayload) -> Result<(), SinkError> {
        let url = self.config.document_url(&payload.id)?;

        if payload.is_delete() {
            let status = self.send(Method::DELETE, url, None, true).await?;
            if status == StatusCode::NOT_FOUND {
                warn!(id = %payload.id, "Document to delete was not indexed");
            } else {
                debug!(id = %payload.id, "Deleted document");
            }
            return Ok(());
        }

        let body = payload
            .to_json()
            .map_err(|e| SinkError::serialization(e, "Failed to encode payload"))?;
        let status = self.send(Method::PUT, url, Some(body), false).await?;
        debug!(id = %payload.id, status = status.as_u16(), "Indexed document");
        Ok(())
    }

    fn metadata(&self) -> SinkMetadata {
        SinkMetadata::new("elasticsearch", SinkKind::Index)
            .with_property("url", self.config.url.as_str())
            .with_property("index", &self.config.index)
    }
}
