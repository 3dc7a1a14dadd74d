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

//! MongoDB / DocumentDB change feed.
//!
//! [`MongoChangeFeed`] opens a change stream on the watched collection with
//! update lookup enabled, so update events carry the current post-image.
//! Clients come from a shared [`ClientCache`] and are reused across runs.

use crate::connection::{ClientCache, ConnectionError, Connector};
use crate::event::{ChangeEvent, Namespace};
use crate::feed::{reject_invalidate, ChangeFeed, FeedCursor, FeedError};
use async_trait::async_trait;
use bson::{doc, Document};
use mongodb::change_stream::event::{ChangeStreamEvent, ResumeToken};
use mongodb::change_stream::ChangeStream;
use mongodb::options::{ChangeStreamOptions, FullDocumentType};
use mongodb::Client;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Connects to a MongoDB-compatible server.
#[derive(Debug, Clone)]
pub struct MongoConnector {
    uri: String,
}

impl MongoConnector {
    /// Creates a connector for `uri`.
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

/// Returns the host part of a connection string, without credentials.
#[must_use]
pub fn redact_uri(uri: &str) -> String {
    let (scheme, rest) = uri.split_once("://").unwrap_or(("mongodb", uri));
    let hosts = rest.rsplit_once('@').map_or(rest, |(_, hosts)| hosts);
    let hosts = hosts.split(['/', '?']).next().unwrap_or_default();
    format!("{scheme}://{hosts}")
}

#[async_trait]
impl Connector for MongoConnector {
    type Client = Client;

    async fn connect(&self) -> Result<Client, ConnectionError> {
        Client::with_uri_str(&self.uri)
            .await
            .map_err(|e| ConnectionError::connect(redact_uri(&self.uri), e))
    }

    async fn is_alive(&self, client: &Client) -> bool {
        match client.database("admin").run_command(doc! { "ping": 1 }).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Ping failed");
                false
            }
        }
    }

    fn target(&self) -> String {
        redact_uri(&self.uri)
    }
}

/// Change feed over one MongoDB collection.
pub struct MongoChangeFeed {
    clients: Arc<ClientCache<MongoConnector>>,
    namespace: Namespace,
    batch_size: Option<u32>,
}

impl MongoChangeFeed {
    /// Creates a feed over `namespace` using clients from `clients`.
    pub fn new(clients: Arc<ClientCache<MongoConnector>>, namespace: Namespace) -> Self {
        Self {
            clients,
            namespace,
            batch_size: None,
        }
    }

    /// Sets the server-side batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, size: u32) -> Self {
        self.batch_size = Some(size);
        self
    }

    fn options(&self, resume_from: Option<&Document>) -> Result<ChangeStreamOptions, FeedError> {
        let mut options = ChangeStreamOptions::default();
        options.full_document = Some(FullDocumentType::UpdateLookup);
        options.batch_size = self.batch_size;

        if let Some(token_doc) = resume_from {
            let bytes = bson::to_vec(token_doc).map_err(|e| {
                FeedError::Configuration(format!("Stored resume token is not valid BSON: {e}"))
            })?;
            let token = bson::from_slice::<ResumeToken>(&bytes).map_err(|e| {
                FeedError::Configuration(format!("Stored resume token is malformed: {e}"))
            })?;
            options.resume_after = Some(token);
        }

        Ok(options)
    }
}

#[async_trait]
impl ChangeFeed for MongoChangeFeed {
    async fn open(&self, resume_from: Option<Document>) -> Result<Box<dyn FeedCursor>, FeedError> {
        let client = self
            .clients
            .get()
            .await
            .map_err(|e| FeedError::Connection {
                message: e.to_string(),
                source: Some(Box::new(e)),
                code: None,
                labels: Vec::new(),
            })?;

        let options = self.options(resume_from.as_ref())?;
        let collection = client
            .database(&self.namespace.database)
            .collection::<Document>(&self.namespace.collection);

        info!(
            namespace = %self.namespace,
            resuming = resume_from.is_some(),
            "Opening change stream"
        );
        let stream = collection.watch().with_options(options).await?;

        Ok(Box::new(MongoCursor {
            stream: Some(stream),
            token: resume_from,
        }))
    }

    async fn invalidate(&self) {
        self.clients.invalidate().await;
    }
}

struct MongoCursor {
    stream: Option<ChangeStream<ChangeStreamEvent<Document>>>,
    token: Option<Document>,
}

impl MongoCursor {
    fn sync_token(&mut self) {
        let Some(token) = self.stream.as_ref().and_then(ChangeStream::resume_token) else {
            return;
        };
        match bson::to_document(&token) {
            Ok(doc) => self.token = Some(doc),
            Err(e) => warn!(error = %e, "Failed to encode resume token"),
        }
    }
}

#[async_trait]
impl FeedCursor for MongoCursor {
    async fn next_if_available(&mut self) -> Result<Option<ChangeEvent>, FeedError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| FeedError::Configuration("Cursor already closed".to_string()))?;

        let next = stream.next_if_any().await?;
        self.sync_token();

        match next {
            Some(raw) => {
                let event = reject_invalidate(ChangeEvent::try_from(raw)?)?;
                self.token = Some(event.resume_token.clone());
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }

    fn current_resume_token(&self) -> Option<Document> {
        self.token.clone()
    }

    async fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Change stream closed");
        }
    }
}
