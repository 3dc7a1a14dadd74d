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

//! MongoDB checkpoint store.
//!
//! Checkpoints live in a state collection, one document per watched
//! database/collection pair:
//!
//! ```text
//! {
//!   "watchedDatabase": "shop",
//!   "watchedCollection": "orders",
//!   "lastProcessed": { "_data": "8263..." } | null,
//!   "isCurrent": true
//! }
//! ```
//!
//! Clients come from a shared [`ClientCache`], so the store reuses the
//! connection the change feed already holds when both point at the same
//! server. A connection-level failure drops the cached client.

use async_trait::async_trait;
use bson::{doc, Document};
use docrelay_core::checkpoint::{CheckpointError, CheckpointKey, CheckpointRecord, CheckpointStore};
use docrelay_core::connection::ClientCache;
use docrelay_core::mongo::MongoConnector;
use mongodb::error::{Error as MongoError, ErrorKind as MongoErrorKind};
use mongodb::Collection;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default state database name.
pub const DEFAULT_STATE_DATABASE: &str = "docrelay";

/// Default state collection name.
pub const DEFAULT_STATE_COLLECTION: &str = "checkpoints";

/// Location of the state collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MongoCheckpointConfig {
    /// State database
    pub database: String,

    /// State collection
    pub collection: String,
}

impl MongoCheckpointConfig {
    /// Creates a builder with the default names.
    #[must_use]
    pub fn builder() -> MongoCheckpointConfigBuilder {
        MongoCheckpointConfigBuilder::default()
    }
}

impl Default for MongoCheckpointConfig {
    fn default() -> Self {
        Self {
            database: DEFAULT_STATE_DATABASE.to_string(),
            collection: DEFAULT_STATE_COLLECTION.to_string(),
        }
    }
}

/// Builder for [`MongoCheckpointConfig`].
#[derive(Debug, Default)]
pub struct MongoCheckpointConfigBuilder {
    database: Option<String>,
    collection: Option<String>,
}

impl MongoCheckpointConfigBuilder {
    /// Sets the state database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Sets the state collection.
    #[must_use]
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when a name is empty.
    pub fn build(self) -> Result<MongoCheckpointConfig, CheckpointError> {
        let database = self
            .database
            .unwrap_or_else(|| DEFAULT_STATE_DATABASE.to_string());
        let collection = self
            .collection
            .unwrap_or_else(|| DEFAULT_STATE_COLLECTION.to_string());

        if database.is_empty() {
            return Err(CheckpointError::Other(
                "state database name cannot be empty".to_string(),
            ));
        }
        if collection.is_empty() {
            return Err(CheckpointError::Other(
                "state collection name cannot be empty".to_string(),
            ));
        }

        Ok(MongoCheckpointConfig {
            database,
            collection,
        })
    }
}

/// Checkpoint store backed by a MongoDB collection.
pub struct MongoCheckpointStore {
    clients: Arc<ClientCache<MongoConnector>>,
    config: MongoCheckpointConfig,
}

impl MongoCheckpointStore {
    /// Creates a store over the configured state collection.
    pub fn new(clients: Arc<ClientCache<MongoConnector>>, config: MongoCheckpointConfig) -> Self {
        info!(
            database = %config.database,
            collection = %config.collection,
            "Using MongoDB checkpoint store"
        );
        Self { clients, config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &MongoCheckpointConfig {
        &self.config
    }

    async fn records(&self) -> Result<Collection<CheckpointRecord>, CheckpointError> {
        let client = self
            .clients
            .get()
            .await
            .map_err(|e| CheckpointError::Connection(e.to_string()))?;
        Ok(client
            .database(&self.config.database)
            .collection(&self.config.collection))
    }

    /// Maps a driver error, dropping the cached client on network failures.
    async fn classify(&self, err: MongoError) -> CheckpointError {
        if is_connection_error(&err) {
            warn!(error = %err, "Checkpoint store connection failed, dropping cached client");
            self.clients.invalidate().await;
            CheckpointError::Connection(err.to_string())
        } else if matches!(
            err.kind.as_ref(),
            MongoErrorKind::BsonSerialization(_) | MongoErrorKind::BsonDeserialization(_)
        ) {
            CheckpointError::Serialization(err.to_string())
        } else {
            CheckpointError::Other(err.to_string())
        }
    }
}

/// Filter selecting the current record for `key`.
#[must_use]
pub fn current_record_filter(key: &CheckpointKey) -> Document {
    doc! {
        "watchedDatabase": key.database.as_str(),
        "watchedCollection": key.collection.as_str(),
        "isCurrent": true,
    }
}

fn is_connection_error(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        MongoErrorKind::Io(_)
            | MongoErrorKind::ServerSelection { .. }
            | MongoErrorKind::ConnectionPoolCleared { .. }
    ) || err.contains_label("NetworkError")
}

#[async_trait]
impl CheckpointStore for MongoCheckpointStore {
    async fn get_last_processed(
        &self,
        key: &CheckpointKey,
    ) -> Result<Option<Document>, CheckpointError> {
        let records = self.records().await?;
        let filter = current_record_filter(key);

        let found = match records.find_one(filter).await {
            Ok(found) => found,
            Err(e) => return Err(self.classify(e).await),
        };

        if let Some(record) = found {
            debug!(key = %key, found = record.last_processed.is_some(), "Read checkpoint");
            return Ok(record.last_processed);
        }

        let record = CheckpointRecord::bootstrap(key);
        if let Err(e) = records.insert_one(&record).await {
            return Err(self.classify(e).await);
        }
        info!(key = %key, "Created empty checkpoint record");
        Ok(None)
    }

    async fn set_last_processed(
        &self,
        key: &CheckpointKey,
        token: Option<&Document>,
    ) -> Result<(), CheckpointError> {
        let records = self.records().await?;
        let update = doc! { "$set": { "lastProcessed": token.cloned() } };

        match records
            .update_one(current_record_filter(key), update)
            .upsert(true)
            .await
        {
            Ok(result) => {
                debug!(
                    key = %key,
                    matched = result.matched_count,
                    upserted = result.upserted_id.is_some(),
                    "Wrote checkpoint"
                );
                Ok(())
            }
            Err(e) => Err(self.classify(e).await),
        }
    }

    async fn close(&self) -> Result<(), CheckpointError> {
        debug!("Closing MongoDB checkpoint store");
        Ok(())
    }
}
