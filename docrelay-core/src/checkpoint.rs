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

//! Durable checkpoint storage.
//!
//! The [`CheckpointStore`] trait persists the resume token of the last event
//! whose delivery is known to be complete, keyed by the watched
//! database/collection pair. Reading a key that has never been written
//! bootstraps an empty record and reports "no checkpoint".
//!
//! # Example
//!
//! ```rust
//! use docrelay_core::checkpoint::{CheckpointError, CheckpointKey, CheckpointStore};
//! use bson::Document;
//! use std::collections::HashMap;
//!
//! #[derive(Default)]
//! struct MapStore {
//!     records: tokio::sync::Mutex<HashMap<CheckpointKey, Option<Document>>>,
//! }
//!
//! #[async_trait::async_trait]
//! impl CheckpointStore for MapStore {
//!     async fn get_last_processed(
//!         &self,
//!         key: &CheckpointKey,
//!     ) -> Result<Option<Document>, CheckpointError> {
//!         let mut records = self.records.lock().await;
//!         Ok(records.entry(key.clone()).or_insert(None).clone())
//!     }
//!
//!     async fn set_last_processed(
//!         &self,
//!         key: &CheckpointKey,
//!         token: Option<&Document>,
//!     ) -> Result<(), CheckpointError> {
//!         self.records.lock().await.insert(key.clone(), token.cloned());
//!         Ok(())
//!     }
//! }
//! ```

use crate::event::Namespace;
use bson::Document;
use serde::{Deserialize, Serialize};

/// Identifies one checkpoint: the watched database and collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointKey {
    /// Watched database
    pub database: String,

    /// Watched collection
    pub collection: String,
}

impl CheckpointKey {
    /// Creates a new key.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl From<&Namespace> for CheckpointKey {
    fn from(ns: &Namespace) -> Self {
        Self::new(ns.database.clone(), ns.collection.clone())
    }
}

impl std::fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Stored checkpoint record.
///
/// Field names match the layout persisted in the state collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Watched database
    #[serde(rename = "watchedDatabase")]
    pub database: String,

    /// Watched collection
    #[serde(rename = "watchedCollection")]
    pub collection: String,

    /// Resume token of the last committed event, `None` when unset
    #[serde(rename = "lastProcessed")]
    pub last_processed: Option<Document>,

    /// Marks the record that is currently in use
    #[serde(rename = "isCurrent")]
    pub is_current: bool,
}

impl CheckpointRecord {
    /// Creates an empty current record for `key`.
    #[must_use]
    pub fn bootstrap(key: &CheckpointKey) -> Self {
        Self {
            database: key.database.clone(),
            collection: key.collection.clone(),
            last_processed: None,
            is_current: true,
        }
    }
}

/// Trait for checkpoint storage backends.
///
/// Implementations must persist tokens durably: a token written by
/// [`set_last_processed`](Self::set_last_processed) is what the next
/// [`get_last_processed`](Self::get_last_processed) returns, across restarts.
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Returns the last committed resume token for `key`.
    ///
    /// Creates an empty record when none exists and returns `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the bootstrap record
    /// cannot be written.
    async fn get_last_processed(
        &self,
        key: &CheckpointKey,
    ) -> Result<Option<Document>, CheckpointError>;

    /// Overwrites the stored token for `key`. `None` clears the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be persisted.
    async fn set_last_processed(
        &self,
        key: &CheckpointKey,
        token: Option<&Document>,
    ) -> Result<(), CheckpointError>;

    /// Releases any resources held by the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be closed cleanly.
    async fn close(&self) -> Result<(), CheckpointError> {
        Ok(())
    }
}

/// Errors that can occur during checkpoint store operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Other errors
    #[error("Checkpoint store error: {0}")]
    Other(String),
}

impl CheckpointError {
    /// Returns true when the error came from the store connection.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}
