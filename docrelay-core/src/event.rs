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

//! Raw change records observed on the source feed.
//!
//! A [`ChangeEvent`] is produced by the change feed for every mutation of the
//! watched collection and is immutable once observed. The
//! [`normalize`](crate::normalize) module turns it into the payload that is
//! fanned out to sinks.
//!
//! # Example
//!
//! ```rust
//! use docrelay_core::event::{ChangeEvent, Namespace, OperationType};
//! use bson::{doc, Timestamp};
//!
//! let event = ChangeEvent {
//!     operation: OperationType::Insert,
//!     namespace: Namespace::new("shop", "orders"),
//!     document_key: Some(doc! { "_id": "A" }),
//!     full_document: Some(doc! { "_id": "A", "total": 42 }),
//!     cluster_time: Timestamp { time: 100, increment: 1 },
//!     resume_token: doc! { "_data": "8263" },
//! };
//!
//! assert!(event.operation.is_replicated());
//! assert_eq!(event.namespace.full_name(), "shop.orders");
//! ```

use bson::{Bson, Document, Timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error raised when a driver event cannot be turned into a [`ChangeEvent`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConversionError {
    /// The resume token could not be encoded as a BSON document.
    #[error("Failed to convert resume token: {0}")]
    ResumeTokenConversion(String),

    /// The event carried no cluster time.
    #[error("Change event for {namespace} has no cluster time")]
    MissingClusterTime {
        /// Namespace the event belongs to
        namespace: String,
    },
}

/// Change feed operation types.
///
/// The `Unknown` variant keeps newer server operation types instead of failing
/// the conversion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum OperationType {
    /// A document was inserted
    Insert,

    /// A document was modified in place
    Update,

    /// A document was replaced wholesale
    Replace,

    /// A document was deleted
    Delete,

    /// The feed was invalidated (collection dropped or renamed)
    Invalidate,

    /// The watched collection was dropped
    Drop,

    /// The watched database was dropped
    #[serde(rename = "dropDatabase")]
    DropDatabase,

    /// The watched collection was renamed
    Rename,

    /// Operation type unknown to this version
    #[serde(untagged)]
    Unknown(String),
}

impl OperationType {
    /// Returns true for operations that are normalized and fanned out to sinks.
    #[inline]
    #[must_use]
    pub fn is_replicated(&self) -> bool {
        matches!(
            self,
            Self::Insert | Self::Update | Self::Replace | Self::Delete
        )
    }

    /// Returns true for operations that carry a document body.
    #[inline]
    #[must_use]
    pub fn carries_document(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Replace)
    }

    /// Returns the wire name used in replication payloads and metric labels.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Invalidate => "invalidate",
            Self::Drop => "drop",
            Self::DropDatabase => "dropDatabase",
            Self::Rename => "rename",
            Self::Unknown(name) => name,
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database and collection an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    /// Database name
    pub database: String,

    /// Collection name
    pub collection: String,
}

impl Namespace {
    /// Creates a new namespace.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Returns `"database.collection"`.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// A raw change record as emitted by the source feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Type of operation that occurred
    #[serde(rename = "operationType")]
    pub operation: OperationType,

    /// Namespace where the operation occurred
    #[serde(rename = "ns")]
    pub namespace: Namespace,

    /// Document key (`_id` plus the shard key on sharded clusters).
    ///
    /// Absent for invalidate events.
    #[serde(rename = "documentKey", skip_serializing_if = "Option::is_none")]
    pub document_key: Option<Document>,

    /// Post-image of the document.
    ///
    /// Present for insert and replace; present for update when the feed is
    /// opened with update lookup and the document still exists.
    #[serde(rename = "fullDocument", skip_serializing_if = "Option::is_none")]
    pub full_document: Option<Document>,

    /// Cluster-assigned operation time
    #[serde(rename = "clusterTime")]
    pub cluster_time: Timestamp,

    /// Resume token this event advances the feed to
    #[serde(rename = "_id")]
    pub resume_token: Document,
}

impl ChangeEvent {
    /// Returns the `_id` from the document key, if any.
    #[must_use]
    pub fn document_id(&self) -> Option<&Bson> {
        self.document_key.as_ref()?.get("_id")
    }

    /// Returns the cluster time as a UTC instant (second precision).
    #[must_use]
    pub fn cluster_time_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::from(self.cluster_time.time), 0)
    }
}

impl TryFrom<mongodb::change_stream::event::ChangeStreamEvent<Document>> for ChangeEvent {
    type Error = ConversionError;

    fn try_from(
        event: mongodb::change_stream::event::ChangeStreamEvent<Document>,
    ) -> Result<Self, Self::Error> {
        use mongodb::change_stream::event::OperationType as MongoOpType;

        let operation = match event.operation_type {
            MongoOpType::Insert => OperationType::Insert,
            MongoOpType::Update => OperationType::Update,
            MongoOpType::Replace => OperationType::Replace,
            MongoOpType::Delete => OperationType::Delete,
            MongoOpType::Invalidate => OperationType::Invalidate,
            MongoOpType::Drop => OperationType::Drop,
            MongoOpType::DropDatabase => OperationType::DropDatabase,
            MongoOpType::Rename => OperationType::Rename,
            other => {
                let name = format!("{other:?}");
                tracing::warn!(operation = %name, "Unknown change feed operation type");
                OperationType::Unknown(name)
            }
        };

        let namespace = event
            .ns
            .map(|ns| Namespace::new(ns.db, ns.coll.unwrap_or_default()))
            .unwrap_or_else(|| Namespace::new(String::new(), String::new()));

        let cluster_time = event
            .cluster_time
            .ok_or_else(|| ConversionError::MissingClusterTime {
                namespace: namespace.full_name(),
            })?;

        let resume_token = bson::to_document(&event.id).map_err(|e| {
            ConversionError::ResumeTokenConversion(format!(
                "Failed to serialize resume token to BSON document: {e}"
            ))
        })?;

        Ok(Self {
            operation,
            namespace,
            document_key: event.document_key,
            full_document: event.full_document,
            cluster_time,
            resume_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_replicated_operations() {
        assert!(OperationType::Insert.is_replicated());
        assert!(OperationType::Update.is_replicated());
        assert!(OperationType::Replace.is_replicated());
        assert!(OperationType::Delete.is_replicated());
        assert!(!OperationType::Drop.is_replicated());
        assert!(!OperationType::Invalidate.is_replicated());
        assert!(!OperationType::Unknown("shardCollection".into()).is_replicated());

        assert!(OperationType::Replace.carries_document());
        assert!(!OperationType::Delete.carries_document());
    }

    #[test]
    fn test_operation_wire_names() {
        assert_eq!(OperationType::Insert.as_str(), "insert");
        assert_eq!(OperationType::DropDatabase.to_string(), "dropDatabase");
        assert_eq!(OperationType::Unknown("reshard".into()).as_str(), "reshard");
    }

    #[test]
    fn test_document_id_and_cluster_time() {
        let event = ChangeEvent {
            operation: OperationType::Delete,
            namespace: Namespace::new("db", "coll"),
            document_key: Some(doc! { "_id": 7 }),
            full_document: None,
            cluster_time: Timestamp {
                time: 1_700_000_000,
                increment: 3,
            },
            resume_token: doc! { "_data": "t" },
        };

        assert_eq!(event.document_id(), Some(&Bson::Int32(7)));
        assert_eq!(
            event.cluster_time_utc().map(|t| t.timestamp()),
            Some(1_700_000_000)
        );
        assert_eq!(event.namespace.to_string(), "db.coll");
    }
}
