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

//! Event normalization.
//!
//! [`normalize`] turns a raw [`ChangeEvent`] into the canonical
//! [`ReplicationPayload`] that every sink receives:
//!
//! ```text
//! { "id": "<document id>", "operation": "insert", "timestamp": 100,
//!   "timestampReadable": "1970-01-01T00:01:40Z", ...document fields }
//! ```
//!
//! Insert, update and replace payloads carry the post-image fields at the top
//! level with `_id` promoted to `id`. Delete payloads carry only the four
//! metadata fields.

use crate::event::{ChangeEvent, OperationType};
use bson::Bson;
use chrono::{DateTime, SecondsFormat};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

/// Top-level identifier key in every payload.
pub const ID_FIELD: &str = "id";

/// Keys owned by the payload envelope.
///
/// Document fields with these names are dropped with a warning; the envelope
/// value wins.
pub const RESERVED_FIELDS: [&str; 4] = [ID_FIELD, "operation", "timestamp", "timestampReadable"];

/// Errors raised while normalizing a change event.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    /// The event carries no document key or the key has no `_id`.
    #[error("{operation} event has no document identifier")]
    MissingDocumentId {
        /// Operation of the offending event
        operation: OperationType,
    },

    /// An insert, update or replace event has no post-image.
    #[error("{operation} event for id {id} has no full document")]
    MissingFullDocument {
        /// Operation of the offending event
        operation: OperationType,
        /// Rendered document identifier
        id: String,
    },

    /// The cluster time cannot be represented as a calendar instant.
    #[error("cluster time {0} is out of range")]
    InvalidTimestamp(u32),

    /// The operation is not replicated.
    #[error("operation {0} is not replicated")]
    UnsupportedOperation(OperationType),

    /// The payload could not be serialized.
    #[error("failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NormalizeError {
    /// Returns true when the event can be skipped without losing data.
    ///
    /// An update whose post-image lookup found no document is followed by the
    /// delete that removed it.
    #[must_use]
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            Self::MissingFullDocument {
                operation: OperationType::Update,
                ..
            }
        )
    }
}

/// Canonical replication payload.
///
/// Serializes to a flat JSON object with the envelope keys first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplicationPayload {
    /// Document identifier
    pub id: String,

    /// Operation that produced the payload
    pub operation: OperationType,

    /// Cluster time in seconds since the epoch
    pub timestamp: u32,

    /// Cluster time as RFC 3339
    #[serde(rename = "timestampReadable")]
    pub timestamp_readable: String,

    /// Document fields, empty for deletes
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ReplicationPayload {
    /// Returns true for delete payloads.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.operation == OperationType::Delete
    }

    /// Returns the document fields (everything except the envelope).
    #[must_use]
    pub fn document(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Serializes the payload as a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, NormalizeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serializes the payload as one newline-terminated JSON line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_line(&self) -> Result<Vec<u8>, NormalizeError> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Renders a document identifier the way downstream keys expect it.
#[must_use]
pub fn render_id(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        Bson::Int32(i) => i.to_string(),
        Bson::Int64(i) => i.to_string(),
        other => other.clone().into_relaxed_extjson().to_string(),
    }
}

/// Normalizes a raw change event.
///
/// Pure and deterministic: the same event always yields the same payload.
///
/// # Errors
///
/// Returns [`NormalizeError`] when the event lacks an identifier, lacks a
/// required post-image, has an unrepresentable timestamp, or is not a
/// replicated operation.
pub fn normalize(event: &ChangeEvent) -> Result<ReplicationPayload, NormalizeError> {
    if !event.operation.is_replicated() {
        return Err(NormalizeError::UnsupportedOperation(event.operation.clone()));
    }

    let id = event
        .document_id()
        .map(render_id)
        .ok_or_else(|| NormalizeError::MissingDocumentId {
            operation: event.operation.clone(),
        })?;

    let seconds = event.cluster_time.time;
    let timestamp_readable = DateTime::from_timestamp(i64::from(seconds), 0)
        .ok_or(NormalizeError::InvalidTimestamp(seconds))?
        .to_rfc3339_opts(SecondsFormat::Secs, true);

    let mut fields = Map::new();
    if event.operation.carries_document() {
        let body = event
            .full_document
            .as_ref()
            .ok_or_else(|| NormalizeError::MissingFullDocument {
                operation: event.operation.clone(),
                id: id.clone(),
            })?;

        for (key, value) in body {
            if key == "_id" {
                continue;
            }
            if RESERVED_FIELDS.contains(&key.as_str()) {
                warn!(
                    field = %key,
                    id = %id,
                    "Dropping document field shadowed by payload envelope"
                );
                continue;
            }
            fields.insert(key.clone(), value.clone().into_relaxed_extjson());
        }
    }

    Ok(ReplicationPayload {
        id,
        operation: event.operation.clone(),
        timestamp: seconds,
        timestamp_readable,
        fields,
    })
}
