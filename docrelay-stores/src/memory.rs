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

//! In-memory checkpoint store.
//!
//! Keeps checkpoint records in a shared map. Nothing survives the process, so
//! this store suits tests, local runs and single-shot invocations where
//! replaying from the start of the change history is acceptable.
//!
//! # Example
//!
//! ```rust
//! use docrelay_core::checkpoint::{CheckpointKey, CheckpointStore};
//! use docrelay_stores::memory::MemoryCheckpointStore;
//! use bson::doc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryCheckpointStore::new();
//! let key = CheckpointKey::new("shop", "orders");
//!
//! assert!(store.get_last_processed(&key).await?.is_none());
//!
//! store.set_last_processed(&key, Some(&doc! { "_data": "82" })).await?;
//! assert!(store.get_last_processed(&key).await?.is_some());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use bson::Document;
use docrelay_core::checkpoint::{CheckpointError, CheckpointKey, CheckpointRecord, CheckpointStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// In-memory checkpoint store.
///
/// Clones share the same records, so a test can keep a handle and inspect
/// what a replicator committed.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    records: Arc<RwLock<HashMap<CheckpointKey, CheckpointRecord>>>,
}

impl MemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        debug!("Creating in-memory checkpoint store");
        Self::default()
    }

    /// Creates a store whose records already hold the given tokens.
    #[must_use]
    pub fn with_tokens(tokens: impl IntoIterator<Item = (CheckpointKey, Document)>) -> Self {
        let records: HashMap<_, _> = tokens
            .into_iter()
            .map(|(key, token)| {
                let mut record = CheckpointRecord::bootstrap(&key);
                record.last_processed = Some(token);
                (key, record)
            })
            .collect();

        debug!(
            record_count = records.len(),
            "Creating in-memory checkpoint store with initial tokens"
        );
        Self {
            records: Arc::new(RwLock::new(records)),
        }
    }

    /// Returns the stored record for `key`, if any.
    pub async fn record(&self, key: &CheckpointKey) -> Option<CheckpointRecord> {
        self.records.read().await.get(key).cloned()
    }

    /// Returns the number of records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns true when no record exists.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get_last_processed(
        &self,
        key: &CheckpointKey,
    ) -> Result<Option<Document>, CheckpointError> {
        if let Some(record) = self.records.read().await.get(key) {
            trace!(key = %key, found = record.last_processed.is_some(), "Read checkpoint");
            return Ok(record.last_processed.clone());
        }

        let mut records = self.records.write().await;
        let record = records
            .entry(key.clone())
            .or_insert_with(|| CheckpointRecord::bootstrap(key));
        debug!(key = %key, "Created empty checkpoint record");
        Ok(record.last_processed.clone())
    }

    async fn set_last_processed(
        &self,
        key: &CheckpointKey,
        token: Option<&Document>,
    ) -> Result<(), CheckpointError> {
        let mut records = self.records.write().await;
        let record = records
            .entry(key.clone())
            .or_insert_with(|| CheckpointRecord::bootstrap(key));
        record.last_processed = token.cloned();
        trace!(key = %key, cleared = token.is_none(), "Wrote checkpoint");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[tokio::test]
    async fn test_first_read_bootstraps_record() {
        let store = MemoryCheckpointStore::new();
        let key = CheckpointKey::new("shop", "orders");

        assert!(store.is_empty().await);
        assert!(store.get_last_processed(&key).await.unwrap().is_none());

        let record = store.record(&key).await.unwrap();
        assert_eq!(record, CheckpointRecord::bootstrap(&key));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_set_overwrites_and_clears() {
        let store = MemoryCheckpointStore::new();
        let key = CheckpointKey::new("shop", "orders");

        store
            .set_last_processed(&key, Some(&doc! { "_data": "01" }))
            .await
            .unwrap();
        store
            .set_last_processed(&key, Some(&doc! { "_data": "02" }))
            .await
            .unwrap();
        assert_eq!(
            store.get_last_processed(&key).await.unwrap(),
            Some(doc! { "_data": "02" })
        );

        store.set_last_processed(&key, None).await.unwrap();
        assert!(store.get_last_processed(&key).await.unwrap().is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let orders = CheckpointKey::new("shop", "orders");
        let users = CheckpointKey::new("shop", "users");
        let store = MemoryCheckpointStore::with_tokens([(orders.clone(), doc! { "_data": "aa" })]);

        assert!(store.get_last_processed(&users).await.unwrap().is_none());
        assert_eq!(
            store.get_last_processed(&orders).await.unwrap(),
            Some(doc! { "_data": "aa" })
        );
    }

    #[tokio::test]
    async fn test_clones_share_records() {
        let store = MemoryCheckpointStore::new();
        let handle = store.clone();
        let key = CheckpointKey::new("a", "b");

        store
            .set_last_processed(&key, Some(&doc! { "_data": "x" }))
            .await
            .unwrap();
        assert!(handle.record(&key).await.unwrap().last_processed.is_some());
    }
}
