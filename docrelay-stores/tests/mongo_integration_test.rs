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

//! Tests against a live MongoDB server.
//!
//! Run with `cargo test -p docrelay-stores -- --ignored` and a server at
//! `DOCRELAY_TEST_MONGODB_URI` (default `mongodb://localhost:27017`).

#![cfg(feature = "mongodb-store")]

use bson::doc;
use docrelay_core::checkpoint::{CheckpointKey, CheckpointStore};
use docrelay_core::connection::ClientCache;
use docrelay_core::mongo::MongoConnector;
use docrelay_stores::mongo::{current_record_filter, MongoCheckpointConfig, MongoCheckpointStore};
use std::sync::Arc;

fn test_uri() -> String {
    std::env::var("DOCRELAY_TEST_MONGODB_URI")
        .unwrap_or_else(|_| "mongodb://localhost:27017".to_string())
}

async fn fresh_store(collection: &str) -> (MongoCheckpointStore, mongodb::Client) {
    let clients = Arc::new(ClientCache::new(MongoConnector::new(test_uri())));
    let client = clients.get().await.expect("mongodb reachable");
    client
        .database("docrelay_test")
        .collection::<bson::Document>(collection)
        .drop()
        .await
        .expect("drop state collection");

    let config = MongoCheckpointConfig::builder()
        .database("docrelay_test")
        .collection(collection)
        .build()
        .expect("valid config");
    (MongoCheckpointStore::new(clients, config), client)
}

#[tokio::test]
#[ignore] // Requires MongoDB
async fn test_mongo_bootstrap_and_update() {
    let (store, client) = fresh_store("checkpoints_bootstrap").await;
    let key = CheckpointKey::new("shop", "orders");

    assert!(store.get_last_processed(&key).await.unwrap().is_none());

    let state = client
        .database("docrelay_test")
        .collection::<bson::Document>("checkpoints_bootstrap");
    assert_eq!(
        state
            .count_documents(current_record_filter(&key))
            .await
            .unwrap(),
        1
    );

    let token = doc! { "_data": "826500" };
    store.set_last_processed(&key, Some(&token)).await.unwrap();
    assert_eq!(store.get_last_processed(&key).await.unwrap(), Some(token));

    store.set_last_processed(&key, None).await.unwrap();
    assert!(store.get_last_processed(&key).await.unwrap().is_none());
    assert_eq!(state.count_documents(doc! {}).await.unwrap(), 1);
}

#[tokio::test]
#[ignore] // Requires MongoDB
async fn test_mongo_set_without_record_upserts() {
    let (store, _client) = fresh_store("checkpoints_upsert").await;
    let key = CheckpointKey::new("shop", "users");
    let token = doc! { "_data": "826501" };

    store.set_last_processed(&key, Some(&token)).await.unwrap();
    assert_eq!(store.get_last_processed(&key).await.unwrap(), Some(token));
}
