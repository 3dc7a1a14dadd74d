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

//! Tests against a live Redis server.
//!
//! Run with `cargo test -p docrelay-stores --features redis-store -- --ignored`
//! and a server at `DOCRELAY_TEST_REDIS_URL` (default `redis://127.0.0.1:6379`).

#![cfg(feature = "redis-store")]

use bson::doc;
use docrelay_core::checkpoint::{CheckpointKey, CheckpointStore};
use docrelay_stores::redis::{RedisCheckpointStore, RedisConfig};
use std::time::Duration;

async fn create_test_store() -> RedisCheckpointStore {
    let url = std::env::var("DOCRELAY_TEST_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let config = RedisConfig::builder()
        .url(url)
        .pool_size(2)
        .ttl(Duration::from_secs(600))
        .build()
        .expect("valid config");

    RedisCheckpointStore::new(config)
        .await
        .expect("failed to create store")
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_checkpoint_roundtrip() {
    let store = create_test_store().await;
    let key = CheckpointKey::new("redis_test", "orders");
    store.set_last_processed(&key, None).await.unwrap();

    assert!(store.get_last_processed(&key).await.unwrap().is_none());

    let token = doc! { "_data": "token_123", "clusterTime": 1_234_567_890_i64 };
    store.set_last_processed(&key, Some(&token)).await.unwrap();
    assert_eq!(store.get_last_processed(&key).await.unwrap(), Some(token));

    store.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_unreachable_server() {
    let config = RedisConfig::builder()
        .url("redis://127.0.0.1:1")
        .connection_timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let err = RedisCheckpointStore::new(config).await.err().unwrap();
    assert!(err.is_connection());
}
