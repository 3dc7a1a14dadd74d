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

//! Checkpoint store backends for docrelay.
//!
//! This crate provides implementations of the
//! [`CheckpointStore`](docrelay_core::checkpoint::CheckpointStore) trait that
//! persist the resume token of the last replicated change event.
//!
//! # Available Stores
//!
//! - **Memory**: process-local store for tests and local runs
//! - **MongoDB** (`mongodb-store` feature, default): state collection on the
//!   source cluster or any other MongoDB-compatible server
//! - **Redis** (`redis-store` feature): pooled Redis store with retries
//!
//! # Example: MongoDB Store
//!
//! ```rust,ignore
//! use docrelay_core::checkpoint::{CheckpointKey, CheckpointStore};
//! use docrelay_core::connection::ClientCache;
//! use docrelay_core::mongo::MongoConnector;
//! use docrelay_stores::mongo::{MongoCheckpointConfig, MongoCheckpointStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let clients = Arc::new(ClientCache::new(MongoConnector::new("mongodb://localhost:27017")));
//! let config = MongoCheckpointConfig::builder()
//!     .database("state")
//!     .collection("checkpoints")
//!     .build()?;
//!
//! let store = MongoCheckpointStore::new(clients, config);
//! let key = CheckpointKey::new("shop", "orders");
//! let token = store.get_last_processed(&key).await?;
//! assert!(token.is_none());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod memory;

#[cfg(feature = "mongodb-store")]
pub mod mongo;

#[cfg(feature = "redis-store")]
pub mod redis;
