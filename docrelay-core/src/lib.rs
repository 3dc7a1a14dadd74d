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

//! Docrelay Core - change data replication
//!
//! This crate holds the replication core: it consumes a resumable change
//! feed, normalizes each change event and fans it out to a set of sinks,
//! committing the feed position to a durable checkpoint store.
//!
//! # Key Components
//!
//! - [`event`]: raw change events observed on the feed
//! - [`normalize`]: conversion to the canonical replication payload
//! - [`sink`], [`batch`]: the sink contract and the batch file sink
//! - [`dispatch`]: fan-out with per-sink delivery policies
//! - [`checkpoint`]: the checkpoint store contract
//! - [`feed`], [`mongo`]: the feed contract and its MongoDB implementation
//! - [`replication`]: the replication loop
//!
//! # Example
//!
//! ```rust
//! use docrelay_core::event::{ChangeEvent, Namespace, OperationType};
//! use docrelay_core::normalize::normalize;
//! use bson::{doc, Timestamp};
//!
//! let event = ChangeEvent {
//!     operation: OperationType::Delete,
//!     namespace: Namespace::new("shop", "orders"),
//!     document_key: Some(doc! { "_id": "A" }),
//!     full_document: None,
//!     cluster_time: Timestamp { time: 101, increment: 0 },
//!     resume_token: doc! { "_data": "82" },
//! };
//!
//! let payload = normalize(&event).unwrap();
//! assert_eq!(payload.id, "A");
//! assert!(payload.fields.is_empty());
//! ```

pub mod alert;
pub mod batch;
pub mod checkpoint;
pub mod connection;
pub mod dispatch;
pub mod event;
pub mod feed;
pub mod metrics;
pub mod mongo;
pub mod normalize;
pub mod replication;
pub mod sink;
