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

//! Docrelay Sinks - downstream clients for replicated events.
//!
//! Each module implements [`Sink`](docrelay_core::sink::Sink) (or, for S3,
//! [`BatchUploader`](docrelay_core::batch::BatchUploader)) against one
//! external system. Sinks receive normalized
//! [`ReplicationPayload`](docrelay_core::normalize::ReplicationPayload)s and
//! transmit their JSON form.
//!
//! # Available Sinks
//!
//! | Module | Kind | System |
//! |--------|------|--------|
//! | [`elasticsearch`] | Index | Elasticsearch / OpenSearch REST API |
//! | [`s3`] | BatchFile | AWS S3 and S3-compatible storage |
//! | [`kinesis`] | Stream | AWS Kinesis Data Streams |
//! | [`kafka`] | Log | Apache Kafka / Amazon MSK |
//! | [`sns`] | Notification | AWS SNS, plus an SNS alert channel |
//!
//! # Features
//!
//! - `elasticsearch` (default)
//! - `s3` (default), `gzip` for compressed batches
//! - `kinesis` (default)
//! - `sns` (default)
//! - `kafka` - requires librdkafka build tooling
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use docrelay_core::alert::LogAlertChannel;
//! use docrelay_core::dispatch::Dispatcher;
//! use docrelay_sinks::elasticsearch::{ElasticsearchConfig, ElasticsearchSink};
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ElasticsearchConfig::builder()
//!     .url("https://search.internal:9200")
//!     .index("orders")
//!     .build()?;
//!
//! let dispatcher = Dispatcher::builder(Arc::new(LogAlertChannel))
//!     .sink(Box::new(ElasticsearchSink::new(config)?))
//!     .build();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(any(feature = "s3", feature = "kinesis", feature = "sns"))]
pub mod aws;

#[cfg(feature = "elasticsearch")]
pub mod elasticsearch;

#[cfg(feature = "s3")]
pub mod s3;

#[cfg(feature = "kinesis")]
pub mod kinesis;

#[cfg(feature = "kafka")]
pub mod kafka;

#[cfg(feature = "sns")]
pub mod sns;
