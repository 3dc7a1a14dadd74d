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

//! S3 batch upload.
//!
//! [`S3Uploader`] is the object-store half of a batch file sink: the
//! accumulation and all-or-nothing flush live in
//! [`BatchFileSink`](docrelay_core::batch::BatchFileSink), and this module
//! computes object keys and performs the single `PutObject` per run.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use docrelay_core::batch::BatchFileSink;
//! use docrelay_core::event::Namespace;
//! use docrelay_sinks::s3::{S3Config, S3Uploader};
//! use std::sync::Arc;
//!
//! let config = S3Config::builder()
//!     .bucket("replication-exports")
//!     .prefix("exports/")
//!     .build()?;
//!
//! let uploader = S3Uploader::new(config).await?;
//! let sink = BatchFileSink::new(Namespace::new("shop", "orders"), Arc::new(uploader));
//! ```
//!
//! ## Using LocalStack for testing
//!
//! ```rust,ignore
//! let config = S3Config::builder()
//!     .bucket("test-bucket")
//!     .region("us-east-1")
//!     .endpoint_url("http://localhost:4566")
//!     .force_path_style(true)
//!     .build()?;
//! ```

pub mod config;
pub mod key_gen;
mod uploader;

pub use config::{Compression, S3Config, S3ConfigBuilder};
pub use key_gen::KeyGenerationStrategy;
pub use uploader::S3Uploader;
