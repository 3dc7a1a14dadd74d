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

//! S3 object key layouts.
//!
//! Every layout starts with the optional prefix, places the batch under the
//! watched database and collection, and names the object after the time the
//! batch was closed.
//!
//! ```rust
//! use docrelay_core::event::Namespace;
//! use docrelay_sinks::s3::KeyGenerationStrategy;
//! use chrono::{TimeZone, Utc};
//!
//! let closed_at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
//! let key = KeyGenerationStrategy::CollectionEpoch.generate_key(
//!     Some("exports/"),
//!     &Namespace::new("shop", "orders"),
//!     &closed_at,
//!     "",
//! );
//! assert_eq!(key, "exports/shop/orders/orders1705312800.jsonl");
//! ```

use chrono::{DateTime, Utc};
use docrelay_core::event::Namespace;

/// File extension of a batch object.
pub const BATCH_EXTENSION: &str = "jsonl";

/// Key layout for batch objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyGenerationStrategy {
    /// `{prefix}{db}/{coll}/{coll}{epoch_seconds}.jsonl`
    ///
    /// **Example**: `exports/shop/orders/orders1705312800.jsonl`
    #[default]
    CollectionEpoch,

    /// Hive-style partitions, readable by Athena, Presto and Spark.
    ///
    /// `{prefix}database={db}/collection={coll}/year={YYYY}/month={MM}/day={DD}/hour={HH}/{epoch_millis}.jsonl`
    HivePartitioned,

    /// `{prefix}{db}/{coll}/{YYYY}/{MM}/{DD}/{HH}/{epoch_millis}.jsonl`
    DateHourPartitioned,

    /// `{prefix}{db}/{coll}/{YYYY}/{MM}/{DD}/{epoch_millis}.jsonl`
    DatePartitioned,
}

impl KeyGenerationStrategy {
    /// Generates the object key for a batch.
    ///
    /// `compression_ext` is appended after the extension, e.g. `.gz`.
    #[must_use]
    pub fn generate_key(
        &self,
        prefix: Option<&str>,
        namespace: &Namespace,
        closed_at: &DateTime<Utc>,
        compression_ext: &str,
    ) -> String {
        let prefix_part = match prefix {
            None | Some("") => String::new(),
            Some(p) if p.ends_with('/') => p.to_string(),
            Some(p) => format!("{p}/"),
        };
        let db = &namespace.database;
        let coll = &namespace.collection;
        let millis = closed_at.timestamp_millis();

        match self {
            Self::CollectionEpoch => format!(
                "{prefix_part}{db}/{coll}/{coll}{}.{BATCH_EXTENSION}{compression_ext}",
                closed_at.timestamp()
            ),
            Self::HivePartitioned => format!(
                "{prefix_part}database={db}/collection={coll}/{}/{millis}.{BATCH_EXTENSION}{compression_ext}",
                closed_at.format("year=%Y/month=%m/day=%d/hour=%H")
            ),
            Self::DateHourPartitioned => format!(
                "{prefix_part}{db}/{coll}/{}/{millis}.{BATCH_EXTENSION}{compression_ext}",
                closed_at.format("%Y/%m/%d/%H")
            ),
            Self::DatePartitioned => format!(
                "{prefix_part}{db}/{coll}/{}/{millis}.{BATCH_EXTENSION}{compression_ext}",
                closed_at.format("%Y/%m/%d")
            ),
        }
    }

    /// Returns a human-readable description of the key pattern.
    #[must_use]
    pub const fn pattern_description(&self) -> &'static str {
        match self {
            Self::CollectionEpoch => "{prefix}{db}/{coll}/{coll}{epoch}.jsonl",
            Self::HivePartitioned => {
                "{prefix}database={db}/collection={coll}/year={YYYY}/month={MM}/day={DD}/hour={HH}/{millis}.jsonl"
            }
            Self::DateHourPartitioned => "{prefix}{db}/{coll}/{YYYY}/{MM}/{DD}/{HH}/{millis}.jsonl",
            Self::DatePartitioned => "{prefix}{db}/{coll}/{YYYY}/{MM}/{DD}/{millis}.jsonl",
        }
    }
}
