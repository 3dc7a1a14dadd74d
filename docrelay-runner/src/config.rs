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

//! Environment-driven configuration.
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `DOCUMENTDB_URI` | Source connection string (required) |
//! | `WATCHED_DB_NAME`, `WATCHED_COLLECTION_NAME` | Watched namespace (required) |
//! | `STATE_DB`, `STATE_COLLECTION` | Checkpoint location |
//! | `STATE_SYNC_COUNT` | Processed events between interval commits |
//! | `MAX_LOOP` | Poll budget per run |
//! | `SNS_TOPIC_ARN_ALERT` | Alert topic; alerts are only logged without it |
//! | `SNS_TOPIC_ARN_EVENT` | Enables the SNS notification sink |
//! | `BUCKET_NAME`, `BUCKET_PATH` | Enables the S3 batch sink |
//! | `ELASTICSEARCH_URI`, `ES_INDEX_NAME` | Enables the Elasticsearch sink |
//! | `KINESIS_STREAM` | Enables the Kinesis sink |
//! | `MSK_BOOTSTRAP_SRV`, `MSK_TOPIC_NAME` | Enables the Kafka sink |
//! | `AWS_REGION` | Region for AWS clients |
//!
//! Empty values count as unset.

use crate::error::RunnerError;
use docrelay_core::mongo::redact_uri;
use docrelay_core::replication::ReplicationConfig;
use docrelay_stores::mongo::{DEFAULT_STATE_COLLECTION, DEFAULT_STATE_DATABASE};

/// A sink enabled by the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    /// Document index
    Elasticsearch {
        /// Cluster URL
        url: String,
        /// Index name
        index: String,
    },
    /// Batch files in object storage
    S3 {
        /// Bucket name
        bucket: String,
        /// Key prefix
        prefix: Option<String>,
    },
    /// Record stream
    Kinesis {
        /// Stream name
        stream: String,
    },
    /// Message log
    Kafka {
        /// Comma-separated broker list
        bootstrap_servers: String,
        /// Topic name
        topic: String,
    },
    /// Pub/sub notifications
    Sns {
        /// Topic ARN
        topic_arn: String,
    },
}

impl SinkTarget {
    /// Short name used in logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Elasticsearch { .. } => "elasticsearch",
            Self::S3 { .. } => "s3",
            Self::Kinesis { .. } => "kinesis",
            Self::Kafka { .. } => "kafka",
            Self::Sns { .. } => "sns",
        }
    }
}

/// Everything one invocation needs.
#[derive(Clone)]
pub struct RunnerConfig {
    /// Source connection string
    pub source_uri: String,

    /// Database holding the checkpoint records
    pub state_database: String,

    /// Collection holding the checkpoint records
    pub state_collection: String,

    /// Loop settings for the watched collection
    pub replication: ReplicationConfig,

    /// Topic for operator alerts
    pub alert_topic_arn: Option<String>,

    /// Region for AWS clients
    pub aws_region: Option<String>,

    /// Enabled sinks, in fan-out order
    pub sinks: Vec<SinkTarget>,
}

impl std::fmt::Debug for RunnerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerConfig")
            .field("source_uri", &redact_uri(&self.source_uri))
            .field("state_database", &self.state_database)
            .field("state_collection", &self.state_collection)
            .field("replication", &self.replication)
            .field("alert_topic_arn", &self.alert_topic_arn)
            .field("aws_region", &self.aws_region)
            .field(
                "sinks",
                &self.sinks.iter().map(SinkTarget::name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl RunnerConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// See [`RunnerConfig::from_lookup`].
    pub fn from_env() -> Result<Self, RunnerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing, a number does not
    /// parse, a sink is only half configured, or no sink is configured.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RunnerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let require = |name: &'static str| get(name).ok_or(RunnerError::MissingVariable(name));

        let source_uri = require("DOCUMENTDB_URI")?;

        let mut builder = ReplicationConfig::builder()
            .database(require("WATCHED_DB_NAME")?)
            .collection(require("WATCHED_COLLECTION_NAME")?);
        if let Some(count) = parse_count("STATE_SYNC_COUNT", get("STATE_SYNC_COUNT"))? {
            builder = builder.sync_interval(count);
        }
        if let Some(max) = parse_count("MAX_LOOP", get("MAX_LOOP"))? {
            builder = builder.max_iterations(max);
        }
        let replication = builder.build().map_err(RunnerError::Configuration)?;

        let sinks = sink_targets(&get)?;
        if sinks.is_empty() {
            return Err(RunnerError::Configuration(
                "no sink configured; set ELASTICSEARCH_URI, BUCKET_NAME, KINESIS_STREAM, \
                 MSK_BOOTSTRAP_SRV or SNS_TOPIC_ARN_EVENT"
                    .to_string(),
            ));
        }

        Ok(Self {
            source_uri,
            state_database: get("STATE_DB").unwrap_or_else(|| DEFAULT_STATE_DATABASE.to_string()),
            state_collection: get("STATE_COLLECTION")
                .unwrap_or_else(|| DEFAULT_STATE_COLLECTION.to_string()),
            replication,
            alert_topic_arn: get("SNS_TOPIC_ARN_ALERT"),
            aws_region: get("AWS_REGION"),
            sinks,
        })
    }
}

fn parse_count(name: &'static str, raw: Option<String>) -> Result<Option<usize>, RunnerError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.trim().parse::<usize>() {
        Ok(0) => Err(RunnerError::InvalidValue {
            name,
            value: raw,
            reason: "must be at least 1".to_string(),
        }),
        Ok(n) => Ok(Some(n)),
        Err(e) => Err(RunnerError::InvalidValue {
            name,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

fn pair<G>(
    get: &G,
    first: &'static str,
    second: &'static str,
) -> Result<Option<(String, String)>, RunnerError>
where
    G: Fn(&str) -> Option<String>,
{
    match (get(first), get(second)) {
        (Some(a), Some(b)) => Ok(Some((a, b))),
        (None, None) => Ok(None),
        (Some(_), None) => Err(RunnerError::Configuration(format!(
            "{first} is set but {second} is missing"
        ))),
        (None, Some(_)) => Err(RunnerError::Configuration(format!(
            "{second} is set but {first} is missing"
        ))),
    }
}

fn sink_targets<G>(get: &G) -> Result<Vec<SinkTarget>, RunnerError>
where
    G: Fn(&str) -> Option<String>,
{
    let mut sinks = Vec::new();

    if let Some((url, index)) = pair(get, "ELASTICSEARCH_URI", "ES_INDEX_NAME")? {
        sinks.push(SinkTarget::Elasticsearch { url, index });
    }

    match (get("BUCKET_NAME"), get("BUCKET_PATH")) {
        (Some(bucket), prefix) => sinks.push(SinkTarget::S3 { bucket, prefix }),
        (None, Some(_)) => {
            return Err(RunnerError::Configuration(
                "BUCKET_PATH is set but BUCKET_NAME is missing".to_string(),
            ))
        }
        (None, None) => {}
    }

    if let Some(stream) = get("KINESIS_STREAM") {
        sinks.push(SinkTarget::Kinesis { stream });
    }

    if let Some((bootstrap_servers, topic)) = pair(get, "MSK_BOOTSTRAP_SRV", "MSK_TOPIC_NAME")? {
        sinks.push(SinkTarget::Kafka {
            bootstrap_servers,
            topic,
        });
    }

    if let Some(topic_arn) = get("SNS_TOPIC_ARN_EVENT") {
        sinks.push(SinkTarget::Sns { topic_arn });
    }

    Ok(sinks)
}
