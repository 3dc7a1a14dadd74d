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

//! Environment parsing for the runner.

use docrelay_core::replication::{DEFAULT_MAX_ITERATIONS, DEFAULT_SYNC_INTERVAL};
use docrelay_runner::{RunnerConfig, RunnerError, SinkTarget};
use std::collections::HashMap;

const BASE: &[(&str, &str)] = &[
    ("DOCUMENTDB_URI", "mongodb://localhost:27017"),
    ("WATCHED_DB_NAME", "shop"),
    ("WATCHED_COLLECTION_NAME", "orders"),
];

fn parse(extra: &[(&str, &str)]) -> Result<RunnerConfig, RunnerError> {
    let vars: HashMap<String, String> = BASE
        .iter()
        .chain(extra)
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    RunnerConfig::from_lookup(move |name| vars.get(name).cloned())
}

#[test]
fn test_minimal_config_uses_defaults() {
    let config = parse(&[("KINESIS_STREAM", "orders-stream")]).unwrap();

    assert_eq!(config.source_uri, "mongodb://localhost:27017");
    assert_eq!(config.replication.namespace.full_name(), "shop.orders");
    assert_eq!(config.replication.max_iterations, DEFAULT_MAX_ITERATIONS);
    assert_eq!(config.replication.sync_interval, DEFAULT_SYNC_INTERVAL);
    assert_eq!(config.state_database, "docrelay");
    assert_eq!(config.state_collection, "checkpoints");
    assert_eq!(config.alert_topic_arn, None);
    assert_eq!(
        config.sinks,
        vec![SinkTarget::Kinesis {
            stream: "orders-stream".to_string()
        }]
    );
}

#[test]
fn test_full_config() {
    let config = parse(&[
        ("STATE_DB", "replication"),
        ("STATE_COLLECTION", "tokens"),
        ("STATE_SYNC_COUNT", "50"),
        ("MAX_LOOP", "200"),
        ("SNS_TOPIC_ARN_ALERT", "arn:aws:sns:eu-west-1:123456789012:alerts"),
        ("SNS_TOPIC_ARN_EVENT", "arn:aws:sns:eu-west-1:123456789012:events"),
        ("BUCKET_NAME", "cdc-archive"),
        ("BUCKET_PATH", "exports/"),
        ("ELASTICSEARCH_URI", "https://search.local:9200"),
        ("ES_INDEX_NAME", "orders"),
        ("KINESIS_STREAM", "orders-stream"),
        ("MSK_BOOTSTRAP_SRV", "b-1.msk:9094,b-2.msk:9094"),
        ("MSK_TOPIC_NAME", "orders"),
        ("AWS_REGION", "eu-west-1"),
    ])
    .unwrap();

    assert_eq!(config.state_database, "replication");
    assert_eq!(config.state_collection, "tokens");
    assert_eq!(config.replication.sync_interval, 50);
    assert_eq!(config.replication.max_iterations, 200);
    assert_eq!(
        config.alert_topic_arn.as_deref(),
        Some("arn:aws:sns:eu-west-1:123456789012:alerts")
    );
    assert_eq!(config.aws_region.as_deref(), Some("eu-west-1"));

    let names: Vec<_> = config.sinks.iter().map(SinkTarget::name).collect();
    assert_eq!(names, ["elasticsearch", "s3", "kinesis", "kafka", "sns"]);
    assert_eq!(
        config.sinks[1],
        SinkTarget::S3 {
            bucket: "cdc-archive".to_string(),
            prefix: Some("exports/".to_string()),
        }
    );
}

#[test]
fn test_missing_required_variable() {
    let vars: HashMap<&str, &str> = [("WATCHED_DB_NAME", "shop")].into_iter().collect();
    let err = RunnerConfig::from_lookup(|name| vars.get(name).map(|v| (*v).to_string()))
        .unwrap_err();
    assert!(matches!(err, RunnerError::MissingVariable("DOCUMENTDB_URI")));
}

#[test]
fn test_empty_value_counts_as_unset() {
    let err = parse(&[("KINESIS_STREAM", "orders-stream"), ("WATCHED_DB_NAME", "  ")])
        .unwrap_err();
    assert!(matches!(err, RunnerError::MissingVariable("WATCHED_DB_NAME")));
}

#[test]
fn test_invalid_numbers_are_rejected() {
    let err = parse(&[("KINESIS_STREAM", "s"), ("STATE_SYNC_COUNT", "often")]).unwrap_err();
    assert!(matches!(
        err,
        RunnerError::InvalidValue {
            name: "STATE_SYNC_COUNT",
            ..
        }
    ));

    let err = parse(&[("KINESIS_STREAM", "s"), ("MAX_LOOP", "0")]).unwrap_err();
    assert!(err.to_string().contains("must be at least 1"));
}

#[test]
fn test_half_configured_sink_is_rejected() {
    let err = parse(&[("ES_INDEX_NAME", "orders")]).unwrap_err();
    assert!(err.to_string().contains("ELASTICSEARCH_URI is missing"));

    let err = parse(&[("KINESIS_STREAM", "s"), ("BUCKET_PATH", "exports/")]).unwrap_err();
    assert!(err.to_string().contains("BUCKET_NAME is missing"));
}

#[test]
fn test_no_sink_is_rejected() {
    let err = parse(&[("SNS_TOPIC_ARN_ALERT", "arn:aws:sns:eu-west-1:1:alerts")]).unwrap_err();
    assert!(matches!(err, RunnerError::Configuration(_)));
    assert!(err.is_setup());
}
