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


//! Kinesis sink against a local stub endpoint.

#![cfg(feature = "kinesis")]

mod common;

use aws_sdk_kinesis::config::retry::RetryConfig;
use aws_sdk_kinesis::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_kinesis::{Client as KinesisClient, Config};
use base64::{engine::general_purpose, Engine as _};
use common::{payload, unused_url, StubResponse, StubServer};
use docrelay_core::event::OperationType;
use docrelay_core::sink::Sink;
use docrelay_sinks::kinesis::KinesisSink;
use serde_json::{json, Value};

const AMZ_JSON: &str = "application/x-amz-json-1.1";

fn client(endpoint: &str) -> KinesisClient {
    let config = Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .endpoint_url(endpoint)
        .credentials_provider(Credentials::new("AKIDTEST", "secret", None, None, "test"))
        .retry_config(RetryConfig::disabled())
        .build();
    KinesisClient::from_conf(config)
}

fn sink(endpoint: &str) -> KinesisSink {
    KinesisSink::with_client(client(endpoint), "cdc-events").unwrap()
}

fn accepted() -> StubResponse {
    StubResponse::new(
        200,
        AMZ_JSON,
        r#"{"ShardId":"shardId-000000000000","SequenceNumber":"49590338271490256608559692538361571095921575989136588898"}"#,
    )
}

fn rejected(code: &str) -> StubResponse {
    StubResponse::new(
        400,
        AMZ_JSON,
        format!(r#"{{"__type":"{code}","message":"rejected by stub"}}"#),
    )
}

#[tokio::test]
async fn test_put_record_keys_by_document_id() {
    let server = StubServer::start(vec![accepted()]).await;
    let mut sink = sink(&server.url);

    sink.deliver(&payload(
        OperationType::Update,
        "order-17",
        json!({ "status": "shipped" }),
    ))
    .await
    .unwrap();

    let requests = server.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert!(requests[0]
        .header("x-amz-target")
        .is_some_and(|target| target.ends_with(".PutRecord")));

    let body: Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(body["StreamName"], "cdc-events");
    assert_eq!(body["PartitionKey"], "order-17");

    let data = general_purpose::STANDARD
        .decode(body["Data"].as_str().unwrap())
        .unwrap();
    let record: Value = serde_json::from_slice(&data).unwrap();
    assert_eq!(record["id"], "order-17");
    assert_eq!(record["operation"], "update");
    assert_eq!(record["status"], "shipped");
}

#[tokio::test]
async fn test_long_id_is_truncated_in_partition_key() {
    let server = StubServer::start(vec![accepted()]).await;
    let mut sink = sink(&server.url);
    let id = "x".repeat(300);

    sink.deliver(&payload(OperationType::Insert, &id, json!({})))
        .await
        .unwrap();

    let requests = server.requests().await;
    let body: Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(body["PartitionKey"].as_str().unwrap().len(), 256);

    let data = general_purpose::STANDARD
        .decode(body["Data"].as_str().unwrap())
        .unwrap();
    let record: Value = serde_json::from_slice(&data).unwrap();
    assert_eq!(record["id"].as_str().unwrap(), id);
}

#[tokio::test]
async fn test_throughput_exceeded_is_retryable() {
    let server = StubServer::start(vec![rejected("ProvisionedThroughputExceededException")]).await;
    let mut sink = sink(&server.url);

    let err = sink
        .deliver(&payload(OperationType::Insert, "A1", json!({})))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(!err.is_connection());
}

#[tokio::test]
async fn test_missing_stream_is_not_retryable() {
    let server = StubServer::start(vec![rejected("ResourceNotFoundException")]).await;
    let mut sink = sink(&server.url);

    let err = sink
        .deliver(&payload(OperationType::Insert, "A1", json!({})))
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_unreachable_endpoint_is_connection_error() {
    let url = unused_url().await;

    let err = sink(&url)
        .deliver(&payload(OperationType::Insert, "A1", json!({})))
        .await
        .unwrap_err();
    assert!(err.is_connection());
    assert!(err.is_retryable());
}
