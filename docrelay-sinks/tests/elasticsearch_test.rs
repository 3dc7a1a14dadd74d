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

//! Elasticsearch sink against a local stub HTTP server.

#![cfg(feature = "elasticsearch")]

mod common;

use common::{payload, unused_url, StubServer};
use docrelay_core::event::OperationType;
use docrelay_core::sink::{Sink, SinkError};
use docrelay_sinks::elasticsearch::{ElasticsearchConfig, ElasticsearchSink};
use serde_json::{json, Value};
use std::time::Duration;

fn sink(url: &str) -> ElasticsearchSink {
    let config = ElasticsearchConfig::builder()
        .url(url)
        .index("orders")
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    ElasticsearchSink::new(config).unwrap()
}

#[tokio::test]
async fn test_upsert_puts_payload() {
    let server = StubServer::with_statuses(vec![201]).await;
    let mut sink = sink(&server.url);

    sink.deliver(&payload(
        OperationType::Insert,
        "A1",
        json!({ "name": "widget", "qty": 3 }),
    ))
    .await
    .unwrap();

    let requests = server.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "PUT");
    assert_eq!(requests[0].path, "/orders/_doc/A1");

    let body: Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(body["id"], "A1");
    assert_eq!(body["operation"], "insert");
    assert_eq!(body["timestampReadable"], "2023-11-14T22:13:20Z");
    assert_eq!(body["name"], "widget");
    assert_eq!(body["qty"], 3);
}

#[tokio::test]
async fn test_delete_issues_delete() {
    let server = StubServer::with_statuses(vec![200]).await;
    let mut sink = sink(&server.url);

    sink.deliver(&payload(OperationType::Delete, "A1", json!({})))
        .await
        .unwrap();

    let requests = server.requests().await;
    assert_eq!(requests[0].method, "DELETE");
    assert_eq!(requests[0].path, "/orders/_doc/A1");
    assert!(requests[0].body.is_empty());
}

#[tokio::test]
async fn test_delete_of_missing_document_succeeds() {
    let server = StubServer::with_statuses(vec![404]).await;
    let mut sink = sink(&server.url);

    let result = sink
        .deliver(&payload(OperationType::Delete, "gone", json!({})))
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_upsert_404_is_an_error() {
    let server = StubServer::with_statuses(vec![404]).await;
    let mut sink = sink(&server.url);

    let err = sink
        .deliver(&payload(OperationType::Update, "A1", json!({ "x": 1 })))
        .await
        .unwrap_err();
    assert!(matches!(err, SinkError::WriteError { retryable: false, .. }));
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let server = StubServer::with_statuses(vec![503]).await;
    let mut sink = sink(&server.url);

    let err = sink
        .deliver(&payload(OperationType::Insert, "A1", json!({})))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_basic_auth_header() {
    let server = StubServer::with_statuses(vec![200]).await;
    let config = ElasticsearchConfig::builder()
        .url(&server.url)
        .index("orders")
        .basic_auth("replicator", "secret")
        .build()
        .unwrap();
    let mut sink = ElasticsearchSink::new(config).unwrap();

    sink.deliver(&payload(OperationType::Insert, "A1", json!({})))
        .await
        .unwrap();

    let requests = server.requests().await;
    // base64("replicator:secret")
    assert_eq!(
        requests[0].header("authorization"),
        Some("Basic cmVwbGljYXRvcjpzZWNyZXQ=")
    );
}

#[tokio::test]
async fn test_unreachable_cluster_is_connection_error() {
    let url = unused_url().await;

    let err = sink(&url)
        .deliver(&payload(OperationType::Insert, "A1", json!({})))
        .await
        .unwrap_err();
    assert!(err.is_connection());
}
