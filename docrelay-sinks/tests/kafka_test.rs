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


//! Kafka sink delivery.
//!
//! The broker tests need a running Kafka:
//!
//! ```bash
//! DOCRELAY_TEST_KAFKA_BROKERS=localhost:9092 cargo test -p docrelay-sinks \
//!     --features kafka --test kafka_test -- --ignored
//! ```

#![cfg(feature = "kafka")]

mod common;

use common::payload;
use docrelay_core::event::OperationType;
use docrelay_core::sink::Sink;
use docrelay_sinks::kafka::{KafkaConfig, KafkaSink};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::{ClientConfig, Message};
use serde_json::{json, Value};
use std::time::Duration;

fn brokers() -> String {
    std::env::var("DOCRELAY_TEST_KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string())
}

fn unique_suffix() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

#[tokio::test]
async fn test_unreachable_broker_times_out_as_retryable() {
    let config = KafkaConfig::builder()
        .bootstrap_servers("127.0.0.1:1")
        .topic("cdc-events")
        .delivery_timeout(Duration::from_secs(1))
        .build()
        .unwrap();
    let mut sink = KafkaSink::new(config).unwrap();

    let err = sink
        .deliver(&payload(OperationType::Insert, "A1", json!({})))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
#[ignore = "requires Kafka"]
async fn test_record_is_keyed_by_document_id() {
    let topic = format!("docrelay-test-{}", unique_suffix());
    let id = format!("order-{}", unique_suffix());

    let config = KafkaConfig::builder()
        .bootstrap_servers(brokers())
        .topic(&topic)
        .property("allow.auto.create.topics", "true")
        .build()
        .unwrap();
    let mut sink = KafkaSink::new(config).unwrap();

    sink.deliver(&payload(
        OperationType::Update,
        &id,
        json!({ "status": "shipped" }),
    ))
    .await
    .unwrap();
    sink.close().await.unwrap();

    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", brokers())
        .set("group.id", format!("docrelay-test-{}", unique_suffix()))
        .set("auto.offset.reset", "earliest")
        .create()
        .unwrap();
    consumer.subscribe(&[topic.as_str()]).unwrap();

    let message = tokio::time::timeout(Duration::from_secs(30), consumer.recv())
        .await
        .expect("no record within 30s")
        .unwrap();

    assert_eq!(message.key(), Some(id.as_bytes()));
    let record: Value = serde_json::from_slice(message.payload().unwrap()).unwrap();
    assert_eq!(record["id"], id.as_str());
    assert_eq!(record["operation"], "update");
    assert_eq!(record["status"], "shipped");
}
