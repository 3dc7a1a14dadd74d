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

//! One invocation driven through in-memory collaborators.

use bson::{doc, Document, Timestamp};
use docrelay_core::alert::RecordingAlertChannel;
use docrelay_core::checkpoint::CheckpointKey;
use docrelay_core::dispatch::Dispatcher;
use docrelay_core::event::{ChangeEvent, Namespace, OperationType};
use docrelay_core::feed::ScriptedFeed;
use docrelay_core::replication::{ReplicationConfig, Replicator, RunStatus};
use docrelay_core::sink::{MockSink, SinkKind};
use docrelay_runner::config::{RunnerConfig, SinkTarget};
use docrelay_runner::invocation::{run_once, InvocationResult};
use docrelay_runner::{setup, RunnerError};
use docrelay_stores::memory::MemoryCheckpointStore;
use std::sync::Arc;
use std::time::Duration;

fn token(n: u32) -> Document {
    doc! { "_data": format!("pos{n}") }
}

fn insert(id: i32, ts: u32) -> ChangeEvent {
    ChangeEvent {
        operation: OperationType::Insert,
        namespace: Namespace::new("shop", "orders"),
        document_key: Some(doc! { "_id": id }),
        full_document: Some(doc! { "_id": id, "total": 12.5 }),
        cluster_time: Timestamp {
            time: ts,
            increment: 0,
        },
        resume_token: token(ts),
    }
}

fn replication_config() -> ReplicationConfig {
    ReplicationConfig::builder()
        .database("shop")
        .collection("orders")
        .max_iterations(10)
        .first_run_backoff(Duration::from_millis(5))
        .build()
        .unwrap()
}

fn replicator(
    feed: &ScriptedFeed,
    store: &MemoryCheckpointStore,
    sink: MockSink,
    alerts: &RecordingAlertChannel,
) -> Replicator<ScriptedFeed, MemoryCheckpointStore> {
    let alerts = Arc::new(alerts.clone());
    let dispatcher = Dispatcher::builder(alerts.clone())
        .sink(Box::new(sink))
        .build();
    Replicator::new(
        replication_config(),
        feed.clone(),
        store.clone(),
        dispatcher,
        alerts,
    )
}

#[tokio::test]
async fn test_successful_invocation() {
    let store = MemoryCheckpointStore::with_tokens([(
        CheckpointKey::new("shop", "orders"),
        token(1),
    )]);
    let feed = ScriptedFeed::new().event(insert(1, 2)).event(insert(2, 3));
    let sink = MockSink::new(SinkKind::Index);
    let handle = sink.handle();
    let alerts = RecordingAlertChannel::new();

    let mut replicator = replicator(&feed, &store, sink, &alerts);
    let report = run_once(&mut replicator).await.unwrap();
    let result = InvocationResult::from_report(&report);

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.events_processed, 2);
    assert_eq!(result.status_code, 200);
    assert_eq!(handle.delivered_count(), 2);
    assert_eq!(handle.close_count(), 1);
    assert_eq!(feed.invalidations(), 1);
    assert_eq!(alerts.count(), 0);
}

#[tokio::test]
async fn test_empty_invocation_reports_no_events() {
    let store = MemoryCheckpointStore::with_tokens([(
        CheckpointKey::new("shop", "orders"),
        token(7),
    )]);
    let feed = ScriptedFeed::new();
    let alerts = RecordingAlertChannel::new();

    let mut replicator = replicator(&feed, &store, MockSink::new(SinkKind::Index), &alerts);
    let report = run_once(&mut replicator).await.unwrap();
    let result = InvocationResult::from_report(&report);

    assert_eq!(result.status, RunStatus::NoEvents);
    assert_eq!(result.status_code, 201);
    assert_eq!(result.detail, "No records to process.");
    assert!(!result.is_failure());
}

#[tokio::test]
async fn test_failed_invocation_still_shuts_down() {
    let store = MemoryCheckpointStore::with_tokens([(
        CheckpointKey::new("shop", "orders"),
        token(1),
    )]);
    let feed = ScriptedFeed::new().event(insert(1, 2));
    let sink = MockSink::new(SinkKind::Index).with_delivery_failures();
    let handle = sink.handle();
    let alerts = RecordingAlertChannel::new();

    let mut replicator = replicator(&feed, &store, sink, &alerts);
    let err = RunnerError::from(run_once(&mut replicator).await.unwrap_err());
    let result = InvocationResult::failure(&err);

    assert!(!err.is_setup());
    assert!(result.is_failure());
    assert_eq!(result.status_code, 500);
    assert_eq!(handle.close_count(), 1);
    assert_eq!(feed.invalidations(), 1);
    assert!(alerts.count() >= 1);
}

fn runner_config(sinks: Vec<SinkTarget>) -> RunnerConfig {
    RunnerConfig {
        source_uri: "mongodb://localhost:27017".to_string(),
        state_database: "docrelay".to_string(),
        state_collection: "checkpoints".to_string(),
        replication: replication_config(),
        alert_topic_arn: None,
        aws_region: None,
        sinks,
    }
}

#[cfg(feature = "elasticsearch")]
#[tokio::test]
async fn test_dispatcher_registers_configured_sinks() {
    let config = runner_config(vec![SinkTarget::Elasticsearch {
        url: "http://localhost:9200".to_string(),
        index: "orders".to_string(),
    }]);
    let alerts = Arc::new(RecordingAlertChannel::new());

    let dispatcher = setup::build_dispatcher(&config, alerts).await.unwrap();
    assert_eq!(dispatcher.len(), 1);
    assert!(!dispatcher.has_batch_sink());
}

#[cfg(feature = "elasticsearch")]
#[tokio::test]
async fn test_invalid_sink_settings_fail_setup() {
    let config = runner_config(vec![SinkTarget::Elasticsearch {
        url: "not a url".to_string(),
        index: "orders".to_string(),
    }]);
    let alerts = Arc::new(RecordingAlertChannel::new());

    let err = setup::build_dispatcher(&config, alerts).await.unwrap_err();
    assert!(matches!(
        err,
        RunnerError::Sink {
            sink: "elasticsearch",
            ..
        }
    ));
    assert!(err.is_setup());
}

#[cfg(not(feature = "kafka"))]
#[tokio::test]
async fn test_sink_without_feature_fails_setup() {
    let config = runner_config(vec![SinkTarget::Kafka {
        bootstrap_servers: "localhost:9092".to_string(),
        topic: "orders".to_string(),
    }]);
    let alerts = Arc::new(RecordingAlertChannel::new());

    let err = setup::build_dispatcher(&config, alerts).await.unwrap_err();
    assert!(matches!(
        err,
        RunnerError::SinkUnavailable { feature: "kafka", .. }
    ));
}
