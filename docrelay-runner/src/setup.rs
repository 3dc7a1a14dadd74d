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

//! Builds the collaborators for one invocation and runs it.
//!
//! The feed and the checkpoint store share one cached source client. Sinks
//! are registered in the order [`RunnerConfig::sinks`] lists them, each with
//! the default delivery policy for its kind.

use crate::config::{RunnerConfig, SinkTarget};
use crate::error::RunnerError;
use crate::invocation::{run_once, InvocationResult};
use docrelay_core::alert::{AlertChannel, LogAlertChannel};
use docrelay_core::connection::ClientCache;
use docrelay_core::dispatch::Dispatcher;
use docrelay_core::mongo::{MongoChangeFeed, MongoConnector};
use docrelay_core::replication::{Replicator, RunReport};
use docrelay_core::sink::Sink;
use docrelay_stores::mongo::{MongoCheckpointConfig, MongoCheckpointStore};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

#[cfg(any(feature = "s3", feature = "kinesis", feature = "sns"))]
use docrelay_sinks::aws::AwsSettings;

/// Runs one invocation end to end.
///
/// Setup failures are alerted here; run failures were already alerted by
/// the replication loop.
#[instrument(skip(config), fields(namespace = %config.replication.namespace.full_name()))]
pub async fn invoke(config: &RunnerConfig) -> InvocationResult {
    let alerts = build_alerts(config).await;
    match replicate(config, Arc::clone(&alerts)).await {
        Ok(report) => {
            info!(
                status = report.status.as_str(),
                events_processed = report.events_processed,
                events_replicated = report.events_replicated,
                "Invocation finished"
            );
            InvocationResult::from_report(&report)
        }
        Err(e) => {
            error!(error = %e, "Invocation failed");
            if e.is_setup() {
                alerts
                    .alert(&format!(
                        "Replication setup failed for {}: {e}",
                        config.replication.namespace.full_name()
                    ))
                    .await;
            }
            InvocationResult::failure(&e)
        }
    }
}

async fn replicate(
    config: &RunnerConfig,
    alerts: Arc<dyn AlertChannel>,
) -> Result<RunReport, RunnerError> {
    let dispatcher = build_dispatcher(config, Arc::clone(&alerts)).await?;

    let store_config = MongoCheckpointConfig::builder()
        .database(config.state_database.clone())
        .collection(config.state_collection.clone())
        .build()?;

    let clients = Arc::new(ClientCache::new(MongoConnector::new(
        config.source_uri.clone(),
    )));
    let feed = MongoChangeFeed::new(
        Arc::clone(&clients),
        config.replication.namespace.clone(),
    );
    let store = MongoCheckpointStore::new(clients, store_config);

    let mut replicator = Replicator::new(
        config.replication.clone(),
        feed,
        store,
        dispatcher,
        alerts,
    );
    run_once(&mut replicator).await.map_err(RunnerError::from)
}

/// Builds the alert channel: SNS when a topic is configured, the log otherwise.
pub async fn build_alerts(config: &RunnerConfig) -> Arc<dyn AlertChannel> {
    let Some(topic_arn) = config.alert_topic_arn.as_deref() else {
        info!("No alert topic configured, alerts are logged only");
        return Arc::new(LogAlertChannel);
    };
    sns_alerts(topic_arn, config).await
}

#[cfg(feature = "sns")]
async fn sns_alerts(topic_arn: &str, config: &RunnerConfig) -> Arc<dyn AlertChannel> {
    use docrelay_sinks::sns::SnsAlertChannel;

    match SnsAlertChannel::new(topic_arn, &aws_settings(config)).await {
        Ok(channel) => Arc::new(channel),
        Err(e) => {
            warn!(error = %e, "Failed to build SNS alert channel, alerts are logged only");
            Arc::new(LogAlertChannel)
        }
    }
}

#[cfg(not(feature = "sns"))]
async fn sns_alerts(_topic_arn: &str, _config: &RunnerConfig) -> Arc<dyn AlertChannel> {
    warn!("SNS_TOPIC_ARN_ALERT is set but this build lacks the 'sns' feature, alerts are logged only");
    Arc::new(LogAlertChannel)
}

/// Builds a dispatcher holding every configured sink.
///
/// # Errors
///
/// Returns an error if any sink cannot be built.
pub async fn build_dispatcher(
    config: &RunnerConfig,
    alerts: Arc<dyn AlertChannel>,
) -> Result<Dispatcher, RunnerError> {
    let mut builder = Dispatcher::builder(alerts);
    for target in &config.sinks {
        let sink = build_sink(target, config).await?;
        info!(sink = target.name(), kind = %sink.kind(), "Registered sink");
        builder = builder.sink(sink);
    }
    Ok(builder.build())
}

async fn build_sink(
    target: &SinkTarget,
    config: &RunnerConfig,
) -> Result<Box<dyn Sink>, RunnerError> {
    match target {
        SinkTarget::Elasticsearch { url, index } => elasticsearch_sink(url, index),
        SinkTarget::S3 { bucket, prefix } => s3_sink(bucket, prefix.as_deref(), config).await,
        SinkTarget::Kinesis { stream } => kinesis_sink(stream, config).await,
        SinkTarget::Kafka {
            bootstrap_servers,
            topic,
        } => kafka_sink(bootstrap_servers, topic),
        SinkTarget::Sns { topic_arn } => sns_sink(topic_arn, config).await,
    }
}

#[cfg(any(feature = "s3", feature = "kinesis", feature = "sns"))]
fn aws_settings(config: &RunnerConfig) -> AwsSettings {
    AwsSettings {
        region: config.aws_region.clone(),
        ..AwsSettings::default()
    }
}

#[cfg(feature = "elasticsearch")]
fn elasticsearch_sink(url: &str, index: &str) -> Result<Box<dyn Sink>, RunnerError> {
    use docrelay_sinks::elasticsearch::{ElasticsearchConfig, ElasticsearchSink};

    let wrap = |source| RunnerError::Sink {
        sink: "elasticsearch",
        source,
    };
    let es_config = ElasticsearchConfig::builder()
        .url(url)
        .index(index)
        .build()
        .map_err(wrap)?;
    Ok(Box::new(ElasticsearchSink::new(es_config).map_err(wrap)?))
}

#[cfg(not(feature = "elasticsearch"))]
fn elasticsearch_sink(_url: &str, _index: &str) -> Result<Box<dyn Sink>, RunnerError> {
    Err(RunnerError::SinkUnavailable {
        sink: "elasticsearch",
        feature: "elasticsearch",
    })
}

#[cfg(feature = "s3")]
async fn s3_sink(
    bucket: &str,
    prefix: Option<&str>,
    config: &RunnerConfig,
) -> Result<Box<dyn Sink>, RunnerError> {
    use docrelay_core::batch::BatchFileSink;
    use docrelay_sinks::s3::{S3Config, S3Uploader};

    let wrap = |source| RunnerError::Sink { sink: "s3", source };
    let mut builder = S3Config::builder().bucket(bucket);
    if let Some(prefix) = prefix {
        builder = builder.prefix(prefix);
    }
    if let Some(region) = &config.aws_region {
        builder = builder.region(region.clone());
    }
    let uploader = S3Uploader::new(builder.build().map_err(wrap)?)
        .await
        .map_err(wrap)?;
    Ok(Box::new(BatchFileSink::new(
        config.replication.namespace.clone(),
        Arc::new(uploader),
    )))
}

#[cfg(not(feature = "s3"))]
async fn s3_sink(
    _bucket: &str,
    _prefix: Option<&str>,
    _config: &RunnerConfig,
) -> Result<Box<dyn Sink>, RunnerError> {
    Err(RunnerError::SinkUnavailable {
        sink: "s3",
        feature: "s3",
    })
}

#[cfg(feature = "kinesis")]
async fn kinesis_sink(stream: &str, config: &RunnerConfig) -> Result<Box<dyn Sink>, RunnerError> {
    use docrelay_sinks::kinesis::KinesisSink;

    let sink = KinesisSink::new(stream, &aws_settings(config))
        .await
        .map_err(|source| RunnerError::Sink {
            sink: "kinesis",
            source,
        })?;
    Ok(Box::new(sink))
}

#[cfg(not(feature = "kinesis"))]
async fn kinesis_sink(_stream: &str, _config: &RunnerConfig) -> Result<Box<dyn Sink>, RunnerError> {
    Err(RunnerError::SinkUnavailable {
        sink: "kinesis",
        feature: "kinesis",
    })
}

#[cfg(feature = "kafka")]
fn kafka_sink(bootstrap_servers: &str, topic: &str) -> Result<Box<dyn Sink>, RunnerError> {
    use docrelay_sinks::kafka::{KafkaConfig, KafkaSink};

    let wrap = |source| RunnerError::Sink {
        sink: "kafka",
        source,
    };
    let kafka_config = KafkaConfig::builder()
        .bootstrap_servers(bootstrap_servers)
        .topic(topic)
        .build()
        .map_err(wrap)?;
    Ok(Box::new(KafkaSink::new(kafka_config).map_err(wrap)?))
}

#[cfg(not(feature = "kafka"))]
fn kafka_sink(_bootstrap_servers: &str, _topic: &str) -> Result<Box<dyn Sink>, RunnerError> {
    Err(RunnerError::SinkUnavailable {
        sink: "kafka",
        feature: "kafka",
    })
}

#[cfg(feature = "sns")]
async fn sns_sink(topic_arn: &str, config: &RunnerConfig) -> Result<Box<dyn Sink>, RunnerError> {
    use docrelay_sinks::sns::SnsNotificationSink;

    let sink = SnsNotificationSink::new(topic_arn, &aws_settings(config))
        .await
        .map_err(|source| RunnerError::Sink { sink: "sns", source })?;
    Ok(Box::new(sink))
}

#[cfg(not(feature = "sns"))]
async fn sns_sink(_topic_arn: &str, _config: &RunnerConfig) -> Result<Box<dyn Sink>, RunnerError> {
    Err(RunnerError::SinkUnavailable {
        sink: "sns",
        feature: "sns",
    })
}
