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

//! Kafka log sink.
//!
//! Produces one keyed record per payload to a single topic and waits for the
//! broker acknowledgement before returning, so a successful
//! [`deliver`](Sink::deliver) means the record is durable. Works with Amazon
//! MSK and any other Kafka-compatible broker.
//!
//! # Example
//!
//! ```rust,ignore
//! use docrelay_sinks::kafka::{KafkaConfig, KafkaSink};
//!
//! let config = KafkaConfig::builder()
//!     .bootstrap_servers("b-1.msk.internal:9092,b-2.msk.internal:9092")
//!     .topic("orders-cdc")
//!     .build()?;
//!
//! let sink = KafkaSink::new(config)?;
//! ```

use async_trait::async_trait;
use docrelay_core::normalize::ReplicationPayload;
use docrelay_core::sink::{Sink, SinkError, SinkKind, SinkMetadata};
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default time to wait for a delivery acknowledgement.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for [`KafkaSink`].
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap brokers
    pub bootstrap_servers: String,

    /// Target topic
    pub topic: String,

    /// Time to wait for each acknowledgement
    pub delivery_timeout: Duration,

    /// Extra librdkafka properties, applied last
    pub properties: Vec<(String, String)>,
}

impl KafkaConfig {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> KafkaConfigBuilder {
        KafkaConfigBuilder::default()
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("acks", "all")
            .set(
                "message.timeout.ms",
                self.delivery_timeout.as_millis().to_string(),
            );
        for (key, value) in &self.properties {
            config.set(key, value);
        }
        config
    }
}

/// Builder for [`KafkaConfig`].
#[derive(Debug, Default)]
pub struct KafkaConfigBuilder {
    bootstrap_servers: Option<String>,
    topic: Option<String>,
    delivery_timeout: Option<Duration>,
    properties: Vec<(String, String)>,
}

impl KafkaConfigBuilder {
    /// Sets the bootstrap brokers (required).
    #[must_use]
    pub fn bootstrap_servers(mut self, servers: impl Into<String>) -> Self {
        self.bootstrap_servers = Some(servers.into());
        self
    }

    /// Sets the topic (required).
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Sets the acknowledgement timeout (default: 30 seconds).
    #[must_use]
    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = Some(timeout);
        self
    }

    /// Adds a librdkafka property, e.g. `security.protocol`.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the brokers or the topic are missing or empty.
    pub fn build(self) -> Result<KafkaConfig, SinkError> {
        let bootstrap_servers = self.bootstrap_servers.unwrap_or_default();
        if bootstrap_servers.trim().is_empty() {
            return Err(SinkError::configuration(
                "bootstrap servers are required",
                Some("bootstrap_servers".to_string()),
            ));
        }

        let topic = self.topic.unwrap_or_default();
        if topic.is_empty() {
            return Err(SinkError::configuration(
                "topic is required",
                Some("topic".to_string()),
            ));
        }

        Ok(KafkaConfig {
            bootstrap_servers,
            topic,
            delivery_timeout: self.delivery_timeout.unwrap_or(DEFAULT_DELIVERY_TIMEOUT),
            properties: self.properties,
        })
    }
}

/// Log sink producing to Kafka.
pub struct KafkaSink {
    producer: FutureProducer,
    config: KafkaConfig,
}

impl KafkaSink {
    /// Creates the producer.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if librdkafka rejects the settings.
    pub fn new(config: KafkaConfig) -> Result<Self, SinkError> {
        let producer: FutureProducer = config.client_config().create().map_err(|e| {
            SinkError::configuration(
                format!("failed to create Kafka producer: {e}"),
                Some("kafka".to_string()),
            )
        })?;

        info!(
            brokers = %config.bootstrap_servers,
            topic = %config.topic,
            "Kafka sink initialized"
        );
        Ok(Self { producer, config })
    }
}

/// Maps a producer error to a sink error.
fn classify_kafka_error(error: KafkaError) -> SinkError {
    match error.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::Resolve
            | RDKafkaErrorCode::NetworkException,
        ) => SinkError::connection(error),
        Some(
            RDKafkaErrorCode::MessageTimedOut
            | RDKafkaErrorCode::RequestTimedOut
            | RDKafkaErrorCode::QueueFull
            | RDKafkaErrorCode::NotEnoughReplicas
            | RDKafkaErrorCode::LeaderNotAvailable
            | RDKafkaErrorCode::NotLeaderForPartition,
        ) => SinkError::write(error, true),
        Some(RDKafkaErrorCode::MessageSizeTooLarge) => SinkError::write(error, false),
        Some(
            RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::TopicAuthorizationFailed,
        ) => SinkError::configuration(error.to_string(), Some("topic".to_string())),
        _ => SinkError::other(error, false),
    }
}

#[async_trait]
impl Sink for KafkaSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Log
    }

    async fn deliver(&mut self, payload: &ReplicationPayload) -> Result<(), SinkError> {
        let value = payload
            .to_json()
            .map_err(|e| SinkError::serialization(e, "Failed to encode payload"))?;
        let record = FutureRecord::to(&self.config.topic)
            .key(payload.id.as_str())
            .payload(value.as_str());

        self.producer
            .send(record, Timeout::After(self.config.delivery_timeout))
            .await
            .map_err(|(e, _)| classify_kafka_error(e))?;

        debug!(id = %payload.id, topic = %self.config.topic, "Produced record");
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        let producer = self.producer.clone();
        let timeout = self.config.delivery_timeout;

        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| SinkError::other(e, false))?
            .map_err(classify_kafka_error)
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        if let Err(e) = self.flush().await {
            warn!(error = %e, "Kafka producer did not drain before close");
            return Err(e);
        }
        Ok(())
    }

    fn metadata(&self) -> SinkMetadata {
        SinkMetadata::new("kafka", SinkKind::Log)
            .with_property("topic", &self.config.topic)
            .with_property("bootstrap_servers", &self.config.bootstrap_servers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_brokers_and_topic() {
        assert!(KafkaConfig::builder().topic("t").build().is_err());
        assert!(KafkaConfig::builder()
            .bootstrap_servers("localhost:9092")
            .build()
            .is_err());
    }

    #[test]
    fn test_client_config_properties() {
        let config = KafkaConfig::builder()
            .bootstrap_servers("b-1:9092,b-2:9092")
            .topic("orders-cdc")
            .delivery_timeout(Duration::from_secs(5))
            .property("security.protocol", "SSL")
            .build()
            .unwrap();

        let client = config.client_config();
        assert_eq!(client.get("bootstrap.servers"), Some("b-1:9092,b-2:9092"));
        assert_eq!(client.get("acks"), Some("all"));
        assert_eq!(client.get("message.timeout.ms"), Some("5000"));
        assert_eq!(client.get("security.protocol"), Some("SSL"));
    }

    #[test]
    fn test_error_classification() {
        let err = classify_kafka_error(KafkaError::MessageProduction(
            RDKafkaErrorCode::AllBrokersDown,
        ));
        assert!(err.is_connection());

        let err = classify_kafka_error(KafkaError::MessageProduction(
            RDKafkaErrorCode::QueueFull,
        ));
        assert!(err.is_retryable());
        assert!(!err.is_connection());

        let err = classify_kafka_error(KafkaError::MessageProduction(
            RDKafkaErrorCode::MessageSizeTooLarge,
        ));
        assert!(!err.is_retryable());
    }
}
