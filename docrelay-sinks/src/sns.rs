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

//! SNS notification sink and alert channel.
//!
//! Both publish to an SNS topic with the same client type:
//!
//! - [`SnsNotificationSink`] sends each payload's JSON as the message body.
//!   Notification sinks are best-effort by default, so a failed publish is
//!   alerted and the run continues.
//! - [`SnsAlertChannel`] sends operator alerts with a fixed subject. A failed
//!   alert is logged and dropped; it is never re-alerted.

use crate::aws::{service_error, AwsSettings};
use async_trait::async_trait;
use aws_sdk_sns::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_sns::operation::publish::PublishError;
use aws_sdk_sns::Client as SnsClient;
use docrelay_core::alert::AlertChannel;
use docrelay_core::normalize::ReplicationPayload;
use docrelay_core::sink::{Sink, SinkError, SinkKind, SinkMetadata};
use tracing::{debug, error, info};

/// Subject of every alert message.
pub const ALERT_SUBJECT: &str = "Replication Alarm";

/// Largest message SNS accepts, in bytes.
pub const MAX_MESSAGE_BYTES: usize = 256 * 1024;

/// Cuts `message` to at most [`MAX_MESSAGE_BYTES`] on a character boundary.
#[must_use]
pub fn truncate_message(message: &str) -> &str {
    if message.len() <= MAX_MESSAGE_BYTES {
        return message;
    }
    let mut end = MAX_MESSAGE_BYTES;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

fn classify_error(error: SdkError<PublishError>) -> SinkError {
    match error {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => SinkError::connection(error),
        SdkError::ServiceError(ref service_err) => {
            let code = service_err.err().code().map(str::to_owned);
            service_error(code.as_deref(), error)
        }
        SdkError::ConstructionFailure(_) => {
            SinkError::configuration(error.to_string(), Some("sns_client".to_string()))
        }
        _ => SinkError::other(error, false),
    }
}

fn require_topic(topic_arn: String) -> Result<String, SinkError> {
    if topic_arn.is_empty() {
        return Err(SinkError::configuration(
            "topic ARN is required",
            Some("topic_arn".to_string()),
        ));
    }
    Ok(topic_arn)
}

/// Notification sink publishing payloads to an SNS topic.
pub struct SnsNotificationSink {
    client: SnsClient,
    topic_arn: String,
}

impl SnsNotificationSink {
    /// Loads AWS configuration and creates the client.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the topic ARN is empty.
    pub async fn new(
        topic_arn: impl Into<String>,
        settings: &AwsSettings,
    ) -> Result<Self, SinkError> {
        let sdk_config = settings.load().await;
        Self::with_client(SnsClient::new(&sdk_config), topic_arn)
    }

    /// Creates a sink around an existing client.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the topic ARN is empty.
    pub fn with_client(client: SnsClient, topic_arn: impl Into<String>) -> Result<Self, SinkError> {
        let topic_arn = require_topic(topic_arn.into())?;
        info!(topic = %topic_arn, "SNS notification sink initialized");
        Ok(Self { client, topic_arn })
    }
}

#[async_trait]
impl Sink for SnsNotificationSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Notification
    }

    async fn deliver(&mut self, payload: &ReplicationPayload) -> Result<(), SinkError> {
        let message = payload
            .to_json()
            .map_err(|e| SinkError::serialization(e, "Failed to encode payload"))?;
        if message.len() > MAX_MESSAGE_BYTES {
            return Err(SinkError::write_msg(
                format!(
                    "payload for {} is {} bytes, above the SNS limit",
                    payload.id,
                    message.len()
                ),
                false,
            ));
        }

        let output = self
            .client
            .publish()
            .topic_arn(&self.topic_arn)
            .message(message)
            .send()
            .await
            .map_err(classify_error)?;

        debug!(id = %payload.id, message_id = ?output.message_id(), "Published notification");
        Ok(())
    }

    fn metadata(&self) -> SinkMetadata {
        SinkMetadata::new("sns", SinkKind::Notification).with_property("topic_arn", &self.topic_arn)
    }
}

/// Alert channel publishing to an SNS topic.
#[derive(Clone)]
pub struct SnsAlertChannel {
    client: SnsClient,
    topic_arn: String,
}

impl SnsAlertChannel {
    /// Loads AWS configuration and creates the client.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the topic ARN is empty.
    pub async fn new(
        topic_arn: impl Into<String>,
        settings: &AwsSettings,
    ) -> Result<Self, SinkError> {
        let sdk_config = settings.load().await;
        Self::with_client(SnsClient::new(&sdk_config), topic_arn)
    }

    /// Creates a channel around an existing client.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the topic ARN is empty.
    pub fn with_client(client: SnsClient, topic_arn: impl Into<String>) -> Result<Self, SinkError> {
        let topic_arn = require_topic(topic_arn.into())?;
        Ok(Self { client, topic_arn })
    }

    /// Returns the topic ARN.
    pub fn topic_arn(&self) -> &str {
        &self.topic_arn
    }
}

#[async_trait]
impl AlertChannel for SnsAlertChannel {
    async fn alert(&self, message: &str) {
        let result = self
            .client
            .publish()
            .topic_arn(&self.topic_arn)
            .subject(ALERT_SUBJECT)
            .message(truncate_message(message))
            .send()
            .await;

        match result {
            Ok(_) => debug!(topic = %self.topic_arn, "Published alert"),
            Err(e) => error!(
                topic = %self.topic_arn,
                alert = %message,
                error = %classify_error(e),
                "Failed to publish alert"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SnsClient {
        let config = aws_sdk_sns::Config::builder()
            .behavior_version(aws_sdk_sns::config::BehaviorVersion::latest())
            .region(aws_sdk_sns::config::Region::new("us-east-1"))
            .build();
        SnsClient::from_conf(config)
    }

    #[test]
    fn test_truncate_message() {
        assert_eq!(truncate_message("short"), "short");

        let long = "ü".repeat(MAX_MESSAGE_BYTES);
        let cut = truncate_message(&long);
        assert!(cut.len() <= MAX_MESSAGE_BYTES);
        assert!(long.starts_with(cut));
    }

    #[test]
    fn test_topic_required() {
        assert!(SnsNotificationSink::with_client(client(), "").is_err());
        assert!(SnsAlertChannel::with_client(client(), "").is_err());

        let arn = "arn:aws:sns:us-east-1:123456789012:cdc-alerts";
        let channel = SnsAlertChannel::with_client(client(), arn).unwrap();
        assert_eq!(channel.topic_arn(), arn);
    }

    #[test]
    fn test_notification_sink_kind() {
        let sink = SnsNotificationSink::with_client(
            client(),
            "arn:aws:sns:us-east-1:123456789012:cdc-events",
        )
        .unwrap();
        assert_eq!(sink.kind(), SinkKind::Notification);
        assert_eq!(sink.metadata().name, "sns");
    }
}
