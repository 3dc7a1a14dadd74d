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

//! Operator alerting.
//!
//! Alerts are fire-and-forget: a channel that fails to publish logs the
//! failure and returns. Raising an alert never fails the caller.

use std::sync::{Arc, Mutex, PoisonError};
use tracing::error;

/// Channel for human-readable operator alerts.
#[async_trait::async_trait]
pub trait AlertChannel: Send + Sync {
    /// Publishes an alert message.
    async fn alert(&self, message: &str);
}

/// Alert channel that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertChannel;

#[async_trait::async_trait]
impl AlertChannel for LogAlertChannel {
    async fn alert(&self, message: &str) {
        error!(alert = %message, "Replication alarm");
    }
}

/// Alert channel that records messages in memory.
///
/// Clones share the same message list.
#[derive(Debug, Default, Clone)]
pub struct RecordingAlertChannel {
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingAlertChannel {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded messages.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of recorded messages.
    #[must_use]
    pub fn count(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait::async_trait]
impl AlertChannel for RecordingAlertChannel {
    async fn alert(&self, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
    }
}

#[async_trait::async_trait]
impl<T: AlertChannel + ?Sized> AlertChannel for Arc<T> {
    async fn alert(&self, message: &str) {
        (**self).alert(message).await;
    }
}
