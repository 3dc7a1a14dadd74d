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

//! Process-wide client cache.
//!
//! Connections to the source database, the checkpoint store and the sinks
//! are expensive to establish and are reused across invocations. A
//! [`ClientCache`] connects lazily, checks liveness before handing out a
//! cached client, and forgets the client after a connection-level failure.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Errors raised while establishing a client.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The client could not connect.
    #[error("Failed to connect to {target}: {message}")]
    Connect {
        /// What was being connected to
        target: String,
        /// Human-readable error message
        message: String,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The connection settings are invalid.
    #[error("Invalid connection settings: {0}")]
    Configuration(String),
}

impl ConnectionError {
    /// Creates a connect error from any error type.
    #[must_use]
    pub fn connect(
        target: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connect {
            target: target.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }
}

/// Creates and health-checks clients of one kind.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Client handle. Clones share the underlying connection pool.
    type Client: Clone + Send + Sync;

    /// Establishes a new client.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectionError`] when the target is unreachable or the
    /// settings are invalid.
    async fn connect(&self) -> Result<Self::Client, ConnectionError>;

    /// Returns true when `client` still answers.
    async fn is_alive(&self, client: &Self::Client) -> bool;

    /// Short description of the target for logs.
    fn target(&self) -> String;
}

/// Lazily connected, liveness-checked client slot.
pub struct ClientCache<C: Connector> {
    connector: C,
    slot: Mutex<Option<C::Client>>,
}

impl<C: Connector> ClientCache<C> {
    /// Creates an empty cache. Nothing connects until [`get`](Self::get).
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            slot: Mutex::new(None),
        }
    }

    /// Returns a live client, reconnecting when the cached one is gone or dead.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectionError`] when a new client cannot be established.
    pub async fn get(&self) -> Result<C::Client, ConnectionError> {
        let mut slot = self.slot.lock().await;

        if let Some(client) = slot.as_ref() {
            if self.connector.is_alive(client).await {
                debug!(endpoint = %self.connector.target(), "Reusing cached client");
                return Ok(client.clone());
            }
            warn!(endpoint = %self.connector.target(), "Cached client failed liveness check, reconnecting");
            *slot = None;
        }

        let client = self.connector.connect().await?;
        info!(endpoint = %self.connector.target(), "Connected");
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Forgets the cached client.
    pub async fn invalidate(&self) {
        if self.slot.lock().await.take().is_some() {
            info!(endpoint = %self.connector.target(), "Dropped cached client");
        }
    }

    /// Returns true when a client is cached.
    pub async fn is_connected(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Returns the connector.
    pub fn connector(&self) -> &C {
        &self.connector
    }
}
