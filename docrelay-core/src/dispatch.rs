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

//! Fan-out of payloads to the configured sinks.
//!
//! The [`Dispatcher`] delivers every payload to every sink, in the order the
//! sinks were registered. Each sink carries a [`DeliveryPolicy`]:
//!
//! - [`DeliveryPolicy::Required`]: a failure stops the fan-out and fails the
//!   run, so the checkpoint never moves past an event a required sink missed.
//! - [`DeliveryPolicy::BestEffort`]: a failure raises an alert and the fan-out
//!   continues. Later sinks still receive the payload.

use crate::alert::AlertChannel;
use crate::metrics::{self, ErrorCategory};
use crate::normalize::ReplicationPayload;
use crate::sink::{Sink, SinkError, SinkKind};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// How a sink failure affects the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Failure is fatal to the run
    Required,
    /// Failure is alerted and skipped
    BestEffort,
}

impl DeliveryPolicy {
    /// Default policy for a sink kind.
    ///
    /// Notification sinks are best-effort, everything else is required.
    #[must_use]
    pub const fn default_for(kind: SinkKind) -> Self {
        match kind {
            SinkKind::Notification => Self::BestEffort,
            SinkKind::Index | SinkKind::BatchFile | SinkKind::Stream | SinkKind::Log => {
                Self::Required
            }
        }
    }
}

/// A required sink failed.
#[derive(Debug, thiserror::Error)]
#[error("{kind} sink '{name}' failed: {source}")]
pub struct DispatchError {
    /// Kind of the failing sink
    pub kind: SinkKind,
    /// Name of the failing sink
    pub name: String,
    /// Underlying sink error
    #[source]
    pub source: SinkError,
}

/// Outcome of one successful fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Sinks that accepted the payload
    pub delivered: usize,
    /// Best-effort sinks that failed
    pub skipped: Vec<String>,
}

struct SinkSlot {
    name: String,
    sink: Box<dyn Sink>,
    policy: DeliveryPolicy,
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    alerts: Arc<dyn AlertChannel>,
    slots: Vec<SinkSlot>,
}

impl DispatcherBuilder {
    /// Registers a sink with the default policy for its kind.
    #[must_use]
    pub fn sink(self, sink: Box<dyn Sink>) -> Self {
        let policy = DeliveryPolicy::default_for(sink.kind());
        self.sink_with_policy(sink, policy)
    }

    /// Registers a sink with an explicit policy.
    ///
    /// Batch sinks are always [`DeliveryPolicy::Required`]: the checkpoint
    /// only advances past a batch once its upload succeeded.
    #[must_use]
    pub fn sink_with_policy(mut self, sink: Box<dyn Sink>, policy: DeliveryPolicy) -> Self {
        let name = sink.metadata().name;
        let policy = if sink.kind() == SinkKind::BatchFile && policy == DeliveryPolicy::BestEffort {
            warn!(sink = %name, "Batch sinks cannot be best-effort, registering as required");
            DeliveryPolicy::Required
        } else {
            policy
        };
        self.slots.push(SinkSlot { name, sink, policy });
        self
    }

    /// Finishes the dispatcher.
    #[must_use]
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            alerts: self.alerts,
            slots: self.slots,
        }
    }
}

/// Delivers payloads to a fixed set of sinks.
pub struct Dispatcher {
    alerts: Arc<dyn AlertChannel>,
    slots: Vec<SinkSlot>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field(
                "sinks",
                &self.slots.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Starts a builder. Best-effort failures are reported to `alerts`.
    #[must_use]
    pub fn builder(alerts: Arc<dyn AlertChannel>) -> DispatcherBuilder {
        DispatcherBuilder {
            alerts,
            slots: Vec::new(),
        }
    }

    /// Number of registered sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true when no sink is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns true when any registered sink publishes batches.
    #[must_use]
    pub fn has_batch_sink(&self) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.sink.kind() == SinkKind::BatchFile)
    }

    /// Delivers one payload to every sink.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] for the first required sink that fails.
    /// Sinks after it do not see the payload.
    pub async fn dispatch(
        &mut self,
        payload: &ReplicationPayload,
    ) -> Result<DispatchReport, DispatchError> {
        let mut report = DispatchReport::default();

        for slot in &mut self.slots {
            let started = Instant::now();
            let result = slot.sink.deliver(payload).await;
            metrics::record_sink_delivery_duration(started.elapsed(), &slot.name);

            match result {
                Ok(()) => {
                    metrics::increment_sink_deliveries(&slot.name);
                    report.delivered += 1;
                }
                Err(e) => {
                    metrics::increment_sink_failures(&slot.name, ErrorCategory::from(&e));
                    match slot.policy {
                        DeliveryPolicy::Required => {
                            return Err(DispatchError {
                                kind: slot.sink.kind(),
                                name: slot.name.clone(),
                                source: e,
                            });
                        }
                        DeliveryPolicy::BestEffort => {
                            warn!(
                                sink = %slot.name,
                                id = %payload.id,
                                error = %e,
                                "Best-effort sink failed, continuing"
                            );
                            self.alerts
                                .alert(&format!(
                                    "Error delivering event {} to {}: {e}",
                                    payload.id, slot.name
                                ))
                                .await;
                            report.skipped.push(slot.name.clone());
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    /// Flushes every sink in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first required sink's flush failure. Best-effort flush
    /// failures are alerted and skipped.
    pub async fn flush(&mut self) -> Result<(), DispatchError> {
        for slot in &mut self.slots {
            if let Err(e) = slot.sink.flush().await {
                metrics::increment_sink_failures(&slot.name, ErrorCategory::from(&e));
                match slot.policy {
                    DeliveryPolicy::Required => {
                        return Err(DispatchError {
                            kind: slot.sink.kind(),
                            name: slot.name.clone(),
                            source: e,
                        });
                    }
                    DeliveryPolicy::BestEffort => {
                        warn!(sink = %slot.name, error = %e, "Best-effort flush failed");
                        self.alerts
                            .alert(&format!("Error flushing {}: {e}", slot.name))
                            .await;
                    }
                }
            }
        }
        Ok(())
    }

    /// Discards buffered state in every sink.
    pub async fn abort(&mut self) {
        for slot in &mut self.slots {
            slot.sink.abort().await;
        }
    }

    /// Closes every sink. Failures are logged.
    pub async fn close(&mut self) {
        for slot in &mut self.slots {
            if let Err(e) = slot.sink.close().await {
                warn!(sink = %slot.name, error = %e, "Failed to close sink");
            } else {
                debug!(sink = %slot.name, "Sink closed");
            }
        }
    }
}
