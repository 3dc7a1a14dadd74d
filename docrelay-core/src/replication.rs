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

//! Replication loop.
//!
//! One [`Replicator::run`] is one invocation: read the checkpoint, open the
//! feed after it, pull up to `max_iterations` events, fan each one out, and
//! commit the feed position once everything it covers is durable.
//!
//! # Checkpointing
//!
//! Without a batch sink the loop commits every `sync_interval` processed
//! events ([`CheckpointStrategy::Interval`]). With a batch sink it commits
//! only after the batch has been uploaded ([`CheckpointStrategy::CommitAtFlush`]),
//! so a crash before the upload replays the whole batch from the old position.
//!
//! # Failure handling
//!
//! - A checkpoint store failure, a required sink failure or any unclassified
//!   feed error is fatal: alert, discard the batch, leave the checkpoint alone
//!   and return the error.
//! - A checkpoint outside the retained history resets the stored position so
//!   the next run starts from the current tail. The run reports no events.
//!
//! # Example
//!
//! ```rust
//! use docrelay_core::alert::RecordingAlertChannel;
//! use docrelay_core::checkpoint::{CheckpointError, CheckpointKey, CheckpointStore};
//! use docrelay_core::dispatch::Dispatcher;
//! use docrelay_core::feed::ScriptedFeed;
//! use docrelay_core::replication::{ReplicationConfig, Replicator, RunStatus};
//! use docrelay_core::sink::{MockSink, SinkKind};
//! use bson::Document;
//! use std::sync::Arc;
//!
//! struct Fixed(Option<Document>);
//!
//! #[async_trait::async_trait]
//! impl CheckpointStore for Fixed {
//!     async fn get_last_processed(&self, _: &CheckpointKey) -> Result<Option<Document>, CheckpointError> {
//!         Ok(self.0.clone())
//!     }
//!     async fn set_last_processed(&self, _: &CheckpointKey, _: Option<&Document>) -> Result<(), CheckpointError> {
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let alerts = Arc::new(RecordingAlertChannel::new());
//! let dispatcher = Dispatcher::builder(alerts.clone())
//!     .sink(Box::new(MockSink::new(SinkKind::Index)))
//!     .build();
//! let config = ReplicationConfig::builder()
//!     .database("shop")
//!     .collection("orders")
//!     .build()?;
//!
//! let mut replicator = Replicator::new(
//!     config,
//!     ScriptedFeed::new(),
//!     Fixed(Some(bson::doc! { "_data": "00" })),
//!     dispatcher,
//!     alerts,
//! );
//! let report = replicator.run().await?;
//! assert_eq!(report.status, RunStatus::NoEvents);
//! # Ok(())
//! # }
//! ```

use crate::alert::AlertChannel;
use crate::checkpoint::{CheckpointError, CheckpointKey, CheckpointStore};
use crate::dispatch::{DispatchError, Dispatcher};
use crate::event::{ChangeEvent, Namespace};
use crate::feed::{ChangeFeed, FeedCursor, FeedError};
use crate::metrics::{self, RunStatusGauge};
use crate::normalize::{normalize, NormalizeError};
use bson::Document;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Default number of polls per run.
pub const DEFAULT_MAX_ITERATIONS: usize = 1000;

/// Default number of processed events between interval commits.
pub const DEFAULT_SYNC_INTERVAL: usize = 100;

/// Default wait between empty polls before the first checkpoint exists.
pub const DEFAULT_FIRST_RUN_BACKOFF: Duration = Duration::from_secs(1);

/// Configuration for one replicated collection.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Watched database and collection
    pub namespace: Namespace,

    /// Upper bound on polls per run
    pub max_iterations: usize,

    /// Processed events between interval commits
    pub sync_interval: usize,

    /// Wait after an empty poll while no checkpoint exists
    pub first_run_backoff: Duration,
}

impl ReplicationConfig {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> ReplicationConfigBuilder {
        ReplicationConfigBuilder::default()
    }
}

/// Builder for [`ReplicationConfig`].
#[derive(Debug, Default)]
pub struct ReplicationConfigBuilder {
    database: Option<String>,
    collection: Option<String>,
    max_iterations: Option<usize>,
    sync_interval: Option<usize>,
    first_run_backoff: Option<Duration>,
}

impl ReplicationConfigBuilder {
    /// Sets the watched database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Sets the watched collection.
    #[must_use]
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Sets database and collection at once.
    #[must_use]
    pub fn namespace(self, namespace: Namespace) -> Self {
        self.database(namespace.database).collection(namespace.collection)
    }

    /// Sets the maximum number of polls per run.
    #[must_use]
    pub fn max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = Some(max);
        self
    }

    /// Sets the number of processed events between interval commits.
    #[must_use]
    pub fn sync_interval(mut self, interval: usize) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Sets the first-run back-off.
    #[must_use]
    pub fn first_run_backoff(mut self, backoff: Duration) -> Self {
        self.first_run_backoff = Some(backoff);
        self
    }

    /// Builds the `ReplicationConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace is missing or a bound is zero.
    pub fn build(self) -> Result<ReplicationConfig, String> {
        let database = self.database.ok_or("database is required")?;
        let collection = self.collection.ok_or("collection is required")?;
        if database.is_empty() || collection.is_empty() {
            return Err("database and collection must not be empty".to_string());
        }

        let max_iterations = self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);
        if max_iterations == 0 {
            return Err("max_iterations must be at least 1".to_string());
        }

        let sync_interval = self.sync_interval.unwrap_or(DEFAULT_SYNC_INTERVAL);
        if sync_interval == 0 {
            return Err("sync_interval must be at least 1".to_string());
        }

        Ok(ReplicationConfig {
            namespace: Namespace::new(database, collection),
            max_iterations,
            sync_interval,
            first_run_backoff: self
                .first_run_backoff
                .unwrap_or(DEFAULT_FIRST_RUN_BACKOFF),
        })
    }
}

/// When the loop writes the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointStrategy {
    /// Commit every N processed events, and at the end of the run
    Interval(usize),
    /// Commit only after the end-of-run flush succeeded
    CommitAtFlush,
}

impl CheckpointStrategy {
    /// Picks the strategy for a sink set.
    #[must_use]
    pub const fn select(has_batch_sink: bool, sync_interval: usize) -> Self {
        if has_batch_sink {
            Self::CommitAtFlush
        } else {
            Self::Interval(sync_interval)
        }
    }
}

/// Coarse result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Events were processed and committed
    Success,
    /// Nothing was committed
    NoEvents,
    /// The run failed
    Failure,
}

impl RunStatus {
    /// Returns the wire name reported to the caller.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::NoEvents => "NO_EVENTS",
            Self::Failure => "FAILURE",
        }
    }
}

impl From<RunStatus> for RunStatusGauge {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Success => Self::Success,
            RunStatus::NoEvents => Self::NoEvents,
            RunStatus::Failure => Self::Failure,
        }
    }
}

/// Terminal state of a run that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The final position was committed
    Committed,
    /// No events, nothing committed
    NoOp,
    /// The stored position was reset to the tail
    HistoryLost,
}

/// Result of a run that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Coarse status
    pub status: RunStatus,
    /// Events consumed from the feed
    pub events_processed: usize,
    /// Events fanned out to the sinks
    pub events_replicated: usize,
    /// Terminal state
    pub outcome: LoopOutcome,
}

/// Errors that end a run.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    /// The checkpoint store failed
    #[error("Checkpoint store failed: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// The feed failed
    #[error("Change feed failed: {0}")]
    Feed(#[from] FeedError),

    /// An event could not be normalized
    #[error("Normalization failed: {0}")]
    Normalize(#[from] NormalizeError),

    /// A required sink rejected an event
    #[error("Delivery failed: {0}")]
    RequiredSink(#[from] DispatchError),

    /// The end-of-run flush failed
    #[error("Flush failed: {0}")]
    Flush(#[source] DispatchError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

#[derive(Debug, Default)]
struct Progress {
    processed: usize,
    replicated: usize,
    skipped: usize,
}

/// Runs the replication loop for one collection.
pub struct Replicator<F: ChangeFeed, S: CheckpointStore> {
    config: ReplicationConfig,
    strategy: CheckpointStrategy,
    feed: F,
    checkpoints: S,
    dispatcher: Dispatcher,
    alerts: Arc<dyn AlertChannel>,
}

impl<F: ChangeFeed, S: CheckpointStore> Replicator<F, S> {
    /// Wires a replicator. The checkpoint strategy follows from the sinks.
    pub fn new(
        config: ReplicationConfig,
        feed: F,
        checkpoints: S,
        dispatcher: Dispatcher,
        alerts: Arc<dyn AlertChannel>,
    ) -> Self {
        let strategy = CheckpointStrategy::select(dispatcher.has_batch_sink(), config.sync_interval);
        info!(
            namespace = %config.namespace,
            sinks = dispatcher.len(),
            ?strategy,
            "Replicator configured"
        );

        Self {
            config,
            strategy,
            feed,
            checkpoints,
            dispatcher,
            alerts,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Returns the checkpoint strategy in use.
    pub fn strategy(&self) -> CheckpointStrategy {
        self.strategy
    }

    /// Runs one invocation.
    ///
    /// # Errors
    ///
    /// Returns a [`ReplicationError`] for every fatal path. An alert has been
    /// raised and the checkpoint is unchanged since the last commit.
    #[instrument(skip(self), fields(namespace = %self.config.namespace))]
    pub async fn run(&mut self) -> Result<RunReport, ReplicationError> {
        let started = Instant::now();
        let result = self.run_once().await;

        metrics::record_run_duration(started.elapsed(), &self.config.namespace.collection);
        let status = result.as_ref().map_or(RunStatus::Failure, |r| r.status);
        metrics::set_last_run_status(status.into());

        result
    }

    async fn run_once(&mut self) -> Result<RunReport, ReplicationError> {
        let key = CheckpointKey::from(&self.config.namespace);

        let resume_from = match self.checkpoints.get_last_processed(&key).await {
            Ok(token) => token,
            Err(e) => return Err(self.fatal(e.into()).await),
        };
        if resume_from.is_some() {
            debug!("Resuming from stored checkpoint");
        } else {
            info!("No checkpoint yet, starting at the current tail");
        }

        let mut cursor = match self.feed.open(resume_from.clone()).await {
            Ok(cursor) => cursor,
            Err(e) if e.is_history_lost() => return self.recover_history_lost(&key, e, 0).await,
            Err(e) => return Err(self.feed_failure(e).await),
        };

        let mut progress = Progress::default();
        let streamed = self
            .stream(cursor.as_mut(), &key, resume_from.is_none(), &mut progress)
            .await;
        let final_token = cursor.current_resume_token();
        cursor.close().await;

        match streamed {
            Ok(()) => {}
            Err(ReplicationError::Feed(e)) if e.is_history_lost() => {
                return self.recover_history_lost(&key, e, progress.processed).await;
            }
            Err(ReplicationError::Feed(e)) => return Err(self.feed_failure(e).await),
            Err(e) => return Err(self.fatal(e).await),
        }

        if progress.processed == 0 {
            self.dispatcher.abort().await;
            info!("No events to replicate");
            return Ok(RunReport {
                status: RunStatus::NoEvents,
                events_processed: 0,
                events_replicated: 0,
                outcome: LoopOutcome::NoOp,
            });
        }

        if let Err(e) = self.dispatcher.flush().await {
            return Err(self.fatal(ReplicationError::Flush(e)).await);
        }

        match final_token {
            Some(token) => {
                if let Err(e) = self.commit(&key, Some(&token)).await {
                    return Err(self.fatal(e).await);
                }
            }
            None => warn!("Feed reported no position, checkpoint unchanged"),
        }

        info!(
            events_processed = progress.processed,
            events_replicated = progress.replicated,
            events_skipped = progress.skipped,
            "Run committed"
        );

        Ok(RunReport {
            status: RunStatus::Success,
            events_processed: progress.processed,
            events_replicated: progress.replicated,
            outcome: LoopOutcome::Committed,
        })
    }

    async fn stream(
        &mut self,
        cursor: &mut dyn FeedCursor,
        key: &CheckpointKey,
        first_run: bool,
        progress: &mut Progress,
    ) -> Result<(), ReplicationError> {
        for _ in 0..self.config.max_iterations {
            let Some(event) = cursor.next_if_available().await? else {
                if first_run && progress.processed == 0 {
                    debug!(
                        backoff_ms = self.config.first_run_backoff.as_millis() as u64,
                        "Waiting for the first event"
                    );
                    tokio::time::sleep(self.config.first_run_backoff).await;
                    continue;
                }
                debug!(events_processed = progress.processed, "Feed drained");
                return Ok(());
            };

            self.process(&event, progress).await?;
            progress.processed += 1;

            if let CheckpointStrategy::Interval(every) = self.strategy {
                if progress.processed % every == 0 {
                    if let Some(token) = cursor.current_resume_token() {
                        self.commit(key, Some(&token)).await?;
                    }
                }
            }
        }

        debug!(
            max_iterations = self.config.max_iterations,
            events_processed = progress.processed,
            "Iteration budget exhausted"
        );
        Ok(())
    }

    async fn process(
        &mut self,
        event: &ChangeEvent,
        progress: &mut Progress,
    ) -> Result<(), ReplicationError> {
        let collection = &self.config.namespace.collection;

        if !event.operation.is_replicated() {
            debug!(operation = %event.operation, "Skipping non-replicated event");
            metrics::increment_events_skipped(collection, event.operation.as_str());
            progress.skipped += 1;
            return Ok(());
        }

        let payload = match normalize(event) {
            Ok(payload) => payload,
            Err(e) if e.is_skippable() => {
                warn!(error = %e, "Skipping event");
                metrics::increment_events_skipped(collection, event.operation.as_str());
                progress.skipped += 1;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let report = self.dispatcher.dispatch(&payload).await?;
        metrics::increment_events_processed(collection, payload.operation.as_str());
        progress.replicated += 1;

        debug!(
            id = %payload.id,
            operation = %payload.operation,
            delivered = report.delivered,
            skipped = report.skipped.len(),
            "Replicated event"
        );
        Ok(())
    }

    async fn commit(
        &self,
        key: &CheckpointKey,
        token: Option<&Document>,
    ) -> Result<(), ReplicationError> {
        self.checkpoints.set_last_processed(key, token).await?;
        metrics::increment_checkpoint_commits(&key.collection);
        debug!(cleared = token.is_none(), "Checkpoint committed");
        Ok(())
    }

    async fn recover_history_lost(
        &mut self,
        key: &CheckpointKey,
        err: FeedError,
        processed: usize,
    ) -> Result<RunReport, ReplicationError> {
        warn!(error = %err, "Checkpoint outside retained history, resetting to tail");
        metrics::increment_history_lost(&key.collection);
        self.dispatcher.abort().await;
        self.alerts
            .alert(&format!(
                "Replication of {} lost its position: {err}. Resuming from the current tail.",
                self.config.namespace
            ))
            .await;

        if let Err(e) = self.commit(key, None).await {
            return Err(self.fatal(e).await);
        }

        Ok(RunReport {
            status: RunStatus::NoEvents,
            events_processed: processed,
            events_replicated: 0,
            outcome: LoopOutcome::HistoryLost,
        })
    }

    async fn feed_failure(&mut self, err: FeedError) -> ReplicationError {
        if err.is_connection() {
            self.feed.invalidate().await;
        }
        self.fatal(err.into()).await
    }

    async fn fatal(&mut self, err: ReplicationError) -> ReplicationError {
        error!(error = %err, "Replication failed");
        self.dispatcher.abort().await;
        self.alerts
            .alert(&format!(
                "Replication of {} failed: {err}",
                self.config.namespace
            ))
            .await;
        err
    }

    /// Closes the sinks and the checkpoint store and drops cached feed clients.
    pub async fn shutdown(&mut self) {
        self.dispatcher.close().await;
        if let Err(e) = self.checkpoints.close().await {
            warn!(error = %e, "Failed to close checkpoint store");
        }
        self.feed.invalidate().await;
        info!("Replicator shut down");
    }
}
