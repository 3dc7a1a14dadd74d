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

//! Source feed contract.
//!
//! A [`ChangeFeed`] opens a resumable [`FeedCursor`] over the watched
//! collection. The cursor is polled without blocking: an empty poll means the
//! feed is caught up for now.
//!
//! [`ScriptedFeed`] is a deterministic in-process feed that replays a script
//! of events, empty polls and failures. It backs the replication tests.

use crate::event::{ChangeEvent, ConversionError, OperationType};
use async_trait::async_trait;
use bson::Document;
use mongodb::error::{Error as MongoError, ErrorKind as MongoErrorKind};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Server code for a capped collection position that no longer exists.
pub const CAPPED_POSITION_LOST: i32 = 136;

/// Server code for a resume token that fell off the retained history.
pub const CHANGE_STREAM_HISTORY_LOST: i32 = 286;

/// Errors that can occur while reading the source feed.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Network or topology failure. The cached client is no longer trusted.
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        /// Server error code, when one was reported
        code: Option<i32>,
        /// Driver error labels (e.g. "NetworkError")
        labels: Vec<String>,
    },

    /// The server rejected a command.
    #[error("Server error (code {code}): {message}")]
    Server {
        message: String,
        code: i32,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// History needed to resume from the checkpoint has been purged.
    #[error("Change history lost (code {code}): checkpoint is outside the retained window")]
    HistoryLost { code: i32 },

    /// The feed was invalidated (collection dropped or renamed).
    #[error("Feed invalidated: {reason}")]
    Invalidated { reason: String },

    /// A driver event could not be converted.
    #[error("Event conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    /// Invalid feed configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<MongoError> for FeedError {
    fn from(err: MongoError) -> Self {
        Self::from_mongo_error(err)
    }
}

impl FeedError {
    /// Classifies a driver error.
    pub fn from_mongo_error(err: MongoError) -> Self {
        let code = match err.kind.as_ref() {
            MongoErrorKind::Command(cmd_err) => Some(cmd_err.code),
            _ => None,
        };

        if let Some(code @ (CAPPED_POSITION_LOST | CHANGE_STREAM_HISTORY_LOST)) = code {
            return Self::HistoryLost { code };
        }

        let network = matches!(
            err.kind.as_ref(),
            MongoErrorKind::Io(_)
                | MongoErrorKind::ServerSelection { .. }
                | MongoErrorKind::ConnectionPoolCleared { .. }
        ) || err.contains_label("NetworkError");

        match code {
            Some(code) if !network => Self::Server {
                message: err.to_string(),
                code,
                source: Some(Box::new(err)),
            },
            _ => {
                let labels: Vec<String> = err.labels().iter().cloned().collect();
                Self::Connection {
                    message: err.to_string(),
                    source: Some(Box::new(err)),
                    code,
                    labels,
                }
            }
        }
    }

    /// Creates a connection error with a custom message.
    #[must_use]
    pub fn connection_msg(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
            code: None,
            labels: Vec::new(),
        }
    }

    /// Returns true when the history needed to resume is gone.
    #[must_use]
    pub const fn is_history_lost(&self) -> bool {
        matches!(self, Self::HistoryLost { .. })
    }

    /// Returns true when the cached client should be dropped.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Returns the error category for metrics and logging.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Server { .. } => "server",
            Self::HistoryLost { .. } => "history_lost",
            Self::Invalidated { .. } => "invalidated",
            Self::Conversion(_) => "conversion",
            Self::Configuration(_) => "configuration",
        }
    }
}

/// Turns an invalidate event into [`FeedError::Invalidated`].
///
/// # Errors
///
/// Returns [`FeedError::Invalidated`] for invalidate events.
pub fn reject_invalidate(event: ChangeEvent) -> Result<ChangeEvent, FeedError> {
    if event.operation == OperationType::Invalidate {
        return Err(FeedError::Invalidated {
            reason: format!("{} was dropped or renamed", event.namespace),
        });
    }
    Ok(event)
}

/// Opens cursors over the watched collection.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Opens a cursor positioned after `resume_from`, or at the current tail
    /// when `None`.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::HistoryLost`] when `resume_from` is no longer in
    /// the retained history, or any connection error.
    async fn open(&self, resume_from: Option<Document>) -> Result<Box<dyn FeedCursor>, FeedError>;

    /// Drops any cached connection so the next `open` reconnects.
    async fn invalidate(&self) {}
}

/// An open, resumable position in the feed.
#[async_trait]
pub trait FeedCursor: Send {
    /// Returns the next event if one is immediately available.
    ///
    /// # Errors
    ///
    /// Returns a [`FeedError`] when the feed fails or is invalidated.
    async fn next_if_available(&mut self) -> Result<Option<ChangeEvent>, FeedError>;

    /// Returns the token the cursor has advanced to.
    fn current_resume_token(&self) -> Option<Document>;

    /// Releases the server-side cursor.
    async fn close(&mut self) {}
}

#[derive(Debug)]
enum ScriptStep {
    Event(Box<ChangeEvent>),
    Empty,
    Fail(FeedError),
    Spent,
}

#[derive(Debug, Default)]
struct ScriptState {
    steps: Vec<ScriptStep>,
    position: usize,
    open_failures: VecDeque<FeedError>,
    opened_with: Vec<Option<Document>>,
    polls: usize,
    closes: usize,
    invalidations: usize,
}

/// Deterministic feed that replays a script.
///
/// Events form a log that cursors read in order. Opening after the resume
/// token of a scripted event continues right after that event, so events
/// that were read but never committed are delivered again. A token that does
/// not appear in the script is taken to precede it, and opening without a
/// token continues from the current position. Empty polls and failures fire
/// once. Once the script is exhausted every poll is empty.
///
/// ```rust
/// use docrelay_core::feed::{ChangeFeed, FeedCursor, ScriptedFeed};
///
/// # async fn example() -> Result<(), docrelay_core::feed::FeedError> {
/// let feed = ScriptedFeed::new().empty();
/// let mut cursor = feed.open(None).await?;
/// assert!(cursor.next_if_available().await?.is_none());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScriptedFeed {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedFeed {
    /// Creates an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an event.
    #[must_use]
    pub fn event(self, event: ChangeEvent) -> Self {
        self.lock().steps.push(ScriptStep::Event(Box::new(event)));
        self
    }

    /// Appends an empty poll.
    #[must_use]
    pub fn empty(self) -> Self {
        self.lock().steps.push(ScriptStep::Empty);
        self
    }

    /// Appends a poll that fails with `error`.
    #[must_use]
    pub fn fail(self, error: FeedError) -> Self {
        self.lock().steps.push(ScriptStep::Fail(error));
        self
    }

    /// Makes the next `open` fail with `error`.
    #[must_use]
    pub fn fail_open(self, error: FeedError) -> Self {
        self.lock().open_failures.push_back(error);
        self
    }

    /// Returns the resume token passed to each `open`.
    #[must_use]
    pub fn opened_with(&self) -> Vec<Option<Document>> {
        self.lock().opened_with.clone()
    }

    /// Number of polls across all cursors.
    #[must_use]
    pub fn polls(&self) -> usize {
        self.lock().polls
    }

    /// Number of closed cursors.
    #[must_use]
    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    /// Number of `invalidate` calls.
    #[must_use]
    pub fn invalidations(&self) -> usize {
        self.lock().invalidations
    }

    /// Number of steps ahead of the current position.
    #[must_use]
    pub fn remaining(&self) -> usize {
        let state = self.lock();
        state.steps[state.position..]
            .iter()
            .filter(|step| !matches!(step, ScriptStep::Spent))
            .count()
    }
}

#[async_trait]
impl ChangeFeed for ScriptedFeed {
    async fn open(&self, resume_from: Option<Document>) -> Result<Box<dyn FeedCursor>, FeedError> {
        let mut state = self.lock();
        state.opened_with.push(resume_from.clone());
        if let Some(error) = state.open_failures.pop_front() {
            return Err(error);
        }
        if let Some(token) = &resume_from {
            state.position = state
                .steps
                .iter()
                .rposition(|step| {
                    matches!(step, ScriptStep::Event(event) if &event.resume_token == token)
                })
                .map_or(0, |index| index + 1);
        }
        drop(state);

        Ok(Box::new(ScriptedCursor {
            state: Arc::clone(&self.state),
            token: resume_from,
        }))
    }

    async fn invalidate(&self) {
        self.lock().invalidations += 1;
    }
}

struct ScriptedCursor {
    state: Arc<Mutex<ScriptState>>,
    token: Option<Document>,
}

#[async_trait]
impl FeedCursor for ScriptedCursor {
    async fn next_if_available(&mut self) -> Result<Option<ChangeEvent>, FeedError> {
        let step = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.polls += 1;
            loop {
                let position = state.position;
                let Some(slot) = state.steps.get_mut(position) else {
                    break None;
                };
                let step = match slot {
                    ScriptStep::Spent => None,
                    ScriptStep::Event(event) => Some(ScriptStep::Event(event.clone())),
                    ScriptStep::Empty | ScriptStep::Fail(_) => {
                        Some(std::mem::replace(slot, ScriptStep::Spent))
                    }
                };
                state.position += 1;
                if step.is_some() {
                    break step;
                }
            }
        };

        match step {
            Some(ScriptStep::Event(event)) => {
                let event = reject_invalidate(*event)?;
                self.token = Some(event.resume_token.clone());
                Ok(Some(event))
            }
            Some(ScriptStep::Fail(error)) => Err(error),
            Some(ScriptStep::Empty | ScriptStep::Spent) | None => Ok(None),
        }
    }

    fn current_resume_token(&self) -> Option<Document> {
        self.token.clone()
    }

    async fn close(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closes += 1;
    }
}
