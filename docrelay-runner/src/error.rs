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

//! Errors raised while setting up or running an invocation.

use docrelay_core::checkpoint::CheckpointError;
use docrelay_core::replication::ReplicationError;
use docrelay_core::sink::SinkError;

/// Errors raised by the runner.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A required environment variable is unset or empty
    #[error("Missing environment variable {0}")]
    MissingVariable(&'static str),

    /// An environment variable could not be parsed
    #[error("Invalid value '{value}' for {name}: {reason}")]
    InvalidValue {
        /// Variable name
        name: &'static str,
        /// Raw value
        value: String,
        /// Parse failure
        reason: String,
    },

    /// The variables describe an unusable setup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A sink is configured but its feature is disabled
    #[error("{sink} sink is configured but this build lacks the '{feature}' feature")]
    SinkUnavailable {
        /// Sink name
        sink: &'static str,
        /// Cargo feature that enables it
        feature: &'static str,
    },

    /// A sink client could not be built
    #[error("Failed to build {sink} sink: {source}")]
    Sink {
        /// Sink name
        sink: &'static str,
        /// Underlying error
        #[source]
        source: SinkError,
    },

    /// The checkpoint store could not be configured
    #[error("Checkpoint store setup failed: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// The replication run failed
    #[error(transparent)]
    Replication(#[from] ReplicationError),
}

impl RunnerError {
    /// Returns `true` if the error was raised before the run started.
    ///
    /// Run failures have already been alerted by the replication loop.
    #[must_use]
    pub const fn is_setup(&self) -> bool {
        !matches!(self, Self::Replication(_))
    }
}
