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

//! Invocation result reported to the caller.
//!
//! One run produces one JSON object on stdout:
//!
//! ```json
//! {"status":"SUCCESS","eventsProcessed":42,"statusCode":200,"detail":"42 records processed successfully."}
//! ```

use docrelay_core::checkpoint::CheckpointStore;
use docrelay_core::feed::ChangeFeed;
use docrelay_core::replication::{LoopOutcome, ReplicationError, Replicator, RunReport, RunStatus};
use serde::{Serialize, Serializer};
use std::process::ExitCode;

/// Outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResult {
    /// Coarse status
    #[serde(serialize_with = "serialize_status")]
    pub status: RunStatus,

    /// Events consumed from the feed
    pub events_processed: usize,

    /// 200 when events were processed, 201 when there was nothing to do, 500 on failure
    pub status_code: u16,

    /// Human-readable summary
    pub detail: String,
}

fn serialize_status<S: Serializer>(status: &RunStatus, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(status.as_str())
}

impl InvocationResult {
    /// Builds the result of a run that did not fail.
    #[must_use]
    pub fn from_report(report: &RunReport) -> Self {
        let detail = match (report.status, report.outcome) {
            (_, LoopOutcome::HistoryLost) => {
                "Stored position was outside the retained history and has been reset.".to_string()
            }
            (RunStatus::Success, _) => {
                format!("{} records processed successfully.", report.events_processed)
            }
            _ => "No records to process.".to_string(),
        };
        Self {
            status: report.status,
            events_processed: report.events_processed,
            status_code: if report.status == RunStatus::Success {
                200
            } else {
                201
            },
            detail,
        }
    }

    /// Builds the result of a failed invocation.
    #[must_use]
    pub fn failure(error: &dyn std::error::Error) -> Self {
        Self {
            status: RunStatus::Failure,
            events_processed: 0,
            status_code: 500,
            detail: error.to_string(),
        }
    }

    /// Returns `true` for a failed invocation.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status == RunStatus::Failure
    }

    /// Process exit code for this result.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        if self.is_failure() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        }
    }

    /// Renders the result as a single JSON line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Runs `replicator` once and always releases its resources afterwards.
///
/// # Errors
///
/// Returns the run's error after shutdown has completed.
pub async fn run_once<F, S>(replicator: &mut Replicator<F, S>) -> Result<RunReport, ReplicationError>
where
    F: ChangeFeed,
    S: CheckpointStore,
{
    let outcome = replicator.run().await;
    replicator.shutdown().await;
    outcome
}
