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

//! `docrelay` binary: one replication run per process invocation.

use docrelay_runner::{setup, InvocationResult, RunnerConfig};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,docrelay_core=info,docrelay_stores=info,docrelay_sinks=info")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    docrelay_core::metrics::init_metrics();

    let result = match RunnerConfig::from_env() {
        Ok(config) => {
            info!(?config, "Starting replication run");
            setup::invoke(&config).await
        }
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            InvocationResult::failure(&e)
        }
    };

    match result.to_json() {
        Ok(json) => println!("{json}"),
        Err(e) => error!(error = %e, "Failed to render invocation result"),
    }
    result.exit_code()
}
