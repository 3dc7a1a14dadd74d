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

//! Invocation entry point for docrelay.
//!
//! Reads its settings from the environment (see [`config`]), builds the
//! source client, checkpoint store, sinks and alert channel, runs the
//! replication loop once and reports an [`InvocationResult`].
//!
//! ```rust,no_run
//! use docrelay_runner::config::RunnerConfig;
//! use docrelay_runner::setup;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunnerConfig::from_env()?;
//! let result = setup::invoke(&config).await;
//! println!("{}", result.to_json()?);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod invocation;
pub mod setup;

pub use config::{RunnerConfig, SinkTarget};
pub use error::RunnerError;
pub use invocation::InvocationResult;
