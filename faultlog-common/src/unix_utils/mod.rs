// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg(unix)]

mod errors;
mod execve;
mod fork;
mod process;

pub use errors::{PollError, ReapError};
pub use execve::{PreparedExecve, PreparedExecveError};
pub use fork::alt_fork;
pub use process::wait_for_pollhup;
pub use process::reap_child_non_blocking;
