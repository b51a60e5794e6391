// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the setup path (component A3).
//!
//! Nothing on the signal-handling path returns a `Result`: once a handler
//! is installed it runs to completion or it doesn't, there is no caller
//! left to hand an error back to. `ConfigError` only ever surfaces from
//! [`crate::install`] calls made before a crash.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to allocate the alternate signal stack: {0}")]
    AltStackAlloc(#[source] std::io::Error),

    #[error("failed to open the emergency file-descriptor reserve: {0}")]
    EmergencyPipeFailed(#[source] std::io::Error),

    #[error("sigaction failed while installing handler for signal {signal}: {source}")]
    SigactionFailed {
        signal: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("install_handlers() was already called once in this process")]
    AlreadyInstalled,

    #[error("log base path {0:?} is not usable as a path prefix: parent directory does not exist")]
    InvalidLogBasePath(PathBuf),
}
