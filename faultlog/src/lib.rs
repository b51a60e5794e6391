// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Embeddable crash-diagnostics runtime.
//!
//! Installs handlers for `SIGABRT`, `SIGSEGV`, `SIGBUS`, `SIGFPE`, and
//! `SIGILL` that, on a fatal signal, fork a subordinate process to dump
//! registers, a raw stack window, a symbolized backtrace, the memory
//! map, and open file descriptors to `stderr` and optionally a
//! timestamped log file, before letting the crash terminate the process
//! through its normal disposition.
//!
//! ```no_run
//! faultlog::install_handlers(
//!     faultlog::ConfigBuilder::new()
//!         .app_name("my-service")
//!         .log_base_path("/var/log/my-service/crash"),
//! )
//! .expect("failed to install crash handlers");
//! ```
//!
//! Everything here is Unix-only; there is no Windows crash-reporting
//! path in this crate.

#![cfg(unix)]

#[macro_use]
pub mod assert_trap;
pub mod config;
pub mod crashlog;
pub mod dumpers;
pub mod error;
pub mod fd;
pub mod format;
pub mod handler;
pub mod install;
pub mod sanitizer;
pub mod state;
pub mod subprocess;

pub use config::{ConfigBuilder, ConfigRecord};
pub use error::ConfigError;
pub use install::install_handlers;
