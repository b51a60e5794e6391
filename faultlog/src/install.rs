// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Installer facade (component A2).
//!
//! This is the only entry point applications call directly. It mirrors
//! the setter-then-install shape of a C API (`set_app_name`,
//! `set_custom_diagnostics`, `install_handlers`) but expressed as a
//! builder, which is the idiomatic Rust equivalent: [`ConfigBuilder`]
//! accumulates settings and [`install_handlers`] freezes and publishes
//! them in one step.

use crate::config::{self, ConfigBuilder};
use crate::error::ConfigError;
use crate::handler;

/// Builds the process-wide [`crate::config::ConfigRecord`] from `builder`
/// and installs the signal handlers for `SIGABRT`, `SIGSEGV`, `SIGBUS`,
/// `SIGFPE`, and `SIGILL`.
///
/// Returns [`ConfigError::AlreadyInstalled`] if called more than once in
/// the same process: the handler installation is not idempotent, and a
/// second call would silently replace the alternate signal stack out
/// from under a handler that might already be running on it.
pub fn install_handlers(builder: ConfigBuilder) -> Result<(), ConfigError> {
    if !config::mark_installed_once() {
        log::warn!("faultlog: install_handlers() called more than once; ignoring");
        return Err(ConfigError::AlreadyInstalled);
    }
    let record = builder.build().inspect_err(|err| {
        log::error!("faultlog: invalid configuration, handlers not installed: {err}");
    })?;
    let app = record.app_name.clone();
    config::publish(record);
    handler::install_signal_handlers().inspect_err(|err| {
        log::error!("faultlog: failed to install signal handlers: {err}");
    })?;
    log::info!(
        "faultlog: crash handlers installed{}",
        app.map(|a| format!(" for {a}")).unwrap_or_default()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_a_second_install_in_the_same_process() {
        // config::mark_installed_once() is backed by a process-wide
        // OnceLock, so only the first of these two calls in the whole
        // test binary can succeed; this test only asserts the refusal
        // shape, not which call in the suite wins the race.
        let first = install_handlers(ConfigBuilder::new().app_name("refuses-second-install"));
        let second = install_handlers(ConfigBuilder::new().app_name("refuses-second-install"));
        assert!(first.is_err() || second.is_err());
    }
}
