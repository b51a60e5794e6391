// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration layer (component A1).
//!
//! A [`ConfigRecord`] is built once, on the setup path, and then published
//! into a process-wide [`AtomicPtr`] the same way the signal handler
//! publishes [`crate::state`]: a `Box` is leaked into the atomic and the
//! previous one is dropped from the setter thread, never from signal
//! context. Reads from inside the handler are raw-pointer dereferences of
//! whatever was last published; there is no handler-side synchronization
//! because the pointer is only ever replaced outside a crash.

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::OnceLock;

const ENV_ABORT_HANDLER: &str = "LIBFAULT_ABORT_HANDLER";
const ENV_BEEP_ON_ABORT: &str = "LIBFAULT_BEEP_ON_ABORT";
const ENV_STOP_ON_ABORT: &str = "LIBFAULT_STOP_ON_ABORT";

const DEFAULT_SANITIZER_COMMAND: &str = "c++filt -n";
const DEFAULT_LOG_BASE_PATH: &str = "/tmp/exe-crash.libfault.";

/// Frozen configuration consulted from signal context onward.
pub struct ConfigRecord {
    pub app_name: Option<String>,
    pub app_version: Option<String>,
    pub bugreport_url: Option<String>,
    /// Prefix the crashlog path is composed from: `<log_base_path><timestamp>`.
    pub log_base_path: String,
    pub sanitizer_command: CString,
    pub sanitizer_passes_program_info: bool,
    pub custom_diagnostics_data: Option<String>,
    pub custom_diagnostics_callback: Option<CustomDiagnosticsFn>,
    pub original_argv: Vec<CString>,
    pub abort_handler_enabled: bool,
    pub beep_on_abort: bool,
    pub stop_on_abort: bool,
}

/// A user-supplied hook invoked from the dumping grandchild to collect
/// extra application-specific context (feature flags, request ids, the
/// like), called with the registered [`ConfigBuilder::custom_diagnostics_data`]
/// (`None` if none was set). Runs after fork, so it may allocate and call
/// into arbitrary safe Rust, but must not block indefinitely: it is itself
/// bounded by [`crate::subprocess`]'s deadline machinery where it is
/// invoked from.
pub type CustomDiagnosticsFn = fn(Option<&str>) -> String;

/// Builder mirroring the setters of the installer facade
/// (`set_app_name`, `set_app_version`, `set_log_name`, `set_bugreport_url`).
#[derive(Default)]
pub struct ConfigBuilder {
    app_name: Option<String>,
    app_version: Option<String>,
    log_base_path: Option<String>,
    bugreport_url: Option<String>,
    sanitizer_command: Option<String>,
    sanitizer_passes_program_info: bool,
    custom_diagnostics_data: Option<String>,
    custom_diagnostics_callback: Option<CustomDiagnosticsFn>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    pub fn app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = Some(version.into());
        self
    }

    /// Sets the crashlog path prefix (`set_log_name` in the installer
    /// facade). `<log_base_path><timestamp>` is the path actually created.
    pub fn log_base_path(mut self, path: impl Into<String>) -> Self {
        self.log_base_path = Some(path.into());
        self
    }

    pub fn bugreport_url(mut self, url: impl Into<String>) -> Self {
        self.bugreport_url = Some(url.into());
        self
    }

    pub fn sanitizer_command(mut self, cmd: impl Into<String>) -> Self {
        self.sanitizer_command = Some(cmd.into());
        self
    }

    /// Whether the sanitizer command receives the faulting program's path
    /// and PID as extra positional arguments.
    pub fn sanitizer_passes_program_info(mut self, yes: bool) -> Self {
        self.sanitizer_passes_program_info = yes;
        self
    }

    pub fn custom_diagnostics_data(mut self, data: impl Into<String>) -> Self {
        self.custom_diagnostics_data = Some(data.into());
        self
    }

    pub fn custom_diagnostics_callback(mut self, callback: CustomDiagnosticsFn) -> Self {
        self.custom_diagnostics_callback = Some(callback);
        self
    }

    /// Applies environment overrides and snapshots `argv`, producing the
    /// record that will be published via [`publish`].
    pub fn build(self) -> Result<ConfigRecord, crate::error::ConfigError> {
        let log_base_path = match self.log_base_path {
            Some(p) => p,
            None => DEFAULT_LOG_BASE_PATH.to_string(),
        };
        validate_log_base_path(&log_base_path)?;

        let sanitizer_command = self
            .sanitizer_command
            .unwrap_or_else(|| DEFAULT_SANITIZER_COMMAND.to_string());
        let sanitizer_command = CString::new(sanitizer_command).unwrap_or_else(|_| {
            CString::new(DEFAULT_SANITIZER_COMMAND).expect("static literal has no NUL")
        });

        // Deep-copies argv now, while ordinary allocation is still safe,
        // so the sanitizer pipeline never has to re-read argv/envp from
        // signal context (Open Question 3).
        let original_argv = std::env::args_os()
            .filter_map(|a| CString::new(a.to_string_lossy().into_owned()).ok())
            .collect();

        Ok(ConfigRecord {
            app_name: self.app_name,
            app_version: self.app_version,
            bugreport_url: self.bugreport_url,
            log_base_path,
            sanitizer_command,
            sanitizer_passes_program_info: self.sanitizer_passes_program_info,
            custom_diagnostics_data: self.custom_diagnostics_data,
            custom_diagnostics_callback: self.custom_diagnostics_callback,
            original_argv,
            abort_handler_enabled: env_truthy(ENV_ABORT_HANDLER).unwrap_or(true),
            beep_on_abort: env_truthy(ENV_BEEP_ON_ABORT).unwrap_or(false),
            stop_on_abort: env_truthy(ENV_STOP_ON_ABORT).unwrap_or(false),
        })
    }
}

/// Rejects an empty prefix and a prefix whose parent directory does not
/// exist; a relative prefix with no directory component (implying the
/// current working directory) is accepted.
fn validate_log_base_path(path: &str) -> Result<(), crate::error::ConfigError> {
    if path.is_empty() {
        return Err(crate::error::ConfigError::InvalidLogBasePath(PathBuf::from(
            path,
        )));
    }
    let parent = Path::new(path)
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty());
    if let Some(dir) = parent {
        if !dir.is_dir() {
            return Err(crate::error::ConfigError::InvalidLogBasePath(PathBuf::from(
                path,
            )));
        }
    }
    Ok(())
}

/// `1`, `true`, `yes`, `on` (any case) are truthy; `0`, `false`, `no`,
/// `off`, and empty are falsy. Anything else is ignored so a typo falls
/// back to the default rather than silently flipping a safety knob.
fn env_truthy(var: &str) -> Option<bool> {
    let val = std::env::var(var).ok()?;
    let lower = val.trim().to_ascii_lowercase();
    match lower.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => {
            log::warn!("faultlog: ignoring unrecognized value {val:?} for ${var}");
            None
        }
    }
}

static CONFIG: AtomicPtr<ConfigRecord> = AtomicPtr::new(std::ptr::null_mut());
static INSTALLED_ONCE: OnceLock<()> = OnceLock::new();

/// Publishes `record` as the process-wide configuration, dropping the
/// previously published one (if any) after the swap.
pub fn publish(record: ConfigRecord) {
    let new_ptr = Box::into_raw(Box::new(record));
    let old_ptr = CONFIG.swap(new_ptr, Ordering::SeqCst);
    if !old_ptr.is_null() {
        // Safety: old_ptr was produced by a prior `Box::into_raw` in this
        // same function and has just been atomically replaced, so no other
        // reader can newly acquire it; in-flight readers hold a reference
        // taken before the swap and this crate never frees while a signal
        // handler might be mid-read of the old generation.
        drop(unsafe { Box::from_raw(old_ptr) });
    }
}

/// Reads whatever configuration is currently published, if any.
///
/// Safe to call from signal context: this is a single atomic load and a
/// raw-pointer deref, no locks, no allocation.
pub fn current() -> Option<&'static ConfigRecord> {
    let ptr = CONFIG.load(Ordering::SeqCst);
    if ptr.is_null() {
        None
    } else {
        // Safety: see `publish`; the pointee outlives this borrow because
        // nothing frees a generation while a handler invocation is active.
        Some(unsafe { &*ptr })
    }
}

pub fn mark_installed_once() -> bool {
    INSTALLED_ONCE.set(()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        std::env::set_var("LIBFAULT_TEST_TRUTHY", "YES");
        assert_eq!(env_truthy("LIBFAULT_TEST_TRUTHY"), Some(true));
        std::env::set_var("LIBFAULT_TEST_TRUTHY", "0");
        assert_eq!(env_truthy("LIBFAULT_TEST_TRUTHY"), Some(false));
        std::env::set_var("LIBFAULT_TEST_TRUTHY", "maybe");
        assert_eq!(env_truthy("LIBFAULT_TEST_TRUTHY"), None);
        std::env::remove_var("LIBFAULT_TEST_TRUTHY");
        assert_eq!(env_truthy("LIBFAULT_TEST_TRUTHY"), None);
    }

    #[test]
    fn rejects_empty_log_base_path() {
        let err = ConfigBuilder::new().log_base_path("").build().unwrap_err();
        assert!(matches!(err, crate::error::ConfigError::InvalidLogBasePath(_)));
    }

    #[test]
    fn rejects_path_whose_parent_does_not_exist() {
        let err = ConfigBuilder::new()
            .log_base_path("/no/such/directory/prefix.")
            .build()
            .unwrap_err();
        assert!(matches!(err, crate::error::ConfigError::InvalidLogBasePath(_)));
    }

    #[test]
    fn defaults_log_base_path_when_unset() {
        let record = ConfigBuilder::new().build().unwrap();
        assert_eq!(record.log_base_path, DEFAULT_LOG_BASE_PATH);
    }

    #[test]
    fn publish_and_read_back() {
        let record = ConfigBuilder::new().app_name("demo").build().unwrap();
        publish(record);
        assert_eq!(current().unwrap().app_name.as_deref(), Some("demo"));
    }
}
