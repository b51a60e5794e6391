// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Crashlog file creation and stdout/stderr tee (component C6).
//!
//! Both functions here run in the *original* crashing process, still on
//! the alternate signal stack, before the fork dance begins: the crashlog
//! path is decided and the tee set up while the process that owns
//! `stdout`/`stderr` is still the one crashing, so every descendant
//! (intermediate, grandchild, and any dumper subprocess they spawn)
//! inherits the redirected descriptors for free. Nothing here allocates
//! through the general-purpose heap in the reentrant sense that matters
//! for signal safety: `OpenOptions`/`CString` allocation happens once,
//! synchronously, and this code is never itself called from inside
//! another signal handler.

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;

use faultlog_common::unix_utils::PreparedExecve;

use crate::subprocess::safe_fork;

/// Creates (or truncates) `<log_base_path><timestamp_suffix>` with mode
/// `0600` and immediately closes it: this is a presence/writability check,
/// not a handle the caller keeps open. The tee child reopens the same
/// path for appending. Returns `None` on any I/O error, in which case the
/// caller falls back to stderr-only reporting.
pub fn create_log_file(log_base_path: &str, timestamp_suffix: &str) -> Option<String> {
    let path = format!("{log_base_path}{timestamp_suffix}");
    OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .mode(0o600)
        .open(&path)
        .ok()?;
    Some(path)
}

/// Forks a `tee -a <path>` (falling back to `cat >> <path>` if `tee` is
/// unavailable) and redirects this process's `stdout` and `stderr` so
/// that everything written to either from this point on — by this
/// process or any of its descendants — reaches both the terminal and
/// `path`.
///
/// Returns `false` if the pipe, fork, or every candidate binary fails;
/// the caller then reports to stderr only, which is still a complete
/// (if not persisted) crash report.
pub fn tee_outputs_to(path: &str) -> bool {
    let mut fds = [0i32; 2];
    // Safety: two valid c_int slots on the stack.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return false;
    }
    let (read_fd, write_fd) = (fds[0], fds[1]);

    // Safety: this is the one fork tee setup performs; the child below
    // touches only the descriptors just opened and execve candidates.
    let pid = unsafe { safe_fork() };
    if pid < 0 {
        // Safety: both ends were just opened above.
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
        return false;
    }
    if pid == 0 {
        // Safety: write_fd is unused by the tee child; stdin is replaced
        // by the read end so tee/cat consumes our diagnostic output.
        unsafe {
            libc::close(write_fd);
            libc::dup2(read_fd, libc::STDIN_FILENO);
            libc::close(read_fd);
        }
        exec_tee(path);
        // Safety: every exec_tee candidate failed; _exit avoids running
        // any destructors twice in this forked copy.
        unsafe { libc::_exit(127) };
    }

    // Safety: read_fd is consumed by the tee child; our own write end
    // replaces stdout/stderr so all further output, from this process and
    // every descendant it forks, flows into the tee.
    unsafe {
        libc::close(read_fd);
        libc::dup2(write_fd, libc::STDOUT_FILENO);
        libc::dup2(write_fd, libc::STDERR_FILENO);
        libc::close(write_fd);
    }
    true
}

/// Never returns: either an `execve` of one of the candidate binaries
/// succeeds and replaces this process image, or all candidates fail and
/// the caller `_exit`s.
fn exec_tee(log_path: &str) {
    for argv in [
        ["/usr/bin/tee", "-a", log_path].as_slice(),
        ["/bin/tee", "-a", log_path].as_slice(),
        ["/bin/sh", "-c", &format!("cat >> {log_path}")].as_slice(),
    ] {
        if let Ok(prepared) = PreparedExecve::new(argv) {
            // Safety: prepared was built from valid, NUL-free argument
            // strings and this process holds no locks a concurrent thread
            // needs, since fork() only clones the calling thread.
            unsafe { prepared.exec() };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_log_file_at_the_composed_path() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("crash-").to_string_lossy().into_owned();
        let path = create_log_file(&base, "20231114T120000Z").unwrap();
        assert!(path.ends_with("crash-20231114T120000Z"));
        assert!(std::path::Path::new(&path).exists());
    }

    #[test]
    fn reports_failure_for_an_unwritable_base_path() {
        let path = create_log_file("/nonexistent-dir-xyz/crash-", "20231114T120000Z");
        assert!(path.is_none());
    }
}
