// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Backtrace sanitizer pipeline (component C5).
//!
//! The raw backtrace the [`backtrace`] crate produces still has mangled
//! symbol names on platforms where the demangler built into that crate
//! doesn't match the toolchain that built the crashing binary (common
//! with Rust code that links C++ libraries). This module pipes the raw
//! text through an external filter — `c++filt -n` by default, or
//! whatever [`crate::config::ConfigRecord::sanitizer_command`] names —
//! and falls back to the untouched input if the filter is missing or
//! times out.

use std::time::Duration;

use faultlog_common::unix_utils::{reap_child_non_blocking, wait_for_pollhup, PreparedExecve};
use faultlog_common::TimeoutManager;

use crate::subprocess::{drain, safe_fork};

/// Shared with the backtrace capture itself: the whole BACKTRACE section,
/// frame-walk plus sanitizer, is budgeted 4 seconds.
const DEFAULT_TIME_LIMIT_MS: u64 = 4000;

/// Returns `cmd`'s filtering of `raw`, or `raw` unchanged if the filter
/// could not be run to completion within [`DEFAULT_TIME_LIMIT_MS`].
///
/// When `program_info` is `Some((pid, path))` — i.e.
/// `sanitizer_passes_program_info` is set — `path` and `pid` are appended
/// as extra positional arguments to `cmd`, in that order, for sanitizers
/// that want to re-read the crashing binary themselves (e.g. an
/// `addr2line`-style tool resolving addresses `backtrace`'s own
/// symbolizer couldn't).
pub fn sanitize_backtrace(raw: &str, cmd: &str, program_info: Option<(i32, &str)>) -> String {
    let full_cmd = match program_info {
        Some((pid, path)) => format!("{cmd} {path} {pid}"),
        None => cmd.to_string(),
    };
    sanitize_via_shell(raw, &full_cmd, DEFAULT_TIME_LIMIT_MS).unwrap_or_else(|| raw.to_string())
}

fn sanitize_via_shell(raw: &str, cmd: &str, time_limit_ms: u64) -> Option<String> {
    let mut in_fds = [0i32; 2];
    let mut out_fds = [0i32; 2];
    // Safety: two valid c_int slots on the stack, each time.
    if unsafe { libc::pipe(in_fds.as_mut_ptr()) } != 0 {
        return None;
    }
    if unsafe { libc::pipe(out_fds.as_mut_ptr()) } != 0 {
        // Safety: in_fds was just opened above.
        unsafe {
            libc::close(in_fds[0]);
            libc::close(in_fds[1]);
        }
        return None;
    }
    let (in_read, in_write) = (in_fds[0], in_fds[1]);
    let (out_read, out_write) = (out_fds[0], out_fds[1]);

    // Safety: this runs in the already-forked grandchild dumping
    // diagnostics, where forking again to exec a filter is expected.
    let pid = unsafe { safe_fork() };
    if pid < 0 {
        for fd in [in_read, in_write, out_read, out_write] {
            // Safety: all four fds were just opened above.
            unsafe { libc::close(fd) };
        }
        return None;
    }
    if pid == 0 {
        // Safety: rewires this child's stdio to the two pipes before exec.
        unsafe {
            libc::close(in_write);
            libc::close(out_read);
            libc::dup2(in_read, libc::STDIN_FILENO);
            libc::dup2(out_write, libc::STDOUT_FILENO);
            libc::close(in_read);
            libc::close(out_write);
        }
        exec_shell(cmd);
        // Safety: exec_shell only returns if every candidate failed.
        unsafe { libc::_exit(127) };
    }

    // Safety: the parent uses the opposite ends of both pipes.
    unsafe {
        libc::close(in_read);
        libc::close(out_write);
    }

    // Best effort: backtrace text for a handful of frames is well under
    // the kernel's default pipe buffer, so one write cannot deadlock
    // against the child's own write to out_write.
    // Safety: raw.as_ptr() is valid for raw.len() bytes for this call.
    unsafe { libc::write(in_write, raw.as_ptr().cast(), raw.len()) };
    // Safety: in_write was opened above and is no longer needed once sent.
    unsafe { libc::close(in_write) };

    let timeout = TimeoutManager::new(Duration::from_millis(time_limit_ms));
    let mut output = Vec::new();
    let completed = match wait_for_pollhup(out_read, &timeout) {
        Ok(true) => {
            drain(out_read, &mut output);
            true
        }
        _ => false,
    };
    // Safety: out_read was opened above.
    unsafe { libc::close(out_read) };

    if !completed {
        // Safety: pid is a live child of this process.
        unsafe { libc::kill(pid, libc::SIGKILL) };
    }
    let _ = reap_child_non_blocking(pid, &timeout);

    if completed && !output.is_empty() {
        String::from_utf8(output).ok()
    } else {
        None
    }
}

fn exec_shell(cmd: &str) {
    if let Ok(prepared) = PreparedExecve::new(&["/bin/sh", "-c", cmd]) {
        // Safety: prepared holds a validated argv; no other thread exists
        // in this forked child to race against the exec.
        unsafe { prepared.exec() };
    }
}
