// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! File-descriptor enumeration and bulk close (component C2).
//!
//! [`highest_open_fd`] tries three strategies in order, each cheaper to
//! trust than the last:
//! 1. `fcntl(F_MAXFD)` where the platform supports it (BSD/macOS) — one
//!    syscall, no forking.
//! 2. A forked subordinate that lists `/proc/self/fd` (Linux) or
//!    `/dev/fd` and reports back the highest numeric entry, bounded to a
//!    30ms budget so a wedged filesystem can't hang the handler.
//! 3. `getrlimit(RLIMIT_NOFILE)`, clamped to a sane range, when both of
//!    the above are unavailable or time out.

use crate::subprocess::{reset_handlers_and_mask, run_subprocess};
use std::ffi::CStr;

const FD_FLOOR: i32 = 2;
const FD_CEILING: i32 = 9999;
const SCAN_BUDGET_MS: u64 = 30;

#[cfg(target_os = "linux")]
const FD_DIR: &CStr = c"/proc/self/fd";
#[cfg(not(target_os = "linux"))]
const FD_DIR: &CStr = c"/dev/fd";

/// Best-effort highest currently-open file descriptor in this process.
pub fn highest_open_fd() -> i32 {
    if let Some(fd) = highest_fd_via_fcntl() {
        return fd;
    }
    if let Some(fd) = highest_fd_via_subordinate_scan() {
        return fd;
    }
    highest_fd_via_rlimit()
}

#[cfg(target_os = "macos")]
fn highest_fd_via_fcntl() -> Option<i32> {
    // Safety: F_MAXFD is a pure query, no arguments beyond the command.
    let rc = unsafe { libc::fcntl(0, libc::F_MAXFD) };
    (rc >= 0).then_some(rc)
}

#[cfg(not(target_os = "macos"))]
fn highest_fd_via_fcntl() -> Option<i32> {
    None
}

fn highest_fd_via_subordinate_scan() -> Option<i32> {
    let result = run_subprocess(SCAN_BUDGET_MS, |write_fd| {
        // Safety: this subordinate was just forked and may have inherited
        // this crate's own installed handlers and the interrupted
        // thread's mask; opendir/readdir below are not async-signal-safe,
        // so ordinary signal semantics must be restored first.
        unsafe { reset_handlers_and_mask(&crate::handler::HANDLED_SIGNALS) };
        let highest = scan_fd_directory();
        let bytes = highest.to_ne_bytes();
        // Safety: write_fd is the pipe handed to us by run_subprocess;
        // bytes is a valid 4-byte buffer. A fixed-width binary value,
        // rather than decimal text, means the parent never has to guess
        // whether a short read truncated a digit.
        unsafe {
            libc::write(write_fd, bytes.as_ptr().cast(), bytes.len());
        }
    });
    if result.timed_out || result.output.len() != 4 {
        return None;
    }
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&result.output);
    Some(i32::from_ne_bytes(bytes))
}

/// Runs inside the forked, not-yet-exec'd subordinate. `opendir`/`readdir`
/// are not on the async-signal-safe list, which is exactly why this work
/// is isolated in a throwaway child rather than done on the signal stack.
fn scan_fd_directory() -> i32 {
    // Safety: FD_DIR is a valid, NUL-terminated, 'static C string.
    let dir = unsafe { libc::opendir(FD_DIR.as_ptr()) };
    if dir.is_null() {
        return -1;
    }
    let mut highest = -1;
    loop {
        // Safety: dir is a valid, open DIR* for the duration of this loop.
        let entry = unsafe { libc::readdir(dir) };
        if entry.is_null() {
            break;
        }
        // Safety: d_name is a NUL-terminated array owned by `entry`.
        let name = unsafe { CStr::from_ptr((*entry).d_name.as_ptr()) };
        if let Ok(n) = name.to_str().unwrap_or("").parse::<i32>() {
            highest = highest.max(n);
        }
    }
    // Safety: dir was returned non-null by opendir above.
    unsafe { libc::closedir(dir) };
    highest
}

fn highest_fd_via_rlimit() -> i32 {
    let mut rl = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // Safety: rl is a valid, appropriately sized out-param.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rl) };
    let highest = if rc == 0 {
        (rl.rlim_cur as i64).saturating_sub(1)
    } else {
        FD_CEILING as i64
    };
    highest.clamp(FD_FLOOR as i64, FD_CEILING as i64) as i32
}

/// Closes every descriptor from `lowest` through [`highest_open_fd`],
/// inclusive. Errors from closing an already-closed or invalid fd are
/// ignored, since that's the expected steady state for most of the
/// range.
pub fn close_from(lowest: i32) {
    let highest = highest_open_fd();
    for fd in lowest..=highest {
        // Safety: close(2) on an arbitrary fd is always safe to call; a
        // bad fd simply yields EBADF, which is ignored.
        unsafe {
            libc::close(fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rlimit_fallback_is_clamped() {
        let fd = highest_fd_via_rlimit();
        assert!(fd >= FD_FLOOR);
        assert!(fd <= FD_CEILING);
    }

    #[test]
    fn subordinate_scan_sees_stdio() {
        if let Some(fd) = highest_fd_via_subordinate_scan() {
            // At minimum stdin/stdout/stderr should be visible.
            assert!(fd >= 2);
        }
    }
}
