// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded subprocess helper (component C3).
//!
//! Every dumper that shells out (`uname`, `lsof`, `c++filt`, the backtrace
//! sanitizer) follows the same shape: open a pipe, fork with
//! [`safe_fork`], let the child write into the pipe and `_exit`, and have
//! the parent wait for either end-of-output or a deadline before reaping.
//! Centralizing that shape here keeps the deadline-and-reap bookkeeping
//! out of each dumper.

use std::os::unix::io::RawFd;
use std::time::Duration;

use faultlog_common::unix_utils::{alt_fork, reap_child_non_blocking, wait_for_pollhup};
use faultlog_common::TimeoutManager;

/// Forks without going through libc's `fork()` wrapper.
///
/// # Safety
/// Must only be called from a context where the caller has already
/// accepted the constraints of async-signal-safe forking: no locks held
/// by the calling thread that the child might need, and the child must
/// call only async-signal-safe functions until it `_exit`s or `execve`s.
pub unsafe fn safe_fork() -> libc::pid_t {
    alt_fork()
}

pub struct SubprocessResult {
    pub output: Vec<u8>,
    pub timed_out: bool,
}

/// Runs `child` in a forked subordinate with `write_fd` as its only
/// avenue back to the parent, collecting whatever it writes before
/// `time_limit_ms` elapses.
///
/// `child` must not return control past writing its output: it is
/// expected to call `_exit` or `execve` itself. If it returns normally
/// this function exits it with `_exit(0)` anyway, so it can never unwind
/// back into the crashing process's call stack.
pub fn run_subprocess(time_limit_ms: u64, child: impl FnOnce(RawFd)) -> SubprocessResult {
    let mut fds = [0i32; 2];
    // Safety: two valid `c_int` slots on the stack.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return SubprocessResult {
            output: Vec::new(),
            timed_out: false,
        };
    }
    let (read_fd, write_fd) = (fds[0], fds[1]);

    // Safety: this module's whole contract is that callers only invoke it
    // from places where a bare fork is already acceptable.
    let pid = unsafe { safe_fork() };
    if pid < 0 {
        // Safety: both fds were just opened by this function.
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
        return SubprocessResult {
            output: Vec::new(),
            timed_out: false,
        };
    }
    if pid == 0 {
        // Safety: read_fd is unused by the child.
        unsafe { libc::close(read_fd) };
        child(write_fd);
        // Safety: _exit never runs destructors or atexit handlers, which
        // is exactly what a forked signal-context subordinate needs.
        unsafe { libc::_exit(0) };
    }

    // Safety: the parent has no further use for the write end.
    unsafe { libc::close(write_fd) };

    let timeout = TimeoutManager::new(Duration::from_millis(time_limit_ms));
    let mut output = Vec::new();
    let timed_out = match wait_for_pollhup(read_fd, &timeout) {
        Ok(true) => {
            drain(read_fd, &mut output);
            false
        }
        Ok(false) | Err(_) => true,
    };

    // Safety: the parent has no further use for the read end once drained
    // or abandoned.
    unsafe { libc::close(read_fd) };

    if timed_out {
        // Safety: pid is a live child of this process; SIGKILL cannot be
        // caught or ignored, guaranteeing the reap below terminates.
        unsafe { libc::kill(pid, libc::SIGKILL) };
    }
    let _ = reap_child_non_blocking(pid, &timeout);

    SubprocessResult { output, timed_out }
}

/// Restores every signal in `signals` to `SIG_DFL` and clears the calling
/// thread's signal mask.
///
/// Any process this crate forks past the crashing process's handler
/// installation — the fork-dance intermediate, and the subordinate
/// [`crate::fd`] uses to scan its own `/proc/self/fd` — inherited the
/// installed handlers and whatever mask was active when the original
/// thread was interrupted. Both must be undone before that subordinate
/// does anything that could itself fault or block on a blocked signal.
///
/// # Safety
/// Async-signal-safe: `signal` and `sigprocmask` are both on the
/// async-signal-safe function list, so this may be called from a forked
/// child that has not yet left signal context.
pub unsafe fn reset_handlers_and_mask(signals: &[i32]) {
    for &signo in signals {
        libc::signal(signo, libc::SIG_DFL);
    }
    let mut empty_set: libc::sigset_t = std::mem::zeroed();
    libc::sigemptyset(&mut empty_set);
    loop {
        let rc = libc::sigprocmask(libc::SIG_SETMASK, &empty_set, std::ptr::null_mut());
        if rc == 0 {
            break;
        }
        if std::io::Error::last_os_error().kind() != std::io::ErrorKind::Interrupted {
            break;
        }
    }
}

pub(crate) fn drain(fd: RawFd, out: &mut Vec<u8>) {
    let mut buf = [0u8; 4096];
    loop {
        // Safety: buf is a valid, appropriately sized buffer for the
        // duration of the call.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n <= 0 {
            break;
        }
        out.extend_from_slice(&buf[..n as usize]);
    }
}
