// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-wide statics consulted by the signal handler.
//!
//! Every piece of shared state here follows the same discipline: a `Box`
//! is leaked into an [`AtomicPtr`] by the setup-path writer and swapped
//! out (never freed while a handler invocation could still be reading the
//! old generation) by a later writer. There is deliberately no `Mutex`
//! anywhere in this file — taking a lock from inside a signal handler
//! risks deadlocking against a thread the signal interrupted mid-lock.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

/// Snapshot of the `assert!`-like failure that is about to raise
/// `SIGABRT`, captured by [`crate::assert_trap`] before the raise so the
/// handler can print it without re-deriving anything from the stack.
pub struct AssertRecord {
    pub expression: String,
    pub filename: String,
    pub line: u32,
    pub function: Option<String>,
    pub message: Option<String>,
}

static ASSERT: AtomicPtr<AssertRecord> = AtomicPtr::new(std::ptr::null_mut());

pub fn record_assert_failure(record: AssertRecord) {
    let new_ptr = Box::into_raw(Box::new(record));
    let old_ptr = ASSERT.swap(new_ptr, Ordering::SeqCst);
    if !old_ptr.is_null() {
        // Safety: see module docs; `record_assert_failure` only runs on the
        // thread about to raise SIGABRT, never concurrently with itself.
        drop(unsafe { Box::from_raw(old_ptr) });
    }
}

/// Safe to call from signal context: single atomic load, raw deref.
pub fn current_assert() -> Option<&'static AssertRecord> {
    let ptr = ASSERT.load(Ordering::SeqCst);
    if ptr.is_null() {
        None
    } else {
        // Safety: see module docs.
        Some(unsafe { &*ptr })
    }
}

/// Outcome of one handler entry, per the one-shot invocation guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    /// First entry for this process: run the full diagnostic dump.
    First,
    /// Second entry (crash inside the handler itself): print a short
    /// notice and re-raise with the default disposition.
    Second,
    /// Third or later entry: give up immediately, no further output.
    Terminal,
}

/// Counts how many times the handler has been entered in this process.
///
/// Mirrors a plain `fetch_add(1, SeqCst) > 0` one-shot guard: cheap,
/// async-signal-safe, and correct even if two threads crash at once,
/// since `fetch_add` is the atomic that decides who is "first".
pub struct InvocationCounter(AtomicU64);

impl InvocationCounter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn enter(&self) -> InvocationState {
        match self.0.fetch_add(1, Ordering::SeqCst) {
            0 => InvocationState::First,
            1 => InvocationState::Second,
            _ => InvocationState::Terminal,
        }
    }

    #[cfg(test)]
    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

static INVOCATIONS: InvocationCounter = InvocationCounter::new();

pub fn invocation_counter() -> &'static InvocationCounter {
    &INVOCATIONS
}

/// One read/write descriptor pair, opened at install time and held open
/// purely to guarantee a free slot in the descriptor table.
#[derive(Clone, Copy)]
pub struct PipePair {
    pub read_fd: RawFd,
    pub write_fd: RawFd,
}

/// Two pipe pairs opened at install time and held open for the lifetime
/// of the process so the handler always has free file descriptors to
/// close at the top of its run, guaranteeing headroom for the dumpers'
/// own pipes even if the crashing program had exhausted its descriptor
/// table. Two pairs rather than one: the header-writing step and the
/// crashlog tee setup each need a clear pipe of their own before any
/// dumper pipe is opened.
pub struct EmergencyPipes {
    pub first: PipePair,
    pub second: PipePair,
}

static EMERGENCY_PIPE: AtomicPtr<EmergencyPipes> = AtomicPtr::new(std::ptr::null_mut());

fn open_pipe_pair() -> std::io::Result<PipePair> {
    let mut fds = [0; 2];
    // Safety: out-params are two valid `c_int`s on the stack.
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(PipePair {
        read_fd: fds[0],
        write_fd: fds[1],
    })
}

pub fn install_emergency_pipe() -> std::io::Result<()> {
    let first = open_pipe_pair()?;
    let second = open_pipe_pair().inspect_err(|_| {
        // Safety: first was just opened above and owned by no one else yet.
        unsafe {
            libc::close(first.read_fd);
            libc::close(first.write_fd);
        }
    })?;
    let record = EmergencyPipes { first, second };
    let new_ptr = Box::into_raw(Box::new(record));
    let old_ptr = EMERGENCY_PIPE.swap(new_ptr, Ordering::SeqCst);
    if !old_ptr.is_null() {
        // Safety: see module docs; install_emergency_pipe only runs on the
        // setup path, serialized by the caller's install-once guard.
        let old = unsafe { Box::from_raw(old_ptr) };
        // Safety: fds were opened by a prior call to this function and
        // have not been closed elsewhere.
        unsafe {
            libc::close(old.first.read_fd);
            libc::close(old.first.write_fd);
            libc::close(old.second.read_fd);
            libc::close(old.second.write_fd);
        }
    }
    Ok(())
}

/// Closes all four emergency descriptors, if any are installed, and
/// clears the static so a later crash in the same process doesn't try to
/// close them twice. Called at the very top of the handler. Idempotent:
/// a second call observes the null pointer left by the first and does
/// nothing.
pub fn close_emergency_pipes() {
    let old_ptr = EMERGENCY_PIPE.swap(std::ptr::null_mut(), Ordering::SeqCst);
    if old_ptr.is_null() {
        return;
    }
    // Safety: async-signal-safe close(2) on descriptors this process owns;
    // the pointer itself is leaked (no Box::from_raw / no allocator call).
    unsafe {
        let pipes = &*old_ptr;
        libc::close(pipes.first.read_fd);
        libc::close(pipes.first.write_fd);
        libc::close(pipes.second.read_fd);
        libc::close(pipes.second.write_fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_counter_sequence() {
        let counter = InvocationCounter::new();
        assert_eq!(counter.enter(), InvocationState::First);
        assert_eq!(counter.enter(), InvocationState::Second);
        assert_eq!(counter.enter(), InvocationState::Terminal);
        assert_eq!(counter.enter(), InvocationState::Terminal);
    }

    #[test]
    fn closing_emergency_pipes_twice_is_safe() {
        install_emergency_pipe().unwrap();
        close_emergency_pipes();
        close_emergency_pipes();
    }

    #[test]
    fn assert_record_publish_and_read() {
        record_assert_failure(AssertRecord {
            expression: "x > 0".into(),
            filename: "demo.rs".into(),
            line: 42,
            function: None,
            message: None,
        });
        let rec = current_assert().unwrap();
        assert_eq!(rec.line, 42);
    }
}
