// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Diagnostic section dumpers (component C4).
//!
//! Each submodule writes one section of the crash report to the shared
//! output descriptor. They run in the dumping grandchild (see
//! [`crate::handler`]), after the process has already forked past the
//! signal-unsafe region, so ordinary allocating Rust is fine here;
//! what each dumper must still respect is its own time budget, since a
//! wedged `/proc` mount or a hung subprocess must not hang the whole
//! report.

pub mod assertion;
pub mod backtrace;
pub mod custom;
pub mod fds;
pub mod maps;
pub mod preamble;
pub mod registers;
pub mod stack;

use std::os::unix::io::RawFd;

use faultlog_common::unix_utils::PreparedExecve;

use crate::config::ConfigRecord;
use crate::subprocess::run_subprocess;

/// Everything a dumper needs, extracted from the signal context before
/// the first fork so dumpers never have to touch `siginfo_t`/`ucontext_t`
/// directly.
pub struct DumpContext<'a> {
    pub out_fd: RawFd,
    pub pid: libc::pid_t,
    pub signo: i32,
    pub si_code: i32,
    pub si_addr: usize,
    pub si_pid: i32,
    pub si_uid: u32,
    /// Raw pointer to the `ucontext_t` the kernel handed the original
    /// handler; valid in this process because fork() copied the memory
    /// it points into.
    pub ucontext_ptr: usize,
    pub config: &'a ConfigRecord,
}

/// Writes `text` to the context's output descriptor, retrying on
/// short writes and `EINTR`. Errors are swallowed: there is no
/// meaningful recovery for a dumper that can't write its own output,
/// and the report should continue with the next section regardless.
pub fn write_out(fd: RawFd, text: &[u8]) {
    let mut offset = 0;
    while offset < text.len() {
        // Safety: text[offset..] is a valid slice for the duration of
        // this call; fd is the long-lived output descriptor for this
        // dump, owned by the caller.
        let n = unsafe {
            libc::write(
                fd,
                text[offset..].as_ptr().cast(),
                text.len() - offset,
            )
        };
        if n < 0 {
            if std::io::Error::last_os_error().kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            break;
        }
        if n == 0 {
            break;
        }
        offset += n as usize;
    }
}

const SECTION_RULE: &str = "--------------------------------------"; // 38 dashes

pub fn write_section_header(fd: RawFd, title: &str) {
    write_out(fd, b"\n");
    write_out(fd, SECTION_RULE.as_bytes());
    write_out(fd, b"\n");
    write_out(fd, title.as_bytes());
    write_out(fd, b"\n");
    write_out(fd, SECTION_RULE.as_bytes());
    write_out(fd, b"\n");
}

/// Runs the first candidate argv that execs successfully, with its
/// stdout and stderr both redirected into the diagnostic output, bounded
/// to `time_limit_ms`. Candidates are tried in order so a dumper can fall
/// back from e.g. `/usr/bin/lsof` to `/usr/sbin/lsof`.
pub fn run_external(time_limit_ms: u64, candidates: &[&[&str]]) -> Vec<u8> {
    let result = run_subprocess(time_limit_ms, |write_fd| {
        // Safety: write_fd is the pipe handed to us by run_subprocess;
        // redirecting stdio before exec is the standard pattern.
        unsafe {
            libc::dup2(write_fd, libc::STDOUT_FILENO);
            libc::dup2(write_fd, libc::STDERR_FILENO);
        }
        for argv in candidates {
            if let Ok(prepared) = PreparedExecve::new(argv) {
                // Safety: prepared was validated by PreparedExecve::new;
                // this forked child has no other threads to race.
                unsafe { prepared.exec() };
            }
        }
    });
    result.output
}

/// Runs every dumper in the fixed order the report is laid out in: the
/// header line and optional lines have already been written by
/// [`crate::handler`] before the fork dance began, so this starts from
/// the environment preamble.
pub fn dump_all(ctx: &DumpContext) {
    preamble::dump(ctx);
    assertion::dump(ctx);
    registers::dump(ctx);
    stack::dump(ctx);
    backtrace::dump(ctx);
    custom::dump(ctx);
    maps::dump(ctx);
    fds::dump(ctx);
}
