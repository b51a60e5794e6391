// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Signal handler and fork-dance orchestration (component C7).
//!
//! The handler runs in three phases, the first two still inside the
//! original crashing process and still on the alternate signal stack:
//!
//! 1. **Housekeeping.** Close the emergency pipes
//!    ([`crate::state::close_emergency_pipes`]) to guarantee free
//!    descriptors, then consult the one-shot
//!    [`crate::state::InvocationCounter`]. A first crash proceeds; a
//!    crash inside this handler prints a short notice instead of
//!    recursing; a third invocation is a runaway handler and the process
//!    exits immediately.
//! 2. **Report header, still in the original process.** Create the
//!    crashlog file and tee `stdout`/`stderr` onto it (component C6),
//!    emit the one-line header and the optional app/version/bugreport/
//!    log-path lines with [`crate::format::ScratchCursor`], honor
//!    `beep_on_abort` and `stop_on_abort`, and only then fork. Everything
//!    here runs before the dumping grandchild exists, so the tee and the
//!    header are visible even if the rest of the dance never completes.
//! 3. **The fork dance.** The original forks an *intermediate* child and
//!    raises `SIGSTOP` on itself, freezing its memory image exactly as it
//!    was at the moment of the crash. The intermediate sleeps ~100ms
//!    (giving the kernel time to finish stopping the original), resets
//!    its own signal disposition and mask back to default, and forks the
//!    *grandchild* that does the actual dumping, then exits immediately
//!    so the grandchild reparents to init instead of lingering as a child
//!    of a stopped process. The grandchild runs every dumper in
//!    [`crate::dumpers`], then sends `SIGCONT` to the original. The
//!    original resumes inside its own handler call, which then re-raises
//!    the original signal; because the handler was installed with
//!    `SA_RESETHAND`, that re-raise invokes the signal's default
//!    disposition (process termination).

use std::ffi::c_void;
use std::time::Duration;

use chrono::Utc;
use libc::{pid_t, siginfo_t};

use crate::config::{self, ConfigRecord};
use crate::crashlog;
use crate::dumpers::{self, DumpContext};
use crate::error::ConfigError;
use crate::format::ScratchCursor;
use crate::state::{self, InvocationState};
use crate::subprocess::{reset_handlers_and_mask, safe_fork};

pub(crate) const HANDLED_SIGNALS: [i32; 5] = [
    libc::SIGABRT,
    libc::SIGSEGV,
    libc::SIGBUS,
    libc::SIGFPE,
    libc::SIGILL,
];

const INTERMEDIATE_SLEEP: Duration = Duration::from_millis(100);

/// Allocates the alternate signal stack and installs `handle_signal` for
/// every signal in [`HANDLED_SIGNALS`]. Idempotency (refusing a second
/// call in the same process) is enforced by the caller, [`crate::install`].
pub fn install_signal_handlers() -> Result<(), ConfigError> {
    install_alt_stack()?;
    state::install_emergency_pipe().map_err(ConfigError::EmergencyPipeFailed)?;
    for &signo in &HANDLED_SIGNALS {
        install_one(signo)?;
    }
    Ok(())
}

fn install_alt_stack() -> Result<(), ConfigError> {
    let size = min_signal_stack_size() + 128 * 1024;
    let mut stack = vec![0u8; size].into_boxed_slice();
    let ss = libc::stack_t {
        ss_sp: stack.as_mut_ptr().cast(),
        ss_flags: 0,
        ss_size: size,
    };
    // The alt stack must live for the rest of the process; there is no
    // later point at which it would be safe to free it.
    std::mem::forget(stack);
    // Safety: ss is a valid, fully initialized stack_t; old_ss is unused.
    let rc = unsafe { libc::sigaltstack(&ss, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(ConfigError::AltStackAlloc(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn min_signal_stack_size() -> usize {
    libc::MINSIGSTKSZ
}

#[cfg(not(target_os = "linux"))]
fn min_signal_stack_size() -> usize {
    libc::SIGSTKSZ
}

fn install_one(signo: i32) -> Result<(), ConfigError> {
    // Safety: sigaction is a plain C struct; zeroing it is a valid
    // representation before we fill in the fields we need.
    let mut sa: libc::sigaction = unsafe { std::mem::zeroed() };
    sa.sa_sigaction = handle_signal as usize;
    sa.sa_flags = libc::SA_RESETHAND | libc::SA_SIGINFO | libc::SA_ONSTACK;
    // Safety: sa.sa_mask is a valid sigset_t out-param.
    unsafe { libc::sigemptyset(&mut sa.sa_mask) };
    // Safety: sa is fully initialized; old_sa is unused.
    let rc = unsafe { libc::sigaction(signo, &sa, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(ConfigError::SigactionFailed {
            signal: signo,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// A plain-data snapshot of the fields the dumpers need, taken from the
/// kernel-supplied `siginfo_t`/`ucontext_t` before the first fork so the
/// rest of the orchestration never has to re-touch the signal context.
#[derive(Clone, Copy)]
struct CrashContext {
    pid: pid_t,
    signo: i32,
    si_code: i32,
    si_addr: usize,
    si_pid: i32,
    si_uid: u32,
    ucontext_ptr: usize,
}

extern "C" fn handle_signal(signo: i32, info: *mut siginfo_t, ucontext: *mut c_void) {
    // Guarantee two free descriptors for this handler's own pipes even if
    // the crashing program had exhausted its table.
    state::close_emergency_pipes();

    match state::invocation_counter().enter() {
        InvocationState::Terminal => {
            // A third crash means the handler itself is the problem;
            // write a short notice, then exit with plain status 1 to
            // avoid ever running this path a fourth time.
            handle_terminal_crash(signo);
            // Safety: _exit is async-signal-safe and never returns.
            unsafe { libc::_exit(1) };
        }
        InvocationState::Second => {
            // Safety: info is still the kernel-supplied pointer for this
            // delivery; handle_reentrant_crash only reads from it.
            unsafe { handle_reentrant_crash(signo, &*info) };
        }
        InvocationState::First => {
            // Safety: info/ucontext are the kernel-supplied pointers for
            // this delivery, valid for the duration of this call.
            let ctx = unsafe { snapshot_context(signo, info, ucontext) };
            // Safety: info is still the kernel-supplied pointer for this
            // delivery; handle_first_crash only reads from it before the
            // first fork, which is within its validity.
            unsafe { handle_first_crash(ctx, &*info) };
        }
    }

    // Safety: SA_RESETHAND means signo's disposition is already back to
    // SIG_DFL; raising it here is how the original signal's default
    // action (terminate, optionally with a core dump) actually happens.
    unsafe { libc::raise(signo) };
}

unsafe fn snapshot_context(signo: i32, info: *mut siginfo_t, ucontext: *mut c_void) -> CrashContext {
    let info_ref = &*info;
    let si_code = info_ref.si_code;
    let si_addr = info_ref.si_addr() as usize;
    let (si_pid, si_uid) = if si_code <= 0 {
        (info_ref.si_pid(), info_ref.si_uid() as u32)
    } else {
        (0, 0)
    };
    CrashContext {
        pid: libc::getpid(),
        signo,
        si_code,
        si_addr,
        si_pid,
        si_uid,
        ucontext_ptr: ucontext as usize,
    }
}

/// Prints a short notice instead of attempting a full dump: the handler
/// crashed while already handling a crash, and a second fork dance risks
/// never terminating.
///
/// # Safety
/// `info` must be the kernel-supplied `siginfo_t` for the signal delivery
/// currently being handled.
unsafe fn handle_reentrant_crash(signo: i32, info: &siginfo_t) {
    let mut buf = [0u8; 256];
    let mut cursor = ScratchCursor::new(&mut buf);
    cursor.append_text(b"faultlog: handler re-entered while reporting signal ");
    cursor.append_signo(signo);
    cursor.append_text(b" (");
    cursor.append_sigreason(info);
    cursor.append_text(b"); skipping diagnostics for this crash.\n");
    dumpers::write_out(libc::STDERR_FILENO, cursor.as_bytes());
}

/// Prints a short notice that the handler has now run a third time and is
/// giving up rather than risk never terminating.
fn handle_terminal_crash(signo: i32) {
    let mut buf = [0u8; 256];
    let mut cursor = ScratchCursor::new(&mut buf);
    cursor.append_text(b"faultlog: handler re-entered a second time while reporting signal ");
    cursor.append_signo(signo);
    cursor.append_text(b"; giving up.\n");
    dumpers::write_out(libc::STDERR_FILENO, cursor.as_bytes());
}

/// Steps 1-6 of the fork dance: everything that must happen in the
/// original process, still in signal context, before any fork.
///
/// # Safety
/// `info` must be the kernel-supplied `siginfo_t` for the signal delivery
/// currently being handled.
unsafe fn handle_first_crash(ctx: CrashContext, info: &siginfo_t) {
    let config = config::current();

    let log_path = config.and_then(|cfg| {
        let timestamp_suffix = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        crashlog::create_log_file(&cfg.log_base_path, &timestamp_suffix)
    });
    let teed = log_path
        .as_deref()
        .map(crashlog::tee_outputs_to)
        .unwrap_or(false);

    emit_header(ctx, info, config, log_path.as_deref(), teed);

    if let Some(cfg) = config {
        if cfg.beep_on_abort {
            beep();
        }
        if cfg.stop_on_abort {
            // Safety: raising SIGSTOP on ourselves is always permitted;
            // this is a deliberate debug-attach point, distinct from the
            // SIGSTOP used later to freeze for the grandchild.
            libc::raise(libc::SIGSTOP);
        }
    }

    fork_dance(ctx);
}

fn emit_header(
    ctx: CrashContext,
    info: &siginfo_t,
    config: Option<&ConfigRecord>,
    log_path: Option<&str>,
    teed: bool,
) {
    let mut buf = [0u8; 512];
    let mut cursor = ScratchCursor::new(&mut buf);
    cursor.append_text(b"[ pid=");
    cursor.append_decimal(ctx.pid as u64);
    cursor.append_text(b", timestamp=");
    cursor.append_decimal(unix_time_now());
    cursor.append_text(b" ] Process aborted! signo=");
    cursor.append_signo(ctx.signo);
    cursor.append_text(b", reason=");
    cursor.append_sigreason(info);
    cursor.append_text(b"\n");
    dumpers::write_out(libc::STDERR_FILENO, cursor.as_bytes());

    if let Some(cfg) = config {
        if let Some(name) = &cfg.app_name {
            write_optional_line(b"app.name=", name.as_bytes());
        }
        if let Some(version) = &cfg.app_version {
            write_optional_line(b"app.version=", version.as_bytes());
        }
        if let Some(url) = &cfg.bugreport_url {
            write_optional_line(b"bugreport.url=", url.as_bytes());
        }
    }

    match log_path {
        Some(path) if teed => write_optional_line(b"crash.log=", path.as_bytes()),
        _ => {
            dumpers::write_out(libc::STDERR_FILENO, b"dumping to stderr only\n");
        }
    }
}

fn write_optional_line(prefix: &[u8], value: &[u8]) {
    let mut buf = [0u8; 512];
    let mut cursor = ScratchCursor::new(&mut buf);
    cursor.append_text(prefix);
    cursor.append_text(value);
    cursor.append_text(b"\n");
    dumpers::write_out(libc::STDERR_FILENO, cursor.as_bytes());
}

/// Seconds since the epoch, fetched with the async-signal-safe `time(2)`
/// rather than `SystemTime::now()`.
fn unix_time_now() -> u64 {
    // Safety: a null tloc pointer is the documented way to skip the
    // out-param and just use the return value.
    let t = unsafe { libc::time(std::ptr::null_mut()) };
    t.max(0) as u64
}

/// Forks `beep` (falling back to `osascript` on macOS) to make the crash
/// audible; failures are silently ignored, this is a convenience, not a
/// diagnostic.
fn beep() {
    use faultlog_common::unix_utils::PreparedExecve;

    // Safety: this fork only execs a fire-and-forget helper; the child
    // never returns to Rust code that could unwind into the crash.
    let pid = unsafe { safe_fork() };
    if pid == 0 {
        let candidates: &[&[&str]] = if cfg!(target_os = "macos") {
            &[&["osascript", "-e", "beep"]]
        } else {
            &[&["beep"], &["/usr/bin/beep"]]
        };
        for argv in candidates {
            if let Ok(prepared) = PreparedExecve::new(argv) {
                // Safety: prepared was validated by PreparedExecve::new.
                unsafe { prepared.exec() };
            }
        }
        // Safety: every candidate failed to exec.
        unsafe { libc::_exit(127) };
    }
}

fn fork_dance(ctx: CrashContext) {
    // Safety: this is the one fork the handler itself performs; the
    // child below touches only async-signal-safe functions until it
    // resets its own handlers in run_intermediate.
    let intermediate_pid = unsafe { safe_fork() };
    if intermediate_pid < 0 {
        // Couldn't even start the dance; the trailing raise() in
        // handle_signal still terminates the process correctly.
        return;
    }
    if intermediate_pid == 0 {
        run_intermediate(ctx);
        // Safety: _exit avoids re-running any destructors in this fork.
        unsafe { libc::_exit(0) };
    }

    // Original process: freeze here so the grandchild can read an exact
    // snapshot of our memory and registers, then wait to be resumed.
    // Safety: raising SIGSTOP on ourselves is always permitted.
    unsafe { libc::raise(libc::SIGSTOP) };
}

fn run_intermediate(ctx: CrashContext) {
    // Safety: select() with null fd sets and a timeout is on the
    // async-signal-safe list; this gives the kernel time to finish
    // stopping the original process before the grandchild inspects it.
    let mut tv = libc::timeval {
        tv_sec: 0,
        tv_usec: INTERMEDIATE_SLEEP.as_micros() as libc::suseconds_t,
    };
    unsafe {
        libc::select(
            0,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            &mut tv,
        )
    };

    // Safety: this subordinate inherited the crash handler's installed
    // dispositions and the interrupted thread's mask from fork(); it must
    // run with ordinary signal semantics before doing any real work.
    unsafe { reset_handlers_and_mask(&HANDLED_SIGNALS) };

    // Safety: same contract as the outer fork in fork_dance.
    let grandchild_pid = unsafe { safe_fork() };
    if grandchild_pid == 0 {
        run_grandchild(ctx);
        // Safety: the grandchild must never unwind back into anything
        // resembling the crashing process's call stack.
        unsafe { libc::_exit(0) };
    }
    // The intermediate exits without waiting, so the grandchild reparents
    // to init rather than staying a child of a stopped process.
}

fn run_grandchild(ctx: CrashContext) {
    if let Some(config) = config::current() {
        let dump_ctx = DumpContext {
            out_fd: libc::STDERR_FILENO,
            pid: ctx.pid,
            signo: ctx.signo,
            si_code: ctx.si_code,
            si_addr: ctx.si_addr,
            si_pid: ctx.si_pid,
            si_uid: ctx.si_uid,
            ucontext_ptr: ctx.ucontext_ptr,
            config,
        };
        dumpers::dump_all(&dump_ctx);
    } else {
        dumpers::write_out(
            libc::STDERR_FILENO,
            b"faultlog: no configuration was published before this crash\n",
        );
    }

    // Safety: ctx.pid is the original process, currently stopped by the
    // SIGSTOP raised in fork_dance; SIGCONT resumes it so it can re-raise
    // its original signal and actually terminate.
    unsafe { libc::kill(ctx.pid, libc::SIGCONT) };
}
