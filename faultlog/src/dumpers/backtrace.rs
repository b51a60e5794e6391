// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stack backtrace, captured with the `backtrace` crate and piped through
//! the configured external demangler (component C5).

use super::{write_out, write_section_header, DumpContext};
use crate::sanitizer::sanitize_backtrace;

/// Deep enough for real recursion bugs, shallow enough that a runaway
/// recursive crash doesn't produce an unbounded report.
const MAX_FRAMES: usize = 512;

pub fn dump(ctx: &DumpContext) {
    write_section_header(ctx.out_fd, "BACKTRACE");

    let raw = capture_raw_backtrace();
    if raw.is_empty() {
        write_out(ctx.out_fd, b"(no backtrace available)\n");
        return;
    }

    let sanitizer_command = ctx.config.sanitizer_command.to_str().unwrap_or("cat");
    let program_info = ctx.config.sanitizer_passes_program_info.then(|| {
        let path = std::env::current_exe()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        (ctx.pid, path)
    });
    let sanitized = sanitize_backtrace(
        &raw,
        sanitizer_command,
        program_info.as_ref().map(|(pid, path)| (*pid, path.as_str())),
    );
    write_out(ctx.out_fd, sanitized.as_bytes());
    write_out(ctx.out_fd, b"\n");
}

fn capture_raw_backtrace() -> String {
    let mut raw = String::new();
    let mut frame_no = 0usize;
    backtrace::trace(|frame| {
        let ip = frame.ip() as usize;
        let mut resolved_any = false;
        backtrace::resolve_frame(frame, |symbol| {
            resolved_any = true;
            let name = symbol
                .name()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "???".to_string());
            raw.push_str(&format!("#{frame_no:<3} 0x{ip:016x} {name}\n"));
        });
        if !resolved_any {
            raw.push_str(&format!("#{frame_no:<3} 0x{ip:016x} <unknown>\n"));
        }
        frame_no += 1;
        frame_no < MAX_FRAMES
    });
    raw
}
