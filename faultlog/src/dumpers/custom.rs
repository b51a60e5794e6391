// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Custom diagnostics: either a fixed string set through
//! `ConfigBuilder::custom_diagnostics_data`, or the return value of a
//! callback set through `ConfigBuilder::custom_diagnostics_callback`,
//! called with that same data.

use super::{write_out, write_section_header, DumpContext};
use crate::subprocess::run_subprocess;

/// Callback invocations get the same deadline as an external dumper:
/// application code that reaches this far into a crash is already
/// suspect, and a hang here must not block the rest of the report.
const CALLBACK_TIME_LIMIT_MS: u64 = 2000;

pub fn dump(ctx: &DumpContext) {
    let has_data = ctx.config.custom_diagnostics_data.is_some();
    let has_callback = ctx.config.custom_diagnostics_callback.is_some();
    if !has_data && !has_callback {
        return;
    }

    write_section_header(ctx.out_fd, "CUSTOM DIAGNOSTICS");

    if let Some(data) = &ctx.config.custom_diagnostics_data {
        write_out(ctx.out_fd, data.as_bytes());
        write_out(ctx.out_fd, b"\n");
    }

    if let Some(callback) = ctx.config.custom_diagnostics_callback {
        let data = ctx.config.custom_diagnostics_data.as_deref();
        let result = run_subprocess(CALLBACK_TIME_LIMIT_MS, |write_fd| {
            let text = callback(data);
            // Safety: write_fd is the pipe handed to us by run_subprocess.
            unsafe { libc::write(write_fd, text.as_ptr().cast(), text.len()) };
        });
        if result.timed_out {
            write_out(ctx.out_fd, b"(custom diagnostics callback timed out)\n");
        } else {
            write_out(ctx.out_fd, &result.output);
            write_out(ctx.out_fd, b"\n");
        }
    }
}
