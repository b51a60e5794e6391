// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Date, `uname`, and resource-limit preamble.

use super::{run_external, write_out, write_section_header, DumpContext};

const DATE: &[&[&str]] = &[&["/bin/date", "-u"], &["/usr/bin/date", "-u"]];
const UNAME: &[&[&str]] = &[&["/usr/bin/uname", "-a"], &["/bin/uname", "-a"]];

pub fn dump(ctx: &DumpContext) {
    write_section_header(ctx.out_fd, "PREAMBLE");

    let date = run_external(100, DATE);
    write_out(ctx.out_fd, b"date: ");
    write_out(ctx.out_fd, &date);

    let uname = run_external(100, UNAME);
    write_out(ctx.out_fd, b"uname: ");
    write_out(ctx.out_fd, &uname);

    write_ulimit(ctx);
}

/// `ulimit` is a shell builtin, not an external binary, so it has to be
/// asked for through `/bin/sh -c` rather than `run_external`'s direct
/// execve cascade.
fn write_ulimit(ctx: &DumpContext) {
    let output = super::run_external(100, &[&["/bin/sh", "-c", "ulimit -a"]]);
    write_out(ctx.out_fd, b"ulimit -a:\n");
    write_out(ctx.out_fd, &output);
}
