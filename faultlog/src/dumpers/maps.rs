// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `/proc/<pid>/maps` memory-map dump.

use super::{run_external, write_out, write_section_header, DumpContext};

pub fn dump(ctx: &DumpContext) {
    write_section_header(ctx.out_fd, "MEMORY MAP");

    if cfg!(target_os = "linux") {
        let path = format!("/proc/{}/maps", ctx.pid);
        let output = run_cat(&path);
        if !output.is_empty() {
            write_out(ctx.out_fd, &output);
            return;
        }
    }
    write_out(ctx.out_fd, b"(memory map unavailable on this platform)\n");
}

fn run_cat(path: &str) -> Vec<u8> {
    let candidates: [&[&str]; 2] = [&["/bin/cat", path], &["/usr/bin/cat", path]];
    run_external(200, &candidates)
}
