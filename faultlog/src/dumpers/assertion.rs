// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Prints the [`crate::state::AssertRecord`] recorded by
//! [`crate::assert_trap`], if this crash was a failed assertion rather
//! than a raw fault.

use super::{write_out, write_section_header, DumpContext};
use crate::state::current_assert;

pub fn dump(ctx: &DumpContext) {
    let Some(record) = current_assert() else {
        return;
    };

    write_section_header(ctx.out_fd, "ASSERTION");
    write_out(
        ctx.out_fd,
        format!(
            "Last assertion failure: ({}), file {}, line {}.\n",
            record.expression, record.filename, record.line
        )
        .as_bytes(),
    );
    if let Some(function) = &record.function {
        write_out(ctx.out_fd, format!("  in {function}\n").as_bytes());
    }
    if let Some(message) = &record.message {
        write_out(ctx.out_fd, format!("  {message}\n").as_bytes());
    }
}
