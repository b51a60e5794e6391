// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Architecture-specific register dump.

use super::{write_out, write_section_header, DumpContext};
use crate::format::ScratchCursor;

pub fn dump(ctx: &DumpContext) {
    write_section_header(ctx.out_fd, "REGISTERS");
    if ctx.ucontext_ptr == 0 {
        write_out(ctx.out_fd, b"(no ucontext available)\n");
        return;
    }
    let mut buf = [0u8; 4096];
    let mut cursor = ScratchCursor::new(&mut buf);
    // Safety: ucontext_ptr was captured from the kernel-supplied
    // ucontext_t for this signal and is still valid because fork()
    // copied the memory it points into.
    unsafe { format_registers(&mut cursor, ctx.ucontext_ptr as *const libc::ucontext_t) };
    write_out(ctx.out_fd, cursor.as_bytes());
    write_out(ctx.out_fd, b"\n");
}

#[cfg(target_arch = "x86_64")]
unsafe fn format_registers(cursor: &mut ScratchCursor, uctx: *const libc::ucontext_t) {
    const NAMES: [(&str, usize); 17] = [
        ("rip", libc::REG_RIP as usize),
        ("rsp", libc::REG_RSP as usize),
        ("rbp", libc::REG_RBP as usize),
        ("rax", libc::REG_RAX as usize),
        ("rbx", libc::REG_RBX as usize),
        ("rcx", libc::REG_RCX as usize),
        ("rdx", libc::REG_RDX as usize),
        ("rsi", libc::REG_RSI as usize),
        ("rdi", libc::REG_RDI as usize),
        ("r8", libc::REG_R8 as usize),
        ("r9", libc::REG_R9 as usize),
        ("r10", libc::REG_R10 as usize),
        ("r11", libc::REG_R11 as usize),
        ("r12", libc::REG_R12 as usize),
        ("r13", libc::REG_R13 as usize),
        ("r14", libc::REG_R14 as usize),
        ("r15", libc::REG_R15 as usize),
    ];
    let gregs = (*uctx).uc_mcontext.gregs;
    for (name, idx) in NAMES {
        cursor.append_text(name.as_bytes());
        cursor.append_text(b"=");
        cursor.append_pointer(gregs[idx] as usize);
        cursor.append_text(b"\n");
    }
}

#[cfg(target_arch = "aarch64")]
unsafe fn format_registers(cursor: &mut ScratchCursor, uctx: *const libc::ucontext_t) {
    let mcontext = &(*uctx).uc_mcontext;
    for (i, reg) in mcontext.regs.iter().enumerate() {
        cursor.append_text(b"x");
        cursor.append_decimal(i as u64);
        cursor.append_text(b"=");
        cursor.append_pointer(*reg as usize);
        cursor.append_text(b"\n");
    }
    cursor.append_text(b"sp=");
    cursor.append_pointer(mcontext.sp as usize);
    cursor.append_text(b"\n");
    cursor.append_text(b"pc=");
    cursor.append_pointer(mcontext.pc as usize);
    cursor.append_text(b"\n");
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
unsafe fn format_registers(cursor: &mut ScratchCursor, _uctx: *const libc::ucontext_t) {
    cursor.append_text(b"(register dump not implemented for this architecture)\n");
}
