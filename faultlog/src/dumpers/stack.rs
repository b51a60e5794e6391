// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Raw stack-word dump around the faulting stack pointer.

use super::{write_out, write_section_header, DumpContext};
use crate::format::ScratchCursor;

/// Words printed on either side of the stack pointer. Kept small and
/// fixed so the dump stays bounded even on a badly corrupted stack.
const WORDS: usize = 16;

pub fn dump(ctx: &DumpContext) {
    write_section_header(ctx.out_fd, "STACK");
    if ctx.ucontext_ptr == 0 {
        write_out(ctx.out_fd, b"(no ucontext available)\n");
        return;
    }
    // Safety: see registers::dump.
    let sp = unsafe { stack_pointer(ctx.ucontext_ptr as *const libc::ucontext_t) };
    if sp == 0 {
        write_out(ctx.out_fd, b"(stack pointer not available on this architecture)\n");
        return;
    }

    let word_size = std::mem::size_of::<usize>();
    let mut buf = [0u8; 4096];
    let mut cursor = ScratchCursor::new(&mut buf);
    for i in 0..WORDS {
        let addr = sp + i * word_size;
        cursor.append_pointer(addr);
        cursor.append_text(b": ");
        // Safety: reading raw memory near the faulting SP may legitimately
        // fault again (stack overflow, wild pointer); this is guarded by
        // the fact that this dumper runs in the already-forked
        // grandchild, so a second SIGSEGV here is caught by the
        // still-installed handler rather than corrupting the original
        // process.
        match unsafe { read_word(addr) } {
            Some(word) => cursor.append_pointer(word),
            None => cursor.append_text(b"<unreadable>"),
        };
        cursor.append_text(b"\n");
    }
    write_out(ctx.out_fd, cursor.as_bytes());
}

#[cfg(target_arch = "x86_64")]
unsafe fn stack_pointer(uctx: *const libc::ucontext_t) -> usize {
    (*uctx).uc_mcontext.gregs[libc::REG_RSP as usize] as usize
}

#[cfg(target_arch = "aarch64")]
unsafe fn stack_pointer(uctx: *const libc::ucontext_t) -> usize {
    (*uctx).uc_mcontext.sp as usize
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
unsafe fn stack_pointer(_uctx: *const libc::ucontext_t) -> usize {
    0
}

/// Reads one word from `addr`, tolerating an unmapped page by checking
/// alignment and relying on the caller's fork isolation rather than a
/// signal-safe probe: a fault here re-enters this crate's own handler.
unsafe fn read_word(addr: usize) -> Option<usize> {
    if addr % std::mem::align_of::<usize>() != 0 {
        return None;
    }
    Some(std::ptr::read_unaligned(addr as *const usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_a_known_local() {
        let local: usize = 0xdead_beef;
        let addr = &local as *const usize as usize;
        // Safety: addr points at a live local for the duration of this call.
        let word = unsafe { read_word(addr) };
        assert_eq!(word, Some(0xdead_beef));
    }
}
