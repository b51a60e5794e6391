// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Assertion-failure interception.
//!
//! Rather than overriding the libc `assert()` symbol, which only works
//! for C/C++ code linked into the same binary and is fragile across
//! platforms, callers record an assertion failure through the
//! [`fault_assert!`] macro before raising `SIGABRT` themselves. The
//! handler then finds the recorded [`crate::state::AssertRecord`] and
//! includes it in the dump exactly as if it had decoded the condition
//! from a libc callback.

use crate::state::{record_assert_failure, AssertRecord};

/// Records `expression`/`filename`/`line`/`function`/`message` as the
/// pending assertion failure and raises `SIGABRT`, never returning.
///
/// Prefer the [`fault_assert!`] macro, which fills in everything but
/// `message` for you.
pub fn trigger(
    expression: &str,
    filename: &str,
    line: u32,
    function: Option<&str>,
    message: Option<String>,
) -> ! {
    record_assert_failure(AssertRecord {
        expression: expression.to_string(),
        filename: filename.to_string(),
        line,
        function: function.map(str::to_string),
        message,
    });
    // Safety: abort() is documented to raise SIGABRT and never return;
    // the handler installed by this crate intercepts it from here.
    unsafe { libc::abort() }
}

/// Expands to the name of the enclosing function, using the well-known
/// `type_name_of_val` trick since `std` has no stable `function!()` macro.
#[macro_export]
#[doc(hidden)]
macro_rules! __fault_function_name {
    () => {{
        fn marker() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(marker);
        name.strip_suffix("::marker").unwrap_or(name)
    }};
}

/// Evaluates `cond` and, if false, records it as an assertion failure and
/// raises `SIGABRT` through [`trigger`]. Otherwise a no-op.
#[macro_export]
macro_rules! fault_assert {
    ($cond:expr $(,)?) => {
        if !($cond) {
            $crate::assert_trap::trigger(
                stringify!($cond),
                file!(),
                line!(),
                Some($crate::__fault_function_name!()),
                None,
            )
        }
    };
    ($cond:expr, $msg:expr $(,)?) => {
        if !($cond) {
            $crate::assert_trap::trigger(
                stringify!($cond),
                file!(),
                line!(),
                Some($crate::__fault_function_name!()),
                Some(String::from($msg)),
            )
        }
    };
}
