// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Small platform-utility crate shared between the handler core and its
//! subordinate processes: safe forking, bounded waits, prepared `execve`
//! argument vectors, and C-string helpers usable in `const` contexts.

#[macro_use]
pub mod cstr;
pub mod timeout;
pub mod unix_utils;

pub use timeout::TimeoutManager;
