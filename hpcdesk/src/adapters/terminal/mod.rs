// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

mod console;
mod mfa;
mod progress;

pub use console::{print_failure, print_success, print_warning};
pub use mfa::TerminalMfa;
pub use progress::ConsoleProgress;
