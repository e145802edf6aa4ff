// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Mutex;

use super::console::{print_failure, print_plain, print_success, print_warning};
use crate::app::ports::ProgressPort;
use crate::app::types::SessionState;

/// Progress on stderr; stdout is reserved for the join URL.
#[derive(Default)]
pub struct ConsoleProgress {
    last_status: Mutex<Option<String>>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressPort for ConsoleProgress {
    fn step(&self, state: SessionState, message: &str) {
        let printed = match state {
            SessionState::Failed => print_failure(message),
            _ => print_success(message),
        };
        if let Err(err) = printed {
            tracing::debug!("progress output failed: {err}");
        }
    }

    fn status(&self, text: &str) {
        // Only changes are worth a line.
        if let Ok(mut last) = self.last_status.lock() {
            if last.as_deref() == Some(text) {
                return;
            }
            *last = Some(text.to_string());
        }
        if let Err(err) = print_plain(&format!("  scheduler: {text}")) {
            tracing::debug!("progress output failed: {err}");
        }
    }

    fn warn(&self, message: &str) {
        if let Err(err) = print_warning(message) {
            tracing::debug!("progress output failed: {err}");
        }
    }
}
