// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::types::SessionState;

/// User-facing progress reporting. Purely observational.
pub trait ProgressPort: Send + Sync {
    fn step(&self, state: SessionState, message: &str);
    /// Scheduler status text while waiting for a node.
    fn status(&self, text: &str);
    fn warn(&self, message: &str);
}

#[cfg(test)]
#[derive(Clone, Default)]
pub struct NoopProgress;

#[cfg(test)]
impl ProgressPort for NoopProgress {
    fn step(&self, _state: SessionState, _message: &str) {}
    fn status(&self, _text: &str) {}
    fn warn(&self, _message: &str) {}
}
