// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::errors::AppResult;
use crate::app::types::{RequestDraft, ResourceRequest};

/// Last validated request, reused as defaults on the next run.
pub trait PreferencesStorePort: Send + Sync {
    /// Returns an empty draft when nothing was saved yet.
    fn load(&self) -> AppResult<RequestDraft>;
    fn save(&self, request: &ResourceRequest) -> AppResult<()>;
}
