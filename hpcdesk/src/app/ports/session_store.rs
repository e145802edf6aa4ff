// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::errors::AppResult;
use crate::app::types::{JobHandle, SessionRecord};

/// Local persistence for the active session of one (user, cluster) pair.
///
/// Two records are kept: the pending job, written as soon as the scheduler
/// accepts a submission, and the full session record, written once the
/// session is ready. Writes replace the previous file atomically.
pub trait SessionStorePort: Send + Sync {
    fn load_record(&self) -> AppResult<Option<SessionRecord>>;
    fn save_record(&self, record: &SessionRecord) -> AppResult<()>;
    fn load_pending(&self) -> AppResult<Option<JobHandle>>;
    fn save_pending(&self, handle: &JobHandle) -> AppResult<()>;
    /// Removes both records. Succeeds when there is nothing to remove.
    fn clear(&self) -> AppResult<()>;
}
