// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use time::OffsetDateTime;

/// Time and process identity source.
/// Job names are derived from both, so tests pin them.
pub trait ClockPort: Send + Sync {
    fn now_utc(&self) -> OffsetDateTime;
    fn process_id(&self) -> u32;
}
