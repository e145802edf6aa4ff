// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

use tokio::sync::watch;

use crate::app::errors::{AppResult, cancelled};

/// Sleeps for `interval` unless cancellation is requested first.
/// A dropped sender means nobody can cancel any more; the sleep then completes.
pub async fn sleep_or_cancel(
    interval: Duration,
    cancel_rx: &mut watch::Receiver<bool>,
) -> AppResult<()> {
    ensure_not_cancelled(cancel_rx)?;
    if interval.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = tokio::time::sleep(interval) => Ok(()),
        changed = cancel_rx.changed() => {
            if changed.is_ok() && *cancel_rx.borrow() {
                Err(cancelled())
            } else {
                tokio::time::sleep(interval).await;
                Ok(())
            }
        }
    }
}

pub fn ensure_not_cancelled(cancel_rx: &watch::Receiver<bool>) -> AppResult<()> {
    if *cancel_rx.borrow() {
        Err(cancelled())
    } else {
        Ok(())
    }
}
