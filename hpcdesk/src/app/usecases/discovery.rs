// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use tokio::sync::watch;

use super::{ControlChannel, PollPolicy};
use crate::app::errors::{AppError, AppErrorKind, AppResult};
use crate::app::services::{container, join_url, wait};
use crate::app::types::JoinUrl;

/// Watches the backend log for the URL it announces once it is ready.
#[derive(Clone)]
pub struct EndpointDiscoverer {
    channel: ControlChannel,
    tail_lines: u32,
}

impl EndpointDiscoverer {
    pub fn new(channel: ControlChannel, tail_lines: u32) -> Self {
        Self {
            channel,
            tail_lines: tail_lines.max(1),
        }
    }

    /// Returns the last URL in the log tail at the first poll that shows one.
    pub async fn wait_for_join_url(
        &self,
        log_path: &str,
        policy: PollPolicy,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> AppResult<JoinUrl> {
        let command = container::tail_log_command(log_path, self.tail_lines);
        for attempt in 1..=policy.max_attempts {
            wait::ensure_not_cancelled(cancel_rx)?;
            match self.channel.run(&command).await {
                // A log that does not exist yet is just "nothing yet".
                Ok(capture) if capture.exit_code == 0 => {
                    if let Some(url) = join_url::find_last_join_url(&capture.stdout_text()) {
                        tracing::info!("backend announced {url} after {attempt} checks");
                        return Ok(url);
                    }
                }
                Ok(capture) => {
                    tracing::debug!(attempt, "log not readable yet: {}", capture.detail());
                }
                Err(err) => {
                    tracing::debug!(attempt, "log tail failed: {err}");
                }
            }
            if attempt < policy.max_attempts {
                wait::sleep_or_cancel(policy.interval, cancel_rx).await?;
            }
        }
        Err(AppError::of(
            AppErrorKind::BackendStartTimeout,
            format!(
                "no join url in {log_path} after {} checks",
                policy.max_attempts
            ),
        ))
    }
}
