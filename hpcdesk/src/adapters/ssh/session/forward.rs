// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result, anyhow};
use russh::ChannelStream;
use russh::client::Msg;

use super::SessionManager;

impl SessionManager {
    /// Runs `cmd` on the gateway and hands back its stdin/stdout as one
    /// byte stream. Stderr is dropped.
    pub async fn open_exec_stream(&self, cmd: &str) -> Result<ChannelStream<Msg>> {
        let guard = self.handle.lock().await;
        let handle = guard.as_ref().ok_or_else(|| anyhow!("SSH handle lost"))?;
        let channel = handle
            .channel_open_session()
            .await
            .context("open session")?;
        tracing::trace!("streaming '{}'", cmd);
        channel.exec(true, cmd).await.context("exec request")?;
        Ok(channel.into_stream())
    }
}
