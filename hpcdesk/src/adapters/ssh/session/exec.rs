// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result, anyhow};
use russh::ChannelMsg;

use super::SessionManager;

/// Folds one channel message into the captured output.
/// Returns true once the channel is closed.
fn handle_capture_message(
    msg: &ChannelMsg,
    out: &mut Vec<u8>,
    err: &mut Vec<u8>,
    code: &mut i32,
) -> bool {
    match msg {
        ChannelMsg::Data { data } => {
            out.extend_from_slice(data);
            false
        }
        ChannelMsg::ExtendedData { data, ext: 1 } => {
            err.extend_from_slice(data);
            false
        }
        ChannelMsg::ExitStatus { exit_status } => {
            *code = *exit_status as i32;
            false
        }
        ChannelMsg::ExitSignal { signal_name, .. } => {
            err.extend_from_slice(format!("killed by signal {signal_name:?}").as_bytes());
            *code = -1;
            false
        }
        ChannelMsg::Close => true,
        _ => false,
    }
}

impl SessionManager {
    /// Runs `cmd` in a fresh session channel; returns (stdout, stderr, exit code).
    pub async fn exec_capture(&self, cmd: &str) -> Result<(Vec<u8>, Vec<u8>, i32)> {
        let guard = self.handle.lock().await;
        let handle = guard.as_ref().ok_or_else(|| anyhow!("SSH handle lost"))?;
        let mut chan = handle
            .channel_open_session()
            .await
            .context("open session")?;
        tracing::trace!("executing '{}'", cmd);
        chan.exec(true, cmd).await.context("exec request")?;
        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut code: i32 = 0;
        while let Some(msg) = chan.wait().await {
            if handle_capture_message(&msg, &mut out, &mut err, &mut code) {
                break;
            }
        }

        let _ = chan.close().await;
        Ok((out, err, code))
    }
}
