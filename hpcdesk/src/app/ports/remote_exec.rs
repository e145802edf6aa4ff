// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::ports::MfaPort;
use crate::app::types::SshConfig;

#[derive(Debug, Clone, Default)]
pub struct ExecCapture {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl ExecCapture {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Trimmed stderr, falling back to stdout, then to the exit code.
    pub fn detail(&self) -> String {
        let err = String::from_utf8_lossy(&self.stderr);
        if !err.trim().is_empty() {
            return err.trim().to_string();
        }
        let out = String::from_utf8_lossy(&self.stdout);
        if !out.trim().is_empty() {
            return out.trim().to_string();
        }
        format!("exit code {}", self.exit_code)
    }
}

#[async_trait]
/// Remote command execution over the control channel to the gateway.
/// `exec_capture` requires a prior successful `ensure_connected`.
pub trait RemoteExecPort: Send + Sync {
    async fn ensure_connected(&self, config: &SshConfig, mfa: &dyn MfaPort) -> AppResult<()>;

    async fn exec_capture(&self, config: &SshConfig, command: &str) -> AppResult<ExecCapture>;

    async fn needs_connect(&self, config: &SshConfig) -> AppResult<bool>;

    /// Closes the control connection if one is open.
    async fn disconnect(&self, config: &SshConfig) -> AppResult<bool>;
}
