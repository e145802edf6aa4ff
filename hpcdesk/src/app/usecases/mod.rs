// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! The session orchestration core. Every component talks to the outside
//! world through the ports in `app::ports` only.

use std::sync::Arc;
use std::time::Duration;

use crate::app::errors::{AppError, AppErrorKind, AppResult};
use crate::app::ports::{ExecCapture, MfaPort, RemoteExecPort};
use crate::app::types::SshConfig;

pub mod discovery;
pub mod launcher;
pub mod lifecycle;
pub mod request;
pub mod scheduler;
pub mod tunnel;

#[cfg(test)]
pub(crate) mod testing;

pub use discovery::EndpointDiscoverer;
pub use launcher::{BackendLauncher, BackendSettings};
pub use lifecycle::{CleanupSummary, LifecyclePorts, LifecycleSettings, SessionLifecycle};
pub use request::ResourceRequestBuilder;
pub use scheduler::SchedulerClient;
pub use tunnel::TunnelManager;

/// Fixed-interval polling bounded by an attempt count. No backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }
}

/// The one authenticated connection to the gateway host, shared by every
/// component that runs remote commands.
#[derive(Clone)]
pub struct ControlChannel {
    remote_exec: Arc<dyn RemoteExecPort>,
    config: SshConfig,
}

impl ControlChannel {
    pub fn new(remote_exec: Arc<dyn RemoteExecPort>, config: SshConfig) -> Self {
        Self {
            remote_exec,
            config,
        }
    }

    pub async fn connect(&self, mfa: &dyn MfaPort) -> AppResult<()> {
        let needs_connect = self
            .remote_exec
            .needs_connect(&self.config)
            .await
            .map_err(as_connection_failure)?;
        if !needs_connect {
            return Ok(());
        }
        tracing::info!(
            "connecting to {} as {}",
            self.config.addr,
            self.config.username
        );
        self.remote_exec
            .ensure_connected(&self.config, mfa)
            .await
            .map_err(as_connection_failure)
    }

    pub async fn run(&self, command: &str) -> AppResult<ExecCapture> {
        tracing::debug!(command, "remote exec");
        self.remote_exec.exec_capture(&self.config, command).await
    }

    pub async fn disconnect(&self) -> AppResult<bool> {
        self.remote_exec.disconnect(&self.config).await
    }
}

fn as_connection_failure(err: AppError) -> AppError {
    match err.kind() {
        AppErrorKind::ConnectionSetupFailed | AppErrorKind::Cancelled => err,
        _ => AppError::with_message(
            AppErrorKind::ConnectionSetupFailed,
            err.code(),
            err.message().to_string(),
        ),
    }
}

/// Re-tags a collaborator error with the kind of the step it broke,
/// keeping the collaborator's message.
pub(crate) fn step_error(kind: AppErrorKind, what: &str, err: AppError) -> AppError {
    if err.kind() == AppErrorKind::Cancelled {
        return err;
    }
    AppError::of(kind, format!("{what}: {}", err.message()))
}
