// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use russh::ChannelStream;
use russh::client::Msg;

use crate::adapters::tunnel::{LOOPBACK, StreamDialer};
use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ExecCapture, MfaPort, RemoteExecPort};
use crate::app::services::shell::sh_escape;
use crate::app::types::SshConfig;

mod error;
mod session;

pub mod session_cache;

use session_cache::SessionCache;

pub use error::AuthenticationFailure;
use session::{SessionManager, SshParams};

/// The control channel: one russh connection per configured gateway.
#[derive(Clone, Default)]
pub struct SshAdapter {
    sessions: Arc<SessionCache>,
}

impl SshAdapter {
    /// Dialer for forwarded connections over this adapter's connection.
    pub fn dialer(&self, config: &SshConfig) -> SshDialer {
        SshDialer {
            sessions: self.sessions.clone(),
            config: config.clone(),
        }
    }
}

fn ssh_error_code(err: &anyhow::Error) -> &'static str {
    if err.chain().any(|cause| cause.is::<AuthenticationFailure>()) {
        codes::AUTHENTICATION_FAILURE
    } else {
        codes::CONNECTION_SETUP_FAILED
    }
}

fn map_exec_error(err: anyhow::Error) -> AppError {
    AppError::with_message(
        AppErrorKind::ConnectionSetupFailed,
        codes::REMOTE_ERROR,
        format!("ssh exec failed: {err}"),
    )
}

fn map_connect_error(err: anyhow::Error) -> AppError {
    AppError::with_message(
        AppErrorKind::ConnectionSetupFailed,
        ssh_error_code(&err),
        format!("ssh connect failed: {err:#}"),
    )
}

#[async_trait]
impl RemoteExecPort for SshAdapter {
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, config, mfa),
        fields(op = "ensure_connected", host = %config.host, user = %config.username, port = config.addr.port())
    )]
    async fn ensure_connected(&self, config: &SshConfig, mfa: &dyn MfaPort) -> AppResult<()> {
        let session = self.sessions.get_or_create(config).await?;
        session
            .ensure_connected(mfa)
            .await
            .map_err(map_connect_error)
    }

    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, config, command),
        fields(op = "exec_capture", host = %config.host, user = %config.username, port = config.addr.port())
    )]
    async fn exec_capture(&self, config: &SshConfig, command: &str) -> AppResult<ExecCapture> {
        let session = self.sessions.get_or_create(config).await?;
        let (stdout, stderr, exit_code) = session
            .exec_capture(command)
            .await
            .map_err(map_exec_error)?;
        tracing::debug!(exit_code, "remote command finished");
        Ok(ExecCapture {
            stdout,
            stderr,
            exit_code,
        })
    }

    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, config),
        fields(op = "needs_connect", host = %config.host, user = %config.username, port = config.addr.port())
    )]
    async fn needs_connect(&self, config: &SshConfig) -> AppResult<bool> {
        let session = self.sessions.get_or_create(config).await?;
        Ok(session.needs_connect().await)
    }

    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, config),
        fields(op = "disconnect", host = %config.host)
    )]
    async fn disconnect(&self, config: &SshConfig) -> AppResult<bool> {
        let Some(name) = config.session_name.as_deref() else {
            return Ok(false);
        };
        Ok(self.sessions.remove_and_shutdown(name).await)
    }
}

const NODE_CONNECT_TIMEOUT_SECS: u32 = 10;

/// Runs on the gateway. The node's own sshd connects to its loopback, so
/// the backend never has to listen on a routable address.
pub(crate) fn node_forward_command(node: &str, port: u16) -> String {
    format!(
        "exec ssh -o BatchMode=yes -o ConnectTimeout={NODE_CONNECT_TIMEOUT_SECS} \
-o StrictHostKeyChecking=accept-new -W {LOOPBACK}:{port} -- {}",
        sh_escape(node)
    )
}

/// Reaches the backend through the gateway: one exec channel per
/// connection, each running `ssh -W` toward the compute node.
#[derive(Clone)]
pub struct SshDialer {
    sessions: Arc<SessionCache>,
    config: SshConfig,
}

#[async_trait]
impl StreamDialer for SshDialer {
    type Stream = ChannelStream<Msg>;

    async fn dial(&self, node: &str, port: u16) -> anyhow::Result<Self::Stream> {
        let session = self.sessions.get_or_create(&self.config).await?;
        if session.needs_connect().await {
            bail!("control connection to {} is not established", self.config.host);
        }
        session
            .open_exec_stream(&node_forward_command(node, port))
            .await
            .with_context(|| format!("relay to {node} port {port}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn auth_failures_get_their_own_code() {
        let err = anyhow::Error::from(AuthenticationFailure).context("connect");
        let mapped = map_connect_error(err);
        assert_eq!(mapped.kind(), AppErrorKind::ConnectionSetupFailed);
        assert_eq!(mapped.code(), codes::AUTHENTICATION_FAILURE);

        let mapped = map_connect_error(anyhow!("connection refused"));
        assert_eq!(mapped.code(), codes::CONNECTION_SETUP_FAILED);
        assert!(mapped.message().contains("connection refused"));
    }

    #[test]
    fn node_forward_ends_on_the_node_loopback() {
        assert_eq!(
            node_forward_command("n001", 9000),
            "exec ssh -o BatchMode=yes -o ConnectTimeout=10 \
-o StrictHostKeyChecking=accept-new -W 127.0.0.1:9000 -- 'n001'"
        );
        assert!(node_forward_command("n0; rm -rf ~", 1).ends_with("-- 'n0; rm -rf ~'"));
    }

    #[tokio::test]
    async fn unnamed_config_has_nothing_to_disconnect() {
        let adapter = SshAdapter::default();
        let config = SshConfig {
            session_name: None,
            host: "login.example.org".to_string(),
            addr: std::net::SocketAddr::from(([10, 0, 0, 1], 22)),
            username: "alice".to_string(),
            identity_path: None,
            ki_submethods: None,
            keepalive_secs: 0,
        };
        assert!(!adapter.disconnect(&config).await.unwrap());
        assert!(adapter.needs_connect(&config).await.unwrap());
    }

    #[tokio::test]
    async fn dialer_requires_a_connection() {
        let adapter = SshAdapter::default();
        let config = SshConfig {
            session_name: Some("c1".to_string()),
            host: "login.example.org".to_string(),
            addr: std::net::SocketAddr::from(([10, 0, 0, 1], 22)),
            username: "alice".to_string(),
            identity_path: None,
            ki_submethods: None,
            keepalive_secs: 0,
        };
        let err = adapter
            .dialer(&config)
            .dial("n001", 9000)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("not established"));
    }
}
