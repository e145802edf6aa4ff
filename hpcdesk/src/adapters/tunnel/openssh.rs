// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Tunnel through the system `ssh` client. `-f` backgrounds (and detaches)
//! the client once every forward is in place, so the tunnel outlives us.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::{LOOPBACK, bind_local};
use crate::app::errors::{AppError, AppErrorKind, AppResult};
use crate::app::ports::TunnelPort;
use crate::app::types::{SshConfig, TunnelSpec};

const SERVER_ALIVE_INTERVAL_SECS: u32 = 30;
const LOG_TAIL_LINES: usize = 5;

pub struct OpenSshTunnel {
    ssh_binary: String,
    pkill_binary: String,
    username: String,
    gateway_port: u16,
    identity_path: Option<String>,
    log_path: PathBuf,
}

impl OpenSshTunnel {
    pub fn new(ssh_binary: &str, config: &SshConfig, log_path: PathBuf) -> Self {
        Self {
            ssh_binary: ssh_binary.to_string(),
            pkill_binary: "pkill".to_string(),
            username: config.username.clone(),
            gateway_port: config.addr.port(),
            identity_path: config.identity_path.clone(),
            log_path,
        }
    }

    #[cfg(test)]
    fn with_pkill(mut self, pkill_binary: &str) -> Self {
        self.pkill_binary = pkill_binary.to_string();
        self
    }

    /// Identifies the client process of the tunnel on `local_port`.
    pub fn signature(local_port: u16) -> String {
        format!("-L {LOOPBACK}:{local_port}:")
    }

    pub fn command_args(&self, spec: &TunnelSpec) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            "-N".to_string(),
            "-o".to_string(),
            "ExitOnForwardFailure=yes".to_string(),
            "-o".to_string(),
            format!("ServerAliveInterval={SERVER_ALIVE_INTERVAL_SECS}"),
            "-E".to_string(),
            self.log_path.to_string_lossy().into_owned(),
        ];
        if let Some(identity) = &self.identity_path {
            args.push("-i".to_string());
            args.push(identity.clone());
        }
        args.push("-J".to_string());
        args.push(format!(
            "{}@{}:{}",
            self.username, spec.gateway_host, self.gateway_port
        ));
        args.push("-L".to_string());
        args.push(format!(
            "{LOOPBACK}:{}:{LOOPBACK}:{}",
            spec.local_port, spec.remote_port
        ));
        args.push(format!("{}@{}", self.username, spec.compute_node));
        args
    }

    async fn log_tail(&self) -> String {
        match tokio::fs::read_to_string(&self.log_path).await {
            Ok(contents) => {
                let lines: Vec<&str> = contents.lines().collect();
                let start = lines.len().saturating_sub(LOG_TAIL_LINES);
                lines[start..].join("; ")
            }
            Err(_) => String::new(),
        }
    }
}

#[async_trait]
impl TunnelPort for OpenSshTunnel {
    #[tracing::instrument(
        name = "tunnel",
        level = "debug",
        skip(self, spec),
        fields(op = "open", mode = "openssh", local_port = spec.local_port, node = %spec.compute_node)
    )]
    async fn open(&self, spec: &TunnelSpec) -> AppResult<()> {
        // ssh would only notice after authenticating.
        drop(bind_local(spec.local_port).await?);

        if let Some(parent) = self.log_path.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                tracing::debug!("cannot create {}: {err}", parent.display());
            }
        }
        // `-E` appends; only this attempt's diagnostics may be quoted.
        if let Err(err) = tokio::fs::File::create(&self.log_path).await {
            tracing::debug!("cannot truncate {}: {err}", self.log_path.display());
        }
        let args = self.command_args(spec);
        tracing::debug!("spawning {} {}", self.ssh_binary, args.join(" "));
        // stdin stays attached so ssh can ask for passwords on the terminal.
        let status = Command::new(&self.ssh_binary)
            .args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|err| {
                AppError::of(
                    AppErrorKind::TunnelEstablishFailed,
                    format!("failed to run {}: {err}", self.ssh_binary),
                )
            })?;
        if !status.success() {
            let tail = self.log_tail().await;
            return Err(AppError::of(
                AppErrorKind::TunnelEstablishFailed,
                format!("ssh exited with {status}: {tail}"),
            ));
        }
        Ok(())
    }

    #[tracing::instrument(
        name = "tunnel",
        level = "debug",
        skip(self),
        fields(op = "close", mode = "openssh")
    )]
    async fn close(&self, local_port: u16) -> AppResult<()> {
        let signature = Self::signature(local_port);
        let status = Command::new(&self.pkill_binary)
            .args(["-f", "--", &signature])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|err| {
                AppError::of(
                    AppErrorKind::Internal,
                    format!("failed to run {}: {err}", self.pkill_binary),
                )
            })?;
        // 1 means nothing matched.
        match status.code() {
            Some(0) => {
                tracing::info!("closed tunnel on port {local_port}");
                Ok(())
            }
            Some(1) => Ok(()),
            _ => Err(AppError::of(
                AppErrorKind::Internal,
                format!("pkill exited with {status}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::path::Path;

    fn config() -> SshConfig {
        SshConfig {
            session_name: Some("c1".to_string()),
            host: "login.example.org".to_string(),
            addr: SocketAddr::from(([10, 0, 0, 1], 2222)),
            username: "alice".to_string(),
            identity_path: Some("/home/alice/.ssh/id_ed25519".to_string()),
            ki_submethods: None,
            keepalive_secs: 0,
        }
    }

    fn spec(local_port: u16) -> TunnelSpec {
        TunnelSpec {
            gateway_host: "login.example.org".to_string(),
            compute_node: "n001".to_string(),
            remote_port: 9000,
            local_port,
        }
    }

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind((LOOPBACK, 0)).unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn command_jumps_through_gateway() {
        let tunnel = OpenSshTunnel::new("ssh", &config(), PathBuf::from("/tmp/t.log"));
        let args = tunnel.command_args(&spec(19000)).join(" ");
        assert!(args.starts_with("-f -N -o ExitOnForwardFailure=yes -o ServerAliveInterval=30"));
        assert!(args.contains("-i /home/alice/.ssh/id_ed25519"));
        assert!(args.contains("-J alice@login.example.org:2222"));
        assert!(args.contains("-L 127.0.0.1:19000:127.0.0.1:9000 alice@n001"));
        assert!(args.contains(&OpenSshTunnel::signature(19000)));
    }

    #[tokio::test]
    async fn occupied_port_fails_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let held = std::net::TcpListener::bind((LOOPBACK, 0)).unwrap();
        let port = held.local_addr().unwrap().port();
        let tunnel = OpenSshTunnel::new(
            "/nonexistent/ssh",
            &config(),
            dir.path().join("tunnel.log"),
        );
        let err = tunnel.open(&spec(port)).await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::TunnelEstablishFailed);
        assert!(err.message().contains("not available"));
    }

    /// A client that logs a forwarding failure to its `-E` file and exits 255.
    fn failing_client(dir: &Path) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-ssh");
        std::fs::write(
            &path,
            "#!/bin/sh\n\
while [ $# -gt 0 ]; do\n\
  if [ \"$1\" = -E ]; then echo 'channel 0: open failed: connect failed' >> \"$2\"; fi\n\
  shift\n\
done\n\
exit 255\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn failing_client_reports_log_tail() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("tunnel.log");
        let tunnel = OpenSshTunnel::new(&failing_client(dir.path()), &config(), log);
        let err = tunnel.open(&spec(free_port())).await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::TunnelEstablishFailed);
        assert!(err.message().contains("open failed"), "{}", err.message());
    }

    #[tokio::test]
    async fn earlier_runs_are_not_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("tunnel.log");
        std::fs::write(&log, "alice@n001: Permission denied (publickey).\n").unwrap();
        let tunnel = OpenSshTunnel::new("false", &config(), log.clone());
        let err = tunnel.open(&spec(free_port())).await.unwrap_err();
        assert!(!err.message().contains("Permission denied"), "{}", err.message());
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "");
    }

    #[tokio::test]
    async fn successful_client_opens() {
        let dir = tempfile::tempdir().unwrap();
        let tunnel = OpenSshTunnel::new("true", &config(), dir.path().join("tunnel.log"));
        tunnel.open(&spec(free_port())).await.unwrap();
    }

    #[tokio::test]
    async fn close_treats_no_match_as_success() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("tunnel.log");
        let matched = OpenSshTunnel::new("ssh", &config(), log.clone()).with_pkill("true");
        matched.close(19000).await.unwrap();
        let unmatched = OpenSshTunnel::new("ssh", &config(), log.clone()).with_pkill("false");
        unmatched.close(19000).await.unwrap();
        let missing =
            OpenSshTunnel::new("ssh", &config(), log).with_pkill("/nonexistent/pkill");
        assert!(missing.close(19000).await.is_err());
    }
}
