// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use super::step_error;
use crate::app::errors::{AppErrorKind, AppResult};
use crate::app::ports::TunnelPort;
use crate::app::services::join_url;
use crate::app::types::{JoinUrl, TunnelSpec};

#[derive(Clone)]
pub struct TunnelManager {
    tunnel: Arc<dyn TunnelPort>,
}

impl TunnelManager {
    pub fn new(tunnel: Arc<dyn TunnelPort>) -> Self {
        Self { tunnel }
    }

    pub async fn open(&self, spec: &TunnelSpec) -> AppResult<()> {
        tracing::info!(
            "opening tunnel localhost:{} -> {}:{} via {}",
            spec.local_port,
            spec.compute_node,
            spec.remote_port,
            spec.gateway_host
        );
        self.tunnel.open(spec).await.map_err(|err| {
            if err.kind() == AppErrorKind::TunnelEstablishFailed {
                err
            } else {
                step_error(AppErrorKind::TunnelEstablishFailed, "tunnel", err)
            }
        })
    }

    /// The join URL as reachable from this machine.
    pub fn rewrite(&self, url: &JoinUrl, local_port: u16) -> AppResult<String> {
        join_url::rewrite_for_local(url, local_port)
    }

    pub async fn close(&self, local_port: u16) -> AppResult<()> {
        self.tunnel.close(local_port).await
    }

    /// Tunnels that die with this process need it kept alive after start.
    pub fn is_foreground(&self) -> bool {
        self.tunnel.is_foreground()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::errors::AppError;
    use crate::app::usecases::testing::FakeTunnel;

    fn spec() -> TunnelSpec {
        TunnelSpec {
            gateway_host: "login.example.org".to_string(),
            compute_node: "n001".to_string(),
            remote_port: 9000,
            local_port: 19000,
        }
    }

    #[tokio::test]
    async fn open_failure_is_tunnel_establish_failed() {
        let fake = Arc::new(FakeTunnel::default());
        fake.fail_open(AppError::of(AppErrorKind::Internal, "ssh exited with 255"));
        let err = TunnelManager::new(fake).open(&spec()).await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::TunnelEstablishFailed);
        assert!(err.message().contains("ssh exited with 255"));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let fake = Arc::new(FakeTunnel::default());
        let manager = TunnelManager::new(fake.clone());
        manager.open(&spec()).await.unwrap();
        manager.close(19000).await.unwrap();
        manager.close(19000).await.unwrap();
        assert!(fake.open_ports().is_empty());
    }

    #[test]
    fn rewrite_targets_local_port() {
        let manager = TunnelManager::new(Arc::new(FakeTunnel::default()));
        let url = JoinUrl("tcp://127.0.0.1:9000/b".to_string());
        assert_eq!(
            manager.rewrite(&url, 19000).unwrap(),
            "tcp://localhost:19000/b"
        );
    }
}
