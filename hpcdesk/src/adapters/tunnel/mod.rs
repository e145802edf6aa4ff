// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use crate::app::errors::{AppError, AppErrorKind, AppResult};

pub mod embedded;
pub mod openssh;

pub use embedded::EmbeddedTunnel;
pub use openssh::OpenSshTunnel;

pub const LOOPBACK: &str = "127.0.0.1";

/// Opens byte streams to `port` on the loopback interface of a compute
/// node, reached through the gateway.
#[async_trait]
pub trait StreamDialer: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn dial(&self, node: &str, port: u16) -> anyhow::Result<Self::Stream>;
}

pub(crate) async fn bind_local(port: u16) -> AppResult<TcpListener> {
    TcpListener::bind((LOOPBACK, port)).await.map_err(|err| {
        AppError::of(
            AppErrorKind::TunnelEstablishFailed,
            format!("local port {port} is not available: {err}"),
        )
    })
}
