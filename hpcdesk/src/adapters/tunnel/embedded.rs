// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! In-process forwarder: a local listener whose connections are relayed
//! to the backend through the control connection. Lives only as long as
//! this process does.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};

use super::{LOOPBACK, StreamDialer, bind_local};
use crate::app::errors::{AppError, AppErrorKind, AppResult};
use crate::app::ports::TunnelPort;
use crate::app::types::TunnelSpec;

/// How long a fresh relay must stay up before the chain counts as open.
const CHECK_GRACE: Duration = Duration::from_secs(2);
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

pub struct EmbeddedTunnel<D: StreamDialer> {
    dialer: Arc<D>,
    check_grace: Duration,
    listeners: Mutex<HashMap<u16, JoinHandle<()>>>,
}

impl<D: StreamDialer> EmbeddedTunnel<D> {
    pub fn new(dialer: D) -> Self {
        Self {
            dialer: Arc::new(dialer),
            check_grace: CHECK_GRACE,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn with_check_grace(mut self, grace: Duration) -> Self {
        self.check_grace = grace;
        self
    }

    /// A relay that fails further along (node unreachable, nothing
    /// listening) ends its stream right away. One that is still open after
    /// the grace period, or that already sent something, reaches the backend.
    async fn check_route(&self, node: &str, port: u16) -> anyhow::Result<()> {
        let mut stream = self.dialer.dial(node, port).await?;
        let mut first = [0u8; 1];
        match tokio::time::timeout(self.check_grace, stream.read(&mut first)).await {
            Err(_) => Ok(()),
            Ok(Ok(0)) => bail!("relay closed before reaching the backend"),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(err.into()),
        }
    }
}

#[async_trait]
impl<D: StreamDialer> TunnelPort for EmbeddedTunnel<D> {
    #[tracing::instrument(
        name = "tunnel",
        level = "debug",
        skip(self, spec),
        fields(op = "open", mode = "embedded", local_port = spec.local_port, node = %spec.compute_node)
    )]
    async fn open(&self, spec: &TunnelSpec) -> AppResult<()> {
        let listener = bind_local(spec.local_port).await?;
        // A failed check drops the listener, so nothing stays half open.
        self.check_route(&spec.compute_node, spec.remote_port)
            .await
            .map_err(|err| {
                AppError::of(
                    AppErrorKind::TunnelEstablishFailed,
                    format!(
                        "cannot reach port {} on {} through the gateway: {err:#}",
                        spec.remote_port, spec.compute_node
                    ),
                )
            })?;

        let task = tokio::spawn(relay(
            listener,
            self.dialer.clone(),
            spec.compute_node.clone(),
            spec.remote_port,
        ));
        if let Some(previous) = self.listeners.lock().await.insert(spec.local_port, task) {
            previous.abort();
        }
        tracing::info!(
            "forwarding {LOOPBACK}:{} to {LOOPBACK}:{} on {}",
            spec.local_port,
            spec.remote_port,
            spec.compute_node
        );
        Ok(())
    }

    #[tracing::instrument(
        name = "tunnel",
        level = "debug",
        skip(self),
        fields(op = "close", mode = "embedded")
    )]
    async fn close(&self, local_port: u16) -> AppResult<()> {
        let task = self.listeners.lock().await.remove(&local_port);
        if let Some(task) = task {
            task.abort();
            // Wait so the listener is released before we return.
            let _ = task.await;
            tracing::debug!("closed forwarder on port {local_port}");
        }
        Ok(())
    }

    fn is_foreground(&self) -> bool {
        true
    }
}

/// Failed accepts (EMFILE and the like) are retried after a pause.
async fn accept_with_backoff<F, Fut, T>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(err) => {
                tracing::warn!("accept failed: {err}");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

/// Accept loop. Dropping it (abort) also aborts every relayed connection.
async fn relay<D: StreamDialer>(listener: TcpListener, dialer: Arc<D>, node: String, port: u16) {
    let listener = &listener;
    let mut connections = JoinSet::new();
    loop {
        while connections.try_join_next().is_some() {}
        let (mut inbound, peer) = accept_with_backoff(move || listener.accept()).await;
        let dialer = dialer.clone();
        let node = node.clone();
        connections.spawn(async move {
            let mut outbound = match dialer.dial(&node, port).await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!("cannot relay {peer} to {node} port {port}: {err:#}");
                    return;
                }
            };
            match tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await {
                Ok((sent, received)) => {
                    tracing::debug!("connection from {peer} closed sent={sent} received={received}")
                }
                Err(err) => tracing::debug!("connection from {peer} ended: {err}"),
            }
        });
    }
}
