// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::anyhow;
use russh::client::Config;
use russh::keys::known_hosts::{learn_known_hosts, learn_known_hosts_path};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

mod auth;
mod exec;
mod forward;

/// russh client handler; the only thing we customize is host key checking.
#[derive(Clone, Debug)]
struct ClientHandler {
    host: String,
    addr: SocketAddr,
}

impl ClientHandler {
    fn new(host: String, addr: SocketAddr) -> Self {
        Self { host, addr }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;
    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        verify_server_key(&self.host, self.addr, server_public_key, None)
    }
}

/// Parameters for establishing the SSH connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SshParams {
    /// Original hostname or IP used for known_hosts lookup.
    pub host: String,
    pub addr: SocketAddr,
    pub username: String,
    pub identity_path: Option<String>,
    /// Preferred submethods hint for keyboard-interactive (often unused by servers).
    pub ki_submethods: Option<String>,
    /// 0 disables keepalives.
    pub keepalive_secs: u64,
}

fn check_known_hosts_for(
    host: &str,
    port: u16,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<bool, russh::keys::Error> {
    match known_hosts_path {
        Some(path) => russh::keys::check_known_hosts_path(host, port, key, path),
        None => russh::keys::check_known_hosts(host, port, key),
    }
}

fn learn_known_hosts_for(
    host: &str,
    port: u16,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<(), russh::keys::Error> {
    match known_hosts_path {
        Some(path) => learn_known_hosts_path(host, port, key, path),
        None => learn_known_hosts(host, port, key),
    }
}

/// Accepts keys already in known_hosts (under the name or the IP) and
/// learns unknown ones. A changed key is an error.
fn verify_server_key(
    host: &str,
    addr: SocketAddr,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<bool, anyhow::Error> {
    let port = addr.port();
    let ip_host = addr.ip().to_string();
    let mut candidates = vec![host.to_string()];
    if ip_host != host {
        candidates.push(ip_host);
    }

    for candidate in &candidates {
        match check_known_hosts_for(candidate, port, key, known_hosts_path) {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!("server key validation failed for {candidate}:{port}: {err}");
                return Err(anyhow!(
                    "server key validation failed for {candidate}:{port}: {err}"
                ));
            }
        }
    }

    tracing::info!(
        "server key for {host}:{port} is not present in known_hosts (tried {}); learning",
        candidates.join(", ")
    );
    learn_known_hosts_for(host, port, key, known_hosts_path).map_err(|err| {
        tracing::warn!("failed to learn server key for {host}:{port}: {err}");
        anyhow!("failed to learn server key for {host}:{port}: {err}")
    })?;
    Ok(true)
}

/// Owns the single long-lived SSH connection to one gateway.
pub struct SessionManager {
    params: SshParams,
    config: Arc<Config>,
    // Commands are serialized through this lock.
    handle: Arc<Mutex<Option<russh::client::Handle<ClientHandler>>>>,
    keepalive_task_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl SessionManager {
    pub fn new(params: SshParams) -> Self {
        let keepalive = (params.keepalive_secs > 0).then(|| Duration::from_secs(params.keepalive_secs));
        let cfg = Config {
            // Forwarded connections may sit idle for a long time.
            inactivity_timeout: None,
            keepalive_interval: keepalive,
            channel_buffer_size: 64,
            window_size: 1024 * 1024,
            ..Default::default()
        };
        Self {
            params,
            config: Arc::new(cfg),
            handle: Arc::new(Mutex::new(None)),
            keepalive_task_handle: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn needs_connect(&self) -> bool {
        let handle_field = self.handle.lock().await;
        match handle_field.as_ref() {
            None => true,
            Some(h) if h.is_closed() => true,
            Some(_) => false,
        }
    }

    pub fn matches_params(&self, params: &SshParams) -> bool {
        self.params == *params
    }

    /// Drops the connection. Returns whether one was open.
    pub async fn shutdown(&self) -> bool {
        if let Some(task) = self.keepalive_task_handle.lock().await.take() {
            task.abort();
        }
        let mut handle_field = self.handle.lock().await;
        let Some(handle) = handle_field.take() else {
            return false;
        };
        if let Err(err) = handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!("ssh disconnect failed: {err}");
        }
        true
    }
}
