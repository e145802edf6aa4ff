// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::app::errors::{AppResult, invalid_input};
use crate::app::types::SshConfig;

use super::{SessionManager, SshParams};

/// Keeps one `SessionManager` per session name so every command of a run
/// shares the same authenticated connection.
pub struct SessionCache {
    sessions: RwLock<HashMap<String, Arc<SessionManager>>>,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCache {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn remove_and_shutdown(&self, name: &str) -> bool {
        let session = self.sessions.write().await.remove(name);
        match session {
            Some(session) => session.shutdown().await,
            None => false,
        }
    }

    pub async fn get_or_create(&self, config: &SshConfig) -> AppResult<Arc<SessionManager>> {
        let params = to_params(config)?;
        let Some(session_name) = config.session_name.as_deref() else {
            return Ok(Arc::new(SessionManager::new(params)));
        };

        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(session_name) {
            if existing.matches_params(&params) {
                return Ok(existing.clone());
            }
        }
        let session = Arc::new(SessionManager::new(params));
        if let Some(replaced) = sessions.insert(session_name.to_string(), session.clone()) {
            replaced.shutdown().await;
        }
        Ok(session)
    }
}

fn to_params(config: &SshConfig) -> AppResult<SshParams> {
    if config.username.trim().is_empty() {
        return Err(invalid_input("username", "must not be empty"));
    }
    if config.host.trim().is_empty() {
        return Err(invalid_input("host", "must not be empty"));
    }
    Ok(SshParams {
        host: config.host.clone(),
        addr: config.addr,
        username: config.username.clone(),
        identity_path: config.identity_path.clone(),
        ki_submethods: config.ki_submethods.clone(),
        keepalive_secs: config.keepalive_secs,
    })
}
