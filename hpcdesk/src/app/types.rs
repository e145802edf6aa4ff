// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;
use std::net::SocketAddr;

/// Connection parameters for the gateway host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshConfig {
    /// Key for the session cache; `None` means "never reuse".
    pub session_name: Option<String>,
    pub host: String,
    pub addr: SocketAddr,
    pub username: String,
    pub identity_path: Option<String>,
    pub ki_submethods: Option<String>,
    pub keepalive_secs: u64,
}

/// Validated resources for one session. Built by `ResourceRequestBuilder` only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub account: String,
    pub duration_hours: u32,
    pub cpu_count: u32,
    pub memory_gb: u32,
    pub wants_accelerator: bool,
    pub container_image_path: String,
    pub backend_version: String,
    pub remote_port: u16,
    pub local_port: u16,
}

/// Unvalidated resource fields, as read from preferences or flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestDraft {
    pub account: Option<String>,
    pub duration_hours: Option<String>,
    pub cpu_count: Option<String>,
    pub memory_gb: Option<String>,
    pub wants_accelerator: Option<String>,
    pub container_image_path: Option<String>,
    pub backend_version: Option<String>,
    pub remote_port: Option<String>,
    pub local_port: Option<String>,
}

impl RequestDraft {
    /// Fields set in `overrides` win; everything else keeps the current value.
    pub fn overlay(self, overrides: RequestDraft) -> RequestDraft {
        RequestDraft {
            account: overrides.account.or(self.account),
            duration_hours: overrides.duration_hours.or(self.duration_hours),
            cpu_count: overrides.cpu_count.or(self.cpu_count),
            memory_gb: overrides.memory_gb.or(self.memory_gb),
            wants_accelerator: overrides.wants_accelerator.or(self.wants_accelerator),
            container_image_path: overrides
                .container_image_path
                .or(self.container_image_path),
            backend_version: overrides.backend_version.or(self.backend_version),
            remote_port: overrides.remote_port.or(self.remote_port),
            local_port: overrides.local_port.or(self.local_port),
        }
    }
}

impl From<&ResourceRequest> for RequestDraft {
    fn from(request: &ResourceRequest) -> Self {
        RequestDraft {
            account: Some(request.account.clone()),
            duration_hours: Some(request.duration_hours.to_string()),
            cpu_count: Some(request.cpu_count.to_string()),
            memory_gb: Some(request.memory_gb.to_string()),
            wants_accelerator: Some(request.wants_accelerator.to_string()),
            container_image_path: Some(request.container_image_path.clone()),
            backend_version: Some(request.backend_version.clone()),
            remote_port: Some(request.remote_port.to_string()),
            local_port: Some(request.local_port.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: String,
    pub job_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedNode {
    pub hostname: String,
}

/// The node column of a scheduler status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeField {
    /// Absent or a sentinel such as `NONE`.
    Unassigned,
    /// Present but empty.
    Empty,
    Assigned(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobObservation {
    pub state: String,
    pub node: NodeField,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinUrl(pub String);

impl JoinUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JoinUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The persisted description of a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub node: String,
    pub job_id: String,
    pub remote_port: u16,
    pub local_port: u16,
    /// As emitted by the backend, before rewriting.
    pub join_url: JoinUrl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    pub gateway_host: String,
    pub compute_node: String,
    pub remote_port: u16,
    pub local_port: u16,
}

impl TunnelSpec {
    pub fn for_record(gateway_host: &str, record: &SessionRecord) -> Self {
        TunnelSpec {
            gateway_host: gateway_host.to_string(),
            compute_node: record.node.clone(),
            remote_port: record.remote_port,
            local_port: record.local_port,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Requesting,
    Allocating,
    Launching,
    DiscoveringEndpoint,
    Tunneling,
    Ready,
    Failed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Requesting => "requesting",
            SessionState::Allocating => "allocating",
            SessionState::Launching => "launching",
            SessionState::DiscoveringEndpoint => "discovering_endpoint",
            SessionState::Tunneling => "tunneling",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Failed)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, Requesting)
            | (Requesting, Allocating)
            | (Allocating, Launching)
            | (Launching, DiscoveringEndpoint)
            | (DiscoveringEndpoint, Tunneling)
            | (Tunneling, Ready) => true,
            (Ready | Failed, Idle) => true,
            (Idle, Idle) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-(user, cluster) scratch locations on the shared filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePaths {
    pub workdir: String,
}

impl RemotePaths {
    pub fn new(home: &str, remote_workdir: &str, cluster: &str) -> Self {
        let base = if remote_workdir.starts_with('/') {
            remote_workdir.trim_end_matches('/').to_string()
        } else {
            format!(
                "{}/{}",
                home.trim_end_matches('/'),
                remote_workdir.trim_matches('/')
            )
        };
        RemotePaths {
            workdir: format!("{base}/{cluster}"),
        }
    }

    pub fn node_file(&self) -> String {
        format!("{}/node", self.workdir)
    }

    pub fn scheduler_stdout(&self) -> String {
        format!("{}/slurm-%j.out", self.workdir)
    }

    pub fn scheduler_stderr(&self) -> String {
        format!("{}/slurm-%j.err", self.workdir)
    }

    pub fn backend_log(&self, job_id: &str) -> String {
        format!("{}/backend-{job_id}.log", self.workdir)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfaPrompt {
    pub name: String,
    pub instructions: String,
    pub prompts: Vec<Prompt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    pub echo: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfaAnswer {
    pub responses: Vec<String>,
}

/// What `status` reports about the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub record: Option<SessionRecord>,
    pub pending: Option<JobHandle>,
    pub observation: Option<JobObservation>,
}
