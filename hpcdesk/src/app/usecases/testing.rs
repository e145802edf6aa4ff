// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Hand-written port fakes shared by the use case tests.

use std::collections::{BTreeSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use time::macros::datetime;
use tokio::sync::watch;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{
    ClockPort, ExecCapture, MfaPort, PreferencesStorePort, RemoteExecPort, SessionStorePort,
    TunnelPort,
};
use crate::app::types::{
    JobHandle, MfaAnswer, MfaPrompt, RequestDraft, ResourceRequest, SessionRecord, SshConfig,
    TunnelSpec,
};

pub(crate) fn ssh_config() -> SshConfig {
    SshConfig {
        session_name: Some("c1".to_string()),
        host: "login.example.org".to_string(),
        addr: SocketAddr::from(([10, 0, 0, 1], 22)),
        username: "alice".to_string(),
        identity_path: None,
        ki_submethods: None,
        keepalive_secs: 0,
    }
}

pub(crate) fn ok(stdout: &str) -> ExecCapture {
    ExecCapture {
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
        exit_code: 0,
    }
}

pub(crate) fn exit(code: i32, stderr: &str) -> ExecCapture {
    ExecCapture {
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
        exit_code: code,
    }
}

pub(crate) fn transport_error(message: &str) -> AppError {
    AppError::with_message(
        AppErrorKind::ConnectionSetupFailed,
        codes::REMOTE_ERROR,
        message,
    )
}

struct Rule {
    prefix: String,
    responses: VecDeque<AppResult<ExecCapture>>,
}

/// Answers commands by prefix. Each rule hands out its responses in order
/// and keeps repeating the last one; unknown commands succeed silently.
pub(crate) struct ScriptedRemote {
    rules: Mutex<Vec<Rule>>,
    commands: Mutex<Vec<String>>,
    connected: Mutex<bool>,
    connect_error: Mutex<Option<AppError>>,
    connect_calls: Mutex<usize>,
    disconnect_calls: Mutex<usize>,
}

impl ScriptedRemote {
    pub(crate) fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            connected: Mutex::new(false),
            connect_error: Mutex::new(None),
            connect_calls: Mutex::new(0),
            disconnect_calls: Mutex::new(0),
        }
    }

    pub(crate) fn on(&self, prefix: &str, responses: Vec<AppResult<ExecCapture>>) {
        assert!(!responses.is_empty(), "rule for {prefix} needs a response");
        self.rules.lock().expect("rules lock").push(Rule {
            prefix: prefix.to_string(),
            responses: VecDeque::from(responses),
        });
    }

    pub(crate) fn fail_connect(&self, err: AppError) {
        *self.connect_error.lock().expect("connect_error lock") = Some(err);
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("commands lock").clone()
    }

    pub(crate) fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|command| command.starts_with(prefix))
            .collect()
    }

    pub(crate) fn connect_calls(&self) -> usize {
        *self.connect_calls.lock().expect("connect_calls lock")
    }

    pub(crate) fn disconnect_calls(&self) -> usize {
        *self.disconnect_calls.lock().expect("disconnect_calls lock")
    }
}

#[async_trait]
impl RemoteExecPort for ScriptedRemote {
    async fn ensure_connected(&self, _config: &SshConfig, _mfa: &dyn MfaPort) -> AppResult<()> {
        *self.connect_calls.lock().expect("connect_calls lock") += 1;
        if let Some(err) = self.connect_error.lock().expect("connect_error lock").clone() {
            return Err(err);
        }
        *self.connected.lock().expect("connected lock") = true;
        Ok(())
    }

    async fn exec_capture(&self, _config: &SshConfig, command: &str) -> AppResult<ExecCapture> {
        if !*self.connected.lock().expect("connected lock") {
            return Err(transport_error("not connected"));
        }
        self.commands
            .lock()
            .expect("commands lock")
            .push(command.to_string());
        let mut rules = self.rules.lock().expect("rules lock");
        let Some(rule) = rules
            .iter_mut()
            .find(|rule| command.starts_with(&rule.prefix))
        else {
            return Ok(ok(""));
        };
        if rule.responses.len() > 1 {
            rule.responses.pop_front().expect("non-empty responses")
        } else {
            rule.responses.front().cloned().expect("non-empty responses")
        }
    }

    async fn needs_connect(&self, _config: &SshConfig) -> AppResult<bool> {
        Ok(!*self.connected.lock().expect("connected lock"))
    }

    async fn disconnect(&self, _config: &SshConfig) -> AppResult<bool> {
        *self.disconnect_calls.lock().expect("disconnect_calls lock") += 1;
        let mut connected = self.connected.lock().expect("connected lock");
        let was_connected = *connected;
        *connected = false;
        Ok(was_connected)
    }
}

/// Expects exactly this sequence of commands, in order.
pub(crate) struct SequencedRemoteExec {
    captures: Mutex<VecDeque<(String, AppResult<ExecCapture>)>>,
}

impl SequencedRemoteExec {
    pub(crate) fn new(captures: Vec<(String, AppResult<ExecCapture>)>) -> Self {
        Self {
            captures: Mutex::new(VecDeque::from(captures)),
        }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.captures.lock().expect("captures lock").len()
    }
}

#[async_trait]
impl RemoteExecPort for SequencedRemoteExec {
    async fn ensure_connected(&self, _config: &SshConfig, _mfa: &dyn MfaPort) -> AppResult<()> {
        Ok(())
    }

    async fn exec_capture(&self, _config: &SshConfig, command: &str) -> AppResult<ExecCapture> {
        let mut captures = self.captures.lock().expect("captures lock");
        let Some((expected, result)) = captures.pop_front() else {
            panic!("unexpected command: {command}");
        };
        assert_eq!(command, expected);
        result
    }

    async fn needs_connect(&self, _config: &SshConfig) -> AppResult<bool> {
        Ok(false)
    }

    async fn disconnect(&self, _config: &SshConfig) -> AppResult<bool> {
        panic!("disconnect should not be called in sequenced tests");
    }
}

#[derive(Default)]
pub(crate) struct MemorySessionStore {
    record: Mutex<Option<SessionRecord>>,
    pending: Mutex<Option<JobHandle>>,
}

impl MemorySessionStore {
    pub(crate) fn record(&self) -> Option<SessionRecord> {
        self.record.lock().expect("record lock").clone()
    }

    pub(crate) fn pending(&self) -> Option<JobHandle> {
        self.pending.lock().expect("pending lock").clone()
    }
}

impl SessionStorePort for MemorySessionStore {
    fn load_record(&self) -> AppResult<Option<SessionRecord>> {
        Ok(self.record())
    }

    fn save_record(&self, record: &SessionRecord) -> AppResult<()> {
        *self.record.lock().expect("record lock") = Some(record.clone());
        Ok(())
    }

    fn load_pending(&self) -> AppResult<Option<JobHandle>> {
        Ok(self.pending())
    }

    fn save_pending(&self, handle: &JobHandle) -> AppResult<()> {
        *self.pending.lock().expect("pending lock") = Some(handle.clone());
        Ok(())
    }

    fn clear(&self) -> AppResult<()> {
        *self.record.lock().expect("record lock") = None;
        *self.pending.lock().expect("pending lock") = None;
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MemoryPreferences {
    stored: Mutex<RequestDraft>,
}

impl MemoryPreferences {
    pub(crate) fn with(draft: RequestDraft) -> Self {
        Self {
            stored: Mutex::new(draft),
        }
    }

    pub(crate) fn stored(&self) -> RequestDraft {
        self.stored.lock().expect("stored lock").clone()
    }
}

impl PreferencesStorePort for MemoryPreferences {
    fn load(&self) -> AppResult<RequestDraft> {
        Ok(self.stored())
    }

    fn save(&self, request: &ResourceRequest) -> AppResult<()> {
        *self.stored.lock().expect("stored lock") = RequestDraft::from(request);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeTunnel {
    open_ports: Mutex<BTreeSet<u16>>,
    opened: Mutex<Vec<TunnelSpec>>,
    closed: Mutex<Vec<u16>>,
    open_error: Mutex<Option<AppError>>,
    interrupt: Mutex<Option<watch::Sender<bool>>>,
}

impl FakeTunnel {
    pub(crate) fn fail_open(&self, err: AppError) {
        *self.open_error.lock().expect("open_error lock") = Some(err);
    }

    /// Raises the cancel flag once a tunnel is up, like a Ctrl-C arriving
    /// just as `open` returns.
    pub(crate) fn interrupt_on_open(&self, tx: watch::Sender<bool>) {
        *self.interrupt.lock().expect("interrupt lock") = Some(tx);
    }

    pub(crate) fn open_ports(&self) -> Vec<u16> {
        self.open_ports
            .lock()
            .expect("open_ports lock")
            .iter()
            .copied()
            .collect()
    }

    pub(crate) fn opened(&self) -> Vec<TunnelSpec> {
        self.opened.lock().expect("opened lock").clone()
    }

    pub(crate) fn closed(&self) -> Vec<u16> {
        self.closed.lock().expect("closed lock").clone()
    }
}

#[async_trait]
impl TunnelPort for FakeTunnel {
    async fn open(&self, spec: &TunnelSpec) -> AppResult<()> {
        if let Some(err) = self.open_error.lock().expect("open_error lock").clone() {
            return Err(err);
        }
        let mut ports = self.open_ports.lock().expect("open_ports lock");
        if !ports.insert(spec.local_port) {
            return Err(AppError::of(
                AppErrorKind::TunnelEstablishFailed,
                format!("local port {} already in use", spec.local_port),
            ));
        }
        self.opened.lock().expect("opened lock").push(spec.clone());
        if let Some(tx) = self.interrupt.lock().expect("interrupt lock").as_ref() {
            let _ = tx.send(true);
        }
        Ok(())
    }

    async fn close(&self, local_port: u16) -> AppResult<()> {
        self.open_ports
            .lock()
            .expect("open_ports lock")
            .remove(&local_port);
        self.closed.lock().expect("closed lock").push(local_port);
        Ok(())
    }
}

pub(crate) struct FixedClock;

impl ClockPort for FixedClock {
    fn now_utc(&self) -> OffsetDateTime {
        datetime!(2026-01-02 03:04:05 UTC)
    }

    fn process_id(&self) -> u32 {
        4242
    }
}

/// Job name produced by `FixedClock` with the default prefix.
pub(crate) const FIXED_JOB_NAME: &str = "hpcdesk-1767323045-4242";

pub(crate) struct NoMfa;

#[async_trait]
impl MfaPort for NoMfa {
    async fn answer(&self, _prompt: &MfaPrompt) -> AppResult<MfaAnswer> {
        Ok(MfaAnswer {
            responses: Vec::new(),
        })
    }
}

pub(crate) fn request() -> ResourceRequest {
    ResourceRequest {
        account: "proj-a".to_string(),
        duration_hours: 2,
        cpu_count: 4,
        memory_gb: 16,
        wants_accelerator: false,
        container_image_path: "/images/desk.sif".to_string(),
        backend_version: "2.1".to_string(),
        remote_port: 9000,
        local_port: 19000,
    }
}
