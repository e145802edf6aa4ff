// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

use super::{
    BackendLauncher, BackendSettings, ControlChannel, EndpointDiscoverer, PollPolicy,
    ResourceRequestBuilder, SchedulerClient, TunnelManager,
};
use crate::app::errors::{AppError, AppErrorKind, AppResult, cancelled};
use crate::app::ports::{
    ClockPort, MfaPort, PreferencesStorePort, ProgressPort, RemoteExecPort, SessionStorePort,
    TunnelPort,
};
use crate::app::services::wait;
use crate::app::types::{
    RemotePaths, RequestDraft, SessionRecord, SessionState, SessionStatus, SshConfig, TunnelSpec,
};

const HOME_DIR_COMMAND: &str = "printf '%s' \"$HOME\"";

pub struct LifecyclePorts {
    pub remote_exec: Arc<dyn RemoteExecPort>,
    pub mfa: Arc<dyn MfaPort>,
    pub sessions: Arc<dyn SessionStorePort>,
    pub preferences: Arc<dyn PreferencesStorePort>,
    pub tunnel: Arc<dyn TunnelPort>,
    pub clock: Arc<dyn ClockPort>,
    pub progress: Arc<dyn ProgressPort>,
}

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub ssh: SshConfig,
    pub cluster_name: String,
    /// Absolute, or relative to the remote home directory.
    pub remote_workdir: String,
    pub job_name_prefix: String,
    pub backend: BackendSettings,
    pub log_tail_lines: u32,
    pub allocation: PollPolicy,
    pub discovery: PollPolicy,
}

/// What a cleanup pass did. Problems are collected, never raised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub cancelled_jobs: Vec<String>,
    pub closed_ports: Vec<u16>,
    pub warnings: Vec<String>,
}

impl CleanupSummary {
    fn warn(&mut self, message: String) {
        tracing::warn!("cleanup: {message}");
        self.warnings.push(message);
    }
}

pub struct SessionLifecycle {
    channel: ControlChannel,
    mfa: Arc<dyn MfaPort>,
    sessions: Arc<dyn SessionStorePort>,
    progress: Arc<dyn ProgressPort>,
    requests: ResourceRequestBuilder,
    scheduler: SchedulerClient,
    launcher: BackendLauncher,
    discoverer: EndpointDiscoverer,
    tunnels: TunnelManager,
    settings: LifecycleSettings,
    state: Mutex<SessionState>,
    remote_paths: Mutex<Option<RemotePaths>>,
}

impl SessionLifecycle {
    pub fn new(ports: LifecyclePorts, settings: LifecycleSettings) -> Self {
        let channel = ControlChannel::new(ports.remote_exec, settings.ssh.clone());
        Self {
            requests: ResourceRequestBuilder::new(ports.preferences),
            scheduler: SchedulerClient::new(
                channel.clone(),
                ports.clock,
                &settings.job_name_prefix,
            ),
            launcher: BackendLauncher::new(channel.clone(), settings.backend.clone()),
            discoverer: EndpointDiscoverer::new(channel.clone(), settings.log_tail_lines),
            tunnels: TunnelManager::new(ports.tunnel),
            channel,
            mfa: ports.mfa,
            sessions: ports.sessions,
            progress: ports.progress,
            settings,
            state: Mutex::new(SessionState::Idle),
            remote_paths: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, next: SessionState, message: &str) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if !state.can_transition_to(next) {
                tracing::warn!("unexpected session transition {} -> {next}", *state);
            }
            tracing::info!(from = %*state, to = %next, "{message}");
            *state = next;
        }
        self.progress.step(next, message);
    }

    fn fail(&self, err: AppError) -> AppError {
        let step = self.state();
        let err = if err.context().is_none() {
            err.with_context(format!("step={step}"))
        } else {
            err
        };
        self.enter(SessionState::Failed, &err.to_string());
        err
    }

    /// Retires any previous session, then brings up a new one and returns
    /// its locally reachable join URL. On failure whatever was created is
    /// left for the next cleanup; an interrupt cleans up right away and
    /// returns a `Cancelled` error.
    pub async fn start(
        &self,
        overrides: RequestDraft,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> AppResult<String> {
        let summary = self.retire(false).await;
        if !summary.cancelled_jobs.is_empty() {
            self.progress.status(&format!(
                "retired previous session (job {})",
                summary.cancelled_jobs.join(", ")
            ));
        }
        let outcome = self
            .launch_sequence(overrides, cancel_rx)
            .await
            .and_then(|url| wait::ensure_not_cancelled(cancel_rx).map(|()| url));
        match outcome {
            Ok(url) => {
                self.enter(SessionState::Ready, &url);
                Ok(url)
            }
            Err(err) if err.kind() == AppErrorKind::Cancelled || *cancel_rx.borrow() => {
                Err(self.abandon(err).await)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Interrupted start: nothing it created may outlive this process.
    async fn abandon(&self, err: AppError) -> AppError {
        let step = self.state();
        self.fail(err);
        self.progress.warn("interrupted; releasing what was started");
        let summary = self.cleanup().await;
        for warning in &summary.warnings {
            self.progress.warn(warning);
        }
        if !summary.cancelled_jobs.is_empty() {
            self.progress.status(&format!(
                "cancelled job {}",
                summary.cancelled_jobs.join(", ")
            ));
        }
        cancelled().with_context(format!("step={step}"))
    }

    async fn launch_sequence(
        &self,
        overrides: RequestDraft,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> AppResult<String> {
        self.enter(SessionState::Requesting, "requesting an allocation");
        let request = self.requests.build(overrides)?;
        self.channel.connect(self.mfa.as_ref()).await?;
        let paths = self.remote_paths().await?;
        self.launcher.verify_backend(&request).await?;
        self.launcher.ensure_workdir(&paths).await?;
        wait::ensure_not_cancelled(cancel_rx)?;

        let handle = self.scheduler.submit(&request, &paths).await?;
        if let Err(err) = self.sessions.save_pending(&handle) {
            // Nobody could find this job later.
            self.scheduler.cancel(&handle.job_id).await;
            return Err(err);
        }

        self.enter(
            SessionState::Allocating,
            &format!("job {} submitted, waiting for a node", handle.job_id),
        );
        let node = self
            .scheduler
            .poll_for_node(
                &handle,
                self.settings.allocation,
                self.progress.as_ref(),
                cancel_rx,
            )
            .await?;

        self.enter(
            SessionState::Launching,
            &format!("starting backend on {}", node.hostname),
        );
        let log_path = self
            .launcher
            .launch(&node, &handle, &request, &paths)
            .await?;

        self.enter(
            SessionState::DiscoveringEndpoint,
            "waiting for the backend to announce its url",
        );
        let join_url = self
            .discoverer
            .wait_for_join_url(&log_path, self.settings.discovery, cancel_rx)
            .await?;

        self.enter(
            SessionState::Tunneling,
            &format!(
                "forwarding localhost:{} to {}:{}",
                request.local_port, node.hostname, request.remote_port
            ),
        );
        let record = SessionRecord {
            node: node.hostname,
            job_id: handle.job_id,
            remote_port: request.remote_port,
            local_port: request.local_port,
            join_url,
        };
        let local_url = self.tunnels.rewrite(&record.join_url, record.local_port)?;
        self.tunnels
            .open(&TunnelSpec::for_record(&self.settings.ssh.host, &record))
            .await?;
        self.sessions.save_record(&record)?;
        Ok(local_url)
    }

    /// Tears down everything a previous session may have left behind.
    /// Never fails; safe to repeat.
    pub async fn cleanup(&self) -> CleanupSummary {
        self.retire(true).await
    }

    async fn retire(&self, close_connection: bool) -> CleanupSummary {
        let mut summary = CleanupSummary::default();

        let record = match self.sessions.load_record() {
            Ok(record) => record,
            Err(err) => {
                summary.warn(format!("unreadable session record: {err}"));
                None
            }
        };
        let pending = match self.sessions.load_pending() {
            Ok(pending) => pending,
            Err(err) => {
                summary.warn(format!("unreadable pending job: {err}"));
                None
            }
        };

        let mut job_ids: Vec<String> = Vec::new();
        for id in record
            .as_ref()
            .map(|r| r.job_id.clone())
            .into_iter()
            .chain(pending.as_ref().map(|p| p.job_id.clone()))
        {
            if !job_ids.contains(&id) {
                job_ids.push(id);
            }
        }

        let mut ports: Vec<u16> = Vec::new();
        let requested_port = self
            .requests
            .defaults()
            .local_port
            .and_then(|raw| raw.trim().parse::<u16>().ok());
        for port in record.as_ref().map(|r| r.local_port).into_iter().chain(requested_port) {
            if !ports.contains(&port) {
                ports.push(port);
            }
        }

        let remote_ready = match self.channel.connect(self.mfa.as_ref()).await {
            Ok(()) => true,
            Err(err) => {
                summary.warn(format!("skipping remote cleanup: {err}"));
                false
            }
        };

        if remote_ready {
            for job_id in &job_ids {
                self.scheduler.cancel(job_id).await;
                summary.cancelled_jobs.push(job_id.clone());
            }
            if let Err(err) = self.launcher.kill_backends().await {
                summary.warn(format!("killing backends failed: {err}"));
            }
            match self.remote_paths().await {
                Ok(paths) => {
                    if let Err(err) = self.launcher.reset_workdir(&paths).await {
                        summary.warn(format!("resetting working directory failed: {err}"));
                    }
                }
                Err(err) => summary.warn(format!("working directory unknown: {err}")),
            }
        }

        for port in ports {
            match self.tunnels.close(port).await {
                Ok(()) => summary.closed_ports.push(port),
                Err(err) => summary.warn(format!("closing tunnel on {port} failed: {err}")),
            }
        }

        // Without the job ids the next cleanup could not cancel anything.
        if remote_ready || job_ids.is_empty() {
            if let Err(err) = self.sessions.clear() {
                summary.warn(format!("clearing session files failed: {err}"));
            }
        } else {
            summary.warn(format!(
                "kept records of job {} for the next cleanup",
                job_ids.join(", ")
            ));
        }

        if close_connection {
            if let Err(err) = self.channel.disconnect().await {
                summary.warn(format!("closing control connection failed: {err}"));
            }
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::info!(
            from = %*state,
            jobs = job_ids.len(),
            warnings = summary.warnings.len(),
            "session retired"
        );
        *state = SessionState::Idle;
        summary
    }

    /// Reopens the tunnel for the recorded session. The job is not touched.
    pub async fn reattach(&self) -> AppResult<String> {
        let record = match self.sessions.load_record() {
            Ok(Some(record)) => record,
            Ok(None) => {
                return Err(AppError::of(
                    AppErrorKind::SessionInfoUnavailable,
                    "no active session recorded; run start first",
                ));
            }
            Err(err) => {
                return Err(AppError::of(
                    AppErrorKind::SessionInfoUnavailable,
                    format!("session record unreadable: {}", err.message()),
                ));
            }
        };
        if self.tunnels.is_foreground() {
            self.channel.connect(self.mfa.as_ref()).await?;
        }
        if let Err(err) = self.tunnels.close(record.local_port).await {
            tracing::warn!("closing stale tunnel failed: {err}");
        }
        let local_url = self.tunnels.rewrite(&record.join_url, record.local_port)?;
        self.tunnels
            .open(&TunnelSpec::for_record(&self.settings.ssh.host, &record))
            .await?;
        self.progress.step(SessionState::Ready, &local_url);
        Ok(local_url)
    }

    pub async fn status(&self) -> AppResult<SessionStatus> {
        let record = self.sessions.load_record()?;
        let pending = self.sessions.load_pending()?;
        let job_id = pending
            .as_ref()
            .map(|p| p.job_id.clone())
            .or_else(|| record.as_ref().map(|r| r.job_id.clone()));
        let observation = match job_id {
            Some(job_id) => {
                self.channel.connect(self.mfa.as_ref()).await?;
                self.scheduler.observe_job_id(&job_id).await?
            }
            None => None,
        };
        Ok(SessionStatus {
            record,
            pending,
            observation,
        })
    }

    /// Foreground tunnels only live inside this process: keep serving until
    /// cancelled, then close the tunnel. The job keeps running.
    pub async fn serve_until_cancelled(&self, cancel_rx: &mut watch::Receiver<bool>) -> AppResult<()> {
        if !self.tunnels.is_foreground() {
            return Ok(());
        }
        let Some(record) = self.sessions.load_record()? else {
            return Ok(());
        };
        self.progress.status("tunnel runs in this process; press Ctrl-C to detach");
        while !*cancel_rx.borrow() {
            if cancel_rx.changed().await.is_err() {
                break;
            }
        }
        self.tunnels.close(record.local_port).await?;
        if let Err(err) = self.channel.disconnect().await {
            tracing::debug!("disconnect after detach failed: {err}");
        }
        Ok(())
    }

    async fn remote_paths(&self) -> AppResult<RemotePaths> {
        if let Some(paths) = self
            .remote_paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Ok(paths);
        }
        let home = if self.settings.remote_workdir.starts_with('/') {
            String::new()
        } else {
            let capture = self.channel.run(HOME_DIR_COMMAND).await?;
            let home = capture.stdout_text().trim().to_string();
            if capture.exit_code != 0 || home.is_empty() {
                return Err(AppError::of(
                    AppErrorKind::Internal,
                    format!("cannot resolve remote home directory: {}", capture.detail()),
                ));
            }
            home
        };
        let paths = RemotePaths::new(
            &home,
            &self.settings.remote_workdir,
            &self.settings.cluster_name,
        );
        tracing::debug!("remote working directory {}", paths.workdir);
        *self
            .remote_paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(paths.clone());
        Ok(paths)
    }
}
