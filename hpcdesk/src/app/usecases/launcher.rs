// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use super::{ControlChannel, step_error};
use crate::app::errors::{AppError, AppErrorKind, AppResult};
use crate::app::services::container::{self, LaunchSpec};
use crate::app::types::{AllocatedNode, JobHandle, RemotePaths, ResourceRequest};

/// How the backend is located and started inside its container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    pub path_template: String,
    pub args_template: String,
    pub container_runtime: String,
    pub locale: String,
    /// Scheduler step name of the backend; also the pattern cleanup kills by.
    pub step_name: String,
}

#[derive(Clone)]
pub struct BackendLauncher {
    channel: ControlChannel,
    settings: BackendSettings,
}

impl BackendLauncher {
    pub fn new(channel: ControlChannel, settings: BackendSettings) -> Self {
        Self { channel, settings }
    }

    pub fn backend_path(&self, request: &ResourceRequest) -> String {
        container::backend_path(&self.settings.path_template, &request.backend_version)
    }

    /// Fails with `BackendNotFound` unless the backend is executable.
    /// The gateway shares the filesystem with the compute nodes.
    pub async fn verify_backend(&self, request: &ResourceRequest) -> AppResult<String> {
        let path = self.backend_path(request);
        let capture = self
            .channel
            .run(&container::backend_exists_command(&path))
            .await?;
        if capture.exit_code != 0 {
            return Err(AppError::of(
                AppErrorKind::BackendNotFound,
                format!(
                    "backend {} not found or not executable at {path}",
                    request.backend_version
                ),
            ));
        }
        Ok(path)
    }

    /// Starts the backend detached and returns its log path.
    pub async fn launch(
        &self,
        node: &AllocatedNode,
        handle: &JobHandle,
        request: &ResourceRequest,
        paths: &RemotePaths,
    ) -> AppResult<String> {
        let backend_path = self.backend_path(request);
        let log_path = paths.backend_log(&handle.job_id);
        let spec = LaunchSpec {
            runtime: &self.settings.container_runtime,
            image: &request.container_image_path,
            backend_path: &backend_path,
            args_template: &self.settings.args_template,
            locale: &self.settings.locale,
            port: request.remote_port,
            wants_accelerator: request.wants_accelerator,
            workdir: &paths.workdir,
            log_path: &log_path,
            job_id: &handle.job_id,
            node: &node.hostname,
            step_name: &self.settings.step_name,
        };
        let capture = self
            .channel
            .run(&container::launch_command(&spec))
            .await
            .map_err(|err| step_error(AppErrorKind::BackendLaunchFailed, "launch", err))?;
        if capture.exit_code != 0 {
            return Err(AppError::of(
                AppErrorKind::BackendLaunchFailed,
                format!("launch on {}: {}", node.hostname, capture.detail()),
            ));
        }
        tracing::info!(
            "backend started on {} port={} log={log_path}",
            node.hostname,
            request.remote_port
        );
        Ok(log_path)
    }

    pub async fn kill_backends(&self) -> AppResult<()> {
        let capture = self
            .channel
            .run(&container::kill_backend_command(&self.settings.step_name))
            .await?;
        if capture.exit_code != 0 {
            return Err(AppError::of(
                AppErrorKind::Internal,
                format!("pkill: {}", capture.detail()),
            ));
        }
        Ok(())
    }

    pub async fn reset_workdir(&self, paths: &RemotePaths) -> AppResult<()> {
        let capture = self
            .channel
            .run(&container::reset_workdir_command(&paths.workdir))
            .await?;
        if capture.exit_code != 0 {
            return Err(AppError::of(
                AppErrorKind::Internal,
                format!("reset {}: {}", paths.workdir, capture.detail()),
            ));
        }
        Ok(())
    }

    /// Creates the working directory if missing; never deletes anything.
    pub async fn ensure_workdir(&self, paths: &RemotePaths) -> AppResult<()> {
        let capture = self
            .channel
            .run(&container::ensure_workdir_command(&paths.workdir))
            .await
            .map_err(|err| step_error(AppErrorKind::SubmissionFailed, "mkdir", err))?;
        if capture.exit_code != 0 {
            return Err(AppError::of(
                AppErrorKind::SubmissionFailed,
                format!("cannot create {}: {}", paths.workdir, capture.detail()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::app::usecases::testing::{NoMfa, ScriptedRemote, exit, ok, request, ssh_config};

    fn settings() -> BackendSettings {
        BackendSettings {
            path_template: "/opt/desk/{version}/bin/desk-server".to_string(),
            args_template: "--listen {address} --port {port}".to_string(),
            container_runtime: "apptainer".to_string(),
            locale: "C.UTF-8".to_string(),
            step_name: "hpcdesk-backend".to_string(),
        }
    }

    async fn launcher(remote: Arc<ScriptedRemote>) -> BackendLauncher {
        let channel = ControlChannel::new(remote, ssh_config());
        channel.connect(&NoMfa).await.unwrap();
        BackendLauncher::new(channel, settings())
    }

    fn paths() -> RemotePaths {
        RemotePaths {
            workdir: "/home/alice/.hpcdesk/c1".to_string(),
        }
    }

    fn node() -> AllocatedNode {
        AllocatedNode {
            hostname: "n001".to_string(),
        }
    }

    fn handle() -> JobHandle {
        JobHandle {
            job_id: "77".to_string(),
            job_name: "hpcdesk-1-2".to_string(),
        }
    }

    #[tokio::test]
    async fn verify_backend_checks_versioned_path() {
        let remote = Arc::new(ScriptedRemote::new());
        let launcher = launcher(remote.clone()).await;
        let path = launcher.verify_backend(&request()).await.unwrap();
        assert_eq!(path, "/opt/desk/2.1/bin/desk-server");
        assert_eq!(
            remote.commands(),
            vec!["test -x '/opt/desk/2.1/bin/desk-server'".to_string()]
        );
    }

    #[tokio::test]
    async fn missing_backend_is_backend_not_found() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.on("test -x", vec![Ok(exit(1, ""))]);
        let err = launcher(remote)
            .await
            .verify_backend(&request())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::BackendNotFound);
        assert!(err.message().contains("2.1"));
    }

    #[tokio::test]
    async fn launch_returns_per_job_log() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.on("cd ", vec![Ok(ok(""))]);
        let log = launcher(remote.clone())
            .await
            .launch(&node(), &handle(), &request(), &paths())
            .await
            .unwrap();
        assert_eq!(log, "/home/alice/.hpcdesk/c1/backend-77.log");
        let launched = remote.commands_starting_with("cd ");
        assert_eq!(launched.len(), 1);
        assert!(launched[0].contains("--nodelist='n001'"));
        assert!(launched[0].contains("--jobid='77'"));
    }

    #[tokio::test]
    async fn launch_failure_is_backend_launch_failed() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.on("cd ", vec![Ok(exit(2, "cd: no such directory"))]);
        let err = launcher(remote)
            .await
            .launch(&node(), &handle(), &request(), &paths())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::BackendLaunchFailed);
        assert!(err.message().contains("no such directory"));
    }
}
