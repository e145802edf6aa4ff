// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use tokio::sync::watch;

use super::{ControlChannel, PollPolicy, step_error};
use crate::app::errors::{AppError, AppErrorKind, AppResult};
use crate::app::ports::{ClockPort, ProgressPort};
use crate::app::services::{slurm, wait};
use crate::app::types::{
    AllocatedNode, JobHandle, JobObservation, NodeField, RemotePaths, ResourceRequest,
};

/// What one status observation means for the allocation wait.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PollOutcome {
    Waiting,
    Assigned(String),
    Lost(String),
}

fn classify(observation: Option<&JobObservation>) -> PollOutcome {
    let Some(observation) = observation else {
        // Freshly submitted jobs can take a moment to show up in squeue.
        return PollOutcome::Waiting;
    };
    let state = observation.state.as_str();
    if slurm::is_slurm_state_waiting(state) {
        return PollOutcome::Waiting;
    }
    if slurm::is_slurm_state_running(state) {
        return match &observation.node {
            NodeField::Assigned(host) => PollOutcome::Assigned(host.clone()),
            NodeField::Unassigned => PollOutcome::Waiting,
            NodeField::Empty => {
                PollOutcome::Lost("scheduler reports RUNNING with an empty node list".to_string())
            }
        };
    }
    PollOutcome::Lost(format!("job is {state}"))
}

fn describe(observation: Option<&JobObservation>) -> String {
    match observation {
        None => "waiting for the job to appear in the queue".to_string(),
        Some(obs) => match &obs.node {
            NodeField::Assigned(host) => format!("{} on {host}", obs.state),
            _ => obs.state.clone(),
        },
    }
}

#[derive(Clone)]
pub struct SchedulerClient {
    channel: ControlChannel,
    clock: Arc<dyn ClockPort>,
    job_name_prefix: String,
}

impl SchedulerClient {
    pub fn new(channel: ControlChannel, clock: Arc<dyn ClockPort>, job_name_prefix: &str) -> Self {
        Self {
            channel,
            clock,
            job_name_prefix: job_name_prefix.to_string(),
        }
    }

    /// Submits the placeholder job that holds the allocation. Never retried.
    pub async fn submit(
        &self,
        request: &ResourceRequest,
        paths: &RemotePaths,
    ) -> AppResult<JobHandle> {
        let job_name = slurm::job_name(
            &self.job_name_prefix,
            self.clock.now_utc(),
            self.clock.process_id(),
        );
        let command = slurm::sbatch_command(request, &job_name, paths);
        let capture = self
            .channel
            .run(&command)
            .await
            .map_err(|err| step_error(AppErrorKind::SubmissionFailed, "sbatch", err))?;
        if capture.exit_code != 0 {
            let detail = capture.detail();
            tracing::debug!("sbatch failed: {detail}");
            return Err(AppError::of(
                AppErrorKind::SubmissionFailed,
                format!("sbatch: {detail}"),
            ));
        }
        let stdout = capture.stdout_text();
        let Some(job_id) = slurm::parse_job_id(&stdout) else {
            return Err(AppError::of(
                AppErrorKind::SubmissionFailed,
                format!("no job id in sbatch output: {}", stdout.trim()),
            ));
        };
        tracing::info!("submitted job {job_id} name={job_name}");
        Ok(JobHandle { job_id, job_name })
    }

    /// One status query by job name. `None` when squeue does not list it.
    pub async fn observe(&self, handle: &JobHandle) -> AppResult<Option<JobObservation>> {
        let capture = self
            .channel
            .run(&slurm::squeue_command(&handle.job_name))
            .await
            .map_err(|err| step_error(AppErrorKind::AllocationFailed, "squeue", err))?;
        if capture.exit_code != 0 {
            return Err(AppError::of(
                AppErrorKind::AllocationFailed,
                format!("squeue: {}", capture.detail()),
            ));
        }
        Ok(slurm::parse_squeue_observation(&capture.stdout_text()))
    }

    /// Status by job ID, for reporting. A job squeue no longer knows is `None`.
    pub async fn observe_job_id(&self, job_id: &str) -> AppResult<Option<JobObservation>> {
        let capture = self.channel.run(&slurm::squeue_job_command(job_id)).await?;
        if capture.exit_code != 0 {
            tracing::debug!("squeue for job {job_id} failed: {}", capture.detail());
            return Ok(None);
        }
        Ok(slurm::parse_squeue_observation(&capture.stdout_text()))
    }

    pub async fn poll_for_node(
        &self,
        handle: &JobHandle,
        policy: PollPolicy,
        progress: &dyn ProgressPort,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> AppResult<AllocatedNode> {
        let mut last_status = String::new();
        for attempt in 1..=policy.max_attempts {
            wait::ensure_not_cancelled(cancel_rx)?;
            let observation = self.observe(handle).await?;
            let status = describe(observation.as_ref());
            if status != last_status {
                progress.status(&status);
                tracing::debug!(attempt, job_id = %handle.job_id, "job status: {status}");
                last_status = status;
            }
            match classify(observation.as_ref()) {
                PollOutcome::Assigned(hostname) => {
                    tracing::info!("job {} running on {hostname}", handle.job_id);
                    return Ok(AllocatedNode { hostname });
                }
                PollOutcome::Lost(reason) => {
                    return Err(AppError::of(
                        AppErrorKind::AllocationFailed,
                        format!("job {}: {reason}", handle.job_id),
                    ));
                }
                PollOutcome::Waiting => {}
            }
            if attempt < policy.max_attempts {
                wait::sleep_or_cancel(policy.interval, cancel_rx).await?;
            }
        }
        Err(AppError::of(
            AppErrorKind::AllocationTimeout,
            format!(
                "job {} got no node after {} status checks",
                handle.job_id, policy.max_attempts
            ),
        ))
    }

    /// Best-effort `scancel`; failures are logged only.
    pub async fn cancel(&self, job_id: &str) {
        match self.channel.run(&slurm::scancel_command(job_id)).await {
            Ok(capture) if capture.exit_code == 0 => {
                tracing::info!("cancelled job {job_id}");
            }
            Ok(capture) => {
                tracing::warn!("scancel {job_id} failed: {}", capture.detail());
            }
            Err(err) => {
                tracing::warn!("scancel {job_id} failed: {err}");
            }
        }
    }
}
