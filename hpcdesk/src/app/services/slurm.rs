// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use time::OffsetDateTime;

use super::shell::sh_escape;
use crate::app::types::{JobObservation, NodeField, RemotePaths, ResourceRequest};

/// Node-list values squeue prints for a job that holds no node yet.
const UNASSIGNED_NODE_SENTINELS: &[&str] = &["NONE", "(NULL)", "N/A", "(NONE)"];

/// Separator between state and node list in our squeue format.
const SQUEUE_FIELD_SEPARATOR: char = '|';

/// `<prefix>-<unix seconds>-<pid>`; unique per submission from one machine.
pub fn job_name(prefix: &str, now: OffsetDateTime, pid: u32) -> String {
    format!("{prefix}-{}-{pid}", now.unix_timestamp())
}

/// Command run by the allocation itself: record the node, then hold it.
pub fn job_payload(paths: &RemotePaths) -> String {
    format!(
        "hostname > {}; exec sleep infinity",
        sh_escape(&paths.node_file())
    )
}

pub fn sbatch_command(request: &ResourceRequest, job_name: &str, paths: &RemotePaths) -> String {
    let mut parts = vec![
        "sbatch".to_string(),
        format!("--account={}", sh_escape(&request.account)),
        format!("--cpus-per-task={}", request.cpu_count),
        format!("--mem={}M", u64::from(request.memory_gb) * 1024),
        format!("--time={}", format_time_limit(request.duration_hours)),
    ];
    if request.wants_accelerator {
        parts.push("--gres=gpu:1".to_string());
    }
    parts.push(format!("--job-name={}", sh_escape(job_name)));
    parts.push(format!("--output={}", sh_escape(&paths.scheduler_stdout())));
    parts.push(format!("--error={}", sh_escape(&paths.scheduler_stderr())));
    parts.push(format!("--wrap={}", sh_escape(&job_payload(paths))));
    parts.join(" ")
}

pub fn squeue_command(job_name: &str) -> String {
    format!(
        "squeue --noheader --name={} --format={}",
        sh_escape(job_name),
        sh_escape(&format!("%T{SQUEUE_FIELD_SEPARATOR}%N"))
    )
}

/// Status of one job by ID; used when the job name is not known.
pub fn squeue_job_command(job_id: &str) -> String {
    format!(
        "squeue --noheader --jobs={} --format={}",
        sh_escape(job_id),
        sh_escape(&format!("%T{SQUEUE_FIELD_SEPARATOR}%N"))
    )
}

pub fn scancel_command(job_id: &str) -> String {
    format!("scancel {}", sh_escape(job_id))
}

/// `H:00:00`; Slurm accepts hour counts above 24 in this form.
pub fn format_time_limit(hours: u32) -> String {
    format!("{hours}:00:00")
}

pub fn parse_job_id(output: &str) -> Option<String> {
    // Expect message from sbatch like: "Submitted batch job 11"
    // (possibly followed by " on cluster <name>" on federated setups).
    let marker = "job ";
    output.lines().find_map(|line| {
        let idx = line.find(marker)?;
        let after_job = line[idx + marker.len()..].trim();
        let id = after_job.split_whitespace().next()?;
        if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
            Some(id.to_string())
        } else {
            None
        }
    })
}

/// Parses the first non-empty line of `squeue --format='%T|%N'`.
/// Returns `None` when squeue lists no job under that name.
pub fn parse_squeue_observation(output: &str) -> Option<JobObservation> {
    let line = output.lines().map(str::trim).find(|line| !line.is_empty())?;
    let (state, node) = match line.split_once(SQUEUE_FIELD_SEPARATOR) {
        Some((state, node)) => (state, Some(node.trim())),
        None => (line, None),
    };
    let node = match node {
        None => NodeField::Unassigned,
        Some("") => NodeField::Empty,
        Some(value) if is_unassigned_sentinel(value) => NodeField::Unassigned,
        Some(value) => NodeField::Assigned(value.to_string()),
    };
    Some(JobObservation {
        state: normalize_slurm_state(state),
        node,
    })
}

fn is_unassigned_sentinel(value: &str) -> bool {
    UNASSIGNED_NODE_SENTINELS
        .iter()
        .any(|sentinel| value.eq_ignore_ascii_case(sentinel))
}

pub fn normalize_slurm_state(state: &str) -> String {
    let token = state
        .split(|c| c == '+' || c == ':' || c == '(')
        .next()
        .unwrap_or(state)
        .trim();
    token.to_ascii_uppercase()
}

/// States in which the job may still be granted its node.
pub fn is_slurm_state_waiting(state: &str) -> bool {
    matches!(
        state,
        "PENDING" | "CONFIGURING" | "REQUEUED" | "RESIZING" | "SUSPENDED" | "REQUEUE_HOLD"
    )
}

pub fn is_slurm_state_running(state: &str) -> bool {
    state == "RUNNING"
}
