// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use adapters::cli::Cmd;
use adapters::terminal::{self, ConsoleProgress, TerminalMfa};
use app::errors::{AppError, AppErrorKind};
use app::ports::TunnelPort;
use app::services::join_url;
use app::types::{SessionStatus, SshConfig};
use app::usecases::{
    BackendSettings, CleanupSummary, LifecyclePorts, LifecycleSettings, PollPolicy,
    SessionLifecycle,
};
use config::{Config, TunnelMode};

mod adapters;
mod app;
mod config;
mod logging;
mod shutdown;

const EXIT_INTERRUPTED: u8 = 130;
const TUNNEL_LOG_FILE: &str = "tunnel.log";

fn log_config_report(report: &config::ConfigReport) {
    match (&report.config_path, report.config_path_source) {
        (Some(path), Some(source)) => {
            tracing::info!(
                "config path: {} (source={}, present={})",
                path.display(),
                source.as_str(),
                report.config_file_present
            );
        }
        (Some(path), None) => {
            tracing::info!(
                "config path: {} (present={})",
                path.display(),
                report.config_file_present
            );
        }
        (None, _) => {
            tracing::info!("config path: (none)");
        }
    }
    tracing::info!(
        "config cluster: {} (source={})",
        report.cluster_name.value,
        report.cluster_name.source.as_str()
    );
    tracing::info!(
        "config state_dir: {} (source={})",
        report.state_dir.value.display(),
        report.state_dir.source.as_str()
    );
    tracing::info!(
        "config tunnel_mode: {} (source={})",
        report.tunnel_mode.value.as_str(),
        report.tunnel_mode.source.as_str()
    );
    tracing::info!(
        "config verbose: {} (source={})",
        report.verbose.value,
        report.verbose.source.as_str()
    );
}

async fn ssh_config(config: &Config) -> anyhow::Result<SshConfig> {
    let cluster = &config.cluster;
    let addr = tokio::net::lookup_host((cluster.host.as_str(), cluster.port))
        .await
        .with_context(|| format!("failed to resolve {}", cluster.host))?
        .next()
        .with_context(|| format!("{} has no address", cluster.host))?;
    Ok(SshConfig {
        session_name: Some(cluster.name.clone()),
        host: cluster.host.clone(),
        addr,
        username: cluster.username.clone(),
        identity_path: cluster
            .identity_path
            .as_ref()
            .map(|path| path.to_string_lossy().into_owned()),
        ki_submethods: None,
        keepalive_secs: cluster.keepalive_secs,
    })
}

async fn build_lifecycle(config: &Config) -> anyhow::Result<SessionLifecycle> {
    let ssh = ssh_config(config).await?;
    let cluster_name = &config.cluster.name;
    let ssh_adapter = adapters::ssh::SshAdapter::default();

    let tunnel: Arc<dyn TunnelPort> = match config.tunnel.mode {
        TunnelMode::Openssh => Arc::new(adapters::tunnel::OpenSshTunnel::new(
            &config.tunnel.ssh_binary,
            &ssh,
            config.state_dir.join(cluster_name).join(TUNNEL_LOG_FILE),
        )),
        TunnelMode::Embedded => {
            Arc::new(adapters::tunnel::EmbeddedTunnel::new(ssh_adapter.dialer(&ssh)))
        }
    };

    let ports = LifecyclePorts {
        remote_exec: Arc::new(ssh_adapter),
        mfa: Arc::new(TerminalMfa::new()),
        sessions: Arc::new(adapters::store::FileSessionStore::new(
            &config.state_dir,
            cluster_name,
        )),
        preferences: Arc::new(adapters::store::FilePreferencesStore::new(
            &config.state_dir,
            cluster_name,
        )),
        tunnel,
        clock: Arc::new(adapters::time::SystemClock::new()),
        progress: Arc::new(ConsoleProgress::new()),
    };

    let scheduler = &config.scheduler;
    let backend = &config.backend;
    let settings = LifecycleSettings {
        ssh,
        cluster_name: cluster_name.clone(),
        remote_workdir: config.cluster.remote_workdir.clone(),
        job_name_prefix: scheduler.job_name_prefix.clone(),
        backend: BackendSettings {
            path_template: backend.path_template.clone(),
            args_template: backend.args_template.clone(),
            container_runtime: backend.container_runtime.clone(),
            locale: backend.locale.clone(),
            step_name: format!("{}-backend", scheduler.job_name_prefix),
        },
        log_tail_lines: backend.log_tail_lines,
        allocation: PollPolicy::new(scheduler.poll_interval, scheduler.allocation_poll_limit),
        discovery: PollPolicy::new(scheduler.poll_interval, backend.discovery_poll_limit),
    };
    Ok(SessionLifecycle::new(ports, settings))
}

fn report_error(err: &AppError) {
    if let Err(print_err) = terminal::print_failure(&err.to_string()) {
        tracing::debug!("failed to print error: {print_err}");
    }
}

fn report_cleanup(summary: &CleanupSummary) {
    for warning in &summary.warnings {
        let _ = terminal::print_warning(warning);
    }
    let message = if summary.cancelled_jobs.is_empty() {
        "no scheduler job to cancel".to_string()
    } else {
        format!("cancelled job {}", summary.cancelled_jobs.join(", "))
    };
    let _ = terminal::print_success(&message);
}

fn print_status(status: &SessionStatus) {
    let job = status
        .pending
        .as_ref()
        .map(|p| p.job_id.as_str())
        .or_else(|| status.record.as_ref().map(|r| r.job_id.as_str()));
    let Some(job) = job else {
        println!("no session");
        return;
    };
    match &status.observation {
        Some(observation) => println!("job:        {job} ({})", observation.state),
        None => println!("job:        {job} (not known to the scheduler)"),
    }
    if let Some(record) = &status.record {
        println!("node:       {}", record.node);
        println!("remote url: {}", record.join_url);
        match join_url::rewrite_for_local(&record.join_url, record.local_port) {
            Ok(url) => println!("local url:  {url}"),
            Err(err) => println!("local url:  unavailable ({err})"),
        }
    }
}

/// Prints the URL, then keeps an in-process tunnel alive until interrupted.
async fn present_url(
    lifecycle: &SessionLifecycle,
    url: &str,
    cancel_rx: &mut watch::Receiver<bool>,
) -> ExitCode {
    println!("{url}");
    match lifecycle.serve_until_cancelled(cancel_rx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

async fn run(
    cmd: Cmd,
    lifecycle: &SessionLifecycle,
    mut cancel_rx: watch::Receiver<bool>,
) -> ExitCode {
    match cmd {
        Cmd::Start(args) => match lifecycle.start(args.into(), &mut cancel_rx).await {
            Ok(url) => present_url(lifecycle, &url, &mut cancel_rx).await,
            // The lifecycle has already released what it started.
            Err(err) if err.kind() == AppErrorKind::Cancelled => ExitCode::from(EXIT_INTERRUPTED),
            Err(_) => {
                // The failed step was already reported by the progress output.
                let _ = terminal::print_warning(
                    "partial resources are released by the next start or stop",
                );
                ExitCode::FAILURE
            }
        },
        Cmd::Stop => {
            report_cleanup(&lifecycle.cleanup().await);
            ExitCode::SUCCESS
        }
        Cmd::Status => match lifecycle.status().await {
            Ok(status) => {
                print_status(&status);
                ExitCode::SUCCESS
            }
            Err(err) => {
                report_error(&err);
                ExitCode::FAILURE
            }
        },
        Cmd::Reattach => match lifecycle.reattach().await {
            Ok(url) => present_url(lifecycle, &url, &mut cancel_rx).await,
            Err(err) => {
                report_error(&err);
                ExitCode::FAILURE
            }
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let parsed = adapters::cli::parse_opts();
    let opts = parsed.opts;
    let config::LoadResult { config, report } = config::load_with_report(
        opts.config,
        config::Overrides {
            verbose: parsed.verbose_override,
            state_dir: opts.state_dir,
            tunnel_mode: opts.tunnel_mode,
        },
    )?;
    logging::init(config.verbose);
    log_config_report(&report);

    let cancel_rx = shutdown::install_interrupt_handler()?;
    let lifecycle = build_lifecycle(&config).await?;
    Ok(run(opts.cmd, &lifecycle, cancel_rx).await)
}
