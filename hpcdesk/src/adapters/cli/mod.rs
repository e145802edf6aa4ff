// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::{Args, CommandFactory, FromArgMatches, Parser, Subcommand};

use crate::app::types::RequestDraft;
use crate::config::TunnelMode;

#[derive(Parser, Debug)]
#[command(
    name = "hpcdesk",
    version,
    about,
    long_about = None,
    after_help = "Configuration precedence: defaults < config file < environment < command-line flags.\n\
Config path precedence: default location < HPCDESK_CONFIG_PATH < --config.\n\
Paths in the config file are resolved relative to the config file directory."
)]
pub struct Opts {
    #[arg(
        short,
        long,
        global = true,
        value_name = "PATH",
        help = "Path to a TOML config file. When omitted, HPCDESK_CONFIG_PATH is used if set, otherwise the default config file location if available."
    )]
    pub config: Option<PathBuf>,
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::SetTrue,
        help = "Enable debug logging. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Where session records are kept. Overrides HPCDESK_STATE_DIR and `state_dir`."
    )]
    pub state_dir: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_enum,
        value_name = "MODE",
        help = "How the local port is forwarded. Overrides `tunnel.mode`."
    )]
    pub tunnel_mode: Option<TunnelMode>,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Retire any previous session, then start a new one and print its URL.
    Start(StartArgs),
    /// Cancel the job, stop the backend and close the tunnel.
    Stop,
    /// Show the recorded session and what the scheduler says about it.
    Status,
    /// Reopen the tunnel for the recorded session and print its URL.
    Reattach,
}

/// Unset flags fall back to the values used last time.
#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Account (project) to charge.
    #[arg(long)]
    pub account: Option<String>,
    /// Wall-clock limit in hours.
    #[arg(long, value_name = "HOURS")]
    pub hours: Option<String>,
    #[arg(long, value_name = "N")]
    pub cpus: Option<String>,
    #[arg(long, value_name = "GB")]
    pub memory_gb: Option<String>,
    /// Request one accelerator (true/false).
    #[arg(long, value_name = "BOOL")]
    pub gpu: Option<String>,
    /// Container image path on the cluster.
    #[arg(long, value_name = "PATH")]
    pub image: Option<String>,
    #[arg(long, value_name = "VERSION")]
    pub backend_version: Option<String>,
    /// Port the backend listens on, on the compute node.
    #[arg(long, value_name = "PORT")]
    pub remote_port: Option<String>,
    /// Port on this machine the URL points at.
    #[arg(long, value_name = "PORT")]
    pub local_port: Option<String>,
}

impl From<StartArgs> for RequestDraft {
    fn from(args: StartArgs) -> Self {
        RequestDraft {
            account: args.account,
            duration_hours: args.hours,
            cpu_count: args.cpus,
            memory_gb: args.memory_gb,
            wants_accelerator: args.gpu,
            container_image_path: args.image,
            backend_version: args.backend_version,
            remote_port: args.remote_port,
            local_port: args.local_port,
        }
    }
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
}

pub fn cli_command() -> clap::Command {
    Opts::command()
}

pub fn parse_opts() -> ParsedOpts {
    let matches = cli_command().get_matches();
    let verbose_override = if matches.get_flag("verbose") {
        Some(true)
    } else {
        None
    };
    let opts = Opts::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    ParsedOpts {
        opts,
        verbose_override,
    }
}
