// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

const APP_DIR_NAME: &str = "hpcdesk";
const CONFIG_FILE_NAME: &str = "hpcdesk.toml";
const CONFIG_ENV_VAR: &str = "HPCDESK_CONFIG_PATH";
const STATE_DIR_ENV_VAR: &str = "HPCDESK_STATE_DIR";

const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_KEEPALIVE_SECS: u64 = 60;
const DEFAULT_REMOTE_WORKDIR: &str = ".hpcdesk";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;
const DEFAULT_ALLOCATION_POLL_LIMIT: u32 = 180;
const DEFAULT_JOB_NAME_PREFIX: &str = "hpcdesk";
const DEFAULT_CONTAINER_RUNTIME: &str = "apptainer";
const DEFAULT_LOCALE: &str = "C.UTF-8";
const DEFAULT_ARGS_TEMPLATE: &str = "--listen {address} --port {port}";
const DEFAULT_DISCOVERY_POLL_LIMIT: u32 = 120;
const DEFAULT_LOG_TAIL_LINES: u32 = 200;
const DEFAULT_SSH_BINARY: &str = "ssh";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TunnelMode {
    /// System ssh client, detached; survives this process.
    #[default]
    Openssh,
    /// Forwarding over the control connection; lives while this process runs.
    Embedded,
}

impl TunnelMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TunnelMode::Openssh => "openssh",
            TunnelMode::Embedded => "embedded",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    verbose: Option<bool>,
    state_dir: Option<String>,
    #[serde(default)]
    cluster: ClusterSection,
    #[serde(default)]
    scheduler: SchedulerSection,
    #[serde(default)]
    backend: BackendSection,
    #[serde(default)]
    tunnel: TunnelSection,
}

#[derive(Debug, Default, Deserialize)]
struct ClusterSection {
    name: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    identity_path: Option<String>,
    keepalive_secs: Option<u64>,
    remote_workdir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SchedulerSection {
    poll_interval_secs: Option<u64>,
    allocation_poll_limit: Option<u32>,
    job_name_prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BackendSection {
    path_template: Option<String>,
    args_template: Option<String>,
    container_runtime: Option<String>,
    locale: Option<String>,
    discovery_poll_limit: Option<u32>,
    log_tail_lines: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct TunnelSection {
    mode: Option<TunnelMode>,
    ssh_binary: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub identity_path: Option<PathBuf>,
    pub keepalive_secs: u64,
    pub remote_workdir: String,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub allocation_poll_limit: u32,
    pub job_name_prefix: String,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub path_template: String,
    pub args_template: String,
    pub container_runtime: String,
    pub locale: String,
    pub discovery_poll_limit: u32,
    pub log_tail_lines: u32,
}

#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub mode: TunnelMode,
    pub ssh_binary: String,
}

#[derive(Debug)]
pub struct Config {
    pub verbose: bool,
    pub state_dir: PathBuf,
    pub cluster: ClusterConfig,
    pub scheduler: SchedulerConfig,
    pub backend: BackendConfig,
    pub tunnel: TunnelConfig,
    #[allow(dead_code)]
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub state_dir: ConfigValue<PathBuf>,
    pub verbose: ConfigValue<bool>,
    pub tunnel_mode: ConfigValue<TunnelMode>,
    pub cluster_name: ConfigValue<String>,
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub verbose: Option<bool>,
    pub state_dir: Option<PathBuf>,
    pub tunnel_mode: Option<TunnelMode>,
}

#[allow(dead_code)]
pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match path_from_env(CONFIG_ENV_VAR)? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    };
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let base_dir = config_path.as_deref().and_then(|path| path.parent());

    let (state_dir, state_dir_source) = match overrides.state_dir {
        Some(path) => (expand_path(path), ConfigSource::Override),
        None => match path_from_env(STATE_DIR_ENV_VAR)? {
            Some(path) => (expand_path(path), ConfigSource::Env),
            None => match file_config.state_dir.as_deref() {
                Some(raw) => (resolve_path(raw, base_dir), ConfigSource::ConfigFile),
                None => (
                    default_state_dir().with_context(|| {
                        "failed to resolve default state directory; specify --state-dir or set state_dir in the config file"
                    })?,
                    ConfigSource::Default,
                ),
            },
        },
    };

    let (verbose, verbose_source) = match overrides.verbose {
        Some(verbose) => (verbose, ConfigSource::Override),
        None => match file_config.verbose {
            Some(verbose) => (verbose, ConfigSource::ConfigFile),
            None => (false, ConfigSource::Default),
        },
    };

    let (tunnel_mode, tunnel_mode_source) = match overrides.tunnel_mode {
        Some(mode) => (mode, ConfigSource::Override),
        None => match file_config.tunnel.mode {
            Some(mode) => (mode, ConfigSource::ConfigFile),
            None => (TunnelMode::default(), ConfigSource::Default),
        },
    };

    let cluster_section = file_config.cluster;
    let host = non_empty(cluster_section.host, "cluster.host")?;
    let username = non_empty(cluster_section.username, "cluster.username")?;
    let port = cluster_section.port.unwrap_or(DEFAULT_SSH_PORT);
    if port == 0 {
        anyhow::bail!("cluster.port must be between 1 and 65535");
    }
    let (cluster_name, cluster_name_source) = match cluster_section.name {
        Some(name) if !name.trim().is_empty() => (name, ConfigSource::ConfigFile),
        _ => (host.clone(), ConfigSource::Default),
    };
    if cluster_name.contains('/') {
        anyhow::bail!("cluster.name must not contain '/'");
    }
    let cluster = ClusterConfig {
        name: cluster_name,
        host,
        port,
        username,
        identity_path: cluster_section
            .identity_path
            .as_deref()
            .map(|raw| resolve_path(raw, base_dir)),
        keepalive_secs: cluster_section
            .keepalive_secs
            .unwrap_or(DEFAULT_KEEPALIVE_SECS),
        remote_workdir: cluster_section
            .remote_workdir
            .unwrap_or_else(|| DEFAULT_REMOTE_WORKDIR.to_string()),
    };

    let scheduler_section = file_config.scheduler;
    let scheduler = SchedulerConfig {
        poll_interval: Duration::from_secs(
            scheduler_section
                .poll_interval_secs
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
        ),
        allocation_poll_limit: positive(
            scheduler_section.allocation_poll_limit,
            DEFAULT_ALLOCATION_POLL_LIMIT,
            "scheduler.allocation_poll_limit",
        )?,
        job_name_prefix: scheduler_section
            .job_name_prefix
            .unwrap_or_else(|| DEFAULT_JOB_NAME_PREFIX.to_string()),
    };

    let backend_section = file_config.backend;
    let backend = BackendConfig {
        path_template: non_empty(backend_section.path_template, "backend.path_template")?,
        args_template: backend_section
            .args_template
            .unwrap_or_else(|| DEFAULT_ARGS_TEMPLATE.to_string()),
        container_runtime: backend_section
            .container_runtime
            .unwrap_or_else(|| DEFAULT_CONTAINER_RUNTIME.to_string()),
        locale: backend_section
            .locale
            .unwrap_or_else(|| DEFAULT_LOCALE.to_string()),
        discovery_poll_limit: positive(
            backend_section.discovery_poll_limit,
            DEFAULT_DISCOVERY_POLL_LIMIT,
            "backend.discovery_poll_limit",
        )?,
        log_tail_lines: positive(
            backend_section.log_tail_lines,
            DEFAULT_LOG_TAIL_LINES,
            "backend.log_tail_lines",
        )?,
    };

    let tunnel = TunnelConfig {
        mode: tunnel_mode,
        ssh_binary: file_config
            .tunnel
            .ssh_binary
            .unwrap_or_else(|| DEFAULT_SSH_BINARY.to_string()),
    };

    let config = Config {
        verbose,
        state_dir,
        cluster,
        scheduler,
        backend,
        tunnel,
        config_path: config_path.clone(),
    };

    let report = ConfigReport {
        config_path,
        config_path_source,
        config_file_present,
        state_dir: ConfigValue {
            value: config.state_dir.clone(),
            source: state_dir_source,
        },
        verbose: ConfigValue {
            value: config.verbose,
            source: verbose_source,
        },
        tunnel_mode: ConfigValue {
            value: config.tunnel.mode,
            source: tunnel_mode_source,
        },
        cluster_name: ConfigValue {
            value: config.cluster.name.clone(),
            source: cluster_name_source,
        },
    };

    Ok(LoadResult { config, report })
}

fn non_empty(value: Option<String>, key: &str) -> Result<String> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => anyhow::bail!("{key} must be set in the config file"),
    }
}

fn positive(value: Option<u32>, default: u32, key: &str) -> Result<u32> {
    match value {
        Some(0) => anyhow::bail!("{key} must be at least 1"),
        Some(value) => Ok(value),
        None => Ok(default),
    }
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn path_from_env(key: &str) -> Result<Option<PathBuf>> {
    match std::env::var_os(key) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{key} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn default_state_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("failed to resolve data directory")?;
    Ok(base.join(APP_DIR_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const MINIMAL: &str = "[cluster]\nhost = \"login.example.org\"\nusername = \"alice\"\n\n[backend]\npath_template = \"/opt/desk/{version}/bin/desk\"\n";

    struct EnvVarGuard {
        key: &'static str,
        prev: Option<OsString>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prev = std::env::var_os(key);
            // SAFETY: tests serialize env mutations with ENV_LOCK.
            unsafe {
                std::env::set_var(key, value);
            }
            Self { key, prev }
        }

        fn clear(key: &'static str) -> Self {
            let prev = std::env::var_os(key);
            // SAFETY: tests serialize env mutations with ENV_LOCK.
            unsafe {
                std::env::remove_var(key);
            }
            Self { key, prev }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match &self.prev {
                Some(value) => {
                    // SAFETY: tests serialize env mutations with ENV_LOCK.
                    unsafe {
                        std::env::set_var(self.key, value);
                    }
                }
                None => {
                    // SAFETY: tests serialize env mutations with ENV_LOCK.
                    unsafe {
                        std::env::remove_var(self.key);
                    }
                }
            }
        }
    }

    fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
        let config_dir = dir.path().join("config");
        fs::create_dir_all(&config_dir).unwrap();
        let path = config_dir.join("hpcdesk.toml");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_optional_config_file_is_ok() {
        let dir = TempDir::new().unwrap();
        let cfg = read_config_file(&dir.path().join("missing.toml"), false).unwrap();
        assert!(cfg.cluster.host.is_none());
        assert!(cfg.tunnel.mode.is_none());
    }

    #[test]
    fn missing_required_config_file_errors() {
        let dir = TempDir::new().unwrap();
        let err = read_config_file(&dir.path().join("missing.toml"), true).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = EnvVarGuard::clear(STATE_DIR_ENV_VAR);
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, &format!("state_dir = \"state\"\n{MINIMAL}"));

        let LoadResult { config, report } =
            load_with_report(Some(path), Overrides::default()).unwrap();
        assert_eq!(config.cluster.name, "login.example.org");
        assert_eq!(report.cluster_name.source, ConfigSource::Default);
        assert_eq!(config.cluster.port, DEFAULT_SSH_PORT);
        assert_eq!(config.cluster.remote_workdir, ".hpcdesk");
        assert_eq!(config.scheduler.allocation_poll_limit, 180);
        assert_eq!(config.scheduler.poll_interval, Duration::from_secs(1));
        assert_eq!(config.backend.container_runtime, "apptainer");
        assert_eq!(config.tunnel.mode, TunnelMode::Openssh);
        assert_eq!(config.state_dir, dir.path().join("config").join("state"));
        assert_eq!(report.state_dir.source, ConfigSource::ConfigFile);
    }

    #[test]
    fn reads_every_section() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = EnvVarGuard::clear(STATE_DIR_ENV_VAR);
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
verbose = true
state_dir = "/var/tmp/hpcdesk"

[cluster]
name = "c1"
host = "login.example.org"
port = 2222
username = "alice"
identity_path = "keys/id_ed25519"
keepalive_secs = 0
remote_workdir = "/scratch/alice/desk"

[scheduler]
poll_interval_secs = 5
allocation_poll_limit = 10
job_name_prefix = "desk"

[backend]
path_template = "/opt/desk/{version}/bin/desk"
args_template = "--port {port}"
container_runtime = "singularity"
locale = "en_US.UTF-8"
discovery_poll_limit = 30
log_tail_lines = 50

[tunnel]
mode = "embedded"
ssh_binary = "/usr/bin/ssh"
"#,
        );

        let config = load(Some(path), Overrides::default()).unwrap();
        assert!(config.verbose);
        assert_eq!(config.state_dir, PathBuf::from("/var/tmp/hpcdesk"));
        assert_eq!(config.cluster.name, "c1");
        assert_eq!(config.cluster.port, 2222);
        assert_eq!(
            config.cluster.identity_path,
            Some(dir.path().join("config").join("keys/id_ed25519"))
        );
        assert_eq!(config.cluster.keepalive_secs, 0);
        assert_eq!(config.scheduler.job_name_prefix, "desk");
        assert_eq!(config.scheduler.allocation_poll_limit, 10);
        assert_eq!(config.backend.locale, "en_US.UTF-8");
        assert_eq!(config.backend.log_tail_lines, 50);
        assert_eq!(config.tunnel.mode, TunnelMode::Embedded);
        assert_eq!(config.tunnel.ssh_binary, "/usr/bin/ssh");
    }

    #[test]
    fn cli_overrides_take_precedence_over_file_config() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            &format!("verbose = false\nstate_dir = \"/from/config\"\n{MINIMAL}\n[tunnel]\nmode = \"embedded\"\n"),
        );

        let LoadResult { config, report } = load_with_report(
            Some(path),
            Overrides {
                verbose: Some(true),
                state_dir: Some(PathBuf::from("/from/flag")),
                tunnel_mode: Some(TunnelMode::Openssh),
            },
        )
        .unwrap();
        assert!(config.verbose);
        assert_eq!(config.state_dir, PathBuf::from("/from/flag"));
        assert_eq!(config.tunnel.mode, TunnelMode::Openssh);
        assert_eq!(report.tunnel_mode.source, ConfigSource::Override);
        assert_eq!(report.verbose.source, ConfigSource::Override);
    }

    #[test]
    fn state_dir_env_sits_between_flag_and_file() {
        let _lock = ENV_LOCK.lock().unwrap();
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, &format!("state_dir = \"/from/config\"\n{MINIMAL}"));
        let _env = EnvVarGuard::set(STATE_DIR_ENV_VAR, "/from/env");

        let LoadResult { config, report } =
            load_with_report(Some(path), Overrides::default()).unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/from/env"));
        assert_eq!(report.state_dir.source, ConfigSource::Env);
    }

    #[test]
    fn missing_cluster_host_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[cluster]\nusername = \"alice\"\n");
        let err = load(Some(path), Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("cluster.host"));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            &format!("{MINIMAL}\n[scheduler]\nallocation_poll_limit = 0\n"),
        );
        let err = load(Some(path), Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("allocation_poll_limit"));
    }

    #[test]
    fn unknown_tunnel_mode_fails_to_parse() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, &format!("{MINIMAL}\n[tunnel]\nmode = \"socks\"\n"));
        let err = load(Some(path), Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("failed to parse config file"));
    }

    #[test]
    fn env_config_path_used_when_no_override() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _state = EnvVarGuard::clear(STATE_DIR_ENV_VAR);
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, &format!("state_dir = \"/s\"\n{MINIMAL}"));
        let _env = EnvVarGuard::set(CONFIG_ENV_VAR, path.to_str().unwrap());

        let LoadResult { config, report } =
            load_with_report(None, Overrides::default()).unwrap();
        assert_eq!(config.config_path, Some(path));
        assert_eq!(report.config_path_source, Some(ConfigSource::Env));
    }

    #[test]
    fn cli_config_path_takes_precedence_over_env() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _state = EnvVarGuard::clear(STATE_DIR_ENV_VAR);
        let dir = TempDir::new().unwrap();
        let env_path = dir.path().join("env.toml");
        let cli_path = dir.path().join("cli.toml");
        fs::write(&env_path, format!("state_dir = \"/env\"\n{MINIMAL}")).unwrap();
        fs::write(&cli_path, format!("state_dir = \"/cli\"\n{MINIMAL}")).unwrap();
        let _env = EnvVarGuard::set(CONFIG_ENV_VAR, env_path.to_str().unwrap());

        let LoadResult { config, report } =
            load_with_report(Some(cli_path.clone()), Overrides::default()).unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/cli"));
        assert_eq!(report.config_path_source, Some(ConfigSource::Override));
    }
}
