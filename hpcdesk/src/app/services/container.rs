// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Shell commands that start and stop the backend inside its container on
//! the allocated node. They run on the gateway and return immediately.

use super::shell::sh_escape;

pub const LISTEN_ADDRESS: &str = "127.0.0.1";

/// Everything needed to start one backend process.
#[derive(Debug, Clone)]
pub struct LaunchSpec<'a> {
    pub runtime: &'a str,
    pub image: &'a str,
    pub backend_path: &'a str,
    pub args_template: &'a str,
    pub locale: &'a str,
    pub port: u16,
    pub wants_accelerator: bool,
    pub workdir: &'a str,
    pub log_path: &'a str,
    pub job_id: &'a str,
    pub node: &'a str,
    pub step_name: &'a str,
}

pub fn backend_path(template: &str, version: &str) -> String {
    template.replace("{version}", version)
}

pub fn render_args(template: &str, port: u16, log_dir: &str) -> String {
    template
        .replace("{address}", LISTEN_ADDRESS)
        .replace("{port}", &port.to_string())
        .replace("{log_dir}", &sh_escape(log_dir))
}

/// `apptainer` -> `APPTAINERENV_`; variables with this prefix are visible
/// inside the container without the prefix.
pub fn env_prefix(runtime: &str) -> String {
    let name = runtime.rsplit('/').next().unwrap_or(runtime);
    format!("{}ENV_", name.to_ascii_uppercase())
}

pub fn backend_exists_command(path: &str) -> String {
    format!("test -x {}", sh_escape(path))
}

pub fn launch_command(spec: &LaunchSpec<'_>) -> String {
    let prefix = env_prefix(spec.runtime);
    let env = [
        ("HPCDESK_BACKEND", spec.backend_path.to_string()),
        ("HPCDESK_PORT", spec.port.to_string()),
        ("HPCDESK_LOG_DIR", spec.workdir.to_string()),
        ("LC_ALL", spec.locale.to_string()),
        ("LANG", spec.locale.to_string()),
    ]
    .iter()
    .map(|(key, value)| format!("{prefix}{key}={}", sh_escape(value)))
    .collect::<Vec<_>>()
    .join(" ");

    let script = format!(
        "exec \"$HPCDESK_BACKEND\" {}",
        render_args(spec.args_template, spec.port, spec.workdir)
    );
    let nv = if spec.wants_accelerator { " --nv" } else { "" };

    // Only the `nohup` command goes to the background, with every stream
    // redirected; a backgrounded list would keep the channel's stdout open.
    format!(
        "cd {workdir} || exit 1; nohup setsid env {env} srun --jobid={job} --overlap --nodes=1 --ntasks=1 \
--nodelist={node} --job-name={step} {runtime} exec{nv} {image} /bin/sh -c {script} \
>> {log} 2>&1 < /dev/null &",
        workdir = sh_escape(spec.workdir),
        job = sh_escape(spec.job_id),
        node = sh_escape(spec.node),
        step = sh_escape(spec.step_name),
        runtime = sh_escape(spec.runtime),
        image = sh_escape(spec.image),
        script = sh_escape(&script),
        log = sh_escape(spec.log_path),
    )
}

/// Kills this user's backend launchers on the gateway. Exit code 1
/// ("nothing matched") is expected and fine.
pub fn kill_backend_command(step_name: &str) -> String {
    format!(
        "pkill -u \"$(id -un)\" -f -- {} ; test $? -le 1",
        sh_escape(&self_excluding_pattern(step_name))
    )
}

/// `name` -> `[n]ame`: still matches `name`, but not the command line of
/// the shell that runs pkill.
fn self_excluding_pattern(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {
            format!("[{first}]{}", chars.as_str())
        }
        _ => name.to_string(),
    }
}

pub fn reset_workdir_command(workdir: &str) -> String {
    let dir = sh_escape(workdir);
    format!("rm -rf -- {dir} && mkdir -p -- {dir}")
}

pub fn ensure_workdir_command(workdir: &str) -> String {
    format!("mkdir -p -- {}", sh_escape(workdir))
}

pub fn tail_log_command(log_path: &str, lines: u32) -> String {
    format!("tail -n {lines} -- {} 2>/dev/null", sh_escape(log_path))
}
