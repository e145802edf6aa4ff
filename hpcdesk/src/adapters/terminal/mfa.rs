// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::io::Write;

use anyhow::bail;
use async_trait::async_trait;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::MfaPort;
use crate::app::types::{MfaAnswer, MfaPrompt};

/// Answers keyboard-interactive rounds from the controlling terminal.
/// Prompts go to stderr.
#[derive(Clone, Default)]
pub struct TerminalMfa;

impl TerminalMfa {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MfaPort for TerminalMfa {
    async fn answer(&self, prompt: &MfaPrompt) -> AppResult<MfaAnswer> {
        collect_answers(prompt).await.map_err(|err| {
            AppError::with_message(
                AppErrorKind::ConnectionSetupFailed,
                codes::AUTHENTICATION_FAILURE,
                format!("reading MFA answer failed: {err:#}"),
            )
        })
    }
}

async fn collect_answers(mfa: &MfaPrompt) -> anyhow::Result<MfaAnswer> {
    eprintln!();
    if !mfa.name.is_empty() {
        eprintln!("MFA: {}", mfa.name);
    }
    if !mfa.instructions.is_empty() {
        eprintln!("{}", mfa.instructions);
    }

    let mut responses = Vec::with_capacity(mfa.prompts.len());
    for p in &mfa.prompts {
        responses.push(prompt_value(&p.text, p.echo).await?);
    }
    Ok(MfaAnswer { responses })
}

async fn prompt_value(prompt: &str, echo: bool) -> anyhow::Result<String> {
    let prompt = prompt.to_string();
    tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
        let mut stderr = std::io::stderr();
        write!(stderr, "{prompt}")?;
        stderr.flush()?;
        if echo {
            let mut s = String::new();
            std::io::stdin().read_line(&mut s)?;
            Ok(trim_line_ending(s))
        } else {
            let answer = read_hidden();
            eprintln!();
            answer
        }
    })
    .await?
}

fn trim_line_ending(mut s: String) -> String {
    while s.ends_with('\n') || s.ends_with('\r') {
        s.pop();
    }
    s
}

/// Reads one line without echoing it. Raw mode is always restored.
fn read_hidden() -> anyhow::Result<String> {
    terminal::enable_raw_mode()?;
    let result = read_keys();
    terminal::disable_raw_mode()?;
    result
}

fn read_keys() -> anyhow::Result<String> {
    let mut value = String::new();
    loop {
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if apply_key(&mut value, key)? == Some(true) {
            return Ok(value);
        }
    }
}

/// `Some(true)` once the line is complete.
fn apply_key(value: &mut String, key: KeyEvent) -> anyhow::Result<Option<bool>> {
    if key.kind == KeyEventKind::Release {
        return Ok(None);
    }
    match key.code {
        KeyCode::Enter => Ok(Some(true)),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            bail!("interrupted")
        }
        KeyCode::Char(c) => {
            value.push(c);
            Ok(Some(false))
        }
        KeyCode::Backspace => {
            value.pop();
            Ok(Some(false))
        }
        _ => Ok(None),
    }
}
