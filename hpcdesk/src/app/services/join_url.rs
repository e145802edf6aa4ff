// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::OnceLock;

use regex::Regex;

use crate::app::errors::{AppError, AppErrorKind, AppResult};
use crate::app::types::JoinUrl;

const JOIN_URL_PATTERN: &str =
    r#"[A-Za-z][A-Za-z0-9+.-]*://[^\s/:'"<>]+:[0-9]{1,5}(/[^\s'"<>]*)?"#;

fn join_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(JOIN_URL_PATTERN).expect("join url pattern is valid"))
}

/// The last `scheme://host:port[/path]` token in `text`, if any.
pub fn find_last_join_url(text: &str) -> Option<JoinUrl> {
    join_url_regex()
        .find_iter(text)
        .last()
        .map(|m| JoinUrl(m.as_str().to_string()))
}

/// Replaces the `host:port` authority with `localhost:<local_port>`.
pub fn rewrite_for_local(url: &JoinUrl, local_port: u16) -> AppResult<String> {
    let raw = url.as_str();
    let (scheme, rest) = raw.split_once("://").ok_or_else(|| {
        AppError::of(
            AppErrorKind::TunnelEstablishFailed,
            format!("join url has no scheme: {raw}"),
        )
    })?;
    let tail_start = rest
        .find(|c| c == '/' || c == '?' || c == '#')
        .unwrap_or(rest.len());
    if tail_start == 0 {
        return Err(AppError::of(
            AppErrorKind::TunnelEstablishFailed,
            format!("join url has no authority: {raw}"),
        ));
    }
    Ok(format!(
        "{scheme}://localhost:{local_port}{}",
        &rest[tail_start..]
    ))
}
