// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! `KEY='value'` record files shared by the session, pending-job and
//! preferences stores. Values are quoted with POSIX single-quote rules so the
//! files can also be sourced by a shell.

use std::collections::BTreeMap;

use super::shell::{sh_escape, sh_unescape};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnvFileError {
    #[error("line {line}: expected KEY=value")]
    MissingSeparator { line: usize },
    #[error("line {line}: invalid key {key:?}")]
    InvalidKey { line: usize, key: String },
    #[error("line {line}: unbalanced quotes in value for {key}")]
    BadQuoting { line: usize, key: String },
}

pub fn render(entries: &[(&str, String)]) -> String {
    let mut out = String::new();
    for (key, value) in entries {
        out.push_str(key);
        out.push('=');
        out.push_str(&sh_escape(value));
        out.push('\n');
    }
    out
}

/// Parses a record file. Later duplicates override earlier ones.
pub fn parse(input: &str) -> Result<BTreeMap<String, String>, EnvFileError> {
    let mut map = BTreeMap::new();
    for (idx, raw) in input.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(EnvFileError::MissingSeparator { line: line_no });
        };
        let key = key.trim();
        if !is_valid_key(key) {
            return Err(EnvFileError::InvalidKey {
                line: line_no,
                key: key.to_string(),
            });
        }
        let value = value.trim();
        let value = if value.starts_with('\'') {
            sh_unescape(value).ok_or_else(|| EnvFileError::BadQuoting {
                line: line_no,
                key: key.to_string(),
            })?
        } else {
            value.to_string()
        };
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_single_quoted_lines() {
        let text = render(&[
            ("NODE", "n001".to_string()),
            ("JOIN_URL", "tcp://127.0.0.1:9000/a".to_string()),
        ]);
        assert_eq!(text, "NODE='n001'\nJOIN_URL='tcp://127.0.0.1:9000/a'\n");
    }

    #[test]
    fn parses_quoted_bare_and_commented_lines() {
        let map = parse("# session\n\nNODE='n001'\nREMOTE_PORT=9000\nNOTE='it'\\''s'\n").unwrap();
        assert_eq!(map.get("NODE").map(String::as_str), Some("n001"));
        assert_eq!(map.get("REMOTE_PORT").map(String::as_str), Some("9000"));
        assert_eq!(map.get("NOTE").map(String::as_str), Some("it's"));
    }

    #[test]
    fn rejects_lines_without_separator() {
        let err = parse("NODE='n001'\ngarbage\n").unwrap_err();
        assert_eq!(err, EnvFileError::MissingSeparator { line: 2 });
    }

    #[test]
    fn rejects_bad_keys_and_quotes() {
        assert!(matches!(
            parse("1NODE=x").unwrap_err(),
            EnvFileError::InvalidKey { line: 1, .. }
        ));
        assert!(matches!(
            parse("NODE='n001").unwrap_err(),
            EnvFileError::BadQuoting { line: 1, .. }
        ));
    }
}
