// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

/// Very small, safe-ish shell escaper for paths and arguments.
pub fn sh_escape(p: &str) -> String {
    let mut out = String::from("'");
    out.push_str(&p.replace('\'', r"'\''"));
    out.push('\'');
    out
}

/// Undoes `sh_escape` for a single fully quoted word.
/// Returns `None` when `s` is not exactly one single-quoted word.
pub fn sh_unescape(s: &str) -> Option<String> {
    let mut out = String::new();
    let mut rest = s;
    let mut saw_quote = false;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix(r"\'") {
            out.push('\'');
            rest = tail;
            continue;
        }
        let tail = rest.strip_prefix('\'')?;
        let end = tail.find('\'')?;
        out.push_str(&tail[..end]);
        rest = &tail[end + 1..];
        saw_quote = true;
    }
    saw_quote.then_some(out)
}
