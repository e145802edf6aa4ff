// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::Result;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use std::io::{IsTerminal, Write};

pub fn print_success(message: &str) -> Result<()> {
    write_stderr(&marked_line('✓', message))
}

pub fn print_failure(message: &str) -> Result<()> {
    write_stderr(&marked_line('✗', message))
}

pub fn print_warning(message: &str) -> Result<()> {
    print_plain(&format!("warning: {message}"))
}

pub(super) fn print_plain(message: &str) -> Result<()> {
    let mut stderr = std::io::stderr();
    write_all(&mut stderr, format!("{message}\n").as_bytes())
}

fn marked_line(marker: char, message: &str) -> String {
    let mut line = String::new();
    line.push(marker);
    line.push(' ');
    line.push_str(message);
    line.push('\n');
    line
}

fn write_stderr(line: &str) -> Result<()> {
    let mut stderr = std::io::stderr();
    if !stderr.is_terminal() {
        return write_all(&mut stderr, line.as_bytes());
    }
    let (color, marker, rest) = if let Some(rest) = line.strip_prefix('✓') {
        (Color::Green, "✓", rest)
    } else if let Some(rest) = line.strip_prefix('✗') {
        (Color::Red, "✗", rest)
    } else {
        return write_all(&mut stderr, line.as_bytes());
    };
    execute!(
        stderr,
        SetForegroundColor(color),
        Print(marker),
        ResetColor,
        Print(rest)
    )?;
    Ok(())
}

fn write_all<W: Write>(w: &mut W, buf: &[u8]) -> Result<()> {
    w.write_all(buf)?;
    w.flush()?;
    Ok(())
}
