// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Diagnostics go to stderr (and optionally a file). Stdout is reserved for
//! the join URL.

use std::env;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{EnvFilter, Layer, Registry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const FILTER_ENV_VAR: &str = "HPCDESK_LOG";
const FORMAT_ENV_VAR: &str = "HPCDESK_LOG_FORMAT";
const SPAN_EVENTS_ENV_VAR: &str = "HPCDESK_LOG_SPAN_EVENTS";
const FILE_ENV_VAR: &str = "HPCDESK_LOG_FILE";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
    Compact,
}

pub fn init(verbose: bool) {
    let format = format_from(env::var(FORMAT_ENV_VAR).ok().as_deref());
    let span_events = span_events_from(env::var(SPAN_EVENTS_ENV_VAR).ok().as_deref());

    let mut layers: Vec<BoxedLayer> = vec![fmt_layer(
        format,
        span_events.clone(),
        std::io::stderr,
        std::io::stderr().is_terminal(),
    )];
    if let Some((writer, guard)) = build_file_writer() {
        layers.push(fmt_layer(format, span_events, writer, false));
        let _ = FILE_GUARD.set(guard);
    }

    Registry::default()
        .with(layers)
        .with(build_filter(verbose))
        .with(tracing_error::ErrorLayer::default())
        .init();
}

fn fmt_layer<W>(format: LogFormat, span_events: FmtSpan, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_span_events(span_events)
        .with_ansi(ansi)
        .with_writer(writer);
    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

/// Warnings only by default: the console progress already narrates each step.
fn build_filter(verbose: bool) -> EnvFilter {
    match env::var(FILTER_ENV_VAR) {
        Ok(value) => EnvFilter::new(value),
        Err(_) if verbose => EnvFilter::new("debug"),
        Err(_) => EnvFilter::new("warn"),
    }
}

fn normalized(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_ascii_lowercase())
}

fn format_from(value: Option<&str>) -> LogFormat {
    match normalized(value).as_deref() {
        Some("json") => LogFormat::Json,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::Compact,
    }
}

fn span_events_from(value: Option<&str>) -> FmtSpan {
    match normalized(value).as_deref() {
        Some("new") => FmtSpan::NEW,
        Some("enter") => FmtSpan::ENTER,
        Some("exit") => FmtSpan::EXIT,
        Some("close") => FmtSpan::CLOSE,
        Some("all") => FmtSpan::FULL,
        _ => FmtSpan::NONE,
    }
}

fn build_file_writer() -> Option<(NonBlocking, WorkerGuard)> {
    let file_path = env::var(FILE_ENV_VAR)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())?;

    let path = Path::new(&file_path);
    let file_name = path.file_name()?.to_string_lossy().to_string();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let appender = tracing_appender::rolling::never(dir, file_name);
    Some(tracing_appender::non_blocking(appender))
}
