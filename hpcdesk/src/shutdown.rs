// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::Context;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;

/// Flips the returned flag to `true` on the first SIGINT or SIGTERM.
/// Later signals are ignored so cleanup can finish.
pub fn install_interrupt_handler() -> anyhow::Result<watch::Receiver<bool>> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            _ = sigint.recv() => tracing::info!("received SIGINT"),
        }
        let _ = tx.send(true);
        // Keep the handlers installed; the default action would kill us mid-cleanup.
        loop {
            let received = tokio::select! {
                s = sigterm.recv() => s,
                s = sigint.recv() => s,
            };
            if received.is_none() {
                break;
            }
            tracing::debug!("already shutting down; signal ignored");
        }
    });

    Ok(rx)
}
