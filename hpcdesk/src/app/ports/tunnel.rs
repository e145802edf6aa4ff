// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::TunnelSpec;

#[async_trait]
/// Local port forwarding to a compute node through the gateway.
pub trait TunnelPort: Send + Sync {
    /// Establishes every hop or none of them.
    async fn open(&self, spec: &TunnelSpec) -> AppResult<()>;

    /// Tears down whatever forwards `local_port`. Idempotent.
    async fn close(&self, local_port: u16) -> AppResult<()>;

    /// Whether the tunnel only lives as long as this process.
    fn is_foreground(&self) -> bool {
        false
    }
}
