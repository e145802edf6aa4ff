// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::{MfaAnswer, MfaPrompt};

#[async_trait]
/// Answers keyboard-interactive prompts raised while authenticating
/// the control channel.
pub trait MfaPort: Send + Sync {
    async fn answer(&self, prompt: &MfaPrompt) -> AppResult<MfaAnswer>;
}
