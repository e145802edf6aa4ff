// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod clock;
pub mod mfa;
pub mod preferences;
pub mod progress;
pub mod remote_exec;
pub mod session_store;
pub mod tunnel;

pub use clock::ClockPort;
pub use mfa::MfaPort;
pub use preferences::PreferencesStorePort;
#[cfg(test)]
pub use progress::NoopProgress;
pub use progress::ProgressPort;
pub use remote_exec::{ExecCapture, RemoteExecPort};
pub use session_store::SessionStorePort;
pub use tunnel::TunnelPort;
