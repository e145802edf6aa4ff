// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod cli;
pub mod ssh;
pub mod store;
pub mod terminal;
pub mod time;
pub mod tunnel;
