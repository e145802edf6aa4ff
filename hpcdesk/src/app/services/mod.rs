// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod container;
pub mod env_file;
pub mod join_url;
pub mod shell;
pub mod slurm;
pub mod wait;
