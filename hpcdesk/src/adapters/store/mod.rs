// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::app::errors::{AppError, AppErrorKind, codes};
use crate::app::services::env_file::{self, EnvFileError};

mod preferences;
mod session;

pub use preferences::FilePreferencesStore;
pub use session::FileSessionStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: EnvFileError,
    },
    #[error("{path}: missing {key}")]
    MissingKey { path: PathBuf, key: &'static str },
    #[error("{path}: invalid {key} {value:?}")]
    InvalidValue {
        path: PathBuf,
        key: &'static str,
        value: String,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub(crate) fn map_store_error(err: StoreError) -> AppError {
    AppError::with_message(AppErrorKind::Internal, codes::LOCAL_ERROR, err.to_string())
}

/// Record files of one cluster, kept under `<state_dir>/<cluster>/`.
#[derive(Debug, Clone)]
pub struct RecordDir {
    root: PathBuf,
}

impl RecordDir {
    pub fn new(state_dir: &Path, cluster: &str) -> Self {
        Self {
            root: state_dir.join(cluster),
        }
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.root.join(file)
    }

    /// `None` when the file does not exist.
    pub fn read(&self, file: &str) -> Result<Option<Fields>> {
        let path = self.path(file);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let map = env_file::parse(&text).map_err(|source| StoreError::Format {
            path: path.clone(),
            source,
        })?;
        Ok(Some(Fields { path, map }))
    }

    /// Replaces `file` through a temporary sibling and a rename.
    pub fn write(&self, file: &str, entries: &[(&str, String)]) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(io_error(&self.root))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root).map_err(io_error(&self.root))?;
        tmp.write_all(env_file::render(entries).as_bytes())
            .map_err(io_error(tmp.path()))?;
        tmp.as_file().sync_all().map_err(io_error(tmp.path()))?;
        let path = self.path(file);
        tmp.persist(&path).map_err(|err| StoreError::Io {
            path,
            source: err.error,
        })?;
        Ok(())
    }

    pub fn remove(&self, file: &str) -> Result<()> {
        let path = self.path(file);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError {
    let path = path.to_path_buf();
    move |source| StoreError::Io { path, source }
}

/// Parsed record with typed accessors that name the file on error.
pub struct Fields {
    path: PathBuf,
    map: BTreeMap<String, String>,
}

impl Fields {
    pub fn optional(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn required(&self, key: &'static str) -> Result<String> {
        self.map
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| StoreError::MissingKey {
                path: self.path.clone(),
                key,
            })
    }

    pub fn port(&self, key: &'static str) -> Result<u16> {
        let raw = self.required(key)?;
        raw.parse::<u16>()
            .ok()
            .filter(|p| *p > 0)
            .ok_or(StoreError::InvalidValue {
                path: self.path.clone(),
                key,
                value: raw,
            })
    }
}
