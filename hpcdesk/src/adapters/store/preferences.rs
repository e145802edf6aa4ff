// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use super::{RecordDir, map_store_error};
use crate::app::errors::AppResult;
use crate::app::ports::PreferencesStorePort;
use crate::app::types::{RequestDraft, ResourceRequest};

const PREFERENCES_FILE: &str = "preferences.env";

/// Values are stored as typed by the user; validation happens on load by
/// `ResourceRequestBuilder`, so a hand-edited file cannot bypass it.
pub struct FilePreferencesStore {
    records: RecordDir,
}

impl FilePreferencesStore {
    pub fn new(state_dir: &Path, cluster: &str) -> Self {
        Self {
            records: RecordDir::new(state_dir, cluster),
        }
    }
}

impl PreferencesStorePort for FilePreferencesStore {
    fn load(&self) -> AppResult<RequestDraft> {
        let Some(fields) = self
            .records
            .read(PREFERENCES_FILE)
            .map_err(map_store_error)?
        else {
            return Ok(RequestDraft::default());
        };
        Ok(RequestDraft {
            account: fields.optional("ACCOUNT"),
            duration_hours: fields.optional("DURATION_HOURS"),
            cpu_count: fields.optional("CPU_COUNT"),
            memory_gb: fields.optional("MEMORY_GB"),
            wants_accelerator: fields.optional("WANTS_ACCELERATOR"),
            container_image_path: fields.optional("CONTAINER_IMAGE"),
            backend_version: fields.optional("BACKEND_VERSION"),
            remote_port: fields.optional("REMOTE_PORT"),
            local_port: fields.optional("LOCAL_PORT"),
        })
    }

    #[tracing::instrument(name = "store", level = "debug", skip_all, fields(op = "save_preferences"))]
    fn save(&self, request: &ResourceRequest) -> AppResult<()> {
        self.records
            .write(
                PREFERENCES_FILE,
                &[
                    ("ACCOUNT", request.account.clone()),
                    ("DURATION_HOURS", request.duration_hours.to_string()),
                    ("CPU_COUNT", request.cpu_count.to_string()),
                    ("MEMORY_GB", request.memory_gb.to_string()),
                    ("WANTS_ACCELERATOR", request.wants_accelerator.to_string()),
                    ("CONTAINER_IMAGE", request.container_image_path.clone()),
                    ("BACKEND_VERSION", request.backend_version.clone()),
                    ("REMOTE_PORT", request.remote_port.to_string()),
                    ("LOCAL_PORT", request.local_port.to_string()),
                ],
            )
            .map_err(map_store_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ResourceRequest {
        ResourceRequest {
            account: "proj-a".to_string(),
            duration_hours: 2,
            cpu_count: 4,
            memory_gb: 16,
            wants_accelerator: true,
            container_image_path: "/images/desk.sif".to_string(),
            backend_version: "2.1".to_string(),
            remote_port: 9000,
            local_port: 19000,
        }
    }

    #[test]
    fn missing_file_loads_empty_draft() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePreferencesStore::new(dir.path(), "c1");
        assert_eq!(store.load().unwrap(), RequestDraft::default());
    }

    #[test]
    fn saved_request_loads_as_draft() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePreferencesStore::new(dir.path(), "c1");
        store.save(&request()).unwrap();
        assert_eq!(store.load().unwrap(), RequestDraft::from(&request()));
    }

    #[test]
    fn hand_edited_values_are_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("c1")).unwrap();
        std::fs::write(
            dir.path().join("c1/preferences.env"),
            "# edited\nCPU_COUNT=-3\nACCOUNT='proj b'\n",
        )
        .unwrap();
        let draft = FilePreferencesStore::new(dir.path(), "c1").load().unwrap();
        assert_eq!(draft.cpu_count.as_deref(), Some("-3"));
        assert_eq!(draft.account.as_deref(), Some("proj b"));
        assert!(draft.local_port.is_none());
    }
}
