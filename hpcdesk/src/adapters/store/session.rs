// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use super::{RecordDir, Result, map_store_error};
use crate::app::errors::AppResult;
use crate::app::ports::SessionStorePort;
use crate::app::types::{JobHandle, JoinUrl, SessionRecord};

const SESSION_FILE: &str = "session.env";
const PENDING_FILE: &str = "job.env";

pub struct FileSessionStore {
    records: RecordDir,
}

impl FileSessionStore {
    pub fn new(state_dir: &Path, cluster: &str) -> Self {
        Self {
            records: RecordDir::new(state_dir, cluster),
        }
    }

    fn read_record(&self) -> Result<Option<SessionRecord>> {
        let Some(fields) = self.records.read(SESSION_FILE)? else {
            return Ok(None);
        };
        Ok(Some(SessionRecord {
            node: fields.required("NODE")?,
            job_id: fields.required("JOB_ID")?,
            remote_port: fields.port("REMOTE_PORT")?,
            local_port: fields.port("LOCAL_PORT")?,
            join_url: JoinUrl(fields.required("JOIN_URL")?),
        }))
    }

    fn read_pending(&self) -> Result<Option<JobHandle>> {
        let Some(fields) = self.records.read(PENDING_FILE)? else {
            return Ok(None);
        };
        Ok(Some(JobHandle {
            job_id: fields.required("JOB_ID")?,
            job_name: fields.optional("JOB_NAME").unwrap_or_default(),
        }))
    }

    fn remove_all(&self) -> Result<()> {
        // Both removals run even if the first fails.
        let session = self.records.remove(SESSION_FILE);
        let pending = self.records.remove(PENDING_FILE);
        session.and(pending)
    }
}

impl SessionStorePort for FileSessionStore {
    fn load_record(&self) -> AppResult<Option<SessionRecord>> {
        self.read_record().map_err(map_store_error)
    }

    #[tracing::instrument(name = "store", level = "debug", skip_all, fields(op = "save_record"))]
    fn save_record(&self, record: &SessionRecord) -> AppResult<()> {
        self.records
            .write(
                SESSION_FILE,
                &[
                    ("NODE", record.node.clone()),
                    ("JOB_ID", record.job_id.clone()),
                    ("REMOTE_PORT", record.remote_port.to_string()),
                    ("LOCAL_PORT", record.local_port.to_string()),
                    ("JOIN_URL", record.join_url.0.clone()),
                ],
            )
            .map_err(map_store_error)
    }

    fn load_pending(&self) -> AppResult<Option<JobHandle>> {
        self.read_pending().map_err(map_store_error)
    }

    #[tracing::instrument(name = "store", level = "debug", skip_all, fields(op = "save_pending"))]
    fn save_pending(&self, handle: &JobHandle) -> AppResult<()> {
        self.records
            .write(
                PENDING_FILE,
                &[
                    ("JOB_ID", handle.job_id.clone()),
                    ("JOB_NAME", handle.job_name.clone()),
                ],
            )
            .map_err(map_store_error)
    }

    #[tracing::instrument(name = "store", level = "debug", skip_all, fields(op = "clear"))]
    fn clear(&self) -> AppResult<()> {
        self.remove_all().map_err(map_store_error)
    }
}
