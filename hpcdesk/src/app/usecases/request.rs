// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use crate::app::errors::{AppResult, invalid_input};
use crate::app::ports::PreferencesStorePort;
use crate::app::types::{RequestDraft, ResourceRequest};

/// Turns stored defaults plus user overrides into a validated request.
#[derive(Clone)]
pub struct ResourceRequestBuilder {
    preferences: Arc<dyn PreferencesStorePort>,
}

impl ResourceRequestBuilder {
    pub fn new(preferences: Arc<dyn PreferencesStorePort>) -> Self {
        Self { preferences }
    }

    /// Stored defaults. An unreadable preferences file counts as empty.
    pub fn defaults(&self) -> RequestDraft {
        match self.preferences.load() {
            Ok(draft) => draft,
            Err(err) => {
                tracing::warn!("ignoring unreadable preferences: {err}");
                RequestDraft::default()
            }
        }
    }

    /// Validates `overrides` on top of the stored defaults and saves the
    /// result as the next defaults.
    pub fn build(&self, overrides: RequestDraft) -> AppResult<ResourceRequest> {
        let request = validate(&self.defaults().overlay(overrides))?;
        if let Err(err) = self.preferences.save(&request) {
            tracing::warn!("failed to save preferences: {err}");
        }
        tracing::debug!(?request, "resource request validated");
        Ok(request)
    }
}

pub fn validate(draft: &RequestDraft) -> AppResult<ResourceRequest> {
    Ok(ResourceRequest {
        account: non_empty("account", &draft.account)?,
        duration_hours: positive("duration_hours", &draft.duration_hours)?,
        cpu_count: positive("cpu_count", &draft.cpu_count)?,
        memory_gb: positive("memory_gb", &draft.memory_gb)?,
        wants_accelerator: boolean("wants_accelerator", &draft.wants_accelerator)?,
        container_image_path: non_empty("container_image_path", &draft.container_image_path)?,
        backend_version: non_empty("backend_version", &draft.backend_version)?,
        remote_port: port("remote_port", &draft.remote_port)?,
        local_port: port("local_port", &draft.local_port)?,
    })
}

fn required<'a>(field: &str, value: &'a Option<String>) -> AppResult<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(invalid_input(field, "is required")),
    }
}

fn non_empty(field: &str, value: &Option<String>) -> AppResult<String> {
    required(field, value).map(str::to_string)
}

fn positive(field: &str, value: &Option<String>) -> AppResult<u32> {
    let raw = required(field, value)?;
    match raw.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(invalid_input(
            field,
            format!("must be a positive integer, got '{raw}'"),
        )),
    }
}

fn port(field: &str, value: &Option<String>) -> AppResult<u16> {
    let raw = required(field, value)?;
    match raw.parse::<u16>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(invalid_input(
            field,
            format!("must be a port in 1..=65535, got '{raw}'"),
        )),
    }
}

fn boolean(field: &str, value: &Option<String>) -> AppResult<bool> {
    let raw = required(field, value)?;
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid_input(
            field,
            format!("must be true or false, got '{raw}'"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::errors::AppErrorKind;
    use crate::app::usecases::testing::{MemoryPreferences, request};

    fn complete() -> RequestDraft {
        RequestDraft::from(&request())
    }

    fn rejected_field(draft: RequestDraft) -> String {
        let err = validate(&draft).unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::InvalidInput);
        err.message()
            .split(':')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    #[test]
    fn accepts_complete_draft() {
        assert_eq!(validate(&complete()).unwrap(), request());
    }

    #[test]
    fn rejects_non_positive_numbers() {
        for (value, field) in [("0", "cpu_count"), ("-2", "cpu_count"), ("four", "cpu_count")] {
            let draft = RequestDraft {
                cpu_count: Some(value.to_string()),
                ..complete()
            };
            assert_eq!(rejected_field(draft), field);
        }
        let draft = RequestDraft {
            duration_hours: Some("0".to_string()),
            ..complete()
        };
        assert_eq!(rejected_field(draft), "duration_hours");
        let draft = RequestDraft {
            memory_gb: Some("1.5".to_string()),
            ..complete()
        };
        assert_eq!(rejected_field(draft), "memory_gb");
    }

    #[test]
    fn port_bounds() {
        for bad in ["0", "65536", "-1"] {
            let draft = RequestDraft {
                local_port: Some(bad.to_string()),
                ..complete()
            };
            assert_eq!(rejected_field(draft), "local_port");
        }
        for good in ["1", "65535"] {
            let draft = RequestDraft {
                remote_port: Some(good.to_string()),
                ..complete()
            };
            assert!(validate(&draft).is_ok());
        }
    }

    #[test]
    fn missing_and_blank_fields_are_named() {
        let draft = RequestDraft {
            account: None,
            ..complete()
        };
        assert_eq!(rejected_field(draft), "account");
        let draft = RequestDraft {
            container_image_path: Some("  ".to_string()),
            ..complete()
        };
        assert_eq!(rejected_field(draft), "container_image_path");
    }

    #[test]
    fn booleans_accept_common_spellings() {
        for (raw, expected) in [("YES", true), ("on", true), ("0", false), ("False", false)] {
            let draft = RequestDraft {
                wants_accelerator: Some(raw.to_string()),
                ..complete()
            };
            assert_eq!(validate(&draft).unwrap().wants_accelerator, expected);
        }
        let draft = RequestDraft {
            wants_accelerator: Some("maybe".to_string()),
            ..complete()
        };
        assert_eq!(rejected_field(draft), "wants_accelerator");
    }

    #[test]
    fn build_overlays_flags_and_persists_result() {
        let prefs = Arc::new(MemoryPreferences::with(complete()));
        let builder = ResourceRequestBuilder::new(prefs.clone());
        let built = builder
            .build(RequestDraft {
                cpu_count: Some("16".to_string()),
                ..RequestDraft::default()
            })
            .unwrap();
        assert_eq!(built.cpu_count, 16);
        assert_eq!(built.account, "proj-a");
        assert_eq!(prefs.stored().cpu_count.as_deref(), Some("16"));
    }

    #[test]
    fn build_does_not_persist_invalid_input() {
        let prefs = Arc::new(MemoryPreferences::with(complete()));
        let builder = ResourceRequestBuilder::new(prefs.clone());
        let err = builder
            .build(RequestDraft {
                memory_gb: Some("0".to_string()),
                ..RequestDraft::default()
            })
            .unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::InvalidInput);
        assert_eq!(prefs.stored().memory_gb.as_deref(), Some("16"));
    }
}
