// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

pub mod codes {
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const CONNECTION_SETUP_FAILED: &str = "connection_setup_failed";
    pub const AUTHENTICATION_FAILURE: &str = "authentication_failure";
    pub const SUBMISSION_FAILED: &str = "submission_failed";
    pub const ALLOCATION_TIMEOUT: &str = "allocation_timeout";
    pub const ALLOCATION_FAILED: &str = "allocation_failed";
    pub const BACKEND_NOT_FOUND: &str = "backend_not_found";
    pub const BACKEND_LAUNCH_FAILED: &str = "backend_launch_failed";
    pub const BACKEND_START_TIMEOUT: &str = "backend_start_timeout";
    pub const TUNNEL_ESTABLISH_FAILED: &str = "tunnel_establish_failed";
    pub const SESSION_INFO_UNAVAILABLE: &str = "session_info_unavailable";
    pub const REMOTE_ERROR: &str = "remote_error";
    pub const LOCAL_ERROR: &str = "local_error";
    pub const CANCELED: &str = "canceled";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorKind {
    InvalidInput,
    ConnectionSetupFailed,
    SubmissionFailed,
    AllocationTimeout,
    AllocationFailed,
    BackendNotFound,
    BackendLaunchFailed,
    BackendStartTimeout,
    TunnelEstablishFailed,
    SessionInfoUnavailable,
    Cancelled,
    Internal,
}

impl AppErrorKind {
    pub fn default_code(self) -> &'static str {
        match self {
            AppErrorKind::InvalidInput => codes::INVALID_INPUT,
            AppErrorKind::ConnectionSetupFailed => codes::CONNECTION_SETUP_FAILED,
            AppErrorKind::SubmissionFailed => codes::SUBMISSION_FAILED,
            AppErrorKind::AllocationTimeout => codes::ALLOCATION_TIMEOUT,
            AppErrorKind::AllocationFailed => codes::ALLOCATION_FAILED,
            AppErrorKind::BackendNotFound => codes::BACKEND_NOT_FOUND,
            AppErrorKind::BackendLaunchFailed => codes::BACKEND_LAUNCH_FAILED,
            AppErrorKind::BackendStartTimeout => codes::BACKEND_START_TIMEOUT,
            AppErrorKind::TunnelEstablishFailed => codes::TUNNEL_ESTABLISH_FAILED,
            AppErrorKind::SessionInfoUnavailable => codes::SESSION_INFO_UNAVAILABLE,
            AppErrorKind::Cancelled => codes::CANCELED,
            AppErrorKind::Internal => codes::LOCAL_ERROR,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppError {
    kind: AppErrorKind,
    code: &'static str,
    message: String,
    context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind, code: &'static str) -> Self {
        Self {
            kind,
            code,
            message: code.to_string(),
            context: None,
        }
    }

    pub fn with_message(
        kind: AppErrorKind,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: None,
        }
    }

    /// Shorthand for errors that use the kind's default code.
    pub fn of(kind: AppErrorKind, message: impl Into<String>) -> Self {
        Self::with_message(kind, kind.default_code(), message)
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn kind(&self) -> AppErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ctx) = &self.context {
            write!(f, "{} ({})", self.message, ctx)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

pub fn invalid_input(field: &str, message: impl fmt::Display) -> AppError {
    AppError::of(AppErrorKind::InvalidInput, format!("{field}: {message}"))
}

pub fn cancelled() -> AppError {
    AppError::new(AppErrorKind::Cancelled, codes::CANCELED)
}
