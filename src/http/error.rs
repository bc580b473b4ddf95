use std::error::Error as StdError;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::cache::CacheError;

pub const INTERNAL_SERVER_ERROR: &str = "Internal server error";
pub const CODE_INTERNAL: &str = "INTERNAL_SERVER_ERROR";
pub const CODE_NOT_FOUND: &str = "NOT_FOUND";
pub const CODE_BAD_REQUEST: &str = "BAD_REQUEST";

/// Diagnostic chain carried in response extensions for `log_responses`.
/// Never rendered into a body.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ErrorEnvelope<'a> {
    pub error: &'a str,
    pub code: &'a str,
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    code: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        code: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            code,
            report,
        }
    }

    /// A 500 whose body is the fixed envelope; `error` only reaches the logs.
    pub fn internal(source: &'static str, error: &dyn StdError) -> Self {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        Self {
            status,
            public_message: INTERNAL_SERVER_ERROR,
            code: CODE_INTERNAL,
            report: ErrorReport::from_error(source, status, error),
        }
    }

    pub fn not_found(source: &'static str, detail: impl Into<String>) -> Self {
        Self::new(
            source,
            StatusCode::NOT_FOUND,
            "Not found",
            CODE_NOT_FOUND,
            detail,
        )
    }

    pub fn bad_request(source: &'static str, detail: impl Into<String>) -> Self {
        Self::new(
            source,
            StatusCode::BAD_REQUEST,
            "Request could not be processed",
            CODE_BAD_REQUEST,
            detail,
        )
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let envelope = ErrorEnvelope {
            error: self.public_message,
            code: self.code,
        };
        let mut response = (self.status, Json(envelope)).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<CacheError> for HttpError {
    fn from(error: CacheError) -> Self {
        HttpError::internal("http::adapter", &error)
    }
}
