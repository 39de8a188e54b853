// src/utils/error.rs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub type PlatformResult<T> = Result<T, PlatformError>;

/// Custom error details for additional context.
pub type ErrorDetails = HashMap<String, serde_json::Value>;

/// Main error type for the living-lab core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformError {
    pub message: String,
    pub details: Option<Box<ErrorDetails>>,
    pub status: Option<u16>,
    pub error_code: Option<String>,
    pub kind: ErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    Auth,
    NotFound,
    Conflict,
    Storage,
    Mail,
    Config,
    Serialization,
    Internal,
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for PlatformError {}

impl PlatformError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
            status: None,
            error_code: None,
            kind,
        }
    }

    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = Some(Box::new(details));
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, error_code: impl Into<String>) -> Self {
        self.error_code = Some(error_code.into());
        self
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
            .with_status(400)
            .with_code("VALIDATION_ERROR")
    }

    pub fn auth_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
            .with_status(401)
            .with_code("AUTH_ERROR")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
            .with_status(404)
            .with_code("NOT_FOUND")
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
            .with_status(409)
            .with_code("CONFLICT")
    }

    pub fn storage_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
            .with_status(500)
            .with_code("STORAGE_ERROR")
    }

    pub fn mail_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Mail, message)
            .with_status(502)
            .with_code("MAIL_ERROR")
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
            .with_status(500)
            .with_code("CONFIG_ERROR")
    }

    pub fn serialization_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
            .with_status(400)
            .with_code("SERIALIZATION_ERROR")
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
            .with_status(500)
            .with_code("INTERNAL_ERROR")
    }
}

impl From<serde_json::Error> for PlatformError {
    fn from(err: serde_json::Error) -> Self {
        PlatformError::serialization_error(format!("JSON error: {}", err))
    }
}

impl From<worker::Error> for PlatformError {
    fn from(err: worker::Error) -> Self {
        PlatformError::internal_error(format!("Worker error: {:?}", err))
    }
}

impl From<url::ParseError> for PlatformError {
    fn from(err: url::ParseError) -> Self {
        PlatformError::validation_error(format!("URL parse error: {}", err))
    }
}

impl From<&str> for PlatformError {
    fn from(err: &str) -> Self {
        PlatformError::validation_error(err.to_string())
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        PlatformError::mail_error(format!("HTTP client error: {}", err))
    }
}

impl From<PlatformError> for worker::Error {
    fn from(err: PlatformError) -> Self {
        let message = if let Some(status_code) = err.status {
            format!(
                "[Status: {}] PlatformError (Kind: {:?}): {}",
                status_code, err.kind, err.message
            )
        } else {
            format!("PlatformError (Kind: {:?}): {}", err.kind, err.message)
        };
        worker::Error::RustError(message)
    }
}

#[macro_export]
macro_rules! platform_error {
    ($kind:expr, $msg:expr) => {
        $crate::utils::error::PlatformError::new($kind, $msg)
    };
    ($kind:expr, $msg:expr, $($key:expr => $value:expr),+) => {{
        let mut details = std::collections::HashMap::new();
        $(
            details.insert($key.to_string(), serde_json::json!($value));
        )+
        $crate::utils::error::PlatformError::new($kind, $msg).with_details(details)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_creation_sets_kind_and_message() {
        let error = PlatformError::new(ErrorKind::Validation, "bad input");
        assert_eq!(error.kind, ErrorKind::Validation);
        assert_eq!(error.message, "bad input");
        assert!(error.details.is_none());
    }

    #[test]
    fn convenience_constructors_set_status_and_code() {
        let err = PlatformError::validation_error("bad score");
        assert_eq!(err.status, Some(400));
        assert_eq!(err.error_code.as_deref(), Some("VALIDATION_ERROR"));

        let err = PlatformError::not_found("no such user");
        assert_eq!(err.status, Some(404));
    }

    #[test]
    fn from_serde_json_error_maps_to_serialization_kind() {
        let bad = serde_json::from_str::<serde_json::Value>("{not json}").unwrap_err();
        let err = PlatformError::from(bad);
        assert_eq!(err.kind, ErrorKind::Serialization);
    }

    #[test]
    fn into_worker_error_preserves_status() {
        let err = PlatformError::internal_error("boom").with_status(500);
        let werr: worker::Error = err.into();
        match werr {
            worker::Error::RustError(msg) => assert!(msg.contains("[Status: 500]")),
            _ => panic!("expected RustError"),
        }
    }

    #[test]
    fn macro_builds_error_with_details() {
        let err = platform_error!(ErrorKind::Conflict, "dup trace", "trace" => "abc");
        assert_eq!(err.kind, ErrorKind::Conflict);
        let details = err.details.unwrap();
        assert_eq!(details.get("trace").unwrap(), &serde_json::json!("abc"));
    }
}
