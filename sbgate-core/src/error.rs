//! API error types and formatting

use serde::Serialize;
use thiserror::Error;

/// Error codes surfaced to HTTP callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Preconditions
    EntityAlreadyExists,
    EntityNotFound,
    ParentNotFound,
    RuleRejected,

    // Request validation
    InvalidParameter,

    // Broker side
    BrokerUnavailable,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntityAlreadyExists => "EntityAlreadyExists",
            Self::EntityNotFound => "EntityNotFound",
            Self::ParentNotFound => "ParentNotFound",
            Self::RuleRejected => "RuleRejected",
            Self::InvalidParameter => "InvalidParameter",
            Self::BrokerUnavailable => "BrokerUnavailable",
            Self::InternalError => "InternalError",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::EntityAlreadyExists | Self::RuleRejected | Self::InvalidParameter => 400,
            Self::EntityNotFound | Self::ParentNotFound => 404,
            Self::BrokerUnavailable => 502,
            Self::InternalError => 500,
        }
    }
}

/// Error returned from an HTTP endpoint
#[derive(Debug, Error)]
#[error("{}: {}", .code.as_str(), .message)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: None,
        }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParameter, message)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Format as the JSON error body
    pub fn to_json(&self) -> String {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct JsonError<'a> {
            code: &'a str,
            message: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            request_id: Option<&'a str>,
        }

        let error = JsonError {
            code: self.code.as_str(),
            message: &self.message,
            request_id: self.request_id.as_deref(),
        };

        serde_json::to_string(&error).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}"}}"#,
                self.code.as_str(),
                self.message.replace('"', "'")
            )
        })
    }
}
