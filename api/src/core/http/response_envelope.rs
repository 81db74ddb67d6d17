//! JSON reply envelope for the gateway.
//!
//! Every endpoint answers `{success, data}` or `{success, error}`. The
//! error half carries a stable code plus the contract validator's
//! per-field findings, so a 400 is actionable without log access.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// One rejected field, in the shape the contract validator reports it.
#[derive(Serialize)]
pub struct FieldFault {
    /// Validator path such as `order.items[2].qty`; absent for
    /// body-level problems (unreadable JSON, wrong top-level shape).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Why the field was rejected.
    pub reason: String,
}

impl FieldFault {
    /// Splits one validator `"path: reason"` line into its halves.
    pub fn from_validator_line(line: &str) -> Self {
        match line.split_once(": ") {
            Some((field, reason)) => Self {
                field: Some(field.to_string()),
                reason: reason.to_string(),
            },
            None => Self::body(line),
        }
    }

    /// A fault that concerns the whole body rather than one field.
    pub fn body(reason: impl Into<String>) -> Self {
        Self {
            field: None,
            reason: reason.into(),
        }
    }
}

/// Error half of the envelope.
#[derive(Serialize)]
pub struct ApiFault {
    /// Stable, machine-readable code (`VALIDATION_FAILED`,
    /// `ORDER_NOT_FOUND`, ...).
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<FieldFault>,
}

/// Reply wrapper shared by every JSON endpoint.
#[derive(Serialize)]
pub struct ApiReply<T>
where
    T: Serialize,
{
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiFault>,
}

impl<T> ApiReply<T>
where
    T: Serialize,
{
    /// Successful reply carrying `data`.
    pub fn data(value: T) -> Self {
        Self {
            success: true,
            data: Some(value),
            error: None,
        }
    }

    /// Failure reply with no per-field findings.
    pub fn fault(code: &'static str, message: impl Into<String>) -> Self {
        Self::fault_with(code, message, Vec::new())
    }

    /// Failure reply carrying per-field findings.
    pub fn fault_with(
        code: &'static str,
        message: impl Into<String>,
        details: Vec<FieldFault>,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiFault {
                code,
                message: message.into(),
                details,
            }),
        }
    }

    /// Finishes the reply with an HTTP status.
    pub fn send(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

/// 400 reply built from the contract validator's collected errors.
pub fn validation_failure(errors: Vec<String>) -> Response {
    let details = errors
        .iter()
        .map(|line| FieldFault::from_validator_line(line))
        .collect();
    ApiReply::<()>::fault_with("VALIDATION_FAILED", "Request failed validation.", details)
        .send(StatusCode::BAD_REQUEST)
}
