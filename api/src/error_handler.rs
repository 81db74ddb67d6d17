//! Application error type for the HTTP layer.
//!
//! Every failure renders through the shared reply envelope, so clients
//! see one error shape whether a request failed validation, named an
//! unknown order, or tripped over a store fault.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use ingest_engine::IngestError;
use review_store::ReviewStoreError;
use store_config::ConfigStoreError;

use crate::core::http::response_envelope::{ApiReply, FieldFault};

#[derive(Debug, Error)]
pub enum AppError {
    // --- Boot ---
    #[error("startup failed: {0}")]
    Startup(String),

    #[error("failed to bind listener")]
    Bind(#[source] std::io::Error),

    #[error("server error")]
    Server(#[source] std::io::Error),

    // --- Request / routing ---
    /// Request body failed to parse or carry the expected shape.
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    /// Lower-layer failure already mapped to a status and code.
    #[error("{message}")]
    Http {
        status: StatusCode,
        code: &'static str,
        message: String,
    },
}

impl AppError {
    /// HTTP status and stable code, resolved together so the two can
    /// never drift apart.
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Startup(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STARTUP_ERROR"),
            AppError::Bind(_) => (StatusCode::INTERNAL_SERVER_ERROR, "BIND_ERROR"),
            AppError::Server(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SERVER_ERROR"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Http { status, code, .. } => (*status, code),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        let reply = match &self {
            // Body problems carry a detail row, the same way validator
            // findings do.
            AppError::BadRequest(reason) => ApiReply::<()>::fault_with(
                code,
                "Request body was rejected.",
                vec![FieldFault::body(reason.clone())],
            ),
            _ => ApiReply::<()>::fault(code, self.to_string()),
        };
        reply.send(status)
    }
}

/// Malformed JSON bodies surface like any other validation problem;
/// serde's message already names the offending field where it can.
impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// Review-store errors map to precise statuses; the patched-order id
/// mismatch is a client error, unknown orders are 404, the rest is 500.
impl From<ReviewStoreError> for AppError {
    fn from(err: ReviewStoreError) -> Self {
        match &err {
            ReviewStoreError::OrderNotFound(_) => AppError::Http {
                status: StatusCode::NOT_FOUND,
                code: "ORDER_NOT_FOUND",
                message: err.to_string(),
            },
            ReviewStoreError::InvalidPatchedOrderId { .. } => AppError::Http {
                status: StatusCode::BAD_REQUEST,
                code: "INVALID_PATCHED_ORDER_ID",
                message: err.to_string(),
            },
            _ => AppError::Http {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "REVIEW_STORE_ERROR",
                message: err.to_string(),
            },
        }
    }
}

/// Config write failures are client errors (malformed payloads); IO is not.
impl From<ConfigStoreError> for AppError {
    fn from(err: ConfigStoreError) -> Self {
        match &err {
            ConfigStoreError::InvalidMenuCatalog(_)
            | ConfigStoreError::InvalidAllowedMods(_)
            | ConfigStoreError::InvalidLlmConfig(_)
            | ConfigStoreError::InvalidStoreId(_) => AppError::Http {
                status: StatusCode::BAD_REQUEST,
                code: "CONFIG_INVALID",
                message: err.to_string(),
            },
            _ => AppError::Http {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "CONFIG_ERROR",
                message: err.to_string(),
            },
        }
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Review(inner) => inner.into(),
            other => AppError::Http {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "INGEST_ERROR",
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_and_codes_stay_paired() {
        assert_eq!(
            AppError::NotFound.parts(),
            (StatusCode::NOT_FOUND, "NOT_FOUND")
        );
        assert_eq!(
            AppError::BadRequest("nope".into()).parts(),
            (StatusCode::BAD_REQUEST, "BAD_REQUEST")
        );

        let mapped: AppError = ReviewStoreError::OrderNotFound("ord-x".into()).into();
        assert_eq!(mapped.parts(), (StatusCode::NOT_FOUND, "ORDER_NOT_FOUND"));

        let mismatch: AppError = ReviewStoreError::InvalidPatchedOrderId {
            expected: "ord-a".into(),
            got: "ord-b".into(),
        }
        .into();
        assert_eq!(
            mismatch.parts(),
            (StatusCode::BAD_REQUEST, "INVALID_PATCHED_ORDER_ID")
        );
    }

    #[test]
    fn config_shape_errors_are_client_faults() {
        let mapped: AppError =
            ConfigStoreError::InvalidAllowedMods("entry 0 is not a string".into()).into();
        assert_eq!(mapped.parts(), (StatusCode::BAD_REQUEST, "CONFIG_INVALID"));

        let io: AppError =
            ConfigStoreError::Io(std::io::Error::other("disk gone")).into();
        assert_eq!(
            io.parts(),
            (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR")
        );
    }
}
