//! Engine error hierarchy.
//!
//! Pipeline-stage failures (parser, candidates, LLM) never surface here:
//! they downgrade to the rule fallback with a recorded reason. What does
//! surface is what must fail the request: review/audit persistence and a
//! payload that violates its own contract.

use thiserror::Error;

pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    /// The built payload failed contract validation (internal bug).
    #[error("order payload violates contract: {0:?}")]
    Contract(Vec<String>),

    #[error(transparent)]
    Review(#[from] review_store::ReviewStoreError),

    #[error(transparent)]
    Audit(#[from] audit_log::AuditError),

    #[error(transparent)]
    Config(#[from] store_config::ConfigStoreError),
}
