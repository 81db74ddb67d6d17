//! Append-only structured audit log.
//!
//! Events are line-framed JSON on disk (`audit.log.jsonl`). Appends go
//! through a per-path lock and a masking pass that strips credentials and
//! contact data before anything reaches the file. Reads tolerate a torn
//! trailing line by skipping unparseable records.

pub mod event;
pub mod log;
pub mod mask;
pub mod query;

pub use event::{AuditEvent, AuditEventKind};
pub use log::{AuditError, AuditLog};
pub use query::{OrderTrace, UnresolvedReview};
