//! External completion-service adapter.
//!
//! Builds the normalization prompt, invokes the provider with a strict
//! JSON response contract and a per-request timeout, and validates the
//! reply against the candidate constraints. Every way the LLM path can
//! fail maps to a distinct [`FallbackReason`]; the merge step then runs
//! the rule fallback instead.

pub mod client;
pub mod output;
pub mod prompt;
pub mod reason;

pub use client::{LlmExchange, NormalizerClient};
pub use output::{LlmGroup, LlmItem, StructuredOutput};
pub use reason::FallbackReason;
