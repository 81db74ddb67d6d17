//! Shared low-level helpers used across the gateway crates.
//!
//! - Canonical JSON + SHA-256 content versions (config/cache keying).
//! - Stable and random identifiers (trace ids, order ids).
//! - Atomic file replacement (temp-file + rename).

pub mod canonical;
pub mod fs_atomic;
pub mod ids;
