//! Legacy POS bridge.
//!
//! Upstream printers speak a `#`/`^` delimited wire format. The bridge
//! parses pulled payloads into per-order receipt text, deduplicates
//! orders by content fingerprint within a sliding window, and feeds the
//! ingest pipeline.

pub mod poll;
pub mod wire;

pub use poll::{BridgeConfig, BridgeError, BridgeStatus, LegacyBridge, PullSummary};
pub use wire::{LegacyOrder, LegacyRecord, WireError, parse_legacy_payload};
