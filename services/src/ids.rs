//! Identifier helpers.

use uuid::Uuid;

/// Deterministic UUIDv5 from an arbitrary string id.
pub fn stable_uuid(id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, id.as_bytes())
}

/// Fresh order id (`ord-` + 32 hex chars).
pub fn new_order_id() -> String {
    format!("ord-{}", Uuid::new_v4().simple())
}

/// Fresh audit trace id (`trc-` + 32 hex chars).
pub fn new_trace_id() -> String {
    format!("trc-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_uuid_is_deterministic() {
        assert_eq!(stable_uuid("store-a"), stable_uuid("store-a"));
        assert_ne!(stable_uuid("store-a"), stable_uuid("store-b"));
    }

    #[test]
    fn fresh_ids_carry_prefixes() {
        assert!(new_order_id().starts_with("ord-"));
        assert!(new_trace_id().starts_with("trc-"));
        assert_ne!(new_trace_id(), new_trace_id());
    }
}
