//! Request-id middleware: every response carries `X-Request-Id`, keeping
//! an incoming id when the client sent one.

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

fn incoming_id(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get("X-Request-Id")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub async fn request_id_mw(req: Request<Body>, next: Next) -> Response {
    let id = incoming_id(&req).unwrap_or_else(|| {
        let nanos = Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_else(|| Utc::now().timestamp_micros().saturating_mul(1000));
        format!("req-{nanos}")
    });

    let mut res = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        res.headers_mut().insert("X-Request-Id", value);
    }
    res
}
