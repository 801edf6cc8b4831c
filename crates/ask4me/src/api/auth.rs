// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared bearer-credential check for `/v1/ask` (spec §4.F, §7).
//!
//! Only this one endpoint uses the `api_key`; the interaction page and
//! its submit endpoint are gated by a per-request token instead (see
//! `api::page`). That split is why this lives beside `ask.rs` rather
//! than as a blanket router-wide layer the way the teacher's
//! `auth::auth_layer` covers its whole API surface.

use axum::http::{HeaderMap, Method};

use crate::config::AskConfig;
use crate::error::AskError;

/// Constant-time comparison, matching the teacher's `auth::constant_time_eq`.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Validate the shared `api_key` from `Authorization: Bearer <key>`, or —
/// for `GET` only — a `key=<credential>` query parameter (spec §4.F:
/// "for constrained-header environments and explicitly discouraged").
pub fn require_api_key(
    config: &AskConfig,
    method: &Method,
    headers: &HeaderMap,
    query_key: Option<&str>,
) -> Result<(), AskError> {
    if let Some(header_value) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        let token = header_value.strip_prefix("Bearer ").ok_or(AskError::Unauthorized)?;
        return if constant_time_eq(token, &config.api_key) { Ok(()) } else { Err(AskError::Unauthorized) };
    }

    if *method == Method::GET {
        if let Some(key) = query_key {
            return if constant_time_eq(key, &config.api_key) { Ok(()) } else { Err(AskError::Unauthorized) };
        }
    }

    Err(AskError::Unauthorized)
}
