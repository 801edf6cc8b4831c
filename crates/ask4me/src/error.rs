// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Public error kinds for the ask4me API, mapped to HTTP status codes.
//!
//! Unlike the teacher's JSON `ErrorResponse` envelope, spec §6 requires
//! plain-text error bodies, so `IntoResponse` here emits the message as
//! raw text rather than a serialized struct.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use std::fmt;

/// Error kinds from spec §7, each mapped to a public HTTP signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskError {
    BadRequest,
    Unauthorized,
    Forbidden,
    Gone,
    NotFound,
    MethodNotAllowed,
    Internal,
}

impl AskError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Gone => StatusCode::GONE,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::Gone => "gone",
            Self::NotFound => "not found",
            Self::MethodNotAllowed => "method not allowed",
            Self::Internal => "internal error",
        }
    }

    /// Build the HTTP response for this error, with an optional message override.
    pub fn into_response_with(self, message: impl Into<String>) -> Response {
        let message = message.into();
        let mut response = (self.status(), message).into_response();
        if self == Self::Unauthorized {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                header::HeaderValue::from_static(r#"Bearer realm="ask4me""#),
            );
        }
        response
    }
}

impl fmt::Display for AskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_message())
    }
}

impl IntoResponse for AskError {
    fn into_response(self) -> Response {
        let message = self.default_message().to_owned();
        self.into_response_with(message)
    }
}

impl std::error::Error for AskError {}
