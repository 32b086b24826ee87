//! HTTP response building helpers
//!
//! Every handler answers with JSON; errors use `{"error": ..., "retryable": ...}`.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::error::GamificationError;

/// Build a JSON response with the given status code
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// 200 OK with a JSON body
pub fn ok<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, body)
}

/// 201 Created with a JSON body
pub fn created<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::CREATED, body)
}

pub fn no_content() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
}

fn error_body(status: StatusCode, message: &str, retryable: bool) -> Response<Full<Bytes>> {
    json_response(
        status,
        &serde_json::json!({ "error": message, "retryable": retryable }),
    )
}

pub fn not_found(message: &str) -> Response<Full<Bytes>> {
    error_body(StatusCode::NOT_FOUND, message, false)
}

pub fn bad_request(message: &str) -> Response<Full<Bytes>> {
    error_body(StatusCode::BAD_REQUEST, message, false)
}

pub fn unauthorized(message: &str) -> Response<Full<Bytes>> {
    error_body(StatusCode::UNAUTHORIZED, message, false)
}

pub fn method_not_allowed() -> Response<Full<Bytes>> {
    error_body(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed", false)
}

/// Map a service error onto its HTTP status
pub fn error_response(error: &GamificationError) -> Response<Full<Bytes>> {
    let status = match error {
        GamificationError::Validation(_) | GamificationError::Json(_) => StatusCode::BAD_REQUEST,
        GamificationError::DuplicateSubmission { .. } | GamificationError::Conflict(_) => {
            StatusCode::CONFLICT
        }
        GamificationError::NotFound(_) => StatusCode::NOT_FOUND,
        GamificationError::Forbidden(_) => StatusCode::FORBIDDEN,
        GamificationError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    error_body(status, &error.to_string(), error.is_retryable())
}

/// Wrap a service result into a 200 response
pub fn from_result<T: Serialize>(result: Result<T, GamificationError>) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => ok(&value),
        Err(e) => error_response(&e),
    }
}

/// Wrap an optional service result; `None` becomes 404
pub fn from_option<T: Serialize>(
    result: Result<Option<T>, GamificationError>,
    not_found_msg: &str,
) -> Response<Full<Bytes>> {
    match result {
        Ok(Some(value)) => ok(&value),
        Ok(None) => not_found(not_found_msg),
        Err(e) => error_response(&e),
    }
}

pub fn from_create_result<T: Serialize>(
    result: Result<T, GamificationError>,
) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => created(&value),
        Err(e) => error_response(&e),
    }
}

pub fn from_delete_result(result: Result<(), GamificationError>) -> Response<Full<Bytes>> {
    match result {
        Ok(()) => no_content(),
        Err(e) => error_response(&e),
    }
}
