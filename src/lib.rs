use crate::api::{ApiResponse, ErrorResponse};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::error::Error;

pub mod api;
pub mod assets;
pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod model;
pub mod routes;
pub mod session;
pub mod store;
pub mod subscriber;
pub mod sync;
pub mod terminal;
pub mod workspace;

#[cfg(test)]
pub(crate) mod testing;

pub fn success<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse { data })).into_response()
}

pub fn created<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse { data })).into_response()
}

pub fn error_response(status: StatusCode, msg: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: msg.to_string(),
        }),
    )
        .into_response()
}

pub fn bad_request(msg: &str) -> Response {
    error_response(StatusCode::BAD_REQUEST, msg)
}

pub fn unauthorized() -> Response {
    error_response(StatusCode::UNAUTHORIZED, "not signed in")
}

pub fn bad_gateway(msg: &str) -> Response {
    error_response(StatusCode::BAD_GATEWAY, msg)
}

/// Joins an error and its sources, outermost first.
pub fn unpack_error(err: &dyn Error) -> String {
    let mut parts = Vec::new();
    parts.push(err.to_string());
    let mut current = err.source();
    while let Some(source) = current {
        parts.push(source.to_string());
        current = source.source();
    }
    parts.join(": ")
}
