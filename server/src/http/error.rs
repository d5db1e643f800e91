// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use quarry_types::{Error, ErrorKind};

/// This error is used by handlers to propagate tool and manager errors,
/// and later converted to a response through the IntoResponse
/// implementation.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub Error);

/// # Error description response
///
/// Stable identifier plus human-readable message.
#[derive(Debug, Serialize)]
struct ErrorDescriptionResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = match self.0.kind() {
            ErrorKind::KeyNotFound
            | ErrorKind::ColumnFamilyNotFound
            | ErrorKind::ColumnFamilyEmpty
            | ErrorKind::ToolNotFound => StatusCode::NOT_FOUND,
            ErrorKind::ColumnFamilyExists | ErrorKind::PathInUse => StatusCode::CONFLICT,
            ErrorKind::CapabilityDenied | ErrorKind::CannotDropDefault => StatusCode::FORBIDDEN,
            ErrorKind::InvalidArguments
            | ErrorKind::InvalidKeyLiteral
            | ErrorKind::InvalidBounds
            | ErrorKind::InvalidName => StatusCode::BAD_REQUEST,
            ErrorKind::NoDatabase => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::EvaluatorTimeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ErrorDescriptionResponse {
            error: self.0.kind().as_str(),
            message: self.0.to_string(),
        });
        (status_code, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_onto_http_statuses() {
        let cases = [
            (Error::key_not_found("default", "k"), StatusCode::NOT_FOUND),
            (Error::NoDatabase, StatusCode::SERVICE_UNAVAILABLE),
            (
                Error::CapabilityDenied { operation: "put" },
                StatusCode::FORBIDDEN,
            ),
            (
                Error::ColumnFamilyExists("x".to_owned()),
                StatusCode::CONFLICT,
            ),
            (
                Error::invalid_arguments("limit", "expected integer"),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (error, expected) in cases {
            let response = ApiError(error).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
