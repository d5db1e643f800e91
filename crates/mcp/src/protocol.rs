// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! JSON-RPC 2.0 message types and the MCP error code ranges.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use quarry_types::ErrorKind;

/// The MCP protocol revision this server speaks.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC standard codes plus the reserved MCP ranges.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub const CONNECTION_FAILED: i64 = -32000;
    pub const TIMEOUT: i64 = -32001;
    pub const TOOL_NOT_FOUND: i64 = -32020;
    pub const TOOL_EXECUTION_FAILED: i64 = -32021;
    pub const INVALID_TOOL_INPUT: i64 = -32023;
}

/// The code a dispatcher error surfaces with when it is reported at the
/// JSON-RPC level rather than inside a tool result envelope.
pub fn error_code_for(kind: ErrorKind) -> i64 {
    match kind {
        ErrorKind::ToolNotFound => error_codes::TOOL_NOT_FOUND,
        ErrorKind::InvalidArguments | ErrorKind::InvalidKeyLiteral | ErrorKind::InvalidBounds => {
            error_codes::INVALID_TOOL_INPUT
        }
        ErrorKind::EvaluatorTimeout => error_codes::TIMEOUT,
        _ => error_codes::TOOL_EXECUTION_FAILED,
    }
}

/// An incoming request or notification. The `id` distinguishes them:
/// notifications have none and never get a response. Ids may be numbers
/// or strings and are echoed verbatim.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_accept_number_and_string_ids() {
        let request: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#).unwrap();
        assert_eq!(request.id, Some(serde_json::json!(7)));

        let request: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"abc","method":"ping"}"#).unwrap();
        assert_eq!(request.id, Some(serde_json::json!("abc")));

        // notification
        let request: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .unwrap();
        assert_eq!(request.id, None);
    }

    #[test]
    fn responses_serialize_without_empty_slots() {
        let response = JsonRpcResponse::ok(serde_json::json!(1), serde_json::json!({}));
        let text = serde_json::to_string(&response).unwrap();
        assert!(!text.contains("error"));

        let response = JsonRpcResponse::error(
            serde_json::json!("x"),
            error_codes::METHOD_NOT_FOUND,
            "no such method",
        );
        let text = serde_json::to_string(&response).unwrap();
        assert!(text.contains("-32601"));
        assert!(!text.contains("result"));
    }

    #[test]
    fn dispatcher_errors_map_into_the_reserved_ranges() {
        assert_eq!(
            error_code_for(ErrorKind::ToolNotFound),
            error_codes::TOOL_NOT_FOUND
        );
        assert_eq!(
            error_code_for(ErrorKind::InvalidArguments),
            error_codes::INVALID_TOOL_INPUT
        );
        assert_eq!(
            error_code_for(ErrorKind::KeyNotFound),
            error_codes::TOOL_EXECUTION_FAILED
        );
    }
}
