// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use quarry_store::AccessMode;
use quarry_types::Error;

use super::error::ApiError;
use super::AppState;

type ApiResult = Result<Json<Value>, ApiError>;

pub(super) async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

// --- database manager

#[derive(Debug, Deserialize)]
pub(super) struct ConnectRequest {
    path: String,
    #[serde(default)]
    read_only: bool,
}

pub(super) async fn current_database(State(state): State<AppState>) -> Json<Value> {
    match state.manager.current() {
        Some(status) => Json(json!({
            "connected": true,
            "database": status,
        })),
        None => Json(json!({"connected": false})),
    }
}

pub(super) async fn connect_database(
    State(state): State<AppState>,
    Json(request): Json<ConnectRequest>,
) -> ApiResult {
    let mode = if request.read_only {
        AccessMode::ReadOnly
    } else {
        AccessMode::ReadWrite
    };
    let status = state.manager.connect(&request.path, mode)?;
    Ok(Json(json!({"connected": true, "database": status})))
}

pub(super) async fn disconnect_database(State(state): State<AppState>) -> Json<Value> {
    state.manager.disconnect();
    Json(json!({"connected": false}))
}

#[derive(Debug, Deserialize)]
pub(super) struct ValidateRequest {
    path: String,
}

pub(super) async fn validate_database(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> ApiResult {
    let report = state.manager.validate(&request.path);
    Ok(Json(serde_json::to_value(report).expect("reports serialize")))
}

pub(super) async fn list_favorites(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"favorites": state.manager.favorites()}))
}

#[derive(Debug, Deserialize)]
pub(super) struct FavoriteRequest {
    path: String,
}

pub(super) async fn add_favorite(
    State(state): State<AppState>,
    Json(request): Json<FavoriteRequest>,
) -> Json<Value> {
    state.manager.add_favorite(request.path.into());
    Json(json!({"favorites": state.manager.favorites()}))
}

// --- data routes, each a thin translation into a tool call

async fn dispatch(state: &AppState, tool: &str, args: Value) -> ApiResult {
    let value = state.registry.dispatch(&state.ctx, tool, args).await?;
    Ok(Json(value))
}

pub(super) async fn list_column_families(State(state): State<AppState>) -> ApiResult {
    dispatch(&state, "list_column_families", json!({})).await
}

pub(super) async fn get_key(
    State(state): State<AppState>,
    Path((cf, key)): Path<(String, String)>,
) -> ApiResult {
    dispatch(&state, "get", json!({"cf": cf, "key": key})).await
}

pub(super) async fn put_key(
    State(state): State<AppState>,
    Path(cf): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult {
    dispatch(&state, "put", with_cf(body, cf)?).await
}

pub(super) async fn scan(
    State(state): State<AppState>,
    Path(cf): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult {
    dispatch(&state, "scan", with_cf(body, cf)?).await
}

pub(super) async fn prefix_scan(
    State(state): State<AppState>,
    Path(cf): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult {
    dispatch(&state, "prefix_scan", with_cf(body, cf)?).await
}

pub(super) async fn search(
    State(state): State<AppState>,
    Path(cf): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult {
    dispatch(&state, "search", with_cf(body, cf)?).await
}

pub(super) async fn json_query(
    State(state): State<AppState>,
    Path(cf): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult {
    dispatch(&state, "json_query", with_cf(body, cf)?).await
}

/// The column family always comes from the route, not the body.
fn with_cf(body: Value, cf: String) -> Result<Value, ApiError> {
    let mut args = match body {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        _ => {
            return Err(ApiError(Error::invalid_arguments(
                "body",
                "expected a JSON object",
            )))
        }
    };
    args.insert("cf".to_owned(), Value::String(cf));
    Ok(Value::Object(args))
}
