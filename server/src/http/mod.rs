// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! REST mapping of the tool registry plus the database-manager routes.
//!
//! Every data route translates its request shape into a tool call and
//! funnels through the dispatcher; capability checks, validation and
//! error mapping live there, not here. Data routes short-circuit with 503
//! while no database is connected (including mid-switch).

mod error;
mod handlers;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use quarry_store::DatabaseManager;
use quarry_tools::{ToolContext, ToolRegistry};

use self::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<DatabaseManager>,
    pub registry: Arc<ToolRegistry>,
    pub ctx: ToolContext,
}

impl AppState {
    pub fn new(registry: Arc<ToolRegistry>, ctx: ToolContext) -> Self {
        Self {
            manager: ctx.manager.clone(),
            registry,
            ctx,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let data_routes = Router::new()
        .route("/cf", get(handlers::list_column_families))
        .route("/cf/:cf/get/:key", get(handlers::get_key))
        .route("/cf/:cf/put", post(handlers::put_key))
        .route("/cf/:cf/scan", post(handlers::scan))
        .route("/cf/:cf/prefix", post(handlers::prefix_scan))
        .route("/cf/:cf/search", post(handlers::search))
        .route("/cf/:cf/jsonquery", post(handlers::json_query))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_database,
        ));

    let manager_routes = Router::new()
        .route("/databases/current", get(handlers::current_database))
        .route("/databases/connect", post(handlers::connect_database))
        .route("/databases/disconnect", post(handlers::disconnect_database))
        .route("/databases/validate", post(handlers::validate_database))
        .route("/databases/favorites", get(handlers::list_favorites))
        .route("/databases/favorites", post(handlers::add_favorite))
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", manager_routes.merge(data_routes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Reject data routes while disconnected, before any handler runs.
async fn require_database(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.manager.is_connected() {
        return Err(ApiError(quarry_types::Error::NoDatabase));
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::{header, Method, Request as HttpRequest, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use quarry_store::evaluator::ProcessEvaluator;

    fn test_router() -> Router {
        let manager = Arc::new(DatabaseManager::new());
        let ctx = ToolContext::new(manager, Arc::new(ProcessEvaluator::default()));
        let registry = Arc::new(ToolRegistry::standard());
        router(AppState::new(registry, ctx))
    }

    async fn request(
        router: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = match body {
            Some(body) => HttpRequest::builder()
                .method(method)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => HttpRequest::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_is_always_up() {
        let router = test_router();
        let (status, body) = request(&router, Method::GET, "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn data_routes_return_503_while_disconnected() {
        let router = test_router();
        let (status, body) = request(&router, Method::GET, "/api/v1/cf", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "NoDatabase");

        let (status, _) = request(
            &router,
            Method::POST,
            "/api/v1/cf/default/scan",
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        // manager routes stay reachable
        let (status, body) =
            request(&router, Method::GET, "/api/v1/databases/current", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connected"], false);
    }

    #[tokio::test]
    async fn connect_put_get_scan_disconnect_flow() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router();

        let (status, body) = request(
            &router,
            Method::POST,
            "/api/v1/databases/connect",
            Some(json!({"path": dir.path()})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connected"], true);
        assert_eq!(body["database"]["cf_count"], 1);

        let (status, _) = request(
            &router,
            Method::POST,
            "/api/v1/cf/default/put",
            Some(json!({"key": "user:1", "value": "A"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = request(
            &router,
            Method::GET,
            "/api/v1/cf/default/get/user:1",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value"], "A");
        assert_eq!(body["key_is_binary"], false);

        let (status, body) = request(
            &router,
            Method::POST,
            "/api/v1/cf/default/scan",
            Some(json!({"limit": 10})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["entries"][0]["key"], "user:1");

        let (status, body) = request(
            &router,
            Method::POST,
            "/api/v1/databases/disconnect",
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connected"], false);

        let (status, _) = request(&router, Method::GET, "/api/v1/cf", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn errors_carry_the_stable_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router();
        request(
            &router,
            Method::POST,
            "/api/v1/databases/connect",
            Some(json!({"path": dir.path()})),
        )
        .await;

        let (status, body) = request(
            &router,
            Method::GET,
            "/api/v1/cf/default/get/missing",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "KeyNotFound");

        let (status, body) = request(
            &router,
            Method::POST,
            "/api/v1/cf/nope/scan",
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "ColumnFamilyNotFound");

        let (status, body) = request(
            &router,
            Method::POST,
            "/api/v1/cf/default/search",
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "InvalidArguments");
    }

    #[tokio::test]
    async fn read_only_connection_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router();

        // seed and reconnect read-only
        request(
            &router,
            Method::POST,
            "/api/v1/databases/connect",
            Some(json!({"path": dir.path()})),
        )
        .await;
        request(
            &router,
            Method::POST,
            "/api/v1/databases/disconnect",
            Some(json!({})),
        )
        .await;
        let (status, _) = request(
            &router,
            Method::POST,
            "/api/v1/databases/connect",
            Some(json!({"path": dir.path(), "read_only": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = request(
            &router,
            Method::POST,
            "/api/v1/cf/default/put",
            Some(json!({"key": "x", "value": "y"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "CapabilityDenied");
    }

    #[tokio::test]
    async fn favorites_round_trip() {
        let router = test_router();
        let (status, body) = request(
            &router,
            Method::POST,
            "/api/v1/databases/favorites",
            Some(json!({"path": "/data/events"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["favorites"][0], "/data/events");

        let (_, body) =
            request(&router, Method::GET, "/api/v1/databases/favorites", None).await;
        assert_eq!(body["favorites"].as_array().unwrap().len(), 1);
    }
}
