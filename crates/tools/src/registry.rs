// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Tool registry and dispatcher.
//!
//! Every front-end funnels into [`ToolRegistry::dispatch`]: look the tool
//! up, validate arguments against its schema, resolve the active store
//! through the database manager, gate write tools on the store's access
//! mode, and only then invoke the engine. Errors pass through unchanged;
//! [`ToolRegistry::call`] additionally wraps them into the uniform
//! `ToolCallResult` envelope.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use quarry_store::evaluator::Evaluator;
use quarry_store::{DatabaseManager, Store};
use quarry_types::config::Configuration;
use quarry_types::{Error, Result};

use crate::descriptor::{Capability, ToolCallResult, ToolDescriptor};
use crate::invokers;
use crate::schema;

#[derive(Clone)]
pub struct ToolContext {
    pub manager: Arc<DatabaseManager>,
    pub evaluator: Arc<dyn Evaluator>,
}

impl ToolContext {
    pub fn new(manager: Arc<DatabaseManager>, evaluator: Arc<dyn Evaluator>) -> Self {
        Self { manager, evaluator }
    }
}

pub(crate) type Invoker = Arc<
    dyn Fn(ToolContext, Arc<Store>, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync,
>;

pub(crate) struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub invoker: Invoker,
}

pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
}

impl ToolRegistry {
    /// The full registry of stable tools.
    pub fn standard() -> Self {
        Self {
            tools: invokers::standard_tools(),
        }
    }

    /// The standard registry, filtered by the configuration's
    /// `enable_all_tools` / `enabled_tools` / `disabled_tools`.
    pub fn standard_filtered(config: &Configuration) -> Self {
        let mut registry = Self::standard();
        registry
            .tools
            .retain(|tool| config.is_tool_enabled(tool.descriptor.name));
        registry
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter().map(|tool| &tool.descriptor)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke a tool, returning its structured result or the first error
    /// in the validate → resolve → gate → invoke chain.
    pub async fn dispatch(&self, ctx: &ToolContext, name: &str, args: Value) -> Result<Value> {
        let tool = self
            .tools
            .iter()
            .find(|tool| tool.descriptor.name == name)
            .ok_or_else(|| Error::ToolNotFound(name.to_owned()))?;

        schema::validate(&tool.descriptor.input_schema, &args)?;

        let store = ctx.manager.store()?;
        if tool.descriptor.capability == Capability::Write && store.mode().is_read_only() {
            return Err(Error::CapabilityDenied {
                operation: tool.descriptor.name,
            });
        }

        debug!(tool = name, "Dispatching tool call");
        (tool.invoker)(ctx.clone(), store, args).await
    }

    /// Invoke a tool and wrap the outcome in the MCP result envelope.
    pub async fn call(&self, ctx: &ToolContext, name: &str, args: Value) -> ToolCallResult {
        match self.dispatch(ctx, name, args).await {
            Ok(value) => ToolCallResult::text(
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()),
            ),
            Err(e) => ToolCallResult::error(
                serde_json::json!({
                    "error": e.kind().as_str(),
                    "message": e.to_string(),
                })
                .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use quarry_store::evaluator::ProcessEvaluator;
    use quarry_store::AccessMode;
    use quarry_types::ErrorKind;

    fn context() -> (tempfile::TempDir, ToolContext) {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(DatabaseManager::new());
        manager.connect(dir.path(), AccessMode::ReadWrite).unwrap();
        (
            dir,
            ToolContext::new(manager, Arc::new(ProcessEvaluator::default())),
        )
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let (_dir, ctx) = context();
        let registry = ToolRegistry::standard();
        let err = registry
            .dispatch(&ctx, "frobnicate", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolNotFound);
    }

    #[tokio::test]
    async fn arguments_are_validated_before_dispatch() {
        let (_dir, ctx) = context();
        let registry = ToolRegistry::standard();
        let err = registry
            .dispatch(&ctx, "get", json!({"key": 42}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);

        let err = registry
            .dispatch(&ctx, "get", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);
    }

    #[tokio::test]
    async fn no_database_is_reported() {
        let manager = Arc::new(DatabaseManager::new());
        let ctx = ToolContext::new(manager, Arc::new(ProcessEvaluator::default()));
        let registry = ToolRegistry::standard();
        let err = registry
            .dispatch(&ctx, "get", json!({"key": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoDatabase);
    }

    #[tokio::test]
    async fn put_get_delete_through_the_dispatcher() {
        let (_dir, ctx) = context();
        let registry = ToolRegistry::standard();

        registry
            .dispatch(&ctx, "put", json!({"key": "k1", "value": "v1"}))
            .await
            .unwrap();

        let result = registry
            .dispatch(&ctx, "get", json!({"key": "k1"}))
            .await
            .unwrap();
        assert_eq!(result["value"], "v1");
        assert_eq!(result["value_is_binary"], false);

        registry
            .dispatch(&ctx, "delete", json!({"key": "k1"}))
            .await
            .unwrap();
        let err = registry
            .dispatch(&ctx, "get", json!({"key": "k1"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyNotFound);
    }

    #[tokio::test]
    async fn read_only_store_denies_writes_before_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        {
            let manager = DatabaseManager::new();
            manager.connect(dir.path(), AccessMode::ReadWrite).unwrap();
            manager.disconnect();
        }
        let manager = Arc::new(DatabaseManager::new());
        manager.connect(dir.path(), AccessMode::ReadOnly).unwrap();
        let ctx = ToolContext::new(manager, Arc::new(ProcessEvaluator::default()));
        let registry = ToolRegistry::standard();

        let err = registry
            .dispatch(&ctx, "put", json!({"cf": "default", "key": "x", "value": "y"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapabilityDenied);

        // a subsequent read succeeds, and the denied write left no trace
        let err = registry
            .dispatch(&ctx, "get", json!({"cf": "default", "key": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyNotFound);
    }

    #[tokio::test]
    async fn scan_pages_compose() {
        let (_dir, ctx) = context();
        let registry = ToolRegistry::standard();
        for i in 1..=10 {
            registry
                .dispatch(
                    &ctx,
                    "put",
                    json!({"key": format!("k{i:02}"), "value": format!("v{i:02}")}),
                )
                .await
                .unwrap();
        }

        let mut collected = Vec::new();
        let mut after: Option<String> = None;
        let mut pages = 0;
        loop {
            let mut args = json!({"limit": 3});
            if let Some(cursor) = &after {
                args["after"] = json!(cursor);
            }
            let page = registry.dispatch(&ctx, "scan", args).await.unwrap();
            pages += 1;
            for entry in page["entries"].as_array().unwrap() {
                collected.push(entry["key"].as_str().unwrap().to_owned());
            }
            if !page["has_more"].as_bool().unwrap() {
                break;
            }
            after = Some(page["next_cursor"].as_str().unwrap().to_owned());
        }

        assert_eq!(pages, 4);
        assert_eq!(
            collected,
            (1..=10).map(|i| format!("k{i:02}")).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn registry_honors_tool_filters() {
        let mut config = Configuration::default();
        config.disabled_tools = vec!["transform".to_owned()];
        let registry = ToolRegistry::standard_filtered(&config);
        assert!(registry.descriptors().all(|d| d.name != "transform"));
        assert_eq!(registry.len(), 15);

        let (_dir, ctx) = context();
        let err = registry
            .dispatch(&ctx, "transform", json!({"value_expr": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolNotFound);
    }

    #[tokio::test]
    async fn call_wraps_results_and_errors() {
        let (_dir, ctx) = context();
        let registry = ToolRegistry::standard();

        let result = registry.call(&ctx, "list_column_families", json!({})).await;
        assert!(!result.is_error);
        assert!(result.content[0].text.contains("default"));

        let result = registry.call(&ctx, "get", json!({"key": "missing"})).await;
        assert!(result.is_error);
        assert!(result.content[0].text.contains("KeyNotFound"));
    }
}
