// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The MCP server: line-delimited JSON-RPC over stdio or TCP.
//!
//! Stdio is the primary transport: one JSON object per line on stdin, one
//! per line on stdout, log lines on stderr. The TCP transport uses the
//! same newline framing, one task per connection. Requests within a
//! connection are handled in arrival order; connections are isolated from
//! each other. There is no cancellation: an in-flight tool call runs to
//! completion and a disconnected client's response is discarded.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use quarry_tools::{ToolContext, ToolRegistry};
use quarry_types::config::Configuration;
use quarry_types::ErrorKind;

use crate::protocol::{
    error_code_for, error_codes, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION,
};

struct Inner {
    registry: ToolRegistry,
    ctx: ToolContext,
    server_name: String,
    server_version: String,
    max_sessions: usize,
    session_timeout: std::time::Duration,
}

#[derive(Clone)]
pub struct McpServer {
    inner: Arc<Inner>,
}

impl McpServer {
    pub fn new(config: &Configuration, ctx: ToolContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: ToolRegistry::standard_filtered(config),
                ctx,
                server_name: config.name.clone(),
                server_version: config.version.clone(),
                max_sessions: config.max_concurrent_sessions,
                session_timeout: *config.session_timeout,
            }),
        }
    }

    /// Serve a single session over stdin/stdout until EOF.
    pub async fn serve_stdio(&self) -> std::io::Result<()> {
        info!("Serving MCP on stdio");
        let stdin = tokio::io::stdin();
        let stdout = tokio::io::stdout();
        self.serve_connection(stdin, stdout).await
    }

    /// Accept newline-framed connections until shutdown. Each connection
    /// runs on its own task; the semaphore caps concurrent sessions.
    pub async fn serve_tcp(
        &self,
        listener: TcpListener,
        shutdown: drain::Watch,
    ) -> std::io::Result<()> {
        info!(
            addr = %listener.local_addr()?,
            "Serving MCP on tcp"
        );
        let sessions = Arc::new(Semaphore::new(self.inner.max_sessions));
        let shutdown_signal = shutdown.signaled();
        tokio::pin!(shutdown_signal);

        loop {
            tokio::select! {
                _ = &mut shutdown_signal => {
                    info!("MCP server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let Ok(permit) = sessions.clone().try_acquire_owned() else {
                        warn!(%peer, "Rejecting connection: session limit reached");
                        continue;
                    };
                    debug!(%peer, "Accepted MCP connection");
                    let server = self.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        let (read, write) = stream.into_split();
                        let idle = Some(server.inner.session_timeout);
                        if let Err(e) = server.serve_lines(read, write, idle).await {
                            debug!(%peer, "Connection ended: {e}");
                        }
                    });
                }
            }
        }
    }

    /// Drain one line-delimited connection, in order.
    pub async fn serve_connection<R, W>(&self, read: R, write: W) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.serve_lines(read, write, None).await
    }

    /// Sessions with an idle timeout are dropped when no line arrives in
    /// time; an in-flight call still runs to completion.
    async fn serve_lines<R, W>(
        &self,
        read: R,
        mut write: W,
        idle: Option<std::time::Duration>,
    ) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(read).lines();
        loop {
            let line = match idle {
                Some(timeout) => match tokio::time::timeout(timeout, lines.next_line()).await {
                    Ok(line) => line?,
                    Err(_) => {
                        info!("Dropping idle session");
                        return Ok(());
                    }
                },
                None => lines.next_line().await?,
            };
            let Some(line) = line else {
                return Ok(());
            };
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_message(&line).await {
                write.write_all(response.as_bytes()).await?;
                write.write_all(b"\n").await?;
                write.flush().await?;
            }
        }
    }

    /// Handle one raw message. Returns `None` for notifications.
    pub async fn handle_message(&self, raw: &str) -> Option<String> {
        let parsed: Value = match serde_json::from_str(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                let response = JsonRpcResponse::error(
                    Value::Null,
                    error_codes::PARSE_ERROR,
                    format!("parse error: {e}"),
                );
                return Some(serde_json::to_string(&response).expect("responses serialize"));
            }
        };
        // ids must echo verbatim even when the request shape is broken
        let id = parsed.get("id").cloned().unwrap_or(Value::Null);
        let request: JsonRpcRequest = match serde_json::from_value(parsed) {
            Ok(request) => request,
            Err(e) => {
                let response = JsonRpcResponse::error(
                    id,
                    error_codes::INVALID_REQUEST,
                    format!("invalid request: {e}"),
                );
                return Some(serde_json::to_string(&response).expect("responses serialize"));
            }
        };

        let is_notification = request.id.is_none();
        let response = self.handle_request(request).await;
        if is_notification {
            return None;
        }
        Some(serde_json::to_string(&response).expect("responses serialize"))
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone().unwrap_or(Value::Null);
        if request.jsonrpc != crate::protocol::JSONRPC_VERSION {
            return JsonRpcResponse::error(
                id,
                error_codes::INVALID_REQUEST,
                "jsonrpc must be \"2.0\"",
            );
        }

        match request.method.as_str() {
            "initialize" => JsonRpcResponse::ok(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "serverInfo": {
                        "name": self.inner.server_name,
                        "version": self.inner.server_version,
                    },
                    "capabilities": {
                        "tools": {"listChanged": true},
                    },
                }),
            ),
            "ping" => JsonRpcResponse::ok(id, json!({})),
            "tools/list" => {
                let tools: Vec<_> = self.inner.registry.descriptors().collect();
                JsonRpcResponse::ok(id, json!({"tools": tools}))
            }
            "tools/call" => self.handle_tool_call(id, request.params).await,
            method if method.starts_with("notifications/") => {
                // accepted and ignored; no response is sent for these
                debug!(method, "Ignoring notification");
                JsonRpcResponse::ok(id, json!({}))
            }
            method => JsonRpcResponse::error(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("method '{method}' not found"),
            ),
        }
    }

    async fn handle_tool_call(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params = params.unwrap_or(Value::Null);
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return JsonRpcResponse::error(
                id,
                error_codes::INVALID_PARAMS,
                "params.name is required",
            );
        };
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));

        match self
            .inner
            .registry
            .dispatch(&self.inner.ctx, name, arguments)
            .await
        {
            Ok(value) => {
                let result = quarry_tools::ToolCallResult::text(
                    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()),
                );
                JsonRpcResponse::ok(
                    id,
                    serde_json::to_value(result).expect("tool results serialize"),
                )
            }
            // protocol-level failures use the reserved JSON-RPC ranges...
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::ToolNotFound
                        | ErrorKind::InvalidArguments
                        | ErrorKind::InvalidKeyLiteral
                ) =>
            {
                JsonRpcResponse::error(id, error_code_for(e.kind()), e.to_string())
            }
            // ...while execution failures ride inside the result envelope
            Err(e) => {
                let result = quarry_tools::ToolCallResult::error(
                    json!({
                        "error": e.kind().as_str(),
                        "message": e.to_string(),
                    })
                    .to_string(),
                );
                JsonRpcResponse::ok(
                    id,
                    serde_json::to_value(result).expect("tool results serialize"),
                )
            }
        }
    }
}
