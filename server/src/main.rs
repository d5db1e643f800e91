// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

mod http;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use quarry_mcp::McpServer;
use quarry_store::evaluator::ProcessEvaluator;
use quarry_store::{AccessMode, DatabaseManager};
use quarry_tools::{ToolContext, ToolRegistry};
use quarry_types::config::{Configuration, TransportType};

#[derive(Debug, Parser)]
#[command(author, version, about = "Quarry server: HTTP API and MCP over TCP")]
struct Options {
    /// Configuration file. Defaults to config.yaml / mcp-server.yaml in
    /// the working directory.
    #[arg(long, env = "QUARRY_CONFIG")]
    config_file: Option<PathBuf>,

    /// Database to open at startup, overriding the configuration file.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Open the database in read-only mode.
    #[arg(long)]
    read_only: bool,

    /// HTTP bind address, e.g. 0.0.0.0:8080, overriding the
    /// configuration file.
    #[arg(long)]
    http_address: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::parse();

    let mut config = Configuration::load_with_file(options.config_file.as_deref())?;
    if let Some(db) = options.db {
        config.database_path = Some(db);
    }
    if options.read_only {
        config.read_only = true;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).context("invalid log_level filter")?,
        )
        .init();

    let manager = Arc::new(DatabaseManager::with_favorites(config.favorites.clone()));
    if let Some(path) = &config.database_path {
        let mode = if config.read_only {
            AccessMode::ReadOnly
        } else {
            AccessMode::ReadWrite
        };
        manager.connect(path, mode)?;
    }

    let ctx = ToolContext::new(manager, Arc::new(ProcessEvaluator::default()));
    let registry = Arc::new(ToolRegistry::standard_filtered(&config));
    info!(tools = registry.len(), "Tool registry ready");

    let (drain_signal, drain_watch) = drain::channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received interrupt, draining");
        drain_signal.drain().await;
    });

    // MCP rides on TCP next to the HTTP API when configured so
    let mcp_handle = if config.transport.transport_type == TransportType::Tcp {
        let mcp = McpServer::new(&config, ctx.clone());
        let listener =
            TcpListener::bind((config.transport.host.as_str(), config.transport.port))
                .await
                .context("failed to bind MCP transport")?;
        let watch = drain_watch.clone();
        Some(tokio::spawn(async move { mcp.serve_tcp(listener, watch).await }))
    } else {
        None
    };

    let state = http::AppState::new(registry, ctx);
    let app = http::router(state);

    let http_address = match options.http_address {
        Some(address) => address.to_string(),
        None => format!("{}:{}", config.http.host, config.http.port),
    };
    let listener = TcpListener::bind(&http_address)
        .await
        .with_context(|| format!("failed to bind {http_address}"))?;
    info!(addr = %listener.local_addr()?, "Serving HTTP API");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = drain_watch.signaled().await;
        })
        .await?;

    if let Some(handle) = mcp_handle {
        let _ = handle.await;
    }

    Ok(())
}
