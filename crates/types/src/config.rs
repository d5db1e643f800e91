// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

/// # Quarry configuration file
///
/// Configuration for the quarry server and CLI.
///
/// The server looks for `config.yaml` and the MCP-specific `mcp-server.yaml`
/// in the working directory unless a file is given explicitly with
/// `--config-file <PATH>` or the `QUARRY_CONFIG` environment variable.
///
/// Each configuration entry can be overridden using environment variables,
/// prefixing them with `QUARRY_` and separating nested structs with `__`
/// (double underscore). For example, to configure `transport.port`, the
/// corresponding environment variable is `QUARRY_TRANSPORT__PORT`.
/// Command-line flags take precedence over both.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, derive_builder::Builder)]
#[builder(default)]
#[serde(rename_all = "snake_case", default)]
pub struct Configuration {
    /// Server name, reported by the MCP `initialize` handshake.
    pub name: String,

    /// Server version, reported by the MCP `initialize` handshake.
    pub version: String,

    /// Path of the database to open at startup. When absent, the server
    /// starts disconnected and a database must be attached through the
    /// connect API.
    pub database_path: Option<PathBuf>,

    /// Open the database in read-only mode. Every mutating tool call fails
    /// with `CapabilityDenied` before reaching the store.
    pub read_only: bool,

    pub transport: TransportOptions,

    pub http: HttpOptions,

    /// Maximum number of concurrently served MCP sessions.
    pub max_concurrent_sessions: usize,

    /// # Session timeout
    ///
    /// Idle sessions are dropped after this period.
    ///
    /// Can be configured using the [`humantime`](https://docs.rs/humantime/latest/humantime/fn.parse_duration.html) format.
    #[serde_as(as = "serde_with::DisplayFromStr")]
    pub session_timeout: humantime::Duration,

    /// Expose every registered tool. When `false`, only `enabled_tools`
    /// are served.
    pub enable_all_tools: bool,

    /// Explicit tool allow-list, honored when `enable_all_tools` is off.
    pub enabled_tools: Vec<String>,

    /// Tools removed from the registry regardless of the allow-list.
    pub disabled_tools: Vec<String>,

    /// Log filter directive for `tracing-subscriber`, e.g. `info` or
    /// `quarry_store=debug,info`. `RUST_LOG` overrides this value.
    pub log_level: String,

    /// Favorite database paths, surfaced as metadata by the database
    /// manager. Opaque to the server.
    pub favorites: Vec<PathBuf>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: "quarry".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            database_path: None,
            read_only: false,
            transport: TransportOptions::default(),
            http: HttpOptions::default(),
            max_concurrent_sessions: 16,
            session_timeout: Duration::from_secs(5 * 60).into(),
            enable_all_tools: true,
            enabled_tools: vec![],
            disabled_tools: vec![],
            log_level: "info".to_owned(),
            favorites: vec![],
        }
    }
}

/// MCP transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    Stdio,
    Tcp,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, derive_builder::Builder)]
#[builder(default)]
#[serde(rename_all = "snake_case", default)]
pub struct TransportOptions {
    #[serde(rename = "type")]
    pub transport_type: TransportType,
    pub host: String,
    pub port: u16,

    /// Accept timeout for the TCP transport.
    #[serde_as(as = "serde_with::DisplayFromStr")]
    pub timeout: humantime::Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            transport_type: TransportType::Stdio,
            host: "127.0.0.1".to_owned(),
            port: 8765,
            timeout: Duration::from_secs(30).into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, derive_builder::Builder)]
#[builder(default)]
#[serde(rename_all = "snake_case", default)]
pub struct HttpOptions {
    pub host: String,
    pub port: u16,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8080,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("configuration error: {0}")]
pub struct Error(#[from] figment::Error);

impl Configuration {
    /// Load [`Configuration`] from the default yaml files with overwrites
    /// from environment variables.
    pub fn load() -> Result<Self, Error> {
        Self::load_with_file(None)
    }

    /// Load [`Configuration`], merging an explicit yaml file when given,
    /// otherwise `config.yaml` and `mcp-server.yaml` from the working
    /// directory (later files win).
    pub fn load_with_file(config_file: Option<&Path>) -> Result<Self, Error> {
        let figment = Figment::from(Serialized::defaults(Configuration::default()));

        let figment = match config_file {
            Some(file) => figment.merge(Yaml::file(file)),
            None => figment
                .merge(Yaml::file("config.yaml"))
                .merge(Yaml::file("mcp-server.yaml")),
        };

        let configuration = figment
            .merge(Env::prefixed("QUARRY_").split("__"))
            // Override log_level with RUST_LOG, if present
            .merge(Env::raw().only(&["RUST_LOG"]).map(|_| "log_level".into()))
            .extract()?;

        Ok(configuration)
    }

    /// Whether a tool name passes the `enable_all_tools` /
    /// `enabled_tools` / `disabled_tools` filters.
    pub fn is_tool_enabled(&self, name: &str) -> bool {
        if self.disabled_tools.iter().any(|t| t == name) {
            return false;
        }
        if self.enable_all_tools {
            return true;
        }
        self.enabled_tools.iter().any(|t| t == name)
    }
}
