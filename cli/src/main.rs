// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

mod build_info;
mod output;
mod repl;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use quarry_mcp::McpServer;
use quarry_store::evaluator::ProcessEvaluator;
use quarry_store::watch::{watch, WatchOptions};
use quarry_store::{AccessMode, DatabaseManager};
use quarry_tools::{ToolContext, ToolRegistry};
use quarry_types::config::Configuration;
use quarry_types::{Error, ErrorKind};

#[derive(Debug, Parser)]
#[command(
    name = "quarry",
    version = build_info::QUARRY_CLI_VERSION,
    about = "Operator tooling for RocksDB databases"
)]
struct Options {
    /// Path of the database to open.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Open the database in read-only mode.
    #[arg(long, global = true)]
    read_only: bool,

    /// Column family to operate on.
    #[arg(long, global = true, default_value = "default")]
    cf: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read the value of a key
    Get {
        /// Smart key literal: 0x<hex>, u64:<decimal>, or text
        key: String,
        /// Interpret the key as a timestamp
        #[arg(long)]
        timestamp: bool,
    },
    /// Write a key-value pair
    Put { key: String, value: String },
    /// Delete a key
    Delete { key: String },
    /// Scan a key range with cursor pagination
    Scan {
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        reverse: bool,
        #[arg(long, default_value_t = 100)]
        limit: usize,
        /// Cursor from a previous page
        #[arg(long)]
        after: Option<String>,
        /// Yield keys only
        #[arg(long)]
        keys_only: bool,
        #[arg(long)]
        timestamps: bool,
    },
    /// Scan every key starting with a prefix
    Prefix {
        prefix: String,
        #[arg(long, default_value_t = 100)]
        limit: usize,
        #[arg(long)]
        after: Option<String>,
    },
    /// Fuzzy or regex search over keys and values
    Search {
        /// Key pattern (* and ? wildcards, or --regex)
        #[arg(long)]
        key: Option<String>,
        /// Value pattern
        #[arg(long)]
        value: Option<String>,
        #[arg(long)]
        regex: bool,
        #[arg(long)]
        ignore_case: bool,
        #[arg(long, default_value_t = 100)]
        limit: usize,
        #[arg(long)]
        after: Option<String>,
        /// Match keys by their .NET tick UTC rendering
        #[arg(long)]
        tick: bool,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
    /// Find entries whose JSON value has a field equal to a value
    Jsonquery {
        /// Dot-separated path, e.g. user.name
        field: String,
        value: String,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Extract the value at a path from one key's JSON document
    Jsonpath { key: String, path: String },
    /// Read the entry with the greatest key
    Last {
        #[arg(long)]
        timestamp: bool,
    },
    /// List column families
    Listcf,
    /// Create a column family
    Createcf { name: String },
    /// Drop a column family
    Dropcf { name: String },
    /// Export the column family as CSV
    Export {
        /// Output file; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, default_value = ",")]
        delimiter: String,
    },
    /// Numeric engine statistics
    Stats {
        /// Aggregate over every column family
        #[arg(long)]
        all: bool,
    },
    /// Follow new keys as they are written (Ctrl-C stops)
    Watch {
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
        #[arg(long)]
        timestamps: bool,
    },
    /// Apply an expression or script to every entry
    Transform {
        #[arg(long)]
        value_expr: Option<String>,
        #[arg(long)]
        key_expr: Option<String>,
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        script: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        limit: Option<u64>,
        #[arg(long, default_value_t = 1000)]
        batch_size: u64,
    },
    /// Interactive shell
    Repl,
    /// Serve MCP over stdio (for AI assistants)
    Mcp {
        #[arg(long, env = "QUARRY_CONFIG")]
        config_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let options = Options::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    match run(options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Usage(message)) => {
            eprintln!("usage error: {message}");
            ExitCode::from(2)
        }
        Err(CliError::Tool(error)) => {
            output::print_error(&error);
            match error.kind() {
                ErrorKind::IoError | ErrorKind::PathInUse | ErrorKind::CorruptStore => {
                    ExitCode::from(3)
                }
                _ => ExitCode::from(1),
            }
        }
        Err(CliError::Other(error)) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}

enum CliError {
    Usage(String),
    Tool(Error),
    Other(anyhow::Error),
}

impl From<Error> for CliError {
    fn from(error: Error) -> Self {
        CliError::Tool(error)
    }
}

impl From<anyhow::Error> for CliError {
    fn from(error: anyhow::Error) -> Self {
        CliError::Other(error)
    }
}

async fn run(options: Options) -> Result<(), CliError> {
    if let Command::Mcp { config_file } = &options.command {
        return serve_mcp(&options, config_file.clone()).await;
    }

    let ctx = connect(&options)?;

    match options.command {
        Command::Repl => repl::run(ctx).await.map_err(CliError::Other),
        Command::Watch {
            interval_ms,
            timestamps,
        } => {
            let store = ctx.manager.store()?;
            let watch_options = WatchOptions {
                interval: Duration::from_millis(interval_ms),
                timestamps,
            };
            let token = CancellationToken::new();
            let interrupt = token.clone();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                interrupt.cancel();
            });
            eprintln!("watching '{}', Ctrl-C to stop", options.cf);
            watch(&store, &options.cf, &watch_options, token, |entry| {
                match &entry.timestamp {
                    Some(ts) => println!("{} => {}  [{}]", entry.key_display, entry.value_display, ts.to_rfc3339()),
                    None => println!("{} => {}", entry.key_display, entry.value_display),
                }
            })
            .await?;
            Ok(())
        }
        ref command => {
            let (tool, args) = tool_call_of(command, &options.cf)?;
            let registry = ToolRegistry::standard();
            let result = registry.dispatch(&ctx, tool, args).await?;

            // inline CSV is printed raw, everything else formatted
            if let Some(csv) = result.get("csv").and_then(Value::as_str) {
                print!("{csv}");
            } else {
                output::print_result(&result);
            }
            Ok(())
        }
    }
}

fn connect(options: &Options) -> Result<ToolContext, CliError> {
    let Some(db) = &options.db else {
        return Err(CliError::Usage(
            "--db <path> is required for this command".to_owned(),
        ));
    };
    let mode = if options.read_only {
        AccessMode::ReadOnly
    } else {
        AccessMode::ReadWrite
    };
    let manager = Arc::new(DatabaseManager::new());
    manager.connect(db, mode)?;
    Ok(ToolContext::new(
        manager,
        Arc::new(ProcessEvaluator::default()),
    ))
}

async fn serve_mcp(options: &Options, config_file: Option<PathBuf>) -> Result<(), CliError> {
    let mut config = Configuration::load_with_file(config_file.as_deref())
        .map_err(|e| CliError::Usage(e.to_string()))?;
    if let Some(db) = &options.db {
        config.database_path = Some(db.clone());
    }
    if options.read_only {
        config.read_only = true;
    }

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

    let server = McpServer::new(&config, ctx);
    server
        .serve_stdio()
        .await
        .map_err(|e| CliError::Tool(Error::Io(e)))
}

/// Translate a subcommand into its tool call. One-to-one by design.
fn tool_call_of(command: &Command, cf: &str) -> Result<(&'static str, Value), CliError> {
    let call = match command {
        Command::Get { key, timestamp } => (
            "get",
            json!({"cf": cf, "key": key, "timestamp": timestamp}),
        ),
        Command::Put { key, value } => ("put", json!({"cf": cf, "key": key, "value": value})),
        Command::Delete { key } => ("delete", json!({"cf": cf, "key": key})),
        Command::Scan {
            start,
            end,
            reverse,
            limit,
            after,
            keys_only,
            timestamps,
        } => {
            let mut args = json!({
                "cf": cf,
                "reverse": reverse,
                "limit": limit,
                "include_values": !keys_only,
                "timestamps": timestamps,
            });
            insert_opt(&mut args, "start", start);
            insert_opt(&mut args, "end", end);
            insert_opt(&mut args, "after", after);
            ("scan", args)
        }
        Command::Prefix {
            prefix,
            limit,
            after,
        } => {
            let mut args = json!({"cf": cf, "prefix": prefix, "limit": limit});
            insert_opt(&mut args, "after", after);
            ("prefix_scan", args)
        }
        Command::Search {
            key,
            value,
            regex,
            ignore_case,
            limit,
            after,
            tick,
            start,
            end,
        } => {
            let mut args = json!({
                "cf": cf,
                "use_regex": regex,
                "case_sensitive": !ignore_case,
                "limit": limit,
                "tick": tick,
            });
            insert_opt(&mut args, "key_pattern", key);
            insert_opt(&mut args, "value_pattern", value);
            insert_opt(&mut args, "after", after);
            insert_opt(&mut args, "start", start);
            insert_opt(&mut args, "end", end);
            ("search", args)
        }
        Command::Jsonquery {
            field,
            value,
            limit,
        } => (
            "json_query",
            json!({"cf": cf, "field": field, "value": value, "limit": limit}),
        ),
        Command::Jsonpath { key, path } => {
            ("json_path", json!({"cf": cf, "key": key, "path": path}))
        }
        Command::Last { timestamp } => ("last", json!({"cf": cf, "timestamp": timestamp})),
        Command::Listcf => ("list_column_families", json!({})),
        Command::Createcf { name } => ("create_column_family", json!({"name": name})),
        Command::Dropcf { name } => ("drop_column_family", json!({"name": name})),
        Command::Export { output, delimiter } => {
            let mut args = json!({"cf": cf, "delimiter": delimiter});
            if let Some(output) = output {
                args["file_path"] = json!(output);
            }
            ("export_csv", args)
        }
        Command::Stats { all } => {
            if *all {
                ("stats", json!({}))
            } else {
                ("stats", json!({"cf": cf}))
            }
        }
        Command::Transform {
            value_expr,
            key_expr,
            filter,
            script,
            dry_run,
            limit,
            batch_size,
        } => {
            let mut args = json!({"cf": cf, "dry_run": dry_run, "batch_size": batch_size});
            insert_opt(&mut args, "value_expr", value_expr);
            insert_opt(&mut args, "key_expr", key_expr);
            insert_opt(&mut args, "filter", filter);
            if let Some(script) = script {
                args["script_path"] = json!(script);
            }
            if let Some(limit) = limit {
                args["limit"] = json!(limit);
            }
            ("transform", args)
        }
        Command::Repl | Command::Watch { .. } | Command::Mcp { .. } => {
            return Err(CliError::Usage("not a direct tool call".to_owned()))
        }
    };
    Ok(call)
}

fn insert_opt(args: &mut Value, field: &str, value: &Option<String>) {
    if let Some(value) = value {
        args[field] = json!(value);
    }
}
