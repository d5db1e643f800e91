// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The standard tool set.
//!
//! One builder per tool, pairing the wire-stable descriptor with the
//! engine invocation. Key and value arguments are smart literals
//! (`0x<hex>`, `u64:<decimal>`, plain text) parsed by the key codec, so
//! every front-end addresses binary keys the same way.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use quarry_store::export::{export_csv, ExportOptions};
use quarry_store::keys;
use quarry_store::scan::{prefix_scan, scan, Cursor, Direction, ScanEntry, ScanOptions};
use quarry_store::search::{json_path, json_query, search, ScanRange, SearchOptions};
use quarry_store::transform::{transform, TransformOptions, DEFAULT_BATCH_SIZE};
use quarry_store::watch::{watch, WatchOptions, DEFAULT_WATCH_INTERVAL};
use quarry_store::{Store, DEFAULT_CF};
use quarry_types::{Error, Result};

use crate::descriptor::{Capability, ToolDescriptor};
use crate::registry::{Invoker, RegisteredTool, ToolContext};

const DEFAULT_LIMIT: usize = 100;

pub(crate) fn standard_tools() -> Vec<RegisteredTool> {
    vec![
        get_tool(),
        put_tool(),
        delete_tool(),
        scan_tool(),
        prefix_scan_tool(),
        search_tool(),
        json_query_tool(),
        json_path_tool(),
        last_tool(),
        list_column_families_tool(),
        create_column_family_tool(),
        drop_column_family_tool(),
        export_csv_tool(),
        stats_tool(),
        watch_tool(),
        transform_tool(),
    ]
}

fn tool<F, Fut>(descriptor: ToolDescriptor, run: F) -> RegisteredTool
where
    F: Fn(ToolContext, Arc<Store>, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    let invoker: Invoker = Arc::new(move |ctx, store, args| run(ctx, store, args).boxed());
    RegisteredTool {
        descriptor,
        invoker,
    }
}

// --- argument helpers (types were validated against the schema already)

fn str_arg<'a>(args: &'a Value, field: &str) -> Option<&'a str> {
    args.get(field).and_then(Value::as_str)
}

fn require_str<'a>(args: &'a Value, field: &'static str) -> Result<&'a str> {
    str_arg(args, field).ok_or_else(|| Error::invalid_arguments(field, "missing required field"))
}

fn u64_arg(args: &Value, field: &str) -> Option<u64> {
    args.get(field).and_then(Value::as_u64)
}

fn bool_arg(args: &Value, field: &str) -> Option<bool> {
    args.get(field).and_then(Value::as_bool)
}

fn cf_arg(args: &Value) -> &str {
    str_arg(args, "cf").unwrap_or(DEFAULT_CF)
}

fn key_arg(args: &Value, field: &'static str) -> Result<Vec<u8>> {
    keys::parse_user_input(require_str(args, field)?)
}

fn opt_key_arg(args: &Value, field: &str) -> Result<Option<Vec<u8>>> {
    str_arg(args, field).map(keys::parse_user_input).transpose()
}

fn cursor_arg(args: &Value) -> Result<Option<Cursor>> {
    str_arg(args, "after").map(Cursor::decode).transpose()
}

fn limit_arg(args: &Value) -> usize {
    u64_arg(args, "limit").map_or(DEFAULT_LIMIT, |limit| limit as usize)
}

fn entry_json(entry: &ScanEntry) -> Value {
    serde_json::to_value(entry).expect("entries serialize")
}

// --- point operations

fn get_tool() -> RegisteredTool {
    tool(
        ToolDescriptor {
            name: "get",
            description: "Read the value of a key in a column family",
            capability: Capability::Read,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "cf": {"type": "string", "description": "Column family, default 'default'"},
                    "key": {"type": "string", "description": "Smart key literal: 0x<hex>, u64:<decimal>, or text"},
                    "timestamp": {"type": "boolean", "description": "Interpret the key as a timestamp"},
                },
                "required": ["key"],
            }),
        },
        |_ctx, store, args| async move {
            let cf = cf_arg(&args);
            let key = key_arg(&args, "key")?;
            let value = store.get(cf, &key)?;
            let entry = ScanEntry::new(key, value, bool_arg(&args, "timestamp").unwrap_or(false));
            Ok(entry_json(&entry))
        },
    )
}

fn put_tool() -> RegisteredTool {
    tool(
        ToolDescriptor {
            name: "put",
            description: "Write a key-value pair into a column family",
            capability: Capability::Write,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "cf": {"type": "string"},
                    "key": {"type": "string", "description": "Smart key literal"},
                    "value": {"type": "string", "description": "Smart value literal"},
                },
                "required": ["key", "value"],
            }),
        },
        |_ctx, store, args| async move {
            let cf = cf_arg(&args).to_owned();
            let key = key_arg(&args, "key")?;
            let value = keys::parse_user_input(require_str(&args, "value")?)?;
            store.put(&cf, &key, &value)?;
            Ok(json!({"ok": true}))
        },
    )
}

fn delete_tool() -> RegisteredTool {
    tool(
        ToolDescriptor {
            name: "delete",
            description: "Delete a key from a column family",
            capability: Capability::Write,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "cf": {"type": "string"},
                    "key": {"type": "string", "description": "Smart key literal"},
                },
                "required": ["key"],
            }),
        },
        |_ctx, store, args| async move {
            let cf = cf_arg(&args);
            let key = key_arg(&args, "key")?;
            store.delete(cf, &key)?;
            Ok(json!({"ok": true}))
        },
    )
}

fn last_tool() -> RegisteredTool {
    tool(
        ToolDescriptor {
            name: "last",
            description: "Read the entry with the greatest key in a column family",
            capability: Capability::Read,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "cf": {"type": "string"},
                    "timestamp": {"type": "boolean"},
                },
            }),
        },
        |_ctx, store, args| async move {
            let cf = cf_arg(&args);
            let (key, value) = store.get_last(cf)?;
            let entry = ScanEntry::new(key, value, bool_arg(&args, "timestamp").unwrap_or(false));
            Ok(entry_json(&entry))
        },
    )
}

// --- scans

fn scan_tool() -> RegisteredTool {
    tool(
        ToolDescriptor {
            name: "scan",
            description: "Scan a key range with cursor pagination",
            capability: Capability::Read,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "cf": {"type": "string"},
                    "start": {"type": "string", "description": "Inclusive lower bound"},
                    "end": {"type": "string", "description": "Exclusive upper bound"},
                    "reverse": {"type": "boolean"},
                    "limit": {"type": "integer"},
                    "after": {"type": "string", "description": "Cursor from a previous page"},
                    "include_values": {"type": "boolean"},
                    "timestamps": {"type": "boolean"},
                },
            }),
        },
        |_ctx, store, args| async move {
            let cf = cf_arg(&args);
            let options = ScanOptions {
                start: opt_key_arg(&args, "start")?,
                end: opt_key_arg(&args, "end")?,
                direction: if bool_arg(&args, "reverse").unwrap_or(false) {
                    Direction::Reverse
                } else {
                    Direction::Forward
                },
                limit: limit_arg(&args),
                after: cursor_arg(&args)?,
                include_values: bool_arg(&args, "include_values").unwrap_or(true),
                timestamps: bool_arg(&args, "timestamps").unwrap_or(false),
            };
            let result = scan(&store, cf, &options)?;
            Ok(serde_json::to_value(result).expect("scan results serialize"))
        },
    )
}

fn prefix_scan_tool() -> RegisteredTool {
    tool(
        ToolDescriptor {
            name: "prefix_scan",
            description: "Scan every key starting with a prefix",
            capability: Capability::Read,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "cf": {"type": "string"},
                    "prefix": {"type": "string", "description": "Smart key literal prefix"},
                    "limit": {"type": "integer"},
                    "after": {"type": "string"},
                    "include_values": {"type": "boolean"},
                    "timestamps": {"type": "boolean"},
                },
                "required": ["prefix"],
            }),
        },
        |_ctx, store, args| async move {
            let cf = cf_arg(&args);
            let prefix = key_arg(&args, "prefix")?;
            let options = ScanOptions {
                limit: limit_arg(&args),
                after: cursor_arg(&args)?,
                include_values: bool_arg(&args, "include_values").unwrap_or(true),
                timestamps: bool_arg(&args, "timestamps").unwrap_or(false),
                ..Default::default()
            };
            let result = prefix_scan(&store, cf, &prefix, &options)?;
            Ok(serde_json::to_value(result).expect("scan results serialize"))
        },
    )
}

// --- search

fn search_tool() -> RegisteredTool {
    tool(
        ToolDescriptor {
            name: "search",
            description: "Fuzzy or regex search over keys and values",
            capability: Capability::Read,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "cf": {"type": "string"},
                    "key_pattern": {"type": "string", "description": "Wildcard (*, ?) or regex pattern"},
                    "value_pattern": {"type": "string"},
                    "use_regex": {"type": "boolean"},
                    "case_sensitive": {"type": "boolean", "description": "Defaults to true"},
                    "limit": {"type": "integer"},
                    "after": {"type": "string"},
                    "tick": {"type": "boolean", "description": "Match keys by their .NET tick UTC rendering"},
                    "start": {"type": "string", "description": "Restrict the scanned range"},
                    "end": {"type": "string"},
                },
            }),
        },
        |_ctx, store, args| async move {
            let cf = cf_arg(&args);
            let start = opt_key_arg(&args, "start")?;
            let end = opt_key_arg(&args, "end")?;
            let scan_range = (start.is_some() || end.is_some())
                .then_some(ScanRange { start, end });
            let options = SearchOptions {
                key_pattern: str_arg(&args, "key_pattern").map(str::to_owned),
                value_pattern: str_arg(&args, "value_pattern").map(str::to_owned),
                use_regex: bool_arg(&args, "use_regex").unwrap_or(false),
                case_sensitive: bool_arg(&args, "case_sensitive").unwrap_or(true),
                limit: limit_arg(&args),
                after: cursor_arg(&args)?,
                tick: bool_arg(&args, "tick").unwrap_or(false),
                scan_range,
            };
            let result = search(&store, cf, &options)?;
            Ok(serde_json::to_value(result).expect("search results serialize"))
        },
    )
}

fn json_query_tool() -> RegisteredTool {
    tool(
        ToolDescriptor {
            name: "json_query",
            description: "Find entries whose JSON value has a field equal to a value",
            capability: Capability::Read,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "cf": {"type": "string"},
                    "field": {"type": "string", "description": "Dot-separated path, e.g. user.name"},
                    "value": {"type": "string"},
                    "limit": {"type": "integer"},
                },
                "required": ["field", "value"],
            }),
        },
        |_ctx, store, args| async move {
            let cf = cf_arg(&args);
            let field = require_str(&args, "field")?;
            let value = require_str(&args, "value")?;
            let matches = json_query(&store, cf, field, value, limit_arg(&args))?;
            Ok(json!({
                "matches": matches.iter().map(entry_json).collect::<Vec<_>>(),
                "count": matches.len(),
            }))
        },
    )
}

fn json_path_tool() -> RegisteredTool {
    tool(
        ToolDescriptor {
            name: "json_path",
            description: "Extract the value at a path from one key's JSON document",
            capability: Capability::Read,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "cf": {"type": "string"},
                    "key": {"type": "string", "description": "Smart key literal"},
                    "path": {"type": "string", "description": "Dot-separated path, e.g. items.0.id"},
                },
                "required": ["key", "path"],
            }),
        },
        |_ctx, store, args| async move {
            let cf = cf_arg(&args);
            let key = key_arg(&args, "key")?;
            let path = require_str(&args, "path")?;
            let value = json_path(&store, cf, &key, path)?;
            Ok(json!({
                "key": keys::format_for_display(&key).0,
                "path": path,
                "value": value,
            }))
        },
    )
}

// --- column family lifecycle

fn list_column_families_tool() -> RegisteredTool {
    tool(
        ToolDescriptor {
            name: "list_column_families",
            description: "List the column families of the connected database",
            capability: Capability::Read,
            input_schema: json!({
                "type": "object",
                "properties": {},
            }),
        },
        |_ctx, store, _args| async move {
            Ok(json!({"column_families": store.list_cfs()?}))
        },
    )
}

fn create_column_family_tool() -> RegisteredTool {
    tool(
        ToolDescriptor {
            name: "create_column_family",
            description: "Create a new column family",
            capability: Capability::Write,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                },
                "required": ["name"],
            }),
        },
        |_ctx, store, args| async move {
            store.create_cf(require_str(&args, "name")?)?;
            Ok(json!({"ok": true}))
        },
    )
}

fn drop_column_family_tool() -> RegisteredTool {
    tool(
        ToolDescriptor {
            name: "drop_column_family",
            description: "Drop a column family ('default' cannot be dropped)",
            capability: Capability::Write,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                },
                "required": ["name"],
            }),
        },
        |_ctx, store, args| async move {
            store.drop_cf(require_str(&args, "name")?)?;
            Ok(json!({"ok": true}))
        },
    )
}

// --- bulk operations

fn export_csv_tool() -> RegisteredTool {
    tool(
        ToolDescriptor {
            name: "export_csv",
            description: "Export a column family as RFC 4180 CSV",
            capability: Capability::Read,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "cf": {"type": "string"},
                    "file_path": {"type": "string", "description": "Write to this file; omit to return the CSV inline"},
                    "delimiter": {"type": "string", "description": "Single-character separator, default ','"},
                },
            }),
        },
        |_ctx, store, args| async move {
            let cf = cf_arg(&args);
            let delimiter = match str_arg(&args, "delimiter") {
                None => b',',
                Some(separator) if separator.len() == 1 => separator.as_bytes()[0],
                Some(_) => {
                    return Err(Error::invalid_arguments(
                        "delimiter",
                        "must be a single character",
                    ))
                }
            };
            let options = ExportOptions { delimiter };
            match str_arg(&args, "file_path") {
                Some(path) => {
                    let file = std::fs::File::create(path)?;
                    let stats = export_csv(&store, cf, &options, std::io::BufWriter::new(file))?;
                    Ok(json!({
                        "exported": stats.exported,
                        "bytes_written": stats.bytes_written,
                        "file_path": path,
                    }))
                }
                None => {
                    let mut buffer = Vec::new();
                    let stats = export_csv(&store, cf, &options, &mut buffer)?;
                    Ok(json!({
                        "exported": stats.exported,
                        "bytes_written": stats.bytes_written,
                        "csv": String::from_utf8_lossy(&buffer),
                    }))
                }
            }
        },
    )
}

fn stats_tool() -> RegisteredTool {
    tool(
        ToolDescriptor {
            name: "stats",
            description: "Numeric engine statistics for one or all column families",
            capability: Capability::Read,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "cf": {"type": "string"},
                },
            }),
        },
        |_ctx, store, args| async move {
            let stats = store.stats(str_arg(&args, "cf"))?;
            Ok(serde_json::to_value(stats).expect("stats serialize"))
        },
    )
}

fn watch_tool() -> RegisteredTool {
    tool(
        ToolDescriptor {
            name: "watch",
            description: "Watch a column family and collect new tail entries for a bounded duration",
            capability: Capability::Read,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "cf": {"type": "string"},
                    "interval_ms": {"type": "integer", "description": "Poll interval, default 1000"},
                    "duration_ms": {"type": "integer", "description": "How long to watch, default 10000"},
                    "limit": {"type": "integer", "description": "Stop after this many entries"},
                },
            }),
        },
        |_ctx, store, args| async move {
            let cf = cf_arg(&args).to_owned();
            let options = WatchOptions {
                interval: u64_arg(&args, "interval_ms")
                    .map_or(DEFAULT_WATCH_INTERVAL, Duration::from_millis),
                timestamps: false,
            };
            let duration =
                Duration::from_millis(u64_arg(&args, "duration_ms").unwrap_or(10_000));
            let limit = limit_arg(&args);

            let token = CancellationToken::new();
            let collected = Mutex::new(Vec::new());
            let collector_token = token.clone();
            let watch_loop = watch(&store, &cf, &options, token.clone(), |entry| {
                let mut entries = collected.lock().expect("watch collector lock");
                entries.push(entry);
                if entries.len() >= limit {
                    collector_token.cancel();
                }
            });

            tokio::select! {
                result = watch_loop => result?,
                _ = tokio::time::sleep(duration) => {}
            }

            let entries = collected.into_inner().expect("watch collector lock");
            Ok(json!({
                "entries": entries.iter().map(entry_json).collect::<Vec<_>>(),
                "count": entries.len(),
            }))
        },
    )
}

fn transform_tool() -> RegisteredTool {
    tool(
        ToolDescriptor {
            name: "transform",
            description: "Apply an expression or script to every entry, batched, with dry-run",
            capability: Capability::Write,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "cf": {"type": "string"},
                    "value_expr": {"type": "string", "description": "Expression producing the new value"},
                    "key_expr": {"type": "string", "description": "Expression producing the new key; old keys are deleted"},
                    "filter": {"type": "string", "description": "Entries evaluating falsy are skipped"},
                    "script_path": {"type": "string", "description": "Script returning key and value together"},
                    "dry_run": {"type": "boolean"},
                    "limit": {"type": "integer"},
                    "batch_size": {"type": "integer", "description": "Default 1000"},
                },
            }),
        },
        |ctx, store, args| async move {
            let cf = cf_arg(&args).to_owned();
            let options = TransformOptions {
                value_expr: str_arg(&args, "value_expr").map(str::to_owned),
                key_expr: str_arg(&args, "key_expr").map(str::to_owned),
                filter: str_arg(&args, "filter").map(str::to_owned),
                script_path: str_arg(&args, "script_path").map(Into::into),
                dry_run: bool_arg(&args, "dry_run").unwrap_or(false),
                limit: u64_arg(&args, "limit").map(|limit| limit as usize),
                batch_size: u64_arg(&args, "batch_size")
                    .map_or(DEFAULT_BATCH_SIZE, |size| size as usize),
            };
            let outcome = transform(&store, &cf, &options, ctx.evaluator.as_ref()).await?;
            Ok(serde_json::to_value(outcome).expect("transform outcomes serialize"))
        },
    )
}
