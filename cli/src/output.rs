// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Plain-text rendering of tool results.

use serde_json::Value;

/// Print a tool result: entry lists as aligned `key => value` lines with
/// a trailing summary, everything else as pretty JSON.
pub fn print_result(value: &Value) {
    if let Some(entries) = value
        .get("entries")
        .or_else(|| value.get("matches"))
        .and_then(Value::as_array)
    {
        for entry in entries {
            print_entry(entry);
        }
        let mut summary = Vec::new();
        if let Some(count) = value.get("count").and_then(Value::as_u64) {
            summary.push(format!("{count} entries"));
        }
        if value.get("has_more").and_then(Value::as_bool) == Some(true) {
            summary.push("more available".to_owned());
        }
        if let Some(cursor) = value.get("next_cursor").and_then(Value::as_str) {
            summary.push(format!("cursor {cursor}"));
        }
        if let Some(elapsed) = value.get("query_time_ms").and_then(Value::as_u64) {
            summary.push(format!("{elapsed} ms"));
        }
        if !summary.is_empty() {
            println!("-- {}", summary.join(", "));
        }
        return;
    }

    if let Some(cfs) = value.get("column_families").and_then(Value::as_array) {
        for cf in cfs {
            println!("{}", cf.as_str().unwrap_or_default());
        }
        return;
    }

    // single entries look like list entries
    if value.get("key").is_some() && value.get("value").is_some() {
        print_entry(value);
        return;
    }

    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

fn print_entry(entry: &Value) {
    let key = entry.get("key").and_then(Value::as_str).unwrap_or_default();
    let value = entry.get("value").and_then(Value::as_str).unwrap_or_default();
    let mut line = format!("{key} => {value}");
    if let Some(ts) = entry.get("timestamp").and_then(Value::as_str) {
        line.push_str(&format!("  [{ts}]"));
    }
    if let Some(fields) = entry.get("matched_fields").and_then(Value::as_array) {
        let fields: Vec<_> = fields.iter().filter_map(Value::as_str).collect();
        line.push_str(&format!("  ({})", fields.join(",")));
    }
    println!("{line}");
}

/// Render an error the way every front-end does: stable identifier plus
/// message.
pub fn print_error(error: &quarry_types::Error) {
    eprintln!("error[{}]: {error}", error.kind().as_str());
}
