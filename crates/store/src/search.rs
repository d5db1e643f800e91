// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Pattern search over keys and values, and JSON field lookup.
//!
//! Patterns match the *display* form of keys and values (text for
//! printable UTF-8, uppercase hex otherwise), either as full-match
//! regexes or as `*`/`?` wildcards. The walk examines entries in key
//! order and resumes from the last examined (not necessarily matched)
//! entry, so a paged search makes progress even through long
//! non-matching stretches.

use std::time::Instant;

use regex::Regex;
use rocksdb::ReadOptions;
use serde::Serialize;

use quarry_types::{Error, Result};

use crate::db::{engine_error, Store};
use crate::keys;
use crate::scan::{Cursor, Direction, ScanEntry};

#[derive(Debug, Clone, Default)]
pub struct ScanRange {
    pub start: Option<Vec<u8>>,
    pub end: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub key_pattern: Option<String>,
    pub value_pattern: Option<String>,
    /// Treat patterns as full-match regexes instead of `*`/`?` wildcards.
    pub use_regex: bool,
    pub case_sensitive: bool,
    pub limit: usize,
    pub after: Option<Cursor>,
    /// Match the key pattern against the key's .NET-tick UTC rendering.
    pub tick: bool,
    /// Narrows the examined portion of the column family.
    pub scan_range: Option<ScanRange>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchMatch {
    #[serde(flatten)]
    pub entry: ScanEntry,
    pub matched_fields: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub matches: Vec<SearchMatch>,
    pub count: usize,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub query_time_ms: u64,
}

struct Matcher {
    regex: Regex,
}

impl Matcher {
    fn compile(
        pattern: &str,
        use_regex: bool,
        case_sensitive: bool,
        field: &'static str,
    ) -> Result<Matcher> {
        let body = if use_regex {
            pattern.to_owned()
        } else {
            wildcard_to_regex(pattern)
        };
        let flags = if case_sensitive { "" } else { "(?i)" };
        let regex = Regex::new(&format!("{flags}^(?:{body})$"))
            .map_err(|e| Error::invalid_arguments(field, e.to_string()))?;
        Ok(Matcher { regex })
    }

    fn matches(&self, target: &str) -> bool {
        self.regex.is_match(target)
    }
}

fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out
}

/// Search `cf` for entries whose key and/or value match the configured
/// patterns. At least one pattern must be present.
pub fn search(store: &Store, cf: &str, options: &SearchOptions) -> Result<SearchResult> {
    if options.key_pattern.is_none() && options.value_pattern.is_none() {
        return Err(Error::invalid_arguments(
            "key_pattern",
            "at least one of key_pattern and value_pattern is required",
        ));
    }

    let key_matcher = options
        .key_pattern
        .as_deref()
        .map(|p| Matcher::compile(p, options.use_regex, options.case_sensitive, "key_pattern"))
        .transpose()?;
    let value_matcher = options
        .value_pattern
        .as_deref()
        .map(|p| {
            Matcher::compile(
                p,
                options.use_regex,
                options.case_sensitive,
                "value_pattern",
            )
        })
        .transpose()?;

    let started = Instant::now();
    let range = options.scan_range.clone().unwrap_or_default();

    let mut readopts = ReadOptions::default();
    readopts.set_total_order_seek(true);
    if let Some(start) = &range.start {
        readopts.set_iterate_lower_bound(start.clone());
    }
    if let Some(end) = &range.end {
        readopts.set_iterate_upper_bound(end.clone());
    }

    let mut iterator = store.raw_iterator_opt(cf, readopts)?;
    match &options.after {
        Some(after) => {
            iterator.seek(&after.last_key);
            if iterator.valid() && iterator.key() == Some(after.last_key.as_slice()) {
                iterator.next();
            }
        }
        None => match &range.start {
            Some(start) => iterator.seek(start),
            None => iterator.seek_to_first(),
        },
    }

    let mut matches = Vec::new();
    let mut last_examined: Option<Vec<u8>> = None;
    while iterator.valid() && matches.len() < options.limit {
        let key = iterator.key().expect("valid iterator has a key").to_vec();
        let value = iterator
            .value()
            .expect("valid iterator has a value")
            .to_vec();

        let mut matched_fields = Vec::new();
        if let Some(matcher) = &key_matcher {
            if options.tick {
                if let Some(ts) = keys::interpret_as_timestamp(&key) {
                    if matcher.matches(&ts.to_rfc3339()) {
                        matched_fields.push("key_as_tick");
                    }
                }
            } else if matcher.matches(&keys::format_for_display(&key).0) {
                matched_fields.push("key");
            }
        }
        if let Some(matcher) = &value_matcher {
            if matcher.matches(&keys::format_for_display(&value).0) {
                matched_fields.push("value");
            }
        }

        last_examined = Some(key.clone());
        if !matched_fields.is_empty() {
            matches.push(SearchMatch {
                entry: ScanEntry::new(key, value, options.tick),
                matched_fields,
            });
        }
        iterator.next();
    }
    iterator.status().map_err(engine_error)?;

    let has_more = iterator.valid();
    let next_cursor = match (&last_examined, has_more) {
        (Some(key), true) => Some(Cursor::new(key.clone(), Direction::Forward).encode()),
        _ => None,
    };

    Ok(SearchResult {
        count: matches.len(),
        matches,
        has_more,
        next_cursor,
        query_time_ms: started.elapsed().as_millis() as u64,
    })
}

/// Find entries whose JSON value has `value` at the dot-separated
/// `field_path`. Values that fail to parse as JSON are skipped.
pub fn json_query(
    store: &Store,
    cf: &str,
    field_path: &str,
    value: &str,
    limit: usize,
) -> Result<Vec<ScanEntry>> {
    let mut iterator = store.raw_iterator_opt(cf, ReadOptions::default())?;
    iterator.seek_to_first();

    let mut matches = Vec::new();
    while iterator.valid() && matches.len() < limit {
        let raw_value = iterator
            .value()
            .expect("valid iterator has a value")
            .to_vec();
        if let Ok(parsed) = serde_json::from_slice::<serde_json::Value>(&raw_value) {
            if let Some(leaf) = descend(&parsed, field_path) {
                if normalize_leaf(leaf) == value {
                    let key = iterator.key().expect("valid iterator has a key").to_vec();
                    matches.push(ScanEntry::new(key, raw_value, false));
                }
            }
        }
        iterator.next();
    }
    iterator.status().map_err(engine_error)?;
    Ok(matches)
}

/// Extract the value at `path` from the JSON document stored under `key`.
pub fn json_path(
    store: &Store,
    cf: &str,
    key: &[u8],
    path: &str,
) -> Result<serde_json::Value> {
    let raw_value = store.get(cf, key)?;
    let parsed: serde_json::Value = serde_json::from_slice(&raw_value).map_err(|e| {
        Error::ToolExecutionFailed(format!(
            "value of key '{}' is not valid JSON: {e}",
            keys::format_for_display(key).0
        ))
    })?;
    descend(&parsed, path).cloned().ok_or_else(|| {
        Error::ToolExecutionFailed(format!("no value at path '{path}'"))
    })
}

/// Walk a dot-separated path; numeric segments index into arrays.
fn descend<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn normalize_leaf(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
