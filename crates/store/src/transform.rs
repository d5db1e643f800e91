// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Batched, scriptable, dry-runnable mutation engine.
//!
//! Every entry of a column family flows through filter → rewrite →
//! batched write. Writes go through `WriteBatch`es applied in iteration
//! order; when a key expression renames an entry, the delete of the old
//! key rides in the same batch as the put of the new one. A batch commit
//! error aborts the pipeline; batches committed before the error are NOT
//! rolled back. Dry runs never call the mutating store API.

use std::collections::VecDeque;
use std::path::PathBuf;

use rocksdb::WriteBatch;
use serde::Serialize;
use tracing::{debug, warn};

use quarry_types::{Error, ErrorKind, Result};

use crate::db::{engine_error, Store};
use crate::evaluator::{EvalFailure, Evaluator};
use crate::keys;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Dry-run previews are capped at this many entries.
const PREVIEW_CAP: usize = 100;

/// Sliding window for the evaluator circuit breaker.
const FAILURE_WINDOW: usize = 1000;
/// The breaker arms only after this many evaluated entries.
const FAILURE_MIN_SAMPLE: usize = 100;

#[derive(Debug, Clone)]
pub struct TransformOptions {
    /// Expression producing the new value from `key`/`value`.
    pub value_expr: Option<String>,
    /// Expression producing the new key. When two old keys map to the
    /// same new key, the entry later in iteration order wins.
    pub key_expr: Option<String>,
    /// Entries for which this evaluates falsy are skipped.
    pub filter: Option<String>,
    /// A script returning the new key and value together, exclusive with
    /// the expressions above.
    pub script_path: Option<PathBuf>,
    pub dry_run: bool,
    /// Caps the number of processed entries.
    pub limit: Option<usize>,
    pub batch_size: usize,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            value_expr: None,
            key_expr: None,
            filter: None,
            script_path: None,
            dry_run: false,
            limit: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// One failed entry. `kind` is `EvaluatorTimeout` or `EvaluatorError`.
#[derive(Debug, Clone, Serialize)]
pub struct TransformError {
    pub key: String,
    pub kind: ErrorKind,
    pub reason: String,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct TransformStats {
    pub processed: u64,
    pub modified: u64,
    pub skipped: u64,
    pub unchanged: u64,
    pub errors: Vec<TransformError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewEntry {
    pub key: String,
    pub value: String,
    pub new_key: String,
    pub new_value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransformOutcome {
    #[serde(flatten)]
    pub stats: TransformStats,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub preview: Vec<PreviewEntry>,
}

enum EntryDecision {
    Skip,
    Rewrite(Vec<u8>, Vec<u8>),
}

struct FailureWindow {
    outcomes: VecDeque<bool>,
    failed: usize,
}

impl FailureWindow {
    fn new() -> Self {
        Self {
            outcomes: VecDeque::with_capacity(FAILURE_WINDOW),
            failed: 0,
        }
    }

    fn push(&mut self, entry_failed: bool) {
        if self.outcomes.len() == FAILURE_WINDOW {
            if self.outcomes.pop_front() == Some(true) {
                self.failed -= 1;
            }
        }
        self.outcomes.push_back(entry_failed);
        if entry_failed {
            self.failed += 1;
        }
    }

    fn tripped(&self) -> bool {
        self.outcomes.len() >= FAILURE_MIN_SAMPLE && self.failed * 100 > self.outcomes.len()
    }
}

/// Apply `options` to every entry of `cf`, in iteration order.
pub async fn transform(
    store: &Store,
    cf: &str,
    options: &TransformOptions,
    evaluator: &dyn Evaluator,
) -> Result<TransformOutcome> {
    let has_exprs = options.value_expr.is_some() || options.key_expr.is_some();
    let script = options
        .script_path
        .as_ref()
        .map(std::fs::read_to_string)
        .transpose()?;
    if has_exprs == script.is_some() {
        return Err(Error::invalid_arguments(
            "value_expr",
            "provide either value_expr/key_expr or script_path, not both and not neither",
        ));
    }
    if options.batch_size == 0 {
        return Err(Error::invalid_arguments("batch_size", "must be positive"));
    }

    let handle = store.cf_handle(cf)?;
    let mut iterator = store.raw_iterator_opt(cf, rocksdb::ReadOptions::default())?;
    iterator.seek_to_first();

    let mut stats = TransformStats::default();
    let mut preview = Vec::new();
    let mut window = FailureWindow::new();
    let mut batch = WriteBatch::default();
    let mut pending: u64 = 0;

    while iterator.valid() {
        if options
            .limit
            .is_some_and(|limit| stats.processed >= limit as u64)
        {
            break;
        }
        store.ensure_open()?;

        let key = iterator.key().expect("valid iterator has a key").to_vec();
        let value = iterator
            .value()
            .expect("valid iterator has a value")
            .to_vec();
        stats.processed += 1;

        match evaluate_entry(&key, &value, options, script.as_deref(), evaluator).await {
            Ok(EntryDecision::Skip) => {
                window.push(false);
                stats.skipped += 1;
            }
            Ok(EntryDecision::Rewrite(new_key, new_value)) => {
                window.push(false);
                if new_key == key && new_value == value {
                    stats.unchanged += 1;
                } else if options.dry_run {
                    if preview.len() < PREVIEW_CAP {
                        preview.push(PreviewEntry {
                            key: keys::format_for_display(&key).0,
                            value: keys::format_for_display(&value).0,
                            new_key: keys::format_for_display(&new_key).0,
                            new_value: keys::format_for_display(&new_value).0,
                        });
                    }
                } else {
                    if new_key != key {
                        batch.delete_cf(&handle, &key);
                    }
                    batch.put_cf(&handle, &new_key, &new_value);
                    pending += 1;
                    if pending >= options.batch_size as u64 {
                        let full = std::mem::take(&mut batch);
                        store.write_batch(full)?;
                        stats.modified += pending;
                        debug!(committed = pending, "Committed transform batch");
                        pending = 0;
                    }
                }
            }
            Err(failure) => {
                let key_display = keys::format_for_display(&key).0;
                warn!(key = %key_display, %failure, "Evaluator failed");
                let kind = match &failure {
                    EvalFailure::Timeout(_) => ErrorKind::EvaluatorTimeout,
                    EvalFailure::Failed(_) => ErrorKind::EvaluatorError,
                };
                stats.errors.push(TransformError {
                    key: key_display,
                    kind,
                    reason: failure.to_string(),
                });
                window.push(true);
                if window.tripped() {
                    return Err(Error::EvaluatorFailureRateExceeded {
                        failed: window.failed,
                        window: window.outcomes.len(),
                    });
                }
            }
        }

        iterator.next();
    }
    iterator.status().map_err(engine_error)?;

    if pending > 0 {
        store.write_batch(batch)?;
        stats.modified += pending;
    }

    Ok(TransformOutcome { stats, preview })
}

async fn evaluate_entry(
    key: &[u8],
    value: &[u8],
    options: &TransformOptions,
    script: Option<&str>,
    evaluator: &dyn Evaluator,
) -> Result<EntryDecision, EvalFailure> {
    if let Some(filter) = &options.filter {
        let outcome = evaluator.evaluate(filter, key, value).await?;
        if !outcome.accept.unwrap_or(false) {
            return Ok(EntryDecision::Skip);
        }
    }

    if let Some(script) = script {
        let outcome = evaluator.evaluate(script, key, value).await?;
        let new_key = outcome.new_key.unwrap_or_else(|| key.to_vec());
        let new_value = outcome.new_value.unwrap_or_else(|| value.to_vec());
        return Ok(EntryDecision::Rewrite(new_key, new_value));
    }

    let new_key = match &options.key_expr {
        Some(expr) => {
            let outcome = evaluator.evaluate(expr, key, value).await?;
            // a single byte result may come back in either slot
            outcome
                .new_key
                .or(outcome.new_value)
                .ok_or_else(|| EvalFailure::Failed("key expression returned no bytes".into()))?
        }
        None => key.to_vec(),
    };
    let new_value = match &options.value_expr {
        Some(expr) => {
            let outcome = evaluator.evaluate(expr, key, value).await?;
            outcome
                .new_value
                .ok_or_else(|| EvalFailure::Failed("value expression returned no bytes".into()))?
        }
        None => value.to_vec(),
    };
    Ok(EntryDecision::Rewrite(new_key, new_value))
}
