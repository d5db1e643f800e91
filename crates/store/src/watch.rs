// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Tail-new-keys monitor.
//!
//! Polls the greatest key of a column family on an interval and emits
//! every key strictly greater than the previous watermark. Missed
//! windows are tolerated: whatever accumulated since the last tick is
//! drained on the next one, and no entry is ever reported twice.

use std::time::Duration;

use rocksdb::ReadOptions;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use quarry_types::Result;

use crate::db::{engine_error, Store};
use crate::scan::ScanEntry;

pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub interval: Duration,
    /// Attach timestamp interpretations to emitted entries.
    pub timestamps: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_WATCH_INTERVAL,
            timestamps: false,
        }
    }
}

/// Watch `cf` and feed new tail entries to `on_entry` until `token` is
/// cancelled. Returns on the next interval boundary after cancellation.
///
/// The initial watermark is the greatest key at call time; only keys
/// written beyond it are reported.
pub async fn watch(
    store: &Store,
    cf: &str,
    options: &WatchOptions,
    token: CancellationToken,
    mut on_entry: impl FnMut(ScanEntry),
) -> Result<()> {
    // also surfaces ColumnFamilyNotFound before the first tick
    let mut watermark = match store.get_last(cf) {
        Ok((key, _)) => Some(key),
        Err(e) if e.kind() == quarry_types::ErrorKind::ColumnFamilyEmpty => None,
        Err(e) => return Err(e),
    };

    let mut interval = tokio::time::interval(options.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(cf, "Watch cancelled");
                return Ok(());
            }
            _ = interval.tick() => {}
        }

        store.ensure_open()?;
        let last = match store.get_last(cf) {
            Ok((key, _)) => key,
            Err(e) if e.kind() == quarry_types::ErrorKind::ColumnFamilyEmpty => continue,
            Err(e) => return Err(e),
        };
        if watermark.as_deref() == Some(last.as_slice()) {
            continue;
        }

        // drain everything strictly greater than the watermark
        let mut iterator = store.raw_iterator_opt(cf, ReadOptions::default())?;
        match &watermark {
            Some(mark) => {
                iterator.seek(mark);
                if iterator.valid() && iterator.key() == Some(mark.as_slice()) {
                    iterator.next();
                }
            }
            None => iterator.seek_to_first(),
        }
        while iterator.valid() {
            let key = iterator.key().expect("valid iterator has a key").to_vec();
            let value = iterator
                .value()
                .expect("valid iterator has a value")
                .to_vec();
            watermark = Some(key.clone());
            on_entry(ScanEntry::new(key, value, options.timestamps));
            iterator.next();
        }
        iterator.status().map_err(engine_error)?;
    }
}
