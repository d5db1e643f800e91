// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Bounded forward/reverse iteration with cursor-resumable pagination.
//!
//! A scan creates one raw iterator, drains at most `limit` entries and
//! drops the iterator before returning; the returned cursor is the only
//! state that crosses calls. Without concurrent writes, re-issuing the
//! scan with `after = next_cursor` resumes strictly after the last yielded
//! key with no gaps and no repeats. Under concurrent mutation the scan
//! stays ordered and repeat-free but may skip or include entries written
//! in between; no snapshot is taken.

use base64::prelude::{Engine, BASE64_URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rocksdb::ReadOptions;
use serde::{Deserialize, Serialize};

use quarry_types::{Error, Result};

use crate::db::{engine_error, Store};
use crate::keys;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

/// Opaque pagination token: the last physical key a scan yielded plus the
/// direction it was walking. Base64url on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub last_key: Vec<u8>,
    pub direction: Direction,
}

impl Cursor {
    pub fn new(last_key: Vec<u8>, direction: Direction) -> Self {
        Self {
            last_key,
            direction,
        }
    }

    pub fn encode(&self) -> String {
        let mut raw = Vec::with_capacity(self.last_key.len() + 1);
        raw.push(match self.direction {
            Direction::Forward => b'f',
            Direction::Reverse => b'r',
        });
        raw.extend_from_slice(&self.last_key);
        BASE64_URL_SAFE_NO_PAD.encode(raw)
    }

    pub fn decode(token: &str) -> Result<Self> {
        let raw = BASE64_URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| Error::invalid_arguments("after", format!("malformed cursor: {e}")))?;
        let (tag, last_key) = raw
            .split_first()
            .ok_or_else(|| Error::invalid_arguments("after", "empty cursor"))?;
        let direction = match tag {
            b'f' => Direction::Forward,
            b'r' => Direction::Reverse,
            _ => return Err(Error::invalid_arguments("after", "unknown cursor direction")),
        };
        Ok(Cursor {
            last_key: last_key.to_vec(),
            direction,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Inclusive lower bound; absent means the first key.
    pub start: Option<Vec<u8>>,
    /// Exclusive upper bound; absent means past the last key.
    pub end: Option<Vec<u8>>,
    pub direction: Direction,
    pub limit: usize,
    /// Resume strictly after this cursor.
    pub after: Option<Cursor>,
    /// When off, values in the result are empty byte strings.
    pub include_values: bool,
    /// Attach the key codec's timestamp interpretation to each entry.
    pub timestamps: bool,
}

/// One scanned entry with its precomputed display forms.
#[derive(Debug, Clone, Serialize)]
pub struct ScanEntry {
    #[serde(skip)]
    pub key: Vec<u8>,
    #[serde(skip)]
    pub value: Vec<u8>,
    #[serde(rename = "key")]
    pub key_display: String,
    pub key_is_binary: bool,
    #[serde(rename = "value")]
    pub value_display: String,
    pub value_is_binary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ScanEntry {
    pub(crate) fn new(key: Vec<u8>, value: Vec<u8>, timestamps: bool) -> Self {
        let (key_display, key_is_binary) = keys::format_for_display(&key);
        let (value_display, value_is_binary) = keys::format_for_display(&value);
        let timestamp = timestamps
            .then(|| keys::interpret_as_timestamp(&key))
            .flatten();
        Self {
            key,
            value,
            key_display,
            key_is_binary,
            value_display,
            value_is_binary,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub entries: Vec<ScanEntry>,
    pub count: usize,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Scan `cf` according to `options`.
///
/// Forward scans walk `[start, end)` ascending; reverse scans walk the
/// same range descending, starting just before `end`. Bounds must satisfy
/// `start <= end` in both directions.
pub fn scan(store: &Store, cf: &str, options: &ScanOptions) -> Result<ScanResult> {
    if let (Some(start), Some(end)) = (&options.start, &options.end) {
        if end < start {
            return Err(Error::InvalidBounds(format!(
                "end '{}' sorts before start '{}'",
                keys::format_for_display(end).0,
                keys::format_for_display(start).0,
            )));
        }
    }
    if let Some(after) = &options.after {
        if after.direction != options.direction {
            return Err(Error::invalid_arguments(
                "after",
                "cursor direction does not match the scan direction",
            ));
        }
    }

    let mut readopts = ReadOptions::default();
    readopts.set_total_order_seek(true);
    if let Some(start) = &options.start {
        readopts.set_iterate_lower_bound(start.clone());
    }
    if let Some(end) = &options.end {
        readopts.set_iterate_upper_bound(end.clone());
    }

    let mut iterator = store.raw_iterator_opt(cf, readopts)?;

    // position on the first entry to yield
    match options.direction {
        Direction::Forward => match &options.after {
            Some(after) => {
                iterator.seek(&after.last_key);
                if iterator.valid() && iterator.key() == Some(after.last_key.as_slice()) {
                    iterator.next();
                }
            }
            None => match &options.start {
                Some(start) => iterator.seek(start),
                None => iterator.seek_to_first(),
            },
        },
        Direction::Reverse => match &options.after {
            Some(after) => {
                iterator.seek_for_prev(&after.last_key);
                if iterator.valid() && iterator.key() == Some(after.last_key.as_slice()) {
                    iterator.prev();
                }
            }
            None => match &options.end {
                Some(end) => {
                    // end is exclusive
                    iterator.seek_for_prev(end);
                    if iterator.valid() && iterator.key() == Some(end.as_slice()) {
                        iterator.prev();
                    }
                }
                None => iterator.seek_to_last(),
            },
        },
    }

    let mut entries = Vec::new();
    while iterator.valid() && entries.len() < options.limit {
        let key = iterator.key().expect("valid iterator has a key").to_vec();
        let value = if options.include_values {
            iterator
                .value()
                .expect("valid iterator has a value")
                .to_vec()
        } else {
            Vec::new()
        };
        entries.push(ScanEntry::new(key, value, options.timestamps));
        match options.direction {
            Direction::Forward => iterator.next(),
            Direction::Reverse => iterator.prev(),
        }
    }
    iterator.status().map_err(engine_error)?;

    let has_more = iterator.valid() && !entries.is_empty();
    let next_cursor = has_more.then(|| {
        Cursor::new(
            entries.last().expect("entries is non-empty").key.clone(),
            options.direction,
        )
        .encode()
    });

    Ok(ScanResult {
        count: entries.len(),
        has_more,
        next_cursor,
        entries,
    })
}

/// The least upper bound of all keys starting with `prefix`, or `None`
/// when the prefix is all `0xFF`.
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.last() {
        if *last == 0xFF {
            upper.pop();
        } else {
            *upper.last_mut().expect("non-empty") += 1;
            return Some(upper);
        }
    }
    None
}

/// Prefix scan: a forward scan over `[prefix, successor(prefix))`.
pub fn prefix_scan(
    store: &Store,
    cf: &str,
    prefix: &[u8],
    options: &ScanOptions,
) -> Result<ScanResult> {
    let options = ScanOptions {
        start: Some(prefix.to_vec()),
        end: prefix_upper_bound(prefix),
        direction: Direction::Forward,
        ..options.clone()
    };
    scan(store, cf, &options)
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;

    use crate::db::{AccessMode, DEFAULT_CF};

    fn seeded_store(entries: &[(&[u8], &[u8])]) -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), AccessMode::ReadWrite).unwrap();
        for (k, v) in entries {
            store.put(DEFAULT_CF, k, v).unwrap();
        }
        (dir, store)
    }

    fn ten_keys() -> Vec<(Vec<u8>, Vec<u8>)> {
        (1..=10u32)
            .map(|i| {
                (
                    format!("k{i:02}").into_bytes(),
                    format!("v{i:02}").into_bytes(),
                )
            })
            .collect()
    }

    fn scan_all(store: &Store, options: &ScanOptions) -> Vec<String> {
        scan(store, DEFAULT_CF, options)
            .unwrap()
            .entries
            .into_iter()
            .map(|e| e.key_display)
            .collect()
    }

    #[test]
    fn forward_scan_in_key_order() {
        let seeded = ten_keys();
        let (_dir, store) = seeded_store(
            &seeded
                .iter()
                .map(|(k, v)| (k.as_slice(), v.as_slice()))
                .collect::<Vec<_>>(),
        );

        let result = scan(
            &store,
            DEFAULT_CF,
            &ScanOptions {
                limit: usize::MAX,
                include_values: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_that!(result.count, eq(10));
        assert!(!result.has_more);
        assert_that!(result.next_cursor, none());
        assert_eq!(result.entries[0].key_display, "k01");
        assert_eq!(result.entries[0].value_display, "v01");
        assert_eq!(result.entries[9].key_display, "k10");
    }

    #[test]
    fn pagination_covers_everything_without_gaps_or_repeats() {
        let seeded = ten_keys();
        let (_dir, store) = seeded_store(
            &seeded
                .iter()
                .map(|(k, v)| (k.as_slice(), v.as_slice()))
                .collect::<Vec<_>>(),
        );

        let mut collected = Vec::new();
        let mut after = None;
        let mut pages = 0;
        loop {
            let result = scan(
                &store,
                DEFAULT_CF,
                &ScanOptions {
                    limit: 3,
                    include_values: true,
                    after: after.take(),
                    ..Default::default()
                },
            )
            .unwrap();
            pages += 1;
            collected.extend(result.entries.iter().map(|e| e.key_display.clone()));
            if !result.has_more {
                break;
            }
            after = Some(Cursor::decode(result.next_cursor.as_deref().unwrap()).unwrap());
        }

        assert_that!(pages, eq(4));
        let all: Vec<_> = (1..=10).map(|i| format!("k{i:02}")).collect();
        assert_that!(collected, container_eq(all));
    }

    #[test]
    fn bounded_scan_is_half_open() {
        let seeded = ten_keys();
        let (_dir, store) = seeded_store(
            &seeded
                .iter()
                .map(|(k, v)| (k.as_slice(), v.as_slice()))
                .collect::<Vec<_>>(),
        );

        let result = scan_all(
            &store,
            &ScanOptions {
                start: Some(b"k03".to_vec()),
                end: Some(b"k06".to_vec()),
                limit: usize::MAX,
                ..Default::default()
            },
        );
        assert_eq!(result, vec!["k03", "k04", "k05"]);
    }

    #[test]
    fn reverse_scan_descends_from_before_end() {
        let seeded = ten_keys();
        let (_dir, store) = seeded_store(
            &seeded
                .iter()
                .map(|(k, v)| (k.as_slice(), v.as_slice()))
                .collect::<Vec<_>>(),
        );

        let result = scan_all(
            &store,
            &ScanOptions {
                start: Some(b"k03".to_vec()),
                end: Some(b"k06".to_vec()),
                direction: Direction::Reverse,
                limit: usize::MAX,
                ..Default::default()
            },
        );
        assert_eq!(result, vec!["k05", "k04", "k03"]);

        // unbounded reverse starts at the last key
        let result = scan_all(
            &store,
            &ScanOptions {
                direction: Direction::Reverse,
                limit: 2,
                ..Default::default()
            },
        );
        assert_eq!(result, vec!["k10", "k09"]);
    }

    #[test]
    fn reverse_pagination_resumes_strictly_beyond() {
        let seeded = ten_keys();
        let (_dir, store) = seeded_store(
            &seeded
                .iter()
                .map(|(k, v)| (k.as_slice(), v.as_slice()))
                .collect::<Vec<_>>(),
        );

        let first = scan(
            &store,
            DEFAULT_CF,
            &ScanOptions {
                direction: Direction::Reverse,
                limit: 4,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(first.has_more);

        let cursor = Cursor::decode(first.next_cursor.as_deref().unwrap()).unwrap();
        let second = scan(
            &store,
            DEFAULT_CF,
            &ScanOptions {
                direction: Direction::Reverse,
                limit: usize::MAX,
                after: Some(cursor),
                ..Default::default()
            },
        )
        .unwrap();

        let keys: Vec<_> = second.entries.iter().map(|e| &e.key_display).collect();
        assert_eq!(keys, vec!["k06", "k05", "k04", "k03", "k02", "k01"]);
        assert!(!second.has_more);
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        let (_dir, store) = seeded_store(&[(b"a".as_slice(), b"1".as_slice())]);
        let err = scan(
            &store,
            DEFAULT_CF,
            &ScanOptions {
                start: Some(b"z".to_vec()),
                end: Some(b"a".to_vec()),
                limit: 10,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), quarry_types::ErrorKind::InvalidBounds);
    }

    #[test]
    fn keys_only_scans_yield_empty_values() {
        let (_dir, store) = seeded_store(&[(b"a".as_slice(), b"payload".as_slice())]);
        let result = scan(
            &store,
            DEFAULT_CF,
            &ScanOptions {
                limit: 10,
                include_values: false,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(result.entries[0].value.is_empty());
        assert_eq!(result.entries[0].value_display, "");
    }

    #[test]
    fn binary_entries_carry_flags() {
        let (_dir, store) = seeded_store(&[(&[0x00, 0xAB][..], &[0xFF][..])]);
        let result = scan(
            &store,
            DEFAULT_CF,
            &ScanOptions {
                limit: 10,
                include_values: true,
                ..Default::default()
            },
        )
        .unwrap();
        let entry = &result.entries[0];
        assert_eq!(entry.key_display, "00AB");
        assert!(entry.key_is_binary);
        assert_eq!(entry.value_display, "FF");
        assert!(entry.value_is_binary);
    }

    #[test]
    fn timestamps_attach_when_requested() {
        let ticks: u64 = 637_450_560_000_000_000;
        let (_dir, store) = seeded_store(&[(&ticks.to_be_bytes()[..], b"v".as_slice())]);

        let result = scan(
            &store,
            DEFAULT_CF,
            &ScanOptions {
                limit: 10,
                timestamps: true,
                ..Default::default()
            },
        )
        .unwrap();
        let ts = result.entries[0].timestamp.unwrap();
        assert_eq!(ts.to_rfc3339(), "2021-01-01T00:00:00+00:00");
    }

    #[test]
    fn prefix_scan_is_exact() {
        let (_dir, store) = seeded_store(&[
            (b"user:1".as_slice(), b"A".as_slice()),
            (b"user:2".as_slice(), b"B".as_slice()),
            (b"users".as_slice(), b"C".as_slice()),
            (b"v".as_slice(), b"D".as_slice()),
        ]);

        let result = prefix_scan(
            &store,
            DEFAULT_CF,
            b"user:",
            &ScanOptions {
                limit: usize::MAX,
                include_values: true,
                ..Default::default()
            },
        )
        .unwrap();

        let entries: Vec<_> = result
            .entries
            .iter()
            .map(|e| (e.key_display.as_str(), e.value_display.as_str()))
            .collect();
        assert_eq!(entries, vec![("user:1", "A"), ("user:2", "B")]);
    }

    #[test]
    fn prefix_upper_bound_handles_trailing_ff() {
        assert_eq!(prefix_upper_bound(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(
            prefix_upper_bound(&[0x61, 0xFF, 0xFF]),
            Some(vec![0x62])
        );
        assert_eq!(prefix_upper_bound(&[0xFF, 0xFF]), None);
        assert_eq!(prefix_upper_bound(b""), None);
    }

    #[test]
    fn cursor_round_trips_binary_keys() {
        let cursor = Cursor::new(vec![0x00, 0xFF, 0x7F], Direction::Reverse);
        let encoded = cursor.encode();
        assert_eq!(Cursor::decode(&encoded).unwrap(), cursor);

        assert!(Cursor::decode("!!!").is_err());
        assert!(Cursor::decode("").is_err());
    }
}
