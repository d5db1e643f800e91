// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Cross-engine properties over a seeded store.

use quarry_store::export::{export_csv, ExportOptions};
use quarry_store::scan::{prefix_scan, scan, Cursor, ScanOptions};
use quarry_store::{AccessMode, Store, DEFAULT_CF};

fn seeded_store(entries: &[(Vec<u8>, Vec<u8>)]) -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path(), AccessMode::ReadWrite).unwrap();
    for (k, v) in entries {
        store.put(DEFAULT_CF, k, v).unwrap();
    }
    (dir, store)
}

fn mixed_keys() -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut entries: Vec<(Vec<u8>, Vec<u8>)> = (0..57u64)
        .map(|i| (format!("text:{i:03}").into_bytes(), vec![b'v'; 4]))
        .collect();
    // binary and integer keys interleave with the text ones
    for i in 0..19u64 {
        entries.push((i.to_be_bytes().to_vec(), vec![0xFF, i as u8]));
        entries.push((vec![0x00, 0x01, i as u8], b"bin".to_vec()));
    }
    entries
}

/// Concatenating cursor-paged scans equals the unpaged scan, entry for
/// entry, for any page size.
#[test]
fn paged_scans_compose_for_any_page_size() {
    let (_dir, store) = seeded_store(&mixed_keys());

    let full = scan(
        &store,
        DEFAULT_CF,
        &ScanOptions {
            limit: usize::MAX,
            include_values: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(full.count, 57 + 19 * 2);

    for page_size in [1, 2, 7, 50, 1000] {
        let mut collected = Vec::new();
        let mut after: Option<Cursor> = None;
        loop {
            let page = scan(
                &store,
                DEFAULT_CF,
                &ScanOptions {
                    limit: page_size,
                    include_values: true,
                    after: after.take(),
                    ..Default::default()
                },
            )
            .unwrap();
            let at_end = !page.has_more;
            let cursor = page.next_cursor.clone();
            collected.extend(page.entries);
            if at_end {
                break;
            }
            after = Some(Cursor::decode(cursor.as_deref().unwrap()).unwrap());
        }

        assert_eq!(collected.len(), full.entries.len(), "page size {page_size}");
        for (paged, unpaged) in collected.iter().zip(&full.entries) {
            assert_eq!(paged.key, unpaged.key, "page size {page_size}");
            assert_eq!(paged.value, unpaged.value, "page size {page_size}");
        }
    }
}

/// Every returned key begins with the prefix, and every key with the
/// prefix is returned.
#[test]
fn prefix_scans_are_exact_and_complete() {
    let (_dir, store) = seeded_store(&mixed_keys());

    let result = prefix_scan(
        &store,
        DEFAULT_CF,
        b"text:00",
        &ScanOptions {
            limit: usize::MAX,
            include_values: true,
            ..Default::default()
        },
    )
    .unwrap();

    for entry in &result.entries {
        assert!(entry.key.starts_with(b"text:00"), "{}", entry.key_display);
    }
    // text:000 through text:009
    assert_eq!(result.count, 10);

    // a prefix that is itself a full key
    let result = prefix_scan(
        &store,
        DEFAULT_CF,
        b"text:000",
        &ScanOptions {
            limit: usize::MAX,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(result.count, 1);
}

/// Forward and reverse scans over the same bounds see the same entries,
/// mirrored.
#[test]
fn reverse_scans_mirror_forward_scans() {
    let (_dir, store) = seeded_store(&mixed_keys());

    let forward = scan(
        &store,
        DEFAULT_CF,
        &ScanOptions {
            start: Some(b"text:010".to_vec()),
            end: Some(b"text:030".to_vec()),
            limit: usize::MAX,
            ..Default::default()
        },
    )
    .unwrap();
    let reverse = scan(
        &store,
        DEFAULT_CF,
        &ScanOptions {
            start: Some(b"text:010".to_vec()),
            end: Some(b"text:030".to_vec()),
            direction: quarry_store::Direction::Reverse,
            limit: usize::MAX,
            ..Default::default()
        },
    )
    .unwrap();

    let mut mirrored: Vec<_> = reverse.entries.iter().map(|e| &e.key).collect();
    mirrored.reverse();
    let forward_keys: Vec<_> = forward.entries.iter().map(|e| &e.key).collect();
    assert_eq!(forward_keys, mirrored);
}

/// A read-only store denies every mutator without side effects while
/// reads keep succeeding, and export observes the identical content.
#[test]
fn read_only_stores_are_bitwise_stable() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = Store::open(dir.path(), AccessMode::ReadWrite).unwrap();
        for (k, v) in mixed_keys() {
            store.put(DEFAULT_CF, &k, &v).unwrap();
        }
        store.close();
    }

    let store = Store::open(dir.path(), AccessMode::ReadOnly).unwrap();
    let mut before = Vec::new();
    export_csv(&store, DEFAULT_CF, &ExportOptions::default(), &mut before).unwrap();

    assert!(store.put(DEFAULT_CF, b"x", b"y").is_err());
    assert!(store.delete(DEFAULT_CF, b"text:000").is_err());
    assert!(store.create_cf("scratch").is_err());

    let mut after = Vec::new();
    export_csv(&store, DEFAULT_CF, &ExportOptions::default(), &mut after).unwrap();
    assert_eq!(before, after);
}
