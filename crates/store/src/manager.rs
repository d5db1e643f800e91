// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Process-wide registry of the active store.
//!
//! Every engine reference flows through this single indirection, which is
//! what makes live database switching possible: connect closes the
//! current store, opens the new one, and in-flight operations on the old
//! store finish against their own `Arc` before it is released. The
//! exclusive lock serializes connect/disconnect; readers clone the `Arc`
//! out and drop the guard immediately.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use quarry_types::{Error, Result};

use crate::db::{AccessMode, Store};

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStatus {
    pub path: PathBuf,
    pub read_only: bool,
    pub connected_at: DateTime<Utc>,
    pub cf_count: usize,
    pub column_families: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct ActiveDatabase {
    store: Arc<Store>,
    connected_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct DatabaseManager {
    active: RwLock<Option<ActiveDatabase>>,
    favorites: RwLock<Vec<PathBuf>>,
}

impl DatabaseManager {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_favorites(favorites: Vec<PathBuf>) -> Self {
        Self {
            active: RwLock::new(None),
            favorites: RwLock::new(favorites),
        }
    }

    /// Close the current store (if any) and open `path`.
    pub fn connect(&self, path: impl AsRef<Path>, mode: AccessMode) -> Result<DatabaseStatus> {
        let mut active = self.active.write();
        if let Some(previous) = active.take() {
            previous.store.close();
        }
        let store = Arc::new(Store::open(path, mode)?);
        let entry = ActiveDatabase {
            store,
            connected_at: Utc::now(),
        };
        let status = status_of(&entry)?;
        info!(path = %status.path.display(), read_only = status.read_only, "Connected database");
        *active = Some(entry);
        Ok(status)
    }

    /// Close the current store. Idempotent.
    pub fn disconnect(&self) {
        let mut active = self.active.write();
        if let Some(previous) = active.take() {
            info!(path = %previous.store.path().display(), "Disconnected database");
            previous.store.close();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.active.read().is_some()
    }

    /// Metadata of the active connection, or `None` when disconnected.
    pub fn current(&self) -> Option<DatabaseStatus> {
        let active = self.active.read();
        active.as_ref().and_then(|entry| status_of(entry).ok())
    }

    /// The active store, for tool dispatch. `NoDatabase` when
    /// disconnected.
    pub fn store(&self) -> Result<Arc<Store>> {
        self.active
            .read()
            .as_ref()
            .map(|entry| entry.store.clone())
            .ok_or(Error::NoDatabase)
    }

    /// Probe `path` with a read-only open-and-close.
    pub fn validate(&self, path: impl AsRef<Path>) -> ValidationReport {
        match Store::open(path, AccessMode::ReadOnly) {
            Ok(store) => {
                store.close();
                ValidationReport {
                    valid: true,
                    error: None,
                }
            }
            Err(e) => ValidationReport {
                valid: false,
                error: Some(e.to_string()),
            },
        }
    }

    pub fn favorites(&self) -> Vec<PathBuf> {
        self.favorites.read().clone()
    }

    /// Record a favorite path. Paths are opaque metadata; nothing is
    /// validated here.
    pub fn add_favorite(&self, path: PathBuf) {
        let mut favorites = self.favorites.write();
        if !favorites.contains(&path) {
            favorites.push(path);
        }
    }
}

fn status_of(entry: &ActiveDatabase) -> Result<DatabaseStatus> {
    let column_families = entry.store.list_cfs()?;
    Ok(DatabaseStatus {
        path: entry.store.path().to_path_buf(),
        read_only: entry.store.mode().is_read_only(),
        connected_at: entry.connected_at,
        cf_count: column_families.len(),
        column_families,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use quarry_types::ErrorKind;

    #[test]
    fn connect_disconnect_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DatabaseManager::new();

        assert!(!manager.is_connected());
        assert!(matches!(manager.store(), Err(Error::NoDatabase)));
        assert!(manager.current().is_none());

        let status = manager.connect(dir.path(), AccessMode::ReadWrite).unwrap();
        assert_eq!(status.path, dir.path());
        assert!(!status.read_only);
        assert_eq!(status.column_families, vec!["default".to_owned()]);
        assert!(manager.is_connected());

        manager.disconnect();
        assert!(!manager.is_connected());
        // idempotent
        manager.disconnect();
    }

    #[test]
    fn connect_switches_the_active_store() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let manager = DatabaseManager::new();

        manager.connect(dir_a.path(), AccessMode::ReadWrite).unwrap();
        let store_a = manager.store().unwrap();
        store_a.put("default", b"k", b"a").unwrap();

        manager.connect(dir_b.path(), AccessMode::ReadWrite).unwrap();

        // the old handle fails deterministically after the switch
        let err = store_a.get("default", b"k").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreClosed);

        let store_b = manager.store().unwrap();
        assert_eq!(
            store_b.get("default", b"k").unwrap_err().kind(),
            ErrorKind::KeyNotFound
        );
    }

    #[test]
    fn validate_probes_without_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DatabaseManager::new();

        // seed a valid database
        {
            let store = Store::open(dir.path(), AccessMode::ReadWrite).unwrap();
            store.close();
        }

        let report = manager.validate(dir.path());
        assert!(report.valid, "{:?}", report.error);
        assert!(!manager.is_connected());

        let report = manager.validate(dir.path().join("does-not-exist"));
        assert!(!report.valid);
        assert!(report.error.is_some());
    }

    #[test]
    fn favorites_are_deduplicated_metadata() {
        let manager = DatabaseManager::with_favorites(vec![PathBuf::from("/data/a")]);
        manager.add_favorite(PathBuf::from("/data/b"));
        manager.add_favorite(PathBuf::from("/data/a"));
        assert_eq!(
            manager.favorites(),
            vec![PathBuf::from("/data/a"), PathBuf::from("/data/b")]
        );
    }
}
