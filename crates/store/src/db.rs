// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBRawIteratorWithThreadMode, DBWithThreadMode,
    MultiThreaded, Options, ReadOptions, WriteBatch,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use quarry_types::{Error, Result};

use crate::keys;

pub type DB = DBWithThreadMode<MultiThreaded>;
pub type DBIterator<'a> = DBRawIteratorWithThreadMode<'a, DB>;

pub const DEFAULT_CF: &str = "default";

/// Properties surfaced by [`Store::stats`], without the `rocksdb.` prefix.
const STAT_PROPERTIES: &[&str] = &[
    "estimate-num-keys",
    "estimate-live-data-size",
    "total-sst-files-size",
    "size-all-mem-tables",
    "num-snapshots",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    ReadWrite,
    ReadOnly,
}

impl AccessMode {
    pub fn is_read_only(&self) -> bool {
        matches!(self, AccessMode::ReadOnly)
    }
}

/// An open ordered key-value store with column families.
///
/// The store is shared behind an `Arc` by every front-end. [`Store::close`]
/// flips a flag that fails all subsequent operations with `StoreClosed`;
/// the engine itself is released when the last reference drops. Mutators
/// check the access mode before touching the engine, so a read-only store
/// never observes a write attempt.
pub struct Store {
    db: DB,
    path: PathBuf,
    mode: AccessMode,
    // kept in sync by create_cf/drop_cf; rocksdb only exposes the cf list
    // through a static path-based call
    cf_names: RwLock<Vec<String>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Store {
    /// Open the store at `path`.
    ///
    /// Read-write mode creates the database (and the `default` column
    /// family) when missing; read-only mode requires an existing database.
    /// A path already locked by another process fails with `PathInUse`.
    pub fn open(path: impl AsRef<Path>, mode: AccessMode) -> Result<Store> {
        let path = path.as_ref().to_path_buf();
        let existing_cfs = match DB::list_cf(&Options::default(), &path) {
            Ok(cfs) => cfs,
            // a fresh directory has no descriptor yet
            Err(_) => vec![DEFAULT_CF.to_owned()],
        };

        let db = match mode {
            AccessMode::ReadWrite => {
                let descriptors = existing_cfs
                    .iter()
                    .map(|name| ColumnFamilyDescriptor::new(name, cf_options()))
                    .collect::<Vec<_>>();
                DB::open_cf_descriptors(&db_options(), &path, descriptors)
            }
            AccessMode::ReadOnly => {
                DB::open_cf_for_read_only(&Options::default(), &path, &existing_cfs, false)
            }
        }
        .map_err(|e| categorize_open_error(&path, e))?;

        info!(
            path = %path.display(),
            ?mode,
            column_families = existing_cfs.len(),
            "Opened store"
        );

        Ok(Store {
            db,
            path,
            mode,
            cf_names: RwLock::new(existing_cfs),
            closed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the store closed and stop background work. Idempotent. Later
    /// operations on any handle fail with `StoreClosed`; the engine files
    /// are released once the last `Arc<Store>` drops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.db.cancel_all_background_work(true);
        debug!(path = %self.path.display(), "Closed store");
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::StoreClosed);
        }
        Ok(())
    }

    fn ensure_writable(&self, operation: &'static str) -> Result<()> {
        self.ensure_open()?;
        if self.mode.is_read_only() {
            return Err(Error::CapabilityDenied { operation });
        }
        Ok(())
    }

    pub fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.ensure_open()?;
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::ColumnFamilyNotFound(name.to_owned()))
    }

    pub fn list_cfs(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        Ok(self.cf_names.read().clone())
    }

    pub fn create_cf(&self, name: &str) -> Result<()> {
        self.ensure_writable("create_column_family")?;
        if name.is_empty() || name.len() > 255 {
            return Err(Error::InvalidName(name.to_owned()));
        }
        let mut cf_names = self.cf_names.write();
        if cf_names.iter().any(|cf| cf == name) {
            return Err(Error::ColumnFamilyExists(name.to_owned()));
        }
        self.db
            .create_cf(name, &cf_options())
            .map_err(engine_error)?;
        cf_names.push(name.to_owned());
        info!(cf = name, "Created column family");
        Ok(())
    }

    pub fn drop_cf(&self, name: &str) -> Result<()> {
        self.ensure_writable("drop_column_family")?;
        if name == DEFAULT_CF {
            return Err(Error::CannotDropDefault);
        }
        let mut cf_names = self.cf_names.write();
        let position = cf_names
            .iter()
            .position(|cf| cf == name)
            .ok_or_else(|| Error::ColumnFamilyNotFound(name.to_owned()))?;
        self.db.drop_cf(name).map_err(engine_error)?;
        cf_names.remove(position);
        info!(cf = name, "Dropped column family");
        Ok(())
    }

    pub fn get(&self, cf: &str, key: &[u8]) -> Result<Vec<u8>> {
        let handle = self.cf_handle(cf)?;
        let value = self
            .db
            .get_pinned_cf(&handle, key)
            .map_err(engine_error)?
            .ok_or_else(|| Error::key_not_found(cf, keys::format_for_display(key).0))?;
        Ok(value.to_vec())
    }

    pub fn put(&self, cf: &str, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_writable("put")?;
        let handle = self.cf_handle(cf)?;
        self.db.put_cf(&handle, key, value).map_err(engine_error)
    }

    pub fn delete(&self, cf: &str, key: &[u8]) -> Result<()> {
        self.ensure_writable("delete")?;
        let handle = self.cf_handle(cf)?;
        self.db.delete_cf(&handle, key).map_err(engine_error)
    }

    /// The entry with the greatest key, or `ColumnFamilyEmpty`.
    pub fn get_last(&self, cf: &str) -> Result<(Vec<u8>, Vec<u8>)> {
        let handle = self.cf_handle(cf)?;
        let mut iterator = self.db.raw_iterator_cf(&handle);
        iterator.seek_to_last();
        if !iterator.valid() {
            iterator.status().map_err(engine_error)?;
            return Err(Error::ColumnFamilyEmpty(cf.to_owned()));
        }
        let key = iterator.key().expect("valid iterator has a key").to_vec();
        let value = iterator
            .value()
            .expect("valid iterator has a value")
            .to_vec();
        Ok((key, value))
    }

    /// Apply a write batch. The engine guarantees at-most-one operation
    /// per key per batch is observed in insertion order.
    pub fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        self.ensure_writable("write_batch")?;
        self.db.write(batch).map_err(engine_error)
    }

    /// A raw iterator over `cf` honoring the given read options. Created,
    /// drained, and dropped within a single engine call; cursors are the
    /// only scan state that crosses calls.
    pub fn raw_iterator_opt(&self, cf: &str, readopts: ReadOptions) -> Result<DBIterator<'_>> {
        let handle = self.cf_handle(cf)?;
        Ok(self.db.raw_iterator_cf_opt(&handle, readopts))
    }

    /// Numeric engine statistics, for one column family or aggregated
    /// over all of them.
    pub fn stats(&self, cf: Option<&str>) -> Result<BTreeMap<String, u64>> {
        self.ensure_open()?;
        let cfs = match cf {
            Some(name) => {
                // surface ColumnFamilyNotFound before touching properties
                self.cf_handle(name)?;
                vec![name.to_owned()]
            }
            None => self.list_cfs()?,
        };

        let mut stats = BTreeMap::new();
        for property in STAT_PROPERTIES {
            let mut total = 0;
            for cf_name in &cfs {
                let handle = self.cf_handle(cf_name)?;
                total += self
                    .db
                    .property_int_value_cf(&handle, &format!("rocksdb.{property}"))
                    .map_err(engine_error)?
                    .unwrap_or(0);
            }
            stats.insert(property.replace('-', "_"), total);
        }
        stats.insert("column_families".to_owned(), cfs.len() as u64);
        Ok(stats)
    }
}

fn db_options() -> Options {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.create_missing_column_families(true);
    //
    // no need to retain 1000 log files by default.
    //
    opts.set_keep_log_file_num(10);
    // do not persist inconsistent data across column families on crash
    opts.set_atomic_flush(true);
    opts
}

fn cf_options() -> Options {
    Options::default()
}

fn categorize_open_error(path: &Path, e: rocksdb::Error) -> Error {
    let message = e.to_string();
    if message.contains("lock") {
        return Error::PathInUse(path.display().to_string());
    }
    engine_error(e)
}

/// Categorize an engine error into the flat taxonomy. Everything the
/// taxonomy does not name becomes `IoError` (i/o class) or
/// `ToolExecutionFailed`.
pub(crate) fn engine_error(e: rocksdb::Error) -> Error {
    use rocksdb::ErrorKind;
    match e.kind() {
        ErrorKind::Corruption => Error::CorruptStore(e.into_string()),
        ErrorKind::IOError => Error::Io(std::io::Error::other(e.into_string())),
        _ => Error::ToolExecutionFailed(e.into_string()),
    }
}
