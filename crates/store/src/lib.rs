// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Database access layer: the rocksdb-backed [`Store`], the smart key
//! codec, and the scan/search/transform/export/watch engines that walk it.

pub mod db;
pub mod evaluator;
pub mod export;
pub mod keys;
pub mod manager;
pub mod scan;
pub mod search;
pub mod transform;
pub mod watch;

pub use db::{AccessMode, Store, DEFAULT_CF};
pub use manager::{DatabaseManager, DatabaseStatus, ValidationReport};
pub use scan::{Cursor, Direction, ScanEntry, ScanOptions, ScanResult};
