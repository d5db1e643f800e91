// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Smart key codec.
//!
//! Keys cross three boundaries: user input (CLI flags, JSON bodies), the
//! engine (raw bytes), and display output. The codec classifies raw bytes
//! into one of the supported key families and converts between the
//! canonical byte form and the display form. Detection is deterministic
//! and idempotent; every result that leaves the process carries an
//! `is_binary` flag so clients can round-trip keys without loss.

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};

use quarry_types::Error;

/// Ticks (100ns intervals since 0001-01-01 UTC) at the unix epoch.
const UNIX_EPOCH_TICKS: u64 = 621_355_968_000_000_000;

/// Plausibility window for .NET tick keys: 1900-01-01 to 2200-01-01.
const TICK_MIN: u64 = 599_266_080_000_000_000;
const TICK_MAX: u64 = 693_937_152_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Utf8String,
    Uint64BigEndian,
    DotNetTick,
    Binary,
}

/// Classify raw key bytes.
///
/// The empty key is permitted and classifies as a string. An 8-byte key
/// that is not printable text is read as a big-endian u64 and becomes a
/// tick when it falls inside the tick plausibility window.
pub fn detect(bytes: &[u8]) -> KeyKind {
    if is_printable_utf8(bytes) {
        return KeyKind::Utf8String;
    }
    if bytes.len() == 8 {
        let v = u64::from_be_bytes(bytes.try_into().expect("8 bytes"));
        if (TICK_MIN..=TICK_MAX).contains(&v) {
            return KeyKind::DotNetTick;
        }
        return KeyKind::Uint64BigEndian;
    }
    KeyKind::Binary
}

/// The display form: the text itself for printable UTF-8, uppercase hex
/// (no separators) otherwise. The second element is the `is_binary` flag.
pub fn format_for_display(bytes: &[u8]) -> (String, bool) {
    if is_printable_utf8(bytes) {
        // checked by is_printable_utf8
        (std::str::from_utf8(bytes).expect("printable utf-8").to_owned(), false)
    } else {
        (hex::encode_upper(bytes), true)
    }
}

/// Parse a user-supplied key literal into canonical bytes.
///
/// `0x<hex>` becomes raw bytes, `u64:<decimal>` becomes an 8-byte
/// big-endian integer, anything else is taken as UTF-8 text. The function
/// only fails when one of the two prefixes is present but the remainder is
/// malformed.
pub fn parse_user_input(text: &str) -> Result<Vec<u8>, Error> {
    if let Some(hex_part) = text.strip_prefix("0x") {
        return hex::decode(hex_part).map_err(|e| Error::InvalidKeyLiteral {
            literal: text.to_owned(),
            reason: e.to_string(),
        });
    }
    if let Some(decimal) = text.strip_prefix("u64:") {
        let value: u64 = decimal.parse().map_err(|e: std::num::ParseIntError| {
            Error::InvalidKeyLiteral {
                literal: text.to_owned(),
                reason: e.to_string(),
            }
        })?;
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u64(value);
        return Ok(buf.to_vec());
    }
    Ok(text.as_bytes().to_vec())
}

/// Inverse of [`format_for_display`], given the `is_binary` flag the
/// display form was emitted with.
pub fn parse_display(text: &str, is_binary: bool) -> Result<Vec<u8>, Error> {
    if is_binary {
        hex::decode(text).map_err(|e| Error::InvalidKeyLiteral {
            literal: text.to_owned(),
            reason: e.to_string(),
        })
    } else {
        Ok(text.as_bytes().to_vec())
    }
}

/// Interpret key bytes as a UTC instant, if plausible.
///
/// Accepts an 8-byte big-endian integer or an ASCII decimal. Ticks are
/// recognized first (the tick window does not overlap the epoch-based
/// ranges below it); the remaining magnitudes classify as nanoseconds,
/// microseconds, milliseconds or seconds since the unix epoch.
pub fn interpret_as_timestamp(bytes: &[u8]) -> Option<DateTime<Utc>> {
    let v = numeric_value(bytes)?;

    if (TICK_MIN..=TICK_MAX).contains(&v) {
        return ticks_to_utc(v);
    }

    if v >= 1_000_000_000_000_000_000 {
        // nanoseconds
        DateTime::from_timestamp((v / 1_000_000_000) as i64, (v % 1_000_000_000) as u32)
    } else if v >= 1_000_000_000_000_000 {
        // microseconds
        DateTime::from_timestamp_micros(v as i64)
    } else if v >= 1_000_000_000_000 {
        // milliseconds
        DateTime::from_timestamp_millis(v as i64)
    } else if v >= 1_000_000 {
        // seconds, reaching back to 1970-01-12
        DateTime::from_timestamp(v as i64, 0)
    } else {
        None
    }
}

fn numeric_value(bytes: &[u8]) -> Option<u64> {
    if bytes.len() == 8 {
        return Some(u64::from_be_bytes(bytes.try_into().expect("8 bytes")));
    }
    if !bytes.is_empty() && bytes.len() <= 20 && bytes.iter().all(u8::is_ascii_digit) {
        // checked ascii digits
        return std::str::from_utf8(bytes).expect("ascii").parse().ok();
    }
    None
}

fn ticks_to_utc(ticks: u64) -> Option<DateTime<Utc>> {
    let since_epoch = ticks.checked_sub(UNIX_EPOCH_TICKS)?;
    let secs = (since_epoch / 10_000_000) as i64;
    let nanos = ((since_epoch % 10_000_000) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

fn is_printable_utf8(bytes: &[u8]) -> bool {
    match std::str::from_utf8(bytes) {
        Ok(text) => text
            .chars()
            .all(|c| !c.is_control() || c == '\t' || c == '\n'),
        Err(_) => false,
    }
}
