// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Key ordering strategies.
//!
//! Shuffle clients register the key type of a shuffle by name; the merge
//! engine resolves the matching comparator here. Upstream writers must sort
//! their blocks with the same comparator the server merges with.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{QuernError, Result};

/// Total order over serialized keys.
pub trait KeyComparator: Send + Sync {
    /// Compares two serialized keys.
    fn compare(&self, left: &[u8], right: &[u8]) -> Ordering;
}

/// Lexicographic byte order. Correct for raw bytes and for text keys whose
/// encoding is order-preserving.
#[derive(Debug, Default)]
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn compare(&self, left: &[u8], right: &[u8]) -> Ordering {
        left.cmp(right)
    }
}

/// Numeric order over 4-byte little-endian signed keys. Keys of any other
/// width fall back to byte order.
#[derive(Debug, Default)]
pub struct Int32Comparator;

impl KeyComparator for Int32Comparator {
    fn compare(&self, left: &[u8], right: &[u8]) -> Ordering {
        match (decode_i32(left), decode_i32(right)) {
            (Some(l), Some(r)) => l.cmp(&r),
            _ => left.cmp(right),
        }
    }
}

/// Numeric order over 8-byte little-endian signed keys. Keys of any other
/// width fall back to byte order.
#[derive(Debug, Default)]
pub struct Int64Comparator;

impl KeyComparator for Int64Comparator {
    fn compare(&self, left: &[u8], right: &[u8]) -> Ordering {
        match (decode_i64(left), decode_i64(right)) {
            (Some(l), Some(r)) => l.cmp(&r),
            _ => left.cmp(right),
        }
    }
}

fn decode_i32(bytes: &[u8]) -> Option<i32> {
    bytes.try_into().ok().map(i32::from_le_bytes)
}

fn decode_i64(bytes: &[u8]) -> Option<i64> {
    bytes.try_into().ok().map(i64::from_le_bytes)
}

/// Resolves the comparator registered under a key type name.
pub fn resolve_comparator(key_type: &str) -> Result<Arc<dyn KeyComparator>> {
    match key_type {
        "bytes" | "string" | "text" => Ok(Arc::new(BytewiseComparator)),
        "int32" => Ok(Arc::new(Int32Comparator)),
        "int64" => Ok(Arc::new(Int64Comparator)),
        other => Err(QuernError::Configuration(format!(
            "no comparator registered for key type '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytewise_order() {
        let cmp = BytewiseComparator;
        assert_eq!(cmp.compare(b"a", b"b"), Ordering::Less);
        assert_eq!(cmp.compare(b"b", b"ab"), Ordering::Greater);
        assert_eq!(cmp.compare(b"same", b"same"), Ordering::Equal);
    }

    #[test]
    fn int64_numeric_order() {
        let cmp = Int64Comparator;
        let two = 2i64.to_le_bytes();
        let ten = 10i64.to_le_bytes();
        let minus = (-1i64).to_le_bytes();
        // byte order would put 10 before 2 and -1 last
        assert_eq!(cmp.compare(&two, &ten), Ordering::Less);
        assert_eq!(cmp.compare(&minus, &two), Ordering::Less);
        assert_eq!(cmp.compare(&ten, &ten), Ordering::Equal);
    }

    #[test]
    fn int32_falls_back_on_odd_widths() {
        let cmp = Int32Comparator;
        assert_eq!(cmp.compare(b"ab", b"b"), Ordering::Less);
    }

    #[test]
    fn resolve_by_name() {
        assert!(resolve_comparator("string").is_ok());
        assert!(resolve_comparator("int32").is_ok());
        assert!(resolve_comparator("int64").is_ok());
        assert!(matches!(
            resolve_comparator("float128"),
            Err(QuernError::Configuration(_))
        ));
    }
}
