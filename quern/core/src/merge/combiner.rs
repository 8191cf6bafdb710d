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

//! Value combiners.
//!
//! When a shuffle is registered with combining enabled, the merger folds
//! runs of equal-key records into a single record by reducing their values
//! pairwise, left to right.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{QuernError, Result};

/// Pairwise reduction of two serialized values of the same key.
pub trait Combiner: Send + Sync {
    /// Folds the incoming value into the accumulated one.
    fn combine(&self, current: &[u8], incoming: &[u8]) -> Result<Bytes>;
}

/// Width of the integer values a [SumCombiner] operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntWidth {
    Int32,
    Int64,
}

/// Sums fixed-width little-endian integer values per key.
#[derive(Debug)]
pub struct SumCombiner {
    width: IntWidth,
}

impl SumCombiner {
    /// Sums 4-byte signed values.
    pub fn int32() -> Self {
        Self {
            width: IntWidth::Int32,
        }
    }

    /// Sums 8-byte signed values.
    pub fn int64() -> Self {
        Self {
            width: IntWidth::Int64,
        }
    }
}

impl Combiner for SumCombiner {
    fn combine(&self, current: &[u8], incoming: &[u8]) -> Result<Bytes> {
        match self.width {
            IntWidth::Int32 => {
                let sum = decode_i32(current)?.wrapping_add(decode_i32(incoming)?);
                Ok(Bytes::copy_from_slice(&sum.to_le_bytes()))
            }
            IntWidth::Int64 => {
                let sum = decode_i64(current)?.wrapping_add(decode_i64(incoming)?);
                Ok(Bytes::copy_from_slice(&sum.to_le_bytes()))
            }
        }
    }
}

fn decode_i32(bytes: &[u8]) -> Result<i32> {
    bytes.try_into().map(i32::from_le_bytes).map_err(|_| {
        QuernError::General(format!(
            "sum combiner expected a 4-byte value, got {} bytes",
            bytes.len()
        ))
    })
}

fn decode_i64(bytes: &[u8]) -> Result<i64> {
    bytes.try_into().map(i64::from_le_bytes).map_err(|_| {
        QuernError::General(format!(
            "sum combiner expected an 8-byte value, got {} bytes",
            bytes.len()
        ))
    })
}

/// Resolves the combiner registered under a value type name.
pub fn resolve_combiner(value_type: &str) -> Result<Arc<dyn Combiner>> {
    match value_type {
        "int32" => Ok(Arc::new(SumCombiner::int32())),
        "int64" => Ok(Arc::new(SumCombiner::int64())),
        other => Err(QuernError::Configuration(format!(
            "no combiner registered for value type '{other}'"
        ))),
    }
}
