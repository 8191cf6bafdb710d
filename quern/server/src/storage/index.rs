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

//! Shuffle index records for flushed partition files.
//!
//! The index file stores one fixed width record per block in the data file.
//! Format:
//!
//! ```text
//! [i64: offset][i32: length][i32: uncompress_length][i64: crc][i64: block_id][i64: task_attempt_id]
//! ```
//!
//! - All values are little-endian
//! - `offset` = byte offset where the block starts in the data file
//! - The block payload spans `[offset, offset + length)`

use std::io::Write;

use quern_core::block::ShuffleBlock;
use quern_core::error::{QuernError, Result};

/// Size in bytes of one serialized [IndexRecord].
pub const INDEX_RECORD_SIZE: usize = 40;

/// Locates one block inside a partition data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    /// Byte offset of the block payload in the data file.
    pub offset: i64,
    /// Stored payload length in bytes.
    pub length: i32,
    /// Payload length after decompression.
    pub uncompress_length: i32,
    /// Checksum of the payload.
    pub crc: i64,
    /// The block identifier.
    pub block_id: i64,
    /// The task attempt that produced the block.
    pub task_attempt_id: i64,
}

impl IndexRecord {
    /// Builds the record for a block landing at `offset` in the data file.
    pub fn for_block(block: &ShuffleBlock, offset: i64) -> Self {
        Self {
            offset,
            length: block.length,
            uncompress_length: block.uncompress_length,
            crc: block.crc,
            block_id: block.block_id,
            task_attempt_id: block.task_attempt_id,
        }
    }

    /// Serializes the record to a writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.offset.to_le_bytes())?;
        writer.write_all(&self.length.to_le_bytes())?;
        writer.write_all(&self.uncompress_length.to_le_bytes())?;
        writer.write_all(&self.crc.to_le_bytes())?;
        writer.write_all(&self.block_id.to_le_bytes())?;
        writer.write_all(&self.task_attempt_id.to_le_bytes())?;
        Ok(())
    }

    /// Deserializes one record from a 40 byte slice.
    pub fn read_from(buf: &[u8; INDEX_RECORD_SIZE]) -> Self {
        let i64_at = |at: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf[at..at + 8]);
            i64::from_le_bytes(bytes)
        };
        let i32_at = |at: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&buf[at..at + 4]);
            i32::from_le_bytes(bytes)
        };
        Self {
            offset: i64_at(0),
            length: i32_at(8),
            uncompress_length: i32_at(12),
            crc: i64_at(16),
            block_id: i64_at(24),
            task_attempt_id: i64_at(32),
        }
    }

    /// Parses a whole index file into records.
    pub fn parse_all(data: &[u8]) -> Result<Vec<IndexRecord>> {
        if !data.len().is_multiple_of(INDEX_RECORD_SIZE) {
            return Err(QuernError::General(format!(
                "Invalid index data size: {} (must be multiple of {INDEX_RECORD_SIZE})",
                data.len()
            )));
        }
        let mut records = Vec::with_capacity(data.len() / INDEX_RECORD_SIZE);
        let mut buf = [0u8; INDEX_RECORD_SIZE];
        for chunk in data.chunks_exact(INDEX_RECORD_SIZE) {
            buf.copy_from_slice(chunk);
            records.push(IndexRecord::read_from(&buf));
        }
        Ok(records)
    }
}
