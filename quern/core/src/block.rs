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

//! Shuffle block types shared between the write, flush, merge and read
//! paths.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use bytes::Bytes;

use crate::buffer::{BlockBuf, BlockLease};
use crate::error::{QuernError, Result};

/// One shuffle block: immutable metadata plus a reference-counted payload.
#[derive(Debug, Clone)]
pub struct ShuffleBlock {
    /// Unique identifier, see [crate::block_id].
    pub block_id: i64,
    /// Payload length in bytes.
    pub length: i32,
    /// Uncompressed payload length. Equal to `length` for raw blocks; the
    /// merge path refuses blocks where they differ.
    pub uncompress_length: i32,
    /// CRC32 of the payload, or -1 when not tracked.
    pub crc: i64,
    /// Task attempt that produced the block.
    pub task_attempt_id: i64,
    data: BlockBuf,
}

impl ShuffleBlock {
    /// Creates a block with explicit metadata.
    pub fn new(
        block_id: i64,
        length: i32,
        uncompress_length: i32,
        crc: i64,
        task_attempt_id: i64,
        data: Bytes,
    ) -> Self {
        Self {
            block_id,
            length,
            uncompress_length,
            crc,
            task_attempt_id,
            data: BlockBuf::new(data),
        }
    }

    /// Creates a raw block, deriving length and checksum from the payload.
    pub fn from_bytes(block_id: i64, task_attempt_id: i64, data: Bytes) -> Self {
        let length = data.len() as i32;
        let crc = crc32fast::hash(&data) as i64;
        Self::new(block_id, length, length, crc, task_attempt_id, data)
    }

    /// The shared payload buffer.
    pub fn data(&self) -> &BlockBuf {
        &self.data
    }
}

/// Write-path unit: the blocks produced for one partition.
#[derive(Debug, Clone)]
pub struct PartitionedData {
    /// Destination partition.
    pub partition_id: i32,
    /// Blocks addressed to the partition.
    pub blocks: Vec<ShuffleBlock>,
}

impl PartitionedData {
    /// Bundles blocks for a partition.
    pub fn new(partition_id: i32, blocks: Vec<ShuffleBlock>) -> Self {
        Self {
            partition_id,
            blocks,
        }
    }

    /// Total payload bytes carried.
    pub fn total_length(&self) -> i64 {
        self.blocks.iter().map(|b| b.length as i64).sum()
    }
}

/// A block payload served to a reader, either retained in memory or
/// described as a byte range of an on-disk file that is read lazily.
#[derive(Debug)]
pub enum ManagedBuffer {
    /// A retained in-memory payload.
    Memory(BlockLease),
    /// A byte range of a data file.
    FileSegment {
        /// Data file holding the block.
        path: PathBuf,
        /// Byte offset of the block within the file.
        offset: u64,
        /// Block length in bytes.
        length: usize,
    },
}

impl ManagedBuffer {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            ManagedBuffer::Memory(lease) => lease.bytes().len(),
            ManagedBuffer::FileSegment { length, .. } => *length,
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materializes the payload.
    pub fn read_bytes(&self) -> Result<Bytes> {
        match self {
            ManagedBuffer::Memory(lease) => Ok(lease.bytes().clone()),
            ManagedBuffer::FileSegment {
                path,
                offset,
                length,
            } => {
                let mut file = File::open(path).map_err(QuernError::IoError)?;
                file.seek(SeekFrom::Start(*offset))
                    .map_err(QuernError::IoError)?;
                let mut buf = vec![0u8; *length];
                file.read_exact(&mut buf).map_err(QuernError::IoError)?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

/// Result of a block read request.
#[derive(Debug)]
pub struct ShuffleDataResult {
    buffer: ManagedBuffer,
}

impl ShuffleDataResult {
    /// Wraps a served payload.
    pub fn new(buffer: ManagedBuffer) -> Self {
        Self { buffer }
    }

    /// The served payload.
    pub fn buffer(&self) -> &ManagedBuffer {
        &self.buffer
    }

    /// Materializes the served payload.
    pub fn data(&self) -> Result<Bytes> {
        self.buffer.read_bytes()
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Result of reading a partition's index file: the path of the data file it
/// describes plus the raw index bytes.
#[derive(Debug, Clone)]
pub struct ShuffleIndexResult {
    /// Data file the index entries point into.
    pub data_file_name: PathBuf,
    /// Raw index records.
    pub index_data: Bytes,
}

impl ShuffleIndexResult {
    /// Whether the index holds no records.
    pub fn is_empty(&self) -> bool {
        self.index_data.is_empty()
    }
}
