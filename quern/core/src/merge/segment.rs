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

//! Merge input segments.
//!
//! A [Segment] yields one block's records in their stored (sorted) order.
//! It is backed either by a retained in-memory buffer or by a byte range of
//! an on-disk data file; construction from memory can refuse when the
//! buffer lost the race against the flush cleanup, and the caller then
//! resolves the same block from disk instead.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Take};
use std::path::Path;

use bytes::Bytes;

use crate::block::ShuffleBlock;
use crate::buffer::BlockLease;
use crate::error::{QuernError, Result};
use crate::records::{Record, RecordsReader};

/// One block's worth of sorted records feeding the merger.
pub struct Segment {
    block_id: i64,
    // keeps the retained buffer alive for memory-backed segments
    _lease: Option<BlockLease>,
    reader: RecordsReader<SegmentSource>,
}

enum SegmentSource {
    Memory(std::io::Cursor<Bytes>),
    File(Take<BufReader<File>>),
}

impl Read for SegmentSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            SegmentSource::Memory(cursor) => cursor.read(buf),
            SegmentSource::File(reader) => reader.read(buf),
        }
    }
}

impl Segment {
    /// Builds a memory-backed segment by retaining the block's buffer.
    ///
    /// Returns `None` when the buffer has already been released; the block
    /// must then be resolved from its flushed file.
    pub fn from_block(block: &ShuffleBlock) -> Option<Self> {
        let lease = block.data().try_retain()?;
        let data = lease.bytes().clone();
        Some(Self {
            block_id: block.block_id,
            _lease: Some(lease),
            reader: RecordsReader::new(SegmentSource::Memory(std::io::Cursor::new(data))),
        })
    }

    /// Builds a file-backed segment over `[offset, end)` of a data file.
    ///
    /// The file stays open for the life of the segment, so every file-backed
    /// segment accounts for one unit of the open-file budget.
    pub fn from_file(path: &Path, offset: u64, end: u64, block_id: i64) -> Result<Self> {
        if end < offset {
            return Err(QuernError::Internal(format!(
                "segment range [{offset}, {end}) of {} is inverted",
                path.display()
            )));
        }
        let mut file = File::open(path).map_err(QuernError::IoError)?;
        file.seek(SeekFrom::Start(offset)).map_err(QuernError::IoError)?;
        let reader = BufReader::new(file).take(end - offset);
        Ok(Self {
            block_id,
            _lease: None,
            reader: RecordsReader::new(SegmentSource::File(reader)),
        })
    }

    /// Id of the block this segment reads.
    pub fn block_id(&self) -> i64 {
        self.block_id
    }

    /// Next record in stored order, or `None` once exhausted.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        self.reader.next_record()
    }
}
