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

use parking_lot::Mutex;

/// Bookkeeping for the merged block sequence of one partition.
///
/// Merged blocks carry ordinal ids starting at 1, assigned in production
/// order. A block's size is recorded only once the block is safely cached,
/// so readers polling [`block_size`](Self::block_size) during an ongoing
/// merge only ever see blocks they can actually fetch.
pub struct MergedResult {
    merged_block_size: usize,
    block_sizes: Mutex<Vec<i64>>,
}

impl MergedResult {
    /// Creates bookkeeping for blocks cut at `merged_block_size` bytes.
    pub fn new(merged_block_size: usize) -> Self {
        Self {
            merged_block_size,
            block_sizes: Mutex::new(Vec::new()),
        }
    }

    /// Target size a merged block is cut at.
    pub fn merged_block_size(&self) -> usize {
        self.merged_block_size
    }

    /// Number of merged blocks produced so far.
    pub fn block_count(&self) -> i32 {
        self.block_sizes.lock().len() as i32
    }

    /// Whether an ordinal id falls outside the produced sequence.
    pub fn is_out_of_bound(&self, block_id: i64) -> bool {
        block_id <= 0 || block_id > self.block_sizes.lock().len() as i64
    }

    /// Size of a produced block, or `None` for ids outside the sequence.
    pub fn block_size(&self, block_id: i64) -> Option<i64> {
        if block_id <= 0 {
            return None;
        }
        self.block_sizes
            .lock()
            .get((block_id - 1) as usize)
            .copied()
    }

    /// Records the next produced block's size.
    pub fn record_block(&self, size: i64) {
        self.block_sizes.lock().push(size);
    }

    /// Total bytes across all produced blocks.
    pub fn total_bytes(&self) -> i64 {
        self.block_sizes.lock().iter().sum()
    }
}
