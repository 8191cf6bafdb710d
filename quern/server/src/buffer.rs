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

//! In-memory shuffle buffers with capacity accounting and disk flushing.
//!
//! The buffer manager is the shared block cache every write lands in first.
//! Capacity is a hard byte budget enforced with a compare-and-swap loop, so
//! a full cache answers `NoBuffer` instead of growing. Flushing moves a
//! partition's blocks to local storage and releases their payload buffers,
//! which is why every later reader must re-validate liveness before use.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use croaring::Treemap;
use dashmap::DashMap;
use log::{debug, warn};

use quern_core::block::{PartitionedData, ShuffleBlock};
use quern_core::error::Result;

use crate::metrics::MergeMetrics;
use crate::storage::LocalStorage;
use crate::task_manager::CacheStatus;
use crate::PartitionedUid;

struct PartitionBuffer {
    blocks: Vec<ShuffleBlock>,
    size: i64,
}

/// Shared in-memory cache of shuffle blocks, bounded by a byte capacity.
pub struct ShuffleBufferManager {
    capacity: i64,
    used: AtomicI64,
    buffers: DashMap<PartitionedUid, PartitionBuffer>,
    cached_block_ids: DashMap<PartitionedUid, Treemap>,
    storage: Arc<LocalStorage>,
    metrics: Arc<MergeMetrics>,
}

impl ShuffleBufferManager {
    /// Creates a buffer manager bounded by `capacity` bytes, flushing to
    /// `storage`.
    pub fn new(capacity: i64, storage: Arc<LocalStorage>, metrics: Arc<MergeMetrics>) -> Self {
        Self {
            capacity,
            used: AtomicI64::new(0),
            buffers: DashMap::new(),
            cached_block_ids: DashMap::new(),
            storage,
            metrics,
        }
    }

    /// Caches one partition's blocks for an application shuffle.
    ///
    /// Pre-allocated writes already hold a reservation and bypass the
    /// capacity check; everything else is refused with `NoBuffer` once the
    /// budget would be exceeded.
    pub fn cache_shuffle_data(
        &self,
        app_id: &str,
        shuffle_id: i32,
        is_pre_allocated: bool,
        data: &PartitionedData,
    ) -> CacheStatus {
        let size = data.total_length();
        if is_pre_allocated {
            self.used.fetch_add(size, Ordering::SeqCst);
        } else {
            let mut current = self.used.load(Ordering::SeqCst);
            loop {
                if current + size > self.capacity {
                    debug!(
                        "No buffer space for {app_id}/{shuffle_id}/{}: \
                         {size} bytes requested, {current} of {} in use",
                        data.partition_id, self.capacity
                    );
                    return CacheStatus::NoBuffer;
                }
                match self.used.compare_exchange(
                    current,
                    current + size,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => break,
                    Err(actual) => current = actual,
                }
            }
        }

        let uid = PartitionedUid::new(app_id, shuffle_id, data.partition_id);
        let mut entry = self.buffers.entry(uid).or_insert_with(|| PartitionBuffer {
            blocks: Vec::new(),
            size: 0,
        });
        entry.blocks.extend(data.blocks.iter().cloned());
        entry.size += size;
        drop(entry);

        self.metrics
            .buffer_used_bytes
            .set(self.used.load(Ordering::SeqCst));
        CacheStatus::Success
    }

    /// Flushes one partition's buffered blocks to local storage and releases
    /// their payloads.
    ///
    /// A no-op when the partition holds nothing. Blocks whose payload is
    /// already dead are skipped with a warning; their bytes were lost to an
    /// earlier release and cannot be recovered here.
    pub fn flush_partition(&self, uid: &PartitionedUid) -> Result<()> {
        let Some((_, buffer)) = self.buffers.remove(uid) else {
            return Ok(());
        };

        let mut writer = self.storage.create_writer(uid)?;
        let mut flushed = 0usize;
        for block in &buffer.blocks {
            match block.data().try_retain() {
                Some(lease) => {
                    writer.append_block(block, lease.as_slice())?;
                    flushed += 1;
                }
                None => {
                    warn!(
                        "Skipping flush of dead block {} in partition {uid}",
                        block.block_id
                    );
                }
            }
        }
        writer.flush()?;

        for block in &buffer.blocks {
            block.data().release();
        }
        self.used.fetch_sub(buffer.size, Ordering::SeqCst);
        self.metrics
            .buffer_used_bytes
            .set(self.used.load(Ordering::SeqCst));
        debug!(
            "Flushed {flushed} of {} blocks for partition {uid}",
            buffer.blocks.len()
        );
        Ok(())
    }

    /// Records block ids as durably cached for the partition.
    pub fn update_cached_block_ids(
        &self,
        app_id: &str,
        shuffle_id: i32,
        partition_id: i32,
        blocks: &[ShuffleBlock],
    ) {
        let uid = PartitionedUid::new(app_id, shuffle_id, partition_id);
        let mut entry = self
            .cached_block_ids
            .entry(uid)
            .or_insert_with(Treemap::new);
        for block in blocks {
            entry.add(block.block_id as u64);
        }
    }

    /// The recorded block id set for a partition, if any.
    pub fn cached_block_ids(&self, uid: &PartitionedUid) -> Option<Treemap> {
        self.cached_block_ids.get(uid).map(|e| e.value().clone())
    }

    /// The blocks currently buffered for a partition.
    pub fn buffered_blocks(&self, uid: &PartitionedUid) -> Vec<ShuffleBlock> {
        self.buffers
            .get(uid)
            .map(|e| e.blocks.clone())
            .unwrap_or_default()
    }

    /// Bytes currently held across all partitions.
    pub fn used_bytes(&self) -> i64 {
        self.used.load(Ordering::SeqCst)
    }

    /// Drops every buffer and id set belonging to an application, releasing
    /// the payloads.
    pub fn remove_app(&self, app_id: &str) {
        let partitions: Vec<PartitionedUid> = self
            .buffers
            .iter()
            .filter(|e| e.key().app_id == app_id)
            .map(|e| e.key().clone())
            .collect();
        for uid in partitions {
            if let Some((_, buffer)) = self.buffers.remove(&uid) {
                for block in &buffer.blocks {
                    block.data().release();
                }
                self.used.fetch_sub(buffer.size, Ordering::SeqCst);
            }
        }
        self.cached_block_ids.retain(|uid, _| uid.app_id != app_id);
        self.metrics
            .buffer_used_bytes
            .set(self.used.load(Ordering::SeqCst));
    }
}
