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

//! Shuffle data intake shared by the report and merge paths.
//!
//! [ShuffleTaskManager] is the seam the merge engine publishes through: the
//! same intake the write path uses, so merged output lands in the ordinary
//! block cache and flushes to disk by the ordinary rules.

use std::sync::Arc;

use quern_core::block::{PartitionedData, ShuffleBlock};

use crate::buffer::ShuffleBufferManager;
use crate::storage::LocalStorage;
use crate::PartitionedUid;

/// Outcome of a cache attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// The blocks were cached.
    Success,
    /// The cache is full right now. Retryable.
    NoBuffer,
    /// The intake failed for a non-retryable reason.
    InternalError,
}

/// Intake operations the merge engine needs from its host.
pub trait ShuffleTaskManager: Send + Sync {
    /// Caches one partition's blocks.
    fn cache_shuffle_data(
        &self,
        app_id: &str,
        shuffle_id: i32,
        is_pre_allocated: bool,
        data: &PartitionedData,
    ) -> CacheStatus;

    /// Records block ids as cached for later validation and bookkeeping.
    fn update_cached_block_ids(
        &self,
        app_id: &str,
        shuffle_id: i32,
        partition_id: i32,
        blocks: &[ShuffleBlock],
    );

    /// Returns the storage holding flushed data for the partition, if any
    /// exists on disk.
    fn select_storage(
        &self,
        app_id: &str,
        shuffle_id: i32,
        partition_id: i32,
    ) -> Option<Arc<LocalStorage>>;
}

/// Production task manager backed by the in-memory buffer cache and local
/// disk storage.
pub struct DefaultShuffleTaskManager {
    buffer_manager: Arc<ShuffleBufferManager>,
    storage: Arc<LocalStorage>,
}

impl DefaultShuffleTaskManager {
    /// Wires the intake to a buffer cache and its backing storage.
    pub fn new(buffer_manager: Arc<ShuffleBufferManager>, storage: Arc<LocalStorage>) -> Self {
        Self {
            buffer_manager,
            storage,
        }
    }

    /// The underlying buffer cache.
    pub fn buffer_manager(&self) -> &Arc<ShuffleBufferManager> {
        &self.buffer_manager
    }
}

impl ShuffleTaskManager for DefaultShuffleTaskManager {
    fn cache_shuffle_data(
        &self,
        app_id: &str,
        shuffle_id: i32,
        is_pre_allocated: bool,
        data: &PartitionedData,
    ) -> CacheStatus {
        self.buffer_manager
            .cache_shuffle_data(app_id, shuffle_id, is_pre_allocated, data)
    }

    fn update_cached_block_ids(
        &self,
        app_id: &str,
        shuffle_id: i32,
        partition_id: i32,
        blocks: &[ShuffleBlock],
    ) {
        self.buffer_manager
            .update_cached_block_ids(app_id, shuffle_id, partition_id, blocks)
    }

    fn select_storage(
        &self,
        app_id: &str,
        shuffle_id: i32,
        partition_id: i32,
    ) -> Option<Arc<LocalStorage>> {
        let uid = PartitionedUid::new(app_id, shuffle_id, partition_id);
        self.storage
            .has_partition(&uid)
            .then(|| self.storage.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MergeMetrics;
    use bytes::Bytes;
    use prometheus::Registry;
    use tempfile::TempDir;

    fn task_manager(dir: &TempDir) -> DefaultShuffleTaskManager {
        let storage = Arc::new(LocalStorage::new(dir.path()));
        let metrics = Arc::new(MergeMetrics::new(&Registry::new()).unwrap());
        let buffer_manager = Arc::new(ShuffleBufferManager::new(
            1024,
            storage.clone(),
            metrics,
        ));
        DefaultShuffleTaskManager::new(buffer_manager, storage)
    }

    #[test]
    fn select_storage_requires_flushed_data() {
        let dir = TempDir::new().unwrap();
        let manager = task_manager(&dir);
        assert!(manager.select_storage("app", 0, 0).is_none());

        let data = PartitionedData::new(
            0,
            vec![ShuffleBlock::from_bytes(1, 0, Bytes::from_static(b"abc"))],
        );
        assert_eq!(
            manager.cache_shuffle_data("app", 0, false, &data),
            CacheStatus::Success
        );
        manager
            .buffer_manager()
            .flush_partition(&PartitionedUid::new("app", 0, 0))
            .unwrap();
        assert!(manager.select_storage("app", 0, 0).is_some());
    }
}
