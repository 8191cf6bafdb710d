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

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use croaring::Treemap;
use dashmap::DashMap;
use log::{debug, info};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use quern_core::block::{PartitionedData, ShuffleDataResult};
use quern_core::config::QuernConfig;
use quern_core::error::{QuernError, Result};
use quern_core::event_loop::{EventAction, EventLoop, EventSender};
use quern_core::merge::MergeState;

use crate::merge::entity::ShuffleEntity;
use crate::merge::event::MergeEvent;
use crate::metrics::MergeMetrics;
use crate::task_manager::ShuffleTaskManager;

/// Suffix deriving the merged namespace from a real application id. Merged
/// blocks cache, flush and read under this synthetic app id.
pub const MERGE_APP_SUFFIX: &str = "-rss-merge";

/// The merged namespace for an application.
pub fn merged_app_id(app_id: &str) -> String {
    format!("{app_id}{MERGE_APP_SUFFIX}")
}

// Shared by the manager and every entity it creates.
pub(crate) struct MergeContext {
    pub(crate) task_manager: Arc<dyn ShuffleTaskManager>,
    pub(crate) open_file_semaphore: Arc<Semaphore>,
    pub(crate) metrics: Arc<MergeMetrics>,
    pub(crate) init_sleep: Duration,
    pub(crate) max_sleep: Duration,
}

impl MergeContext {
    pub(crate) fn new(
        task_manager: Arc<dyn ShuffleTaskManager>,
        open_file_limit: usize,
        metrics: Arc<MergeMetrics>,
        init_sleep: Duration,
        max_sleep: Duration,
    ) -> Self {
        let open_file_semaphore = Arc::new(Semaphore::new(open_file_limit));
        metrics.open_file_available.set(open_file_limit as i64);
        Self {
            task_manager,
            open_file_semaphore,
            metrics,
            init_sleep,
            max_sleep,
        }
    }
}

/// A slice of the process-wide open file budget.
///
/// Releases on drop, so every exit path of a merge gives its quota back
/// exactly once.
pub(crate) struct FileLease {
    permit: Option<OwnedSemaphorePermit>,
    ctx: Arc<MergeContext>,
}

impl FileLease {
    /// A lease holding no quota, for merges that never touch a file.
    pub(crate) fn empty(ctx: Arc<MergeContext>) -> Self {
        Self { permit: None, ctx }
    }

    /// Acquires `open_files` units in one request. Waits until the whole
    /// batch is available rather than building it up piecemeal.
    pub(crate) async fn acquire(ctx: Arc<MergeContext>, open_files: usize) -> Result<Self> {
        let permit = ctx
            .open_file_semaphore
            .clone()
            .acquire_many_owned(open_files as u32)
            .await
            .map_err(|e| {
                QuernError::ResourceExhausted(format!("Open file budget is closed: {e}"))
            })?;
        ctx.metrics
            .open_file_available
            .set(ctx.open_file_semaphore.available_permits() as i64);
        Ok(Self {
            permit: Some(permit),
            ctx,
        })
    }
}

impl Drop for FileLease {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            drop(permit);
            self.ctx
                .metrics
                .open_file_available
                .set(self.ctx.open_file_semaphore.available_permits() as i64);
        }
    }
}

type ShuffleRegistry = Arc<DashMap<String, DashMap<i32, Arc<ShuffleEntity>>>>;

struct MergeEventHandler {
    shuffles: ShuffleRegistry,
    ctx: Arc<MergeContext>,
}

#[async_trait]
impl EventAction<MergeEvent> for MergeEventHandler {
    fn on_start(&self) {
        info!("Merge event handler started");
    }

    fn on_stop(&self) {
        info!("Merge event handler stopped");
    }

    async fn on_receive(&self, event: MergeEvent) -> Result<()> {
        self.ctx.metrics.merge_events_total.inc();
        debug!("Processing {event}");
        let entity = self
            .shuffles
            .get(&event.app_id)
            .and_then(|shuffles| shuffles.get(&event.shuffle_id).map(|e| e.clone()))
            .ok_or_else(|| {
                QuernError::General(format!(
                    "Shuffle {}/{} vanished before its merge event",
                    event.app_id, event.shuffle_id
                ))
            })?;
        let partition = entity.partition(event.partition_id);
        partition.process_merge(&event.expected_block_ids).await
    }

    fn on_error(&self, _error: QuernError) {
        self.ctx.metrics.merge_failures_total.inc();
    }
}

/// Process-wide owner of the merge engine: the shuffle registry, the worker
/// pool consuming merge events, and the open file budget shared by every
/// partition's disk fallback.
pub struct ShuffleMergeManager {
    ctx: Arc<MergeContext>,
    shuffles: ShuffleRegistry,
    event_loop: EventLoop<MergeEvent>,
    sender: EventSender<MergeEvent>,
    merged_block_size: usize,
}

impl ShuffleMergeManager {
    /// Builds the manager from configuration and starts its worker pool.
    /// Must run inside a tokio runtime.
    pub fn new(
        config: &QuernConfig,
        task_manager: Arc<dyn ShuffleTaskManager>,
    ) -> Result<Self> {
        let metrics = MergeMetrics::current()?;
        let ctx = Arc::new(MergeContext::new(
            task_manager,
            config.merge_open_file_limit(),
            metrics,
            config.merge_cache_backoff_init(),
            config.merge_cache_backoff_max(),
        ));
        let shuffles: ShuffleRegistry = Arc::new(DashMap::new());
        let handler = Arc::new(MergeEventHandler {
            shuffles: shuffles.clone(),
            ctx: ctx.clone(),
        });
        let mut event_loop = EventLoop::new(
            "quern-merge".to_string(),
            config.merge_event_workers(),
            handler,
        );
        event_loop.start()?;
        let sender = event_loop.get_sender()?;
        Ok(Self {
            ctx,
            shuffles,
            event_loop,
            sender,
            merged_block_size: config.merge_block_size(),
        })
    }

    /// Registers a shuffle for merging, resolving its comparator (and
    /// combiner when `enable_combine` is set) from the type names.
    pub fn register_shuffle(
        &self,
        app_id: &str,
        shuffle_id: i32,
        key_type: &str,
        value_type: &str,
        enable_combine: bool,
    ) -> Result<()> {
        let entity = ShuffleEntity::new(
            self.ctx.clone(),
            app_id,
            shuffle_id,
            key_type,
            value_type,
            enable_combine,
            self.merged_block_size,
        )?;
        self.shuffles
            .entry(app_id.to_string())
            .or_insert_with(DashMap::new)
            .insert(shuffle_id, Arc::new(entity));
        info!(
            "Registered shuffle {app_id}/{shuffle_id} for merge with key type \
             {key_type} and value type {value_type}"
        );
        Ok(())
    }

    fn entity(&self, app_id: &str, shuffle_id: i32) -> Result<Arc<ShuffleEntity>> {
        self.shuffles
            .get(app_id)
            .and_then(|shuffles| shuffles.get(&shuffle_id).map(|e| e.clone()))
            .ok_or_else(|| {
                QuernError::General(format!(
                    "Shuffle {app_id}/{shuffle_id} is not registered for merge"
                ))
            })
    }

    /// Routes reported blocks into the partition entity they belong to.
    pub fn cache_block(
        &self,
        app_id: &str,
        shuffle_id: i32,
        data: &PartitionedData,
    ) -> Result<()> {
        let partition = self.entity(app_id, shuffle_id)?.partition(data.partition_id);
        for block in &data.blocks {
            partition.cache_block(block.clone());
        }
        Ok(())
    }

    /// Reports a partition's complete block id set, triggering its merge.
    pub fn report_unique_block_ids(
        &self,
        app_id: &str,
        shuffle_id: i32,
        partition_id: i32,
        expected_block_ids: Treemap,
    ) -> Result<()> {
        self.entity(app_id, shuffle_id)?
            .partition(partition_id)
            .report_unique_block_ids(expected_block_ids, &self.sender)
    }

    /// Polls a merged block: the partition's state plus the block's size
    /// once it has been produced.
    pub fn try_get_block(
        &self,
        app_id: &str,
        shuffle_id: i32,
        partition_id: i32,
        block_id: i64,
    ) -> Result<(MergeState, Option<i64>)> {
        Ok(self
            .entity(app_id, shuffle_id)?
            .partition(partition_id)
            .try_get_block(block_id))
    }

    /// Serves a merged block's payload by ordinal id.
    pub fn get_shuffle_data(
        &self,
        app_id: &str,
        shuffle_id: i32,
        partition_id: i32,
        block_id: i64,
    ) -> Result<ShuffleDataResult> {
        self.entity(app_id, shuffle_id)?
            .partition(partition_id)
            .get_shuffle_data(block_id)
    }

    /// Number of merged blocks a partition has produced so far.
    pub fn get_block_count(
        &self,
        app_id: &str,
        shuffle_id: i32,
        partition_id: i32,
    ) -> Result<i32> {
        Ok(self
            .entity(app_id, shuffle_id)?
            .partition(partition_id)
            .block_count())
    }

    /// Forgets everything merged for an application.
    pub fn remove_buffer(&self, app_id: &str) {
        if let Some((_, shuffles)) = self.shuffles.remove(app_id) {
            for entry in shuffles.iter() {
                entry.value().cleanup();
            }
            info!("Removed merge state for app {app_id}");
        }
    }

    /// Units of the open file budget currently available.
    pub fn open_file_permits(&self) -> usize {
        self.ctx.open_file_semaphore.available_permits()
    }

    /// Stops the merge worker pool.
    pub fn stop(&self) {
        self.event_loop.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ShuffleBufferManager;
    use crate::storage::LocalStorage;
    use crate::task_manager::DefaultShuffleTaskManager;
    use prometheus::Registry;
    use tempfile::TempDir;

    fn test_manager(dir: &TempDir) -> ShuffleMergeManager {
        let storage = Arc::new(LocalStorage::new(dir.path()));
        let metrics = Arc::new(MergeMetrics::new(&Registry::new()).unwrap());
        let buffer_manager = Arc::new(ShuffleBufferManager::new(
            1 << 20,
            storage.clone(),
            metrics,
        ));
        let task_manager = Arc::new(DefaultShuffleTaskManager::new(buffer_manager, storage));
        ShuffleMergeManager::new(&QuernConfig::default(), task_manager).unwrap()
    }

    #[test]
    fn merged_app_id_appends_the_suffix() {
        assert_eq!(merged_app_id("app-1"), "app-1-rss-merge");
    }

    #[tokio::test]
    async fn unregistered_shuffle_is_rejected() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);
        assert!(manager
            .report_unique_block_ids("nope", 0, 0, Treemap::new())
            .is_err());
        manager.stop();
    }

    #[tokio::test]
    async fn empty_report_completes_immediately() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);
        manager.register_shuffle("app", 1, "bytes", "bytes", false)?;
        manager.report_unique_block_ids("app", 1, 0, Treemap::new())?;

        let (state, size) = manager.try_get_block("app", 1, 0, 1)?;
        assert_eq!(state, MergeState::Done);
        assert_eq!(size, None);
        assert_eq!(manager.get_block_count("app", 1, 0)?, 0);
        manager.stop();
        Ok(())
    }

    #[tokio::test]
    async fn fresh_partition_reports_inited() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);
        manager.register_shuffle("app", 0, "int64", "int64", false)?;
        let (state, size) = manager.try_get_block("app", 0, 3, 1)?;
        assert_eq!(state, MergeState::Inited);
        assert_eq!(size, None);
        manager.stop();
        Ok(())
    }

    #[tokio::test]
    async fn unknown_key_type_is_rejected() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);
        assert!(manager
            .register_shuffle("app", 0, "uuid", "bytes", false)
            .is_err());
        manager.stop();
    }
}
