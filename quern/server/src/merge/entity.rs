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

//! Per shuffle and per partition merge state machines.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use croaring::Treemap;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use quern_core::block::{
    ManagedBuffer, PartitionedData, ShuffleBlock, ShuffleDataResult, ShuffleIndexResult,
};
use quern_core::error::{QuernError, Result};
use quern_core::event_loop::EventSender;
use quern_core::merge::combiner::{resolve_combiner, Combiner};
use quern_core::merge::comparator::{resolve_comparator, KeyComparator};
use quern_core::merge::merger::{self, RecordSink};
use quern_core::merge::segment::Segment;
use quern_core::merge::MergeState;
use quern_core::records::{encode_record, Record};

use crate::backoff::BackoffPolicy;
use crate::merge::event::MergeEvent;
use crate::merge::manager::{merged_app_id, FileLease, MergeContext};
use crate::merge::result::MergedResult;
use crate::storage::IndexRecord;
use crate::task_manager::CacheStatus;
use crate::PartitionedUid;

/// Per (app, shuffle) merge context: the resolved comparator and combiner
/// plus the partition entity registry.
pub struct ShuffleEntity {
    ctx: Arc<MergeContext>,
    app_id: String,
    shuffle_id: i32,
    key_type: String,
    value_type: String,
    comparator: Arc<dyn KeyComparator>,
    combiner: Option<Arc<dyn Combiner>>,
    merged_block_size: usize,
    partitions: DashMap<i32, Arc<PartitionEntity>>,
}

impl ShuffleEntity {
    /// Creates the shuffle entity, resolving the comparator for `key_type`
    /// and, when combining is requested, the combiner for `value_type`.
    pub fn new(
        ctx: Arc<MergeContext>,
        app_id: &str,
        shuffle_id: i32,
        key_type: &str,
        value_type: &str,
        enable_combine: bool,
        merged_block_size: usize,
    ) -> Result<Self> {
        let comparator = resolve_comparator(key_type)?;
        let combiner = if enable_combine {
            Some(resolve_combiner(value_type)?)
        } else {
            None
        };
        Ok(Self {
            ctx,
            app_id: app_id.to_string(),
            shuffle_id,
            key_type: key_type.to_string(),
            value_type: value_type.to_string(),
            comparator,
            combiner,
            merged_block_size,
            partitions: DashMap::new(),
        })
    }

    /// The partition entity, created on first touch.
    pub fn partition(&self, partition_id: i32) -> Arc<PartitionEntity> {
        self.partitions
            .entry(partition_id)
            .or_insert_with(|| {
                Arc::new(PartitionEntity::new(
                    self.ctx.clone(),
                    &self.app_id,
                    self.shuffle_id,
                    partition_id,
                    &self.key_type,
                    &self.value_type,
                    self.comparator.clone(),
                    self.combiner.clone(),
                    self.merged_block_size,
                ))
            })
            .clone()
    }

    /// The partition entity, if one has been touched.
    pub fn get_partition(&self, partition_id: i32) -> Option<Arc<PartitionEntity>> {
        self.partitions.get(&partition_id).map(|e| e.clone())
    }

    /// Drops all cached block references across the shuffle's partitions.
    pub fn cleanup(&self) {
        for entry in self.partitions.iter() {
            entry.value().cleanup();
        }
        self.partitions.clear();
    }
}

// Meta for a partition's merged data file. The index file keeps growing as
// merged blocks flush, so the map is rebuilt wholesale when a lookup misses.
#[derive(Default)]
struct ShuffleMeta {
    data_file_name: PathBuf,
    segments: HashMap<i64, MetaSegment>,
}

#[derive(Clone, Copy)]
struct MetaSegment {
    offset: i64,
    length: i32,
}

/// The per partition merge state machine.
///
/// Blocks land here via [`cache_block`](Self::cache_block) as the write path
/// caches them. One report of the partition's complete block id set moves the
/// state out of `Inited`: straight to `Done` when the set is empty, otherwise
/// to `Merging` with a merge event posted for the worker pool. Merged output
/// is republished through the shared task manager under the merged app
/// namespace and served back out of memory or, once flushed, out of the
/// merged data file.
pub struct PartitionEntity {
    ctx: Arc<MergeContext>,
    app_id: String,
    shuffle_id: i32,
    partition_id: i32,
    key_type: String,
    value_type: String,
    comparator: Arc<dyn KeyComparator>,
    combiner: Option<Arc<dyn Combiner>>,
    // Blocks are cached here besides the shared buffers so merge can walk
    // them without racing buffer inserts. Liveness is still re-checked via
    // try_retain at every use.
    cached_block_map: DashMap<i64, ShuffleBlock>,
    merged_block_map: DashMap<i64, ShuffleBlock>,
    state: Mutex<MergeState>,
    result: MergedResult,
    shuffle_meta: Mutex<ShuffleMeta>,
    backoff: Mutex<BackoffPolicy>,
}

impl PartitionEntity {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        ctx: Arc<MergeContext>,
        app_id: &str,
        shuffle_id: i32,
        partition_id: i32,
        key_type: &str,
        value_type: &str,
        comparator: Arc<dyn KeyComparator>,
        combiner: Option<Arc<dyn Combiner>>,
        merged_block_size: usize,
    ) -> Self {
        let backoff = BackoffPolicy::new(ctx.init_sleep, ctx.max_sleep);
        Self {
            ctx,
            app_id: app_id.to_string(),
            shuffle_id,
            partition_id,
            key_type: key_type.to_string(),
            value_type: value_type.to_string(),
            comparator,
            combiner,
            cached_block_map: DashMap::new(),
            merged_block_map: DashMap::new(),
            state: Mutex::new(MergeState::Inited),
            result: MergedResult::new(merged_block_size),
            shuffle_meta: Mutex::new(ShuffleMeta::default()),
            backoff: Mutex::new(backoff),
        }
    }

    /// Reports the partition's complete block id set, triggering the merge.
    ///
    /// Exactly one report moves the partition out of `Inited`; later reports
    /// are logged and ignored. An empty set means the partition has nothing
    /// to merge and completes immediately.
    pub fn report_unique_block_ids(
        &self,
        expected_block_ids: Treemap,
        sender: &EventSender<MergeEvent>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if *state != MergeState::Inited {
            drop(state);
            warn!(
                "Partition is already merging, so ignore duplicate reports, \
                 partition entity is {self}"
            );
            return Ok(());
        }
        if expected_block_ids.is_empty() {
            *state = MergeState::Done;
            drop(state);
            debug!("Partition is {self}, transient from Inited to Done.");
            return Ok(());
        }
        *state = MergeState::Merging;
        drop(state);
        debug!("Partition is {self}, transient from Inited to Merging.");

        sender.post_event(MergeEvent {
            app_id: self.app_id.clone(),
            shuffle_id: self.shuffle_id,
            partition_id: self.partition_id,
            key_type: self.key_type.clone(),
            value_type: self.value_type.clone(),
            expected_block_ids,
        })
    }

    /// Runs the whole merge for a reported block id set.
    pub(crate) async fn process_merge(&self, expected_block_ids: &Treemap) -> Result<()> {
        let block_ids: Vec<i64> = expected_block_ids.iter().map(|id| id as i64).collect();
        let (segments, lease) = match self.get_segments(&block_ids).await {
            Ok(resolved) => resolved,
            Err(e) => {
                error!("Partition {self} failed to resolve segments, caused by {e}");
                self.set_state(MergeState::InternalError);
                return Err(e);
            }
        };
        self.merge(segments, lease).await
    }

    /// Resolves every reported block id to a readable segment.
    ///
    /// Each id is tried against the in-memory cache first; ids whose buffer
    /// is gone fall through to the partition's flushed file. The file pass
    /// acquires its whole open file quota in one request so two partitions
    /// can never deadlock on partially acquired budgets.
    pub(crate) async fn get_segments(
        &self,
        block_ids: &[i64],
    ) -> Result<(Vec<Segment>, FileLease)> {
        let mut segments = Vec::with_capacity(block_ids.len());
        let mut blocks_flushed: HashSet<i64> = HashSet::new();
        for &block_id in block_ids {
            let from_memory = self
                .cached_block_map
                .get(&block_id)
                .and_then(|block| Segment::from_block(block.value()));
            match from_memory {
                Some(segment) => segments.push(segment),
                None => {
                    // Released by flush cleanup before we could retain, or
                    // never cached here. The file holds it either way.
                    blocks_flushed.insert(block_id);
                }
            }
        }
        if blocks_flushed.is_empty() {
            return Ok((segments, FileLease::empty(self.ctx.clone())));
        }

        let lease = FileLease::acquire(self.ctx.clone(), blocks_flushed.len()).await?;
        let index = self.load_shuffle_index(&self.app_id)?;
        for record in IndexRecord::parse_all(&index.index_data)? {
            if record.length != record.uncompress_length {
                return Err(QuernError::CompressionUnsupported(format!(
                    "Compression is not supported for now, partition is {self}"
                )));
            }
            if blocks_flushed.remove(&record.block_id) {
                segments.push(Segment::from_file(
                    &index.data_file_name,
                    record.offset as u64,
                    (record.offset + record.length as i64) as u64,
                    record.block_id,
                )?);
            }
        }
        if !blocks_flushed.is_empty() {
            return Err(QuernError::BlockNotFound(format!(
                "Can not find any buffer or file for blocks, partition is {self}"
            )));
        }
        Ok((segments, lease))
    }

    /// Merges the resolved segments, publishing output as it is produced.
    ///
    /// The open file lease is released on both outcomes before the state
    /// turns terminal.
    pub(crate) async fn merge(&self, segments: Vec<Segment>, lease: FileLease) -> Result<()> {
        let outcome = self.run_merge(segments).await;
        drop(lease);
        match outcome {
            Ok(records) => {
                self.set_state(MergeState::Done);
                debug!(
                    "Partition {self} merged {records} records into {} blocks",
                    self.result.block_count()
                );
                Ok(())
            }
            Err(e) => {
                error!("Partition {self} remote merge failed, caused by {e}");
                self.set_state(MergeState::InternalError);
                Err(e)
            }
        }
    }

    async fn run_merge(&self, segments: Vec<Segment>) -> Result<u64> {
        let mut writer = MergedBlockWriter::new(self);
        let records = merger::merge(
            segments,
            self.comparator.clone(),
            self.combiner.clone(),
            &mut writer,
        )
        .await?;
        Ok(records)
    }

    fn set_state(&self, next: MergeState) {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            *state = next;
            previous
        };
        debug!("Partition is {self}, transient from {previous:?} to {next:?}.");
    }

    /// The current merge state.
    pub fn state(&self) -> MergeState {
        *self.state.lock()
    }

    /// The current state plus, when available, the size of the merged block
    /// with the given ordinal id. A missing size is not an error; the block
    /// may simply not be produced yet.
    pub fn try_get_block(&self, block_id: i64) -> (MergeState, Option<i64>) {
        let state = self.state();
        if (state == MergeState::Merging || state == MergeState::Done)
            && !self.result.is_out_of_bound(block_id)
        {
            (state, self.result.block_size(block_id))
        } else {
            (state, None)
        }
    }

    /// Number of merged blocks produced so far.
    pub fn block_count(&self) -> i32 {
        self.result.block_count()
    }

    /// Caches a reported block for the upcoming merge.
    pub fn cache_block(&self, block: ShuffleBlock) {
        self.cached_block_map.insert(block.block_id, block);
    }

    // Publishes one merged block through the shared intake under the merged
    // app namespace, waiting out backpressure with a doubling backoff.
    async fn cache_merged_block(&self, block_id: i64, payload: Bytes) -> Result<()> {
        let app_id = merged_app_id(&self.app_id);
        let length = payload.len() as i32;
        let block = ShuffleBlock::new(block_id, length, length, -1, -1, payload);
        let data = PartitionedData::new(self.partition_id, vec![block.clone()]);
        loop {
            let status = self.ctx.task_manager.cache_shuffle_data(
                &app_id,
                self.shuffle_id,
                false,
                &data,
            );
            match status {
                CacheStatus::Success => {
                    self.merged_block_map.insert(block_id, block);
                    self.ctx.task_manager.update_cached_block_ids(
                        &app_id,
                        self.shuffle_id,
                        data.partition_id,
                        &data.blocks,
                    );
                    self.backoff.lock().reset();
                    self.result.record_block(length as i64);
                    self.ctx.metrics.merged_blocks_total.inc();
                    return Ok(());
                }
                CacheStatus::NoBuffer => {
                    let delay = self.backoff.lock().next_delay();
                    info!(
                        "Can not allocate enough memory for {self}, then will sleep {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                other => {
                    return Err(QuernError::General(format!(
                        "Error happened when caching merged block for appId[{app_id}], \
                         shuffleId[{}], partitionId[{}], status={other:?}",
                        self.shuffle_id, self.partition_id
                    )));
                }
            }
        }
    }

    /// Serves a merged block by ordinal id, from memory when its buffer is
    /// still live, otherwise from the merged data file.
    pub fn get_shuffle_data(&self, block_id: i64) -> Result<ShuffleDataResult> {
        if self.state() == MergeState::InternalError {
            return Err(QuernError::Internal(format!(
                "Partition merge failed, reads are unavailable, partition is {self}"
            )));
        }
        if let Some(buffer) = self.merged_block_buffer_in_memory(block_id) {
            return Ok(ShuffleDataResult::new(buffer));
        }
        Ok(ShuffleDataResult::new(
            self.merged_block_buffer_in_file(block_id)?,
        ))
    }

    fn merged_block_buffer_in_memory(&self, block_id: i64) -> Option<ManagedBuffer> {
        let block = self.merged_block_map.get(&block_id)?;
        // A dead buffer means flush cleanup won the race; the file has it.
        let lease = block.data().try_retain()?;
        Some(ManagedBuffer::Memory(lease))
    }

    fn merged_block_buffer_in_file(&self, block_id: i64) -> Result<ManagedBuffer> {
        let app_id = merged_app_id(&self.app_id);
        let needs_reload = !self.shuffle_meta.lock().segments.contains_key(&block_id);
        if needs_reload {
            self.reload_shuffle_meta(&app_id)?;
        }
        let meta = self.shuffle_meta.lock();
        match meta.segments.get(&block_id) {
            Some(segment) => Ok(ManagedBuffer::FileSegment {
                path: meta.data_file_name.clone(),
                offset: segment.offset as u64,
                length: segment.length as usize,
            }),
            None => Err(QuernError::BlockNotFound(format!(
                "Can not find block for blockId {block_id}"
            ))),
        }
    }

    // The merged index file keeps growing as blocks flush, so the map is
    // rebuilt from a fresh read whenever a lookup misses. Parsing happens
    // outside the lock; only the swap is exclusive.
    fn reload_shuffle_meta(&self, app_id: &str) -> Result<()> {
        let index = self.load_shuffle_index(app_id)?;
        let records = IndexRecord::parse_all(&index.index_data)?;
        let mut segments = HashMap::with_capacity(records.len());
        for record in records {
            segments.insert(
                record.block_id,
                MetaSegment {
                    offset: record.offset,
                    length: record.length,
                },
            );
        }
        let mut meta = self.shuffle_meta.lock();
        meta.data_file_name = index.data_file_name;
        meta.segments = segments;
        Ok(())
    }

    fn load_shuffle_index(&self, app_id: &str) -> Result<ShuffleIndexResult> {
        let storage = self
            .ctx
            .task_manager
            .select_storage(app_id, self.shuffle_id, self.partition_id)
            .ok_or_else(|| {
                QuernError::BlockNotFound(
                    "No such data in current storage manager.".to_string(),
                )
            })?;
        let uid = PartitionedUid::new(app_id, self.shuffle_id, self.partition_id);
        storage.read_handler(&uid).get_shuffle_index()
    }

    /// Drops the entity's block references. Buffer release stays with the
    /// buffer manager.
    pub(crate) fn cleanup(&self) {
        self.cached_block_map.clear();
        self.merged_block_map.clear();
    }
}

impl fmt::Display for PartitionEntity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "PartitionEntity{{appId={}, shuffle={}, partitionId={}, state={:?}}}",
            self.app_id,
            self.shuffle_id,
            self.partition_id,
            self.state()
        )
    }
}

// Cuts the merged record stream into blocks of the configured size and
// publishes each completed block before starting the next. A record never
// splits across blocks; a block only exceeds the target when a single
// record alone does.
struct MergedBlockWriter<'a> {
    entity: &'a PartitionEntity,
    current: BytesMut,
    next_block_id: i64,
}

impl<'a> MergedBlockWriter<'a> {
    fn new(entity: &'a PartitionEntity) -> Self {
        Self {
            entity,
            current: BytesMut::with_capacity(entity.result.merged_block_size()),
            next_block_id: 1,
        }
    }

    async fn cut(&mut self) -> Result<()> {
        let payload = self.current.split().freeze();
        self.entity
            .cache_merged_block(self.next_block_id, payload)
            .await?;
        self.next_block_id += 1;
        Ok(())
    }
}

#[async_trait]
impl RecordSink for MergedBlockWriter<'_> {
    async fn append(&mut self, record: &Record) -> Result<()> {
        let target = self.entity.result.merged_block_size();
        if !self.current.is_empty() && self.current.len() + record.encoded_len() > target {
            self.cut().await?;
        }
        encode_record(&mut self.current, record);
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        if !self.current.is_empty() {
            self.cut().await?;
        }
        Ok(())
    }
}
