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

//! Shared fixtures for the merge engine integration tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use croaring::Treemap;
use rand::seq::SliceRandom;
use tempfile::TempDir;

use quern_core::block::{PartitionedData, ShuffleBlock};
use quern_core::block_id;
use quern_core::config::QuernConfig;
use quern_core::merge::comparator::resolve_comparator;
use quern_core::merge::MergeState;
use quern_core::records::{Record, RecordBuffer, RecordsReader};
use quern_server::buffer::ShuffleBufferManager;
use quern_server::merge::ShuffleMergeManager;
use quern_server::metrics::MergeMetrics;
use quern_server::storage::LocalStorage;
use quern_server::task_manager::DefaultShuffleTaskManager;

/// A complete single-process stack: storage, buffer cache, task manager and
/// merge manager over one temp directory.
pub struct TestCluster {
    pub merge_manager: ShuffleMergeManager,
    pub task_manager: Arc<DefaultShuffleTaskManager>,
    pub storage: Arc<LocalStorage>,
    _dir: TempDir,
}

#[allow(dead_code)]
pub fn build_cluster(overrides: &[(&str, &str)]) -> TestCluster {
    let _ = env_logger::try_init();
    let dir = TempDir::new().unwrap();
    let mut settings = HashMap::new();
    for (key, value) in overrides {
        settings.insert(key.to_string(), value.to_string());
    }
    let config = QuernConfig::with_settings(settings).unwrap();

    let storage = Arc::new(LocalStorage::new(dir.path()));
    let metrics = Arc::new(MergeMetrics::new(&prometheus::Registry::new()).unwrap());
    let buffer_manager = Arc::new(ShuffleBufferManager::new(
        config.buffer_capacity_bytes() as i64,
        storage.clone(),
        metrics,
    ));
    let task_manager = Arc::new(DefaultShuffleTaskManager::new(
        buffer_manager,
        storage.clone(),
    ));
    let merge_manager = ShuffleMergeManager::new(&config, task_manager.clone()).unwrap();
    TestCluster {
        merge_manager,
        task_manager,
        storage,
        _dir: dir,
    }
}

/// The key/value encodings the merge tests run against.
#[derive(Clone, Copy, Debug)]
#[allow(dead_code)]
pub enum TypeCombo {
    /// Zero padded text keys with i32 values.
    TextInt32,
    /// Little endian i64 keys and values.
    Int64Int64,
    /// Struct-like keys (big endian u32 plus a tag) compared bytewise,
    /// with i32 values.
    StructInt32,
}

#[allow(dead_code)]
impl TypeCombo {
    pub fn all() -> [TypeCombo; 3] {
        [
            TypeCombo::TextInt32,
            TypeCombo::Int64Int64,
            TypeCombo::StructInt32,
        ]
    }

    pub fn key_type(&self) -> &'static str {
        match self {
            TypeCombo::TextInt32 => "string",
            TypeCombo::Int64Int64 => "int64",
            TypeCombo::StructInt32 => "bytes",
        }
    }

    pub fn value_type(&self) -> &'static str {
        match self {
            TypeCombo::TextInt32 => "int32",
            TypeCombo::Int64Int64 => "int64",
            TypeCombo::StructInt32 => "int32",
        }
    }

    /// The serialized key for record `index`. Encodings are chosen so the
    /// registered comparator orders keys numerically by `index`.
    pub fn key(&self, index: u64) -> Bytes {
        match self {
            TypeCombo::TextInt32 => Bytes::from(format!("key{index:08}")),
            TypeCombo::Int64Int64 => Bytes::copy_from_slice(&(index as i64).to_le_bytes()),
            TypeCombo::StructInt32 => {
                let mut key = BytesMut::with_capacity(8);
                key.put_u32(index as u32);
                key.put_slice(b"-rec");
                key.freeze()
            }
        }
    }

    /// The serialized value paired with record `index`.
    pub fn value(&self, index: u64) -> Bytes {
        match self {
            TypeCombo::TextInt32 | TypeCombo::StructInt32 => {
                Bytes::copy_from_slice(&(index as i32).to_le_bytes())
            }
            TypeCombo::Int64Int64 => Bytes::copy_from_slice(&(index as i64 * 3).to_le_bytes()),
        }
    }

    /// Decodes a value back to the number it carries.
    pub fn decode_value(&self, value: &[u8]) -> i64 {
        match self {
            TypeCombo::TextInt32 | TypeCombo::StructInt32 => {
                i32::from_le_bytes(value.try_into().unwrap()) as i64
            }
            TypeCombo::Int64Int64 => i64::from_le_bytes(value.try_into().unwrap()),
        }
    }
}

/// Packs `(index, value)` pairs into sorted blocks spread over `task_count`
/// upstream tasks, two blocks per task. Insert order inside each block is
/// shuffled first so the sort path is exercised, exactly like a writer
/// buffering out-of-order records would.
#[allow(dead_code)]
pub fn build_blocks(
    combo: TypeCombo,
    partition_id: i32,
    task_count: u64,
    pairs: &[(u64, Bytes)],
) -> (PartitionedData, Treemap) {
    let comparator = resolve_comparator(combo.key_type()).unwrap();
    let mut per_task: Vec<Vec<(u64, Bytes)>> = vec![Vec::new(); task_count as usize];
    for (position, pair) in pairs.iter().enumerate() {
        per_task[position % task_count as usize].push(pair.clone());
    }

    let mut rng = rand::rng();
    let mut blocks = Vec::new();
    let mut block_ids = Treemap::new();
    for (task, mut task_pairs) in per_task.into_iter().enumerate() {
        task_pairs.sort_by_key(|(index, _)| *index);
        let half = task_pairs.len().div_ceil(2);
        for (sequence_no, chunk) in task_pairs.chunks(half.max(1)).enumerate() {
            let mut shuffled: Vec<&(u64, Bytes)> = chunk.iter().collect();
            shuffled.shuffle(&mut rng);
            let mut buffer = RecordBuffer::new();
            for (index, value) in shuffled {
                buffer.add_record(combo.key(*index), value.clone());
            }
            buffer.sort(comparator.as_ref());

            let block_id =
                block_id::encode(sequence_no as i64, 0, partition_id as i64, task as i64)
                    .unwrap();
            blocks.push(ShuffleBlock::from_bytes(
                block_id,
                task as i64,
                buffer.to_bytes().unwrap(),
            ));
            block_ids.add(block_id as u64);
        }
    }
    (PartitionedData::new(partition_id, blocks), block_ids)
}

/// `(index, value)` pairs for `count` distinct records.
#[allow(dead_code)]
pub fn unique_pairs(combo: TypeCombo, count: u64) -> Vec<(u64, Bytes)> {
    (0..count).map(|i| (i, combo.value(i))).collect()
}

/// Pairs where key `k` appears `(k % 3) + 1` times with values
/// `k`, `k + 1`, ... so a sum combiner folds them to a known total.
#[allow(dead_code)]
pub fn combinable_pairs(combo: TypeCombo, count: u64) -> Vec<(u64, Bytes)> {
    let mut pairs = Vec::new();
    for key in 0..count {
        for repeat in 0..(key % 3) + 1 {
            pairs.push((key, combo.value(key + repeat)));
        }
    }
    pairs
}

/// The total a sum combiner should report for `key`.
#[allow(dead_code)]
pub fn combined_total(combo: TypeCombo, key: u64) -> i64 {
    let times = (key % 3) + 1;
    (0..times)
        .map(|r| combo.decode_value(&combo.value(key + r)))
        .sum()
}

/// Feeds one partition's blocks through both the shared cache and the merge
/// engine's own block map, the way the server's write path does.
#[allow(dead_code)]
pub fn cache_partition(
    cluster: &TestCluster,
    app_id: &str,
    shuffle_id: i32,
    data: &PartitionedData,
) {
    use quern_server::task_manager::{CacheStatus, ShuffleTaskManager};
    assert_eq!(
        cluster
            .task_manager
            .cache_shuffle_data(app_id, shuffle_id, false, data),
        CacheStatus::Success
    );
    cluster
        .merge_manager
        .cache_block(app_id, shuffle_id, data)
        .unwrap();
}

/// Polls until the partition reaches `want`, panicking after ten seconds.
#[allow(dead_code)]
pub async fn wait_for_state(
    cluster: &TestCluster,
    app_id: &str,
    shuffle_id: i32,
    partition_id: i32,
    want: MergeState,
) {
    for _ in 0..400 {
        let (state, _) = cluster
            .merge_manager
            .try_get_block(app_id, shuffle_id, partition_id, 0)
            .unwrap();
        if state == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("partition {app_id}/{shuffle_id}/{partition_id} never reached {want:?}");
}

/// Fetches every merged block in ordinal order and decodes the record
/// stream.
#[allow(dead_code)]
pub fn read_merged_records(
    cluster: &TestCluster,
    app_id: &str,
    shuffle_id: i32,
    partition_id: i32,
) -> Vec<Record> {
    let count = cluster
        .merge_manager
        .get_block_count(app_id, shuffle_id, partition_id)
        .unwrap();
    let mut stream = BytesMut::new();
    for ordinal in 1..=count as i64 {
        let result = cluster
            .merge_manager
            .get_shuffle_data(app_id, shuffle_id, partition_id, ordinal)
            .unwrap();
        stream.extend_from_slice(&result.data().unwrap());
    }
    let mut reader = RecordsReader::from_bytes(stream.freeze());
    let mut records = Vec::new();
    while let Some(record) = reader.next_record().unwrap() {
        records.push(record);
    }
    records
}
