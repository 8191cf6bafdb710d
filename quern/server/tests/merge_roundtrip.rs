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

//! End-to-end merge tests over the in-memory path: cache blocks, report the
//! id set, wait for the background merge and fetch the merged stream back by
//! ordinal.

mod common;

#[cfg(test)]
mod merge_roundtrip {
    use quern_core::error::Result;
    use quern_core::merge::MergeState;

    use crate::common::{
        build_blocks, build_cluster, cache_partition, combinable_pairs, combined_total,
        read_merged_records, unique_pairs, wait_for_state, TestCluster, TypeCombo,
    };

    const RECORDS: u64 = 1009;
    const TASKS: u64 = 4;

    /// Small merged blocks so every run produces several ordinals.
    fn small_block_cluster() -> TestCluster {
        build_cluster(&[("quern.merge.block.size", "4096")])
    }

    async fn run_roundtrip(cluster: &TestCluster, combo: TypeCombo, shuffle_id: i32) -> Result<()> {
        let app_id = format!("roundtrip-{shuffle_id}");
        cluster.merge_manager.register_shuffle(
            &app_id,
            shuffle_id,
            combo.key_type(),
            combo.value_type(),
            false,
        )?;

        let pairs = unique_pairs(combo, RECORDS);
        let (data, block_ids) = build_blocks(combo, 0, TASKS, &pairs);
        cache_partition(cluster, &app_id, shuffle_id, &data);
        cluster
            .merge_manager
            .report_unique_block_ids(&app_id, shuffle_id, 0, block_ids)?;
        wait_for_state(cluster, &app_id, shuffle_id, 0, MergeState::Done).await;

        let records = read_merged_records(cluster, &app_id, shuffle_id, 0);
        assert_eq!(records.len(), RECORDS as usize);
        for (index, record) in records.iter().enumerate() {
            assert_eq!(record.key, combo.key(index as u64), "key {index} mismatch");
            assert_eq!(record.value, combo.value(index as u64));
        }

        // Several ordinals, contiguous from one, sizes covering the stream.
        let count = cluster
            .merge_manager
            .get_block_count(&app_id, shuffle_id, 0)?;
        assert!(count > 1, "expected multiple merged blocks, got {count}");
        let mut total = 0;
        for ordinal in 1..=count as i64 {
            let (state, size) = cluster
                .merge_manager
                .try_get_block(&app_id, shuffle_id, 0, ordinal)?;
            assert_eq!(state, MergeState::Done);
            total += size.unwrap();
        }
        let stream_bytes: usize = records.iter().map(|r| r.encoded_len()).sum();
        assert_eq!(total, stream_bytes as i64);

        // Out of band ordinals answer the state but no size.
        let (_, size) = cluster.merge_manager.try_get_block(&app_id, shuffle_id, 0, 0)?;
        assert!(size.is_none());
        let (_, size) =
            cluster
                .merge_manager
                .try_get_block(&app_id, shuffle_id, 0, count as i64 + 1)?;
        assert!(size.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_merge_roundtrip_text_keys() -> Result<()> {
        let cluster = small_block_cluster();
        run_roundtrip(&cluster, TypeCombo::TextInt32, 1).await
    }

    #[tokio::test]
    async fn test_merge_roundtrip_int64_keys() -> Result<()> {
        let cluster = small_block_cluster();
        run_roundtrip(&cluster, TypeCombo::Int64Int64, 2).await
    }

    #[tokio::test]
    async fn test_merge_roundtrip_raw_keys() -> Result<()> {
        let cluster = small_block_cluster();
        run_roundtrip(&cluster, TypeCombo::StructInt32, 3).await
    }

    async fn run_combine(cluster: &TestCluster, combo: TypeCombo, shuffle_id: i32) -> Result<()> {
        const KEYS: u64 = 200;
        let app_id = format!("combine-{shuffle_id}");
        cluster.merge_manager.register_shuffle(
            &app_id,
            shuffle_id,
            combo.key_type(),
            combo.value_type(),
            true,
        )?;

        let pairs = combinable_pairs(combo, KEYS);
        let (data, block_ids) = build_blocks(combo, 0, TASKS, &pairs);
        cache_partition(cluster, &app_id, shuffle_id, &data);
        cluster
            .merge_manager
            .report_unique_block_ids(&app_id, shuffle_id, 0, block_ids)?;
        wait_for_state(cluster, &app_id, shuffle_id, 0, MergeState::Done).await;

        let records = read_merged_records(cluster, &app_id, shuffle_id, 0);
        assert_eq!(records.len(), KEYS as usize);
        for (index, record) in records.iter().enumerate() {
            let key = index as u64;
            assert_eq!(record.key, combo.key(key));
            assert_eq!(
                combo.decode_value(&record.value),
                combined_total(combo, key),
                "combined value for key {key}"
            );
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_merge_combines_equal_int32_values() -> Result<()> {
        let cluster = small_block_cluster();
        run_combine(&cluster, TypeCombo::TextInt32, 1).await
    }

    #[tokio::test]
    async fn test_merge_combines_equal_int64_values() -> Result<()> {
        let cluster = small_block_cluster();
        run_combine(&cluster, TypeCombo::Int64Int64, 2).await
    }

    #[tokio::test]
    async fn test_duplicate_report_after_done_is_ignored() -> Result<()> {
        let cluster = build_cluster(&[]);
        let combo = TypeCombo::TextInt32;
        let app_id = "duplicate-report";
        cluster
            .merge_manager
            .register_shuffle(app_id, 0, combo.key_type(), combo.value_type(), false)?;

        let pairs = unique_pairs(combo, 64);
        let (data, block_ids) = build_blocks(combo, 0, TASKS, &pairs);
        cache_partition(&cluster, app_id, 0, &data);
        cluster
            .merge_manager
            .report_unique_block_ids(app_id, 0, 0, block_ids.clone())?;
        wait_for_state(&cluster, app_id, 0, 0, MergeState::Done).await;
        let count = cluster.merge_manager.get_block_count(app_id, 0, 0)?;

        // Stragglers re-reporting the same partition must not restart it.
        cluster
            .merge_manager
            .report_unique_block_ids(app_id, 0, 0, block_ids)?;
        let (state, _) = cluster.merge_manager.try_get_block(app_id, 0, 0, 1)?;
        assert_eq!(state, MergeState::Done);
        assert_eq!(cluster.merge_manager.get_block_count(app_id, 0, 0)?, count);
        Ok(())
    }

    #[tokio::test]
    async fn test_partitions_merge_independently() -> Result<()> {
        const PARTITIONS: i32 = 4;
        let cluster = build_cluster(&[]);
        let combo = TypeCombo::Int64Int64;
        let app_id = "many-partitions";
        cluster
            .merge_manager
            .register_shuffle(app_id, 0, combo.key_type(), combo.value_type(), false)?;

        let mut expected = Vec::new();
        for partition_id in 0..PARTITIONS {
            let records = 100 + partition_id as u64 * 53;
            let pairs = unique_pairs(combo, records);
            let (data, block_ids) = build_blocks(combo, partition_id, TASKS, &pairs);
            cache_partition(&cluster, app_id, 0, &data);
            cluster
                .merge_manager
                .report_unique_block_ids(app_id, 0, partition_id, block_ids)?;
            expected.push(records);
        }

        futures::future::join_all((0..PARTITIONS).map(|partition_id| {
            wait_for_state(&cluster, app_id, 0, partition_id, MergeState::Done)
        }))
        .await;

        for partition_id in 0..PARTITIONS {
            let records = read_merged_records(&cluster, app_id, 0, partition_id);
            assert_eq!(records.len(), expected[partition_id as usize] as usize);
            for (index, record) in records.iter().enumerate() {
                assert_eq!(record.key, combo.key(index as u64));
            }
        }
        Ok(())
    }
}
